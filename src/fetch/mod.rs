//! Retrying remote fetch client.
//!
//! - [`transport`]: the `Connector` / `MailSession` seam
//! - [`imap`]: the IMAP implementation of that seam
//! - [`client`]: retry, window search and the lazy message stream

pub mod client;
pub mod imap;
pub mod transport;

use std::fmt;

pub use client::{backoff_delay, search_criteria, FetchClient, FetchStream, Sleeper, ThreadSleeper};

/// Default number of connection attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default exponential backoff base, in seconds.
pub const DEFAULT_BACKOFF_BASE: f64 = 2.0;

/// Fully resolved connection settings.
///
/// `secret` never appears in logs or `Debug` output.
#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Encrypted transport (implicit TLS). Off means plain TCP.
    pub use_tls: bool,
    /// Total connection attempts before giving up.
    pub max_retries: u32,
    /// Delay before retry `n` (0-based) is `backoff_base ^ n` seconds.
    pub backoff_base: f64,
}

impl ConnectionConfig {
    /// TLS on port 993 with default retry settings.
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 993,
            username: username.into(),
            secret: secret.into(),
            use_tls: true,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("secret", &"***")
            .field("use_tls", &self.use_tls)
            .field("max_retries", &self.max_retries)
            .field("backoff_base", &self.backoff_base)
            .finish()
    }
}

/// Caller-supplied search options for one fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Exclude provider categories (promotions, social, updates, forums).
    pub primary_only: bool,
    /// Window on server arrival time instead of the sent date.
    pub use_arrival_date: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let cfg = ConnectionConfig::new("imap.example.com", "user@example.com", "hunter2");
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("***"));
        assert!(shown.contains("imap.example.com"));
    }

    #[test]
    fn test_defaults() {
        let cfg = ConnectionConfig::new("h", "u", "p");
        assert_eq!(cfg.port, 993);
        assert!(cfg.use_tls);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, 2.0);
    }
}
