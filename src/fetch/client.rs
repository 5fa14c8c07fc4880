//! Connection retry, window search and the lazy raw-message stream.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use super::imap::ImapConnector;
use super::transport::{Connector, MailSession};
use super::{ConnectionConfig, FetchOptions};
use crate::clock::Clock;
use crate::error::{Result, VaultError};
use crate::model::message::RawMessage;

/// Upper bound on a single backoff sleep.
const MAX_BACKOFF_SECS: f64 = 300.0;

/// Gmail category labels excluded by `primary_only`.
const EXCLUDED_CATEGORIES: [&str; 4] = ["Promotions", "Social", "Updates", "Forums"];

/// Blocks the calling thread between connection attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Delay before retrying after failed attempt `attempt` (0-based):
/// `base ^ attempt` seconds, capped at five minutes.
pub fn backoff_delay(base: f64, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let secs = base.powi(exponent);
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs.min(MAX_BACKOFF_SECS))
}

/// IMAP search criteria for a window starting at `since`.
///
/// Sent-date mode filters on the `Date:` header server-side. Arrival mode
/// only narrows by day (`SINCE` is day-granular and evaluated in the
/// server's zone, hence the extra day); the exact check happens per message.
pub fn search_criteria(since: DateTime<Utc>, options: FetchOptions) -> String {
    let mut criteria = if options.use_arrival_date {
        let day = since - ChronoDuration::days(1);
        format!("SINCE {}", day.format("%d-%b-%Y"))
    } else {
        format!("SENTSINCE {}", since.format("%d-%b-%Y"))
    };

    if options.primary_only {
        for label in EXCLUDED_CATEGORIES {
            criteria.push_str(&format!(" NOT X-GM-LABELS \"\\\\{label}\""));
        }
    }
    criteria
}

/// Opens sessions with bounded retry and hands out message streams.
pub struct FetchClient<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
}

impl FetchClient<ImapConnector> {
    /// Client over the IMAP transport.
    pub fn imap(config: ConnectionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(ImapConnector::new(config.clone()), config, clock)
    }
}

impl<C: Connector> FetchClient<C> {
    /// `config` supplies the retry policy and the endpoint named in logs.
    pub fn new(connector: C, config: ConnectionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            connector,
            config,
            clock,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the backoff sleeper.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Connect, search the window and return a lazy stream over its messages.
    ///
    /// Fails with `ConnectionFailed` once every attempt is used up, or with
    /// `SearchFailed` when the session opened but the search did not succeed.
    /// Per-message failures are items of the returned stream.
    pub fn fetch_since(
        &self,
        since: DateTime<Utc>,
        options: FetchOptions,
    ) -> Result<FetchStream<C::Session>> {
        let mut session = self.connect_with_retry()?;

        let criteria = search_criteria(since, options);
        debug!(criteria = %criteria, "Searching mailbox");
        let mut seqs = match session.search(&criteria) {
            Ok(seqs) => seqs,
            Err(e) => {
                if let Err(logout_err) = session.logout() {
                    debug!(error = %logout_err, "Logout after failed search");
                }
                return Err(VaultError::SearchFailed {
                    cause: format!("{e:#}"),
                });
            }
        };
        seqs.sort_unstable();
        seqs.dedup();

        info!(
            candidates = seqs.len(),
            since = %since.to_rfc3339(),
            arrival = options.use_arrival_date,
            "Mailbox search complete"
        );

        Ok(FetchStream {
            session: Some(session),
            pending: seqs.into(),
            since,
            check_arrival: options.use_arrival_date,
            clock: Arc::clone(&self.clock),
        })
    }

    fn connect_with_retry(&self) -> Result<C::Session> {
        let cfg = &self.config;
        let attempts = cfg.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            info!(
                host = %cfg.host,
                port = cfg.port,
                username = %cfg.username,
                attempt = attempt + 1,
                of = attempts,
                "Connecting to mail server"
            );
            match self.connector.connect() {
                Ok(session) => {
                    info!(host = %cfg.host, "Connected");
                    return Ok(session);
                }
                Err(e) => {
                    last_error = format!("{e:#}");
                    warn!(attempt = attempt + 1, error = %last_error, "Connection attempt failed");
                    if attempt + 1 < attempts {
                        let delay = backoff_delay(cfg.backoff_base, attempt);
                        info!(delay_secs = delay.as_secs_f64(), "Retrying after backoff");
                        self.sleeper.sleep(delay);
                    }
                }
            }
        }

        Err(VaultError::ConnectionFailed {
            attempts,
            cause: last_error,
        })
    }
}

/// Lazy, finite, non-restartable sequence of raw messages.
///
/// Holds the session open while items remain. The session is logged out
/// when the stream is exhausted or dropped, whichever comes first.
pub struct FetchStream<S: MailSession> {
    session: Option<S>,
    pending: VecDeque<u32>,
    since: DateTime<Utc>,
    check_arrival: bool,
    clock: Arc<dyn Clock>,
}

impl<S: MailSession> FetchStream<S> {
    /// Candidates not yet pulled. In arrival mode some may still be skipped.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// Log out now; later calls to `next` return `None`.
    pub fn close(&mut self) {
        self.pending.clear();
        if let Some(mut session) = self.session.take() {
            match session.logout() {
                Ok(()) => debug!("Session closed"),
                Err(e) => warn!(error = %e, "Logout failed"),
            }
        }
    }

    fn item_error(seq: u32, cause: impl std::fmt::Display) -> VaultError {
        VaultError::FetchItemFailed {
            identifier: seq.to_string(),
            cause: cause.to_string(),
        }
    }
}

impl<S: MailSession> Iterator for FetchStream<S> {
    type Item = Result<RawMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(seq) = self.pending.pop_front() else {
                self.close();
                return None;
            };
            let session = self.session.as_mut()?;

            let arrived_at = if self.check_arrival {
                match session.internal_date(seq) {
                    Ok(Some(arrived)) if arrived < self.since => {
                        debug!(seq, arrived = %arrived.to_rfc3339(), "Arrived before window, skipping");
                        continue;
                    }
                    Ok(arrived) => arrived,
                    Err(e) => {
                        warn!(seq, error = %e, "Arrival time check failed");
                        return Some(Err(Self::item_error(seq, format!("{e:#}"))));
                    }
                }
            } else {
                None
            };

            return Some(match session.fetch_rfc822(seq) {
                Ok(bytes) => Ok(RawMessage {
                    source_ref: seq.to_string(),
                    bytes,
                    fetched_at: self.clock.now(),
                    arrived_at,
                }),
                Err(e) => {
                    warn!(seq, error = %e, "Message fetch failed");
                    Err(Self::item_error(seq, format!("{e:#}")))
                }
            });
        }
    }
}

impl<S: MailSession> Drop for FetchStream<S> {
    fn drop(&mut self) {
        self.close();
    }
}
