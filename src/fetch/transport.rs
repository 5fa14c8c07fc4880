//! Transport seam between the fetch client and a concrete mail protocol.
//!
//! The fetch client owns retry, windowing and error classification. A
//! transport only knows how to open a session and run single commands, which
//! keeps the client testable against scripted in-process sessions.

use chrono::{DateTime, Utc};

/// An open, authenticated, mailbox-selected session.
pub trait MailSession {
    /// Run a search and return matching sequence numbers (any order).
    fn search(&mut self, criteria: &str) -> anyhow::Result<Vec<u32>>;

    /// Server arrival time of one message, `None` when the server omits it.
    fn internal_date(&mut self, seq: u32) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Full RFC 5322 bytes of one message.
    fn fetch_rfc822(&mut self, seq: u32) -> anyhow::Result<Vec<u8>>;

    /// End the session. Called at most once.
    fn logout(&mut self) -> anyhow::Result<()>;
}

/// Opens sessions. One call is one connection attempt; retrying is the
/// caller's job.
pub trait Connector {
    type Session: MailSession;

    fn connect(&self) -> anyhow::Result<Self::Session>;
}
