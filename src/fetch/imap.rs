//! IMAP transport over the `imap` crate, TLS through `native-tls`.

use std::net::TcpStream;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use super::transport::{Connector, MailSession};
use super::ConnectionConfig;

/// Mailbox every session selects.
const MAILBOX: &str = "INBOX";

/// Connects to an IMAP server and selects the inbox.
pub struct ImapConnector {
    config: ConnectionConfig,
}

impl ImapConnector {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

/// A logged-in session over either transport.
pub enum ImapSession {
    Tls(imap::Session<TlsStream<TcpStream>>),
    Plain(imap::Session<TcpStream>),
}

/// Run the same expression against whichever session variant is active.
macro_rules! with_session {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            ImapSession::Tls($s) => $body,
            ImapSession::Plain($s) => $body,
        }
    };
}

impl Connector for ImapConnector {
    type Session = ImapSession;

    fn connect(&self) -> anyhow::Result<ImapSession> {
        let cfg = &self.config;
        let addr = (cfg.host.as_str(), cfg.port);

        let mut session = if cfg.use_tls {
            let tls = TlsConnector::builder().build()?;
            let client = imap::connect(addr, cfg.host.as_str(), &tls)
                .with_context(|| format!("TLS connect to {}:{}", cfg.host, cfg.port))?;
            let session = client
                .login(&cfg.username, &cfg.secret)
                .map_err(|(e, _)| anyhow!("login rejected: {e}"))?;
            ImapSession::Tls(session)
        } else {
            let stream = TcpStream::connect(addr)
                .with_context(|| format!("connect to {}:{}", cfg.host, cfg.port))?;
            let mut client = imap::Client::new(stream);
            client.read_greeting()?;
            let session = client
                .login(&cfg.username, &cfg.secret)
                .map_err(|(e, _)| anyhow!("login rejected: {e}"))?;
            ImapSession::Plain(session)
        };

        let mailbox = with_session!(&mut session, s => s.select(MAILBOX))
            .with_context(|| format!("select {MAILBOX}"))?;
        debug!(exists = mailbox.exists, "Mailbox selected");
        Ok(session)
    }
}

impl MailSession for ImapSession {
    fn search(&mut self, criteria: &str) -> anyhow::Result<Vec<u32>> {
        let found = with_session!(self, s => s.search(criteria))?;
        Ok(found.into_iter().collect())
    }

    fn internal_date(&mut self, seq: u32) -> anyhow::Result<Option<DateTime<Utc>>> {
        let fetches = with_session!(self, s => s.fetch(seq.to_string(), "INTERNALDATE"))?;
        Ok(fetches
            .iter()
            .find_map(|f| f.internal_date())
            .map(|d| d.with_timezone(&Utc)))
    }

    fn fetch_rfc822(&mut self, seq: u32) -> anyhow::Result<Vec<u8>> {
        let fetches = with_session!(self, s => s.fetch(seq.to_string(), "BODY.PEEK[]"))?;
        fetches
            .iter()
            .find_map(|f| f.body())
            .map(<[u8]>::to_vec)
            .ok_or_else(|| anyhow!("server returned no body"))
    }

    fn logout(&mut self) -> anyhow::Result<()> {
        with_session!(self, s => s.logout())?;
        Ok(())
    }
}
