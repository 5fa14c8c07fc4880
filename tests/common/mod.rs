//! Shared helpers: fixtures, a scripted in-process mail transport and a
//! sleeper that records instead of blocking.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, TimeZone, Utc};

use mailvault::clock::{Clock, FixedClock};
use mailvault::fetch::transport::{Connector, MailSession};
use mailvault::fetch::{ConnectionConfig, FetchClient, Sleeper};
use mailvault::model::message::RawMessage;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn fixture_bytes(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 12, 12, 0, 0).unwrap()
}

pub fn clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock(now()))
}

pub fn raw(source_ref: &str, bytes: Vec<u8>) -> RawMessage {
    RawMessage {
        source_ref: source_ref.to_string(),
        bytes,
        fetched_at: now(),
        arrived_at: None,
    }
}

/// A minimal plain-text message.
pub fn simple_message(message_id: &str, day: u32, subject: &str) -> Vec<u8> {
    format!(
        "Message-ID: {message_id}\r\n\
         Date: {day:02} Jan 2024 10:00:00 +0000\r\n\
         From: sender@example.com\r\n\
         To: rcpt@example.com\r\n\
         Subject: {subject}\r\n\
         \r\n\
         Body of {subject}\r\n"
    )
    .into_bytes()
}

#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.sleeps.lock().unwrap().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

/// What the scripted server holds and how it misbehaves.
#[derive(Clone, Default)]
pub struct Script {
    pub messages: BTreeMap<u32, Vec<u8>>,
    pub failing_fetches: HashSet<u32>,
    pub connect_failures: u32,
}

impl Script {
    pub fn with_messages(messages: Vec<Vec<u8>>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .enumerate()
                .map(|(i, m)| (i as u32 + 1, m))
                .collect(),
            ..Default::default()
        }
    }
}

pub struct ScriptedSession {
    script: Script,
    fetches: Arc<AtomicUsize>,
    logouts: Arc<AtomicUsize>,
}

impl MailSession for ScriptedSession {
    fn search(&mut self, _criteria: &str) -> anyhow::Result<Vec<u32>> {
        Ok(self.script.messages.keys().copied().collect())
    }

    fn internal_date(&mut self, _seq: u32) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(Some(now()))
    }

    fn fetch_rfc822(&mut self, seq: u32) -> anyhow::Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.script.failing_fetches.contains(&seq) {
            return Err(anyhow!("NO [UNAVAILABLE] message {seq} temporarily unavailable"));
        }
        self.script
            .messages
            .get(&seq)
            .cloned()
            .ok_or_else(|| anyhow!("no message {seq}"))
    }

    fn logout(&mut self) -> anyhow::Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedConnector {
    script: Script,
    pub attempts: Arc<AtomicU32>,
    pub fetches: Arc<AtomicUsize>,
    pub logouts: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            attempts: Arc::new(AtomicU32::new(0)),
            fetches: Arc::new(AtomicUsize::new(0)),
            logouts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    fn connect(&self) -> anyhow::Result<ScriptedSession> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.script.connect_failures {
            return Err(anyhow!("connection refused (attempt {})", attempt + 1));
        }
        Ok(ScriptedSession {
            script: self.script.clone(),
            fetches: Arc::clone(&self.fetches),
            logouts: Arc::clone(&self.logouts),
        })
    }
}

pub fn connection_config() -> ConnectionConfig {
    ConnectionConfig::new("imap.test.invalid", "tester@example.com", "pa55word")
}

/// Fetch client over a scripted connector, with the counters and sleeper
/// exposed for assertions.
pub struct Harness {
    pub client: FetchClient<ScriptedConnector>,
    pub sleeper: Arc<RecordingSleeper>,
    pub attempts: Arc<AtomicU32>,
    pub fetches: Arc<AtomicUsize>,
    pub logouts: Arc<AtomicUsize>,
}

pub fn harness(script: Script) -> Harness {
    let connector = ScriptedConnector::new(script);
    let attempts = Arc::clone(&connector.attempts);
    let fetches = Arc::clone(&connector.fetches);
    let logouts = Arc::clone(&connector.logouts);
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = FetchClient::new(connector, connection_config(), clock())
        .with_sleeper(Arc::clone(&sleeper) as Arc<dyn Sleeper>);
    Harness {
        client,
        sleeper,
        attempts,
        fetches,
        logouts,
    }
}
