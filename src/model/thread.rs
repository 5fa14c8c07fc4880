//! Thread views assembled by the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::message::CanonicalMessage;

/// All stored messages sharing one `thread_id`.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub thread_id: String,
    /// Subject of the earliest message.
    pub subject: String,
    pub message_count: usize,
    /// Ordered by date ascending, ties by id ascending.
    pub messages: Vec<CanonicalMessage>,
    /// Every from/to/cc address across the thread, case-folded and deduplicated.
    pub participants: Vec<String>,
    /// `(earliest, latest)`.
    pub date_range: (DateTime<Utc>, DateTime<Utc>),
}

impl ThreadView {
    /// Build a view from a thread's messages. Returns `None` for an empty set.
    pub fn from_messages(
        thread_id: impl Into<String>,
        mut messages: Vec<CanonicalMessage>,
    ) -> Option<Self> {
        messages.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let first = messages.first()?;
        let last = messages.last()?;
        let subject = first.subject.clone();
        let date_range = (first.date, last.date);

        let participants: BTreeSet<String> =
            messages.iter().flat_map(|m| m.participants()).collect();

        Some(Self {
            thread_id: thread_id.into(),
            subject,
            message_count: messages.len(),
            messages,
            participants: participants.into_iter().collect(),
            date_range,
        })
    }
}
