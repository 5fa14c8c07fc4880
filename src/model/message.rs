//! Raw and canonical message types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::AttachmentMeta;

/// A message exactly as the transport delivered it.
///
/// Lives only for one fetch-normalize pass. The normalizer consumes it.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Transport-local reference (IMAP sequence number), used in error reports.
    pub source_ref: String,
    /// Full RFC 5322 bytes: headers, body parts, attachment payloads.
    pub bytes: Vec<u8>,
    /// When the transport handed the message over.
    pub fetched_at: DateTime<Utc>,
    /// Arrival time reported by the server (IMAP `INTERNALDATE`), if known.
    pub arrived_at: Option<DateTime<Utc>>,
}

/// Processing metadata attached to every canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub fetched_at: DateTime<Utc>,
    pub normalized_at: DateTime<Utc>,
    /// Transport tag, e.g. `"imap"`.
    pub source: String,
    /// Set when the `Date:` header could not be parsed and `date` holds the fetch time.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub date_fallback: bool,
    /// Server arrival time, when the transport reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_at: Option<DateTime<Utc>>,
}

/// The durable unit of record. Immutable once built by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    /// Deduplication key: the normalized `Message-ID`, or a deterministic
    /// `<generated-…@mailvault>` identity.
    pub id: String,
    /// Conversation identity shared by every message of a thread.
    pub thread_id: String,
    pub subject: String,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
    #[serde(default)]
    pub cc_addrs: Vec<String>,
    /// Always UTC; serialized as RFC 3339.
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub body_text: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    /// Header name → value, unfolded but otherwise verbatim. Repeated
    /// headers are joined with a newline in arrival order.
    #[serde(default)]
    pub raw_headers: BTreeMap<String, String>,
    pub metadata: MessageMetadata,
}

impl CanonicalMessage {
    /// Every address on the message (from, to, cc), case-folded, in header order.
    pub fn participants(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.from_addr)
            .chain(self.to_addrs.iter())
            .chain(self.cc_addrs.iter())
            .filter(|a| !a.is_empty())
            .map(|a| a.to_lowercase())
    }
}
