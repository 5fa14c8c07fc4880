//! Raw message → canonical message conversion.
//!
//! Normalization is a pure function of the raw bytes plus the injected
//! clock: it touches no shared state, so already-fetched items may be
//! normalized in any order or in parallel.

pub mod identity;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{Result, VaultError};
use crate::model::address::Mailbox;
use crate::model::message::{CanonicalMessage, MessageMetadata, RawMessage};
use crate::parser::header::{parse_date, HeaderBlock};
use crate::parser::mime::parse_content;
use crate::parser::quote::strip_quotes_and_signature;

use identity::{fallback_message_id, normalize_message_id, thread_id, ThreadInputs};

/// Subject used when the header is missing or blank.
pub const NO_SUBJECT: &str = "(no subject)";

/// Converts raw transport messages into canonical records.
#[derive(Clone)]
pub struct Normalizer {
    strip_quotes: bool,
    source: String,
    clock: Arc<dyn Clock>,
}

impl Normalizer {
    /// Create a normalizer tagging records with source `"imap"`.
    pub fn new(strip_quotes: bool, clock: Arc<dyn Clock>) -> Self {
        Self {
            strip_quotes,
            source: "imap".to_string(),
            clock,
        }
    }

    /// Override the transport tag written into `metadata.source`.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Normalize one raw message.
    ///
    /// Fails only when the input has no recognizable header section at all.
    /// Unparseable dates, undecodable charsets and malformed addresses degrade
    /// gracefully instead.
    pub fn normalize(&self, raw: RawMessage) -> Result<CanonicalMessage> {
        if raw.bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(VaultError::NormalizationFailed {
                identifier: raw.source_ref,
                cause: "empty message".into(),
            });
        }

        let headers = HeaderBlock::parse(&raw.bytes);
        if headers.is_empty() {
            return Err(VaultError::NormalizationFailed {
                identifier: raw.source_ref,
                cause: "no header fields found".into(),
            });
        }

        let subject = headers
            .get_decoded("Subject")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NO_SUBJECT.to_string());

        let from_addr = headers
            .get_decoded("From")
            .and_then(|v| Mailbox::parse_list(&v).into_iter().next())
            .map(|m| m.address)
            .unwrap_or_default();
        let to_addrs = address_list(&headers, "To");
        let cc_addrs = address_list(&headers, "Cc");

        let raw_date = headers.get("Date").unwrap_or("");
        let (date, date_fallback) = match parse_date(raw_date) {
            Some(d) => (d, false),
            None => {
                warn!(
                    source_ref = %raw.source_ref,
                    date = raw_date,
                    "Unparseable Date header, using fetch time"
                );
                (raw.fetched_at, true)
            }
        };

        let native_id = headers.get("Message-ID").and_then(normalize_message_id);
        let id = match &native_id {
            Some(id) => id.clone(),
            None => {
                let generated = fallback_message_id(&from_addr, raw_date, &subject);
                debug!(source_ref = %raw.source_ref, id = %generated, "No Message-ID, generated one");
                generated
            }
        };

        let participants = std::iter::once(&from_addr)
            .chain(to_addrs.iter())
            .chain(cc_addrs.iter())
            .cloned();
        let thread_id = thread_id(
            ThreadInputs {
                native_id: native_id.as_deref(),
                references: headers.get("References"),
                in_reply_to: headers.get("In-Reply-To"),
                subject: &subject,
            },
            participants,
        );

        let content = parse_content(&raw.bytes);
        let text = content.text.unwrap_or_default();
        let body_text = if self.strip_quotes {
            strip_quotes_and_signature(&text)
        } else {
            text
        };

        Ok(CanonicalMessage {
            id,
            thread_id,
            subject,
            from_addr,
            to_addrs,
            cc_addrs,
            date,
            body_text,
            body_html: content.html,
            attachments: content.attachments,
            raw_headers: headers.to_map(),
            metadata: MessageMetadata {
                fetched_at: raw.fetched_at,
                normalized_at: self.clock.now(),
                source: self.source.clone(),
                date_fallback,
                arrived_at: raw.arrived_at,
            },
        })
    }
}

/// Bare addresses from an address-list header, in header order.
fn address_list(headers: &HeaderBlock, name: &str) -> Vec<String> {
    headers
        .get_decoded(name)
        .map(|v| {
            Mailbox::parse_list(&v)
                .into_iter()
                .map(|m| m.address)
                .collect()
        })
        .unwrap_or_default()
}
