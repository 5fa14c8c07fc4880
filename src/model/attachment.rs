//! Attachment metadata.
//!
//! Only descriptive fields are kept; the payload never enters a record.

use serde::{Deserialize, Serialize};

/// Metadata about one attachment of a canonical message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    /// Filename of the attachment. Generated if missing from the headers.
    pub filename: String,

    /// MIME content type (e.g. `"image/jpeg"`, `"application/pdf"`).
    pub content_type: String,

    /// Decoded size in bytes.
    pub size_bytes: u64,
}
