//! MIME body extraction: text and HTML bodies plus attachment metadata.

use mail_parser::{MessageParser, MimeHeaders, PartType};
use tracing::debug;

use crate::model::attachment::AttachmentMeta;
use crate::parser::header::find_header_end;

/// Decoded body content of one message.
#[derive(Debug, Clone, Default)]
pub struct MimeContent {
    /// Plain-text body (the `text/plain` part, or converted from HTML when
    /// the message has no plain part).
    pub text: Option<String>,
    /// HTML body, exactly as decoded from its part. `None` unless the
    /// message carries a real `text/html` part.
    pub html: Option<String>,
    /// Attachment metadata; payloads are measured and dropped.
    pub attachments: Vec<AttachmentMeta>,
}

/// Parse a complete raw message (headers + body) and extract its content.
///
/// Uses `mail-parser`, which decodes transfer encodings and declared
/// charsets. When it cannot make sense of the structure, everything after
/// the first blank line becomes the text body, decoded lossily.
pub fn parse_content(raw_message: &[u8]) -> MimeContent {
    let Some(msg) = MessageParser::default().parse(raw_message) else {
        debug!("MIME parser rejected message, using raw body fallback");
        return MimeContent {
            text: Some(extract_body_fallback(raw_message)),
            html: None,
            attachments: Vec::new(),
        };
    };

    MimeContent {
        text: msg.body_text(0).map(|s| s.into_owned()),
        html: html_body(&msg),
        attachments: list_attachments(&msg),
    }
}

/// The first HTML part as written. `body_html` would synthesize one from a
/// plain-text part, which must not end up in a record.
fn html_body(msg: &mail_parser::Message<'_>) -> Option<String> {
    match &msg.html_part(0)?.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    }
}

/// Attachment metadata from a parsed message.
///
/// A part counts as an attachment when its disposition says so, or when it
/// carries a filename and is not marked `inline`.
fn list_attachments(msg: &mail_parser::Message<'_>) -> Vec<AttachmentMeta> {
    let mut result = Vec::new();

    for (idx, part) in msg.attachments().enumerate() {
        let disposition = part
            .content_disposition()
            .map(|d| d.ctype().to_ascii_lowercase());
        let name = part.attachment_name();

        let is_attachment = match disposition.as_deref() {
            Some("attachment") => true,
            Some("inline") => false,
            _ => name.is_some(),
        };
        if !is_attachment {
            continue;
        }

        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub).to_ascii_lowercase(),
                None => ct.ctype().to_ascii_lowercase(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        result.push(AttachmentMeta {
            filename: name
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{idx}")),
            content_type,
            size_bytes: part.contents().len() as u64,
        });
    }

    result
}

/// Everything after the first blank line, decoded as lossy UTF-8.
fn extract_body_fallback(data: &[u8]) -> String {
    let body = match find_header_end(data) {
        Some(pos) if data[pos..].starts_with(b"\r\n\r\n") => &data[pos + 4..],
        Some(pos) => &data[pos + 2..],
        None => &[][..],
    };
    String::from_utf8_lossy(body).into_owned()
}
