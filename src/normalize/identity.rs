//! Message and thread identity derivation.
//!
//! Every identity here is a pure function of header content, so fetching the
//! same message twice always yields the same `id` and `thread_id`.

use sha2::{Digest, Sha256};

use crate::parser::header::{extract_all_angle_brackets, extract_angle_bracket};

/// Domain used for identities this crate synthesizes.
const SYNTHETIC_DOMAIN: &str = "mailvault";

/// Reply and forward prefixes stripped from subjects before grouping.
const SUBJECT_PREFIXES: [&str; 6] = ["re:", "fwd:", "fw:", "aw:", "sv:", "wg:"];

/// Normalize a message-id token to `<local@domain>` form.
///
/// Accepts the bracketed form or a bare `local@domain`. Returns `None` for
/// empty, bracket-only or whitespace-containing values.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let token = extract_angle_bracket(raw).unwrap_or_else(|| raw.trim().to_string());
    let inner = token
        .trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .trim();

    let valid = !inner.is_empty()
        && inner.contains('@')
        && !inner.contains(|c: char| c.is_whitespace() || c == '<' || c == '>');
    valid.then(|| format!("<{inner}>"))
}

/// Deterministic identity for a message without a usable `Message-ID`.
///
/// Built from the sender, the exact `Date:` header text and a hash of the
/// subject. Two fetches of the same message produce the same value.
pub fn fallback_message_id(from_addr: &str, raw_date: &str, subject: &str) -> String {
    let subject_hash = Sha256::digest(subject.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(from_addr.trim().to_lowercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(raw_date.trim().as_bytes());
    hasher.update(b"\n");
    hasher.update(subject_hash);
    let hex = format!("{:x}", hasher.finalize());

    format!("<generated-{}@{SYNTHETIC_DOMAIN}>", &hex[..32])
}

/// Linkage headers and fallbacks a thread identity is derived from.
#[derive(Debug, Clone, Copy)]
pub struct ThreadInputs<'a> {
    /// The message's own normalized native id, if it had one.
    pub native_id: Option<&'a str>,
    /// Raw `References` header.
    pub references: Option<&'a str>,
    /// Raw `In-Reply-To` header.
    pub in_reply_to: Option<&'a str>,
    /// Decoded subject.
    pub subject: &'a str,
}

/// Derive the thread identity of a message.
///
/// 1. The earliest valid id in `References` (the root of the reply chain).
/// 2. Otherwise the `In-Reply-To` id.
/// 3. Otherwise the message's own native id: it is a thread root, and its
///    replies will anchor on this same value through step 1 or 2.
/// 4. Otherwise a hash of the normalized subject and the sorted participants.
pub fn thread_id<I>(inputs: ThreadInputs<'_>, participants: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let from_references = inputs.references.and_then(|refs| {
        extract_all_angle_brackets(refs)
            .iter()
            .find_map(|r| normalize_message_id(r))
    });
    if let Some(anchor) = from_references {
        return anchor;
    }

    if let Some(parent) = inputs.in_reply_to.and_then(normalize_message_id) {
        return parent;
    }

    if let Some(own) = inputs.native_id {
        return own.to_string();
    }

    subject_thread_id(inputs.subject, participants)
}

/// Thread identity from the normalized subject plus the participant set.
pub fn subject_thread_id<I>(subject: &str, participants: I) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut people: Vec<String> = participants
        .into_iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    people.sort();
    people.dedup();

    let mut hasher = Sha256::new();
    hasher.update(normalize_subject(subject).as_bytes());
    hasher.update(b"\n");
    hasher.update(people.join(",").as_bytes());
    let hex = format!("{:x}", hasher.finalize());

    format!("<thread-{}@{SYNTHETIC_DOMAIN}>", &hex[..32])
}

/// Case-fold a subject and strip reply/forward prefixes, repeatedly.
///
/// `"Re: FW: re:Budget"` → `"budget"`
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim().to_lowercase();
    'outer: loop {
        for prefix in SUBJECT_PREFIXES {
            if let Some(rest) = s.strip_prefix(prefix) {
                s = rest.trim_start().to_string();
                continue 'outer;
            }
        }
        // Bracketed counters such as "Re[2]:"
        if let Some(rest) = s.strip_prefix("re[") {
            if let Some(close) = rest.find("]:") {
                if rest[..close].chars().all(|c| c.is_ascii_digit()) {
                    s = rest[close + 2..].trim_start().to_string();
                    continue;
                }
            }
        }
        break;
    }
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(
        native_id: Option<&'a str>,
        references: Option<&'a str>,
        in_reply_to: Option<&'a str>,
        subject: &'a str,
    ) -> ThreadInputs<'a> {
        ThreadInputs {
            native_id,
            references,
            in_reply_to,
            subject,
        }
    }

    #[test]
    fn test_normalize_message_id() {
        assert_eq!(
            normalize_message_id(" <msg001@example.com> ").as_deref(),
            Some("<msg001@example.com>")
        );
        assert_eq!(
            normalize_message_id("msg001@example.com").as_deref(),
            Some("<msg001@example.com>")
        );
        assert_eq!(normalize_message_id("<>"), None);
        assert_eq!(normalize_message_id(""), None);
        assert_eq!(normalize_message_id("not an id"), None);
    }

    #[test]
    fn test_fallback_id_is_deterministic() {
        let a = fallback_message_id("a@x.com", "Thu, 04 Jan 2024 10:00:00 +0000", "Hi");
        let b = fallback_message_id("A@X.com", "Thu, 04 Jan 2024 10:00:00 +0000", "Hi");
        assert_eq!(a, b);
        assert!(a.starts_with("<generated-"));
        assert!(a.ends_with("@mailvault>"));
    }

    #[test]
    fn test_fallback_id_varies_with_fields() {
        let base = fallback_message_id("a@x.com", "Thu, 04 Jan 2024 10:00:00 +0000", "Hi");
        assert_ne!(
            base,
            fallback_message_id("a@x.com", "Thu, 04 Jan 2024 10:00:01 +0000", "Hi")
        );
        assert_ne!(
            base,
            fallback_message_id("b@x.com", "Thu, 04 Jan 2024 10:00:00 +0000", "Hi")
        );
        assert_ne!(
            base,
            fallback_message_id("a@x.com", "Thu, 04 Jan 2024 10:00:00 +0000", "Hi!")
        );
    }

    #[test]
    fn test_thread_prefers_earliest_reference() {
        let t = thread_id(
            inputs(
                Some("<c@x>"),
                Some("<a@x> <b@x>"),
                Some("<b@x>"),
                "Re: Re: Topic",
            ),
            Vec::new(),
        );
        assert_eq!(t, "<a@x>");
    }

    #[test]
    fn test_thread_uses_in_reply_to_without_references() {
        let t = thread_id(inputs(Some("<b@x>"), None, Some("<a@x>"), "Re: Topic"), Vec::new());
        assert_eq!(t, "<a@x>");
    }

    #[test]
    fn test_thread_root_anchors_on_itself() {
        let t = thread_id(inputs(Some("<a@x>"), None, None, "Topic"), Vec::new());
        assert_eq!(t, "<a@x>");
    }

    #[test]
    fn test_subject_thread_ignores_prefix_and_order() {
        let a = subject_thread_id("Re: Budget", vec!["b@x.com".into(), "a@x.com".into()]);
        let b = subject_thread_id("budget", vec!["A@x.com".into(), "b@x.com".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_subject_thread_separates_participants() {
        let a = subject_thread_id("Budget", vec!["a@x.com".into()]);
        let b = subject_thread_id("Budget", vec!["c@x.com".into()]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_subject() {
        assert_eq!(normalize_subject("Hello"), "hello");
        assert_eq!(normalize_subject("Re: Re: Hello"), "hello");
        assert_eq!(normalize_subject("FW: Re:Hello"), "hello");
        assert_eq!(normalize_subject("Re[2]: Hello   world"), "hello world");
        assert_eq!(normalize_subject("Regarding the plan"), "regarding the plan");
    }
}
