//! Normalization of real-world shaped messages from `tests/fixtures`.

mod common;

use chrono::{TimeZone, Utc};

use common::{clock, fixture_bytes, now, raw};
use mailvault::model::message::CanonicalMessage;
use mailvault::normalize::Normalizer;

fn normalize_fixture(name: &str) -> CanonicalMessage {
    Normalizer::new(true, clock())
        .normalize(raw(name, fixture_bytes(name)))
        .unwrap()
}

// ─── Thread convergence: A ← B ← C ──────────────────────────────────

#[test]
fn test_reply_chain_shares_thread_id() {
    let a = normalize_fixture("thread_root.eml");
    let b = normalize_fixture("thread_reply.eml");
    let c = normalize_fixture("thread_reply2.eml");

    assert_eq!(a.thread_id, "<root.1001@example.com>");
    assert_eq!(b.thread_id, a.thread_id);
    assert_eq!(c.thread_id, a.thread_id);
}

#[test]
fn test_reply_without_references_still_converges() {
    let bytes = String::from_utf8(fixture_bytes("thread_reply.eml"))
        .unwrap()
        .replace("References: <root.1001@example.com>\n", "");
    let b = Normalizer::new(true, clock())
        .normalize(raw("b", bytes.into_bytes()))
        .unwrap();
    assert_eq!(b.thread_id, "<root.1001@example.com>");
}

// ─── Identity ───────────────────────────────────────────────────────

#[test]
fn test_native_identity_is_stable() {
    let first = normalize_fixture("thread_reply.eml");
    let second = normalize_fixture("thread_reply.eml");
    assert_eq!(first.id, "<reply.1002@example.com>");
    assert_eq!(first.id, second.id);
    assert_eq!(first.thread_id, second.thread_id);
}

#[test]
fn test_fallback_identity_is_stable() {
    let first = normalize_fixture("no_message_id.eml");
    let second = normalize_fixture("no_message_id.eml");
    assert!(first.id.starts_with("<generated-"), "got {}", first.id);
    assert_eq!(first.id, second.id);
    assert!(first.thread_id.starts_with("<thread-"), "got {}", first.thread_id);
    assert_eq!(first.thread_id, second.thread_id);
}

// ─── Headers, dates, bodies ─────────────────────────────────────────

#[test]
fn test_structured_fields() {
    let msg = normalize_fixture("thread_reply2.eml");
    assert_eq!(msg.subject, "RE: Re: Quarterly budget");
    assert_eq!(msg.from_addr, "carol@example.com");
    assert_eq!(msg.to_addrs, vec!["bob@example.com", "alice@example.com"]);
    assert!(msg.cc_addrs.is_empty());
    assert_eq!(msg.date, Utc.with_ymd_and_hms(2024, 1, 9, 8, 5, 0).unwrap());
    assert_eq!(
        msg.raw_headers.get("References").map(String::as_str),
        Some("<root.1001@example.com> <reply.1002@example.com>")
    );
}

#[test]
fn test_date_converted_to_utc() {
    let msg = normalize_fixture("thread_root.eml");
    assert_eq!(msg.date, Utc.with_ymd_and_hms(2024, 1, 8, 8, 15, 0).unwrap());
    assert!(msg.date.to_rfc3339().ends_with("+00:00"));
}

#[test]
fn test_unparseable_date_falls_back_and_flags() {
    let msg = normalize_fixture("bad_date.eml");
    assert!(msg.metadata.date_fallback);
    assert_eq!(msg.date, now());
    assert_eq!(msg.subject, "Lunch?");

    let json = serde_json::to_string(&msg).unwrap();
    assert!(json.contains("\"date_fallback\":true"));
}

#[test]
fn test_quotes_and_signature_stripped() {
    let reply = normalize_fixture("thread_reply.eml");
    assert_eq!(reply.body_text, "Sure, attached by Thursday.");

    let root = normalize_fixture("thread_root.eml");
    assert_eq!(root.body_text, "Hi Bob,\n\nCan you send the Q1 numbers by Friday?");
}

#[test]
fn test_stripping_disabled_keeps_body() {
    let msg = Normalizer::new(false, clock())
        .normalize(raw("r", fixture_bytes("thread_reply.eml")))
        .unwrap();
    assert!(msg.body_text.contains("> Can you send the Q1 numbers by Friday?"));
    assert!(msg.body_text.contains("wrote:"));
}

#[test]
fn test_encoded_headers_and_latin1_body() {
    let msg = normalize_fixture("latin1.eml");
    assert_eq!(msg.subject, "Café con leña");
    assert_eq!(msg.from_addr, "jose@example.es");
    assert!(msg.body_text.contains("café"), "got {:?}", msg.body_text);
}

#[test]
fn test_metadata_comes_from_clock_and_raw() {
    let msg = normalize_fixture("thread_root.eml");
    assert_eq!(msg.metadata.fetched_at, now());
    assert_eq!(msg.metadata.normalized_at, now());
    assert_eq!(msg.metadata.source, "imap");
    assert!(!msg.metadata.date_fallback);
    assert!(msg.body_html.is_none());
}

#[test]
fn test_garbage_input_is_item_error() {
    let err = Normalizer::new(true, clock())
        .normalize(raw("42", b"\x00\x01\x02 binary junk".to_vec()))
        .unwrap_err();
    assert!(err.to_string().contains("42"));
    assert!(!err.is_fatal());
}
