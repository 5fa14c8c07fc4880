//! `mailvault`: mailbox ingestion into a deduplicating local store.
//!
//! The pipeline fetches raw messages over IMAP with bounded retry, turns
//! each into a canonical record with stable message and thread identities,
//! and persists it exactly once in an index-backed file store.

pub mod clock;
pub mod config;
pub mod error;
pub mod fetch;
pub mod index;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod parser;
pub mod store;
