//! Core data model types: raw and canonical messages, addresses, attachments, threads.

pub mod address;
pub mod attachment;
pub mod message;
pub mod thread;
