//! Email parsing: header decoding, MIME body extraction and quote stripping.

pub mod header;
pub mod mime;
pub mod quote;
