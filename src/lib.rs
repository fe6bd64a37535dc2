//! Pagefetch Core Library
//!
//! This library fetches web pages over HTTP and decodes them to text with
//! the right character encoding, even when the server mislabels or omits it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`fetch`] - Session, transport, streaming reader and redirect resolution
//! - [`encoding`] - Charset extraction, `<meta>` scanning, statistical detection
//!   and the policy combining them

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod encoding;
pub mod fetch;
mod user_agent;

// Re-export commonly used types
pub use encoding::{
    CharsetDetector, DetectionMode, EncodingDecision, EncodingSource, StatisticalDetector,
    lookup_encoding,
};
pub use fetch::{
    Credentials, Decompression, FetchError, FetchedPage, ProxySettings, Session, SessionConfig,
};
