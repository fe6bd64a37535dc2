//! HTTP fetching with charset-aware body decoding.
//!
//! # Features
//!
//! - Long-lived [`Session`] holding cookies, headers, proxy and timeouts
//! - Streaming body reads with an exact byte cap and an operation timeout
//! - Encoding chosen from the header, `<meta>` tags or a statistical guess
//! - Manual redirect-chain resolution with cycle detection
//!
//! # Example
//!
//! ```no_run
//! use pagefetch_core::fetch::Session;
//!
//! # async fn example() -> Result<(), pagefetch_core::FetchError> {
//! let mut session = Session::new();
//! let end = session.resolve_redirect_chain("http://example.com/short").await?;
//! println!("chain ends at: {end}");
//! # Ok(())
//! # }
//! ```

mod config;
pub mod constants;
mod error;
pub mod reader;
mod redirect;
mod session;
mod transport;

pub use config::SessionConfig;
pub use error::FetchError;
pub use reader::{DecodedBody, ReadOptions, ResponseHead, capacity_hint};
pub use redirect::{absolute_location, is_redirect_status, same_url};
pub use session::{Credentials, Decompression, FetchedPage, ProxySettings, Session};

// Note: no module-local Result alias; signatures spell out
// `Result<T, FetchError>`.
