//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;

use pagefetch_core::{DetectionMode, ProxySettings, Session};

/// Fetch a web page and print it decoded with the right character encoding.
///
/// The encoding is taken from the Content-Type header, a <meta> charset tag
/// or a statistical guess over the body bytes, depending on --mode.
#[derive(Parser, Debug)]
#[command(name = "pagefetch")]
#[command(author, version, about)]
pub struct Args {
    /// URL to fetch
    pub url: String,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// JSON session configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Encoding detection mode (auto, meta-tag, fixed, force-statistical)
    #[arg(short, long)]
    pub mode: Option<DetectionMode>,

    /// Fallback encoding label, also used for request bodies
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Stop reading the body after this many bytes
    #[arg(long, value_name = "BYTES")]
    pub max_size: Option<u64>,

    /// Ceiling on reading the body, in milliseconds
    #[arg(short, long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Body chunk size in bytes (1-1048576)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=1_048_576))]
    pub buffer_size: Option<u64>,

    /// User-Agent header to send
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Proxy URL for all requests
    #[arg(long)]
    pub proxy: Option<String>,

    /// Send a POST with this body instead of a GET
    #[arg(short, long)]
    pub data: Option<String>,

    /// Do not follow redirects
    #[arg(long)]
    pub no_redirect: bool,

    /// Accept invalid TLS certificates
    #[arg(short = 'k', long)]
    pub insecure: bool,

    /// Resolve the redirect chain with HEAD requests and print its end
    #[arg(long)]
    pub resolve: bool,
}

impl Args {
    /// Applies command-line overrides on top of the session's settings.
    ///
    /// # Errors
    ///
    /// Fails when `--encoding` names no supported encoding.
    pub fn apply_to(&self, session: &mut Session) -> Result<()> {
        if let Some(mode) = self.mode {
            session.set_detection_mode(mode);
        }
        if let Some(label) = &self.encoding
            && !session.set_encoding(label)
        {
            bail!("unknown encoding '{label}'");
        }
        if let Some(max_size) = self.max_size {
            session.set_max_response_size(Some(max_size));
        }
        if let Some(timeout) = self.timeout {
            session.set_operation_timeout(Some(Duration::from_millis(timeout)));
        }
        if let Some(buffer_size) = self.buffer_size {
            session.set_buffer_size(usize::try_from(buffer_size)?);
        }
        if let Some(user_agent) = &self.user_agent {
            session.set_user_agent(user_agent.clone());
        }
        if let Some(proxy) = &self.proxy {
            session.set_proxy(Some(ProxySettings {
                url: proxy.clone(),
                credentials: None,
            }));
        }
        if self.no_redirect {
            session.set_auto_redirect(false);
        }
        if self.insecure {
            session.set_trust_all_certificates(true);
        }
        Ok(())
    }
}
