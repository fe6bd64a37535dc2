//! CLI entry point for the pagefetch tool.

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use pagefetch_core::{Session, SessionConfig};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Page text goes to stdout, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    let mut session = Session::from_config(&config)?;
    args.apply_to(&mut session)?;

    if args.resolve {
        let end = session.resolve_redirect_chain(&args.url).await?;
        if end.is_empty() {
            warn!(url = %args.url, "redirect chain has a cycle or is too long");
        }
        println!("{end}");
        return Ok(());
    }

    let page = match &args.data {
        Some(body) => session.post(&args.url, body).await?,
        None => session.get(&args.url).await?,
    };

    info!(
        status = page.status.as_u16(),
        encoding = page.encoding.name(),
        source = ?page.encoding.source,
        bytes = page.bytes_read,
        truncated = page.truncated,
        redirect = ?page.redirect_location,
        "Fetch complete"
    );

    let mut stdout = io::stdout().lock();
    stdout.write_all(page.text.as_bytes())?;
    stdout.flush()?;

    Ok(())
}
