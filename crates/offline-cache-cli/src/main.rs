//! offline-cache - command-line host for the offline resource cache.
//!
//! Runs one runtime instance over the on-disk stores in the configured
//! cache directory and the real network.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use offline_cache_core::{CacheRuntime, Config, InboundMessage, RequestDescriptor};

const USAGE: &str = "\
Usage: offline-cache [--config PATH] <command>

Commands:
  deploy           Install the configured version and activate it
  fetch <url>...   Run GET requests through the cache
  clear            Delete every store owned by this runtime
  status           List stores with entry counts and ages";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

struct Args {
    config: Option<PathBuf>,
    command: String,
    rest: Vec<String>,
}

fn parse_args(args: Vec<String>) -> Result<Args> {
    let mut config = None;
    let mut iter = args.into_iter().skip(1);
    let mut positional = Vec::new();

    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config = Some(PathBuf::from(path));
        } else {
            positional.push(arg);
        }
    }

    if positional.is_empty() {
        bail!("{}", USAGE);
    }
    let command = positional.remove(0);
    Ok(Args {
        config,
        command,
        rest: positional,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = parse_args(std::env::args().collect())?;
    let config = match args.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(scope = %config.scope, version = %config.version, "offline-cache starting");

    match args.command.as_str() {
        "deploy" => deploy(config).await,
        "fetch" => fetch(config, &args.rest).await,
        "clear" => clear(config).await,
        "status" => status(config).await,
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}

async fn deploy(config: Config) -> Result<()> {
    let runtime = CacheRuntime::open_disk(config, false)?;
    let version = runtime.config().version.clone();

    match runtime.deploy().await.context("Deploy failed")? {
        Some(report) => {
            for id in &report.deleted {
                println!("deleted   {}", id);
            }
            let preload = report.preload.await.context("Preload task failed")?;
            println!(
                "activated {} (preloaded {}, {} failed)",
                version,
                preload.stored,
                preload.failed.len()
            );
        }
        None => println!("installed {} (waiting to activate)", version),
    }
    Ok(())
}

async fn fetch(config: Config, urls: &[String]) -> Result<()> {
    if urls.is_empty() {
        bail!("fetch needs at least one URL");
    }
    let runtime = CacheRuntime::open_disk(config, true)?;

    for url in urls {
        let request = RequestDescriptor::get(url)?;
        let class = runtime.classify(&request);
        let delivered = runtime.handle_fetch(&request).await.deliver();
        let kind = delivered.result.kind();

        match delivered.result.into_result() {
            Ok(response) => println!(
                "{:<16} {:<24} {} {} bytes  {}",
                class.as_str(),
                kind,
                response.status,
                response.body.len(),
                url
            ),
            Err(e) => println!("{:<16} {:<24} {}  {}", class.as_str(), kind, e, url),
        }

        // Let the background refresh land before the process exits
        if let Some(refresh) = delivered.refresh {
            let outcome = refresh.join().await;
            info!(url = %url, ?outcome, "Background refresh finished");
        }
    }
    Ok(())
}

async fn clear(config: Config) -> Result<()> {
    let runtime = CacheRuntime::open_disk(config, true)?;
    let (client, mut rx) = runtime.connect().await;

    runtime
        .handle_message(client, InboundMessage::ClearCaches)
        .await;

    match rx.recv().await {
        Some(message) => println!("{}", message.to_json()?),
        None => bail!("Runtime closed the channel without acknowledging"),
    }
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let runtime = CacheRuntime::open_disk(config, true)?;
    let summaries = runtime.registry().summary().await?;
    if summaries.is_empty() {
        println!("no stores");
        return Ok(());
    }

    let now = Utc::now();
    for summary in summaries {
        println!(
            "{:<40} {:>6} entries  updated {}",
            summary.id.to_string(),
            summary.entries,
            summary.age_display(now)
        );
    }
    Ok(())
}
