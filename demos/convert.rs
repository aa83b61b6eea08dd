use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use vision_markdown::{BatchRunner, ConfigSlot, ItemStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    let config_path = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => {
            let path = PathBuf::from(args.remove(i + 1));
            args.remove(i);
            Some(path)
        }
        _ => None,
    };
    let recursive = match args.iter().position(|a| a == "-r" || a == "--recursive") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };

    let mut slot = ConfigSlot::new();
    let config = slot
        .load(config_path.as_deref())
        .context("loading configuration")?;

    if args.first().map(String::as_str) == Some("--cache-stats") {
        let stats = config.cache().stats().await;
        println!(
            "{} entries, {} in {}",
            stats.count,
            stats.human_size,
            stats.location.display()
        );
        return Ok(());
    }
    if args.first().map(String::as_str) == Some("--clear-cache") {
        let cache = config.cache();
        let removed = cache.clear().await?;
        println!("Removed {} entries from {}", removed, cache.location().display());
        return Ok(());
    }

    if args.is_empty() {
        eprintln!("Usage: convert [--config file.toml] [-r] <image|dir|url>...");
        eprintln!("       convert --cache-stats | --clear-cache");
        std::process::exit(2);
    }

    let runner = BatchRunner::from_config(config, reqwest::Client::new())
        .context("building providers")?;
    let options = config.process_options()?;
    let summary = runner.run_inputs(&args, recursive, &options).await?;

    for outcome in &summary.outcomes {
        match outcome.status {
            ItemStatus::Completed => println!(
                "ok   {} -> {}{}",
                outcome.source,
                outcome
                    .output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                if outcome.cached { " (cached)" } else { "" }
            ),
            ItemStatus::Failed => println!(
                "FAIL {}: {}",
                outcome.source,
                outcome.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
    for skipped in &summary.skipped_items {
        println!("skip {}: {}", skipped.path.display(), skipped.reason);
    }
    println!(
        "{} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );

    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}
