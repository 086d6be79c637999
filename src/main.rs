mod client;
mod config;
mod cookies;
mod pipeline;
mod ratelimit;
mod sink;
mod state;
mod stats;
mod store;
mod wbi;

use clap::Parser;
use config::Config;
use eyre::{eyre, Result};
use fs2::FileExt;
use pipeline::Crawler;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "claw", version, about = "Resumable keyword crawler")]
struct Args {
    /// Path to the crawl configuration JSON.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    std::fs::create_dir_all(&cfg.data_dir)
        .map_err(|e| eyre!("failed to create data dir {}: {e}", cfg.data_dir.display()))?;

    // One crawler per record store; the lock releases when the process exits.
    let _lock = acquire_instance_lock(&cfg.data_dir)?;

    let crawler = Crawler::new(cfg).await?;
    let snapshot = crawler.run().await?;

    tracing::info!(
        videos = snapshot.videos_emitted,
        comments = snapshot.comments_emitted,
        accounts = snapshot.accounts_emitted,
        skipped = snapshot.videos_skipped + snapshot.comments_skipped + snapshot.accounts_skipped,
        errors = snapshot.errors,
        "done"
    );
    Ok(())
}

/// Two crawlers sharing one record store would race the progress document
/// and double-emit, so the store directory is claimed exclusively up front.
fn acquire_instance_lock(data_dir: &Path) -> Result<File> {
    let path = data_dir.join("claw.lock");
    let file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)
        .map_err(|e| eyre!("cannot open {}: {e}", path.display()))?;
    file.try_lock_exclusive()
        .map_err(|e| eyre!("another crawler holds {}: {e}", path.display()))?;
    Ok(file)
}
