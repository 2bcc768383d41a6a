//! relcache server binary
//!
//! Serves the refresh-on-demand cache over HTTP. Configuration comes from
//! the environment, with flags taking precedence.

use clap::Parser;
use relcache::{CacheService, CacheStore, Config, HttpSource, server};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relcache")]
#[command(about = "Refresh-on-demand relational cache over a remote JSON data source")]
#[command(version)]
struct Cli {
    /// Remote source host or URL (overrides SOURCE_URL)
    #[arg(long)]
    source_url: Option<String>,

    /// Record endpoint path on the remote source (overrides SOURCE_PATH)
    #[arg(long)]
    source_path: Option<String>,

    /// SQLite cache file (overrides CACHE_DB_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Cache time-to-live in seconds (overrides CACHE_TTL_SECONDS)
    #[arg(long)]
    ttl: Option<u64>,

    /// HTTP listen address (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::resolve(
        cli.source_url,
        cli.source_path,
        cli.database,
        cli.ttl,
        cli.bind,
    )?;

    log::info!(
        "caching {}{} into {} (ttl {}s)",
        config.source_url,
        config.source_path,
        config.database_path.display(),
        config.cache_ttl.as_secs()
    );

    let store = CacheStore::open(&config.database_path)?;
    let source = Arc::new(HttpSource::new(&config.source_url, &config.source_path)?);
    let service = CacheService::new(store, source, config.cache_ttl)?;

    server::serve(service, config.bind_addr).await?;
    Ok(())
}
