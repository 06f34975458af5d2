//! vibe-data - local data layer for the vibe events client

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vibe_data::{
    cache::{HttpFetcher, RequestCoalescer, ResponseCache},
    cli::{self, CliContext},
    config::Args,
    remote::HttpUserClient,
    simulated::SimulatedStore,
    storage::FileStore,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vibe_data={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    debug!(data_dir = %args.data_dir.display(), "Opening storage");
    let durable = Arc::new(FileStore::open(args.durable_path())?);
    let session = Arc::new(FileStore::open(args.session_path())?);

    let cache_config = args.cache_config();
    let cache = ResponseCache::new(&cache_config);

    let remote = match args.remote_url {
        Some(ref url) => Some(HttpUserClient::new(url, args.remote_token.clone(), HTTP_TIMEOUT)?),
        None => None,
    };

    let ctx = CliContext {
        store: SimulatedStore::new(durable, session),
        coalescer: RequestCoalescer::new(cache, &cache_config),
        fetcher: HttpFetcher::new(HTTP_TIMEOUT, args.remote_token.clone())?,
        remote,
    };

    if let Err(e) = cli::execute(args.command, &ctx).await {
        error!("{}", e);
        std::process::exit(1);
    }

    Ok(())
}
