//! Command-line harness for the SWKit cache worker.
//!
//! Runs the worker against a real origin with caches persisted on disk, so
//! state carries over between invocations.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-warm the static cache and activate
//! swkit --origin https://example.com install
//!
//! # Fetch through the worker
//! swkit --origin https://example.com fetch /styles/critical.css /api/posts
//!
//! # Fetch pages the way a browser navigates to them
//! swkit --origin https://example.com fetch --navigate / /about /blog
//!
//! # Inspect or drop the caches
//! swkit usage
//! swkit clear
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use swkit_common::{init_logging, LogConfig};
use swkit_net::{Request, Response, ResponseSource};
use swkit_sw::{
    cache_usage, clear_all_caches, CacheStorage, CacheWorker, FetchOutcome, PendingTasks,
    RegistrationOptions, ServiceWorkerContainer, StorageConfig, WorkerConfig,
};
use tracing::{debug, info};
use url::Url;

#[derive(Parser)]
#[command(name = "swkit")]
#[command(about = "Run the SWKit cache worker against an origin")]
struct Cli {
    /// Site origin the worker is registered for
    #[arg(long, default_value = "http://localhost:3000")]
    origin: Url,

    /// JSON worker configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache directory (defaults to the platform cache dir)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the worker
    Install,

    /// Fetch paths through the worker
    Fetch {
        /// Paths relative to the origin
        #[arg(required = true)]
        paths: Vec<String>,

        /// Send the requests as page navigations (`Accept: text/html`)
        #[arg(long)]
        navigate: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print cache usage
    Usage {
        /// Print usage as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete every cache
    Clear,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose);
    if cli.json_logs {
        log_config = log_config.json();
    }
    init_logging(log_config)?;

    let config = load_config(&cli)?;
    debug!(version = %config.version, "Loaded worker config");

    match cli.command {
        Commands::Install => install(config, cli.origin).await,
        Commands::Fetch {
            paths,
            navigate,
            json,
        } => fetch(config, cli.origin, &paths, navigate, json).await,
        Commands::Usage { json } => usage(&config.storage, json).await,
        Commands::Clear => clear(&config.storage).await,
        Commands::Config => {
            println!("{}", config.to_json()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let mut config = match &cli.config {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WorkerConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.storage.directory = Some(dir.clone());
    }
    if config.storage.directory.is_none() {
        config.storage.directory = Some(StorageConfig::default_directory());
    }
    Ok(config)
}

async fn install(config: WorkerConfig, origin: Url) -> Result<()> {
    let script = origin.join("/sw.js")?;
    let worker = CacheWorker::from_config(config, origin).await?;
    let names = worker.cache_names();

    let (container, _events) = ServiceWorkerContainer::new();
    let scope = container
        .register(script.as_str(), RegistrationOptions::with_scope("/"), Arc::new(worker))
        .await
        .context("installing worker")?;
    container.settle().await;

    info!(scope = %scope, cache = %names.static_cache, "Worker active");
    println!("Installed {} for {}", names.static_cache, scope);
    Ok(())
}

fn request_for(origin: &Url, path: &str, navigate: bool) -> Result<Request> {
    let url = origin.join(path)?;
    Ok(if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    })
}

async fn fetch(
    config: WorkerConfig,
    origin: Url,
    paths: &[String],
    navigate: bool,
    json: bool,
) -> Result<()> {
    let worker = CacheWorker::from_config(config, origin.clone()).await?;
    let static_cache = worker.cache_names().static_cache;
    if !worker.caches().has(&static_cache).await {
        bail!("{static_cache} is missing; run `swkit install` first");
    }

    let pending = PendingTasks::new();
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let request = request_for(&origin, path, navigate)?;
        let url = request.url.clone();
        match worker.dispatcher().dispatch(request, &pending.handle()).await {
            FetchOutcome::Respond(response) => results.push((url, Some(response))),
            FetchOutcome::PassThrough(_) => results.push((url, None)),
        }
    }
    let revalidated = pending.settle().await;
    debug!(revalidated, "Background work finished");

    if json {
        let rows: Vec<_> = results
            .iter()
            .map(|(url, response)| match response {
                Some(response) => serde_json::json!({
                    "url": url.as_str(),
                    "status": response.status.as_u16(),
                    "source": source_label(response),
                    "bytes": response.body.len(),
                }),
                None => serde_json::json!({ "url": url.as_str(), "source": "pass-through" }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for (url, response) in &results {
            match response {
                Some(response) => println!(
                    "{:>3} {:<28} {:>8} {}",
                    response.status.as_u16(),
                    source_label(response),
                    response.body.len(),
                    url
                ),
                None => println!("--- {:<28} {:>8} {}", "pass-through", "-", url),
            }
        }
    }
    Ok(())
}

async fn usage(storage: &StorageConfig, json: bool) -> Result<()> {
    let caches = CacheStorage::from_config(storage).await?;
    let usage = cache_usage(&caches).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
    } else {
        let mut names = caches.keys().await;
        names.sort();
        for name in names {
            println!("  {name}");
        }
        println!("{} caches, {}", usage.cache_count, usage.formatted_size);
    }
    Ok(())
}

async fn clear(storage: &StorageConfig) -> Result<()> {
    let caches = CacheStorage::from_config(storage).await?;
    let removed = clear_all_caches(&caches).await?;
    println!("Removed {removed} caches");
    Ok(())
}

fn source_label(response: &Response) -> String {
    match &response.source {
        ResponseSource::Network => "network".to_string(),
        ResponseSource::Cache { name } => format!("cache:{name}"),
        ResponseSource::Synthetic => "offline".to_string(),
    }
}
