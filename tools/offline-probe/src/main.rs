//! Probe for the Furqaan offline worker.
//!
//! Runs the worker against the live origin with on-disk cache storage, so the
//! caching behaviour can be checked without a browser.
//!
//! ## Usage
//!
//! ```bash
//! # Install and activate the configured version
//! offline-probe --config offline.toml install
//!
//! # Route requests through the active worker, simulating an outage
//! offline-probe fetch /assets/css/style.css /about --html --offline
//!
//! # Show persisted buckets
//! offline-probe buckets
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use furqaan_common::{init_logging, LogConfig, LogFormat};
use furqaan_net::{HttpFetcher, LoaderConfig, Request};
use furqaan_sw::{
    CacheConfig, CacheStorage, ServiceWorkerContainer, ServiceWorkerError, WorkerGlobalScope,
};
use tracing::debug;

mod offline;
mod report;

use offline::OfflineFetcher;
use report::{FetchRecord, FetchReport};

#[derive(Parser)]
#[command(name = "offline-probe")]
#[command(about = "Drive the Furqaan offline worker against a live origin")]
struct Cli {
    /// Worker config (TOML). Built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding persisted cache buckets
    #[arg(long, global = true, default_value = ".furqaan-cache")]
    storage: PathBuf,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured version and activate it
    Install,

    /// Route requests through the active worker
    Fetch {
        /// Paths (resolved against the origin) or absolute URLs
        #[arg(required = true)]
        urls: Vec<String>,
        /// Send `Accept: text/html`
        #[arg(long)]
        html: bool,
        /// Fail every network attempt
        #[arg(long)]
        offline: bool,
        /// Write a JSON report
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List persisted buckets and their entry counts
    Buckets,

    /// Deliver a push payload (`{"title": ..., "body": ...}`)
    Push {
        payload: String,
    },

    /// Fire a background sync event
    Sync {
        #[arg(default_value = "background-sync")]
        tag: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match cli.verbose {
        0 => LogConfig::default(),
        1 => LogConfig::debug(),
        _ => LogConfig::trace(),
    }
    .with_format(cli.log_format);
    init_logging(log_config);

    let config = match cli.config {
        Some(ref path) => CacheConfig::load(path).await?,
        None => CacheConfig::default(),
    };
    debug!(version = %config.version, origin = %config.origin, "Config ready");

    match cli.command {
        Commands::Install => install(config, &cli.storage).await,
        Commands::Fetch {
            urls,
            html,
            offline,
            report,
        } => fetch(config, &cli.storage, &urls, html, offline, report.as_deref()).await,
        Commands::Buckets => buckets(&cli.storage).await,
        Commands::Push { payload } => {
            let container = resumed(config, &cli.storage, false).await?;
            match container.dispatch_push(Some(payload.as_bytes())).await? {
                Some(notification) => {
                    println!("{}", serde_json::to_string_pretty(&notification)?)
                }
                None => println!("Payload ignored (expected {{\"title\", \"body\"}} JSON)"),
            }
            Ok(())
        }
        Commands::Sync { tag } => {
            let container = resumed(config, &cli.storage, false).await?;
            let ran = container.dispatch_sync(&tag).await?;
            println!("sync '{}': {}", tag, if ran { "handled" } else { "ignored" });
            Ok(())
        }
    }
}

async fn open_container(
    storage: &Path,
    offline: bool,
) -> anyhow::Result<ServiceWorkerContainer> {
    let caches = CacheStorage::open_dir(storage)
        .await
        .with_context(|| format!("opening cache storage at {}", storage.display()))?
        .shared();
    let scope = if offline {
        WorkerGlobalScope::new(Arc::new(OfflineFetcher))
    } else {
        WorkerGlobalScope::new(Arc::new(HttpFetcher::new(LoaderConfig::default())?))
    }
    .with_caches(caches);

    Ok(ServiceWorkerContainer::new(scope).0)
}

/// Container whose active worker is the configured version, restored from storage.
async fn resumed(
    config: CacheConfig,
    storage: &Path,
    offline: bool,
) -> anyhow::Result<ServiceWorkerContainer> {
    let container = open_container(storage, offline).await?;
    let version = config.version.clone();
    match container.resume(config).await {
        Ok(_) => Ok(container),
        Err(ServiceWorkerError::NotFound(_)) => {
            bail!("version {} is not installed; run `offline-probe install` first", version)
        }
        Err(e) => Err(e.into()),
    }
}

async fn install(config: CacheConfig, storage: &Path) -> anyhow::Result<()> {
    let container = open_container(storage, false).await?;
    let controller = container.register(config).await?;

    println!(
        "Installed {} ({:?})",
        controller.version(),
        controller.state().await
    );
    let caches = container.scope().caches.read().await;
    for name in caches.keys() {
        let entries = caches.get(&name).map(|c| c.len()).unwrap_or(0);
        println!("  {:<40} {:>5} entries", name, entries);
    }
    Ok(())
}

async fn fetch(
    config: CacheConfig,
    storage: &Path,
    urls: &[String],
    html: bool,
    offline: bool,
    report_path: Option<&Path>,
) -> anyhow::Result<()> {
    let targets = urls
        .iter()
        .map(|u| config.resolve(u))
        .collect::<Result<Vec<_>, _>>()?;
    let container = resumed(config, storage, offline).await?;

    let mut report = FetchReport::default();
    for url in targets {
        let mut request = Request::get(url);
        if html {
            request = request.accept("text/html");
        }
        let record = FetchRecord::from_outcome(&request, container.handle_fetch(&request).await);
        println!("{}", record);
        report.push(record);
    }
    container.settle().await;

    if let Some(path) = report_path {
        tokio::fs::write(path, serde_json::to_string_pretty(&report)?).await?;
        println!("Report written to: {}", path.display());
    }
    if report.failed > 0 {
        bail!("{} of {} requests failed", report.failed, report.total);
    }
    Ok(())
}

async fn buckets(storage: &Path) -> anyhow::Result<()> {
    let caches = CacheStorage::open_dir(storage).await?;
    let names = caches.keys();
    if names.is_empty() {
        println!("No buckets in {}", storage.display());
    }
    for name in names {
        if let Some(cache) = caches.get(&name) {
            println!("{:<40} {:>5} entries", name, cache.len());
        }
    }
    Ok(())
}
