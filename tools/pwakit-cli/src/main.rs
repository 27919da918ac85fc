//! Command-line driver for the PWAKit offline cache.
//!
//! Provides commands for:
//! - Precaching a site's static assets into the current namespace
//! - Fetching a URL through the service worker (cache-first or network-first)
//! - Inspecting and clearing the cache store
//!
//! ## Usage
//!
//! ```bash
//! # Write a starter configuration
//! pwakit init-config pwakit.json --profile extended
//!
//! # Install the current worker version
//! pwakit --config pwakit.json precache
//!
//! # Fetch a page as a navigation
//! pwakit --config pwakit.json fetch https://example.com/about.html --navigate
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pwakit_common::{
    init_logging, LogConfig, OptionExt, PolicyProfile, PwaConfig, PwaKitError, WorkerPolicy,
};
use pwakit_net::{HttpFetcher, LoaderConfig, Request};
use pwakit_store::CacheStorage;
use pwakit_sw::{ServiceWorkerContainer, WorkerMessage};
use tokio::sync::oneshot;
use tracing::{error, info};
use url::Url;

#[derive(Parser)]
#[command(name = "pwakit")]
#[command(about = "Offline cache driver for progressive web apps")]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = "pwakit.json", global = true)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the configured worker version and evict older namespaces
    Precache,

    /// Fetch a URL through the active worker
    Fetch {
        /// Absolute URL or path relative to the site origin
        url: String,
        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,
        /// Write the body to a file instead of printing a summary only
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the namespaces in the store as JSON
    Info,

    /// Delete every namespace
    Clear,

    /// Write a default configuration file
    InitConfig {
        /// Output path
        path: PathBuf,
        /// Preset asset and bypass lists
        #[arg(long, value_enum, default_value = "standard")]
        profile: ProfileArg,
        /// Site origin
        #[arg(long)]
        origin: Option<Url>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProfileArg {
    Standard,
    Extended,
}

impl From<ProfileArg> for PolicyProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Standard => PolicyProfile::Standard,
            ProfileArg::Extended => PolicyProfile::Extended,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig::from_flags(cli.verbose, cli.json_logs));

    let result = match cli.command {
        Commands::InitConfig {
            path,
            profile,
            origin,
        } => init_config(&path, profile.into(), origin),
        Commands::Precache => precache(&load(&cli.config)?).await,
        Commands::Fetch {
            url,
            navigate,
            output,
        } => fetch(&load(&cli.config)?, &url, navigate, output.as_deref()).await,
        Commands::Info => cache_info(&load(&cli.config)?).await,
        Commands::Clear => clear(&load(&cli.config)?).await,
    };

    if let Err(err) = &result {
        if let Some(kind) = err.downcast_ref::<PwaKitError>() {
            error!(
                category = kind.category(),
                retryable = kind.is_retryable(),
                "{kind}"
            );
        }
    }
    result
}

fn load(path: &Path) -> Result<PwaConfig> {
    PwaConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

fn container(config: &PwaConfig) -> Result<ServiceWorkerContainer> {
    let caches = CacheStorage::from_settings(&config.store).context("opening cache store")?;
    let fetcher = HttpFetcher::new(LoaderConfig::from_settings(&config.network))
        .context("building HTTP client")?;
    let (container, _events) = ServiceWorkerContainer::new(
        config.site.clone(),
        caches,
        Arc::new(fetcher),
        Arc::new(config.worker.clone()),
    );
    Ok(container)
}

/// Container whose active worker was restored from a previous precache.
async fn restored(config: &PwaConfig) -> Result<ServiceWorkerContainer> {
    let container = container(config)?;
    let restored = container
        .restore(&config.registration.script_url, &config.registration.scope)
        .await
        .map_err(PwaKitError::from)?;
    if !restored {
        bail!(
            "namespace {} not found, run `pwakit precache` first",
            config.worker.namespace()
        );
    }
    Ok(container)
}

fn init_config(path: &Path, profile: PolicyProfile, origin: Option<Url>) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }

    let mut config = PwaConfig {
        worker: WorkerPolicy::for_profile(profile),
        ..PwaConfig::default()
    };
    if let Some(origin) = origin {
        config.site.origin = origin;
    }
    config.validate()?;
    config.save(path)?;

    println!("Configuration written to: {}", path.display());
    Ok(())
}

async fn precache(config: &PwaConfig) -> Result<()> {
    let container = container(config)?;
    let snapshot = container
        .register(&config.registration.script_url, &config.registration.scope)
        .await
        .map_err(PwaKitError::from)?;

    let namespace = config.worker.namespace();
    let caches = container.caches();
    let entries = caches.entries(&caches.handle(&namespace)).await?;
    let usage = caches.usage().await?;
    info!(namespace = %namespace, entries = entries.len(), "Precache complete");

    println!("Namespace:  {}", namespace);
    println!("Entries:    {}", entries.len());
    println!("Store size: {} bytes", usage);
    if let Some(active) = snapshot.active {
        println!("Active:     {} (v{}, {})", active.id, active.version, active.state.as_str());
    }
    Ok(())
}

async fn fetch(
    config: &PwaConfig,
    target: &str,
    navigate: bool,
    output: Option<&Path>,
) -> Result<()> {
    let container = restored(config).await?;
    let url = config
        .site
        .origin
        .join(target)
        .with_context(|| format!("invalid URL: {target}"))?;

    let request = if navigate {
        Request::navigate(url)
    } else {
        Request::get(url)
    };
    let response = container
        .fetch(None, request)
        .await
        .map_err(PwaKitError::from)?;

    println!("Status: {}", response.status);
    println!("Source: {:?}", response.source);
    println!("Size:   {} bytes", response.body.len());
    if let Some(content_type) = response.content_type() {
        println!("Type:   {}", content_type);
    }

    if let Some(path) = output {
        std::fs::write(path, &response.body)?;
        println!("Body written to: {}", path.display());
    }
    Ok(())
}

async fn cache_info(config: &PwaConfig) -> Result<()> {
    let container = restored(config).await?;
    let active = container
        .registration()
        .await
        .and_then(|snapshot| snapshot.active)
        .ok_or_not_found("active worker")?;

    let (tx, rx) = oneshot::channel();
    container
        .post_message(active.id, &WorkerMessage::GetCacheInfo.to_value(), Some(tx))
        .await
        .map_err(PwaKitError::from)?;
    let info = rx.await.context("worker did not answer GET_CACHE_INFO")?;

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn clear(config: &PwaConfig) -> Result<()> {
    let caches = CacheStorage::from_settings(&config.store).context("opening cache store")?;
    let mut deleted = 0;
    for namespace in caches.keys().await? {
        if caches.delete(&namespace).await? {
            info!(namespace = %namespace, "Deleted namespace");
            deleted += 1;
        }
    }
    println!("Deleted {} namespace(s)", deleted);
    Ok(())
}
