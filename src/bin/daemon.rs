//! `obsplane-daemon`: wires the config store, file watcher, reconciler,
//! health loop, and HTTP surface together, reads CLI flags, installs a
//! `tracing` subscriber, and runs until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use colored::*;
use tracing::{error, info};

use obsplane::config::ConfigStore;
use obsplane::integrations::{promq, vlogs};
use obsplane::lifecycle::{LifecycleConfig, LifecycleManager};
use obsplane::registry::{FactoryRegistry, InstanceRegistry};
use obsplane::secret::{FileSecretWatcher, SecretWatcher};
use obsplane::server::{build_router, AppState};
use obsplane::telemetry::{init_tracing, Metrics};
use obsplane::version::VersionReq;
use obsplane::FileWatcher;

#[derive(Parser, Debug)]
#[command(name = "obsplane-daemon", version, about = "Observability integration plane")]
struct Cli {
    /// Path to the integrations document.
    #[arg(long, default_value = "integrations.json")]
    config_path: PathBuf,

    /// Optional version floor applied on top of per-instance `minVersion`.
    #[arg(long)]
    min_global_version: Option<String>,

    #[arg(long, default_value_t = 30)]
    health_period_secs: u64,

    #[arg(long, default_value_t = 500)]
    watch_debounce_ms: u64,

    #[arg(long, default_value_t = 10)]
    stop_grace_secs: u64,

    #[arg(long, default_value_t = 5)]
    health_timeout_secs: u64,

    /// Path to a file holding a bearer token shared by every backend client
    /// whose settings reference a secret.
    #[arg(long)]
    secret_path: Option<PathBuf>,

    /// How often to re-read `secret_path` for a rotated token.
    #[arg(long, default_value_t = 60)]
    secret_refresh_secs: u64,

    #[arg(long, default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        error!(error = %err, "obsplane-daemon aborted during boot");
        eprintln!("{} {err}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let factories = Arc::new(FactoryRegistry::new());
    factories.register("vlogs", vlogs::factory()).context("failed to register vlogs integration type")?;
    factories.register("promq", promq::factory()).context("failed to register promq integration type")?;

    let config_store = Arc::new(ConfigStore::new(cli.config_path.clone()));
    let document = config_store
        .load(&factories)
        .await
        .context("unreadable or invalid initial integrations document")?;

    let file_secret_watcher: Option<Arc<FileSecretWatcher>> = match cli.secret_path.clone() {
        Some(path) => {
            let watcher = Arc::new(FileSecretWatcher::new(path));
            watcher.refresh().await.context("failed to read initial secret file")?;
            Some(watcher)
        }
        None => None,
    };
    let secret: Option<Arc<dyn SecretWatcher>> =
        file_secret_watcher.clone().map(|w| w as Arc<dyn SecretWatcher>);

    let min_global_version = cli
        .min_global_version
        .as_deref()
        .map(str::parse::<VersionReq>)
        .transpose()
        .context("invalid --min-global-version")?;

    let lifecycle_config = LifecycleConfig {
        min_global_version,
        health_period: Duration::from_secs(cli.health_period_secs),
        stop_grace: Duration::from_secs(cli.stop_grace_secs),
        health_timeout: Duration::from_secs(cli.health_timeout_secs),
    };

    let http = reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .build()
        .context("failed to build shared HTTP client")?;

    let instances = Arc::new(InstanceRegistry::new());
    let manager = Arc::new(LifecycleManager::new(
        factories.clone(),
        instances,
        config_store.clone(),
        http,
        secret,
        lifecycle_config,
    ));

    manager.request_reconcile(document);

    let watcher = FileWatcher::watch_with_debounce(config_store.path(), Duration::from_millis(cli.watch_debounce_ms))
        .context("failed to start the config file watcher")?;
    let mut reload_rx = watcher.subscribe();

    let reload_manager = manager.clone();
    let reload_store = config_store.clone();
    let reload_factories = factories.clone();
    tokio::spawn(async move {
        while reload_rx.recv().await.is_ok() {
            let reloaded = match reload_store.read().await {
                Ok(document) => document.validate(&reload_factories).map(|_| document),
                Err(err) => Err(err),
            };
            match reloaded {
                Ok(document) => reload_manager.request_reconcile(document),
                Err(err) => error!(error = %err, "reload rejected, keeping last-good configuration"),
            }
        }
    });

    if let Some(watcher) = file_secret_watcher {
        let secret_path = cli.secret_path.clone().expect("file_secret_watcher is Some only when secret_path is Some");
        let refresh_period = Duration::from_secs(cli.secret_refresh_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_period);
            ticker.tick().await; // first tick fires immediately; the initial read already happened above
            loop {
                ticker.tick().await;
                if let Err(err) = watcher.refresh().await {
                    error!(path = %secret_path.display(), error = %err, "secret refresh failed, keeping last-good token");
                }
            }
        });
    }

    let reconcile_manager = manager.clone();
    let reconcile_task = tokio::spawn(async move { reconcile_manager.run().await });
    let health_manager = manager.clone();
    let health_task = tokio::spawn(async move { health_manager.run_health_loop().await });

    let state = AppState { manager: manager.clone(), metrics: Arc::new(Metrics::new()) };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await.context("failed to bind HTTP listener")?;

    info!(addr = %cli.bind_addr, "obsplane-daemon listening");
    println!("{} listening on {}", "✓".green(), format!("http://{}", cli.bind_addr).bright_blue());

    let server_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "http server exited with an error");
        }
    });

    tokio::signal::ctrl_c().await.context("failed to listen for the shutdown signal")?;
    info!("shutdown signal received, draining instances");

    manager.shutdown().await;
    reconcile_task.abort();
    health_task.abort();
    server_task.abort();

    Ok(())
}
