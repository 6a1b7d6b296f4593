//! Sift - Entry Point
//!
//! Runs one validation batch, or keeps running on an interval in watch mode, with graceful
//! shutdown support.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sift::concurrency::{AdaptiveConcurrency, AdaptiveConfig, ConcurrencyController, RateLimiter};
use sift::config::{Config, InputMode, LogConfig, LogFormat};
use sift::error::ErrorKind;
use sift::models::{IdentityEndpoint, TestEndpoint};
use sift::proxy::{HttpProber, IdentityConfig, ProxyValidator, ValidatorConfig};
use sift::repository::{
    DedupRepository, DedupStore, MemoryDedupStore, MemoryProxyStore, MemorySourceHealthStore,
    ProxyRepository, ProxyStore, SourceHealthRepository, SourceHealthStore,
};
use sift::services::{
    write_report, AnalyticsAggregator, BatchConfig, BatchRunner, FavoritesBook, ProxyRotator,
    RetentionConfig, RetentionHandle, RetentionService, RunReport, TOP_COUNTRIES,
};
use sift::sources::{
    CollectorConfig, DedupSessionStore, HttpSourceFetcher, SourceCatalog, SourceCollector,
    SourceHealthMonitor, SourceStat,
};
use sift::Database;

struct Stores {
    proxies: Arc<dyn ProxyStore>,
    source_health: Arc<dyn SourceHealthStore>,
    dedup: Arc<dyn DedupStore>,
    database: Option<Database>,
}

impl Stores {
    fn memory() -> Self {
        Self {
            proxies: Arc::new(MemoryProxyStore::new()),
            source_health: Arc::new(MemorySourceHealthStore::new()),
            dedup: Arc::new(MemoryDedupStore::new()),
            database: None,
        }
    }

    /// PostgreSQL when enabled and reachable, in-memory otherwise
    async fn open(config: &Config) -> Self {
        if !config.database.enabled {
            info!("Database disabled, using in-memory stores");
            return Self::memory();
        }

        let db = match Database::new(&config.database).await {
            Ok(db) => db,
            Err(e) => {
                warn!(error = %e, kind = %ErrorKind::Persistence, "Database unavailable, using in-memory stores");
                return Self::memory();
            }
        };
        if let Err(e) = db.run_migrations().await {
            warn!(error = %e, kind = %ErrorKind::Persistence, "Migrations failed, using in-memory stores");
            db.close().await;
            return Self::memory();
        }

        let pool = db.pool().clone();
        Self {
            proxies: Arc::new(ProxyRepository::new(pool.clone())),
            source_health: Arc::new(SourceHealthRepository::new(pool.clone())),
            dedup: Arc::new(DedupRepository::new(pool)),
            database: Some(db),
        }
    }
}

struct Pipeline {
    config: Config,
    runner: BatchRunner,
    collector: Option<SourceCollector>,
    rotator: ProxyRotator,
    favorites: Option<FavoritesBook>,
}

impl Pipeline {
    /// One candidate-gathering, validation and report cycle
    async fn run_cycle(&self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let (candidates, sources) = self.gather().await?;
        if candidates.is_empty() {
            info!("No candidates this cycle");
        }

        let batch = self.runner.run(&candidates, shutdown).await;
        let snapshot = self.runner.analytics().snapshot(TOP_COUNTRIES);
        info!(
            total = snapshot.total_checked,
            live = snapshot.live_count,
            success_rate = snapshot.success_rate,
            avg_health = snapshot.avg_health_score,
            "Analytics"
        );

        let report = RunReport::new(batch, snapshot, sources);
        if let Err(e) = write_report(&self.config.run.output, &report).await {
            error!(path = %self.config.run.output.display(), error = %e, "Failed to write report");
        }

        if let Some(book) = &self.favorites {
            if let Err(e) = book.bookmark(report.proxies.iter().map(|p| &p.report)).await {
                warn!(path = %book.path().display(), error = %e, "Failed to update favorites");
            }
        }

        match self.rotator.refresh().await {
            Ok(size) => {
                if let Ok(Some(next)) = self.rotator.next().await {
                    info!(pool = size, next = %next, "Rotation pool ready");
                } else {
                    info!(pool = size, "Rotation pool empty");
                }
            }
            Err(e) => warn!(error = %e, kind = %ErrorKind::Persistence, "Failed to refresh rotation pool"),
        }
        Ok(())
    }

    async fn gather(&self) -> anyhow::Result<(Vec<String>, Vec<SourceStat>)> {
        match (&self.config.run.mode, &self.collector) {
            (InputMode::Collect, Some(collector)) => {
                let collected = collector.collect(&self.config.run.categories).await;
                Ok((collected.candidates, collected.sources))
            }
            _ => {
                let path = self
                    .config
                    .run
                    .input
                    .as_ref()
                    .context("no input file configured")?;
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Ok((raw.lines().map(str::to_string).collect(), Vec::new()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = Config::load();
    init_tracing(&config.log);

    info!("Starting sift");
    if let Some(e) = config_error {
        warn!(error = %e, kind = %ErrorKind::Configuration, "Invalid configuration, using defaults");
    }
    info!(mode = ?config.run.mode, check_level = %config.validation.check_level, "Configuration loaded");

    let stores = Stores::open(&config).await;

    let retention = RetentionService::new(
        stores.proxies.clone(),
        RetentionConfig {
            retention_days: config.run.retention_days,
            ..RetentionConfig::default()
        },
    );
    if let Err(e) = retention.sweep().await {
        warn!(error = %e, kind = %ErrorKind::Persistence, "Retention sweep failed");
    }

    // Admission and pacing
    let limiter = RateLimiter::new(
        config.concurrency.rate_limit_per_second,
        config.concurrency.rate_limit_burst,
    );
    let controller = Arc::new(ConcurrencyController::new(
        config.concurrency.max_concurrent_checks,
        limiter,
    ));
    let adaptive = config.concurrency.smart_concurrency.then(|| {
        let adaptive = AdaptiveConcurrency::new(controller.clone(), AdaptiveConfig::default());
        controller.resize(adaptive.initial_limit(config.concurrency.max_concurrent_checks));
        adaptive
    });
    info!(limit = controller.limit(), "Admission limit set");

    let validator = Arc::new(ProxyValidator::new(
        Arc::new(HttpProber::new()),
        controller.clone(),
        ValidatorConfig {
            check_level: config.validation.check_level,
            test_endpoints: TestEndpoint::defaults(),
            ping_timeout: Duration::from_secs(config.validation.ping_timeout_secs),
            protocol_timeout: Duration::from_secs(config.validation.protocol_timeout_secs),
            identity_enabled: config.validation.identity_enabled,
            geolocation_enabled: config.validation.geolocation_enabled,
            header_audit_enabled: config.validation.header_audit_enabled,
        },
        IdentityConfig {
            endpoints: IdentityEndpoint::defaults(),
            max_retries: config.validation.identity_max_retries,
        },
    ));
    load_blacklist(&validator, stores.proxies.as_ref(), &config.validation.blacklist).await;

    let collector = match config.run.mode {
        InputMode::Collect => Some(
            build_collector(&config, &stores)
                .await?
                .with_rate_limiter(controller.rate_limiter().clone()),
        ),
        InputMode::File => None,
    };

    let runner = BatchRunner::new(
        validator,
        stores.proxies.clone(),
        Arc::new(AnalyticsAggregator::new()),
        BatchConfig {
            deadline: config.validation.deadline(),
            strategy: config.concurrency.execution,
            filter: config.filter.clone(),
        },
    );

    // Shutdown fan-out
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let adaptive_task = adaptive.map(|adaptive| {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { adaptive.run(shutdown).await })
    });

    let interval = Duration::from_secs(config.run.interval_secs);
    let (retention_handle, retention_shutdown) = RetentionHandle::new();
    let retention_task = (!interval.is_zero())
        .then(|| tokio::spawn(async move { retention.run(retention_shutdown).await }));

    let favorites = config
        .run
        .auto_bookmark
        .then(|| FavoritesBook::new(config.run.favorites.clone()));
    let pipeline = Pipeline {
        rotator: ProxyRotator::new(stores.proxies.clone()),
        favorites,
        config,
        runner,
        collector,
    };

    let mut shutdown = shutdown_rx.clone();
    loop {
        let outcome = pipeline.run_cycle(shutdown_rx.clone()).await;
        if let Err(e) = &outcome {
            error!(error = %e, "Cycle failed");
        }

        if interval.is_zero() {
            outcome?;
            break;
        }
        if *shutdown.borrow() {
            break;
        }

        info!("Next cycle in {}s", interval.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    retention_handle.shutdown();
    if let Some(task) = retention_task {
        let _ = task.await;
    }
    controller.close();
    if let Some(task) = adaptive_task {
        task.abort();
    }
    if let Some(db) = stores.database {
        db.close().await;
    }

    info!("Sift stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let json = log.format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log.filter_directive().into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn load_blacklist(validator: &ProxyValidator, store: &dyn ProxyStore, configured: &[String]) {
    for host in configured {
        if let Err(e) = store.add_blacklisted_host(host).await {
            warn!(host = %host, error = %e, kind = %ErrorKind::Persistence, "Failed to persist blacklist entry");
        }
    }

    match store.blacklisted_hosts().await {
        Ok(hosts) => {
            for host in hosts {
                validator.blacklist(host);
            }
        }
        Err(e) => warn!(error = %e, kind = %ErrorKind::Persistence, "Failed to load blacklist"),
    }
    for host in configured {
        validator.blacklist(host.clone());
    }
}

async fn build_collector(config: &Config, stores: &Stores) -> anyhow::Result<SourceCollector> {
    let health = Arc::new(SourceHealthMonitor::new(
        stores.source_health.clone(),
        config.sources.min_health_score,
    ));
    if let Err(e) = health.load().await {
        warn!(error = %e, kind = %ErrorKind::Persistence, "Failed to load source health");
    }

    let dedup = Arc::new(DedupSessionStore::new(
        stores.dedup.clone(),
        config.sources.dedup_reset,
    ));
    if let Err(e) = dedup.load().await {
        warn!(error = %e, kind = %ErrorKind::Persistence, "Failed to load dedup sessions");
    }

    let fetcher = HttpSourceFetcher::new(Duration::from_secs(config.sources.fetch_timeout_secs))
        .context("failed to build source fetcher")?;

    Ok(SourceCollector::new(
        SourceCatalog::builtin(),
        Arc::new(fetcher),
        health,
        dedup,
        CollectorConfig {
            concurrency: config.sources.fetch_concurrency,
            max_candidates: config.sources.max_candidates,
        },
    ))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
