//! Batch validation driver
//!
//! Admits parsed candidates through the shared concurrency controller, validates each under
//! a per-proxy deadline and folds results into analytics and the proxy store as they
//! complete. Results are collected in completion order, not input order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::concurrency::AdmissionPermit;
use crate::error::{ErrorKind, FailureReason};
use crate::models::{ProxyAddress, ProxyRecord, ProxyReport, ValidationResult};
use crate::proxy::{ProxyValidator, ValidationProgress};
use crate::repository::ProxyStore;
use crate::scoring::trend::{stability_from_history, trend, trend_from_history};
use crate::scoring::{categorize, sort_by_quality, CategoryCounts, RankedProxy, ResultFilter};
use crate::services::analytics::AnalyticsAggregator;

/// Where validations run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Every validation is a task on the caller's runtime
    Reactor,
    /// A fixed set of OS threads, each driving its own single-threaded runtime
    WorkerPool { workers: usize },
}

/// Input line that never reached validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedInput {
    pub raw: String,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Wall-clock budget for one proxy's whole validation
    pub deadline: Duration,
    pub strategy: ExecutionStrategy,
    pub filter: Option<ResultFilter>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(60),
            strategy: ExecutionStrategy::Reactor,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    /// Completion order
    pub results: Vec<ValidationResult>,
    pub rejected: Vec<RejectedInput>,
    /// Admission stopped early on a cancellation signal
    pub cancelled: bool,
    pub ranked: Vec<RankedProxy>,
    pub categories: CategoryCounts,
}

/// Parse raw candidate lines, dropping duplicate endpoints
pub fn parse_candidates<S: AsRef<str>>(raw: &[S]) -> (Vec<ProxyAddress>, Vec<RejectedInput>) {
    let mut seen = HashSet::new();
    let mut proxies = Vec::new();
    let mut rejected = Vec::new();

    for line in raw {
        let line = line.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match ProxyAddress::parse(line) {
            Ok(proxy) => {
                if seen.insert(proxy.endpoint()) {
                    proxies.push(proxy);
                }
            }
            Err(e) => rejected.push(RejectedInput {
                raw: line.to_string(),
                kind: e.kind(),
                reason: e.to_string(),
            }),
        }
    }

    (proxies, rejected)
}

async fn validate_within(
    validator: &ProxyValidator,
    proxy: ProxyAddress,
    deadline: Duration,
) -> ValidationResult {
    let progress = ValidationProgress::new();
    let validation = validator.validate_with_progress(proxy.clone(), &progress);
    match tokio::time::timeout(deadline, validation).await {
        Ok(result) => result,
        Err(_) => {
            let partial = progress.last(proxy);
            debug!(proxy = %partial.proxy, stage = ?partial.stage, "Validation deadline exceeded");
            partial.fail(FailureReason::DeadlineExceeded)
        }
    }
}

/// Resolves once the shutdown flag is raised; never resolves if the sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

pub struct BatchRunner {
    validator: Arc<ProxyValidator>,
    store: Arc<dyn ProxyStore>,
    analytics: Arc<AnalyticsAggregator>,
    config: BatchConfig,
}

impl BatchRunner {
    pub fn new(
        validator: Arc<ProxyValidator>,
        store: Arc<dyn ProxyStore>,
        analytics: Arc<AnalyticsAggregator>,
        config: BatchConfig,
    ) -> Self {
        Self {
            validator,
            store,
            analytics,
            config,
        }
    }

    pub fn analytics(&self) -> &Arc<AnalyticsAggregator> {
        &self.analytics
    }

    /// Validate `candidates` until done or `shutdown` flips to true
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn run<S: AsRef<str>>(
        &self,
        candidates: &[S],
        shutdown: watch::Receiver<bool>,
    ) -> BatchReport {
        let run_id = Uuid::new_v4();
        let (proxies, rejected) = parse_candidates(candidates);

        for item in &rejected {
            warn!(input = %item.raw, kind = %item.kind, "Rejected candidate: {}", item.reason);
        }
        info!(
            run_id = %run_id,
            admitted = proxies.len(),
            rejected = rejected.len(),
            strategy = ?self.config.strategy,
            "Starting validation batch"
        );

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let admission = async {
            match self.config.strategy {
                ExecutionStrategy::Reactor => self.admit_reactor(proxies, result_tx, shutdown).await,
                ExecutionStrategy::WorkerPool { workers } => {
                    self.admit_worker_pool(proxies, workers, result_tx, shutdown)
                        .await
                }
            }
        };

        let collection = async {
            let mut results = Vec::new();
            let mut records = HashMap::new();
            while let Some(result) = result_rx.recv().await {
                let record = self.absorb(&result).await;
                records.insert(record.key(), record);
                results.push(result);
            }
            (results, records)
        };

        let (was_cancelled, (results, records)) = tokio::join!(admission, collection);

        if was_cancelled {
            warn!(run_id = %run_id, completed = results.len(), "Batch cancelled, admission stopped");
        }

        let ranked = self.rank(&results, &records);
        let categories = CategoryCounts::tally(&ranked);

        info!(
            run_id = %run_id,
            checked = results.len(),
            live = ranked.len(),
            premium = categories.premium,
            good = categories.good,
            "Validation batch finished"
        );

        BatchReport {
            run_id,
            results,
            rejected,
            cancelled: was_cancelled,
            ranked,
            categories,
        }
    }

    /// Returns true when admission was cut short
    async fn admit_reactor(
        &self,
        proxies: Vec<ProxyAddress>,
        result_tx: mpsc::UnboundedSender<ValidationResult>,
        mut shutdown: watch::Receiver<bool>,
    ) -> bool {
        let controller = self.validator.controller().clone();

        for proxy in proxies {
            let permit = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => return true,
                permit = controller.admit() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(error = %e, "Admission closed");
                        return true;
                    }
                },
            };

            let validator = self.validator.clone();
            let tx = result_tx.clone();
            let deadline = self.config.deadline;
            tokio::spawn(async move {
                let result = validate_within(&validator, proxy, deadline).await;
                drop(permit);
                let _ = tx.send(result);
            });
        }

        false
    }

    async fn admit_worker_pool(
        &self,
        proxies: Vec<ProxyAddress>,
        workers: usize,
        result_tx: mpsc::UnboundedSender<ValidationResult>,
        mut shutdown: watch::Receiver<bool>,
    ) -> bool {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<(ProxyAddress, AdmissionPermit)>(workers);
        let job_rx = Arc::new(parking_lot::Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let validator = self.validator.clone();
            let deadline = self.config.deadline;

            let spawned = thread::Builder::new()
                .name(format!("sift-worker-{}", id))
                .spawn(move || {
                    let runtime = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            error!(worker = id, error = %e, "Failed to start worker runtime");
                            return;
                        }
                    };

                    loop {
                        let job = job_rx.lock().blocking_recv();
                        let Some((proxy, permit)) = job else { break };
                        let result =
                            runtime.block_on(validate_within(&validator, proxy, deadline));
                        drop(permit);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(worker = id, error = %e, "Failed to spawn worker thread"),
            }
        }
        drop(result_tx);

        let mut was_cancelled = false;
        if handles.is_empty() {
            error!("No worker threads available");
            was_cancelled = true;
        } else {
            let controller = self.validator.controller().clone();
            for proxy in proxies {
                let permit = tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => { was_cancelled = true; break; }
                    permit = controller.admit() => match permit {
                        Ok(permit) => permit,
                        Err(e) => {
                            error!(error = %e, "Admission closed");
                            was_cancelled = true;
                            break;
                        }
                    },
                };
                if job_tx.send((proxy, permit)).await.is_err() {
                    was_cancelled = true;
                    break;
                }
            }
        }
        drop(job_tx);

        let joined = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
        if let Err(e) = joined {
            error!(error = %e, "Worker pool join failed");
        }

        was_cancelled
    }

    /// Fold a finished result into analytics and the stored record
    async fn absorb(&self, result: &ValidationResult) -> ProxyRecord {
        self.analytics.record(result);

        let key = result.proxy.endpoint();
        let mut record = match self.store.get(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => ProxyRecord::new(result.proxy.clone()),
            Err(e) => {
                warn!(proxy = %key, error = %e, kind = %ErrorKind::Persistence, "Failed to load proxy record");
                ProxyRecord::new(result.proxy.clone())
            }
        };
        record.apply(result);

        if let Err(e) = self.store.upsert(&record).await {
            warn!(proxy = %key, error = %e, kind = %ErrorKind::Persistence, "Failed to persist proxy record");
        }
        record
    }

    fn rank(
        &self,
        results: &[ValidationResult],
        records: &HashMap<String, ProxyRecord>,
    ) -> Vec<RankedProxy> {
        let mut reports: Vec<ProxyReport> = results.iter().filter_map(ProxyReport::from_result).collect();
        if let Some(filter) = &self.config.filter {
            reports = filter.apply(reports);
        }
        sort_by_quality(&mut reports);

        reports
            .into_iter()
            .map(|report| {
                let (trend, stability) = match records.get(&report.proxy) {
                    Some(record) => (
                        trend_from_history(&record.history),
                        stability_from_history(&record.history),
                    ),
                    None => (trend(&[]), 0.0),
                };
                RankedProxy {
                    category: categorize(report.health_score, &trend),
                    report,
                    trend,
                    stability,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SiftError};
    use crate::models::{ProxyProtocol, ProxyStatus, ValidationOutcome, ValidationStage};
    use crate::proxy::validator::tests::{offline_config, validator, ScriptedProber};
    use crate::repository::MemoryProxyStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn runner(
        prober: Arc<ScriptedProber>,
        store: Arc<dyn ProxyStore>,
        config: BatchConfig,
    ) -> BatchRunner {
        BatchRunner::new(
            Arc::new(validator(prober, offline_config())),
            store,
            Arc::new(AnalyticsAggregator::new()),
            config,
        )
    }

    fn idle_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[test]
    fn test_parse_candidates_rejects_malformed_and_dedups() {
        let (proxies, rejected) = parse_candidates(&[
            "10.0.0.1:8080",
            "not a proxy",
            "",
            "# comment",
            "10.0.0.1:8080",
            "socks5://10.0.0.2:1080",
        ]);

        assert_eq!(proxies.len(), 2);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].raw, "not a proxy");
        assert_eq!(rejected[0].kind, ErrorKind::MalformedInput);
    }

    #[tokio::test]
    async fn test_reactor_batch_persists_and_ranks() {
        let prober = Arc::new(ScriptedProber::reachable(&[ProxyProtocol::Http], 2.4));
        let store = Arc::new(MemoryProxyStore::new());
        let runner = runner(prober, store.clone(), BatchConfig::default());
        let (_tx, rx) = idle_shutdown();

        let report = runner
            .run(&["10.0.0.1:8080", "10.0.0.2:8080", "garbage"], rx)
            .await;

        assert!(!report.cancelled);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.ranked.len(), 2);
        assert_eq!(
            report.categories.premium + report.categories.good + report.categories.average
                + report.categories.poor,
            2
        );

        let stored = store.get("10.0.0.1:8080").await.unwrap().unwrap();
        assert_eq!(stored.status, ProxyStatus::Working);
        assert_eq!(stored.history.len(), 1);
        assert_eq!(runner.analytics().snapshot(5).live_count, 2);
    }

    #[tokio::test]
    async fn test_worker_pool_batch_validates_every_candidate() {
        let prober = Arc::new(ScriptedProber::reachable(&[ProxyProtocol::Socks5], 3.0));
        let store = Arc::new(MemoryProxyStore::new());
        let runner = runner(
            prober,
            store.clone(),
            BatchConfig {
                strategy: ExecutionStrategy::WorkerPool { workers: 3 },
                ..BatchConfig::default()
            },
        );
        let (_tx, rx) = idle_shutdown();

        let candidates: Vec<String> = (1..=8).map(|i| format!("10.0.1.{}:1080", i)).collect();
        let report = runner.run(&candidates, rx).await;

        assert_eq!(report.results.len(), 8);
        assert!(report.results.iter().all(|r| r.outcome == ValidationOutcome::Working));
        assert_eq!(store.list().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_cancelled_batch_admits_nothing_new() {
        let prober = Arc::new(ScriptedProber::reachable(&[ProxyProtocol::Http], 2.4));
        let runner = runner(
            prober.clone(),
            Arc::new(MemoryProxyStore::new()),
            BatchConfig::default(),
        );
        let (tx, rx) = idle_shutdown();
        tx.send(true).unwrap();

        let report = runner.run(&["10.0.0.1:8080", "10.0.0.2:8080"], rx).await;

        assert!(report.cancelled);
        assert!(report.results.is_empty());
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_validation_hits_deadline() {
        let mut scripted = ScriptedProber::reachable(&[ProxyProtocol::Http], 2.4);
        scripted.delay = Duration::from_secs(120);
        let runner = runner(
            Arc::new(scripted),
            Arc::new(MemoryProxyStore::new()),
            BatchConfig {
                deadline: Duration::from_secs(5),
                ..BatchConfig::default()
            },
        );
        let (_tx, rx) = idle_shutdown();

        let report = runner.run(&["10.0.0.1:8080"], rx).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(
            report.results[0].outcome,
            ValidationOutcome::Failed(FailureReason::DeadlineExceeded)
        );
        assert_eq!(report.results[0].stage, ValidationStage::PingProbe);
        assert!(report.ranked.is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl ProxyStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<ProxyRecord>> {
            Err(SiftError::Persistence("down".into()))
        }
        async fn upsert(&self, _record: &ProxyRecord) -> Result<()> {
            Err(SiftError::Persistence("down".into()))
        }
        async fn list(&self) -> Result<Vec<ProxyRecord>> {
            Ok(Vec::new())
        }
        async fn delete_checked_before(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }
        async fn blacklisted_hosts(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn add_blacklisted_host(&self, _host: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_persistence_failures_do_not_drop_results() {
        let prober = Arc::new(ScriptedProber::reachable(&[ProxyProtocol::Http], 2.4));
        let runner = runner(prober, Arc::new(BrokenStore), BatchConfig::default());
        let (_tx, rx) = idle_shutdown();

        let report = runner.run(&["10.0.0.1:8080"], rx).await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.ranked.len(), 1);
    }

    #[tokio::test]
    async fn test_filter_drops_results_below_threshold() {
        let prober = Arc::new(ScriptedProber::reachable(&[ProxyProtocol::Http], 2.4));
        let runner = runner(
            prober,
            Arc::new(MemoryProxyStore::new()),
            BatchConfig {
                filter: Some(ResultFilter {
                    min_health_score: 101,
                    ..ResultFilter::default()
                }),
                ..BatchConfig::default()
            },
        );
        let (_tx, rx) = idle_shutdown();

        let report = runner.run(&["10.0.0.1:8080"], rx).await;

        assert_eq!(report.results.len(), 1);
        assert!(report.ranked.is_empty());
    }
}
