//! Harvests candidate proxies from the source catalog
//!
//! Sources are fetched concurrently; a failing source only lowers its own health score.
//! With a rate limiter attached, every fetch waits for admission like the validation traffic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::concurrency::RateLimiter;
use crate::error::{Result, SiftError};
use crate::models::SessionKey;
use crate::sources::catalog::{IndexedSource, SourceCatalog, SourceCategory};
use crate::sources::dedup::DedupSessionStore;
use crate::sources::health::SourceHealthMonitor;

/// Downloads the body of one source
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// reqwest-backed fetcher
pub struct HttpSourceFetcher {
    client: reqwest::Client,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("sift/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SiftError::SourceFetch {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiftError::SourceFetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        response.text().await.map_err(|e| SiftError::SourceFetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Outcome of one source during a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStat {
    pub category: SourceCategory,
    pub index: usize,
    pub url: String,
    pub success: bool,
    pub fetched: usize,
    pub new: usize,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionReport {
    pub candidates: Vec<String>,
    pub sources: Vec<SourceStat>,
    /// Dedup sessions were cleared at the end of the cycle
    pub reset: bool,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Sources fetched at once
    pub concurrency: usize,
    /// Keep a random sample of this many candidates per cycle
    pub max_candidates: Option<usize>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            max_candidates: None,
        }
    }
}

pub struct SourceCollector {
    catalog: SourceCatalog,
    fetcher: Arc<dyn SourceFetcher>,
    health: Arc<SourceHealthMonitor>,
    dedup: Arc<DedupSessionStore>,
    limiter: Option<RateLimiter>,
    config: CollectorConfig,
}

impl SourceCollector {
    pub fn new(
        catalog: SourceCatalog,
        fetcher: Arc<dyn SourceFetcher>,
        health: Arc<SourceHealthMonitor>,
        dedup: Arc<DedupSessionStore>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            health,
            dedup,
            limiter: None,
            config,
        }
    }

    /// Pace source fetches through `limiter`
    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub async fn collect(&self, categories: &[SourceCategory]) -> CollectionReport {
        self.collect_at(categories, Utc::now()).await
    }

    /// Run one fetch cycle over `categories` as of `now`
    #[instrument(skip(self, now))]
    pub async fn collect_at(
        &self,
        categories: &[SourceCategory],
        now: DateTime<Utc>,
    ) -> CollectionReport {
        let mut jobs: Vec<(SourceCategory, IndexedSource)> = Vec::new();

        for &category in categories {
            let rotated = self.catalog.rotated(category, now);

            let mut seen = HashSet::new();
            let unique: Vec<IndexedSource> = rotated
                .into_iter()
                .filter(|s| seen.insert(s.spec.url.clone()))
                .collect();

            let urls: Vec<String> = unique.iter().map(|s| s.spec.url.clone()).collect();
            let healthy: HashSet<String> = self.health.filter_healthy(&urls).into_iter().collect();

            jobs.extend(
                unique
                    .into_iter()
                    .filter(|s| healthy.contains(&s.spec.url))
                    .map(|s| (category, s)),
            );
        }

        info!(sources = jobs.len(), "Fetching proxy sources");

        let results: Vec<(SourceCategory, IndexedSource, Result<Vec<String>>, f64)> =
            futures::stream::iter(jobs)
                .map(|(category, source)| async move {
                    if let Some(limiter) = &self.limiter {
                        limiter.admit().await;
                    }
                    let started = Instant::now();
                    let fetched = match self.fetcher.fetch(&source.spec.url).await {
                        Ok(body) => source.spec.format.parse(&body),
                        Err(e) => Err(e),
                    };
                    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                    (category, source, fetched, elapsed_ms)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut report = CollectionReport::default();

        for (category, source, fetched, elapsed_ms) in results {
            let url = source.spec.url.clone();
            let mut stat = SourceStat {
                category,
                index: source.index,
                url: url.clone(),
                success: false,
                fetched: 0,
                new: 0,
                response_time_ms: elapsed_ms,
            };

            match fetched {
                Ok(items) => {
                    self.health
                        .record_fetch(&url, true, elapsed_ms, items.len() as u64)
                        .await;
                    stat.success = true;
                    stat.fetched = items.len();

                    let key = SessionKey::new(category.as_str(), source.index);
                    let fresh = self.dedup.filter_new(&key, items).await;
                    stat.new = fresh.len();
                    report.candidates.extend(fresh);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, kind = %e.kind(), "Source fetch failed");
                    self.health.record_fetch(&url, false, elapsed_ms, 0).await;
                }
            }

            report.sources.push(stat);
        }

        report.reset = self.dedup.end_cycle(report.candidates.len()).await;

        if let Some(limit) = self.config.max_candidates {
            if report.candidates.len() > limit {
                let collected = report.candidates.len();
                report.candidates = report
                    .candidates
                    .choose_multiple(&mut rand::thread_rng(), limit)
                    .cloned()
                    .collect();
                info!(collected, kept = limit, "Sampled candidates");
            }
        }

        info!(
            candidates = report.candidates.len(),
            sources = report.sources.len(),
            failed = report.sources.iter().filter(|s| !s.success).count(),
            reset = report.reset,
            "Collection cycle finished"
        );

        report
    }
}
