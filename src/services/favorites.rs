//! Bookmarks for top-scoring proxies, kept in a JSON file across runs

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::models::{GeoInfo, ProxyReport};

/// Health score at which a proxy is bookmarked automatically
pub const FAVORITE_MIN_SCORE: u8 = 85;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub proxy: String,
    pub ip: Option<String>,
    pub country: Option<String>,
    pub latency_ms: Option<f64>,
    pub health_score: u8,
    pub geo: Option<GeoInfo>,
    pub bookmarked_at: DateTime<Utc>,
}

impl Favorite {
    fn from_report(report: &ProxyReport, now: DateTime<Utc>) -> Self {
        Self {
            proxy: report.proxy.clone(),
            ip: report.ip.clone(),
            country: report.country.clone(),
            latency_ms: report.latency_ms,
            health_score: report.health_score,
            geo: report.geo.clone(),
            bookmarked_at: now,
        }
    }
}

pub struct FavoritesBook {
    path: PathBuf,
}

impl FavoritesBook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved favorites; a missing file is an empty book
    pub async fn load(&self) -> Result<Vec<Favorite>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Bookmark every report scoring at least [`FAVORITE_MIN_SCORE`].
    ///
    /// Entries already in the book are refreshed in place. Returns how many were new.
    pub async fn bookmark<'a>(
        &self,
        reports: impl IntoIterator<Item = &'a ProxyReport>,
    ) -> Result<usize> {
        let qualifying: Vec<&ProxyReport> = reports
            .into_iter()
            .filter(|r| r.health_score >= FAVORITE_MIN_SCORE)
            .collect();
        if qualifying.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut favorites = self.load().await?;
        let mut added = 0;
        for report in qualifying {
            let entry = Favorite::from_report(report, now);
            match favorites.iter_mut().find(|f| f.proxy == report.proxy) {
                Some(existing) => *existing = entry,
                None => {
                    favorites.push(entry);
                    added += 1;
                }
            }
        }

        self.save(&favorites).await?;
        info!(added, total = favorites.len(), "Bookmarked top proxies");
        Ok(added)
    }

    async fn save(&self, favorites: &[Favorite]) -> Result<()> {
        let body = serde_json::to_vec_pretty(favorites)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Anonymity, ProtocolSet, ProxyStatus};
    use uuid::Uuid;

    fn report(proxy: &str, score: u8) -> ProxyReport {
        ProxyReport {
            proxy: proxy.to_string(),
            ip: Some("198.51.100.4".to_string()),
            country: Some("NL".to_string()),
            latency_ms: Some(120.0),
            speed_mbps: Some(8.0),
            protocols: ProtocolSet::new(),
            status: ProxyStatus::Working,
            geo: None,
            anonymity: Anonymity::Elite,
            health_score: score,
        }
    }

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("sift-favorites-{}.json", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_only_top_scores_are_bookmarked() {
        let book = FavoritesBook::new(scratch());

        let added = book
            .bookmark(&[
                report("10.0.0.1:80", 85),
                report("10.0.0.2:80", 84),
                report("10.0.0.3:80", 97),
            ])
            .await
            .unwrap();

        assert_eq!(added, 2);
        let saved: Vec<String> = book.load().await.unwrap().into_iter().map(|f| f.proxy).collect();
        assert_eq!(saved, vec!["10.0.0.1:80", "10.0.0.3:80"]);
        tokio::fs::remove_file(book.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rebookmarking_refreshes_without_duplicates() {
        let book = FavoritesBook::new(scratch());
        book.bookmark(&[report("10.0.0.1:80", 88)]).await.unwrap();

        let added = book
            .bookmark(&[report("10.0.0.1:80", 93), report("10.0.0.4:80", 90)])
            .await
            .unwrap();

        assert_eq!(added, 1);
        let saved = book.load().await.unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].health_score, 93);
        tokio::fs::remove_file(book.path()).await.unwrap();
    }

    #[tokio::test]
    async fn test_nothing_qualifying_leaves_no_file() {
        let book = FavoritesBook::new(scratch());
        assert_eq!(book.bookmark(&[report("10.0.0.1:80", 60)]).await.unwrap(), 0);
        assert!(book.load().await.unwrap().is_empty());
        assert!(!book.path().exists());
    }
}
