use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::Result;
use crate::models::SourceRecord;
use crate::repository::SourceHealthStore;

#[derive(Debug, FromRow)]
struct SourceHealthRow {
    url: String,
    success_count: i64,
    fail_count: i64,
    total_requests: i64,
    avg_response_time_ms: f64,
    total_proxies: i64,
    health_score: i16,
    last_success_at: Option<DateTime<Utc>>,
    last_fail_at: Option<DateTime<Utc>>,
}

impl From<SourceHealthRow> for SourceRecord {
    fn from(row: SourceHealthRow) -> Self {
        SourceRecord {
            url: row.url,
            success_count: row.success_count.max(0) as u64,
            fail_count: row.fail_count.max(0) as u64,
            total_requests: row.total_requests.max(0) as u64,
            avg_response_time_ms: row.avg_response_time_ms,
            total_proxies: row.total_proxies.max(0) as u64,
            health_score: row.health_score.clamp(0, 100) as u8,
            last_success_at: row.last_success_at,
            last_fail_at: row.last_fail_at,
        }
    }
}

/// Repository for source health records
#[derive(Clone)]
pub struct SourceHealthRepository {
    pool: PgPool,
}

impl SourceHealthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceHealthStore for SourceHealthRepository {
    async fn load_all(&self) -> Result<Vec<SourceRecord>> {
        let rows = sqlx::query_as::<_, SourceHealthRow>(
            r#"
            SELECT url, success_count, fail_count, total_requests, avg_response_time_ms,
                   total_proxies, health_score, last_success_at, last_fail_at
            FROM source_health
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SourceRecord::from).collect())
    }

    async fn save(&self, record: &SourceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_health (
                url, success_count, fail_count, total_requests, avg_response_time_ms,
                total_proxies, health_score, last_success_at, last_fail_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (url) DO UPDATE SET
                success_count = EXCLUDED.success_count,
                fail_count = EXCLUDED.fail_count,
                total_requests = EXCLUDED.total_requests,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms,
                total_proxies = EXCLUDED.total_proxies,
                health_score = EXCLUDED.health_score,
                last_success_at = EXCLUDED.last_success_at,
                last_fail_at = EXCLUDED.last_fail_at,
                updated_at = NOW()
            "#,
        )
        .bind(&record.url)
        .bind(record.success_count as i64)
        .bind(record.fail_count as i64)
        .bind(record.total_requests as i64)
        .bind(record.avg_response_time_ms)
        .bind(record.total_proxies as i64)
        .bind(record.health_score as i16)
        .bind(record.last_success_at)
        .bind(record.last_fail_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
