use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;

use crate::error::{FailureReason, Result};
use crate::models::{
    CheckHistory, GeoInfo, ProtocolSet, ProxyAddress, ProxyAuth, ProxyProtocol, ProxyRecord,
    ProxyStatus,
};
use crate::repository::ProxyStore;

#[derive(Debug, FromRow)]
struct ProxyRow {
    host: String,
    port: i32,
    scheme: Option<String>,
    username: Option<String>,
    password: Option<String>,
    protocols: Json<ProtocolSet>,
    status: String,
    latency_ms: Option<f64>,
    speed_mbps: Option<f64>,
    health_score: i16,
    checks: Json<CheckHistory>,
    geo: Option<Json<GeoInfo>>,
    exit_ip: Option<String>,
    last_failure: Option<String>,
    added_at: DateTime<Utc>,
    last_checked_at: Option<DateTime<Utc>>,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        let auth = match (row.username, row.password) {
            (Some(username), Some(password)) => Some(ProxyAuth { username, password }),
            _ => None,
        };

        ProxyRecord {
            address: ProxyAddress {
                scheme: row.scheme.as_deref().and_then(ProxyProtocol::from_str),
                host: row.host,
                port: u16::try_from(row.port).unwrap_or_default(),
                auth,
            },
            protocols: row.protocols.0,
            status: ProxyStatus::from_str(&row.status).unwrap_or_default(),
            latency_ms: row.latency_ms,
            speed_mbps: row.speed_mbps,
            health_score: row.health_score.clamp(0, 100) as u8,
            history: row.checks.0,
            geo: row.geo.map(|g| g.0),
            exit_ip: row.exit_ip,
            last_failure: row.last_failure.as_deref().and_then(FailureReason::from_str),
            added_at: row.added_at,
            last_checked_at: row.last_checked_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT host, port, scheme, username, password, protocols, status,
           latency_ms, speed_mbps, health_score, checks, geo, exit_ip, last_failure,
           added_at, last_checked_at
    FROM proxies
"#;

/// Repository for proxy database operations
#[derive(Clone)]
pub struct ProxyRepository {
    pool: PgPool,
}

impl ProxyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProxyStore for ProxyRepository {
    async fn get(&self, key: &str) -> Result<Option<ProxyRecord>> {
        let row = sqlx::query_as::<_, ProxyRow>(&format!("{} WHERE address = $1", SELECT_COLUMNS))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ProxyRecord::from))
    }

    async fn upsert(&self, record: &ProxyRecord) -> Result<()> {
        let (username, password) = match &record.address.auth {
            Some(auth) => (Some(auth.username.as_str()), Some(auth.password.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO proxies (
                address, host, port, scheme, username, password, protocols, status,
                latency_ms, speed_mbps, health_score, checks, geo, exit_ip, last_failure,
                added_at, last_checked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (address) DO UPDATE SET
                scheme = EXCLUDED.scheme,
                username = EXCLUDED.username,
                password = EXCLUDED.password,
                protocols = EXCLUDED.protocols,
                status = EXCLUDED.status,
                latency_ms = EXCLUDED.latency_ms,
                speed_mbps = EXCLUDED.speed_mbps,
                health_score = EXCLUDED.health_score,
                checks = EXCLUDED.checks,
                geo = EXCLUDED.geo,
                exit_ip = EXCLUDED.exit_ip,
                last_failure = EXCLUDED.last_failure,
                last_checked_at = EXCLUDED.last_checked_at,
                updated_at = NOW()
            "#,
        )
        .bind(record.key())
        .bind(&record.address.host)
        .bind(record.address.port as i32)
        .bind(record.address.scheme.map(|s| s.as_str()))
        .bind(username)
        .bind(password)
        .bind(Json(&record.protocols))
        .bind(record.status.as_str())
        .bind(record.latency_ms)
        .bind(record.speed_mbps)
        .bind(record.health_score as i16)
        .bind(Json(&record.history))
        .bind(record.geo.as_ref().map(Json))
        .bind(&record.exit_ip)
        .bind(record.last_failure.map(|r| r.as_str()))
        .bind(record.added_at)
        .bind(record.last_checked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProxyRecord>> {
        let rows = sqlx::query_as::<_, ProxyRow>(&format!(
            "{} ORDER BY health_score DESC, latency_ms ASC NULLS LAST",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProxyRecord::from).collect())
    }

    async fn delete_checked_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM proxies WHERE COALESCE(last_checked_at, added_at) < $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(count = removed, cutoff = %cutoff, "Deleted stale proxy records");
        }
        Ok(removed)
    }

    async fn blacklisted_hosts(&self) -> Result<Vec<String>> {
        let hosts = sqlx::query_scalar::<_, String>("SELECT host FROM blacklisted_hosts ORDER BY host")
            .fetch_all(&self.pool)
            .await?;
        Ok(hosts)
    }

    async fn add_blacklisted_host(&self, host: &str) -> Result<()> {
        sqlx::query("INSERT INTO blacklisted_hosts (host) VALUES ($1) ON CONFLICT (host) DO NOTHING")
            .bind(host)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
