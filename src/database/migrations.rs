use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Run all database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Plain-string execution uses the simple query protocol, which accepts
            // multi-statement scripts.
            pool.execute(sql).await?;

            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

/// Create the migrations tracking table
async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Get all migrations in order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![
        (1, "proxies", MIGRATION_001_PROXIES),
        (2, "blacklisted_hosts", MIGRATION_002_BLACKLISTED_HOSTS),
        (3, "source_health", MIGRATION_003_SOURCE_HEALTH),
        (4, "dedup_sessions", MIGRATION_004_DEDUP_SESSIONS),
        (5, "widen_host_columns", MIGRATION_005_WIDEN_HOST_COLUMNS),
    ]
}

// Migration 1: validated proxies with their bounded check history
const MIGRATION_001_PROXIES: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    address VARCHAR(64) PRIMARY KEY,
    host VARCHAR(64) NOT NULL,
    port INTEGER NOT NULL CHECK (port BETWEEN 1 AND 65535),
    scheme VARCHAR(10),
    username VARCHAR(255),
    password VARCHAR(255),
    protocols JSONB NOT NULL DEFAULT '[]',
    status VARCHAR(20) NOT NULL DEFAULT 'unknown',
    latency_ms DOUBLE PRECISION,
    speed_mbps DOUBLE PRECISION,
    health_score SMALLINT NOT NULL DEFAULT 0 CHECK (health_score BETWEEN 0 AND 100),
    checks JSONB NOT NULL DEFAULT '[]',
    geo JSONB,
    exit_ip VARCHAR(64),
    last_failure VARCHAR(32),
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_checked_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_proxies_status ON proxies(status);
CREATE INDEX IF NOT EXISTS idx_proxies_health_score ON proxies(health_score DESC);
CREATE INDEX IF NOT EXISTS idx_proxies_last_checked_at ON proxies(last_checked_at);
"#;

// Migration 2: hosts excluded from validation
const MIGRATION_002_BLACKLISTED_HOSTS: &str = r#"
CREATE TABLE IF NOT EXISTS blacklisted_hosts (
    host VARCHAR(64) PRIMARY KEY,
    added_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

// Migration 3: upstream source reliability
const MIGRATION_003_SOURCE_HEALTH: &str = r#"
CREATE TABLE IF NOT EXISTS source_health (
    url TEXT PRIMARY KEY,
    success_count BIGINT NOT NULL DEFAULT 0,
    fail_count BIGINT NOT NULL DEFAULT 0,
    total_requests BIGINT NOT NULL DEFAULT 0,
    avg_response_time_ms DOUBLE PRECISION NOT NULL DEFAULT 0,
    total_proxies BIGINT NOT NULL DEFAULT 0,
    health_score SMALLINT NOT NULL DEFAULT 100,
    last_success_at TIMESTAMPTZ,
    last_fail_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

// Migration 4: content hashes already delivered per source
const MIGRATION_004_DEDUP_SESSIONS: &str = r#"
CREATE TABLE IF NOT EXISTS dedup_sessions (
    category VARCHAR(16) NOT NULL,
    source_index INTEGER NOT NULL,
    content_hash CHAR(16) NOT NULL,
    PRIMARY KEY (category, source_index, content_hash)
);
"#;

// Migration 5: blacklist entries may be `ip:port`; older databases still have 15-wide host columns
const MIGRATION_005_WIDEN_HOST_COLUMNS: &str = r#"
ALTER TABLE proxies ALTER COLUMN host TYPE VARCHAR(64);
ALTER TABLE blacklisted_hosts ALTER COLUMN host TYPE VARCHAR(64);
"#;
