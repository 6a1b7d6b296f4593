use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use crate::error::Result;
use crate::models::SessionKey;
use crate::repository::DedupStore;

/// Repository for dedup session hashes
#[derive(Clone)]
pub struct DedupRepository {
    pool: PgPool,
}

impl DedupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupStore for DedupRepository {
    async fn load_all(&self) -> Result<Vec<(SessionKey, Vec<String>)>> {
        let rows = sqlx::query_as::<_, (String, i32, String)>(
            "SELECT category, source_index, content_hash FROM dedup_sessions",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut sessions: BTreeMap<SessionKey, Vec<String>> = BTreeMap::new();
        for (category, index, hash) in rows {
            sessions
                .entry(SessionKey::new(&category, index.max(0) as usize))
                .or_default()
                .push(hash);
        }

        Ok(sessions.into_iter().collect())
    }

    async fn add_hashes(&self, key: &SessionKey, hashes: &[String]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO dedup_sessions (category, source_index, content_hash)
            SELECT $1, $2, UNNEST($3::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&key.category)
        .bind(key.index as i32)
        .bind(hashes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM dedup_sessions")
            .execute(&self.pool)
            .await?;
        info!(rows = result.rows_affected(), "Cleared dedup sessions");
        Ok(())
    }
}
