use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

use crate::error::Result;
use crate::models::{ProxyRecord, SessionKey, SourceRecord};
use crate::repository::{DedupStore, ProxyStore, SourceHealthStore};

/// Process-local proxy database
#[derive(Default)]
pub struct MemoryProxyStore {
    records: DashMap<String, ProxyRecord>,
    blacklist: DashSet<String>,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn get(&self, key: &str) -> Result<Option<ProxyRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn upsert(&self, record: &ProxyRecord) -> Result<()> {
        self.records.insert(record.key(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ProxyRecord>> {
        Ok(self.records.iter().map(|r| r.value().clone()).collect())
    }

    async fn delete_checked_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let before = self.records.len();
        self.records
            .retain(|_, record| record.last_checked_at.unwrap_or(record.added_at) >= cutoff);
        Ok((before - self.records.len()) as u64)
    }

    async fn blacklisted_hosts(&self) -> Result<Vec<String>> {
        Ok(self.blacklist.iter().map(|h| h.key().clone()).collect())
    }

    async fn add_blacklisted_host(&self, host: &str) -> Result<()> {
        self.blacklist.insert(host.to_string());
        Ok(())
    }
}

/// Process-local source health records
#[derive(Default)]
pub struct MemorySourceHealthStore {
    records: Mutex<HashMap<String, SourceRecord>>,
}

impl MemorySourceHealthStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceHealthStore for MemorySourceHealthStore {
    async fn load_all(&self) -> Result<Vec<SourceRecord>> {
        Ok(self.records.lock().values().cloned().collect())
    }

    async fn save(&self, record: &SourceRecord) -> Result<()> {
        self.records
            .lock()
            .insert(record.url.clone(), record.clone());
        Ok(())
    }
}

/// Process-local dedup sessions
#[derive(Default)]
pub struct MemoryDedupStore {
    sessions: Mutex<HashMap<SessionKey, Vec<String>>>,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn load_all(&self) -> Result<Vec<(SessionKey, Vec<String>)>> {
        Ok(self
            .sessions
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn add_hashes(&self, key: &SessionKey, hashes: &[String]) -> Result<()> {
        self.sessions
            .lock()
            .entry(key.clone())
            .or_default()
            .extend(hashes.iter().cloned());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.lock().clear();
        Ok(())
    }
}
