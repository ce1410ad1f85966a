//! Offset store adapters.
//!
//! The scheduler tracks two high-watermarks per thermostat: the last runtime
//! bin written and the last snapshot collection time. The in-memory adapter
//! here covers tests and degraded operation; [`sqlite::SqliteOffsetStore`]
//! survives restarts.

pub mod sqlite;

pub use sqlite::SqliteOffsetStore;

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::OffsetError;
use crate::model::OffsetStore;

/// In-memory offset store. Contents are lost on restart, at which point the
/// next backfill re-primes the watermarks.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    runtime_times: RwLock<HashMap<String, DateTime<Utc>>>,
    snapshot_times: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for MemoryOffsetStore {
    async fn last_runtime_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError> {
        let map = self.runtime_times.read().expect("offset lock poisoned");
        Ok(map.get(thermostat_id).copied())
    }

    async fn set_last_runtime_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError> {
        let mut map = self.runtime_times.write().expect("offset lock poisoned");
        map.insert(thermostat_id.to_string(), timestamp);
        Ok(())
    }

    async fn last_snapshot_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError> {
        let map = self.snapshot_times.read().expect("offset lock poisoned");
        Ok(map.get(thermostat_id).copied())
    }

    async fn set_last_snapshot_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError> {
        let mut map = self.snapshot_times.write().expect("offset lock poisoned");
        map.insert(thermostat_id.to_string(), timestamp);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_thermostat_reads_as_none() {
        let store = MemoryOffsetStore::new();
        assert_eq!(store.last_runtime_time("th1").await.unwrap(), None);
        assert_eq!(store.last_snapshot_time("th1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn runtime_and_snapshot_offsets_are_independent() {
        let store = MemoryOffsetStore::new();
        let runtime: DateTime<Utc> = "2026-01-05T12:00:00Z".parse().unwrap();
        let snapshot: DateTime<Utc> = "2026-01-05T12:03:00Z".parse().unwrap();

        store.set_last_runtime_time("th1", runtime).await.unwrap();
        store.set_last_snapshot_time("th1", snapshot).await.unwrap();

        assert_eq!(store.last_runtime_time("th1").await.unwrap(), Some(runtime));
        assert_eq!(
            store.last_snapshot_time("th1").await.unwrap(),
            Some(snapshot)
        );
        assert_eq!(store.last_runtime_time("th2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_value() {
        let store = MemoryOffsetStore::new();
        let first: DateTime<Utc> = "2026-01-05T12:00:00Z".parse().unwrap();
        let second: DateTime<Utc> = "2026-01-05T12:05:00Z".parse().unwrap();

        store.set_last_runtime_time("th1", first).await.unwrap();
        store.set_last_runtime_time("th1", second).await.unwrap();

        assert_eq!(store.last_runtime_time("th1").await.unwrap(), Some(second));
    }
}
