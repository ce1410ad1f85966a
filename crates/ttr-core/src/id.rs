//! Deterministic document identifiers.
//!
//! IDs are pure functions of document content so that repeated writes after
//! a retry or restart upsert the same record:
//!
//! - `runtime_5m`: `thermostat_id:event_time:type:hash(body)`
//! - `transition`: `thermostat_id:event_time:hash(prev, next)`
//! - `device_snapshot`: `thermostat_id:collected_at`
//!
//! The hash is the first 8 bytes (16 hex chars) of SHA-256 over the canonical
//! JSON encoding. Canonical documents keep their maps in `BTreeMap`s, so the
//! encoding — and therefore the ID — is stable across processes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use snafu::ResultExt;

use crate::error::{HashEncodeSnafu, IdError};
use crate::model::{DeviceSnapshot, Runtime5m, State, Transition};

/// Timestamp layout used inside document IDs.
const ID_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Generates deterministic document IDs. Stateless; cheap to copy around.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// ID for a `runtime_5m` document, hashed over the whole body.
    pub fn runtime_5m_id(&self, doc: &Runtime5m) -> Result<String, IdError> {
        let hash = hash_content(doc, "runtime_5m document")?;
        Ok(format!(
            "{}:{}:{}:{}",
            doc.thermostat_id,
            format_id_timestamp(doc.event_time),
            doc.doc_type,
            hash
        ))
    }

    /// ID for a `transition` document, hashed over `{prev, next}` only.
    pub fn transition_id(&self, doc: &Transition) -> Result<String, IdError> {
        let hash = hash_states(&doc.prev, &doc.next)?;
        Ok(format!(
            "{}:{}:{}",
            doc.thermostat_id,
            format_id_timestamp(doc.event_time),
            hash
        ))
    }

    /// ID for a `device_snapshot` document; `collected_at` is the natural key.
    pub fn device_snapshot_id(&self, doc: &DeviceSnapshot) -> Result<String, IdError> {
        Ok(format!(
            "{}:{}",
            doc.thermostat_id,
            format_id_timestamp(doc.collected_at)
        ))
    }
}

fn format_id_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(ID_TIMESTAMP_FORMAT).to_string()
}

fn hash_content<T: Serialize>(value: &T, what: &'static str) -> Result<String, IdError> {
    let bytes = serde_json::to_vec(value).context(HashEncodeSnafu { what })?;
    let digest = Sha256::digest(&bytes);
    Ok(digest[..8].iter().map(|b| format!("{b:02x}")).collect())
}

fn hash_states(prev: &State, next: &State) -> Result<String, IdError> {
    hash_content(&json!({ "next": next, "prev": prev }), "transition states")
}
