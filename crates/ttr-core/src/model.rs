//! Canonical document model and the provider/sink ports.
//!
//! Everything a vendor adapter produces is normalized into one of three
//! document shapes (`runtime_5m`, `transition`, `device_snapshot`) before it
//! reaches a sink. All timestamps are UTC and all temperatures are Celsius;
//! unit conversion is the provider's job, never the normalizer's.
//!
//! Map-valued fields use `BTreeMap` so the serialized form of a document is
//! byte-stable, which the deterministic document IDs depend on.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OffsetError, ProviderError, SinkError};

/// Type tag for 5-minute runtime documents.
pub const TYPE_RUNTIME_5M: &str = "runtime_5m";
/// Type tag for state-change documents.
pub const TYPE_TRANSITION: &str = "transition";
/// Type tag for device snapshot documents.
pub const TYPE_DEVICE_SNAPSHOT: &str = "device_snapshot";

/// Stable identity of a thermostat across providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThermostatRef {
    pub id: String,
    pub name: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
}

/// Metadata describing a provider implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Metadata describing a sink implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// High-level change-detection result for one thermostat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub thermostat_ref: ThermostatRef,
    /// Opaque revision string; an empty revision means "nothing to compare".
    pub revision: String,
    pub last_update: DateTime<Utc>,
}

/// Point-in-time view of program and active events, as the provider saw it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub thermostat_ref: ThermostatRef,
    pub collected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_active: Option<Vec<serde_json::Value>>,
}

/// One 5-minute runtime observation as returned by a provider.
///
/// Temperatures must already be Celsius when this crosses the port boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeRow {
    pub thermostat_ref: ThermostatRef,
    pub event_time: DateTime<Utc>,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub climate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_heat_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_cool_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdoor_temp_c: Option<f64>,
    #[serde(
        default,
        rename = "outdoor_humidity_pct",
        skip_serializing_if = "Option::is_none"
    )]
    pub outdoor_humidity: Option<i64>,
    #[serde(default, rename = "equip", skip_serializing_if = "Option::is_none")]
    pub equipment: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<BTreeMap<String, f64>>,
}

/// Canonical 5-minute runtime document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runtime5m {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub thermostat_id: String,
    pub thermostat_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    /// Start of the 5-minute bin, UTC.
    pub event_time: DateTime<Utc>,
    pub mode: String,
    pub climate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_heat_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_cool_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_temp_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outdoor_temp_c: Option<f64>,
    #[serde(
        default,
        rename = "outdoor_humidity_pct",
        skip_serializing_if = "Option::is_none"
    )]
    pub outdoor_humidity: Option<i64>,
    #[serde(default, rename = "equip", skip_serializing_if = "Option::is_none")]
    pub equipment: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BTreeMap<String, serde_json::Value>>,
}

/// Thermostat state tuple used for transition detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_heat_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_cool_c: Option<f64>,
    pub climate: String,
}

/// What triggered a transition, when known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    /// One of hold/vacation/resume/schedule/manual/unknown.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Canonical state-change document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub event_time: DateTime<Utc>,
    pub thermostat_id: String,
    pub thermostat_name: String,
    pub prev: State,
    pub next: State,
    pub event: EventInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BTreeMap<String, serde_json::Value>>,
}

/// Canonical device snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub collected_at: DateTime<Utc>,
    pub thermostat_id: String,
    pub thermostat_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_active: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BTreeMap<String, serde_json::Value>>,
}

/// HVAC equipment flags. The equipment map in `runtime_5m` is restricted to
/// exactly these keys; an absent key reads as off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EquipmentState {
    pub comp_heat1: bool,
    pub comp_heat2: bool,
    pub comp_cool1: bool,
    pub comp_cool2: bool,
    pub fan: bool,
}

impl EquipmentState {
    /// Serialize to the canonical map form; only active flags are present.
    pub fn to_map(self) -> BTreeMap<String, bool> {
        let mut map = BTreeMap::new();
        if self.comp_heat1 {
            map.insert("compHeat1".to_string(), true);
        }
        if self.comp_heat2 {
            map.insert("compHeat2".to_string(), true);
        }
        if self.comp_cool1 {
            map.insert("compCool1".to_string(), true);
        }
        if self.comp_cool2 {
            map.insert("compCool2".to_string(), true);
        }
        if self.fan {
            map.insert("fan".to_string(), true);
        }
        map
    }

    /// Rebuild from a map; keys outside the closed set are ignored and absent
    /// keys read as off.
    pub fn from_map(map: &BTreeMap<String, bool>) -> Self {
        Self {
            comp_heat1: map.get("compHeat1").copied().unwrap_or(false),
            comp_heat2: map.get("compHeat2").copied().unwrap_or(false),
            comp_cool1: map.get("compCool1").copied().unwrap_or(false),
            comp_cool2: map.get("compCool2").copied().unwrap_or(false),
            fan: map.get("fan").copied().unwrap_or(false),
        }
    }
}

/// One of the three canonical document shapes.
///
/// Each variant already carries its own `type` field, so the enum serializes
/// untagged and the wire form stays self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Document {
    Runtime5m(Runtime5m),
    Transition(Transition),
    DeviceSnapshot(DeviceSnapshot),
}

impl Document {
    /// The document's type tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Document::Runtime5m(_) => TYPE_RUNTIME_5M,
            Document::Transition(_) => TYPE_TRANSITION,
            Document::DeviceSnapshot(_) => TYPE_DEVICE_SNAPSHOT,
        }
    }

    /// The timestamp a partitioning sink must shard by: `event_time` for
    /// runtime and transition documents, `collected_at` for snapshots.
    ///
    /// This is a pure function of the document, so retried writes land in the
    /// same partition regardless of wall clock.
    pub fn partition_time(&self) -> DateTime<Utc> {
        match self {
            Document::Runtime5m(d) => d.event_time,
            Document::Transition(d) => d.event_time,
            Document::DeviceSnapshot(d) => d.collected_at,
        }
    }
}

/// A document paired with its deterministic identifier, ready for a sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doc {
    pub id: String,
    pub body: Document,
}

/// Outcome of one sink write; partial success is allowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteResult {
    pub success_count: usize,
    pub error_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Token lifecycle owned by a provider. Reads and refreshes are serialized so
/// a caller never observes a stale token after a completed refresh.
#[async_trait]
pub trait AuthManager: Send + Sync {
    /// Force a token refresh.
    async fn refresh(&self) -> Result<(), ProviderError>;

    /// Current access token, refreshing first if the cached one is stale.
    async fn access_token(&self) -> Result<String, ProviderError>;

    /// Whether the cached token is still usable.
    async fn is_valid(&self) -> bool;
}

/// A vendor cloud API client.
///
/// Implementations must return temperatures in Celsius (or none at all),
/// honor `Retry-After` during their own retries, and perform exactly one
/// forced token refresh + retry when a call comes back 401.
#[async_trait]
pub trait Provider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    async fn list_thermostats(&self) -> Result<Vec<ThermostatRef>, ProviderError>;

    async fn get_summary(&self, tr: &ThermostatRef) -> Result<Summary, ProviderError>;

    async fn get_snapshot(
        &self,
        tr: &ThermostatRef,
        since: Option<DateTime<Utc>>,
    ) -> Result<Snapshot, ProviderError>;

    /// Runtime rows over `[from, to]`, ordered by `event_time`.
    async fn get_runtime(
        &self,
        tr: &ThermostatRef,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RuntimeRow>, ProviderError>;

    fn auth(&self) -> Arc<dyn AuthManager>;
}

/// A downstream writer of canonical documents.
///
/// Writes are upserts keyed by document id: a repeated id overwrites, never
/// duplicates. Per-document failures are reported in `WriteResult::errors`;
/// transport failures are returned as an error so the scheduler leaves
/// offsets untouched.
#[async_trait]
pub trait Sink: Send + Sync {
    fn info(&self) -> SinkInfo;

    /// Idempotent; creates schemas/templates when the sink is configured to.
    async fn open(&self) -> Result<(), SinkError>;

    async fn write(&self, docs: &[Doc]) -> Result<WriteResult, SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

/// Per-thermostat high-watermarks: the last runtime bin and the last snapshot
/// collection time. Missing values read as `None`.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    async fn last_runtime_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError>;

    async fn set_last_runtime_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError>;

    async fn last_snapshot_time(
        &self,
        thermostat_id: &str,
    ) -> Result<Option<DateTime<Utc>>, OffsetError>;

    async fn set_last_snapshot_time(
        &self,
        thermostat_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OffsetError>;
}
