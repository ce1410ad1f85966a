//! ttr-core: polling, normalization, and storage primitives for the
//! thermostat telemetry reader.
//!
//! The crate is organized around one data path per cycle:
//!
//! - `scheduler` asks a `Provider` for summaries, snapshots, and runtime rows
//! - `normalize` turns vendor payloads into canonical documents
//! - `transition` derives state-change documents from consecutive rows
//! - `id` assigns deterministic identifiers so sink writes are upserts
//! - documents flow out through `Sink` implementations
//! - `offset` tracks per-thermostat high-watermarks, advanced only after a
//!   successful write
//!
//! Around the path: `retry` for transport-level backoff, `config` for the
//! validated configuration, `health`/`metrics`/`server` for the HTTP
//! surface, and `signal`/`trace` for process plumbing.

pub mod config;
pub mod error;
pub mod health;
pub mod id;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod offset;
pub mod retry;
pub mod scheduler;
pub mod server;
pub mod signal;
pub mod temperature;
pub mod trace;
pub mod transition;

// Re-export the items the application crate wires together.
pub use config::{Config, ProviderConfig, SinkConfig, TtrConfig};
pub use error::{
    ConfigError, IdError, NormalizeError, OffsetError, ProviderError, SchedulerError, ServerError,
    SinkError,
};
pub use health::HealthChecker;
pub use id::IdGenerator;
pub use metrics::MetricsCollector;
pub use model::{
    AuthManager, Doc, Document, DeviceSnapshot, EquipmentState, EventInfo, OffsetStore, Provider,
    ProviderInfo, Runtime5m, RuntimeRow, Sink, SinkInfo, Snapshot, State, Summary, ThermostatRef,
    Transition, WriteResult,
};
pub use normalize::Normalizer;
pub use offset::{MemoryOffsetStore, SqliteOffsetStore};
pub use retry::{retry, retry_http, HttpLike, RetryError, RetryPolicy};
pub use scheduler::Scheduler;
pub use signal::shutdown_signal;
pub use trace::init_tracing;
pub use transition::TransitionDetector;
