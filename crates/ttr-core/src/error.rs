//! Error types for the telemetry reader core.

use snafu::prelude::*;

/// Errors raised while loading or validating configuration.
///
/// Any of these aborts startup; the display text names the offending key.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("reading config file {path}: {source}"))]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("parsing YAML config: {source}"))]
    YamlParse { source: serde_yaml::Error },

    #[snafu(display("environment interpolation failed: {message}"))]
    EnvInterpolation { message: String },

    #[snafu(display("invalid duration for {key}: {value:?}"))]
    InvalidDuration { key: String, value: String },

    #[snafu(display("ttr.poll_interval must be at least 1 minute"))]
    PollIntervalTooShort,

    #[snafu(display("ttr.backfill_window must be at least 1 hour"))]
    BackfillWindowTooShort,

    #[snafu(display(
        "invalid ttr.log_level: {level:?}, must be one of: debug, info, warn, error"
    ))]
    InvalidLogLevel { level: String },

    #[snafu(display("at least one provider must be enabled"))]
    NoEnabledProvider,

    #[snafu(display("at least one sink must be enabled"))]
    NoEnabledSink,
}

/// Errors returned by provider implementations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ProviderError {
    #[snafu(display("transport error: {message}"))]
    Transport { message: String },

    #[snafu(display("HTTP {status}: {message}"))]
    Http { status: u16, message: String },

    #[snafu(display("authentication failed: {message}"))]
    Auth { message: String },

    #[snafu(display("decoding {what} response: {source}"))]
    Decode {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("encoding {what}: {source}"))]
    Encode {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("thermostat {id} not found in {what} response"))]
    ThermostatNotFound { id: String, what: &'static str },

    #[snafu(display("provider call cancelled"))]
    Cancelled,
}

/// Errors returned by sink implementations. A transport-level failure means
/// the whole batch is in doubt and offsets must not advance.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    #[snafu(display("transport error: {message}"))]
    Unreachable { message: String },

    #[snafu(display("HTTP {status}: {message}"))]
    BadStatus { status: u16, message: String },

    #[snafu(display("serializing {what}: {source}"))]
    Serialize {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("decoding bulk response: {source}"))]
    BulkDecode { source: serde_json::Error },

    #[snafu(display("creating index template {name}: HTTP {status}"))]
    TemplateCreate { name: String, status: u16 },
}

/// Errors from the offset store adapters.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum OffsetError {
    #[snafu(display("opening offset database {path}: {source}"))]
    OpenDatabase {
        path: String,
        source: rusqlite::Error,
    },

    #[snafu(display("initializing offset schema: {source}"))]
    InitSchema { source: rusqlite::Error },

    #[snafu(display("querying {column} for {thermostat_id}: {source}"))]
    Query {
        column: &'static str,
        thermostat_id: String,
        source: rusqlite::Error,
    },

    #[snafu(display("upserting {column} for {thermostat_id}: {source}"))]
    Upsert {
        column: &'static str,
        thermostat_id: String,
        source: rusqlite::Error,
    },

    #[snafu(display("parsing stored timestamp {value:?}: {source}"))]
    TimestampParse {
        value: String,
        source: chrono::ParseError,
    },
}

/// Errors from the document ID generator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IdError {
    #[snafu(display("encoding {what} for hashing: {source}"))]
    HashEncode {
        what: &'static str,
        source: serde_json::Error,
    },
}

/// Errors constructing the normalizer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NormalizeError {
    #[snafu(display("unknown timezone {timezone:?}"))]
    UnknownTimezone { timezone: String },
}

/// Per-unit errors inside a polling cycle. These are contained: a failing
/// thermostat is logged and skipped, never aborting the cycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SchedulerError {
    #[snafu(display("listing thermostats: {source}"))]
    ListThermostats { source: ProviderError },

    #[snafu(display("getting summary: {source}"))]
    SummaryFetch { source: ProviderError },

    #[snafu(display("getting snapshot: {source}"))]
    SnapshotFetch { source: ProviderError },

    #[snafu(display("getting runtime data: {source}"))]
    RuntimeFetch { source: ProviderError },

    #[snafu(display("generating document ID: {source}"))]
    DocumentId { source: IdError },

    #[snafu(display("{failed} sink write(s) failed for the batch"))]
    SinkBatch { failed: usize },
}

/// Errors from the health/metrics HTTP surface.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ServerError {
    #[snafu(display("binding {what} server to {addr}: {source}"))]
    Bind {
        what: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[snafu(display("{what} server failed: {source}"))]
    Serve {
        what: &'static str,
        source: std::io::Error,
    },
}
