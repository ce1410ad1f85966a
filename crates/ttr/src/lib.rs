//! ttr: the thermostat telemetry reader application.
//!
//! This crate wires the core scheduler to concrete adapters: the `ecobee`
//! cloud provider and the `elasticsearch` sink. New vendors or storages are
//! added by implementing the `Provider`/`Sink` ports in `ttr-core` and
//! registering the short tag in [`app`].

pub mod app;
pub mod providers;
pub mod sinks;

pub use app::App;
