//! Sink adapters, registered by short tag at wiring time.

pub mod elasticsearch;
