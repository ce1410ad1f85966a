//! Provider adapters, registered by short tag at wiring time.

pub mod ecobee;
