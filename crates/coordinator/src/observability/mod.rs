//! Observability for the coordinator.
//!
//! Logging is set up by `common::observability`; this module only holds the
//! metric definitions.

pub mod metrics;
