//! # Observability Module
//!
//! Structured logging for the node. Every ledger component logs through
//! `tracing`; this module installs the subscriber.

mod logging;

pub use logging::{default_filter, init_logging, LogFormat};
