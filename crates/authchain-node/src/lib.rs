//! # AuthChain Node
//!
//! Serves the AuthChain decision ledger to the rest of the system.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐   ┌──────────────────────┐
//! │   HTTP API (axum)    │   │    File Mailbox      │
//! │  /api/blocks, ...    │   │  payload_*.json      │
//! └──────────┬───────────┘   └──────────┬───────────┘
//!            │                          │
//!            └────────────┬─────────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │    LedgerService     │
//!              │ chain + validators + │
//!              │  quorum consensus    │
//!              └──────────┬───────────┘
//!                         ▼
//!              ┌──────────────────────┐
//!              │  data/blockchain.json│
//!              └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin authchain-node -- serve --api-addr 127.0.0.1:8081
//! ```
//!
//! ## Modules
//!
//! - [`api`] - HTTP endpoints
//! - [`config`] - Node configuration
//! - [`mailbox`] - File mailbox watcher
//! - [`observability`] - Logging setup

pub mod api;
pub mod config;
pub mod mailbox;
pub mod observability;

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
