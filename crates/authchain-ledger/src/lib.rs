//! AuthChain Ledger
//!
//! This crate records decisions about AI-agent tool invocations in an
//! append-only, hash-linked chain and tracks each new entry until a quorum
//! of registered validators has attested to it.
//!
//! # Components
//!
//! - [`Block`]: One decision record, hash-linked to its predecessor
//! - [`ValidatorRegistry`]: Validator identities, quorum size, attestation tags
//! - [`Blockchain`]: The ordered block sequence, verification, snapshots
//! - [`QuorumConsensus`]: Blocks awaiting quorum, attestation, expiry
//! - [`LedgerService`]: The operations transports call
//!
//! # Quorum
//!
//! The quorum size is `floor(2n/3) + 1` over the `n` currently active
//! validators, recomputed on every check. With no validators registered
//! nothing can finalize.
//!
//! # Decision Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Decision   │────▶│  Blockchain  │────▶│  Consensus   │
//! │   Record     │     │   (append)   │     │  (propose)   │
//! └──────────────┘     └──────────────┘     └──────┬───────┘
//!                                                   │
//!                      ┌────────────────────────────┘
//!                      ▼
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Validators  │────▶│   Quorum     │────▶│   Persist    │
//! │   Attest     │     │  (2n/3 + 1)  │     │  + Finalize  │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │ timeout
//!                             ▼
//!                      ┌──────────────┐
//!                      │    Stale     │
//!                      │ (in chain,   │
//!                      │ not final)   │
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use authchain_ledger::{ConsensusConfig, Decision, DecisionRecord, LedgerService};
//!
//! let ledger = LedgerService::in_memory(ConsensusConfig::default());
//! ledger.add_validator("v1", "Validator One", None).unwrap();
//!
//! let outcome = ledger
//!     .submit_decision(DecisionRecord {
//!         proposal_id: "prop-1".into(),
//!         checkpoint_id: "cp-1".into(),
//!         tool_name: "write_file".into(),
//!         tool_arguments: Default::default(),
//!         reasoning_summary: "update config".into(),
//!         decision: Decision {
//!             approved: true,
//!             decision_by: "alice".into(),
//!             rejection_reason: None,
//!             timestamp: 0,
//!         },
//!         classification: None,
//!         timestamp: 0,
//!     })
//!     .unwrap();
//!
//! assert!(outcome.status.is_finalized());
//! assert!(ledger.verify_chain().is_ok());
//! ```

mod block;
mod chain;
mod consensus;
mod error;
mod service;
mod validator;

pub use block::{Attestation, Block, BlockData, BlockHash, Decision, GENESIS_PREVIOUS_HASH};
pub use chain::{verify_sequence, Blockchain};
pub use consensus::{ConsensusConfig, PendingBlock, QuorumConsensus, QuorumProgress, StaleBlock};
pub use error::{ErrorKind, LedgerError, Result};
pub use service::{
    Classification, DecisionRecord, DecisionStatus, LedgerService, LedgerStatus, SubmitOutcome,
};
pub use validator::{
    quorum_size_for, AttestationScheme, DigestTagScheme, Validator, ValidatorRegistry,
    ValidatorStatus,
};
