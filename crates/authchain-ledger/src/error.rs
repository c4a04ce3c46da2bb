//! Ledger error types.
//!
//! Errors fall into four kinds (see [`ErrorKind`]). Integrity errors are never
//! repaired or downgraded by this crate; callers decide how to surface them.

use std::path::PathBuf;
use thiserror::Error;

/// Broad classification of a [`LedgerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The stored chain does not hash or link correctly. Always fatal.
    Integrity,
    /// The caller asked for something the current state cannot satisfy.
    State,
    /// A validator tag did not verify.
    Attestation,
    /// Filesystem or encoding failure while persisting or loading.
    Io,
}

impl ErrorKind {
    /// Returns a stable lowercase name, suitable for API payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Integrity => "integrity",
            ErrorKind::State => "state",
            ErrorKind::Attestation => "attestation",
            ErrorKind::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Recomputed content hash differs from the stored one.
    #[error("block {index}: hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch {
        /// Index of the offending block.
        index: u64,
        /// Hash stored in the block.
        stored: String,
        /// Hash recomputed from the block contents.
        computed: String,
    },

    /// `previous_hash` does not match the predecessor's hash.
    #[error("block {index}: previous hash {found} does not match predecessor hash {expected}")]
    PrevHashMismatch {
        /// Index of the offending block.
        index: u64,
        /// Hash of the predecessor.
        expected: String,
        /// `previous_hash` recorded in the block.
        found: String,
    },

    /// Index is not exactly one past the predecessor's index.
    #[error("block {index}: index is not sequential after predecessor {predecessor}")]
    NonSequentialIndex {
        /// Index of the offending block.
        index: u64,
        /// Index of the predecessor.
        predecessor: u64,
    },

    /// A non-genesis block was verified without a predecessor.
    #[error("block {index}: missing predecessor")]
    MissingPredecessor {
        /// Index of the offending block.
        index: u64,
    },

    /// A freshly built block failed verification against the chain tip.
    #[error("block verification failed: {0}")]
    BlockVerificationFailed(#[source] Box<LedgerError>),

    /// A persisted ledger failed verification on load.
    #[error("corrupt ledger at {path}: {source}")]
    CorruptLedger {
        /// Path of the snapshot that failed to verify.
        path: PathBuf,
        /// Underlying integrity failure.
        #[source]
        source: Box<LedgerError>,
    },

    /// The block is already awaiting quorum.
    #[error("block {0} is already pending")]
    AlreadyPending(String),

    /// The block hash is not tracked by consensus.
    #[error("block {0} is not pending")]
    UnknownPendingBlock(String),

    /// A validator was registered with a blank identifier.
    #[error("validator id cannot be empty")]
    EmptyIdentifier,

    /// A validator with this id is already registered.
    #[error("validator {0} already exists")]
    DuplicateValidator(String),

    /// No validator with this id is registered.
    #[error("validator {0} not found")]
    UnknownValidator(String),

    /// The validator exists but has been deactivated.
    #[error("validator {0} is not active")]
    InactiveValidator(String),

    /// Block index beyond the chain tip.
    #[error("block index {index} out of range (chain length {len})")]
    IndexOutOfRange {
        /// Requested index.
        index: u64,
        /// Current chain length.
        len: usize,
    },

    /// Lookup by hash or proposal id found nothing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The validator's tag does not verify for this block hash.
    #[error("invalid attestation from validator {validator_id} for block {block_hash}")]
    InvalidAttestation {
        /// Validator that submitted the tag.
        validator_id: String,
        /// Block the tag was submitted for.
        block_hash: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot encoding error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::HashMismatch { .. }
            | LedgerError::PrevHashMismatch { .. }
            | LedgerError::NonSequentialIndex { .. }
            | LedgerError::MissingPredecessor { .. }
            | LedgerError::BlockVerificationFailed(_)
            | LedgerError::CorruptLedger { .. } => ErrorKind::Integrity,

            LedgerError::AlreadyPending(_)
            | LedgerError::UnknownPendingBlock(_)
            | LedgerError::EmptyIdentifier
            | LedgerError::DuplicateValidator(_)
            | LedgerError::UnknownValidator(_)
            | LedgerError::InactiveValidator(_)
            | LedgerError::IndexOutOfRange { .. }
            | LedgerError::NotFound(_) => ErrorKind::State,

            LedgerError::InvalidAttestation { .. } => ErrorKind::Attestation,

            LedgerError::Io(_) | LedgerError::Serialization(_) => ErrorKind::Io,
        }
    }

    /// Returns true for errors that indicate a damaged chain.
    pub fn is_integrity(&self) -> bool {
        self.kind() == ErrorKind::Integrity
    }

    /// Index of the block an integrity error refers to, if any.
    pub fn block_index(&self) -> Option<u64> {
        match self {
            LedgerError::HashMismatch { index, .. }
            | LedgerError::PrevHashMismatch { index, .. }
            | LedgerError::NonSequentialIndex { index, .. }
            | LedgerError::MissingPredecessor { index } => Some(*index),
            LedgerError::BlockVerificationFailed(inner)
            | LedgerError::CorruptLedger { source: inner, .. } => inner.block_index(),
            _ => None,
        }
    }
}

/// A specialized Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
