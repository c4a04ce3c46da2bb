//! Quorum consensus over appended blocks.
//!
//! A block enters consensus after it has been appended to the chain. Active
//! validators attest to it; once enough distinct active validators have
//! attested, the caller persists the chain and finalizes the entry. Entries
//! that wait longer than the configured timeout are expired and recorded as
//! stale: they remain in the chain but never reached recorded quorum.
//!
//! Lock order is always consensus state first, then the validator registry.
//! The registry never calls back into consensus.

use crate::block::{unix_now, Attestation, Block, BlockHash};
use crate::error::{LedgerError, Result};
use crate::validator::ValidatorRegistry;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Configuration for quorum consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// How long a block may wait for quorum before it expires.
    pub timeout: Duration,

    /// How often the expiry sweep runs.
    pub sweep_interval: Duration,

    /// Maximum number of stale records kept for audit.
    pub max_stale_records: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            max_stale_records: 1024,
        }
    }
}

/// A block awaiting quorum.
#[derive(Debug, Clone)]
pub struct PendingBlock {
    /// The block, shared with the chain.
    pub block: Arc<Block>,

    /// Accepted attestations keyed by validator id.
    pub attestations: HashMap<String, Attestation>,

    /// When the block was proposed (unix seconds).
    pub proposed_at: i64,

    created_at: Instant,
}

impl PendingBlock {
    fn new(block: Arc<Block>) -> Self {
        Self {
            block,
            attestations: HashMap::new(),
            proposed_at: unix_now(),
            created_at: Instant::now(),
        }
    }

    /// Time since the block was proposed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of distinct validators that attested.
    pub fn attestation_count(&self) -> usize {
        self.attestations.len()
    }
}

/// Audit record for a block that expired without quorum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleBlock {
    /// Chain index of the block.
    pub index: u64,

    /// Hash of the block.
    pub hash: BlockHash,

    /// Active attestations held when it expired.
    pub collected: usize,

    /// Quorum size when it expired.
    pub required: usize,

    /// When the block was proposed (unix seconds).
    pub proposed_at: i64,

    /// When the block expired (unix seconds).
    pub expired_at: i64,
}

/// Attestation progress of a pending block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumProgress {
    /// Distinct attestations from currently active validators.
    pub collected: usize,

    /// Current quorum size.
    pub required: usize,
}

impl QuorumProgress {
    /// Returns true once quorum is reached.
    pub fn reached(&self) -> bool {
        self.collected >= self.required
    }
}

/// Tracks blocks awaiting quorum.
pub struct QuorumConsensus {
    pending: RwLock<HashMap<BlockHash, PendingBlock>>,
    stale: RwLock<VecDeque<StaleBlock>>,
    registry: Arc<ValidatorRegistry>,
    config: ConsensusConfig,
}

impl std::fmt::Debug for QuorumConsensus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuorumConsensus")
            .field("pending", &self.pending.read().len())
            .field("stale", &self.stale.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl QuorumConsensus {
    /// Creates a consensus tracker backed by `registry`.
    pub fn new(registry: Arc<ValidatorRegistry>, config: ConsensusConfig) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            stale: RwLock::new(VecDeque::new()),
            registry,
            config,
        }
    }

    /// Creates a consensus tracker with default timeouts.
    pub fn with_defaults(registry: Arc<ValidatorRegistry>) -> Self {
        Self::new(registry, ConsensusConfig::default())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Returns the validator registry.
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Starts tracking `block`.
    ///
    /// Proposing a block that previously went stale clears its stale record
    /// and starts a fresh round.
    pub fn propose(&self, block: Arc<Block>) -> Result<()> {
        let mut pending = self.pending.write();
        if pending.contains_key(&block.hash) {
            return Err(LedgerError::AlreadyPending(block.hash.to_string()));
        }

        let hash = block.hash.clone();
        let index = block.index;
        pending.insert(hash.clone(), PendingBlock::new(block));

        let mut stale = self.stale.write();
        let before = stale.len();
        stale.retain(|s| s.hash != hash);
        let reproposed = stale.len() != before;

        tracing::debug!(index, hash = %hash.short(), reproposed, "block proposed");
        Ok(())
    }

    /// Records `validator_id`'s attestation `tag` for a pending block.
    ///
    /// Attesting again replaces the earlier attestation; each validator is
    /// counted once.
    pub fn attest(&self, block_hash: &str, validator_id: &str, tag: &str) -> Result<()> {
        let mut pending = self.pending.write();
        let entry = pending
            .get_mut(block_hash)
            .ok_or_else(|| LedgerError::UnknownPendingBlock(block_hash.to_string()))?;

        let validator = self.registry.get(validator_id)?;
        if !validator.is_active() {
            return Err(LedgerError::InactiveValidator(validator_id.to_string()));
        }

        if !self
            .registry
            .verify_tag(validator_id, &entry.block.hash, tag)
        {
            return Err(LedgerError::InvalidAttestation {
                validator_id: validator_id.to_string(),
                block_hash: block_hash.to_string(),
            });
        }

        let attestation = Attestation::new(&validator.id, &validator.name, tag);
        entry
            .attestations
            .insert(validator.id.clone(), attestation.clone());
        entry.block.attach(attestation);

        tracing::debug!(
            index = entry.block.index,
            hash = %entry.block.hash.short(),
            validator_id = %validator.id,
            collected = entry.attestations.len(),
            "attestation recorded"
        );
        Ok(())
    }

    /// Returns the attestation progress of a pending block against the
    /// current validator set.
    pub fn progress(&self, block_hash: &str) -> Result<QuorumProgress> {
        let pending = self.pending.read();
        let entry = pending
            .get(block_hash)
            .ok_or_else(|| LedgerError::UnknownPendingBlock(block_hash.to_string()))?;
        Ok(self.progress_of(entry))
    }

    fn progress_of(&self, entry: &PendingBlock) -> QuorumProgress {
        QuorumProgress {
            collected: self
                .registry
                .count_active(entry.attestations.keys().map(String::as_str)),
            required: self.registry.quorum_size(),
        }
    }

    /// Returns true if a pending block has reached quorum.
    ///
    /// The threshold is evaluated now, not when the block was proposed.
    pub fn has_quorum(&self, block_hash: &str) -> Result<bool> {
        Ok(self.progress(block_hash)?.reached())
    }

    /// Returns the pending block if it has reached quorum.
    pub fn get_finalizable(&self, block_hash: &str) -> Result<Option<Arc<Block>>> {
        let pending = self.pending.read();
        let entry = pending
            .get(block_hash)
            .ok_or_else(|| LedgerError::UnknownPendingBlock(block_hash.to_string()))?;

        Ok(self
            .progress_of(entry)
            .reached()
            .then(|| entry.block.clone()))
    }

    /// Stops tracking a block. Returns the removed entry, if any.
    ///
    /// Callers finalize only after quorum is reached and the chain has been
    /// persisted.
    pub fn finalize(&self, block_hash: &str) -> Option<PendingBlock> {
        let removed = self.pending.write().remove(block_hash);
        if let Some(ref entry) = removed {
            tracing::info!(
                index = entry.block.index,
                hash = %entry.block.hash.short(),
                attestations = entry.attestation_count(),
                "block finalized"
            );
        }
        removed
    }

    /// Returns true if the block is awaiting quorum.
    pub fn is_pending(&self, block_hash: &str) -> bool {
        self.pending.read().contains_key(block_hash)
    }

    /// Returns true if the block expired without quorum and has not been
    /// proposed again.
    pub fn is_stale(&self, block_hash: &str) -> bool {
        self.stale
            .read()
            .iter()
            .any(|s| s.hash.as_str() == block_hash)
    }

    /// Returns a snapshot of the pending blocks, ordered by chain index.
    pub fn list_pending(&self) -> Vec<PendingBlock> {
        let mut pending: Vec<_> = self.pending.read().values().cloned().collect();
        pending.sort_by_key(|p| p.block.index);
        pending
    }

    /// Returns the stale audit log, oldest first.
    pub fn list_stale(&self) -> Vec<StaleBlock> {
        self.stale.read().iter().cloned().collect()
    }

    /// Returns the number of pending blocks.
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Returns the number of stale records.
    pub fn stale_count(&self) -> usize {
        self.stale.read().len()
    }

    /// Expires every pending block older than the timeout, regardless of
    /// how many attestations it holds. Returns the new stale records.
    pub fn reap_expired(&self) -> Vec<StaleBlock> {
        let mut pending = self.pending.write();
        let expired_hashes: Vec<_> = pending
            .iter()
            .filter(|(_, entry)| entry.age() > self.config.timeout)
            .map(|(hash, _)| hash.clone())
            .collect();

        if expired_hashes.is_empty() {
            return Vec::new();
        }

        let now = unix_now();
        let mut expired = Vec::with_capacity(expired_hashes.len());
        for hash in expired_hashes {
            if let Some(entry) = pending.remove(&hash) {
                let progress = self.progress_of(&entry);
                tracing::warn!(
                    index = entry.block.index,
                    hash = %hash.short(),
                    collected = progress.collected,
                    required = progress.required,
                    "pending block expired without quorum"
                );
                expired.push(StaleBlock {
                    index: entry.block.index,
                    hash,
                    collected: progress.collected,
                    required: progress.required,
                    proposed_at: entry.proposed_at,
                    expired_at: now,
                });
            }
        }
        expired.sort_by_key(|s| s.index);

        let mut stale = self.stale.write();
        stale.extend(expired.iter().cloned());
        while stale.len() > self.config.max_stale_records {
            stale.pop_front();
        }

        expired
    }

    /// Spawns the periodic expiry sweep on the current tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the consensus
    /// instance is dropped.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(consensus) = weak.upgrade() else {
                    break;
                };
                let expired = consensus.reap_expired();
                if !expired.is_empty() {
                    tracing::debug!(count = expired.len(), "expiry sweep removed pending blocks");
                }
            }
            tracing::debug!("expiry sweeper stopped");
        })
    }
}
