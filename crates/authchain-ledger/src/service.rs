//! Ledger service.
//!
//! Ties the chain, the validator registry and quorum consensus together
//! behind the operations transports call: recording a decision, reading the
//! chain back, and managing validators.

use crate::block::{Block, BlockData, Decision};
use crate::chain::Blockchain;
use crate::consensus::{ConsensusConfig, PendingBlock, QuorumConsensus, StaleBlock};
use crate::error::{LedgerError, Result};
use crate::validator::{Validator, ValidatorRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Risk classification produced by the policy evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Risk tier of the tool call.
    pub tier: String,

    /// Whether human approval was required.
    pub requires_approval: bool,

    /// Why the tier was assigned.
    #[serde(default)]
    pub reason: String,
}

/// A decision about a tool call, as submitted for recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Proposal this decision resolves.
    pub proposal_id: String,

    /// Agent checkpoint the tool call was made from.
    pub checkpoint_id: String,

    /// Tool the agent wanted to invoke.
    pub tool_name: String,

    /// Arguments of the tool call.
    #[serde(default)]
    pub tool_arguments: BTreeMap<String, serde_json::Value>,

    /// The agent's reasoning.
    #[serde(default)]
    pub reasoning_summary: String,

    /// The decision taken.
    pub decision: Decision,

    /// Policy classification, if the evaluator produced one.
    #[serde(default, alias = "priority_result")]
    pub classification: Option<Classification>,

    /// When the record was produced (unix seconds).
    #[serde(default)]
    pub timestamp: i64,
}

impl DecisionRecord {
    /// Returns the name of the first required field that is blank, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("proposal_id", &self.proposal_id),
            ("checkpoint_id", &self.checkpoint_id),
            ("tool_name", &self.tool_name),
            ("decision.decision_by", &self.decision.decision_by),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    /// Converts to the block payload. The classification is not stored.
    pub fn into_block_data(self) -> BlockData {
        BlockData {
            proposal_id: self.proposal_id,
            checkpoint_id: self.checkpoint_id,
            tool_name: self.tool_name,
            tool_arguments: self.tool_arguments,
            reasoning_summary: self.reasoning_summary,
            decision: self.decision,
            timestamp: self.timestamp,
        }
    }
}

/// Consensus status of a recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DecisionStatus {
    /// Quorum was reached and the chain was persisted.
    Finalized,
    /// Recorded in the chain, still awaiting quorum.
    Pending {
        /// Active attestations collected so far.
        collected: usize,
        /// Current quorum size.
        required: usize,
    },
}

impl DecisionStatus {
    /// Returns true if the decision was finalized.
    pub fn is_finalized(&self) -> bool {
        matches!(self, DecisionStatus::Finalized)
    }
}

/// Result of recording a decision.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The block holding the decision.
    pub block: Arc<Block>,

    /// Where the block stands in consensus.
    pub status: DecisionStatus,
}

/// Summary of the ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStatus {
    /// Number of blocks, genesis included.
    pub chain_length: usize,
    /// Index of the tip.
    pub latest_index: u64,
    /// Hash of the tip.
    pub latest_hash: String,
    /// Number of active validators.
    pub active_validators: usize,
    /// Current quorum size.
    pub quorum_size: usize,
    /// Blocks awaiting quorum.
    pub pending: usize,
    /// Blocks that expired without quorum.
    pub stale: usize,
}

/// The ledger service.
#[derive(Debug, Clone)]
pub struct LedgerService {
    chain: Arc<Blockchain>,
    registry: Arc<ValidatorRegistry>,
    consensus: Arc<QuorumConsensus>,
    snapshot_path: Option<PathBuf>,
}

impl LedgerService {
    /// Creates a service from existing components.
    pub fn new(
        chain: Arc<Blockchain>,
        registry: Arc<ValidatorRegistry>,
        consensus: Arc<QuorumConsensus>,
        snapshot_path: Option<PathBuf>,
    ) -> Self {
        Self {
            chain,
            registry,
            consensus,
            snapshot_path,
        }
    }

    /// Creates a service with a fresh chain that is never persisted.
    pub fn in_memory(config: ConsensusConfig) -> Self {
        let registry = Arc::new(ValidatorRegistry::new());
        let consensus = Arc::new(QuorumConsensus::new(registry.clone(), config));
        Self::new(Arc::new(Blockchain::new()), registry, consensus, None)
    }

    /// Opens the ledger persisted at `path`.
    ///
    /// A missing file starts a fresh chain; a corrupt one is an error.
    pub fn open(path: impl AsRef<Path>, config: ConsensusConfig) -> Result<Self> {
        let path = path.as_ref();
        let chain = Arc::new(Blockchain::load_snapshot(path)?);
        let registry = Arc::new(ValidatorRegistry::new());
        let consensus = Arc::new(QuorumConsensus::new(registry.clone(), config));
        Ok(Self::new(
            chain,
            registry,
            consensus,
            Some(path.to_path_buf()),
        ))
    }

    /// Returns the chain.
    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    /// Returns the validator registry.
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Returns the consensus tracker.
    pub fn consensus(&self) -> &Arc<QuorumConsensus> {
        &self.consensus
    }

    /// Returns where the chain is persisted, if anywhere.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Starts the consensus expiry sweep.
    pub fn spawn_expiry_sweeper(&self) -> JoinHandle<()> {
        self.consensus.spawn_expiry_sweeper()
    }

    /// Records a decision: appends it, proposes it, collects attestations
    /// from every active validator and finalizes it if quorum is reached.
    pub fn submit_decision(&self, record: DecisionRecord) -> Result<SubmitOutcome> {
        info!(
            proposal_id = %record.proposal_id,
            checkpoint_id = %record.checkpoint_id,
            tool = %record.tool_name,
            approved = record.decision.approved,
            decision_by = %record.decision.decision_by,
            tier = record.classification.as_ref().map(|c| c.tier.as_str()),
            "recording decision"
        );

        let block = self.chain.append(record.into_block_data())?;
        self.consensus.propose(block.clone())?;

        let status = self.collect_and_settle(&block)?;
        Ok(SubmitOutcome { block, status })
    }

    /// Runs a fresh attestation round for a block that is pending or went
    /// stale.
    pub fn reattest(&self, block_hash: &str) -> Result<SubmitOutcome> {
        let block = self.chain.get_by_hash(block_hash)?;

        if !self.consensus.is_pending(block_hash) {
            if !self.consensus.is_stale(block_hash) {
                return Err(LedgerError::UnknownPendingBlock(block_hash.to_string()));
            }
            info!(index = block.index, hash = %block.hash.short(), "re-proposing stale block");
            self.consensus.propose(block.clone())?;
        }

        let status = self.collect_and_settle(&block)?;
        Ok(SubmitOutcome { block, status })
    }

    fn collect_and_settle(&self, block: &Arc<Block>) -> Result<DecisionStatus> {
        let hash = block.hash.as_str();

        for validator in self.registry.list_active() {
            let attested = self
                .registry
                .compute_tag(&validator.id, &block.hash)
                .and_then(|tag| self.consensus.attest(hash, &validator.id, &tag));

            match attested {
                Ok(()) => debug!(validator_id = %validator.id, index = block.index, "validator attested"),
                Err(e) => warn!(
                    validator_id = %validator.id,
                    index = block.index,
                    error = %e,
                    "attestation rejected"
                ),
            }
        }

        let progress = self.consensus.progress(hash)?;
        if !progress.reached() {
            info!(
                index = block.index,
                collected = progress.collected,
                required = progress.required,
                "block awaiting quorum"
            );
            return Ok(DecisionStatus::Pending {
                collected: progress.collected,
                required: progress.required,
            });
        }

        // Persist before finalizing so a failed save leaves the block pending.
        self.persist()?;
        self.consensus.finalize(hash);
        info!(
            index = block.index,
            hash = %block.hash.short(),
            attestations = progress.collected,
            "quorum reached"
        );
        Ok(DecisionStatus::Finalized)
    }

    /// Saves the chain to its snapshot path, if one is configured.
    pub fn persist(&self) -> Result<()> {
        match self.snapshot_path {
            Some(ref path) => self.chain.save_snapshot(path),
            None => Ok(()),
        }
    }

    /// Returns every block in chain order.
    pub fn list_blocks(&self) -> Vec<Arc<Block>> {
        self.chain.blocks()
    }

    /// Gets a block by index.
    pub fn get_block(&self, index: u64) -> Result<Arc<Block>> {
        self.chain.get(index)
    }

    /// Gets a block by hash.
    pub fn get_block_by_hash(&self, hash: &str) -> Result<Arc<Block>> {
        self.chain.get_by_hash(hash)
    }

    /// Returns every block recording `proposal_id`.
    pub fn get_blocks_by_proposal(&self, proposal_id: &str) -> Result<Vec<Arc<Block>>> {
        self.chain.find_by_proposal_id(proposal_id)
    }

    /// Verifies the whole chain, returning its length.
    pub fn verify_chain(&self) -> Result<usize> {
        self.chain.verify_all()?;
        Ok(self.chain.len())
    }

    /// Registers a new active validator.
    pub fn add_validator(
        &self,
        id: &str,
        name: &str,
        public_key: Option<String>,
    ) -> Result<Validator> {
        let mut validator = Validator::new(id, name);
        validator.public_key = public_key;
        self.registry.add(validator)?;
        self.registry.get(id)
    }

    /// Deactivates a validator.
    pub fn remove_validator(&self, id: &str) -> Result<()> {
        self.registry.deactivate(id)
    }

    /// Returns the active validators.
    pub fn list_active_validators(&self) -> Vec<Validator> {
        self.registry.list_active()
    }

    /// Returns every validator, inactive ones included.
    pub fn list_validators(&self) -> Vec<Validator> {
        self.registry.list_all()
    }

    /// Returns the current quorum size.
    pub fn quorum_size(&self) -> usize {
        self.registry.quorum_size()
    }

    /// Returns the blocks awaiting quorum.
    pub fn list_pending(&self) -> Vec<PendingBlock> {
        self.consensus.list_pending()
    }

    /// Returns the blocks that expired without quorum.
    pub fn list_stale(&self) -> Vec<StaleBlock> {
        self.consensus.list_stale()
    }

    /// Returns a summary of the ledger state.
    pub fn status(&self) -> LedgerStatus {
        let latest = self.chain.latest();
        LedgerStatus {
            chain_length: self.chain.len(),
            latest_index: latest.index,
            latest_hash: latest.hash.to_string(),
            active_validators: self.registry.active_count(),
            quorum_size: self.registry.quorum_size(),
            pending: self.consensus.pending_count(),
            stale: self.consensus.stale_count(),
        }
    }
}
