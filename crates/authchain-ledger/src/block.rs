//! Ledger block structure.
//!
//! A block records one decision about an agent tool invocation. Its hash
//! binds the index, creation time, predecessor hash and the canonical JSON
//! encoding of the decision record, so any edit to those fields is
//! detectable by [`Block::verify_link`].

use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// `previous_hash` recorded by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Returns the current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Hex-encoded SHA-256 block hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    /// Wraps an already hex-encoded hash.
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The sentinel predecessor hash of the genesis block.
    pub fn genesis_parent() -> Self {
        Self(GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Returns the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns an abbreviated form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..16).unwrap_or(&self.0)
    }
}

impl Borrow<str> for BlockHash {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for BlockHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlockHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The human (or system) decision embedded in a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the tool call was approved.
    pub approved: bool,

    /// Identity of whoever made the decision.
    pub decision_by: String,

    /// Reason given for a rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    /// When the decision was made (unix seconds).
    pub timestamp: i64,
}

/// The decision record stored in a block.
///
/// Field order is the canonical serialization order; tool arguments are kept
/// in a `BTreeMap` so their encoding is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    /// Proposal this decision resolves.
    pub proposal_id: String,

    /// Agent checkpoint the tool call was made from.
    pub checkpoint_id: String,

    /// Name of the tool the agent wanted to invoke.
    pub tool_name: String,

    /// Arguments of the tool call.
    #[serde(default)]
    pub tool_arguments: BTreeMap<String, serde_json::Value>,

    /// The agent's reasoning for the call.
    #[serde(default)]
    pub reasoning_summary: String,

    /// The decision taken.
    pub decision: Decision,

    /// When the record was produced (unix seconds).
    pub timestamp: i64,
}

impl BlockData {
    /// Canonical JSON encoding used for hashing.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).expect("block data serialization should not fail")
    }
}

/// A validator's attestation attached to a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    /// Attesting validator.
    pub validator_id: String,

    /// Display name of the validator at attestation time.
    pub validator_name: String,

    /// Attestation tag over the block hash.
    pub tag: String,

    /// When the attestation was recorded (unix seconds).
    pub timestamp: i64,
}

impl Attestation {
    /// Creates an attestation stamped with the current time.
    pub fn new(
        validator_id: impl Into<String>,
        validator_name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            validator_id: validator_id.into(),
            validator_name: validator_name.into(),
            tag: tag.into(),
            timestamp: unix_now(),
        }
    }
}

/// Attestations attached to a block, at most one per validator.
///
/// Interior mutability lets consensus attach attestations to a block that is
/// already shared with the chain. Attestations are not covered by the block
/// hash.
#[derive(Debug, Default)]
struct AttestationLog(RwLock<Vec<Attestation>>);

impl AttestationLog {
    fn snapshot(&self) -> Vec<Attestation> {
        self.0.read().clone()
    }

    fn upsert(&self, attestation: Attestation) {
        let mut entries = self.0.write();
        match entries
            .iter_mut()
            .find(|a| a.validator_id == attestation.validator_id)
        {
            Some(existing) => *existing = attestation,
            None => entries.push(attestation),
        }
    }

    fn len(&self) -> usize {
        self.0.read().len()
    }
}

impl Serialize for AttestationLog {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.read().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttestationLog {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let entries = Vec::<Attestation>::deserialize(deserializer)?;
        Ok(Self(RwLock::new(entries)))
    }
}

/// A hash-linked ledger entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain (0 = genesis).
    pub index: u64,

    /// Creation time (unix seconds).
    pub timestamp: i64,

    /// Hash of the predecessor block.
    pub previous_hash: BlockHash,

    /// Content hash of this block.
    pub hash: BlockHash,

    /// The decision record.
    pub data: BlockData,

    /// Validator attestations.
    #[serde(default)]
    attestations: AttestationLog,
}

impl Block {
    /// Creates a block stamped with the current time.
    pub fn new(index: u64, previous_hash: BlockHash, data: BlockData) -> Self {
        Self::with_timestamp(index, unix_now(), previous_hash, data)
    }

    /// Creates a block with an explicit creation time.
    pub fn with_timestamp(
        index: u64,
        timestamp: i64,
        previous_hash: BlockHash,
        data: BlockData,
    ) -> Self {
        let hash = Self::compute_hash(index, timestamp, &previous_hash, &data);
        Self {
            index,
            timestamp,
            previous_hash,
            hash,
            data,
            attestations: AttestationLog::default(),
        }
    }

    /// Creates the genesis block.
    pub fn genesis() -> Self {
        let now = unix_now();
        let data = BlockData {
            proposal_id: "genesis".into(),
            checkpoint_id: "genesis".into(),
            tool_name: "init".into(),
            tool_arguments: BTreeMap::new(),
            reasoning_summary: "AuthChain genesis block".into(),
            decision: Decision {
                approved: true,
                decision_by: "system".into(),
                rejection_reason: None,
                timestamp: now,
            },
            timestamp: now,
        };

        Self::with_timestamp(0, now, BlockHash::genesis_parent(), data)
    }

    /// Computes the content hash over index, time, lineage and payload.
    pub fn compute_hash(
        index: u64,
        timestamp: i64,
        previous_hash: &BlockHash,
        data: &BlockData,
    ) -> BlockHash {
        let record = format!(
            "{}{}{}{}",
            index,
            timestamp,
            previous_hash,
            data.canonical_json()
        );
        let mut hasher = Sha256::new();
        hasher.update(record.as_bytes());
        BlockHash(hex::encode(hasher.finalize()))
    }

    /// Recomputes this block's hash from its current contents.
    pub fn calculate_hash(&self) -> BlockHash {
        Self::compute_hash(self.index, self.timestamp, &self.previous_hash, &self.data)
    }

    /// Returns true if this is the genesis block.
    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// Verifies the content hash and, for non-genesis blocks, the link to
    /// `predecessor`.
    pub fn verify_link(&self, predecessor: Option<&Block>) -> Result<()> {
        let computed = self.calculate_hash();
        if computed != self.hash {
            return Err(LedgerError::HashMismatch {
                index: self.index,
                stored: self.hash.to_string(),
                computed: computed.to_string(),
            });
        }

        if self.is_genesis() {
            return Ok(());
        }

        let prev = predecessor.ok_or(LedgerError::MissingPredecessor { index: self.index })?;

        if self.previous_hash != prev.hash {
            return Err(LedgerError::PrevHashMismatch {
                index: self.index,
                expected: prev.hash.to_string(),
                found: self.previous_hash.to_string(),
            });
        }

        if prev.index.checked_add(1) != Some(self.index) {
            return Err(LedgerError::NonSequentialIndex {
                index: self.index,
                predecessor: prev.index,
            });
        }

        Ok(())
    }

    /// Attaches an attestation. A second attestation from the same validator
    /// replaces the first. No validation is performed here.
    pub fn attach(&self, attestation: Attestation) {
        self.attestations.upsert(attestation);
    }

    /// Returns a copy of the attached attestations in attachment order.
    pub fn attestations(&self) -> Vec<Attestation> {
        self.attestations.snapshot()
    }

    /// Returns the number of attached attestations.
    pub fn attestation_count(&self) -> usize {
        self.attestations.len()
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash.clone(),
            hash: self.hash.clone(),
            data: self.data.clone(),
            attestations: AttestationLog(RwLock::new(self.attestations())),
        }
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.timestamp == other.timestamp
            && self.previous_hash == other.previous_hash
            && self.hash == other.hash
            && self.data == other.data
            && self.attestations() == other.attestations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_data(proposal: &str) -> BlockData {
        let mut args = BTreeMap::new();
        args.insert("path".to_string(), json!("src/auth/login.rs"));
        args.insert("mode".to_string(), json!("overwrite"));

        BlockData {
            proposal_id: proposal.into(),
            checkpoint_id: "cp-1".into(),
            tool_name: "write_file".into(),
            tool_arguments: args,
            reasoning_summary: "patch login flow".into(),
            decision: Decision {
                approved: true,
                decision_by: "alice".into(),
                rejection_reason: None,
                timestamp: 1_700_000_000,
            },
            timestamp: 1_700_000_001,
        }
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash.as_str(), GENESIS_PREVIOUS_HASH);
        assert_eq!(genesis.attestation_count(), 0);
        assert!(genesis.verify_link(None).is_ok());
    }

    #[test]
    fn test_short_hash() {
        let hash = Block::genesis().hash;
        assert_eq!(hash.short(), &hash.as_str()[..16]);

        assert_eq!(BlockHash::new("abc").short(), "abc");
        // 16 is not a char boundary here.
        let odd = BlockHash::new("aaaaaaaaaaaaaaa\u{e9}bcdef");
        assert_eq!(odd.short(), odd.as_str());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = Block::with_timestamp(1, 42, "abc".into(), test_data("p-1"));
        let b = Block::with_timestamp(1, 42, "abc".into(), test_data("p-1"));

        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.as_str().len(), 64);
    }

    #[test]
    fn test_hash_binds_every_field() {
        let base = Block::with_timestamp(1, 42, "abc".into(), test_data("p-1"));

        assert_ne!(
            base.hash,
            Block::with_timestamp(2, 42, "abc".into(), test_data("p-1")).hash
        );
        assert_ne!(
            base.hash,
            Block::with_timestamp(1, 43, "abc".into(), test_data("p-1")).hash
        );
        assert_ne!(
            base.hash,
            Block::with_timestamp(1, 42, "abd".into(), test_data("p-1")).hash
        );
        assert_ne!(
            base.hash,
            Block::with_timestamp(1, 42, "abc".into(), test_data("p-2")).hash
        );
    }

    #[test]
    fn test_argument_order_does_not_change_hash() {
        let mut reversed = BTreeMap::new();
        reversed.insert("mode".to_string(), json!("overwrite"));
        reversed.insert("path".to_string(), json!("src/auth/login.rs"));
        let mut data = test_data("p-1");
        data.tool_arguments = reversed;

        let a = Block::with_timestamp(1, 42, "abc".into(), test_data("p-1"));
        let b = Block::with_timestamp(1, 42, "abc".into(), data);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn test_verify_link_valid() {
        let genesis = Block::genesis();
        let next = Block::new(1, genesis.hash.clone(), test_data("p-1"));

        assert!(next.verify_link(Some(&genesis)).is_ok());
    }

    #[test]
    fn test_verify_link_detects_payload_tamper() {
        let genesis = Block::genesis();
        let mut next = Block::new(1, genesis.hash.clone(), test_data("p-1"));
        next.data.decision.approved = false;

        assert!(matches!(
            next.verify_link(Some(&genesis)),
            Err(LedgerError::HashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_verify_link_missing_predecessor() {
        let block = Block::new(3, "abc".into(), test_data("p-1"));

        assert!(matches!(
            block.verify_link(None),
            Err(LedgerError::MissingPredecessor { index: 3 })
        ));
    }

    #[test]
    fn test_verify_link_prev_hash_mismatch() {
        let genesis = Block::genesis();
        let block = Block::new(1, "not-the-genesis".into(), test_data("p-1"));

        assert!(matches!(
            block.verify_link(Some(&genesis)),
            Err(LedgerError::PrevHashMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn test_verify_link_non_sequential() {
        let genesis = Block::genesis();
        let block = Block::new(2, genesis.hash.clone(), test_data("p-1"));

        assert!(matches!(
            block.verify_link(Some(&genesis)),
            Err(LedgerError::NonSequentialIndex {
                index: 2,
                predecessor: 0
            })
        ));
    }

    #[test]
    fn test_attach_is_unique_per_validator() {
        let block = Block::genesis();
        block.attach(Attestation::new("v1", "Validator One", "tag-a"));
        block.attach(Attestation::new("v2", "Validator Two", "tag-b"));
        block.attach(Attestation::new("v1", "Validator One", "tag-c"));

        let attestations = block.attestations();
        assert_eq!(attestations.len(), 2);
        assert_eq!(attestations[0].validator_id, "v1");
        assert_eq!(attestations[0].tag, "tag-c");
        assert_eq!(attestations[1].validator_id, "v2");
    }

    #[test]
    fn test_attestations_do_not_affect_hash() {
        let block = Block::genesis();
        block.attach(Attestation::new("v1", "Validator One", "tag-a"));

        assert!(block.verify_link(None).is_ok());
    }

    #[test]
    fn test_serialization_keeps_attestations() {
        let block = Block::new(1, "abc".into(), test_data("p-1"));
        block.attach(Attestation::new("v1", "Validator One", "tag-a"));

        let encoded = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, block);
        assert_eq!(decoded.attestation_count(), 1);
    }

    #[test]
    fn test_rejection_reason_omitted_when_absent() {
        let encoded = test_data("p-1").canonical_json();
        assert!(!encoded.contains("rejection_reason"));
    }
}
