//! Validator registry.
//!
//! Validators attest to blocks awaiting quorum. Records are never removed:
//! deactivation flips the status so historical attestations stay
//! attributable.

use crate::block::{unix_now, BlockHash};
use crate::error::{LedgerError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Whether a validator currently participates in quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorStatus {
    /// Counted towards quorum and allowed to attest.
    Active,
    /// Soft-deleted; kept for attribution only.
    Inactive,
}

/// A registered attestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Stable identifier.
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Optional public key material (hex or PEM), reported but not used by
    /// the default tag scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Participation status.
    pub status: ValidatorStatus,

    /// Registration time (unix seconds).
    pub registered_at: i64,
}

impl Validator {
    /// Creates a new active validator.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            public_key: None,
            status: ValidatorStatus::Active,
            registered_at: unix_now(),
        }
    }

    /// Sets the public key material.
    pub fn with_public_key(mut self, public_key: impl Into<String>) -> Self {
        self.public_key = Some(public_key.into());
        self
    }

    /// Returns true if the validator is active.
    pub fn is_active(&self) -> bool {
        self.status == ValidatorStatus::Active
    }
}

/// Produces and checks attestation tags.
///
/// Implementations must be deterministic: the same validator and block hash
/// always yield the same tag, and a tag for one block hash must not verify
/// for another.
pub trait AttestationScheme: Send + Sync {
    /// Short scheme identifier.
    fn name(&self) -> &'static str;

    /// Computes `validator`'s tag for `block_hash`.
    fn compute_tag(&self, validator: &Validator, block_hash: &BlockHash) -> String;

    /// Checks `tag` against `validator` and `block_hash`.
    fn verify_tag(&self, validator: &Validator, block_hash: &BlockHash, tag: &str) -> bool {
        self.compute_tag(validator, block_hash) == tag
    }
}

/// Default tag scheme: `hex(sha256(validator_id || block_hash))`.
///
/// This proves knowledge of the validator id only; it is not a signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestTagScheme;

impl AttestationScheme for DigestTagScheme {
    fn name(&self) -> &'static str {
        "sha256-digest"
    }

    fn compute_tag(&self, validator: &Validator, block_hash: &BlockHash) -> String {
        let mut hasher = Sha256::new();
        hasher.update(validator.id.as_bytes());
        hasher.update(block_hash.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Returns the quorum size for `active` validators: `floor(2n/3) + 1`.
///
/// With no active validators this is 1, so nothing can finalize until a
/// validator is registered.
pub fn quorum_size_for(active: usize) -> usize {
    active * 2 / 3 + 1
}

/// Registry of all validators ever registered.
pub struct ValidatorRegistry {
    validators: RwLock<HashMap<String, Validator>>,
    scheme: Box<dyn AttestationScheme>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorRegistry")
            .field("validators", &self.validators.read().len())
            .field("scheme", &self.scheme.name())
            .finish()
    }
}

impl ValidatorRegistry {
    /// Creates an empty registry using [`DigestTagScheme`].
    pub fn new() -> Self {
        Self::with_scheme(DigestTagScheme)
    }

    /// Creates an empty registry with a custom tag scheme.
    pub fn with_scheme(scheme: impl AttestationScheme + 'static) -> Self {
        Self {
            validators: RwLock::new(HashMap::new()),
            scheme: Box::new(scheme),
        }
    }

    /// Returns the name of the tag scheme in use.
    pub fn scheme_name(&self) -> &'static str {
        self.scheme.name()
    }

    /// Registers a validator. It is always stored as active.
    pub fn add(&self, mut validator: Validator) -> Result<()> {
        if validator.id.trim().is_empty() {
            return Err(LedgerError::EmptyIdentifier);
        }

        let mut validators = self.validators.write();
        if validators.contains_key(&validator.id) {
            return Err(LedgerError::DuplicateValidator(validator.id));
        }

        validator.status = ValidatorStatus::Active;
        tracing::info!(
            validator_id = %validator.id,
            name = %validator.name,
            "validator registered"
        );
        validators.insert(validator.id.clone(), validator);
        Ok(())
    }

    /// Deactivates a validator. The record is kept.
    pub fn deactivate(&self, id: &str) -> Result<()> {
        let mut validators = self.validators.write();
        let validator = validators
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownValidator(id.to_string()))?;

        validator.status = ValidatorStatus::Inactive;
        tracing::info!(validator_id = %id, "validator deactivated");
        Ok(())
    }

    /// Gets a validator by id.
    pub fn get(&self, id: &str) -> Result<Validator> {
        self.validators
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownValidator(id.to_string()))
    }

    /// Returns true if `id` names an active validator.
    pub fn is_active(&self, id: &str) -> bool {
        self.validators
            .read()
            .get(id)
            .map(Validator::is_active)
            .unwrap_or(false)
    }

    /// Returns a snapshot of the active validators, ordered by id.
    pub fn list_active(&self) -> Vec<Validator> {
        let mut active: Vec<_> = self
            .validators
            .read()
            .values()
            .filter(|v| v.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    /// Returns a snapshot of every validator, ordered by id.
    pub fn list_all(&self) -> Vec<Validator> {
        let mut all: Vec<_> = self.validators.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Returns the number of active validators.
    pub fn active_count(&self) -> usize {
        self.validators
            .read()
            .values()
            .filter(|v| v.is_active())
            .count()
    }

    /// Returns how many of `ids` name active validators.
    pub fn count_active<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let validators = self.validators.read();
        ids.into_iter()
            .filter(|id| validators.get(*id).map(Validator::is_active).unwrap_or(false))
            .count()
    }

    /// Returns the current quorum size.
    pub fn quorum_size(&self) -> usize {
        quorum_size_for(self.active_count())
    }

    /// Computes the tag validator `id` would produce for `block_hash`.
    pub fn compute_tag(&self, id: &str, block_hash: &BlockHash) -> Result<String> {
        let validators = self.validators.read();
        let validator = validators
            .get(id)
            .ok_or_else(|| LedgerError::UnknownValidator(id.to_string()))?;
        Ok(self.scheme.compute_tag(validator, block_hash))
    }

    /// Checks `tag` for validator `id` and `block_hash`. Unknown validators
    /// never verify.
    pub fn verify_tag(&self, id: &str, block_hash: &BlockHash, tag: &str) -> bool {
        self.validators
            .read()
            .get(id)
            .map(|v| self.scheme.verify_tag(v, block_hash, tag))
            .unwrap_or(false)
    }
}
