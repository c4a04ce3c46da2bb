//! The append-only decision chain.
//!
//! The chain always holds the genesis block. New blocks are built and
//! verified against the tip under the write lock, so an invalid link is
//! never observable.

use crate::block::{Block, BlockData, BlockHash};
use crate::error::{LedgerError, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// On-disk ledger document.
#[derive(Debug, Deserialize)]
struct LedgerSnapshot {
    blocks: Vec<Block>,
}

#[derive(Serialize)]
struct LedgerSnapshotRef<'a> {
    blocks: Vec<&'a Block>,
}

/// Verifies an ordered block sequence, genesis first.
///
/// Returns the first integrity failure encountered.
pub fn verify_sequence<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Result<()> {
    let mut predecessor: Option<&Block> = None;
    let mut seen = false;

    for block in blocks {
        // Only the first block may be a genesis block.
        if let (Some(prev), true) = (predecessor, block.is_genesis()) {
            return Err(LedgerError::NonSequentialIndex {
                index: block.index,
                predecessor: prev.index,
            });
        }
        block.verify_link(predecessor)?;
        predecessor = Some(block);
        seen = true;
    }

    if !seen {
        return Err(LedgerError::NotFound("genesis block".into()));
    }
    Ok(())
}

// Non-empty: the genesis block is always present.
fn tip(blocks: &[Arc<Block>]) -> &Arc<Block> {
    &blocks[blocks.len() - 1]
}

/// The decision chain.
#[derive(Debug)]
pub struct Blockchain {
    blocks: RwLock<Vec<Arc<Block>>>,
    // Held for the whole of a save so a newer snapshot is never replaced by an older one.
    save_lock: Mutex<()>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a chain holding only a fresh genesis block.
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(vec![Arc::new(Block::genesis())]),
            save_lock: Mutex::new(()),
        }
    }

    /// Rebuilds a chain from stored blocks, verifying every link first.
    pub fn restore(blocks: Vec<Block>) -> Result<Self> {
        verify_sequence(&blocks)?;
        Ok(Self {
            blocks: RwLock::new(blocks.into_iter().map(Arc::new).collect()),
            save_lock: Mutex::new(()),
        })
    }

    /// Appends a new block carrying `data` to the tip.
    pub fn append(&self, data: BlockData) -> Result<Arc<Block>> {
        let mut blocks = self.blocks.write();
        let last = tip(&blocks).clone();

        let block = Block::new(last.index + 1, last.hash.clone(), data);
        block
            .verify_link(Some(&last))
            .map_err(|e| LedgerError::BlockVerificationFailed(Box::new(e)))?;

        let block = Arc::new(block);
        blocks.push(block.clone());

        tracing::info!(
            index = block.index,
            hash = %block.hash.short(),
            proposal_id = %block.data.proposal_id,
            tool = %block.data.tool_name,
            "block appended"
        );

        Ok(block)
    }

    /// Returns the chain tip.
    pub fn latest(&self) -> Arc<Block> {
        tip(&self.blocks.read()).clone()
    }

    /// Returns the tip hash.
    pub fn chain_hash(&self) -> BlockHash {
        self.latest().hash.clone()
    }

    /// Gets a block by index.
    pub fn get(&self, index: u64) -> Result<Arc<Block>> {
        let blocks = self.blocks.read();
        usize::try_from(index)
            .ok()
            .and_then(|i| blocks.get(i))
            .cloned()
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                len: blocks.len(),
            })
    }

    /// Gets a block by hash.
    pub fn get_by_hash(&self, hash: &str) -> Result<Arc<Block>> {
        self.blocks
            .read()
            .iter()
            .find(|b| b.hash.as_str() == hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("block with hash {}", hash)))
    }

    /// Returns every block recording `proposal_id`, in chain order.
    ///
    /// A proposal can be recorded more than once (for example after a
    /// resubmission).
    pub fn find_by_proposal_id(&self, proposal_id: &str) -> Result<Vec<Arc<Block>>> {
        let found: Vec<_> = self
            .blocks
            .read()
            .iter()
            .filter(|b| b.data.proposal_id == proposal_id)
            .cloned()
            .collect();

        if found.is_empty() {
            return Err(LedgerError::NotFound(format!(
                "blocks for proposal {}",
                proposal_id
            )));
        }
        Ok(found)
    }

    /// Verifies every block and link in the chain.
    pub fn verify_all(&self) -> Result<()> {
        let blocks = self.blocks.read();
        let result = verify_sequence(blocks.iter().map(|b| b.as_ref()));

        if let Err(ref e) = result {
            tracing::error!(error = %e, index = ?e.block_index(), "chain verification failed");
        }
        result
    }

    /// Returns the number of blocks, genesis included.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Always false: the genesis block is mandatory.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    /// Returns a snapshot of the full block sequence.
    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.read().clone()
    }

    /// Overwrites the block at `index` without any verification.
    ///
    /// Only for tests that need a damaged in-memory chain.
    #[cfg(any(test, feature = "test-util"))]
    pub fn replace_block_unchecked(&self, index: usize, block: Block) {
        self.blocks.write()[index] = Arc::new(block);
    }

    /// Writes the chain to `path`.
    ///
    /// The document is written to a uniquely named temporary file in the same
    /// directory, synced, and renamed over `path`, so a crash never leaves a
    /// partial ledger behind. Concurrent saves are serialized.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _guard = self.save_lock.lock();

        let (content, length) = {
            let blocks = self.blocks.read();
            let snapshot = LedgerSnapshotRef {
                blocks: blocks.iter().map(|b| b.as_ref()).collect(),
            };
            (serde_json::to_vec_pretty(&snapshot)?, blocks.len())
        };

        let parent = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(&content)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;

        tracing::info!(path = %path.display(), length, "ledger snapshot saved");
        Ok(())
    }

    /// Loads a chain from `path`.
    ///
    /// A missing file yields a fresh genesis-only chain. A file that cannot
    /// be decoded or fails verification is reported as
    /// [`LedgerError::CorruptLedger`].
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "no ledger snapshot, starting from genesis");
            return Ok(Self::new());
        }

        let content = std::fs::read(path)?;
        let corrupt = |source: LedgerError| LedgerError::CorruptLedger {
            path: path.to_path_buf(),
            source: Box::new(source),
        };

        let snapshot: LedgerSnapshot =
            serde_json::from_slice(&content).map_err(|e| corrupt(e.into()))?;
        let chain = Self::restore(snapshot.blocks).map_err(corrupt)?;

        tracing::info!(path = %path.display(), length = chain.len(), "ledger snapshot loaded");
        Ok(chain)
    }
}
