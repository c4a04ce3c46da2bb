//! File mailbox for decision payloads.
//!
//! Producers drop `payload_<anything>.json` files holding a decision record
//! into the mailbox directory. Each poll submits every waiting payload:
//!
//! - finalized: `res_<checkpoint_id>.json` is written and the payload removed
//! - pending: the payload is renamed to `*.submitted` so it is never
//!   recorded twice
//! - unreadable or incomplete: renamed to `*.rejected`
//! - refused by the ledger: renamed to `*.failed`

use authchain_ledger::{DecisionRecord, DecisionStatus, LedgerError, LedgerService};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

const PAYLOAD_PREFIX: &str = "payload_";
const PAYLOAD_SUFFIX: &str = ".json";

/// Mailbox errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid payload: {0}")]
    Invalid(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Response written for a finalized decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxResponse {
    pub approved: bool,
    pub proposal_id: String,
    pub checkpoint_id: String,
    pub block_hash: String,
    pub block_index: u64,
    pub timestamp: i64,
}

/// What happened to one payload file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadOutcome {
    /// Finalized; the response file was written.
    Finalized { response: PathBuf },
    /// Recorded but awaiting quorum.
    Pending { collected: usize, required: usize },
    /// Could not be parsed or was incomplete.
    Rejected { reason: String },
    /// The ledger refused it.
    Failed { reason: String },
}

/// Polls a directory for decision payloads.
pub struct MailboxWatcher {
    ledger: Arc<LedgerService>,
    dir: PathBuf,
    poll_interval: Duration,
}

impl MailboxWatcher {
    /// Creates a watcher over `dir`.
    pub fn new(ledger: Arc<LedgerService>, dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            ledger,
            dir: dir.into(),
            poll_interval,
        }
    }

    /// Returns the watched directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Polls until the task is aborted.
    pub async fn run(self) -> Result<(), MailboxError> {
        std::fs::create_dir_all(&self.dir)?;
        info!(
            dir = %self.dir.display(),
            poll_ms = self.poll_interval.as_millis() as u64,
            "Mailbox watcher started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.poll_once() {
                error!(dir = %self.dir.display(), error = %e, "mailbox scan failed");
            }
        }
    }

    /// Processes every waiting payload once, in name order.
    pub fn poll_once(&self) -> Result<Vec<(PathBuf, PayloadOutcome)>, MailboxError> {
        let mut payloads: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_payload(path))
            .collect();
        payloads.sort();

        let mut outcomes = Vec::with_capacity(payloads.len());
        for path in payloads {
            match self.handle_payload(&path) {
                Ok(outcome) => outcomes.push((path, outcome)),
                Err(e) => error!(file = %path.display(), error = %e, "failed to handle payload"),
            }
        }
        Ok(outcomes)
    }

    fn handle_payload(&self, path: &Path) -> Result<PayloadOutcome, MailboxError> {
        let record = match read_record(path) {
            Ok(record) => record,
            Err(MailboxError::Io(e)) => return Err(MailboxError::Io(e)),
            Err(e) => {
                let reason = e.to_string();
                warn!(file = %path.display(), reason = %reason, "rejecting payload");
                set_aside(path, "rejected")?;
                return Ok(PayloadOutcome::Rejected { reason });
            }
        };

        debug!(
            file = %path.display(),
            proposal_id = %record.proposal_id,
            "mailbox payload received"
        );

        let outcome = match self.ledger.submit_decision(record) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(file = %path.display(), error = %e, "ledger refused payload");
                set_aside(path, "failed")?;
                return Ok(PayloadOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        };

        match outcome.status {
            DecisionStatus::Finalized => {
                let data = &outcome.block.data;
                let response = MailboxResponse {
                    approved: data.decision.approved,
                    proposal_id: data.proposal_id.clone(),
                    checkpoint_id: data.checkpoint_id.clone(),
                    block_hash: outcome.block.hash.to_string(),
                    block_index: outcome.block.index,
                    timestamp: crate::unix_now(),
                };
                let response_path = self.dir.join(format!("res_{}.json", data.checkpoint_id));
                write_atomic(&response_path, &serde_json::to_vec_pretty(&response)?)?;
                std::fs::remove_file(path)?;

                info!(
                    file = %response_path.display(),
                    index = outcome.block.index,
                    "mailbox response written"
                );
                Ok(PayloadOutcome::Finalized {
                    response: response_path,
                })
            }
            DecisionStatus::Pending {
                collected,
                required,
            } => {
                set_aside(path, "submitted")?;
                info!(
                    file = %path.display(),
                    index = outcome.block.index,
                    collected,
                    required,
                    "mailbox payload awaiting quorum"
                );
                Ok(PayloadOutcome::Pending {
                    collected,
                    required,
                })
            }
        }
    }
}

fn is_payload(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(PAYLOAD_PREFIX) && n.ends_with(PAYLOAD_SUFFIX))
}

fn read_record(path: &Path) -> Result<DecisionRecord, MailboxError> {
    let content = std::fs::read(path)?;
    let record: DecisionRecord = serde_json::from_slice(&content)?;

    if let Some(field) = record.missing_field() {
        return Err(MailboxError::Invalid(format!("{} is required", field)));
    }
    // The checkpoint id names the response file.
    if record
        .checkpoint_id
        .contains(|c: char| c == '/' || c == '\\' || c == '\0')
        || record.checkpoint_id.contains("..")
    {
        return Err(MailboxError::Invalid(format!(
            "checkpoint_id {:?} is not a valid file name",
            record.checkpoint_id
        )));
    }
    Ok(record)
}

/// Renames `payload_x.json` to `payload_x.json.<suffix>`.
fn set_aside(path: &Path, suffix: &str) -> Result<PathBuf, MailboxError> {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    let target = PathBuf::from(name);
    std::fs::rename(path, &target)?;
    Ok(target)
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<(), MailboxError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authchain_ledger::ConsensusConfig;
    use serde_json::json;

    fn payload(proposal: &str, checkpoint: &str) -> serde_json::Value {
        json!({
            "proposal_id": proposal,
            "checkpoint_id": checkpoint,
            "tool_name": "write_file",
            "tool_arguments": {"path": "README.md"},
            "reasoning_summary": "docs update",
            "decision": {"approved": true, "decision_by": "bob", "timestamp": 1_700_000_000},
            "priority_result": {"tier": "medium", "requires_approval": true, "reason": "repo write"},
            "timestamp": 1_700_000_000
        })
    }

    fn write_payload(dir: &Path, name: &str, value: &serde_json::Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec(value).unwrap()).unwrap();
        path
    }

    fn watcher(dir: &Path, validators: &[&str]) -> MailboxWatcher {
        let ledger = Arc::new(LedgerService::in_memory(ConsensusConfig::default()));
        for id in validators {
            ledger.add_validator(id, id, None).unwrap();
        }
        MailboxWatcher::new(ledger, dir, Duration::from_millis(500))
    }

    #[test]
    fn test_finalized_payload_writes_response() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &["v1", "v2"]);
        let payload_path = write_payload(dir.path(), "payload_p1.json", &payload("p1", "cp-1"));

        let outcomes = watcher.poll_once().unwrap();
        assert_eq!(outcomes.len(), 1);

        let response_path = dir.path().join("res_cp-1.json");
        assert_eq!(
            outcomes[0].1,
            PayloadOutcome::Finalized {
                response: response_path.clone()
            }
        );
        assert!(!payload_path.exists());

        let response: MailboxResponse =
            serde_json::from_slice(&std::fs::read(&response_path).unwrap()).unwrap();
        assert!(response.approved);
        assert_eq!(response.proposal_id, "p1");
        assert_eq!(response.block_index, 1);

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("res_cp-1.json")]);
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res_cp-1.json");
        std::fs::write(&path, b"old").unwrap();

        write_atomic(&path, b"new").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_pending_payload_is_not_resubmitted() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &[]);
        let payload_path = write_payload(dir.path(), "payload_p1.json", &payload("p1", "cp-1"));

        let outcomes = watcher.poll_once().unwrap();
        assert_eq!(
            outcomes[0].1,
            PayloadOutcome::Pending {
                collected: 0,
                required: 1
            }
        );
        assert!(!payload_path.exists());
        assert!(dir.path().join("payload_p1.json.submitted").exists());

        assert!(watcher.poll_once().unwrap().is_empty());
        assert_eq!(watcher.ledger.chain().len(), 2);
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &["v1"]);
        std::fs::write(dir.path().join("payload_bad.json"), b"{ nope").unwrap();

        let mut incomplete = payload("p2", "cp-2");
        incomplete["tool_name"] = json!("");
        write_payload(dir.path(), "payload_incomplete.json", &incomplete);

        let outcomes = watcher.poll_once().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, PayloadOutcome::Rejected { .. })));
        assert!(dir.path().join("payload_bad.json.rejected").exists());
        assert_eq!(watcher.ledger.chain().len(), 1);
    }

    #[test]
    fn test_checkpoint_cannot_escape_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &["v1"]);
        write_payload(
            dir.path(),
            "payload_escape.json",
            &payload("p3", "../../etc/passwd"),
        );

        let outcomes = watcher.poll_once().unwrap();
        assert!(matches!(outcomes[0].1, PayloadOutcome::Rejected { .. }));
    }

    #[test]
    fn test_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &["v1"]);
        std::fs::write(dir.path().join("res_old.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("payload_p.txt"), b"{}").unwrap();

        assert!(watcher.poll_once().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = watcher(dir.path(), &["v1"]);
        let ledger = watcher.ledger.clone();
        let handle = tokio::spawn(watcher.run());

        write_payload(dir.path(), "payload_p1.json", &payload("p1", "cp-1"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(dir.path().join("res_cp-1.json").exists());
        assert_eq!(ledger.chain().len(), 2);
        handle.abort();
    }
}
