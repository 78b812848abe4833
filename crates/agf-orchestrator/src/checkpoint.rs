// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable checkpoint journal.
//!
//! Append-only, keyed `(conversation_id, sequence)`. A node's checkpoint
//! must be durable before the node's result is externally observable; crash
//! recovery loads the highest sequence per conversation and re-enters the
//! workflow at the next node.

use crate::state::ConversationState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// One durable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Conversation this snapshot belongs to.
    pub conversation_id: String,
    /// Strictly monotonic per conversation, starting at 1.
    pub sequence: u64,
    /// The full state after the node completed.
    pub state: ConversationState,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// Errors from journal operations.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The journal could not be written durably.
    #[error("checkpoint write failed for conversation '{conversation_id}'")]
    WriteFailed {
        /// Conversation whose write failed.
        conversation_id: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A journal line could not be parsed.
    #[error("checkpoint journal corrupt for conversation '{conversation_id}': {detail}")]
    Corrupt {
        /// Conversation whose journal is corrupt.
        conversation_id: String,
        /// Parse detail.
        detail: String,
    },
    /// The journal directory could not be scanned.
    #[error("checkpoint journal scan failed")]
    ScanFailed {
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Abstract journal so tests can run in memory and production on disk.
pub trait CheckpointJournal: Send + Sync {
    /// Append a snapshot of `state`, returning the assigned sequence.
    ///
    /// The write is durable when this returns.
    ///
    /// # Errors
    ///
    /// [`JournalError::WriteFailed`] when durability cannot be guaranteed.
    fn append(&self, state: &ConversationState) -> Result<u64, JournalError>;

    /// The highest-sequence checkpoint for `conversation_id`, if any.
    ///
    /// # Errors
    ///
    /// [`JournalError::Corrupt`] when a stored line fails to parse.
    fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, JournalError>;

    /// Conversation ids whose latest checkpointed state is not terminal.
    ///
    /// # Errors
    ///
    /// [`JournalError::ScanFailed`] when the store cannot be enumerated.
    fn unterminated(&self) -> Result<Vec<String>, JournalError>;
}

// ---------------------------------------------------------------------------
// FileJournal
// ---------------------------------------------------------------------------

/// File-backed journal: one JSONL file per conversation, fsync per append.
#[derive(Debug)]
pub struct FileJournal {
    root: PathBuf,
    // Serializes appends per process; cross-process writers coordinate
    // per-key by convention (single writer per conversation).
    write_lock: Mutex<()>,
}

impl FileJournal {
    /// A journal rooted at `root` (created on first append).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, conversation_id: &str) -> PathBuf {
        // Conversation ids are caller-controlled; keep filenames tame.
        let safe: String = conversation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{safe}.jsonl"))
    }

    fn read_lines(&self, conversation_id: &str) -> Result<Vec<Checkpoint>, JournalError> {
        let path = self.path_for(conversation_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(JournalError::WriteFailed {
                    conversation_id: conversation_id.to_string(),
                    source: e,
                });
            }
        };
        content
            .lines()
            .map(|line| {
                serde_json::from_str::<Checkpoint>(line).map_err(|e| JournalError::Corrupt {
                    conversation_id: conversation_id.to_string(),
                    detail: e.to_string(),
                })
            })
            .collect()
    }
}

impl CheckpointJournal for FileJournal {
    fn append(&self, state: &ConversationState) -> Result<u64, JournalError> {
        let _guard = self.write_lock.lock().expect("journal lock poisoned");
        let io_err = |source| JournalError::WriteFailed {
            conversation_id: state.conversation_id.clone(),
            source,
        };

        let sequence = self
            .read_lines(&state.conversation_id)?
            .last()
            .map_or(1, |c| c.sequence + 1);
        let checkpoint = Checkpoint {
            conversation_id: state.conversation_id.clone(),
            sequence,
            state: state.clone(),
            created_at: Utc::now(),
        };

        std::fs::create_dir_all(&self.root).map_err(io_err)?;
        let json = serde_json::to_string(&checkpoint).map_err(|e| JournalError::Corrupt {
            conversation_id: state.conversation_id.clone(),
            detail: e.to_string(),
        })?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&state.conversation_id))
            .map_err(io_err)?;
        writeln!(file, "{json}").map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(sequence)
    }

    fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, JournalError> {
        Ok(self.read_lines(conversation_id)?.into_iter().next_back())
    }

    fn unterminated(&self) -> Result<Vec<String>, JournalError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(JournalError::ScanFailed { source: e }),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| JournalError::ScanFailed { source: e })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(checkpoint) = self.latest(stem)?
                && !checkpoint.state.is_terminal()
            {
                ids.push(checkpoint.state.conversation_id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// MemoryJournal
// ---------------------------------------------------------------------------

/// In-memory journal for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    checkpoints: Mutex<BTreeMap<String, Vec<Checkpoint>>>,
}

impl MemoryJournal {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointJournal for MemoryJournal {
    fn append(&self, state: &ConversationState) -> Result<u64, JournalError> {
        let mut map = self.checkpoints.lock().expect("journal lock poisoned");
        let entry = map.entry(state.conversation_id.clone()).or_default();
        let sequence = entry.last().map_or(1, |c| c.sequence + 1);
        entry.push(Checkpoint {
            conversation_id: state.conversation_id.clone(),
            sequence,
            state: state.clone(),
            created_at: Utc::now(),
        });
        Ok(sequence)
    }

    fn latest(&self, conversation_id: &str) -> Result<Option<Checkpoint>, JournalError> {
        Ok(self
            .checkpoints
            .lock()
            .expect("journal lock poisoned")
            .get(conversation_id)
            .and_then(|v| v.last().cloned()))
    }

    fn unterminated(&self) -> Result<Vec<String>, JournalError> {
        Ok(self
            .checkpoints
            .lock()
            .expect("journal lock poisoned")
            .iter()
            .filter(|(_, v)| v.last().is_some_and(|c| !c.state.is_terminal()))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
