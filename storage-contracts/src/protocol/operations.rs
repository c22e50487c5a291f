// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CommitId, StorageError};

/// One pending or executed action, as reported to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Commit sequence number assigned at planning time
    pub seq: u64,
    pub description: String,
    pub destructive: bool,
}

impl ActionRecord {
    pub fn new(seq: u64, description: impl Into<String>, destructive: bool) -> Self {
        Self {
            seq,
            description: description.into(),
            destructive,
        }
    }
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.seq, self.description)
    }
}

/// Outcome of a commit that ran every queued action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    pub commit_id: CommitId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub committed: Vec<ActionRecord>,
}

/// A commit that stopped on a failing action. Actions before it stay
/// applied; nothing is rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialCommit {
    pub committed: Vec<ActionRecord>,
    pub failed: ActionRecord,
    /// Queued actions discarded because they depended on the failed one
    /// or no longer apply without it
    pub dropped: Vec<ActionRecord>,
    /// Actions still queued for a later commit
    pub remaining: usize,
    pub cause: StorageError,
    /// Tool output explaining the failure, verbatim
    pub diagnostic: String,
}

impl fmt::Display for PartialCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "commit stopped at {} after {} action(s): {}",
            self.failed,
            self.committed.len(),
            self.cause
        )
    }
}
