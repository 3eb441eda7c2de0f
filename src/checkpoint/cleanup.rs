// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Checkpoint Cleanup Policy
//!
//! Defines TTL-based cleanup rules for checkpoint data in S5 storage.
//!
//! ## Cleanup Policy
//! | Session State     | TTL           |
//! |------------------|---------------|
//! | Active           | Never         |
//! | Completed        | 7 days        |
//! | Timed Out        | 30 days       |
//! | Cancelled        | Immediate     |
//! | Dispute Open     | Until resolved + 7 days |

use crate::checkpoint::error::CheckpointResult;
use crate::checkpoint::index::{CheckpointIndex, SessionState};
use crate::storage::{S5Storage, StorageError};
use std::time::Duration;
use tracing::{info, warn};

/// TTL for completed sessions (7 days)
pub const TTL_COMPLETED: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// TTL for timed out sessions (30 days)
pub const TTL_TIMED_OUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// TTL for cancelled sessions (immediate deletion)
pub const TTL_CANCELLED: Duration = Duration::ZERO;

/// Grace period after dispute resolution (7 days)
pub const TTL_DISPUTE_GRACE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub completed_ttl: Duration,
    pub timed_out_ttl: Duration,
    pub delete_cancelled_immediately: bool,
    pub dispute_grace_period: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            completed_ttl: TTL_COMPLETED,
            timed_out_ttl: TTL_TIMED_OUT,
            delete_cancelled_immediately: true,
            dispute_grace_period: TTL_DISPUTE_GRACE,
        }
    }
}

impl CleanupConfig {
    /// Get TTL for a given session state
    pub fn ttl_for_state(&self, state: &SessionState) -> Option<Duration> {
        match state {
            SessionState::Active => None,
            SessionState::Completed => Some(self.completed_ttl),
            SessionState::TimedOut => Some(self.timed_out_ttl),
            SessionState::Cancelled => {
                if self.delete_cancelled_immediately {
                    Some(TTL_CANCELLED)
                } else {
                    Some(self.completed_ttl)
                }
            }
        }
    }

    /// Check if a session should be cleaned up
    pub fn should_cleanup(&self, state: &SessionState, age: Duration) -> bool {
        match self.ttl_for_state(state) {
            Some(ttl) => age >= ttl,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeStatus {
    Open,
    /// Resolved at the given unix time (ms)
    Resolved { at: u64 },
}

/// Cleanup task for background execution
#[derive(Debug, Clone)]
pub struct CleanupTask {
    pub session_id: String,
    pub host_address: String,
    /// When the session ended (unix ms)
    pub ended_at: u64,
    pub state: SessionState,
    pub dispute: Option<DisputeStatus>,
}

impl CleanupTask {
    pub fn new(session_id: String, host_address: String, ended_at: u64, state: SessionState) -> Self {
        Self {
            session_id,
            host_address: host_address.to_lowercase(),
            ended_at,
            state,
            dispute: None,
        }
    }

    pub fn with_dispute(mut self, dispute: DisputeStatus) -> Self {
        self.dispute = Some(dispute);
        self
    }

    /// Whether the data may be deleted at `now` (unix ms)
    pub fn is_due(&self, now: u64, config: &CleanupConfig) -> bool {
        match self.dispute {
            Some(DisputeStatus::Open) => return false,
            Some(DisputeStatus::Resolved { at }) => {
                let since_resolution = Duration::from_millis(now.saturating_sub(at));
                if since_resolution < config.dispute_grace_period {
                    return false;
                }
            }
            None => {}
        }

        let age = Duration::from_millis(now.saturating_sub(self.ended_at));
        config.should_cleanup(&self.state, age)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupResult {
    pub session_id: String,
    /// Not yet due under the retention policy; nothing was touched
    pub skipped: bool,
    pub deltas_deleted: u32,
    /// Objects that were already gone
    pub already_missing: u32,
    pub index_deleted: bool,
}

// NotFound counts as already deleted
async fn delete_if_present(
    storage: &dyn S5Storage,
    path: &str,
) -> Result<bool, StorageError> {
    match storage.delete(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete every delta referenced by the session index, then the index
///
/// Also removes an orphan delta left at the next index by a failed index
/// update. Returns early without deleting anything when the task is not due.
pub async fn cleanup_checkpoints(
    storage: &dyn S5Storage,
    task: &CleanupTask,
    now: u64,
    config: &CleanupConfig,
) -> CheckpointResult<CleanupResult> {
    let mut result = CleanupResult {
        session_id: task.session_id.clone(),
        ..Default::default()
    };

    if !task.is_due(now, config) {
        result.skipped = true;
        return Ok(result);
    }

    let index_path = CheckpointIndex::storage_path(&task.host_address, &task.session_id);
    let next_index = match storage.get(&index_path).await {
        Ok(bytes) => {
            let index = CheckpointIndex::from_json_bytes(&bytes)?;
            for entry in &index.checkpoints {
                let path =
                    CheckpointIndex::delta_path(&task.host_address, &task.session_id, entry.index);
                if delete_if_present(storage, &path).await? {
                    result.deltas_deleted += 1;
                } else {
                    result.already_missing += 1;
                }
            }
            index.next_checkpoint_index()
        }
        Err(e) if e.is_not_found() => {
            warn!(
                "🧹 [CLEANUP] No index for session {} (host {}), checking for orphan delta",
                task.session_id, task.host_address
            );
            0
        }
        Err(e) => return Err(e.into()),
    };

    let orphan_path = CheckpointIndex::delta_path(&task.host_address, &task.session_id, next_index);
    if delete_if_present(storage, &orphan_path).await? {
        result.deltas_deleted += 1;
    }

    result.index_deleted = delete_if_present(storage, &index_path).await?;

    info!(
        "🧹 [CLEANUP] Session {} ({:?}): {} deltas deleted, {} already missing, index deleted={}",
        task.session_id,
        task.state,
        result.deltas_deleted,
        result.already_missing,
        result.index_deleted
    );

    Ok(result)
}
