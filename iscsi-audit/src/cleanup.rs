//! Removal of targets proven to have no backing data.
//!
//! Only targets whose dataset probe came back absent are touched. Each delete
//! is independent: a failure is recorded and the batch goes on, and nothing
//! already deleted is rolled back. A stop request is honored between deletes,
//! never in the middle of one.

use std::future::Future;
use std::pin::pin;

use futures::FutureExt;
use serde::Serialize;
use tracing::{info, instrument, warn};
use truenas_client::{StorageApi, TargetId};

use crate::audit::{BackingData, OrphanTarget};
use crate::metrics;

/// A target that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    pub id: TargetId,
    pub name: String,
    pub error: String,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupSummary {
    pub dry_run: bool,
    /// Targets handed to the cleanup
    pub attempted: usize,
    /// Targets deleted, or that would have been deleted in a dry run
    pub succeeded: usize,
    pub failures: Vec<CleanupFailure>,
    /// Targets left untouched because the run was stopped
    pub skipped: usize,
}

impl CleanupSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn interrupted(&self) -> bool {
        self.skipped > 0
    }
}

/// Delete each target in order with `force`, or only report it when
/// `dry_run` is set.
///
/// Targets whose backing data is not proven absent are refused without an API
/// call and counted as failures.
pub async fn cleanup_orphaned_targets<C: StorageApi>(
    client: &C,
    targets: &[OrphanTarget],
    dry_run: bool,
) -> CleanupSummary {
    cleanup_orphaned_targets_until(client, targets, dry_run, std::future::pending()).await
}

/// Like [`cleanup_orphaned_targets`], but stops before the next target once
/// `stop` completes. Remaining targets are counted in
/// [`CleanupSummary::skipped`].
#[instrument(skip(client, targets, stop), fields(count = targets.len()))]
pub async fn cleanup_orphaned_targets_until<C, F>(
    client: &C,
    targets: &[OrphanTarget],
    dry_run: bool,
    stop: F,
) -> CleanupSummary
where
    C: StorageApi,
    F: Future<Output = ()>,
{
    let mut stop = pin!(stop);
    let mut summary = CleanupSummary {
        dry_run,
        attempted: targets.len(),
        succeeded: 0,
        failures: Vec::new(),
        skipped: 0,
    };

    for (done, target) in targets.iter().enumerate() {
        if stop.as_mut().now_or_never().is_some() {
            summary.skipped = targets.len() - done;
            warn!(skipped = summary.skipped, "Cleanup stopped before completion");
            break;
        }

        if target.backing_data != BackingData::Absent {
            warn!(
                target_id = %target.id,
                name = %target.name,
                backing_data = ?target.backing_data,
                "Refusing to delete target with backing data not proven absent"
            );
            summary.failures.push(CleanupFailure {
                id: target.id,
                name: target.name.clone(),
                error: "backing data not proven absent".to_string(),
            });
            continue;
        }

        if dry_run {
            info!(target_id = %target.id, name = %target.name, "[DRY RUN] Would delete target");
            summary.succeeded += 1;
            continue;
        }

        info!(target_id = %target.id, name = %target.name, "Deleting target");
        match client.delete_target(target.id, true).await {
            Ok(()) => {
                info!(target_id = %target.id, "Target deleted");
                summary.succeeded += 1;
            }
            Err(e) => {
                warn!(target_id = %target.id, name = %target.name, error = %e, "Failed to delete target");
                summary.failures.push(CleanupFailure {
                    id: target.id,
                    name: target.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        dry_run,
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed(),
        skipped = summary.skipped,
        "Cleanup complete"
    );
    metrics::record_cleanup(&summary);
    summary
}
