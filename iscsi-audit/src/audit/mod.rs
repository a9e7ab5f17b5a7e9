//! iSCSI consistency audit.
//!
//! Fetches targets, extents and associations (fatal on failure) and sessions
//! (degrades to "no sessions"), indexes them, probes the datasets and zvols
//! that decide whether a resource is safe to delete, and classifies everything
//! into an [`AuditResult`].
//!
//! All remote calls are made one after another, except existence probes when
//! the configuration allows more than one in flight.

pub mod classify;
pub mod error;
pub mod index;
pub mod probe;
pub mod result;
pub mod sessions;

use tracing::{info, instrument, warn};
use truenas_client::{Association, Extent, StorageApi, Target};

pub use classify::classify;
pub use error::{AuditError, Result};
pub use index::ResourceIndex;
pub use result::{
    AuditResult, AuditWarning, BackingData, ExtentInfo, IdleTarget, Inventory, OrphanTarget,
};
pub use sessions::SessionCounts;

use crate::config::AuditConfig;
use crate::metrics;

/// The three lists every audit needs.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub targets: Vec<Target>,
    pub extents: Vec<Extent>,
    pub associations: Vec<Association>,
}

/// Fetch targets, extents and associations, in that order.
pub async fn fetch_snapshot<C: StorageApi>(client: &C) -> Result<Snapshot> {
    info!("Fetching iSCSI targets");
    let targets = client
        .list_targets()
        .await
        .map_err(|source| AuditError::Fetch {
            resource: "targets",
            source,
        })?;
    info!(count = targets.len(), "Fetched targets");

    info!("Fetching iSCSI extents");
    let extents = client
        .list_extents()
        .await
        .map_err(|source| AuditError::Fetch {
            resource: "extents",
            source,
        })?;
    info!(count = extents.len(), "Fetched extents");

    info!("Fetching target-extent associations");
    let associations = client
        .list_associations()
        .await
        .map_err(|source| AuditError::Fetch {
            resource: "associations",
            source,
        })?;
    info!(count = associations.len(), "Fetched associations");

    Ok(Snapshot {
        targets,
        extents,
        associations,
    })
}

/// Run a complete audit against the appliance.
///
/// Only a failure to fetch targets, extents or associations is an error.
/// Session and probe failures end up in [`AuditResult::warnings`].
#[instrument(skip(client, config), fields(parent = %config.parent_dataset()))]
pub async fn run_audit<C: StorageApi>(client: &C, config: &AuditConfig) -> Result<AuditResult> {
    let snapshot = fetch_snapshot(client).await?;
    let index = ResourceIndex::build(
        &snapshot.targets,
        &snapshot.extents,
        &snapshot.associations,
    );

    let mut warnings = Vec::new();

    info!("Fetching active iSCSI sessions");
    let sessions = match client.list_sessions().await {
        Ok(records) => {
            let counts = SessionCounts::resolve(&records, &index);
            info!(
                sessions = records.len(),
                targets = counts.targets_with_sessions(),
                unresolved = counts.unresolved(),
                "Resolved sessions"
            );
            counts
        }
        Err(e) => {
            warn!(error = %e, "Failed to get sessions, continuing without them");
            warnings.push(AuditWarning::SessionsUnavailable {
                error: e.to_string(),
            });
            SessionCounts::default()
        }
    };

    info!("Checking datasets of targets without extents");
    let datasets = probe::probe_datasets(client, config, index.targets_without_extent()).await;

    info!("Checking zvols of disk extents");
    let volumes = probe::probe_volumes(client, config, index.extents()).await;

    let mut result = classify(&index, &sessions, datasets, volumes, warnings);
    result.inventory = Inventory {
        targets: snapshot.targets.len(),
        extents: snapshot.extents.len(),
        associations: snapshot.associations.len(),
        sessions: sessions.resolved(),
    };

    info!(
        issues = result.issue_count(),
        warnings = result.warnings.len(),
        "Audit complete"
    );
    metrics::record_audit(&result);
    Ok(result)
}
