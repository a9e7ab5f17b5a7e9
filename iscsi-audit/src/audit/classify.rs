//! Partitioning of the snapshot into audit categories.

use truenas_client::{Extent, Target};

use super::index::ResourceIndex;
use super::probe::{ProbeError, ProbeResult};
use super::result::{
    AuditResult, AuditWarning, BackingData, ExtentInfo, IdleTarget, OrphanTarget,
};
use super::sessions::SessionCounts;

/// Dataset probe outcome per extent-less target.
pub type DatasetProbes<'a> = Vec<(&'a Target, Result<ProbeResult, ProbeError>)>;

/// Zvol probe outcome per zvol-backed extent.
pub type VolumeProbes<'a> = Vec<(&'a Extent, Result<ProbeResult, ProbeError>)>;

/// Combine indices, session counts and probe outcomes into an [`AuditResult`].
///
/// `datasets` must hold one entry per target of
/// [`ResourceIndex::targets_without_extent`]. A failed probe leaves its
/// resource out of the split it was needed for and adds a warning instead.
pub fn classify(
    index: &ResourceIndex<'_>,
    sessions: &SessionCounts,
    datasets: DatasetProbes<'_>,
    volumes: VolumeProbes<'_>,
    mut warnings: Vec<AuditWarning>,
) -> AuditResult {
    let mut result = AuditResult::default();

    for (target, outcome) in datasets {
        let (dataset_path, backing_data) = match outcome {
            Ok(ProbeResult { exists: true, path }) => (path, BackingData::Present),
            Ok(ProbeResult { exists: false, path }) => (path, BackingData::Absent),
            Err(e) => {
                warnings.push(AuditWarning::DatasetProbeFailed {
                    target: target.id,
                    path: e.path.clone(),
                    error: e.source.to_string(),
                });
                (e.path, BackingData::Unverified)
            }
        };

        let orphan = OrphanTarget {
            id: target.id,
            name: target.name.clone(),
            dataset_path,
            backing_data,
        };
        match backing_data {
            BackingData::Present => result.targets_with_backing_data.push(orphan.clone()),
            BackingData::Absent => result.targets_without_backing_data.push(orphan.clone()),
            BackingData::Unverified => {}
        }
        result.targets_without_extents.push(orphan);
    }

    result.extents_without_targets = index
        .extents_without_target()
        .map(ExtentInfo::from)
        .collect();

    for (extent, outcome) in volumes {
        match outcome {
            Ok(probe) if !probe.exists => {
                result.extents_with_missing_volumes.push(ExtentInfo::from(extent));
            }
            Ok(_) => {}
            Err(e) => warnings.push(AuditWarning::VolumeProbeFailed {
                extent: extent.id,
                path: e.path.clone(),
                error: e.source.to_string(),
            }),
        }
    }

    result.targets_without_sessions = index
        .targets()
        .iter()
        .filter(|t| sessions.get(t.id) == 0)
        .map(|t| IdleTarget {
            id: t.id,
            name: t.name.clone(),
            has_extent: index.has_extent(t.id),
            extent: index.extent_for(t.id).map(ExtentInfo::from),
        })
        .collect();

    result.targets_without_extents.sort_by_key(|t| t.id);
    result.targets_with_backing_data.sort_by_key(|t| t.id);
    result.targets_without_backing_data.sort_by_key(|t| t.id);
    result.extents_without_targets.sort_by_key(|e| e.id);
    result.extents_with_missing_volumes.sort_by_key(|e| e.id);
    result.targets_without_sessions.sort_by_key(|t| t.id);

    result.warnings = warnings;
    result
}
