//! Classification output handed to the renderer and the cleanup step.

use std::fmt::{self, Display};

use serde::Serialize;
use truenas_client::{Extent, ExtentId, TargetId};

/// What is known about the dataset backing an extent-less target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackingData {
    /// Dataset exists; extent creation probably failed
    Present,
    /// No dataset; the target holds nothing and can be deleted
    Absent,
    /// The probe failed; nothing is assumed
    Unverified,
}

/// A target with no extent association.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanTarget {
    pub id: TargetId,
    pub name: String,
    pub dataset_path: String,
    pub backing_data: BackingData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtentInfo {
    pub id: ExtentId,
    pub name: String,
    pub disk: Option<String>,
}

impl From<&Extent> for ExtentInfo {
    fn from(extent: &Extent) -> Self {
        Self {
            id: extent.id,
            name: extent.name.clone(),
            disk: extent.disk.clone(),
        }
    }
}

/// A target nobody is connected to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdleTarget {
    pub id: TargetId,
    pub name: String,
    /// Whether any association names the target
    pub has_extent: bool,
    /// The linked extent, when the association names a known one
    pub extent: Option<ExtentInfo>,
}

/// Non-fatal problems met during the audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditWarning {
    SessionsUnavailable {
        error: String,
    },
    DatasetProbeFailed {
        target: TargetId,
        path: String,
        error: String,
    },
    VolumeProbeFailed {
        extent: ExtentId,
        path: String,
        error: String,
    },
}

impl Display for AuditWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditWarning::SessionsUnavailable { error } => {
                write!(f, "failed to get sessions, assuming none: {}", error)
            }
            AuditWarning::DatasetProbeFailed {
                target,
                path,
                error,
            } => write!(
                f,
                "could not check dataset {} for target {}: {}",
                path, target, error
            ),
            AuditWarning::VolumeProbeFailed {
                extent,
                path,
                error,
            } => write!(
                f,
                "could not check zvol {} for extent {}: {}",
                path, extent, error
            ),
        }
    }
}

/// Size of the fetched snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub targets: usize,
    pub extents: usize,
    pub associations: usize,
    pub sessions: usize,
}

/// Result of one audit run. Every list is sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditResult {
    pub inventory: Inventory,
    /// Targets with no extent association
    pub targets_without_extents: Vec<OrphanTarget>,
    /// Extent-less targets whose dataset exists
    pub targets_with_backing_data: Vec<OrphanTarget>,
    /// Extent-less targets whose dataset is gone (cleanup candidates)
    pub targets_without_backing_data: Vec<OrphanTarget>,
    /// Extents no association names
    pub extents_without_targets: Vec<ExtentInfo>,
    /// Zvol-backed extents whose zvol is gone
    pub extents_with_missing_volumes: Vec<ExtentInfo>,
    /// Targets with zero active sessions
    pub targets_without_sessions: Vec<IdleTarget>,
    pub warnings: Vec<AuditWarning>,
}

impl AuditResult {
    /// Findings that need attention. Idle targets are informational only.
    pub fn issue_count(&self) -> usize {
        self.targets_without_extents.len()
            + self.extents_without_targets.len()
            + self.extents_with_missing_volumes.len()
    }

    /// Targets proven safe to delete.
    pub fn cleanup_candidates(&self) -> &[OrphanTarget] {
        &self.targets_without_backing_data
    }
}
