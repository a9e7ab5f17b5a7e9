//! iSCSI Export Audit Library
//!
//! Cross-checks the iSCSI targets, extents, associations and sessions of a
//! TrueNAS appliance against the datasets and zvols that back them, and
//! optionally removes targets proven to hold no data.
//!
//! The library is split into several modules:
//! - `audit`: fetch, index, session resolution, existence probes, classification
//! - `cleanup`: guarded deletion of orphaned targets
//! - `config`: validated audit and cleanup settings
//! - `report`: text and JSON rendering
//! - `metrics`: Prometheus metrics collection

pub mod audit;
pub mod cleanup;
pub mod config;
pub mod metrics;
pub mod report;

pub use audit::{AuditError, AuditResult, AuditWarning, BackingData, run_audit};
pub use cleanup::{
    CleanupFailure, CleanupSummary, cleanup_orphaned_targets, cleanup_orphaned_targets_until,
};
pub use config::{AuditConfig, CleanupConfig, ConfigError};
