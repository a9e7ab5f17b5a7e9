//! Prometheus metrics for the iSCSI audit
//!
//! The audit is a one-shot run, so metrics are rendered into a node-exporter
//! textfile instead of being served over HTTP.

use std::fs;
use std::io;
use std::path::Path;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::audit::{AuditResult, AuditWarning};
use crate::cleanup::CleanupSummary;

/// Metric names
pub mod names {
    /// Gauge: Number of fetched resources by kind
    pub const RESOURCES_TOTAL: &str = "iscsi_audit_resources_total";
    /// Gauge: Number of findings by category
    pub const FINDINGS_TOTAL: &str = "iscsi_audit_findings_total";
    /// Counter: Non-fatal audit problems by kind
    pub const WARNINGS_TOTAL: &str = "iscsi_audit_warnings_total";
    /// Counter: Cleanup deletions by outcome
    pub const CLEANUP_TOTAL: &str = "iscsi_audit_cleanup_total";
}

/// Install the Prometheus recorder and return a handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(handle)
}

/// Write the current metrics to `path`.
///
/// The file is written next to the target and renamed into place so a
/// collector never reads a partial file.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, handle.render())?;
    fs::rename(&tmp, path)?;
    info!(path = %path.display(), "Wrote metrics textfile");
    Ok(())
}

fn set_resources(kind: &'static str, count: usize) {
    gauge!(names::RESOURCES_TOTAL, "kind" => kind).set(count as f64);
}

fn set_findings(category: &'static str, count: usize) {
    gauge!(names::FINDINGS_TOTAL, "category" => category).set(count as f64);
}

fn warning_kind(warning: &AuditWarning) -> &'static str {
    match warning {
        AuditWarning::SessionsUnavailable { .. } => "sessions_unavailable",
        AuditWarning::DatasetProbeFailed { .. } => "dataset_probe_failed",
        AuditWarning::VolumeProbeFailed { .. } => "volume_probe_failed",
    }
}

/// Record the sizes and findings of a finished audit
pub fn record_audit(result: &AuditResult) {
    let inventory = &result.inventory;
    set_resources("targets", inventory.targets);
    set_resources("extents", inventory.extents);
    set_resources("associations", inventory.associations);
    set_resources("sessions", inventory.sessions);

    set_findings("targets_without_extents", result.targets_without_extents.len());
    set_findings("targets_with_backing_data", result.targets_with_backing_data.len());
    set_findings(
        "targets_without_backing_data",
        result.targets_without_backing_data.len(),
    );
    set_findings("extents_without_targets", result.extents_without_targets.len());
    set_findings(
        "extents_with_missing_volumes",
        result.extents_with_missing_volumes.len(),
    );
    set_findings("targets_without_sessions", result.targets_without_sessions.len());

    for warning in &result.warnings {
        counter!(names::WARNINGS_TOTAL, "kind" => warning_kind(warning)).increment(1);
    }
}

/// Record the outcome of a cleanup pass
pub fn record_cleanup(summary: &CleanupSummary) {
    let (ok_label, mode) = if summary.dry_run {
        ("would_delete", "dry_run")
    } else {
        ("deleted", "live")
    };
    counter!(names::CLEANUP_TOTAL, "outcome" => ok_label, "mode" => mode)
        .increment(summary.succeeded as u64);
    counter!(names::CLEANUP_TOTAL, "outcome" => "failed", "mode" => mode)
        .increment(summary.failed() as u64);
    counter!(names::CLEANUP_TOTAL, "outcome" => "skipped", "mode" => mode)
        .increment(summary.skipped as u64);
}
