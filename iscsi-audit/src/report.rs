//! Human and machine readable renderings of audit and cleanup results.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;

use crate::audit::{AuditResult, BackingData, ExtentInfo};
use crate::cleanup::CleanupSummary;

const RULE: &str = "========================================";

/// Everything a run produced, as emitted with `--format json`.
#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub parent_dataset: &'a str,
    pub audit: &'a AuditResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup: Option<&'a CleanupSummary>,
}

impl Report<'_> {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn heading(out: &mut String, title: &str) {
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  {}", title);
    let _ = writeln!(out, "{}", RULE);
}

fn disk(extent: &ExtentInfo) -> &str {
    extent.disk.as_deref().unwrap_or("-")
}

/// Render the audit as a sectioned text report.
pub fn render_text(parent_dataset: &str, result: &AuditResult) -> String {
    let mut out = String::new();
    heading(&mut out, "iSCSI AUDIT RESULTS");
    let inv = &result.inventory;
    let _ = writeln!(out, "Parent dataset: {}", parent_dataset);
    let _ = writeln!(
        out,
        "Inventory: {} targets, {} extents, {} associations, {} sessions",
        inv.targets, inv.extents, inv.associations, inv.sessions
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "TARGETS WITHOUT EXTENTS (incomplete setup):");
    if result.targets_without_extents.is_empty() {
        let _ = writeln!(out, "  none");
    } else {
        if !result.targets_with_backing_data.is_empty() {
            let _ = writeln!(
                out,
                "  With dataset ({}), extent creation may have failed:",
                result.targets_with_backing_data.len()
            );
            for t in &result.targets_with_backing_data {
                let _ = writeln!(out, "    - ID: {}, Name: {}", t.id, t.name);
                let _ = writeln!(out, "      Dataset: {} (exists)", t.dataset_path);
            }
        }
        if !result.targets_without_backing_data.is_empty() {
            let _ = writeln!(
                out,
                "  Without dataset ({}), safe to delete:",
                result.targets_without_backing_data.len()
            );
            for t in &result.targets_without_backing_data {
                let _ = writeln!(out, "    - ID: {}, Name: {}", t.id, t.name);
            }
        }
        let unverified: Vec<_> = result
            .targets_without_extents
            .iter()
            .filter(|t| t.backing_data == BackingData::Unverified)
            .collect();
        if !unverified.is_empty() {
            let _ = writeln!(out, "  Dataset not checked ({}):", unverified.len());
            for t in unverified {
                let _ = writeln!(out, "    - ID: {}, Name: {}", t.id, t.name);
                let _ = writeln!(out, "      Dataset: {} (unknown)", t.dataset_path);
            }
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "EXTENTS WITHOUT TARGETS (unreachable storage):");
    if result.extents_without_targets.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for e in &result.extents_without_targets {
        let _ = writeln!(out, "  - ID: {}, Name: {}, Disk: {}", e.id, e.name, disk(e));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "EXTENTS WITH MISSING ZVOLS (broken extents):");
    if result.extents_with_missing_volumes.is_empty() {
        let _ = writeln!(out, "  none");
    }
    for e in &result.extents_with_missing_volumes {
        let _ = writeln!(
            out,
            "  - ID: {}, Name: {}, Missing zvol: {}",
            e.id,
            e.name,
            disk(e)
        );
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "TARGETS WITHOUT ACTIVE CONNECTIONS:");
    if result.targets_without_sessions.is_empty() {
        let _ = writeln!(out, "  none");
    } else {
        let (linked, bare): (Vec<_>, Vec<_>) = result
            .targets_without_sessions
            .iter()
            .partition(|t| t.has_extent);
        if !bare.is_empty() {
            let _ = writeln!(out, "  Without extent:");
            for t in bare {
                let _ = writeln!(out, "    - ID: {}, Name: {}", t.id, t.name);
            }
        }
        if !linked.is_empty() {
            let _ = writeln!(out, "  With extent, unused:");
            for t in linked {
                let _ = writeln!(out, "    - ID: {}, Name: {}", t.id, t.name);
                if let Some(extent) = &t.extent {
                    let _ = writeln!(out, "      Extent: {} -> {}", extent.name, disk(extent));
                }
            }
        }
    }
    let _ = writeln!(out);

    if !result.warnings.is_empty() {
        let _ = writeln!(out, "WARNINGS:");
        for w in &result.warnings {
            let _ = writeln!(out, "  - {}", w);
        }
        let _ = writeln!(out);
    }

    heading(&mut out, "SUMMARY");
    let rows = [
        ("Targets without extents:", result.targets_without_extents.len()),
        ("  with dataset (investigate):", result.targets_with_backing_data.len()),
        ("  without dataset (delete):", result.targets_without_backing_data.len()),
        ("Extents without targets:", result.extents_without_targets.len()),
        ("Extents with missing zvols:", result.extents_with_missing_volumes.len()),
        ("Targets without connections:", result.targets_without_sessions.len()),
    ];
    for (label, count) in rows {
        let _ = writeln!(out, "{:<32}{}", label, count);
    }
    let _ = writeln!(out);

    if result.issue_count() > 0 {
        let _ = writeln!(out, "Found orphaned iSCSI resources that should be investigated.");
        if !result.cleanup_candidates().is_empty() {
            let _ = writeln!(
                out,
                "Run with --cleanup --dry-run=false to delete {} orphaned target(s).",
                result.cleanup_candidates().len()
            );
        }
    } else {
        let _ = writeln!(out, "No orphaned resources found.");
    }
    out
}

/// Render a cleanup summary.
pub fn render_cleanup(summary: &CleanupSummary) -> String {
    let mut out = String::new();
    heading(&mut out, "CLEANUP ORPHANED TARGETS");
    if summary.dry_run {
        let _ = writeln!(out, "Dry run, no changes were made.");
        let _ = writeln!(out, "Would delete {} orphaned target(s)", summary.succeeded);
    } else {
        let _ = writeln!(
            out,
            "Deleted {} of {} orphaned target(s)",
            summary.succeeded, summary.attempted
        );
    }
    for f in &summary.failures {
        let _ = writeln!(out, "  FAILED ID: {}, Name: {}: {}", f.id, f.name, f.error);
    }
    if summary.interrupted() {
        let _ = writeln!(out, "Interrupted, {} target(s) not processed", summary.skipped);
    }
    out
}

/// Render raw session records with their keys in sorted order.
pub fn render_raw_sessions(sessions: &[Value]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Found {} sessions:", sessions.len());
    for (i, session) in sessions.iter().enumerate() {
        let _ = writeln!(out);
        match session.as_object() {
            Some(map) => {
                let _ = writeln!(out, "Session {}:", i);
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                for key in keys {
                    let _ = writeln!(out, "  {}: {}", key, map[key]);
                }
            }
            None => {
                let _ = writeln!(out, "Session {}: not an object: {}", i, session);
            }
        }
    }
    out
}
