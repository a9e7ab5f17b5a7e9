//! Explicit configuration for the audit and cleanup entry points.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid parent dataset: {0}")]
    InvalidDataset(String),

    #[error("probe concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Validate that a dataset path is well formed.
/// Allows alphanumeric characters, underscore, hyphen, period, colon and `/`
/// as component separator.
fn validate_dataset(path: &str) -> Result<(), ConfigError> {
    if path.is_empty() {
        return Err(ConfigError::InvalidDataset("path cannot be empty".into()));
    }
    if path.starts_with('/') {
        return Err(ConfigError::InvalidDataset(format!(
            "'{}' must be a dataset name, not a mount point",
            path
        )));
    }
    if path.contains("..") {
        return Err(ConfigError::InvalidDataset(format!(
            "'{}' contains path traversal sequence",
            path
        )));
    }
    if path.split('/').any(str::is_empty) {
        return Err(ConfigError::InvalidDataset(format!(
            "'{}' contains an empty component",
            path
        )));
    }
    if !path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/'))
    {
        return Err(ConfigError::InvalidDataset(format!(
            "invalid characters in '{}': only alphanumeric, underscore, hyphen, period, colon and '/' allowed",
            path
        )));
    }
    Ok(())
}

/// Parameters of an audit run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditConfig {
    /// Dataset under which every target has its backing dataset
    parent_dataset: String,
    /// Existence probes in flight at once (1 = strictly sequential)
    probe_concurrency: usize,
}

impl AuditConfig {
    pub fn new(parent_dataset: impl Into<String>) -> Result<Self, ConfigError> {
        let parent_dataset = parent_dataset.into();
        let parent_dataset = parent_dataset.trim_end_matches('/').to_string();
        validate_dataset(&parent_dataset)?;

        Ok(Self {
            parent_dataset,
            probe_concurrency: 1,
        })
    }

    pub fn with_probe_concurrency(mut self, probe_concurrency: usize) -> Result<Self, ConfigError> {
        if probe_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        self.probe_concurrency = probe_concurrency;
        Ok(self)
    }

    pub fn parent_dataset(&self) -> &str {
        &self.parent_dataset
    }

    pub fn probe_concurrency(&self) -> usize {
        self.probe_concurrency
    }

    /// Path of the dataset backing the target with this name.
    pub fn dataset_path(&self, target_name: &str) -> String {
        format!("{}/{}", self.parent_dataset, target_name)
    }
}

/// Whether and how to remove targets proven to have no backing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Report intended deletions without calling the API
    pub dry_run: bool,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dry_run: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dataset() {
        assert!(validate_dataset("tank").is_ok());
        assert!(validate_dataset("flashstor/k8s-csi").is_ok());
        assert!(validate_dataset("tank/csi_v1.2/iscsi").is_ok());

        assert!(validate_dataset("").is_err());
        assert!(validate_dataset("/mnt/tank").is_err());
        assert!(validate_dataset("tank//csi").is_err());
        assert!(validate_dataset("tank/../etc").is_err());
        assert!(validate_dataset("tank@snap").is_err());
        assert!(validate_dataset("tank csi").is_err());
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = AuditConfig::new("tank/csi/").unwrap();
        assert_eq!(config.parent_dataset(), "tank/csi");
        assert_eq!(config.dataset_path("pvc-a"), "tank/csi/pvc-a");
    }

    #[test]
    fn test_probe_concurrency() {
        let config = AuditConfig::new("tank").unwrap();
        assert_eq!(config.probe_concurrency(), 1);
        assert_eq!(
            config.clone().with_probe_concurrency(0),
            Err(ConfigError::InvalidConcurrency)
        );
        assert_eq!(
            config.with_probe_concurrency(8).unwrap().probe_concurrency(),
            8
        );
    }

    #[test]
    fn test_cleanup_defaults_to_dry_run() {
        let cleanup = CleanupConfig::default();
        assert!(!cleanup.enabled);
        assert!(cleanup.dry_run);
    }
}
