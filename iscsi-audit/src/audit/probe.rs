//! Out-of-band existence checks for backing datasets and zvols.
//!
//! A failed probe is never read as "exists" or "absent": the caller gets the
//! error and must leave the resource out of the split that depended on it.

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};
use truenas_client::{ApiError, Extent, ResourceClass, StorageApi, Target};

use crate::config::AuditConfig;

#[derive(Error, Debug)]
#[error("could not check {class} '{path}': {source}")]
pub struct ProbeError {
    pub class: ResourceClass,
    pub path: String,
    #[source]
    pub source: ApiError,
}

/// Outcome of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub exists: bool,
    pub path: String,
}

async fn probe<C: StorageApi>(
    client: &C,
    class: ResourceClass,
    path: String,
) -> Result<ProbeResult, ProbeError> {
    match client.exists_by_path(class, &path).await {
        Ok(exists) => {
            debug!(%class, path = %path, exists, "Probed");
            Ok(ProbeResult { exists, path })
        }
        Err(source) => {
            warn!(%class, path = %path, error = %source, "Existence check failed");
            Err(ProbeError {
                class,
                path,
                source,
            })
        }
    }
}

/// Check whether the dataset backing a target exists.
pub async fn dataset_exists<C: StorageApi>(
    client: &C,
    config: &AuditConfig,
    target: &Target,
) -> Result<ProbeResult, ProbeError> {
    probe(client, ResourceClass::Dataset, config.dataset_path(&target.name)).await
}

/// Check whether the zvol behind an extent exists.
///
/// Returns `None` without calling the API unless the extent is disk-backed
/// with a `zvol/` reference.
pub async fn volume_exists<C: StorageApi>(
    client: &C,
    extent: &Extent,
) -> Option<Result<ProbeResult, ProbeError>> {
    let path = extent.zvol_path()?.to_string();
    Some(probe(client, ResourceClass::Volume, path).await)
}

/// Probe the backing dataset of each target.
///
/// At most `probe_concurrency` probes are in flight; results keep input order.
pub async fn probe_datasets<'a, C, I>(
    client: &C,
    config: &AuditConfig,
    targets: I,
) -> Vec<(&'a Target, Result<ProbeResult, ProbeError>)>
where
    C: StorageApi,
    I: IntoIterator<Item = &'a Target>,
{
    stream::iter(targets)
        .map(|target| async move { (target, dataset_exists(client, config, target).await) })
        .buffered(config.probe_concurrency())
        .collect()
        .await
}

/// Probe the backing zvol of every zvol-backed disk extent.
///
/// Other extents are skipped. Results keep input order.
pub async fn probe_volumes<'a, C: StorageApi>(
    client: &C,
    config: &AuditConfig,
    extents: &'a [Extent],
) -> Vec<(&'a Extent, Result<ProbeResult, ProbeError>)> {
    stream::iter(extents.iter().filter(|e| e.zvol_path().is_some()))
        .map(|extent| async move { (extent, volume_exists(client, extent).await) })
        .buffered(config.probe_concurrency())
        .filter_map(|(extent, outcome)| async move { outcome.map(|o| (extent, o)) })
        .collect()
        .await
}
