//! Capability interface consumed by the audit.
//!
//! Covers exactly the calls the audit and cleanup need. [`crate::TrueNasClient`]
//! implements it against the appliance, [`crate::MockClient`] in memory.

use crate::error::Result;
use crate::types::{Association, Extent, ResourceClass, SessionRecord, Target, TargetId};

#[allow(async_fn_in_trait)]
pub trait StorageApi {
    /// List all iSCSI targets.
    async fn list_targets(&self) -> Result<Vec<Target>>;

    /// List all iSCSI extents.
    async fn list_extents(&self) -> Result<Vec<Extent>>;

    /// List all target-extent associations.
    async fn list_associations(&self) -> Result<Vec<Association>>;

    /// List the currently active initiator sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionRecord>>;

    /// Check whether a resource with exactly this path exists.
    async fn exists_by_path(&self, class: ResourceClass, path: &str) -> Result<bool>;

    /// Delete a target. With `force`, the appliance removes it even if in use.
    async fn delete_target(&self, id: TargetId, force: bool) -> Result<()>;
}
