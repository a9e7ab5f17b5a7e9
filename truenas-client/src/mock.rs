//! In-memory implementation of [`StorageApi`] for tests.
//!
//! Deterministic: lists come back in insertion order, deletes remove the target
//! from the state so a follow-up audit sees the result, and every failure mode
//! of the real client can be injected per call.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::api::StorageApi;
use crate::error::{ApiError, Result};
use crate::types::{Association, Extent, ResourceClass, SessionRecord, Target, TargetId};

/// Calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    ListTargets,
    ListExtents,
    ListAssociations,
    ListSessions,
}

#[derive(Debug, Default)]
struct MockState {
    targets: Vec<Target>,
    extents: Vec<Extent>,
    associations: Vec<Association>,
    sessions: Vec<SessionRecord>,
    datasets: HashSet<String>,
    volumes: HashSet<String>,

    failing_calls: HashSet<MockCall>,
    failing_probes: HashSet<String>,
    failing_deletes: HashSet<TargetId>,

    probes: Vec<(ResourceClass, String)>,
    deletes: Vec<(TargetId, bool)>,
}

/// Deterministic in-memory appliance.
#[derive(Debug, Default)]
pub struct MockClient {
    state: Mutex<MockState>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_target(self, id: i64, name: &str) -> Self {
        self.state().targets.push(Target::new(id, name));
        self
    }

    pub fn with_extent(self, extent: Extent) -> Self {
        self.state().extents.push(extent);
        self
    }

    pub fn with_association(self, id: i64, target: i64, extent: i64) -> Self {
        self.state()
            .associations
            .push(Association::new(id, target, extent));
        self
    }

    pub fn with_session(self, session: SessionRecord) -> Self {
        self.state().sessions.push(session);
        self
    }

    /// Register an existing dataset (full path, e.g. `tank/csi/pvc-a`).
    pub fn with_dataset(self, path: &str) -> Self {
        self.state().datasets.insert(path.to_string());
        self
    }

    /// Register an existing zvol (path without the `zvol/` prefix).
    pub fn with_volume(self, path: &str) -> Self {
        self.state().volumes.insert(path.to_string());
        self
    }

    pub fn fail_call(self, call: MockCall) -> Self {
        self.state().failing_calls.insert(call);
        self
    }

    /// Make any existence probe of `path` fail.
    pub fn fail_probe(self, path: &str) -> Self {
        self.state().failing_probes.insert(path.to_string());
        self
    }

    pub fn fail_delete(self, id: i64) -> Self {
        self.state().failing_deletes.insert(TargetId(id));
        self
    }

    /// Every delete call received, in order, with its `force` flag.
    pub fn delete_calls(&self) -> Vec<(TargetId, bool)> {
        self.state().deletes.clone()
    }

    /// Every existence probe received, in order.
    pub fn probe_calls(&self) -> Vec<(ResourceClass, String)> {
        self.state().probes.clone()
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        self.state().targets.iter().map(|t| t.id).collect()
    }

    fn check(&self, call: MockCall) -> Result<()> {
        if self.state().failing_calls.contains(&call) {
            return Err(ApiError::Simulated(format!("{:?} unavailable", call)));
        }
        Ok(())
    }
}

impl StorageApi for MockClient {
    async fn list_targets(&self) -> Result<Vec<Target>> {
        self.check(MockCall::ListTargets)?;
        Ok(self.state().targets.clone())
    }

    async fn list_extents(&self) -> Result<Vec<Extent>> {
        self.check(MockCall::ListExtents)?;
        Ok(self.state().extents.clone())
    }

    async fn list_associations(&self) -> Result<Vec<Association>> {
        self.check(MockCall::ListAssociations)?;
        Ok(self.state().associations.clone())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.check(MockCall::ListSessions)?;
        Ok(self.state().sessions.clone())
    }

    async fn exists_by_path(&self, class: ResourceClass, path: &str) -> Result<bool> {
        let mut state = self.state();
        state.probes.push((class, path.to_string()));

        if state.failing_probes.contains(path) {
            return Err(ApiError::Simulated(format!("probe of {} failed", path)));
        }

        let known = match class {
            ResourceClass::Dataset => &state.datasets,
            ResourceClass::Volume => &state.volumes,
        };
        Ok(known.contains(path))
    }

    async fn delete_target(&self, id: TargetId, force: bool) -> Result<()> {
        let mut state = self.state();
        state.deletes.push((id, force));

        if state.failing_deletes.contains(&id) {
            return Err(ApiError::Simulated(format!("delete of target {} failed", id)));
        }

        let before = state.targets.len();
        state.targets.retain(|t| t.id != id);
        if state.targets.len() == before {
            return Err(ApiError::Status {
                endpoint: format!("iscsi/target/id/{}", id),
                status: 404,
                body: "target not found".to_string(),
            });
        }

        // The appliance drops the target's associations along with it
        state.associations.retain(|a| a.target != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lists_in_insertion_order() {
        let mock = MockClient::new()
            .with_target(2, "pvc-b")
            .with_target(1, "pvc-a");

        let targets = mock.list_targets().await.unwrap();
        assert_eq!(targets, vec![Target::new(2, "pvc-b"), Target::new(1, "pvc-a")]);
    }

    #[tokio::test]
    async fn test_probe_classes_are_separate() {
        let mock = MockClient::new()
            .with_dataset("tank/csi/pvc-a")
            .with_volume("tank/csi/pvc-b");

        assert!(mock.exists_by_path(ResourceClass::Dataset, "tank/csi/pvc-a").await.unwrap());
        assert!(!mock.exists_by_path(ResourceClass::Dataset, "tank/csi/pvc-b").await.unwrap());
        assert!(mock.exists_by_path(ResourceClass::Volume, "tank/csi/pvc-b").await.unwrap());
        assert_eq!(mock.probe_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = MockClient::new()
            .with_target(1, "pvc-a")
            .fail_call(MockCall::ListSessions)
            .fail_probe("tank/x")
            .fail_delete(1);

        assert!(mock.list_targets().await.is_ok());
        assert!(mock.list_sessions().await.is_err());
        assert!(mock.exists_by_path(ResourceClass::Volume, "tank/x").await.is_err());
        assert!(mock.delete_target(TargetId(1), true).await.is_err());
        assert_eq!(mock.target_ids(), vec![TargetId(1)]);
    }

    #[tokio::test]
    async fn test_delete_removes_target_and_associations() {
        let mock = MockClient::new()
            .with_target(1, "pvc-a")
            .with_target(2, "pvc-b")
            .with_association(10, 1, 5);

        mock.delete_target(TargetId(1), true).await.unwrap();

        assert_eq!(mock.target_ids(), vec![TargetId(2)]);
        assert!(mock.list_associations().await.unwrap().is_empty());
        assert_eq!(mock.delete_calls(), vec![(TargetId(1), true)]);

        // Second delete of the same id is a not-found error
        assert!(mock.delete_target(TargetId(1), true).await.is_err());
    }
}
