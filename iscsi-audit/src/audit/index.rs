//! Lookup structures over one fetched snapshot of the iSCSI configuration.

use std::collections::{HashMap, HashSet};

use truenas_client::{Association, Extent, ExtentId, Target, TargetId};

/// Id- and name-keyed views over targets, extents and their associations.
///
/// Borrows the fetched lists; building it never fails and empty lists are fine.
#[derive(Debug)]
pub struct ResourceIndex<'a> {
    targets: &'a [Target],
    extents: &'a [Extent],
    target_by_id: HashMap<TargetId, &'a Target>,
    target_id_by_name: HashMap<&'a str, TargetId>,
    extent_by_id: HashMap<ExtentId, &'a Extent>,
    targets_with_extent: HashSet<TargetId>,
    extents_with_target: HashSet<ExtentId>,
    target_extent: HashMap<TargetId, &'a Extent>,
}

impl<'a> ResourceIndex<'a> {
    pub fn build(
        targets: &'a [Target],
        extents: &'a [Extent],
        associations: &[Association],
    ) -> Self {
        let mut target_by_id = HashMap::with_capacity(targets.len());
        let mut target_id_by_name = HashMap::with_capacity(targets.len());
        for target in targets {
            target_by_id.insert(target.id, target);
            target_id_by_name.insert(target.name.as_str(), target.id);
        }

        let extent_by_id: HashMap<ExtentId, &Extent> =
            extents.iter().map(|e| (e.id, e)).collect();

        let mut targets_with_extent = HashSet::new();
        let mut extents_with_target = HashSet::new();
        let mut target_extent = HashMap::new();
        for assoc in associations {
            targets_with_extent.insert(assoc.target);
            extents_with_target.insert(assoc.extent);
            // Last association wins when a target has several
            if let Some(extent) = extent_by_id.get(&assoc.extent) {
                target_extent.insert(assoc.target, *extent);
            }
        }

        Self {
            targets,
            extents,
            target_by_id,
            target_id_by_name,
            extent_by_id,
            targets_with_extent,
            extents_with_target,
            target_extent,
        }
    }

    /// All targets, in fetch order.
    pub fn targets(&self) -> &'a [Target] {
        self.targets
    }

    /// All extents, in fetch order.
    pub fn extents(&self) -> &'a [Extent] {
        self.extents
    }

    pub fn target(&self, id: TargetId) -> Option<&'a Target> {
        self.target_by_id.get(&id).copied()
    }

    pub fn target_id_by_name(&self, name: &str) -> Option<TargetId> {
        self.target_id_by_name.get(name).copied()
    }

    pub fn extent(&self, id: ExtentId) -> Option<&'a Extent> {
        self.extent_by_id.get(&id).copied()
    }

    /// Whether any association names this target.
    pub fn has_extent(&self, id: TargetId) -> bool {
        self.targets_with_extent.contains(&id)
    }

    /// Whether any association names this extent.
    pub fn has_target(&self, id: ExtentId) -> bool {
        self.extents_with_target.contains(&id)
    }

    /// Extent linked to a target, if its association names a known extent.
    pub fn extent_for(&self, id: TargetId) -> Option<&'a Extent> {
        self.target_extent.get(&id).copied()
    }

    pub fn targets_without_extent(&self) -> impl Iterator<Item = &'a Target> + '_ {
        self.targets.iter().filter(|t| !self.has_extent(t.id))
    }

    pub fn extents_without_target(&self) -> impl Iterator<Item = &'a Extent> + '_ {
        self.extents.iter().filter(|e| !self.has_target(e.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_lists() {
        let index = ResourceIndex::build(&[], &[], &[]);
        assert!(index.targets().is_empty());
        assert_eq!(index.targets_without_extent().count(), 0);
        assert_eq!(index.extents_without_target().count(), 0);
        assert_eq!(index.target_id_by_name("pvc-a"), None);
    }

    #[test]
    fn test_lookups() {
        let targets = vec![Target::new(1, "pvc-a"), Target::new(2, "pvc-b")];
        let extents = vec![
            Extent::disk(5, "e5", "zvol/tank/pvc-a"),
            Extent::disk(6, "e6", "zvol/tank/stray"),
        ];
        let associations = vec![Association::new(10, 1, 5)];
        let index = ResourceIndex::build(&targets, &extents, &associations);

        assert_eq!(index.target(TargetId(2)).map(|t| t.name.as_str()), Some("pvc-b"));
        assert_eq!(index.target_id_by_name("pvc-a"), Some(TargetId(1)));
        assert_eq!(index.extent(ExtentId(6)).map(|e| e.name.as_str()), Some("e6"));
        assert!(index.has_extent(TargetId(1)));
        assert!(!index.has_extent(TargetId(2)));
        assert!(index.has_target(ExtentId(5)));
        assert!(!index.has_target(ExtentId(6)));
        assert_eq!(index.extent_for(TargetId(1)).map(|e| e.id), Some(ExtentId(5)));

        let orphans: Vec<_> = index.targets_without_extent().map(|t| t.id).collect();
        assert_eq!(orphans, vec![TargetId(2)]);
        let unreachable: Vec<_> = index.extents_without_target().map(|e| e.id).collect();
        assert_eq!(unreachable, vec![ExtentId(6)]);
    }

    #[test]
    fn test_duplicate_association_last_write_wins() {
        let targets = vec![Target::new(1, "pvc-a")];
        let extents = vec![
            Extent::disk(5, "e5", "zvol/tank/a"),
            Extent::disk(6, "e6", "zvol/tank/b"),
        ];
        let associations = vec![Association::new(10, 1, 5), Association::new(11, 1, 6)];
        let index = ResourceIndex::build(&targets, &extents, &associations);

        assert_eq!(index.extent_for(TargetId(1)).map(|e| e.id), Some(ExtentId(6)));
        assert!(index.has_target(ExtentId(5)));
        assert!(index.has_target(ExtentId(6)));
    }

    #[test]
    fn test_association_to_unknown_extent() {
        let targets = vec![Target::new(1, "pvc-a")];
        let associations = vec![Association::new(10, 1, 99)];
        let index = ResourceIndex::build(&targets, &[], &associations);

        // Still counts as having an extent, but there is nothing to link
        assert!(index.has_extent(TargetId(1)));
        assert!(index.extent_for(TargetId(1)).is_none());
    }
}
