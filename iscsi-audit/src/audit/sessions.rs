//! Attribution of active sessions to targets.

use std::collections::HashMap;

use tracing::debug;
use truenas_client::{SessionRecord, TargetId};

use super::index::ResourceIndex;

/// Which field of a session record identified its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    TargetId,
    Alias,
    Name,
    QualifiedName,
}

/// Resolve the target of a session, trying in order: the numeric id, the
/// alias, the name, and the last `:`-separated segment of the qualified name.
/// The last three must match a known target name.
pub fn resolve_target(
    session: &SessionRecord,
    index: &ResourceIndex<'_>,
) -> Option<(TargetId, Resolution)> {
    if let Some(id) = session.target_id {
        return Some((id, Resolution::TargetId));
    }

    let by_name = |name: Option<&str>| name.and_then(|n| index.target_id_by_name(n));

    if let Some(id) = by_name(session.target_alias.as_deref()) {
        return Some((id, Resolution::Alias));
    }
    if let Some(id) = by_name(session.target_name.as_deref()) {
        return Some((id, Resolution::Name));
    }

    let last_segment = session
        .qualified_name
        .as_deref()
        .and_then(|iqn| iqn.rsplit_once(':'))
        .map(|(_, name)| name);
    by_name(last_segment).map(|id| (id, Resolution::QualifiedName))
}

/// Active session count per target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCounts {
    counts: HashMap<TargetId, usize>,
    unresolved: usize,
}

impl SessionCounts {
    /// Count sessions per target. Sessions no strategy can attribute are
    /// dropped and only tallied in [`SessionCounts::unresolved`].
    pub fn resolve(sessions: &[SessionRecord], index: &ResourceIndex<'_>) -> Self {
        let mut result = Self::default();

        for session in sessions {
            match resolve_target(session, index) {
                Some((id, via)) => {
                    if index.target(id).is_none() {
                        debug!(target_id = %id, "Session references unknown target id");
                    }
                    debug!(target_id = %id, via = ?via, "Resolved session");
                    *result.counts.entry(id).or_insert(0) += 1;
                }
                None => {
                    debug!(session = ?session, "Could not attribute session to a target");
                    result.unresolved += 1;
                }
            }
        }

        result
    }

    /// Sessions for a target; 0 when none were attributed to it.
    pub fn get(&self, id: TargetId) -> usize {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    /// Number of distinct targets with at least one session.
    pub fn targets_with_sessions(&self) -> usize {
        self.counts.len()
    }

    /// Sessions that were attributed to some target.
    pub fn resolved(&self) -> usize {
        self.counts.values().sum()
    }

    /// Sessions that could not be attributed.
    pub fn unresolved(&self) -> usize {
        self.unresolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use truenas_client::Target;

    fn session() -> SessionRecord {
        SessionRecord::default()
    }

    fn targets() -> Vec<Target> {
        vec![
            Target::new(1, "pvc-a"),
            Target::new(2, "pvc-b"),
            Target::new(3, "pvc-c"),
        ]
    }

    #[test]
    fn test_alias_resolution() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);
        let sessions = vec![SessionRecord {
            target_alias: Some("pvc-a".into()),
            ..session()
        }];

        let counts = SessionCounts::resolve(&sessions, &index);
        assert_eq!(counts.get(TargetId(1)), 1);
        assert_eq!(counts.get(TargetId(2)), 0);
        assert_eq!(counts.targets_with_sessions(), 1);
    }

    #[test]
    fn test_strategy_order() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);

        // Numeric id wins over everything else
        let s = SessionRecord {
            target_id: Some(TargetId(3)),
            target_alias: Some("pvc-a".into()),
            ..session()
        };
        assert_eq!(resolve_target(&s, &index), Some((TargetId(3), Resolution::TargetId)));

        // An unknown alias falls through to the name
        let s = SessionRecord {
            target_alias: Some("unknown".into()),
            target_name: Some("pvc-b".into()),
            qualified_name: Some("iqn.2005-10.org.freenas.ctl:pvc-c".into()),
            ..session()
        };
        assert_eq!(resolve_target(&s, &index), Some((TargetId(2), Resolution::Name)));

        // Then to the qualified name
        let s = SessionRecord {
            target_name: Some("unknown".into()),
            qualified_name: Some("iqn.2005-10.org.freenas.ctl:pvc-c".into()),
            ..session()
        };
        assert_eq!(
            resolve_target(&s, &index),
            Some((TargetId(3), Resolution::QualifiedName))
        );
    }

    #[test]
    fn test_qualified_name_requires_separator() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);
        let s = SessionRecord {
            qualified_name: Some("pvc-a".into()),
            ..session()
        };
        assert_eq!(resolve_target(&s, &index), None);
    }

    #[test]
    fn test_each_record_counts_once() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);

        // Every strategy would match target 1; the record still counts once
        let all_fields = SessionRecord {
            target_id: Some(TargetId(1)),
            target_alias: Some("pvc-a".into()),
            target_name: Some("pvc-a".into()),
            qualified_name: Some("iqn.x:pvc-a".into()),
        };
        let sessions = vec![all_fields.clone(), all_fields, session()];

        let counts = SessionCounts::resolve(&sessions, &index);
        assert_eq!(counts.get(TargetId(1)), 2);
        assert_eq!(counts.resolved(), 2);
        assert_eq!(counts.unresolved(), 1);
    }

    #[test]
    fn test_mistyped_record_does_not_hide_the_others() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);
        let payload = serde_json::json!([
            {"target": "iqn.2005-10.org.freenas.ctl:pvc-a"},
            {"target": "iqn.2005-10.org.freenas.ctl:pvc-b"},
            {"target_alias": 7, "target": "iqn.2005-10.org.freenas.ctl:pvc-c"},
            {"target": false}
        ]);
        let sessions = truenas_client::types::decode_sessions(&payload).unwrap();

        let counts = SessionCounts::resolve(&sessions, &index);
        assert_eq!(counts.get(TargetId(1)), 1);
        assert_eq!(counts.get(TargetId(2)), 1);
        // Falls through to the qualified name
        assert_eq!(counts.get(TargetId(3)), 1);
        assert_eq!(counts.unresolved(), 1);
    }

    #[test]
    fn test_numeric_id_counted_even_if_unknown() {
        let targets = targets();
        let index = ResourceIndex::build(&targets, &[], &[]);
        let sessions = vec![SessionRecord {
            target_id: Some(TargetId(42)),
            ..session()
        }];

        let counts = SessionCounts::resolve(&sessions, &index);
        assert_eq!(counts.get(TargetId(42)), 1);
        assert_eq!(counts.unresolved(), 0);
    }
}
