//! Typed records for the iSCSI sharing resources of the appliance.
//!
//! The API returns loosely-typed JSON where numeric ids may arrive as
//! floating-point values. Every resource kind has an explicit decode step that
//! either yields a fully-populated record or a [`DecodeError`] pointing at the
//! offending record and field. Sessions are the exception: a mistyped session
//! field is treated as absent so one odd record cannot hide the others.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::DecodeError;

/// Prefix of the disk reference of zvol-backed extents.
pub const ZVOL_PREFIX: &str = "zvol/";

// ============================================================================
// Identifiers
// ============================================================================

/// Identity of an iSCSI target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TargetId(pub i64);

impl Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an iSCSI extent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ExtentId(pub i64);

impl Display for ExtentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Records
// ============================================================================

/// An iSCSI target exposed by the appliance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    /// Unique name, also the last path component of the backing dataset
    pub name: String,
}

impl Target {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: TargetId(id),
            name: name.into(),
        }
    }
}

/// Backing type of an extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ExtentType {
    Disk,
    File,
    /// Tag this client does not know about, preserved verbatim
    Other(String),
}

impl ExtentType {
    pub fn as_str(&self) -> &str {
        match self {
            ExtentType::Disk => "DISK",
            ExtentType::File => "FILE",
            ExtentType::Other(tag) => tag,
        }
    }
}

impl From<String> for ExtentType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "DISK" => ExtentType::Disk,
            "FILE" => ExtentType::File,
            _ => ExtentType::Other(tag),
        }
    }
}

impl From<ExtentType> for String {
    fn from(value: ExtentType) -> Self {
        value.as_str().to_string()
    }
}

impl Display for ExtentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backing storage unit that can be attached to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub id: ExtentId,
    pub name: String,
    /// Disk reference (`zvol/<pool>/<path>` for zvol-backed extents)
    pub disk: Option<String>,
    #[serde(rename = "type")]
    pub extent_type: ExtentType,
}

impl Extent {
    pub fn disk(id: i64, name: impl Into<String>, disk: impl Into<String>) -> Self {
        Self {
            id: ExtentId(id),
            name: name.into(),
            disk: Some(disk.into()),
            extent_type: ExtentType::Disk,
        }
    }

    pub fn file(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: ExtentId(id),
            name: name.into(),
            disk: None,
            extent_type: ExtentType::File,
        }
    }

    /// Dataset path of the backing zvol, if this is a zvol-backed disk extent.
    pub fn zvol_path(&self) -> Option<&str> {
        if self.extent_type != ExtentType::Disk {
            return None;
        }
        self.disk.as_deref()?.strip_prefix(ZVOL_PREFIX)
    }
}

/// Link between a target and an extent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub id: i64,
    pub target: TargetId,
    pub extent: ExtentId,
}

impl Association {
    pub fn new(id: i64, target: i64, extent: i64) -> Self {
        Self {
            id,
            target: TargetId(target),
            extent: ExtentId(extent),
        }
    }
}

/// An active initiator session.
///
/// Sessions carry no identity of their own. The target they belong to may be
/// reported in any of the optional fields below, depending on the appliance
/// version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Numeric target id
    pub target_id: Option<TargetId>,
    /// Target alias, usually the target name
    pub target_alias: Option<String>,
    /// Target name
    pub target_name: Option<String>,
    /// Fully qualified target name, e.g. `iqn.2005-10.org.freenas.ctl:pvc-1`
    pub qualified_name: Option<String>,
}

/// Class of resource probed by an existence query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Dataset,
    Volume,
}

impl Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::Dataset => write!(f, "dataset"),
            ResourceClass::Volume => write!(f, "volume"),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

struct Record<'a> {
    resource: &'static str,
    index: usize,
    fields: &'a Map<String, Value>,
}

impl<'a> Record<'a> {
    fn new(resource: &'static str, index: usize, value: &'a Value) -> Result<Self, DecodeError> {
        let fields = value
            .as_object()
            .ok_or(DecodeError::NotAnObject { resource, index })?;
        Ok(Self {
            resource,
            index,
            fields,
        })
    }

    fn wrong_type(&self, field: &'static str, expected: &'static str) -> DecodeError {
        DecodeError::WrongType {
            resource: self.resource,
            index: self.index,
            field,
            expected,
        }
    }

    fn present(&self, field: &'static str) -> Option<&'a Value> {
        self.fields.get(field).filter(|v| !v.is_null())
    }

    fn int(&self, field: &'static str) -> Result<i64, DecodeError> {
        let value = self.present(field).ok_or(DecodeError::MissingField {
            resource: self.resource,
            index: self.index,
            field,
        })?;
        integer(value).ok_or_else(|| self.wrong_type(field, "an integer"))
    }

    fn string(&self, field: &'static str) -> Result<String, DecodeError> {
        self.optional_string(field)?
            .ok_or(DecodeError::MissingField {
                resource: self.resource,
                index: self.index,
                field,
            })
    }

    fn optional_string(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
        match self.present(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.wrong_type(field, "a string")),
        }
    }

    /// Like `optional_string`, but empty strings count as absent.
    fn non_empty_string(&self, field: &'static str) -> Result<Option<String>, DecodeError> {
        Ok(self.optional_string(field)?.filter(|s| !s.is_empty()))
    }

    /// Like `non_empty_string`, but a mistyped value is logged and counts as
    /// absent.
    fn lenient_string(&self, field: &'static str) -> Option<String> {
        self.non_empty_string(field).unwrap_or_else(|e| {
            warn!(error = %e, "Ignoring mistyped field");
            None
        })
    }
}

/// Accept integers as well as integral floating-point numbers.
fn integer(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value
        .as_f64()
        .filter(|f| f.is_finite() && f.fract() == 0.0)
        .map(|f| f as i64)
}

fn decode_list<T>(
    resource: &'static str,
    value: &Value,
    decode: impl Fn(Record<'_>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let items = value
        .as_array()
        .ok_or(DecodeError::NotAList { resource })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| decode(Record::new(resource, index, item)?))
        .collect()
}

/// Decode the response of the target listing.
pub fn decode_targets(value: &Value) -> Result<Vec<Target>, DecodeError> {
    decode_list("target", value, |r| {
        Ok(Target {
            id: TargetId(r.int("id")?),
            name: r.string("name")?,
        })
    })
}

/// Decode the response of the extent listing.
pub fn decode_extents(value: &Value) -> Result<Vec<Extent>, DecodeError> {
    decode_list("extent", value, |r| {
        Ok(Extent {
            id: ExtentId(r.int("id")?),
            name: r.string("name")?,
            disk: r.optional_string("disk")?,
            extent_type: ExtentType::from(r.string("type")?),
        })
    })
}

/// Decode the response of the target-extent association listing.
pub fn decode_associations(value: &Value) -> Result<Vec<Association>, DecodeError> {
    decode_list("targetextent", value, |r| {
        Ok(Association {
            id: r.int("id")?,
            target: TargetId(r.int("target")?),
            extent: ExtentId(r.int("extent")?),
        })
    })
}

/// Decode the response of the global session listing.
///
/// The `target` field carries either a numeric id or a qualified name. Only a
/// non-list response is an error: records that are not objects or carry
/// mistyped fields decode with those fields absent, and are left for the
/// resolver to attribute or drop.
pub fn decode_sessions(value: &Value) -> Result<Vec<SessionRecord>, DecodeError> {
    let items = value
        .as_array()
        .ok_or(DecodeError::NotAList { resource: "session" })?;

    Ok(items
        .iter()
        .enumerate()
        .map(|(index, item)| decode_session(index, item))
        .collect())
}

fn decode_session(index: usize, item: &Value) -> SessionRecord {
    let r = match Record::new("session", index, item) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed session record");
            return SessionRecord::default();
        }
    };

    let (target_id, qualified_name) = match r.present("target") {
        None => (None, None),
        Some(Value::String(s)) if s.is_empty() => (None, None),
        Some(Value::String(s)) => (None, Some(s.clone())),
        Some(v) => match integer(v) {
            Some(id) => (Some(TargetId(id)), None),
            None => {
                let e = r.wrong_type("target", "an id or a name");
                warn!(error = %e, "Ignoring mistyped field");
                (None, None)
            }
        },
    };

    SessionRecord {
        target_id,
        target_alias: r.lenient_string("target_alias"),
        target_name: r.lenient_string("target_name"),
        qualified_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_targets_with_float_ids() {
        let value = json!([
            {"id": 1.0, "name": "pvc-a", "alias": null, "mode": "ISCSI"},
            {"id": 7, "name": "pvc-b"}
        ]);
        let targets = decode_targets(&value).unwrap();
        assert_eq!(targets, vec![Target::new(1, "pvc-a"), Target::new(7, "pvc-b")]);
    }

    #[test]
    fn test_decode_targets_rejects_fractional_id() {
        let value = json!([{"id": 1.5, "name": "pvc-a"}]);
        assert_eq!(
            decode_targets(&value).unwrap_err(),
            DecodeError::WrongType {
                resource: "target",
                index: 0,
                field: "id",
                expected: "an integer",
            }
        );
    }

    #[test]
    fn test_decode_targets_missing_name() {
        let value = json!([{"id": 1, "name": "ok"}, {"id": 2}]);
        assert_eq!(
            decode_targets(&value).unwrap_err(),
            DecodeError::MissingField {
                resource: "target",
                index: 1,
                field: "name",
            }
        );
    }

    #[test]
    fn test_decode_not_a_list() {
        let value = json!({"id": 1});
        assert_eq!(
            decode_targets(&value).unwrap_err(),
            DecodeError::NotAList { resource: "target" }
        );
    }

    #[test]
    fn test_decode_not_an_object() {
        let value = json!([{"id": 1, "extent": 2, "target": 3}, "garbage"]);
        assert_eq!(
            decode_associations(&value).unwrap_err(),
            DecodeError::NotAnObject {
                resource: "targetextent",
                index: 1,
            }
        );
    }

    #[test]
    fn test_decode_extents() {
        let value = json!([
            {"id": 5, "name": "e5", "disk": "zvol/tank/pvc-a", "type": "DISK"},
            {"id": 6.0, "name": "e6", "disk": null, "path": "/mnt/tank/file", "type": "FILE"},
            {"id": 7, "name": "e7", "type": "NEWTHING"}
        ]);
        let extents = decode_extents(&value).unwrap();
        assert_eq!(extents.len(), 3);
        assert_eq!(extents[0].zvol_path(), Some("tank/pvc-a"));
        assert_eq!(extents[1].extent_type, ExtentType::File);
        assert_eq!(extents[1].disk, None);
        assert_eq!(extents[2].extent_type, ExtentType::Other("NEWTHING".into()));
    }

    #[test]
    fn test_zvol_path_requires_disk_type_and_prefix() {
        assert_eq!(Extent::disk(1, "e", "zvol/tank/v").zvol_path(), Some("tank/v"));
        assert_eq!(Extent::disk(1, "e", "/dev/da0").zvol_path(), None);

        let mut file = Extent::file(2, "f");
        file.disk = Some("zvol/tank/v".into());
        assert_eq!(file.zvol_path(), None);
    }

    #[test]
    fn test_decode_associations() {
        let value = json!([{"id": 3.0, "target": 1.0, "extent": 5.0, "lunid": 0}]);
        assert_eq!(decode_associations(&value).unwrap(), vec![Association::new(3, 1, 5)]);
    }

    #[test]
    fn test_decode_sessions_target_variants() {
        let value = json!([
            {"target": 4.0},
            {"target": "iqn.2005-10.org.freenas.ctl:pvc-a", "target_alias": ""},
            {"target_alias": "pvc-b", "initiator": "iqn.1993-08.org.debian:01:abc"},
            {"target_name": "pvc-c", "target": null}
        ]);
        let sessions = decode_sessions(&value).unwrap();
        assert_eq!(sessions[0].target_id, Some(TargetId(4)));
        assert_eq!(
            sessions[1].qualified_name.as_deref(),
            Some("iqn.2005-10.org.freenas.ctl:pvc-a")
        );
        assert_eq!(sessions[1].target_alias, None);
        assert_eq!(sessions[2].target_alias.as_deref(), Some("pvc-b"));
        assert_eq!(sessions[3].target_name.as_deref(), Some("pvc-c"));
        assert_eq!(sessions[3].target_id, None);
    }

    #[test]
    fn test_decode_sessions_ignores_mistyped_fields() {
        let value = json!([
            {"target": "iqn.2005-10.org.freenas.ctl:pvc-a"},
            {"target": "iqn.2005-10.org.freenas.ctl:pvc-b"},
            {"target_alias": 7, "target": "iqn.2005-10.org.freenas.ctl:pvc-c"},
            {"target": true, "target_name": "pvc-d"},
            {"target": 1.5},
            "not-a-session"
        ]);
        let sessions = decode_sessions(&value).unwrap();

        assert_eq!(sessions.len(), 6);
        assert_eq!(
            sessions[0].qualified_name.as_deref(),
            Some("iqn.2005-10.org.freenas.ctl:pvc-a")
        );
        assert_eq!(
            sessions[1].qualified_name.as_deref(),
            Some("iqn.2005-10.org.freenas.ctl:pvc-b")
        );
        // The bad alias is dropped, the rest of the record still counts
        assert_eq!(sessions[2].target_alias, None);
        assert_eq!(
            sessions[2].qualified_name.as_deref(),
            Some("iqn.2005-10.org.freenas.ctl:pvc-c")
        );
        assert_eq!(sessions[3].target_id, None);
        assert_eq!(sessions[3].target_name.as_deref(), Some("pvc-d"));
        assert_eq!(sessions[4], SessionRecord::default());
        assert_eq!(sessions[5], SessionRecord::default());
    }

    #[test]
    fn test_decode_sessions_requires_a_list() {
        assert_eq!(
            decode_sessions(&json!({"target": 1})).unwrap_err(),
            DecodeError::NotAList { resource: "session" }
        );
    }

    #[test]
    fn test_extent_type_serializes_as_tag() {
        let json = serde_json::to_value(Extent::disk(1, "e", "zvol/x")).unwrap();
        assert_eq!(json["type"], "DISK");
        assert_eq!(json["id"], 1);
    }
}
