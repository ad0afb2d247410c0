//! Ownership snapshot: the last declaration the engine fully applied.
//!
//! The snapshot is the whole spec, serialized into an annotation on the
//! project document once a pass settles every category. Only remote items
//! matching something in the snapshot may be deleted.

use std::collections::BTreeMap;

use crate::error::SnapshotError;
use crate::spec::ProjectSpec;

pub const LAST_APPLIED_ANNOTATION: &str = "tether.io/last-applied-configuration";

/// Parsed ownership snapshot. Empty when nothing was ever applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ownership {
    snapshot: ProjectSpec,
    recorded: bool,
}

impl Ownership {
    /// Parse the snapshot blob. A missing or blank blob means nothing is
    /// owned; a blob that does not parse is an error.
    pub fn parse(blob: Option<&str>) -> Result<Self, SnapshotError> {
        match blob.map(str::trim).filter(|b| !b.is_empty()) {
            None => Ok(Self::default()),
            Some(blob) => {
                let snapshot = serde_json::from_str(blob).map_err(|source| SnapshotError {
                    annotation: LAST_APPLIED_ANNOTATION,
                    source,
                })?;
                Ok(Self {
                    snapshot,
                    recorded: true,
                })
            }
        }
    }

    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Result<Self, SnapshotError> {
        Self::parse(annotations.get(LAST_APPLIED_ANNOTATION).map(String::as_str))
    }

    pub fn is_recorded(&self) -> bool {
        self.recorded
    }

    /// The owned declaration; empty when nothing was recorded.
    pub fn spec(&self) -> &ProjectSpec {
        &self.snapshot
    }
}

/// Record `spec` as the new ownership snapshot.
pub fn record(
    annotations: &mut BTreeMap<String, String>,
    spec: &ProjectSpec,
) -> Result<(), serde_json::Error> {
    let blob = serde_json::to_string(spec)?;
    annotations.insert(LAST_APPLIED_ANNOTATION.to_string(), blob);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CustomRole;

    #[test]
    fn test_absent_snapshot_owns_nothing() {
        let owned = Ownership::parse(None).unwrap();
        assert!(!owned.is_recorded());
        assert!(owned.spec().custom_roles.is_empty());

        let blank = Ownership::parse(Some("   ")).unwrap();
        assert!(!blank.is_recorded());
    }

    #[test]
    fn test_malformed_snapshot_is_an_error() {
        let err = Ownership::parse(Some("{not json")).unwrap_err();
        assert_eq!(err.annotation, LAST_APPLIED_ANNOTATION);
    }

    #[test]
    fn test_record_then_parse() {
        let spec = ProjectSpec {
            project_id: "p1".to_string(),
            custom_roles: vec![CustomRole {
                name: "reader".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let mut annotations = BTreeMap::new();
        record(&mut annotations, &spec).unwrap();

        let owned = Ownership::from_annotations(&annotations).unwrap();
        assert!(owned.is_recorded());
        assert_eq!(owned.spec(), &spec);
    }
}
