use serde::Serialize;
use serde_json::Value;

use crate::{diff::AnnotationDiff, Result, BACKUP_VOLUMES_ANNOTATION};

const ANNOTATIONS_PATH: &str = "/metadata/annotations";

/// A single RFC 6902 operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. } | PatchOperation::Replace { path, .. } => path,
        }
    }
}

/// JSON-Patch document scoped to the backup-volumes annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PatchDocument(pub Vec<PatchOperation>);

impl PatchDocument {
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    /// The annotation value this document writes
    pub fn annotation_value(&self) -> Option<&str> {
        self.0.iter().find_map(|op| match op {
            PatchOperation::Add { path, value } | PatchOperation::Replace { path, value }
                if path == &annotation_path() =>
            {
                value.as_str()
            }
            _ => None,
        })
    }

    pub fn to_json_patch(&self) -> Result<json_patch::Patch> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

/// Escape a JSON Pointer reference token (RFC 6901)
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Path of the backup-volumes annotation inside a pod object
pub fn annotation_path() -> String {
    format!(
        "{}/{}",
        ANNOTATIONS_PATH,
        escape_pointer_token(BACKUP_VOLUMES_ANNOTATION)
    )
}

/// Build the narrowest patch that brings the annotation up to date, or `None`
/// when nothing is missing.
///
/// The annotations map is only created when the pod has none, so concurrent
/// writers of other annotations are never clobbered.
pub fn build_patch(
    has_annotations_map: bool,
    annotation_present: bool,
    diff: &AnnotationDiff,
) -> Option<PatchDocument> {
    if diff.is_satisfied() {
        return None;
    }

    let mut ops = Vec::with_capacity(2);
    if !has_annotations_map {
        ops.push(PatchOperation::Add {
            path: ANNOTATIONS_PATH.to_string(),
            value: Value::Object(Default::default()),
        });
    }

    let path = annotation_path();
    let value = Value::String(diff.desired().join(","));
    if has_annotations_map && annotation_present {
        ops.push(PatchOperation::Replace { path, value });
    } else {
        ops.push(PatchOperation::Add { path, value });
    }

    Some(PatchDocument(ops))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn diff(declared: &[&str], current: Option<&str>) -> AnnotationDiff {
        let declared: BTreeSet<String> = declared.iter().map(|s| s.to_string()).collect();
        AnnotationDiff::compute(&declared, current)
    }

    #[test]
    fn annotation_path_escapes_slash() {
        assert_eq!(
            annotation_path(),
            "/metadata/annotations/backup.velero.io~1backup-volumes"
        );
        assert_eq!(escape_pointer_token("a~b/c"), "a~0b~1c");
    }

    #[test]
    fn nothing_missing_builds_nothing() {
        assert!(build_patch(true, true, &diff(&["data"], Some("data,logs"))).is_none());
        assert!(build_patch(false, false, &diff(&[], None)).is_none());
    }

    #[test]
    fn missing_annotations_map_is_created_first() {
        let patch = build_patch(false, false, &diff(&["data", "logs"], None)).unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([
                {"op": "add", "path": "/metadata/annotations", "value": {}},
                {
                    "op": "add",
                    "path": "/metadata/annotations/backup.velero.io~1backup-volumes",
                    "value": "data,logs"
                }
            ])
        );
    }

    #[test]
    fn existing_annotation_is_replaced_in_order() {
        let patch = build_patch(true, true, &diff(&["data", "cache"], Some("data"))).unwrap();
        assert_eq!(patch.operations().len(), 1);
        assert!(matches!(
            &patch.operations()[0],
            PatchOperation::Replace { value, .. } if value == "data,cache"
        ));
        assert_eq!(patch.annotation_value(), Some("data,cache"));
    }

    #[test]
    fn other_annotations_only_add_the_key() {
        let patch = build_patch(true, false, &diff(&["data"], None)).unwrap();
        assert_eq!(patch.operations().len(), 1);
        assert!(matches!(&patch.operations()[0], PatchOperation::Add { .. }));
        assert!(patch
            .operations()
            .iter()
            .all(|op| op.path().starts_with("/metadata/annotations")));
    }

    #[test]
    fn patch_leaves_unrelated_fields_alone() {
        let mut pod = json!({
            "metadata": {
                "name": "web",
                "annotations": {"team": "storage", "backup.velero.io/backup-volumes": "data"}
            },
            "spec": {"nodeName": "node-a"}
        });
        let patch = build_patch(true, true, &diff(&["data", "cache"], Some("data"))).unwrap();
        json_patch::patch(&mut pod, &patch.to_json_patch().unwrap()).unwrap();

        assert_eq!(pod["metadata"]["annotations"]["team"], "storage");
        assert_eq!(
            pod["metadata"]["annotations"]["backup.velero.io/backup-volumes"],
            "data,cache"
        );
        assert_eq!(pod["spec"]["nodeName"], "node-a");
    }

    #[test]
    fn repeated_builds_are_identical() {
        let d = diff(&["z", "a", "m"], Some("q"));
        assert_eq!(build_patch(true, true, &d), build_patch(true, true, &d));
        assert_eq!(
            build_patch(true, true, &d).unwrap().annotation_value(),
            Some("q,a,m,z")
        );
    }
}
