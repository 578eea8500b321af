use std::collections::BTreeSet;

/// Volumes declared by a pod compared against what its backup annotation
/// already lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDiff {
    pub declared: BTreeSet<String>,
    pub current: Vec<String>,
    pub missing: BTreeSet<String>,
}

impl AnnotationDiff {
    /// Compare the declared volume names with the raw annotation value.
    ///
    /// Only missing volumes are reported. Entries in the annotation that no
    /// longer match a declared volume are left alone.
    pub fn compute(declared: &BTreeSet<String>, current: Option<&str>) -> Self {
        let current = parse_annotation(current);
        let missing = declared
            .iter()
            .filter(|volume| !current.contains(*volume))
            .cloned()
            .collect();

        Self {
            declared: declared.clone(),
            current,
            missing,
        }
    }

    /// True when the annotation already covers every declared volume
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }

    /// The annotation entries after reconciliation: existing entries keep their
    /// position and missing volumes are appended in sorted order.
    pub fn desired(&self) -> Vec<String> {
        self.current
            .iter()
            .chain(self.missing.iter())
            .cloned()
            .collect()
    }
}

/// Split an annotation value into its volume names.
pub fn parse_annotation(value: Option<&str>) -> Vec<String> {
    match value {
        Some(value) if !value.is_empty() => value.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volumes(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn absent_annotation_misses_everything() {
        let diff = AnnotationDiff::compute(&volumes(&["data", "logs"]), None);
        assert!(diff.current.is_empty());
        assert_eq!(diff.missing, volumes(&["data", "logs"]));
        assert_eq!(diff.desired(), vec!["data", "logs"]);
    }

    #[test]
    fn empty_annotation_parses_to_nothing() {
        assert!(parse_annotation(Some("")).is_empty());
        assert!(parse_annotation(None).is_empty());
    }

    #[test]
    fn covered_volumes_need_nothing() {
        let diff = AnnotationDiff::compute(&volumes(&["data"]), Some("data,logs"));
        assert!(diff.is_satisfied());
        assert_eq!(diff.desired(), vec!["data", "logs"]);
    }

    #[test]
    fn missing_volumes_are_appended_after_existing_entries() {
        let diff = AnnotationDiff::compute(&volumes(&["data", "cache"]), Some("data"));
        assert_eq!(diff.missing, volumes(&["cache"]));
        assert_eq!(diff.desired(), vec!["data", "cache"]);
    }

    #[test]
    fn no_declared_volumes_never_needs_a_patch() {
        for annotation in [None, Some(""), Some("stale"), Some("a,b,c")] {
            let diff = AnnotationDiff::compute(&BTreeSet::new(), annotation);
            assert!(diff.is_satisfied(), "annotation {:?}", annotation);
        }
    }

    #[test]
    fn stale_entries_are_kept() {
        let diff = AnnotationDiff::compute(&volumes(&["new"]), Some("old,gone"));
        assert_eq!(diff.desired(), vec!["old", "gone", "new"]);
    }

    #[test]
    fn missing_is_set_difference() {
        let cases: &[(&[&str], Option<&str>)] = &[
            (&["a", "b", "c"], Some("b")),
            (&["a"], Some("a,a")),
            (&["x", "y"], Some("y,z,x")),
            (&["a", "b"], Some(" a,b")),
        ];
        for (declared, annotation) in cases {
            let declared = volumes(declared);
            let parsed: BTreeSet<String> = parse_annotation(*annotation).into_iter().collect();
            let diff = AnnotationDiff::compute(&declared, *annotation);
            let expected: BTreeSet<String> = declared.difference(&parsed).cloned().collect();
            assert_eq!(diff.missing, expected);
            assert_eq!(diff.is_satisfied(), declared.is_subset(&parsed));
        }
    }
}
