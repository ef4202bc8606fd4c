//! Outcome of an invalidation check.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use confcache_common::ProjectPath;
use serde::{Deserialize, Serialize};

use crate::entry::ProjectTree;

/// Why a project's cached configuration can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// A recorded input changed; the text comes from the fingerprint itself.
    Fingerprint(String),
    /// A recorded input could not be re-evaluated.
    EvaluationFailed(String),
    /// The project is gone from the current build.
    ProjectRemoved,
    /// A project whose model this project read was invalidated.
    Upstream(ProjectPath),
    /// No trustworthy ledger could be read.
    LedgerUnavailable(String),
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fingerprint(reason) => f.write_str(reason),
            Self::EvaluationFailed(err) => write!(f, "fingerprint could not be checked: {err}"),
            Self::ProjectRemoved => f.write_str("project was removed from the build"),
            Self::Upstream(path) => write!(f, "depends on invalidated project '{path}'"),
            Self::LedgerUnavailable(err) => write!(f, "fingerprint ledger unavailable: {err}"),
        }
    }
}

/// Projects that must be re-evaluated, each with the reasons why.
///
/// A project absent from the result can reuse its cached configuration.
///
/// Reasons are listed direct first, then one [`InvalidationReason::Upstream`]
/// per invalid project it consumed. Paths that are no longer part of the
/// build can appear with [`InvalidationReason::ProjectRemoved`] when the
/// ledger still mentions them; callers indexing per-project state should
/// skip paths their project tree does not contain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationResult {
    projects: HashMap<ProjectPath, Vec<InvalidationReason>>,
}

impl InvalidationResult {
    pub(crate) fn from_map(projects: HashMap<ProjectPath, Vec<InvalidationReason>>) -> Self {
        Self { projects }
    }

    /// Invalidates every project of `tree` for the same `reason`.
    pub fn invalidate_all<T: ProjectTree + ?Sized>(tree: &T, reason: InvalidationReason) -> Self {
        let projects = tree
            .projects()
            .into_iter()
            .map(|path| (path, vec![reason.clone()]))
            .collect();
        Self { projects }
    }

    /// Returns `true` if every project can reuse its cached configuration.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Number of invalidated projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Returns `true` if `path` must be re-evaluated.
    pub fn contains(&self, path: &ProjectPath) -> bool {
        self.projects.contains_key(path)
    }

    /// Reasons recorded for `path`, direct reasons first.
    ///
    /// Empty for projects that are not invalidated.
    pub fn reasons(&self, path: &ProjectPath) -> &[InvalidationReason] {
        self.projects.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The reason surfaced first when reporting `path`.
    pub fn first_reason(&self, path: &ProjectPath) -> Option<&InvalidationReason> {
        self.reasons(path).first()
    }

    /// Invalidated projects in path order.
    pub fn paths(&self) -> Vec<ProjectPath> {
        let mut paths: Vec<ProjectPath> = self.projects.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Iterates over invalidated projects in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProjectPath, &[InvalidationReason])> {
        self.projects.iter().map(|(p, r)| (p, r.as_slice()))
    }

    /// Renders the result for the per-project cache-state store.
    pub fn to_report(&self) -> InvalidationReport {
        let invalidated = self
            .projects
            .iter()
            .map(|(path, reasons)| (path.clone(), reasons.iter().map(ToString::to_string).collect()))
            .collect();
        InvalidationReport { invalidated }
    }
}

/// Serializable, ordered rendering of an [`InvalidationResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Reason texts per invalidated project.
    pub invalidated: BTreeMap<ProjectPath, Vec<String>>,
}

impl InvalidationReport {
    /// Serializes the report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Outcome of checking a whole ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckedFingerprint {
    /// Every recorded fingerprint still holds.
    Valid,
    /// Some projects must be re-evaluated.
    ProjectsInvalid(InvalidationResult),
    /// The ledger itself cannot be trusted; everything must be re-evaluated.
    EntryInvalid(InvalidationReason),
}

impl CheckedFingerprint {
    /// Returns `true` if the whole cached configuration can be reused.
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Flattens the outcome into the set of projects to re-evaluate.
    pub fn into_result<T: ProjectTree + ?Sized>(self, tree: &T) -> InvalidationResult {
        match self {
            Self::Valid => InvalidationResult::default(),
            Self::ProjectsInvalid(result) => result,
            Self::EntryInvalid(reason) => InvalidationResult::invalidate_all(tree, reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn p(s: &str) -> ProjectPath {
        ProjectPath::parse(s).unwrap()
    }

    fn sample() -> InvalidationResult {
        let mut projects = HashMap::new();
        projects.insert(
            p(":b"),
            vec![
                InvalidationReason::Fingerprint("file 'b/build.gradle' has changed".to_string()),
                InvalidationReason::EvaluationFailed("permission denied".to_string()),
            ],
        );
        projects.insert(p(":a"), vec![InvalidationReason::Upstream(p(":b"))]);
        InvalidationResult::from_map(projects)
    }

    #[test]
    fn reason_display() {
        assert_eq!(
            InvalidationReason::Upstream(p(":core")).to_string(),
            "depends on invalidated project ':core'"
        );
        assert_eq!(
            InvalidationReason::Fingerprint("env 'CI' changed".to_string()).to_string(),
            "env 'CI' changed"
        );
        assert_eq!(
            InvalidationReason::ProjectRemoved.to_string(),
            "project was removed from the build"
        );
    }

    #[test]
    fn accessors() {
        let result = sample();
        assert_eq!(result.len(), 2);
        assert!(result.contains(&p(":a")));
        assert!(!result.contains(&p(":c")));
        assert_eq!(result.paths(), vec![p(":a"), p(":b")]);
        assert_eq!(result.reasons(&p(":b")).len(), 2);
        assert!(result.reasons(&p(":c")).is_empty());
        assert_eq!(
            result.first_reason(&p(":a")),
            Some(&InvalidationReason::Upstream(p(":b")))
        );
    }

    #[test]
    fn report_is_ordered_and_serializable() {
        let report = sample().to_report();
        let keys: Vec<_> = report.invalidated.keys().cloned().collect();
        assert_eq!(keys, vec![p(":a"), p(":b")]);

        let json = report.to_json().unwrap();
        assert!(json.contains("depends on invalidated project ':b'"));
        let back: InvalidationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn invalidate_all_covers_tree() {
        let tree: BTreeSet<ProjectPath> = [p(":"), p(":x")].into_iter().collect();
        let result = InvalidationResult::invalidate_all(
            &tree,
            InvalidationReason::LedgerUnavailable("missing".to_string()),
        );
        assert_eq!(result.paths(), vec![p(":"), p(":x")]);
    }

    #[test]
    fn checked_fingerprint_flattening() {
        let tree: BTreeSet<ProjectPath> = [p(":a"), p(":b")].into_iter().collect();
        assert!(CheckedFingerprint::Valid.is_valid());
        assert!(CheckedFingerprint::Valid.into_result(&tree).is_empty());

        let entry_invalid =
            CheckedFingerprint::EntryInvalid(InvalidationReason::LedgerUnavailable("gone".into()));
        assert!(!entry_invalid.is_valid());
        assert_eq!(entry_invalid.into_result(&tree).len(), 2);

        let partial = CheckedFingerprint::ProjectsInvalid(sample());
        assert_eq!(partial.into_result(&tree).paths(), vec![p(":a"), p(":b")]);
    }
}
