//! Fingerprint entries recorded while projects are being configured.
//!
//! A ledger is a sequence of [`FingerprintEntry`] values. Each entry either
//! ties one external input to the project whose evaluation read it, or records
//! that one project's evaluation read another project's evaluated model.

use confcache_common::ProjectPath;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

/// Outcome of re-checking one recorded input against the current environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The input is unchanged.
    Valid,
    /// The input changed; `reason` describes how.
    Invalid {
        /// Short human-readable explanation.
        reason: String,
    },
}

impl Verdict {
    /// Shorthand for [`Verdict::Invalid`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    /// Returns `true` for [`Verdict::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// One recorded external input whose change invalidates a cached evaluation.
///
/// Implementations live with the orchestrator (file hashes, environment
/// variables, property sources). The cache core only ever asks them to
/// re-evaluate themselves against `Env`, possibly from several threads at once.
pub trait FingerprintValue: Send + Sync {
    /// Accessor for the current environment handed to every evaluation.
    type Env: ?Sized + Sync;

    /// Checks whether the recorded input still holds.
    ///
    /// Errors are not fatal: the checker treats them as an invalid verdict.
    fn evaluate(&self, env: &Self::Env) -> Result<Verdict, EvaluationError>;
}

/// A single ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FingerprintEntry<V> {
    /// The evaluation of `project_path` depended on `value`.
    ProjectFingerprint {
        /// The project whose evaluation read the input.
        project_path: ProjectPath,
        /// The recorded input.
        value: V,
    },
    /// Evaluating `consuming_project` read the evaluated model of `target_project`.
    ProjectDependency {
        /// The project that read another project's model.
        consuming_project: ProjectPath,
        /// The project whose model was read.
        target_project: ProjectPath,
    },
}

impl<V> FingerprintEntry<V> {
    /// Creates a [`FingerprintEntry::ProjectFingerprint`].
    pub fn fingerprint(project_path: ProjectPath, value: V) -> Self {
        Self::ProjectFingerprint {
            project_path,
            value,
        }
    }

    /// Creates a [`FingerprintEntry::ProjectDependency`].
    pub fn dependency(consuming_project: ProjectPath, target_project: ProjectPath) -> Self {
        Self::ProjectDependency {
            consuming_project,
            target_project,
        }
    }
}

/// The orchestrator's view of which projects exist in the current build.
pub trait ProjectTree: Sync {
    /// Returns `true` if `path` is a project of the current build.
    fn contains(&self, path: &ProjectPath) -> bool;

    /// Returns every project of the current build.
    fn projects(&self) -> Vec<ProjectPath>;
}

impl ProjectTree for std::collections::BTreeSet<ProjectPath> {
    fn contains(&self, path: &ProjectPath) -> bool {
        std::collections::BTreeSet::contains(self, path)
    }

    fn projects(&self) -> Vec<ProjectPath> {
        self.iter().cloned().collect()
    }
}

impl<S: std::hash::BuildHasher + Sync> ProjectTree for std::collections::HashSet<ProjectPath, S> {
    fn contains(&self, path: &ProjectPath) -> bool {
        std::collections::HashSet::contains(self, path)
    }

    fn projects(&self) -> Vec<ProjectPath> {
        let mut all: Vec<ProjectPath> = self.iter().cloned().collect();
        all.sort();
        all
    }
}
