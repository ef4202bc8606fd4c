//! Replays a fingerprint ledger against the current environment.
//!
//! The check runs in two steps. First every recorded fingerprint is
//! re-evaluated; these evaluations are independent and run in parallel
//! batches. Then invalidation is propagated breadth-first along the reversed
//! dependency graph, visiting each project at most once, so cycles between
//! projects terminate.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use confcache_common::ProjectPath;
use confcache_config::CheckConfig;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::de::DeserializeOwned;

use crate::entry::{FingerprintEntry, FingerprintValue, ProjectTree, Verdict};
use crate::error::LedgerError;
use crate::graph::DependencyGraph;
use crate::ledger::{open_ledger, LedgerHandle};
use crate::result::{CheckedFingerprint, InvalidationReason, InvalidationResult};

/// Scheduling knobs for the evaluation step.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    parallel: bool,
    batch_size: usize,
    pool: Option<Arc<ThreadPool>>,
}

impl CheckOptions {
    /// Builds options from the `[check]` configuration section.
    ///
    /// If a dedicated pool was requested but cannot be created, evaluation
    /// falls back to the global pool.
    pub fn from_config(config: &CheckConfig) -> Self {
        let pool = config.threads.and_then(|threads| {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .thread_name(|idx| format!("confcache-check-{idx}"))
                .build()
            {
                Ok(pool) => Some(Arc::new(pool)),
                Err(err) => {
                    tracing::warn!(
                        target: "confcache.check",
                        threads,
                        error = %err,
                        "failed to build fingerprint evaluation pool; using the global pool"
                    );
                    None
                }
            }
        });
        Self {
            parallel: config.parallel,
            batch_size: config.batch_size.max(1),
            pool,
        }
    }

    /// Options that evaluate every fingerprint on the calling thread.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    /// Overrides the number of fingerprints evaluated per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self::from_config(&CheckConfig::default())
    }
}

/// Direct reasons per project, in the order they were observed.
type Reasons = HashMap<ProjectPath, Vec<InvalidationReason>>;

/// Decides which projects' cached configuration must be re-evaluated.
pub struct InvalidationChecker<'a, V: FingerprintValue, T: ?Sized> {
    env: &'a V::Env,
    tree: &'a T,
    options: CheckOptions,
}

impl<'a, V, T> InvalidationChecker<'a, V, T>
where
    V: FingerprintValue,
    T: ProjectTree + ?Sized,
{
    /// Creates a checker evaluating fingerprints against `env`, for a build
    /// consisting of the projects in `tree`.
    pub fn new(env: &'a V::Env, tree: &'a T) -> Self {
        Self {
            env,
            tree,
            options: CheckOptions::default(),
        }
    }

    /// Replaces the scheduling options.
    pub fn with_options(mut self, options: CheckOptions) -> Self {
        self.options = options;
        self
    }

    /// Checks an in-memory ledger.
    pub fn check(&self, entries: &[FingerprintEntry<V>]) -> InvalidationResult {
        let graph = DependencyGraph::build(entries);
        self.check_with_graph(entries, &graph)
    }

    /// Checks an in-memory ledger against a prebuilt dependency graph.
    pub fn check_with_graph(
        &self,
        entries: &[FingerprintEntry<V>],
        graph: &DependencyGraph,
    ) -> InvalidationResult {
        let mut direct = Reasons::new();
        let mut batch = Vec::with_capacity(self.options.batch_size.min(entries.len()));
        for entry in entries {
            if let FingerprintEntry::ProjectFingerprint {
                project_path,
                value,
            } = entry
            {
                batch.push((project_path, value));
                if batch.len() >= self.options.batch_size {
                    self.evaluate_batch(&batch, &mut direct);
                    batch.clear();
                }
            }
        }
        self.evaluate_batch(&batch, &mut direct);
        self.propagate(direct, graph)
    }

    /// Checks a ledger produced lazily, entry by entry.
    ///
    /// Fingerprints are evaluated in bounded batches as they arrive and only
    /// the dependency edges are retained, so the ledger is never held in
    /// memory as a whole. A read error aborts the check: a partially read
    /// ledger is never trusted.
    pub fn check_stream<I>(&self, entries: I) -> Result<InvalidationResult, LedgerError>
    where
        I: IntoIterator<Item = Result<FingerprintEntry<V>, LedgerError>>,
    {
        let mut graph = DependencyGraph::new();
        let mut direct = Reasons::new();
        let mut batch: Vec<(ProjectPath, V)> = Vec::new();
        let mut fingerprints = 0usize;

        for entry in entries {
            match entry? {
                FingerprintEntry::ProjectFingerprint {
                    project_path,
                    value,
                } => {
                    fingerprints += 1;
                    batch.push((project_path, value));
                    if batch.len() >= self.options.batch_size {
                        self.evaluate_owned(&batch, &mut direct);
                        batch.clear();
                    }
                }
                dependency => graph.add_entry(&dependency),
            }
        }
        self.evaluate_owned(&batch, &mut direct);

        let result = self.propagate(direct, &graph);
        tracing::debug!(
            target: "confcache.check",
            fingerprints,
            dependencies = graph.edge_count(),
            invalidated = result.len(),
            "checked fingerprint ledger"
        );
        Ok(result)
    }

    /// Reads and checks the sealed ledger at `path`.
    ///
    /// A missing, unreadable, or corrupt ledger yields
    /// [`CheckedFingerprint::EntryInvalid`], never a silent success.
    pub fn check_ledger(&self, path: &Path) -> CheckedFingerprint
    where
        V: DeserializeOwned,
    {
        let outcome = open_ledger::<V>(path).and_then(|reader| self.check_stream(reader));
        match outcome {
            Ok(result) if result.is_empty() => {
                tracing::info!(
                    target: "confcache.check",
                    path = %path.display(),
                    "configuration cache is reusable"
                );
                CheckedFingerprint::Valid
            }
            Ok(result) => {
                tracing::info!(
                    target: "confcache.check",
                    path = %path.display(),
                    invalidated = result.len(),
                    "configuration cache is partially invalidated"
                );
                CheckedFingerprint::ProjectsInvalid(result)
            }
            Err(err) => {
                match &err {
                    LedgerError::NotFound { .. } => tracing::info!(
                        target: "confcache.check",
                        path = %path.display(),
                        "no fingerprint ledger recorded"
                    ),
                    _ => tracing::warn!(
                        target: "confcache.check",
                        path = %path.display(),
                        error = %err,
                        "fingerprint ledger is unreadable; invalidating all projects"
                    ),
                }
                CheckedFingerprint::EntryInvalid(InvalidationReason::LedgerUnavailable(
                    err.to_string(),
                ))
            }
        }
    }

    /// Reads and checks the ledger referenced by `handle`.
    pub fn check_sealed(&self, handle: &LedgerHandle) -> CheckedFingerprint
    where
        V: DeserializeOwned,
    {
        self.check_ledger(handle.path())
    }

    fn evaluate_owned(&self, batch: &[(ProjectPath, V)], direct: &mut Reasons) {
        let refs: Vec<(&ProjectPath, &V)> = batch.iter().map(|(p, v)| (p, v)).collect();
        self.evaluate_batch(&refs, direct);
    }

    /// Evaluates one batch and folds the invalid verdicts into `direct`,
    /// keeping ledger order among a project's reasons.
    fn evaluate_batch(&self, batch: &[(&ProjectPath, &V)], direct: &mut Reasons) {
        if batch.is_empty() {
            return;
        }
        let verdicts: Vec<Option<InvalidationReason>> = if self.options.parallel && batch.len() > 1
        {
            let run = || {
                batch
                    .par_iter()
                    .map(|(path, value)| self.evaluate_one(path, value))
                    .collect::<Vec<_>>()
            };
            match &self.options.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        } else {
            batch
                .iter()
                .map(|(path, value)| self.evaluate_one(path, value))
                .collect()
        };

        for ((path, _), verdict) in batch.iter().zip(verdicts) {
            let Some(reason) = verdict else { continue };
            let reasons = direct.entry((*path).clone()).or_default();
            if reason == InvalidationReason::ProjectRemoved && reasons.contains(&reason) {
                continue;
            }
            reasons.push(reason);
        }
    }

    fn evaluate_one(&self, path: &ProjectPath, value: &V) -> Option<InvalidationReason> {
        if !self.tree.contains(path) {
            return Some(InvalidationReason::ProjectRemoved);
        }
        match value.evaluate(self.env) {
            Ok(Verdict::Valid) => None,
            Ok(Verdict::Invalid { reason }) => Some(InvalidationReason::Fingerprint(reason)),
            Err(err) => Some(InvalidationReason::EvaluationFailed(err.to_string())),
        }
    }

    /// Extends the direct invalidations to every transitive consumer.
    fn propagate(&self, mut projects: Reasons, graph: &DependencyGraph) -> InvalidationResult {
        if graph.is_empty() {
            return InvalidationResult::from_map(projects);
        }

        // A consumed project that no longer exists invalidates its consumers.
        for target in graph.targets() {
            if !self.tree.contains(target) {
                if let Entry::Vacant(slot) = projects.entry(target.clone()) {
                    slot.insert(vec![InvalidationReason::ProjectRemoved]);
                }
            }
        }

        let mut seeds: Vec<ProjectPath> = projects.keys().cloned().collect();
        seeds.sort();
        let mut visited: HashSet<ProjectPath> = seeds.iter().cloned().collect();
        let mut queue: VecDeque<ProjectPath> = seeds.into();

        // Every invalid upstream is named on its consumer; each project is
        // enqueued at most once.
        while let Some(upstream) = queue.pop_front() {
            for consumer in graph.out_neighbors(&upstream) {
                if !self.tree.contains(consumer) {
                    continue;
                }
                let reason = InvalidationReason::Upstream(upstream.clone());
                let reasons = projects.entry(consumer.clone()).or_default();
                if !reasons.contains(&reason) {
                    reasons.push(reason);
                }
                if visited.insert(consumer.clone()) {
                    queue.push_back(consumer.clone());
                }
            }
        }

        InvalidationResult::from_map(projects)
    }
}
