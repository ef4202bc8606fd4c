//! Invalidation behavior over in-memory ledgers.
//!
//! Covers the reference scenarios (chains, cycles, empty ledgers) and the
//! algebraic properties of the check: idempotence, monotonicity, closure
//! under dependency edges, and no invalidation without cause.

use std::collections::{BTreeSet, HashSet};

use confcache_common::ProjectPath;
use confcache_fingerprint::{
    CheckOptions, DependencyGraph, EvaluationError, FingerprintEntry, FingerprintValue,
    InvalidationChecker, InvalidationReason, InvalidationResult, Verdict,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An input identified by number; invalid when the number is in the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Input(u32);

struct Mismatches(HashSet<u32>);

impl FingerprintValue for Input {
    type Env = Mismatches;

    fn evaluate(&self, env: &Mismatches) -> Result<Verdict, EvaluationError> {
        if env.0.contains(&self.0) {
            Ok(Verdict::invalid(format!("input #{} has changed", self.0)))
        } else {
            Ok(Verdict::Valid)
        }
    }
}

type Entry = FingerprintEntry<Input>;

fn p(s: &str) -> ProjectPath {
    ProjectPath::parse(s).unwrap()
}

fn fp(path: &str, input: u32) -> Entry {
    FingerprintEntry::fingerprint(p(path), Input(input))
}

fn dep(consumer: &str, target: &str) -> Entry {
    FingerprintEntry::dependency(p(consumer), p(target))
}

fn tree(paths: &[&str]) -> BTreeSet<ProjectPath> {
    paths.iter().map(|s| p(s)).collect()
}

fn mismatches(inputs: &[u32]) -> Mismatches {
    Mismatches(inputs.iter().copied().collect())
}

fn run(entries: &[Entry], projects: &BTreeSet<ProjectPath>, invalid: &[u32]) -> InvalidationResult {
    let env = mismatches(invalid);
    InvalidationChecker::<Input, _>::new(&env, projects).check(entries)
}

fn paths(result: &InvalidationResult) -> BTreeSet<ProjectPath> {
    result.paths().into_iter().collect()
}

// ---------------------------------------------------------------------------
// Reference scenarios
// ---------------------------------------------------------------------------

#[test]
fn consumer_of_invalid_project_is_invalidated() {
    // :a reads :b's model; only :b's input changed.
    let projects = tree(&[":a", ":b"]);
    let entries = vec![fp(":a", 1), fp(":b", 2), dep(":a", ":b")];
    let result = run(&entries, &projects, &[2]);

    assert_eq!(paths(&result), tree(&[":a", ":b"]));
    assert_eq!(
        result.reasons(&p(":b")),
        &[InvalidationReason::Fingerprint("input #2 has changed".to_string())]
    );
    assert_eq!(
        result.reasons(&p(":a")),
        &[InvalidationReason::Upstream(p(":b"))]
    );
}

#[test]
fn invalidation_follows_dependency_chains() {
    let projects = tree(&[":a", ":b", ":c"]);
    let entries = vec![
        fp(":a", 1),
        fp(":b", 2),
        fp(":c", 3),
        dep(":a", ":b"),
        dep(":b", ":c"),
    ];
    let result = run(&entries, &projects, &[3]);

    assert_eq!(paths(&result), tree(&[":a", ":b", ":c"]));
    assert_eq!(
        result.first_reason(&p(":b")),
        Some(&InvalidationReason::Upstream(p(":c")))
    );
    assert_eq!(
        result.first_reason(&p(":a")),
        Some(&InvalidationReason::Upstream(p(":b")))
    );
}

#[test]
fn valid_cycle_terminates_without_invalidation() {
    let projects = tree(&[":a", ":b"]);
    let entries = vec![fp(":a", 1), fp(":b", 2), dep(":a", ":b"), dep(":b", ":a")];
    let result = run(&entries, &projects, &[]);
    assert!(result.is_empty());
}

#[test]
fn invalid_cycle_terminates_and_covers_both() {
    let projects = tree(&[":a", ":b", ":c"]);
    let entries = vec![fp(":a", 1), dep(":a", ":b"), dep(":b", ":a"), dep(":c", ":a")];
    let result = run(&entries, &projects, &[1]);
    assert_eq!(paths(&result), tree(&[":a", ":b", ":c"]));
    assert_eq!(
        result.reasons(&p(":a")),
        &[
            InvalidationReason::Fingerprint("input #1 has changed".to_string()),
            InvalidationReason::Upstream(p(":b")),
        ]
    );
    assert_eq!(
        result.reasons(&p(":c")),
        &[InvalidationReason::Upstream(p(":a"))]
    );
}

#[test]
fn empty_ledger_invalidates_nothing() {
    let projects = tree(&[":", ":a"]);
    let result = run(&[], &projects, &[1, 2, 3]);
    assert!(result.is_empty());
}

#[test]
fn self_dependency_has_no_effect() {
    let projects = tree(&[":a", ":b"]);
    let entries = vec![fp(":b", 1), dep(":a", ":a"), dep(":b", ":b")];
    let result = run(&entries, &projects, &[1]);
    assert_eq!(paths(&result), tree(&[":b"]));
}

#[test]
fn unrelated_projects_stay_valid() {
    let projects = tree(&[":a", ":b", ":c", ":d"]);
    let entries = vec![
        fp(":a", 1),
        fp(":b", 2),
        dep(":b", ":a"),
        dep(":a", ":c"),
        fp(":d", 4),
    ];
    let result = run(&entries, &projects, &[1]);
    // :c is upstream of :a, not downstream; :d is unrelated.
    assert_eq!(paths(&result), tree(&[":a", ":b"]));
}

#[test]
fn prebuilt_graph_gives_same_answer() {
    let projects = tree(&[":a", ":b", ":c"]);
    let entries = vec![fp(":c", 3), dep(":a", ":b"), dep(":b", ":c")];
    let env = mismatches(&[3]);
    let graph = DependencyGraph::build(&entries);
    let checker = InvalidationChecker::<Input, _>::new(&env, &projects);
    assert_eq!(checker.check_with_graph(&entries, &graph), checker.check(&entries));
}

// ---------------------------------------------------------------------------
// Properties over generated ledgers
// ---------------------------------------------------------------------------

struct Generated {
    projects: BTreeSet<ProjectPath>,
    entries: Vec<Entry>,
    inputs: u32,
}

fn generate(seed: u64, project_count: usize, fingerprints: usize, edges: usize) -> Generated {
    let mut rng = StdRng::seed_from_u64(seed);
    let names: Vec<String> = (0..project_count).map(|i| format!(":p{i}")).collect();
    let mut entries = Vec::new();
    for input in 0..fingerprints as u32 {
        let owner = &names[rng.gen_range(0..project_count)];
        entries.push(fp(owner, input));
    }
    for _ in 0..edges {
        let consumer = &names[rng.gen_range(0..project_count)];
        let target = &names[rng.gen_range(0..project_count)];
        entries.push(dep(consumer, target));
    }
    // Interleave so order carries no meaning.
    for i in (1..entries.len()).rev() {
        let j = rng.gen_range(0..=i);
        entries.swap(i, j);
    }
    Generated {
        projects: names.iter().map(|n| p(n)).collect(),
        entries,
        inputs: fingerprints as u32,
    }
}

fn pick_invalid(seed: u64, inputs: u32, count: usize) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.gen_range(0..inputs)).collect()
}

#[test]
fn check_is_idempotent() {
    for seed in 0..20 {
        let g = generate(seed, 30, 60, 50);
        let invalid = pick_invalid(seed + 100, g.inputs, 3);
        let first = run(&g.entries, &g.projects, &invalid);
        let second = run(&g.entries, &g.projects, &invalid);
        assert_eq!(paths(&first), paths(&second), "seed {seed}");
    }
}

#[test]
fn membership_is_independent_of_ledger_order() {
    for seed in 0..20 {
        let g = generate(seed, 25, 40, 40);
        let invalid = pick_invalid(seed + 200, g.inputs, 2);
        let forward = run(&g.entries, &g.projects, &invalid);
        let mut reversed = g.entries.clone();
        reversed.reverse();
        let backward = run(&reversed, &g.projects, &invalid);
        assert_eq!(paths(&forward), paths(&backward), "seed {seed}");
    }
}

#[test]
fn extra_mismatch_only_grows_the_result() {
    for seed in 0..20 {
        let g = generate(seed, 30, 60, 45);
        let mut invalid = pick_invalid(seed + 300, g.inputs, 2);
        let before = paths(&run(&g.entries, &g.projects, &invalid));
        invalid.push(pick_invalid(seed + 400, g.inputs, 1)[0]);
        let after = paths(&run(&g.entries, &g.projects, &invalid));
        assert!(before.is_subset(&after), "seed {seed}");
    }
}

#[test]
fn result_is_closed_under_dependency_edges() {
    for seed in 0..20 {
        let g = generate(seed, 40, 50, 80);
        let invalid = pick_invalid(seed + 500, g.inputs, 3);
        let result = run(&g.entries, &g.projects, &invalid);
        for entry in &g.entries {
            if let FingerprintEntry::ProjectDependency {
                consuming_project,
                target_project,
            } = entry
            {
                if result.contains(target_project) {
                    assert!(
                        result.contains(consuming_project),
                        "seed {seed}: {consuming_project} reads invalid {target_project}"
                    );
                }
            }
        }
    }
}

#[test]
fn no_project_is_invalidated_without_cause() {
    for seed in 0..20 {
        let g = generate(seed, 40, 30, 30);
        let invalid = pick_invalid(seed + 600, g.inputs, 2);
        let result = run(&g.entries, &g.projects, &invalid);
        let direct: BTreeSet<ProjectPath> = g
            .entries
            .iter()
            .filter_map(|e| match e {
                FingerprintEntry::ProjectFingerprint {
                    project_path,
                    value,
                } if invalid.contains(&value.0) => Some(project_path.clone()),
                _ => None,
            })
            .collect();

        let edges: HashSet<(ProjectPath, ProjectPath)> = g
            .entries
            .iter()
            .filter_map(|e| match e {
                FingerprintEntry::ProjectDependency {
                    consuming_project,
                    target_project,
                } => Some((consuming_project.clone(), target_project.clone())),
                _ => None,
            })
            .collect();

        // Every upstream reason names an invalidated project that this one
        // was recorded as consuming.
        for (path, reasons) in result.iter() {
            for reason in reasons {
                if let InvalidationReason::Upstream(cause) = reason {
                    assert!(result.contains(cause), "seed {seed}: {path} <- {cause}");
                    assert!(
                        edges.contains(&(path.clone(), cause.clone())),
                        "seed {seed}: {path} never consumed {cause}"
                    );
                }
            }
            if direct.contains(path) {
                continue;
            }
            assert!(
                !reasons.is_empty()
                    && reasons
                        .iter()
                        .all(|r| matches!(r, InvalidationReason::Upstream(_))),
                "seed {seed}: {path} invalidated by {reasons:?}"
            );
        }
    }
}

#[test]
fn parallel_and_sequential_agree_on_large_ledgers() {
    let g = generate(42, 200, 5_000, 600);
    let invalid = pick_invalid(7, g.inputs, 10);
    let env = mismatches(&invalid);
    let sequential = InvalidationChecker::<Input, _>::new(&env, &g.projects)
        .with_options(CheckOptions::sequential())
        .check(&g.entries);
    let parallel = InvalidationChecker::<Input, _>::new(&env, &g.projects)
        .with_options(CheckOptions::default().with_batch_size(256))
        .check(&g.entries);
    assert_eq!(sequential, parallel);
}

#[test]
fn deep_chain_does_not_recurse() {
    let count = 50_000;
    let names: Vec<String> = (0..count).map(|i| format!(":n{i}")).collect();
    let mut entries = vec![fp(&names[count - 1], 0)];
    for i in 0..count - 1 {
        entries.push(dep(&names[i], &names[i + 1]));
    }
    let projects: BTreeSet<ProjectPath> = names.iter().map(|n| p(n)).collect();
    let result = run(&entries, &projects, &[0]);
    assert_eq!(result.len(), count);
}
