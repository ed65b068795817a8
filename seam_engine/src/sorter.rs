//! Deterministic ordering of patch sets.
//!
//! The sorter turns an unordered set of patches into a total order that is
//! consistent with every satisfiable before/after constraint. Priority is
//! the primary key; declared edges are secondary constraints; ties fall
//! back to registration order, so the same input set always yields the same
//! sequence regardless of input permutation.
//!
//! Ordering is best-effort by contract: conflicting third-party constraints
//! must never make a method unpatchable. When the constraint graph has a
//! cycle, the remaining patch with the best (priority, registration-index)
//! key is released and its unsatisfied incoming edges are dropped. The
//! `debug` flag only records how the order was resolved; it never changes
//! the result.

use crate::patch::{Patch, PatchOwner};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Which end of the priority scale runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Higher priority runs earlier (prefixes, transpilers, finalizers).
    HigherFirst,
    /// Lower priority runs earlier (postfixes).
    LowerFirst,
}

/// Diagnostics describing how an order was resolved.
#[derive(Debug, Clone, Default)]
pub struct SortReport {
    /// The resolved order, by owner.
    pub order: Vec<PatchOwner>,
    /// Constraint edges dropped to break cycles, as (winner, loser):
    /// `loser` declared it must run before `winner` but was overridden.
    pub dropped_edges: Vec<(PatchOwner, PatchOwner)>,
    /// Constraint references to owners not present in the input set.
    pub unknown_refs: Vec<PatchOwner>,
}

/// Sort `patches` into a deterministic total order.
pub fn sort(patches: &[Patch], direction: SortDirection, debug: bool) -> Vec<Patch> {
    sort_with_report(patches, direction, debug).0
}

/// Sort and also return resolution diagnostics.
pub fn sort_with_report(
    patches: &[Patch],
    direction: SortDirection,
    debug_enabled: bool,
) -> (Vec<Patch>, SortReport) {
    let mut report = SortReport::default();
    let n = patches.len();
    if n <= 1 {
        report.order = patches.iter().map(|p| p.owner.clone()).collect();
        return (patches.to_vec(), report);
    }

    // Owner -> node position. A duplicated owner keeps its last position;
    // constraints against it resolve to that node.
    let mut by_owner: FxHashMap<&PatchOwner, usize> = FxHashMap::default();
    for (i, p) in patches.iter().enumerate() {
        by_owner.insert(&p.owner, i);
    }

    // Directed edges: an edge a -> b means a must be emitted before b.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut indegree: Vec<usize> = vec![0; n];
    for (i, p) in patches.iter().enumerate() {
        for owner in &p.before {
            match by_owner.get(owner) {
                Some(&j) => {
                    successors[i].push(j);
                    indegree[j] += 1;
                }
                None => report.unknown_refs.push(owner.clone()),
            }
        }
        for owner in &p.after {
            match by_owner.get(owner) {
                Some(&j) => {
                    successors[j].push(i);
                    indegree[i] += 1;
                }
                None => report.unknown_refs.push(owner.clone()),
            }
        }
    }

    // Priority-directed key: lower is emitted earlier.
    let key = |i: usize| -> (i64, u32) {
        let p = &patches[i];
        let pri = match direction {
            SortDirection::HigherFirst => -(p.priority.0 as i64),
            SortDirection::LowerFirst => p.priority.0 as i64,
        };
        (pri, p.index)
    };

    let mut emitted = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        // Best ready node; if the ready set is empty the constraints are
        // cyclic, so fall back to the best remaining node.
        let pick = |need_ready: bool| {
            (0..n)
                .filter(|&i| !emitted[i] && (!need_ready || indegree[i] == 0))
                .min_by_key(|&i| key(i))
        };
        let next = match pick(true) {
            Some(i) => i,
            None => {
                let i = pick(false).expect("non-empty remainder");
                // Unsatisfied incoming edges are dropped to break the cycle.
                for (j, p) in patches.iter().enumerate() {
                    if !emitted[j] && successors[j].contains(&i) {
                        report
                            .dropped_edges
                            .push((patches[i].owner.clone(), p.owner.clone()));
                    }
                }
                if debug_enabled {
                    debug!(
                        owner = %patches[i].owner,
                        "patch ordering cycle broken by priority fallback"
                    );
                }
                i
            }
        };

        emitted[next] = true;
        order.push(next);
        for &succ in &successors[next] {
            if !emitted[succ] {
                indegree[succ] = indegree[succ].saturating_sub(1);
            }
        }
        if debug_enabled {
            debug!(
                owner = %patches[next].owner,
                priority = patches[next].priority.0,
                index = patches[next].index,
                "patch ordered"
            );
        }
    }

    report.order = order.iter().map(|&i| patches[i].owner.clone()).collect();
    let sorted = order.into_iter().map(|i| patches[i].clone()).collect();
    (sorted, report)
}
