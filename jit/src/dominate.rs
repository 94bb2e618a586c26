//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Dominator tree and dominance frontiers for mvjit
//
// - Dominator tree: "A simple, fast dominance algorithm" by Cooper, Harvey, Kennedy
// - Frontiers: walk up from each predecessor of a join block to its idom
//

use crate::ir::{BlockId, Function};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// Dominator Tree Construction (Cooper et al.)
// ============================================================================

/// Build the dominator tree for a function.
///
/// This populates:
/// - `bb.idom` - immediate dominator for each block
/// - `bb.dom_level` - depth in dominator tree
/// - `bb.dom_children` - blocks immediately dominated by this block
///
/// Unreachable blocks are left without an idom.
pub fn domtree_build(func: &mut Function) {
    let rpo = func.rpo();
    let size = rpo.len();
    if size == 0 {
        return;
    }

    // Postorder numbers: the entry gets the highest one
    let postorder_nr: HashMap<BlockId, usize> = rpo
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &bb)| (bb, i))
        .collect();
    let nr_to_bb: Vec<BlockId> = rpo.iter().rev().copied().collect();

    let entry = func.entry;
    let entry_nr = size - 1;

    // doms[postorder_nr] = immediate dominator's postorder_nr
    let mut doms: Vec<Option<usize>> = vec![None; size];
    doms[entry_nr] = Some(entry_nr);

    let intersect = |doms: &[Option<usize>], mut b1: usize, mut b2: usize| -> usize {
        while b1 != b2 {
            while b1 < b2 {
                match doms[b1] {
                    Some(d) => b1 = d,
                    None => break,
                }
            }
            while b2 < b1 {
                match doms[b2] {
                    Some(d) => b2 = d,
                    None => break,
                }
            }
        }
        b1
    };

    let mut changed = true;
    while changed {
        changed = false;

        for &bb_id in &rpo {
            if bb_id == entry {
                continue;
            }
            let bb_nr = postorder_nr[&bb_id];

            let preds: Vec<BlockId> = func
                .get_block(bb_id)
                .map(|bb| bb.preds.iter().copied().collect())
                .unwrap_or_default();

            let mut new_idom: Option<usize> = None;
            for pred in preds {
                // Predecessors outside the reachable set have no number
                let Some(&pred_nr) = postorder_nr.get(&pred) else {
                    continue;
                };
                if doms[pred_nr].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred_nr,
                    Some(current) => intersect(&doms, pred_nr, current),
                });
            }

            if let Some(idom) = new_idom {
                if doms[bb_nr] != Some(idom) {
                    doms[bb_nr] = Some(idom);
                    changed = true;
                }
            }
        }
    }

    for bb in func.blocks_mut() {
        bb.idom = None;
        bb.dom_children.clear();
        bb.dom_level = 0;
    }

    for (&bb_id, &bb_nr) in &postorder_nr {
        if bb_id == entry {
            continue;
        }
        if let Some(idom_nr) = doms[bb_nr] {
            if idom_nr != bb_nr {
                if let Some(bb) = func.get_block_mut(bb_id) {
                    bb.idom = Some(nr_to_bb[idom_nr]);
                }
            }
        }
    }

    // Children in layout order keeps renaming deterministic
    for &bb_id in &rpo {
        if let Some(idom) = func.get_block(bb_id).and_then(|bb| bb.idom) {
            if let Some(parent) = func.get_block_mut(idom) {
                parent.dom_children.push(bb_id);
            }
        }
    }

    // Levels: entry is 0, children are parent + 1.  RPO visits parents first.
    let mut max_level = 0u32;
    for &bb_id in &rpo {
        let level = func
            .get_block(bb_id)
            .and_then(|bb| bb.idom)
            .and_then(|idom| func.get_block(idom))
            .map(|parent| parent.dom_level + 1)
            .unwrap_or(0);
        if let Some(bb) = func.get_block_mut(bb_id) {
            bb.dom_level = level;
        }
        max_level = max_level.max(level);
    }
    func.max_dom_level = max_level;
}

// ============================================================================
// Dominance Frontier Computation
// ============================================================================

/// Compute the dominance frontier for all blocks.
///
/// DF(B) = {D | B dominates a predecessor of D, but B does not strictly dominate D}
pub fn compute_dominance_frontiers(func: &mut Function) {
    for bb in func.blocks_mut() {
        bb.dom_frontier.clear();
    }

    for bb_id in func.rpo() {
        let (preds, idom) = match func.get_block(bb_id) {
            Some(bb) => (bb.preds.iter().copied().collect::<Vec<_>>(), bb.idom),
            None => continue,
        };
        if preds.len() < 2 {
            continue;
        }

        for pred in preds {
            let mut runner = Some(pred);
            while let Some(r) = runner {
                if Some(r) == idom {
                    break;
                }
                let Some(runner_bb) = func.get_block_mut(r) else {
                    break;
                };
                if !runner_bb.dom_frontier.contains(&bb_id) {
                    runner_bb.dom_frontier.push(bb_id);
                }
                // The entry has no idom; stop after recording it
                runner = runner_bb.idom;
            }
        }
    }
}

/// Iterated dominance frontier of a set of definition blocks: every block
/// that needs a phi for a variable assigned in `defs`.
pub fn idf_compute(func: &Function, defs: &[BlockId]) -> BTreeSet<BlockId> {
    let mut result = BTreeSet::new();
    let mut worklist: Vec<BlockId> = defs.to_vec();
    let mut queued: HashSet<BlockId> = defs.iter().copied().collect();

    while let Some(bb_id) = worklist.pop() {
        let Some(bb) = func.get_block(bb_id) else {
            continue;
        };
        for &df in &bb.dom_frontier {
            if result.insert(df) && queued.insert(df) {
                worklist.push(df);
            }
        }
    }
    result
}

// ============================================================================
// Dominator Sets
// ============================================================================

/// Full dominator sets by the classic dataflow equations:
/// Dom(entry) = {entry}, Dom(n) = {n} + intersection of Dom(p) over preds.
///
/// Slower than the tree; used to cross-check it and by tests.
pub fn dominator_sets(func: &Function) -> HashMap<BlockId, BTreeSet<BlockId>> {
    let rpo = func.rpo();
    let all: BTreeSet<BlockId> = rpo.iter().copied().collect();
    let reachable: HashSet<BlockId> = rpo.iter().copied().collect();

    let mut dom: HashMap<BlockId, BTreeSet<BlockId>> = HashMap::new();
    for &bb in &rpo {
        if bb == func.entry {
            dom.insert(bb, BTreeSet::from([bb]));
        } else {
            dom.insert(bb, all.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &bb_id in &rpo {
            if bb_id == func.entry {
                continue;
            }
            let Some(bb) = func.get_block(bb_id) else {
                continue;
            };
            let mut new_set: Option<BTreeSet<BlockId>> = None;
            for p in bb.preds.iter().filter(|p| reachable.contains(p)) {
                let pset = &dom[p];
                new_set = Some(match new_set {
                    None => pset.clone(),
                    Some(s) => s.intersection(pset).copied().collect(),
                });
            }
            let mut new_set = new_set.unwrap_or_default();
            new_set.insert(bb_id);
            if new_set != dom[&bb_id] {
                dom.insert(bb_id, new_set);
                changed = true;
            }
        }
    }
    dom
}

// ============================================================================
// Tests
// ============================================================================
