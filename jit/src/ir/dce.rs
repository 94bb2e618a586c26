//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Dead Code Elimination (DCE) pass for mvjit
//
// This pass removes assignments and phis whose results are never read.
// It uses a mark-sweep algorithm:
// 1. Mark "root" statements (those with side effects) and jump conditions
// 2. Transitively mark all variables the roots depend on
// 3. Delete every unmarked Assign and Phi
//
// Marking rather than counting reads also removes dead phi cycles.
//

use super::{BlockId, Expr, Function, Jump, Stmt, VarId, VarTable, VarType};
use std::collections::{HashMap, HashSet, VecDeque};

// ============================================================================
// Referenced Analysis
// ============================================================================

/// Check if a statement is a "root" (has side effects, cannot be deleted).
fn is_root(stmt: &Stmt, vars: &VarTable) -> bool {
    match stmt {
        Stmt::Print(_) | Stmt::WriteRef { .. } | Stmt::Return(_) => true,
        Stmt::Assign { var, value } => {
            matches!(value, Expr::Call { .. }) || vars.var_type(*var) == VarType::Unit
        }
        Stmt::Phi { .. } => false,
    }
}

/// Variables read by live code
pub fn referenced(func: &Function, vars: &VarTable) -> HashSet<VarId> {
    let mut live: HashSet<VarId> = HashSet::new();
    let mut worklist: VecDeque<VarId> = VecDeque::new();
    let mut defs: HashMap<VarId, (BlockId, usize)> = HashMap::new();

    // Phase 1: Mark roots and their operands as live
    for bb in func.blocks() {
        for (idx, stmt) in bb.stmts.iter().enumerate() {
            if let Some(d) = stmt.def() {
                defs.insert(d, (bb.id, idx));
            }
            if is_root(stmt, vars) {
                for id in stmt.uses() {
                    if live.insert(id) {
                        worklist.push_back(id);
                    }
                }
            }
        }
        if let Some(Jump::Cond { cond, .. }) = &bb.jump {
            if let Some(id) = cond.used_var() {
                if live.insert(id) {
                    worklist.push_back(id);
                }
            }
        }
    }

    // Phase 2: Propagate liveness transitively
    while let Some(id) = worklist.pop_front() {
        let Some(&(bb_id, idx)) = defs.get(&id) else {
            continue;
        };
        let Some(stmt) = func.get_block(bb_id).and_then(|bb| bb.stmts.get(idx)) else {
            continue;
        };
        for use_id in stmt.uses() {
            if live.insert(use_id) {
                worklist.push_back(use_id);
            }
        }
    }

    live
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Run the DCE pass on a function.
/// Returns true if any changes were made.
pub fn run(func: &mut Function, vars: &VarTable) -> bool {
    if func.is_native() {
        return false;
    }
    let live = referenced(func, vars);

    let mut removed = 0;
    for bb in func.blocks_mut() {
        let before = bb.stmts.len();
        bb.stmts.retain(|stmt| match stmt.def() {
            Some(d) => is_root(stmt, vars) || live.contains(&d),
            None => true,
        });
        removed += before - bb.stmts.len();
    }

    if removed > 0 {
        log::trace!("dce: {}: removed {} statements", func.name, removed);
    }
    removed > 0
}

// ============================================================================
// Tests
// ============================================================================
