//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Control-flow minimization for mvjit IR
//
// - Removes blocks that are unreachable from the entry
// - Bypasses empty blocks ending in an unconditional jump
// - Merges a block into its only predecessor when that predecessor
//   jumps to it unconditionally
//

use super::{BlockId, Function, Jump, Stmt};

/// Redirect every predecessor of `bb_id` (an empty forwarding block) to
/// its successor and delete it.
fn bypass_block(func: &mut Function, bb_id: BlockId, succ: BlockId) {
    let preds: Vec<BlockId> = func
        .get_block(bb_id)
        .map(|bb| bb.preds.iter().copied().collect())
        .unwrap_or_default();

    for p in &preds {
        if let Some(pred) = func.get_block_mut(*p) {
            if let Some(jump) = &mut pred.jump {
                jump.retarget(bb_id, succ);
            }
        }
    }
    if let Some(s) = func.get_block_mut(succ) {
        s.preds.remove(&bb_id);
        s.preds.extend(preds);
    }
    func.blocks[bb_id.0 as usize] = None;
}

/// Find an empty non-entry block forwarding to a phi-free successor
fn find_forwarder(func: &Function) -> Option<(BlockId, BlockId)> {
    func.blocks().find_map(|bb| {
        if bb.id == func.entry || !bb.stmts.is_empty() {
            return None;
        }
        let Some(Jump::Always(succ)) = bb.jump else {
            return None;
        };
        let target = func.get_block(succ)?;
        (succ != bb.id && !target.has_phis()).then_some((bb.id, succ))
    })
}

/// Find `a -> b` where `a` jumps only to `b` and `b` is entered only from `a`
fn find_mergeable(func: &Function) -> Option<(BlockId, BlockId)> {
    func.blocks().find_map(|bb| {
        let Some(Jump::Always(succ)) = bb.jump else {
            return None;
        };
        let target = func.get_block(succ)?;
        let single_pred = target.preds.len() == 1 && target.preds.contains(&bb.id);
        (succ != bb.id && succ != func.entry && single_pred && !target.has_phis())
            .then_some((bb.id, succ))
    })
}

/// Append block `b` to block `a` and delete `b`
fn merge_blocks(func: &mut Function, a: BlockId, b: BlockId) {
    let Some(taken) = func.blocks.get_mut(b.0 as usize).and_then(|s| s.take()) else {
        return;
    };
    let succs = taken.successors();
    if let Some(bb) = func.get_block_mut(a) {
        bb.stmts.extend(taken.stmts);
        bb.jump = taken.jump;
    }

    for s in succs {
        if let Some(sb) = func.get_block_mut(s) {
            if sb.preds.remove(&b) {
                sb.preds.insert(a);
            }
            for stmt in &mut sb.stmts {
                if let Stmt::Phi { sources, .. } = stmt {
                    for (from, _) in sources.iter_mut() {
                        if *from == b {
                            *from = a;
                        }
                    }
                }
            }
        }
    }
}

/// Run the minimizer on a function.
/// Returns true if any changes were made.
pub fn run(func: &mut Function) -> bool {
    if func.is_native() {
        return false;
    }
    let mut changed = func.remove_unreachable();
    let mut bypassed = 0;
    let mut merged = 0;

    while let Some((bb, succ)) = find_forwarder(func) {
        bypass_block(func, bb, succ);
        bypassed += 1;
    }
    while let Some((a, b)) = find_mergeable(func) {
        merge_blocks(func, a, b);
        merged += 1;
    }

    if bypassed + merged > 0 {
        log::trace!(
            "minimize: {}: bypassed {} blocks, merged {}",
            func.name,
            bypassed,
            merged
        );
        changed = true;
    }
    changed
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Atom, FunctionId, VarTable, VarType};

    /// entry -cond-> {a, b}; a, b -> join; a is empty
    fn make_diamond_cfg(vars: &mut VarTable) -> Function {
        let c = vars.new_source_var("c", VarType::Int);
        let mut func = Function::new(FunctionId(0), "d", VarType::Unit);
        func.params.push(c);
        let entry = func.add_block();
        let a = func.add_block();
        let b = func.add_block();
        let join = func.add_block();
        func.set_jump(
            entry,
            Jump::Cond {
                yes: a,
                no: b,
                cond: Atom::Var(c),
            },
        );
        func.set_jump(a, Jump::Always(join));
        func.get_block_mut(b).unwrap().stmts.push(Stmt::Print(Atom::Int(1)));
        func.set_jump(b, Jump::Always(join));
        func.get_block_mut(join).unwrap().stmts.push(Stmt::Return(None));
        func
    }

    #[test]
    fn test_empty_block_bypassed() {
        let mut vars = VarTable::new();
        let mut func = make_diamond_cfg(&mut vars);
        assert!(run(&mut func));

        assert!(func.get_block(BlockId(1)).is_none());
        match &func.get_block(BlockId(0)).unwrap().jump {
            Some(Jump::Cond { yes, .. }) => assert_eq!(*yes, BlockId(3)),
            other => panic!("unexpected {:?}", other),
        }
        let join = func.get_block(BlockId(3)).unwrap();
        assert!(join.preds.contains(&BlockId(0)));
        assert!(!join.preds.contains(&BlockId(1)));
        assert!(!run(&mut func));
    }

    #[test]
    fn test_straight_line_blocks_merged() {
        let mut func = Function::new(FunctionId(0), "s", VarType::Unit);
        let entry = func.add_block();
        let next = func.add_block();
        func.get_block_mut(entry).unwrap().stmts.push(Stmt::Print(Atom::Int(1)));
        func.set_jump(entry, Jump::Always(next));
        let bb = func.get_block_mut(next).unwrap();
        bb.stmts.push(Stmt::Print(Atom::Int(2)));
        bb.stmts.push(Stmt::Return(None));

        assert!(run(&mut func));
        assert_eq!(func.num_blocks(), 1);
        let entry = func.get_block(entry).unwrap();
        assert_eq!(entry.stmts.len(), 3);
        assert!(entry.jump.is_none());
    }

    #[test]
    fn test_block_before_phi_kept() {
        let mut vars = VarTable::new();
        let mut func = make_diamond_cfg(&mut vars);
        let x = vars.new_temp(VarType::Int);
        func.get_block_mut(BlockId(3)).unwrap().stmts.insert(
            0,
            Stmt::Phi {
                var: x,
                sources: vec![(BlockId(1), x), (BlockId(2), x)],
            },
        );
        assert!(!run(&mut func));
        assert!(func.get_block(BlockId(1)).is_some());
    }
}
