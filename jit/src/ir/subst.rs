//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Copy propagation and constant folding for mvjit IR
//
// Works on SSA form.  An assignment of a literal or a plain variable
// makes the assigned variable an alias; every read of an alias is
// rewritten to the aliased value.  Operators over literal operands are
// folded with the same semantics the generated code has at runtime.
// The now-unread assignments are left for dead code elimination.
//

use crate::ir::{Atom, BinOp, Expr, Function, Jump, Stmt, UnOp, VarId};
use std::collections::HashMap;

// ============================================================================
// Constant Folding
// ============================================================================

/// Fold a binary operator over two literals.  Returns None when the
/// result must be left to runtime: division or remainder by zero, and
/// the i64::MIN / -1 overflow trap.
pub fn fold_binop(op: BinOp, left: Atom, right: Atom) -> Option<Atom> {
    match (left, right) {
        (Atom::Int(a), Atom::Int(b)) => {
            let v = match op {
                BinOp::Add => a.wrapping_add(b),
                BinOp::Sub => a.wrapping_sub(b),
                BinOp::Mul => a.wrapping_mul(b),
                BinOp::Div => a.checked_div(b)?,
                BinOp::Mod => a.checked_rem(b)?,
                BinOp::Lt => (a < b) as i64,
                BinOp::Le => (a <= b) as i64,
                BinOp::Eq => (a == b) as i64,
                BinOp::Neq => (a != b) as i64,
                BinOp::Or => a | b,
                BinOp::And => a & b,
                BinOp::Xor => a ^ b,
                BinOp::LOr => (a != 0 || b != 0) as i64,
                BinOp::LAnd => (a != 0 && b != 0) as i64,
            };
            Some(Atom::Int(v))
        }
        (Atom::Double(a), Atom::Double(b)) => match op {
            BinOp::Add => Some(Atom::Double(a + b)),
            BinOp::Sub => Some(Atom::Double(a - b)),
            BinOp::Mul => Some(Atom::Double(a * b)),
            BinOp::Div if b != 0.0 => Some(Atom::Double(a / b)),
            BinOp::Lt => Some(Atom::Int((a < b) as i64)),
            BinOp::Le => Some(Atom::Int((a <= b) as i64)),
            BinOp::Eq => Some(Atom::Int((a == b) as i64)),
            BinOp::Neq => Some(Atom::Int((a != b) as i64)),
            _ => None,
        },
        _ => None,
    }
}

/// Fold a unary operator over a literal
pub fn fold_unop(op: UnOp, operand: Atom) -> Option<Atom> {
    match (op, operand) {
        (UnOp::I2D, Atom::Int(v)) => Some(Atom::Double(v as f64)),
        // cvttsd2si yields the indefinite value outside this range
        (UnOp::D2I, Atom::Double(v)) if v.is_finite() && v > -9.2e18 && v < 9.2e18 => {
            Some(Atom::Int(v as i64))
        }
        (UnOp::Neg, Atom::Int(v)) => Some(Atom::Int(v.wrapping_neg())),
        (UnOp::Neg, Atom::Double(v)) => Some(Atom::Double(-v)),
        (UnOp::Not, Atom::Int(v)) => Some(Atom::Int((v == 0) as i64)),
        _ => None,
    }
}

fn fold_stmts(func: &mut Function) -> usize {
    let mut folded = 0;
    for bb in func.blocks_mut() {
        for stmt in &mut bb.stmts {
            let Stmt::Assign { value, .. } = stmt else {
                continue;
            };
            let result = match value {
                Expr::Bin { op, left, right } if left.is_literal() && right.is_literal() => {
                    fold_binop(*op, *left, *right)
                }
                Expr::Un { op, operand } if operand.is_literal() => fold_unop(*op, *operand),
                _ => None,
            };
            if let Some(lit) = result {
                *value = Expr::Atom(lit);
                folded += 1;
            }
        }
    }
    folded
}

// ============================================================================
// Copy Propagation
// ============================================================================

/// Aliases: assigned variable -> value it always holds
fn collect_aliases(func: &Function) -> HashMap<VarId, Atom> {
    let mut map = HashMap::new();
    for bb in func.blocks() {
        for stmt in &bb.stmts {
            match stmt {
                Stmt::Assign {
                    var,
                    value: Expr::Atom(a @ (Atom::Int(_) | Atom::Double(_) | Atom::Ptr { .. })),
                } => {
                    map.insert(*var, *a);
                }
                Stmt::Assign {
                    var,
                    value: Expr::Atom(Atom::Var(src)),
                } if src != var => {
                    map.insert(*var, Atom::Var(*src));
                }
                Stmt::Phi { var, sources } => {
                    // A phi whose operands other than itself agree is a copy
                    let mut others = sources.iter().map(|(_, v)| *v).filter(|v| v != var);
                    if let Some(first) = others.next() {
                        if others.all(|v| v == first) {
                            map.insert(*var, Atom::Var(first));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    map
}

/// Follow alias chains to their end.  A chain that loops back on itself
/// (only possible through unreachable phis) stops where it closes.
fn resolve(map: &HashMap<VarId, Atom>, start: VarId) -> Option<Atom> {
    let mut current = *map.get(&start)?;
    let mut steps = 0;
    while let Atom::Var(v) = current {
        let Some(next) = map.get(&v) else {
            break;
        };
        if v == start || steps > map.len() {
            break;
        }
        current = *next;
        steps += 1;
    }
    match current {
        Atom::Var(v) if v == start => None,
        a => Some(a),
    }
}

fn rewrite_uses(func: &mut Function, map: &HashMap<VarId, Atom>) -> usize {
    let mut resolved: HashMap<VarId, Option<Atom>> = HashMap::new();
    let mut lookup = |v: VarId| *resolved.entry(v).or_insert_with(|| resolve(map, v));
    let mut rewritten = 0;

    for bb in func.blocks_mut() {
        for stmt in &mut bb.stmts {
            if let Stmt::Phi { var, sources } = stmt {
                for (_, src) in sources.iter_mut() {
                    // Phi operands stay variables
                    if let Some(Atom::Var(w)) = lookup(*src) {
                        if w != *src && w != *var {
                            *src = w;
                            rewritten += 1;
                        }
                    }
                }
                continue;
            }
            for atom in stmt.atoms_mut() {
                if let Atom::Var(v) = atom {
                    if let Some(new) = lookup(*v) {
                        *atom = new;
                        rewritten += 1;
                    }
                }
            }
        }
        if let Some(Jump::Cond { cond, .. }) = &mut bb.jump {
            if let Atom::Var(v) = cond {
                if let Some(new) = lookup(*v) {
                    *cond = new;
                    rewritten += 1;
                }
            }
        }
    }
    rewritten
}

// ============================================================================
// Branch Folding
// ============================================================================

/// Turn conditional jumps on literal conditions into unconditional ones
fn fold_branches(func: &mut Function) -> usize {
    let mut dropped_edges = Vec::new();
    for bb in func.blocks_mut() {
        if let Some(Jump::Cond { yes, no, cond }) = &bb.jump {
            let taken = match cond {
                Atom::Int(v) => Some(*v != 0),
                Atom::Double(v) => Some(*v != 0.0),
                _ => None,
            };
            if let Some(taken) = taken {
                let (target, other) = if taken { (*yes, *no) } else { (*no, *yes) };
                bb.jump = Some(Jump::Always(target));
                if other != target {
                    dropped_edges.push((bb.id, other));
                }
            }
        }
    }
    let n = dropped_edges.len();
    for (from, to) in dropped_edges {
        func.forget_edge(from, to);
    }
    n
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Run folding and copy propagation once over `func`.  Returns true if
/// anything changed.
pub fn substitute(func: &mut Function) -> bool {
    if func.is_native() {
        return false;
    }
    let folded = fold_stmts(func);
    let map = collect_aliases(func);
    let rewritten = rewrite_uses(func, &map);
    let branches = fold_branches(func);

    if folded + rewritten + branches > 0 {
        log::trace!(
            "subst: {}: {} folded, {} uses rewritten, {} branches resolved",
            func.name,
            folded,
            rewritten,
            branches
        );
        true
    } else {
        false
    }
}

// ============================================================================
// Tests
// ============================================================================
