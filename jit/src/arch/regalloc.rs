//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Liveness analysis and linear-scan allocation shared by all targets
//
// Positions are a single linear numbering of a function: blocks in
// reverse postorder, each contributing one position per statement plus
// one for its terminating jump.
//

use crate::ir::{BlockId, Expr, Function, Jump, Stmt, VarId};
use std::collections::{BTreeMap, HashMap, HashSet};

// ============================================================================
// Common Types
// ============================================================================

/// Live interval for an IR variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    pub var: VarId,
    /// First position the variable is defined or read
    pub from: usize,
    /// Last position the variable is read (or must be preserved)
    pub to: usize,
    /// Marks beyond the first one
    pub usage_count: u32,
}

impl LiveInterval {
    fn new(var: VarId, pos: usize) -> Self {
        Self {
            var,
            from: pos,
            to: pos,
            usage_count: 0,
        }
    }

    fn mark(&mut self, pos: usize) {
        self.usage_count += 1;
        self.from = self.from.min(pos);
        self.to = self.to.max(pos);
    }

    /// Do the two intervals share at least one position?
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

/// Per-block positions in the linear order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    /// Position of the first statement
    pub start: usize,
    /// Position of the terminating jump (or of the slot after the last
    /// statement for blocks without one)
    pub end: usize,
}

// ============================================================================
// Liveness
// ============================================================================

/// Liveness information for one function.  Purely observational: the IR
/// is never modified.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    /// Blocks in layout order
    pub order: Vec<BlockId>,
    pub spans: HashMap<BlockId, BlockSpan>,
    pub live_in: HashMap<BlockId, HashSet<VarId>>,
    pub live_out: HashMap<BlockId, HashSet<VarId>>,
    pub intervals: BTreeMap<VarId, LiveInterval>,
    /// Positions of calls and prints, where caller-saved registers die
    pub call_positions: Vec<usize>,
    pub num_positions: usize,
}

/// Per-block use/def summary used by the dataflow equations
#[derive(Default)]
struct BlockSummary {
    /// Read before any local definition
    upward_exposed: HashSet<VarId>,
    defs: HashSet<VarId>,
    /// Phi sources flowing out of this block along some edge
    phi_out: HashSet<VarId>,
}

impl Liveness {
    /// Analyze a function
    pub fn compute(func: &Function) -> Self {
        let mut live = Liveness {
            order: func.rpo(),
            ..Default::default()
        };
        live.number_positions(func);
        live.solve_dataflow(func);
        live.build_intervals(func);
        live
    }

    fn number_positions(&mut self, func: &Function) {
        let mut pos = 0;
        for &id in &self.order {
            let Some(bb) = func.get_block(id) else {
                continue;
            };
            let start = pos;
            pos += bb.stmts.len();
            self.spans.insert(id, BlockSpan { start, end: pos });
            pos += 1;
        }
        self.num_positions = pos;
    }

    fn summarize(func: &Function, order: &[BlockId]) -> HashMap<BlockId, BlockSummary> {
        let mut summaries: HashMap<BlockId, BlockSummary> =
            order.iter().map(|id| (*id, BlockSummary::default())).collect();

        for &id in order {
            let Some(bb) = func.get_block(id) else {
                continue;
            };
            let mut upward = HashSet::new();
            let mut defs = HashSet::new();
            for stmt in &bb.stmts {
                if let Stmt::Phi { var, sources } = stmt {
                    defs.insert(*var);
                    for (pred, src) in sources {
                        if let Some(s) = summaries.get_mut(pred) {
                            s.phi_out.insert(*src);
                        }
                    }
                    continue;
                }
                for u in stmt.uses() {
                    if !defs.contains(&u) {
                        upward.insert(u);
                    }
                }
                if let Some(d) = stmt.def() {
                    defs.insert(d);
                }
            }
            if let Some(Jump::Cond { cond, .. }) = &bb.jump {
                if let Some(u) = cond.used_var() {
                    if !defs.contains(&u) {
                        upward.insert(u);
                    }
                }
            }
            if let Some(s) = summaries.get_mut(&id) {
                s.upward_exposed = upward;
                s.defs = defs;
            }
        }
        summaries
    }

    /// Iterate live_in/live_out to a fixed point, visiting blocks in
    /// reverse layout order
    fn solve_dataflow(&mut self, func: &Function) {
        let summaries = Self::summarize(func, &self.order);
        for &id in &self.order {
            self.live_in.insert(id, HashSet::new());
            self.live_out.insert(id, HashSet::new());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &id in self.order.iter().rev() {
                let (Some(bb), Some(summary)) = (func.get_block(id), summaries.get(&id)) else {
                    continue;
                };
                let mut out: HashSet<VarId> = summary.phi_out.clone();
                for s in bb.successors() {
                    if let Some(succ_in) = self.live_in.get(&s) {
                        out.extend(succ_in.iter().copied());
                    }
                }
                let mut inn: HashSet<VarId> = summary.upward_exposed.clone();
                inn.extend(out.iter().filter(|v| !summary.defs.contains(v)).copied());

                if self.live_out.get(&id) != Some(&out) {
                    self.live_out.insert(id, out);
                    changed = true;
                }
                if self.live_in.get(&id) != Some(&inn) {
                    self.live_in.insert(id, inn);
                    changed = true;
                }
            }
        }
    }

    fn mark(&mut self, var: VarId, pos: usize) {
        self.intervals
            .entry(var)
            .and_modify(|iv| iv.mark(pos))
            .or_insert_with(|| LiveInterval::new(var, pos));
    }

    fn build_intervals(&mut self, func: &Function) {
        for &p in &func.params {
            self.mark(p, 0);
        }

        let order = self.order.clone();
        for id in order {
            let (Some(bb), Some(span)) = (func.get_block(id), self.spans.get(&id).copied()) else {
                continue;
            };
            let live_in: Vec<VarId> = self.live_in[&id].iter().copied().collect();
            for v in live_in {
                self.mark(v, span.start);
            }
            let live_out: Vec<VarId> = self.live_out[&id].iter().copied().collect();
            for v in live_out {
                self.mark(v, span.end);
            }

            for (idx, stmt) in bb.stmts.iter().enumerate() {
                let pos = span.start + idx;
                match stmt {
                    Stmt::Phi { var, sources } => {
                        // Phi moves happen at the end of each predecessor
                        self.mark(*var, span.start);
                        for (pred, src) in sources {
                            if let Some(pred_span) = self.spans.get(pred).copied() {
                                self.mark(*var, pred_span.end);
                                self.mark(*src, pred_span.end);
                            }
                        }
                    }
                    _ => {
                        for u in stmt.uses() {
                            self.mark(u, pos);
                        }
                        if let Some(d) = stmt.def() {
                            self.mark(d, pos);
                        }
                        let is_call = matches!(
                            stmt,
                            Stmt::Print(_)
                                | Stmt::Assign {
                                    value: Expr::Call { .. },
                                    ..
                                }
                        );
                        if is_call {
                            self.call_positions.push(pos);
                        }
                    }
                }
            }
            if let Some(Jump::Cond { cond, .. }) = &bb.jump {
                if let Some(u) = cond.used_var() {
                    self.mark(u, span.end);
                }
            }
        }
    }

    pub fn interval(&self, var: VarId) -> Option<&LiveInterval> {
        self.intervals.get(&var)
    }

    pub fn span(&self, bb: BlockId) -> Option<BlockSpan> {
        self.spans.get(&bb).copied()
    }

    /// Variables whose value must survive a call at `pos`
    pub fn live_across(&self, pos: usize) -> Vec<VarId> {
        self.intervals
            .values()
            .filter(|iv| iv.from < pos && pos < iv.to)
            .map(|iv| iv.var)
            .collect()
    }
}

// ============================================================================
// Linear Scan
// ============================================================================

/// Register assignment for one register class
#[derive(Debug, Clone)]
pub struct ScanResult<R> {
    pub assigned: BTreeMap<VarId, R>,
    pub spilled: Vec<VarId>,
}

impl<R> Default for ScanResult<R> {
    fn default() -> Self {
        Self {
            assigned: BTreeMap::new(),
            spilled: Vec::new(),
        }
    }
}

/// Expire old intervals from the active list, returning freed registers to the free list.
/// Generic over register type R (works with both GP and FP register types).
pub fn expire_intervals<R: Copy>(
    active: &mut Vec<(LiveInterval, R)>,
    free_regs: &mut Vec<R>,
    point: usize,
) {
    let mut to_remove = Vec::new();
    for (i, (interval, reg)) in active.iter().enumerate() {
        if interval.to < point {
            free_regs.push(*reg);
            to_remove.push(i);
        }
    }
    for i in to_remove.into_iter().rev() {
        active.remove(i);
    }
}

/// Sort intervals by increasing start, ties by variable id
pub fn sort_by_start(intervals: &mut [LiveInterval]) {
    intervals.sort_by_key(|iv| (iv.from, iv.var));
}

/// Classic linear scan over `intervals` (sorted by start) using `regs`.
///
/// When no register is free, the active interval ending last is evicted
/// if it outlives the current one; otherwise the current interval is
/// spilled.
pub fn linear_scan<R: Copy>(intervals: &[LiveInterval], regs: &[R]) -> ScanResult<R> {
    let mut result = ScanResult::default();
    let mut free: Vec<R> = regs.iter().rev().copied().collect();
    // Kept sorted by increasing end
    let mut active: Vec<(LiveInterval, R)> = Vec::new();

    for iv in intervals {
        expire_intervals(&mut active, &mut free, iv.from);

        if let Some(reg) = free.pop() {
            result.assigned.insert(iv.var, reg);
            active.push((*iv, reg));
        } else if let Some(&(last, reg)) = active.last().filter(|(last, _)| last.to > iv.to) {
            log::trace!("regalloc: evict {} for {}", last.var, iv.var);
            active.pop();
            result.assigned.remove(&last.var);
            result.spilled.push(last.var);
            result.assigned.insert(iv.var, reg);
            active.push((*iv, reg));
        } else {
            result.spilled.push(iv.var);
            continue;
        }
        active.sort_by_key(|(a, _)| a.to);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
