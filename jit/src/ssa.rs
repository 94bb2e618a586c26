//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// SSA Conversion for mvjit
//
// - Inserts empty phi statements at the iterated dominance frontier of
//   every block assigning a source variable
// - Renames variables over the dominator tree so each version is
//   assigned exactly once
// - Fills phi operands from the reaching definition at the end of each
//   predecessor
//

use crate::dominate::{compute_dominance_frontiers, domtree_build, idf_compute};
use crate::error::{JitError, Result};
use crate::ir::{Atom, BlockId, Expr, Function, Jump, SimpleIr, Stmt, VarId, VarTable, VarType};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// SSA Conversion State
// ============================================================================

struct SsaConverter<'a> {
    func: &'a mut Function,
    vars: &'a mut VarTable,

    /// Source variables being renamed
    to_rename: BTreeSet<VarId>,

    /// Inserted phis: (block, origin variable, phi target)
    all_phis: Vec<(BlockId, VarId, VarId)>,

    /// Zero definitions created for reads with no reaching assignment
    zero_defs: HashMap<VarId, VarId>,

    /// Statements for those definitions, placed at the top of the entry
    /// block once renaming is done
    zero_stmts: Vec<Stmt>,
}

impl<'a> SsaConverter<'a> {
    fn new(func: &'a mut Function, vars: &'a mut VarTable) -> Self {
        Self {
            func,
            vars,
            to_rename: BTreeSet::new(),
            all_phis: Vec::new(),
            zero_defs: HashMap::new(),
            zero_stmts: Vec::new(),
        }
    }

    /// Value of `origin` where no assignment reaches: the incoming
    /// parameter, or a zero materialized at the top of the entry block.
    fn undefined_value(&mut self, origin: VarId) -> VarId {
        if self.func.params.contains(&origin) {
            return origin;
        }
        if let Some(&v) = self.zero_defs.get(&origin) {
            return v;
        }

        let zero = match self.vars.var_type(origin) {
            VarType::Double => Atom::Double(0.0),
            VarType::Ptr => Atom::Ptr {
                value: 0,
                pooled: false,
            },
            _ => Atom::Int(0),
        };
        let v = self.vars.new_version(origin);
        self.zero_stmts.push(Stmt::Assign {
            var: v,
            value: Expr::Atom(zero),
        });
        self.zero_defs.insert(origin, v);
        v
    }
}

// ============================================================================
// Phase 1: Phi Placement
// ============================================================================

/// Blocks assigning each renameable source variable
fn collect_def_blocks(func: &Function, vars: &VarTable) -> BTreeMap<VarId, Vec<BlockId>> {
    let mut defs: BTreeMap<VarId, Vec<BlockId>> = BTreeMap::new();
    for bb in func.blocks() {
        for stmt in &bb.stmts {
            if let Stmt::Assign { var, .. } = stmt {
                let meta = vars.meta(*var);
                if meta.is_source_var && !meta.is_reference && meta.origin == *var {
                    let blocks = defs.entry(*var).or_default();
                    if !blocks.contains(&bb.id) {
                        blocks.push(bb.id);
                    }
                }
            }
        }
    }
    for (&var, blocks) in defs.iter_mut() {
        if func.params.contains(&var) && !blocks.contains(&func.entry) {
            blocks.push(func.entry);
        }
    }
    defs
}

fn insert_phi_nodes(converter: &mut SsaConverter, var: VarId, def_blocks: &[BlockId]) {
    let idf = idf_compute(converter.func, def_blocks);

    for bb_id in idf {
        let target = converter.vars.new_version(var);
        if let Some(bb) = converter.func.get_block_mut(bb_id) {
            let insert_pos = bb.stmts.iter().take_while(|s| s.is_phi()).count();
            bb.stmts.insert(
                insert_pos,
                Stmt::Phi {
                    var: target,
                    sources: Vec::new(),
                },
            );
            converter.all_phis.push((bb_id, var, target));
        }
    }
}

// ============================================================================
// Phase 2: Variable Renaming
// ============================================================================

/// Definition stack for variable renaming
struct DefStack {
    /// Origin variable -> stack of (defining block, version)
    stacks: HashMap<VarId, Vec<(BlockId, VarId)>>,
}

impl DefStack {
    fn new() -> Self {
        Self {
            stacks: HashMap::new(),
        }
    }

    fn push(&mut self, var: VarId, bb: BlockId, val: VarId) {
        self.stacks.entry(var).or_default().push((bb, val));
    }

    fn current(&self, var: VarId) -> Option<VarId> {
        self.stacks.get(&var).and_then(|s| s.last().map(|(_, v)| *v))
    }

    /// Pop definitions made in a specific block
    fn pop_block(&mut self, bb: BlockId) {
        for stack in self.stacks.values_mut() {
            while stack.last().map(|(b, _)| *b == bb).unwrap_or(false) {
                stack.pop();
            }
        }
    }
}

fn rename_atom(converter: &mut SsaConverter, atom: &mut Atom, def_stack: &DefStack) {
    if let Atom::Var(v) = atom {
        if converter.to_rename.contains(v) {
            let origin = *v;
            *v = match def_stack.current(origin) {
                Some(cur) => cur,
                None => converter.undefined_value(origin),
            };
        }
    }
}

/// Rename variables in a block and, recursively, its dominator-tree
/// children.
fn rename_block(converter: &mut SsaConverter, bb_id: BlockId, def_stack: &mut DefStack) {
    let Some(bb) = converter.func.get_block_mut(bb_id) else {
        return;
    };
    let mut stmts = std::mem::take(&mut bb.stmts);
    let mut jump = bb.jump.take();

    for stmt in &mut stmts {
        match stmt {
            Stmt::Phi { var, .. } => {
                let origin = converter.vars.meta(*var).origin;
                def_stack.push(origin, bb_id, *var);
            }
            _ => {
                for atom in stmt.atoms_mut() {
                    rename_atom(converter, atom, def_stack);
                }
                if let Stmt::Assign { var, .. } = stmt {
                    if converter.to_rename.contains(var) {
                        let origin = *var;
                        let version = converter.vars.new_version(origin);
                        *var = version;
                        def_stack.push(origin, bb_id, version);
                    }
                }
            }
        }
    }
    if let Some(Jump::Cond { cond, .. }) = &mut jump {
        rename_atom(converter, cond, def_stack);
    }

    if let Some(bb) = converter.func.get_block_mut(bb_id) {
        bb.stmts = stmts;
        bb.jump = jump;
    }

    let dom_children: Vec<BlockId> = converter
        .func
        .get_block(bb_id)
        .map(|bb| bb.dom_children.clone())
        .unwrap_or_default();
    for child in dom_children {
        rename_block(converter, child, def_stack);
    }

    def_stack.pop_block(bb_id);
}

/// Find the definition of `origin` reaching the end of block `bb_id`:
/// the last assignment or phi in the block, else the one reaching its
/// immediate dominator.
fn lookup_var_in_pred(func: &Function, vars: &VarTable, bb_id: BlockId, origin: VarId) -> Option<VarId> {
    let mut current = bb_id;
    loop {
        let bb = func.get_block(current)?;
        for stmt in bb.stmts.iter().rev() {
            if let Some(def) = stmt.def() {
                if def != origin && vars.meta(def).origin == origin {
                    return Some(def);
                }
            }
        }
        current = bb.idom?;
    }
}

/// Fill in phi operands from predecessor blocks
fn fill_phi_operands(converter: &mut SsaConverter) {
    let phis = converter.all_phis.clone();
    for (bb_id, origin, target) in phis {
        let preds: Vec<BlockId> = converter
            .func
            .get_block(bb_id)
            .map(|bb| bb.preds.iter().copied().collect())
            .unwrap_or_default();

        let mut sources = Vec::with_capacity(preds.len());
        for pred in preds {
            let val = match lookup_var_in_pred(converter.func, converter.vars, pred, origin) {
                Some(v) => v,
                None => converter.undefined_value(origin),
            };
            sources.push((pred, val));
        }

        if let Some(bb) = converter.func.get_block_mut(bb_id) {
            for stmt in &mut bb.stmts {
                if let Stmt::Phi { var, sources: s } = stmt {
                    if *var == target {
                        *s = sources;
                        break;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Convert a function to SSA form.
///
/// 1. Build the dominator tree and frontiers
/// 2. Insert empty phis at the IDF of each source variable's definitions
/// 3. Rename definitions and uses over the dominator tree
/// 4. Fill phi operands from each predecessor's reaching definition
pub fn ssa_convert(func: &mut Function, vars: &mut VarTable) -> Result<()> {
    if func.is_native() {
        return Ok(());
    }
    if func.get_block(func.entry).is_none() {
        return Err(JitError::bad_ir(&func.name, "function has no entry block"));
    }

    func.remove_unreachable();
    domtree_build(func);
    compute_dominance_frontiers(func);

    let defs = collect_def_blocks(func, vars);
    let mut converter = SsaConverter::new(func, vars);

    for (var, def_blocks) in &defs {
        converter.to_rename.insert(*var);
        insert_phi_nodes(&mut converter, *var, def_blocks);
    }

    let mut def_stack = DefStack::new();
    let entry = converter.func.entry;
    rename_block(&mut converter, entry, &mut def_stack);

    fill_phi_operands(&mut converter);

    let zero_stmts = std::mem::take(&mut converter.zero_stmts);
    if let Some(bb) = converter.func.get_block_mut(entry) {
        let insert_pos = bb.stmts.iter().take_while(|s| s.is_phi()).count();
        bb.stmts.splice(insert_pos..insert_pos, zero_stmts);
    }

    log::debug!(
        "ssa: {}: renamed {} variables, inserted {} phis",
        converter.func.name,
        converter.to_rename.len(),
        converter.all_phis.len()
    );
    Ok(())
}

/// Convert every function of the program
pub fn ssa_convert_all(ir: &mut SimpleIr) -> Result<()> {
    let SimpleIr {
        functions, vars, ..
    } = ir;
    for func in functions.iter_mut() {
        ssa_convert(func, vars)?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
