//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Intermediate Representation (IR) for the mvjit compiler
//
// Three-address, block-structured IR.  Blocks live in a per-function
// arena indexed by BlockId; control-flow edges and predecessor sets
// refer to blocks only by id.  Every IR variable has an entry in the
// program-wide VarMeta table.
//

pub mod builder;
pub mod dce;
pub mod minimize;
pub mod subst;
pub mod typing;

use std::collections::{BTreeSet, HashSet};
use std::fmt::{self, Write};

// ============================================================================
// Identifiers
// ============================================================================

/// IR variable id, unique across the whole program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Basic block id, an index into the owning function's block arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

/// Function id, an index into `SimpleIr::functions`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

// ============================================================================
// Variable Metadata
// ============================================================================

/// Semantic type of an IR variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    Undefined,
    Unit,
    Int,
    Double,
    Ptr,
    Error,
}

impl VarType {
    pub fn from_value_type(ty: crate::ast::ValueType) -> Self {
        use crate::ast::ValueType;
        match ty {
            ValueType::Void => VarType::Unit,
            ValueType::Int => VarType::Int,
            ValueType::Double => VarType::Double,
            ValueType::String => VarType::Ptr,
        }
    }

    pub fn is_double(&self) -> bool {
        *self == VarType::Double
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VarType::Undefined => "undef",
            VarType::Unit => "unit",
            VarType::Int => "int",
            VarType::Double => "double",
            VarType::Ptr => "ptr",
            VarType::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct VarMeta {
    pub id: VarId,
    /// Source name, for dumps and diagnostics
    pub name: Option<String>,
    pub ty: VarType,
    /// Version of a user variable (as opposed to a temporary)
    pub is_source_var: bool,
    /// Pre-SSA variable this one is a version of (itself if unversioned)
    pub origin: VarId,
    /// Reference cell or by-reference parameter; never register allocated
    pub is_reference: bool,
}

// ============================================================================
// Atoms and Expressions
// ============================================================================

/// Leaf value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Atom {
    Int(i64),
    Double(f64),
    /// Pointer literal; when `pooled`, `value` is a string pool index
    Ptr { value: u64, pooled: bool },
    Var(VarId),
    /// Load through a reference cell
    ReadRef(VarId),
}

impl Atom {
    pub fn is_literal(&self) -> bool {
        matches!(self, Atom::Int(_) | Atom::Double(_) | Atom::Ptr { .. })
    }

    /// Variable read by this atom, including reference cells
    pub fn used_var(&self) -> Option<VarId> {
        match self {
            Atom::Var(v) | Atom::ReadRef(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Eq,
    Neq,
    Or,
    And,
    Xor,
    LOr,
    LAnd,
}

impl BinOp {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Mul
                | BinOp::Eq
                | BinOp::Neq
                | BinOp::Or
                | BinOp::And
                | BinOp::Xor
                | BinOp::LOr
                | BinOp::LAnd
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Neq)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Or => "|",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::LOr => "||",
            BinOp::LAnd => "&&",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnOp {
    I2D,
    D2I,
    Neg,
    Not,
}

impl UnOp {
    pub fn name(&self) -> &'static str {
        match self {
            UnOp::I2D => "i2d",
            UnOp::D2I => "d2i",
            UnOp::Neg => "-",
            UnOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom(Atom),
    Bin {
        op: BinOp,
        left: Atom,
        right: Atom,
    },
    Un {
        op: UnOp,
        operand: Atom,
    },
    Call {
        func: FunctionId,
        args: Vec<Atom>,
        ref_args: Vec<VarId>,
    },
}

impl Expr {
    pub fn atoms(&self) -> Vec<&Atom> {
        match self {
            Expr::Atom(a) => vec![a],
            Expr::Bin { left, right, .. } => vec![left, right],
            Expr::Un { operand, .. } => vec![operand],
            Expr::Call { args, .. } => args.iter().collect(),
        }
    }

    pub fn atoms_mut(&mut self) -> Vec<&mut Atom> {
        match self {
            Expr::Atom(a) => vec![a],
            Expr::Bin { left, right, .. } => vec![left, right],
            Expr::Un { operand, .. } => vec![operand],
            Expr::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. })
    }
}

// ============================================================================
// Statements and Jumps
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        var: VarId,
        value: Expr,
    },
    /// Value of `var` selected by the predecessor control arrived from
    Phi {
        var: VarId,
        sources: Vec<(BlockId, VarId)>,
    },
    Print(Atom),
    /// Store through a reference cell
    WriteRef {
        value: Atom,
        cell: VarId,
    },
    Return(Option<Atom>),
}

impl Stmt {
    /// Variable defined by this statement
    pub fn def(&self) -> Option<VarId> {
        match self {
            Stmt::Assign { var, .. } | Stmt::Phi { var, .. } => Some(*var),
            _ => None,
        }
    }

    /// Every variable read by this statement, reference cells included
    pub fn uses(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        match self {
            Stmt::Assign { value, .. } => {
                out.extend(value.atoms().iter().filter_map(|a| a.used_var()));
                if let Expr::Call { ref_args, .. } = value {
                    out.extend(ref_args.iter().copied());
                }
            }
            Stmt::Phi { sources, .. } => out.extend(sources.iter().map(|(_, v)| *v)),
            Stmt::Print(a) | Stmt::Return(Some(a)) => out.extend(a.used_var()),
            Stmt::WriteRef { value, cell } => {
                out.extend(value.used_var());
                out.push(*cell);
            }
            Stmt::Return(None) => {}
        }
        out
    }

    /// Atoms read by this statement (phi sources are not atoms)
    pub fn atoms_mut(&mut self) -> Vec<&mut Atom> {
        match self {
            Stmt::Assign { value, .. } => value.atoms_mut(),
            Stmt::Phi { .. } | Stmt::Return(None) => Vec::new(),
            Stmt::Print(a) | Stmt::Return(Some(a)) => vec![a],
            Stmt::WriteRef { value, .. } => vec![value],
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Stmt::Phi { .. })
    }
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Jump {
    Always(BlockId),
    Cond {
        yes: BlockId,
        no: BlockId,
        cond: Atom,
    },
}

impl Jump {
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Jump::Always(t) => vec![*t],
            Jump::Cond { yes, no, .. } => vec![*yes, *no],
        }
    }

    /// Redirect every edge to `from` towards `to`
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        match self {
            Jump::Always(t) => {
                if *t == from {
                    *t = to;
                }
            }
            Jump::Cond { yes, no, .. } => {
                if *yes == from {
                    *yes = to;
                }
                if *no == from {
                    *no = to;
                }
            }
        }
    }
}

// ============================================================================
// Blocks and Functions
// ============================================================================

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub stmts: Vec<Stmt>,
    /// None only for blocks ending in a return
    pub jump: Option<Jump>,
    pub preds: BTreeSet<BlockId>,

    // Dominator information, filled by crate::dominate
    pub idom: Option<BlockId>,
    pub dom_children: Vec<BlockId>,
    pub dom_frontier: Vec<BlockId>,
    pub dom_level: u32,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            stmts: Vec::new(),
            jump: None,
            preds: BTreeSet::new(),
            idom: None,
            dom_children: Vec::new(),
            dom_frontier: Vec::new(),
            dom_level: 0,
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.jump.as_ref().map(|j| j.targets()).unwrap_or_default()
    }

    pub fn has_phis(&self) -> bool {
        self.stmts.first().map(|s| s.is_phi()).unwrap_or(false)
    }
}

/// External function resolved at translation time
#[derive(Debug, Clone)]
pub struct NativeFunction {
    pub symbol: String,
    pub address: usize,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub return_type: VarType,
    /// All parameters in calling order: declared, by-value captures,
    /// then by-reference captures
    pub params: Vec<VarId>,
    /// Subset of `params` passed as cell addresses
    pub ref_params: Vec<VarId>,
    /// Reference cells living in this function's frame
    pub memory_cells: Vec<VarId>,
    pub entry: BlockId,
    pub blocks: Vec<Option<Block>>,
    pub native: Option<NativeFunction>,
    pub max_dom_level: u32,
}

impl Function {
    pub fn new(id: FunctionId, name: impl Into<String>, return_type: VarType) -> Self {
        Self {
            id,
            name: name.into(),
            return_type,
            params: Vec::new(),
            ref_params: Vec::new(),
            memory_cells: Vec::new(),
            entry: BlockId(0),
            blocks: Vec::new(),
            native: None,
            max_dom_level: 0,
        }
    }

    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(Block::new(id)));
        id
    }

    pub fn get_block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.0 as usize).and_then(|b| b.as_ref())
    }

    pub fn get_block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.0 as usize).and_then(|b| b.as_mut())
    }

    /// Live blocks in id order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter_map(|b| b.as_ref())
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.iter_mut().filter_map(|b| b.as_mut())
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(|b| b.id).collect()
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks().count()
    }

    /// Set the terminator of `from` and record it in the targets'
    /// predecessor sets
    pub fn set_jump(&mut self, from: BlockId, jump: Jump) {
        for t in jump.targets() {
            if let Some(bb) = self.get_block_mut(t) {
                bb.preds.insert(from);
            }
        }
        if let Some(bb) = self.get_block_mut(from) {
            bb.jump = Some(jump);
        }
    }

    /// Recompute every predecessor set from the terminators
    pub fn rebuild_preds(&mut self) {
        let edges: Vec<(BlockId, BlockId)> = self
            .blocks()
            .flat_map(|bb| bb.successors().into_iter().map(move |s| (bb.id, s)))
            .collect();
        for bb in self.blocks_mut() {
            bb.preds.clear();
        }
        for (from, to) in edges {
            if let Some(bb) = self.get_block_mut(to) {
                bb.preds.insert(from);
            }
        }
    }

    /// Drop the edge `from -> to` from `to`'s bookkeeping: its predecessor
    /// set and its phi operands.
    pub fn forget_edge(&mut self, from: BlockId, to: BlockId) {
        if let Some(bb) = self.get_block_mut(to) {
            bb.preds.remove(&from);
            for stmt in &mut bb.stmts {
                if let Stmt::Phi { sources, .. } = stmt {
                    sources.retain(|(b, _)| *b != from);
                }
            }
        }
    }

    /// Reverse postorder from the entry.  The first successor of a block
    /// is laid out before the second.
    pub fn rpo(&self) -> Vec<BlockId> {
        let mut visited = HashSet::new();
        let mut postorder = Vec::new();

        fn dfs(
            func: &Function,
            bb_id: BlockId,
            visited: &mut HashSet<BlockId>,
            postorder: &mut Vec<BlockId>,
        ) {
            if !visited.insert(bb_id) {
                return;
            }
            if let Some(bb) = func.get_block(bb_id) {
                for child in bb.successors().into_iter().rev() {
                    dfs(func, child, visited, postorder);
                }
                postorder.push(bb_id);
            }
        }

        dfs(self, self.entry, &mut visited, &mut postorder);
        postorder.reverse();
        postorder
    }

    /// Remove blocks not reachable from the entry.  Returns true if any
    /// block was removed.
    pub fn remove_unreachable(&mut self) -> bool {
        let reachable: HashSet<BlockId> = self.rpo().into_iter().collect();
        let dead: Vec<BlockId> = self
            .block_ids()
            .into_iter()
            .filter(|id| !reachable.contains(id))
            .collect();

        for &id in &dead {
            let succs = self.get_block(id).map(|b| b.successors()).unwrap_or_default();
            for s in succs {
                self.forget_edge(id, s);
            }
            self.blocks[id.0 as usize] = None;
        }
        !dead.is_empty()
    }

    /// Does block `a` dominate block `b`?  Requires dominator info.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = Some(b);
        while let Some(id) = current {
            if id == a {
                return true;
            }
            current = self.get_block(id).and_then(|bb| bb.idom);
        }
        false
    }
}

// ============================================================================
// Program
// ============================================================================

/// Program-wide variable metadata, indexed by VarId
#[derive(Debug, Clone, Default)]
pub struct VarTable {
    metas: Vec<VarMeta>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: Option<String>, ty: VarType, is_source_var: bool) -> VarId {
        let id = VarId(self.metas.len() as u32);
        self.metas.push(VarMeta {
            id,
            name,
            ty,
            is_source_var,
            origin: id,
            is_reference: false,
        });
        id
    }

    /// New user variable
    pub fn new_source_var(&mut self, name: &str, ty: VarType) -> VarId {
        self.push(Some(name.to_string()), ty, true)
    }

    /// New temporary; its type is derived later unless known
    pub fn new_temp(&mut self, ty: VarType) -> VarId {
        self.push(None, ty, false)
    }

    /// New reference cell or by-reference parameter holding a `ty`
    pub fn new_reference(&mut self, name: &str, ty: VarType) -> VarId {
        let id = self.push(Some(name.to_string()), ty, false);
        self.metas[id.0 as usize].is_reference = true;
        id
    }

    /// New SSA version of a source variable
    pub fn new_version(&mut self, origin: VarId) -> VarId {
        let base = self.meta(origin).clone();
        let id = VarId(self.metas.len() as u32);
        self.metas.push(VarMeta {
            id,
            origin: base.origin,
            ..base
        });
        id
    }

    pub fn meta(&self, id: VarId) -> &VarMeta {
        &self.metas[id.0 as usize]
    }

    pub fn meta_mut(&mut self, id: VarId) -> &mut VarMeta {
        &mut self.metas[id.0 as usize]
    }

    pub fn var_type(&self, id: VarId) -> VarType {
        self.metas
            .get(id.0 as usize)
            .map(|m| m.ty)
            .unwrap_or(VarType::Undefined)
    }

    /// Type of an atom's value
    pub fn atom_type(&self, atom: &Atom) -> VarType {
        match atom {
            Atom::Int(_) => VarType::Int,
            Atom::Double(_) => VarType::Double,
            Atom::Ptr { .. } => VarType::Ptr,
            Atom::Var(v) | Atom::ReadRef(v) => self.var_type(*v),
        }
    }

    pub fn len(&self) -> usize {
        self.metas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VarMeta> {
        self.metas.iter()
    }
}

/// Root of the IR: all functions, the string pool, and variable metadata
#[derive(Debug, Clone, Default)]
pub struct SimpleIr {
    pub functions: Vec<Function>,
    pub pool: Vec<String>,
    pub vars: VarTable,
}

impl SimpleIr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a string to the pool, reusing an equal entry
    pub fn intern_string(&mut self, s: &str) -> u64 {
        if let Some(pos) = self.pool.iter().position(|p| p == s) {
            return pos as u64;
        }
        self.pool.push(s.to_string());
        (self.pool.len() - 1) as u64
    }

    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    // ========================================================================
    // Textual dump
    // ========================================================================

    fn fmt_var(&self, out: &mut String, v: VarId) {
        let _ = write!(out, "{}:{}", v, self.vars.var_type(v));
        if let Some(name) = &self.vars.meta(v).name {
            let _ = write!(out, "[{}]", name);
        }
    }

    fn fmt_atom(&self, out: &mut String, atom: &Atom) {
        match atom {
            Atom::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            Atom::Double(v) => {
                let _ = write!(out, "{:?}", v);
            }
            Atom::Ptr { value, pooled } => {
                if *pooled {
                    let s = self.pool.get(*value as usize).map(|s| s.as_str()).unwrap_or("");
                    let _ = write!(out, "str#{}{:?}", value, s);
                } else {
                    let _ = write!(out, "ptr({:#x})", value);
                }
            }
            Atom::Var(v) => self.fmt_var(out, *v),
            Atom::ReadRef(v) => {
                out.push('*');
                self.fmt_var(out, *v);
            }
        }
    }

    fn fmt_expr(&self, out: &mut String, expr: &Expr) {
        match expr {
            Expr::Atom(a) => self.fmt_atom(out, a),
            Expr::Bin { op, left, right } => {
                self.fmt_atom(out, left);
                let _ = write!(out, " {} ", op.symbol());
                self.fmt_atom(out, right);
            }
            Expr::Un { op, operand } => {
                out.push_str(op.name());
                out.push(' ');
                self.fmt_atom(out, operand);
            }
            Expr::Call {
                func,
                args,
                ref_args,
            } => {
                let name = self.function(*func).map(|f| f.name.as_str()).unwrap_or("?");
                let _ = write!(out, "call {}(", name);
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.fmt_atom(out, a);
                }
                out.push(')');
                if !ref_args.is_empty() {
                    out.push_str(" refs(");
                    for (i, r) in ref_args.iter().enumerate() {
                        if i > 0 {
                            out.push(' ');
                        }
                        self.fmt_var(out, *r);
                    }
                    out.push(')');
                }
            }
        }
    }

    pub fn fmt_stmt(&self, out: &mut String, stmt: &Stmt) {
        match stmt {
            Stmt::Assign { var, value } => {
                self.fmt_var(out, *var);
                out.push_str(" = ");
                self.fmt_expr(out, value);
            }
            Stmt::Phi { var, sources } => {
                self.fmt_var(out, *var);
                out.push_str(" = phi(");
                for (i, (_, v)) in sources.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    let _ = write!(out, "{}", v);
                }
                out.push(')');
            }
            Stmt::Print(a) => {
                out.push_str("print ");
                self.fmt_atom(out, a);
            }
            Stmt::WriteRef { value, cell } => {
                out.push('*');
                self.fmt_var(out, *cell);
                out.push_str(" = ");
                self.fmt_atom(out, value);
            }
            Stmt::Return(None) => out.push_str("return"),
            Stmt::Return(Some(a)) => {
                out.push_str("return ");
                self.fmt_atom(out, a);
            }
        }
    }

    pub fn fmt_jump(&self, out: &mut String, jump: &Jump) {
        match jump {
            Jump::Always(t) => {
                let _ = write!(out, "jump {}", t);
            }
            Jump::Cond { yes, no, cond } => {
                out.push_str("if ");
                self.fmt_atom(out, cond);
                let _ = write!(out, " jump {} else {}", yes, no);
            }
        }
    }

    /// Dump one function, blocks in layout order
    pub fn dump_function(&self, func: &Function) -> String {
        let mut out = String::new();
        let _ = write!(out, "function {} (", func.name);
        for (i, p) in func.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            if func.ref_params.contains(p) {
                out.push_str("ref ");
            }
            self.fmt_var(&mut out, *p);
        }
        let _ = writeln!(out, ") -> {}", func.return_type);

        if let Some(native) = &func.native {
            let _ = writeln!(out, "    native {} @ {:#x}", native.symbol, native.address);
            return out;
        }
        if !func.memory_cells.is_empty() {
            out.push_str("    cells:");
            for c in &func.memory_cells {
                out.push(' ');
                self.fmt_var(&mut out, *c);
            }
            out.push('\n');
        }

        for id in func.rpo() {
            let Some(bb) = func.get_block(id) else {
                continue;
            };
            let _ = write!(out, "{}:", bb.id);
            if !bb.preds.is_empty() {
                out.push_str("  ; preds");
                for p in &bb.preds {
                    let _ = write!(out, " {}", p);
                }
            }
            out.push('\n');
            for stmt in &bb.stmts {
                out.push_str("    ");
                self.fmt_stmt(&mut out, stmt);
                out.push('\n');
            }
            if let Some(jump) = &bb.jump {
                out.push_str("    ");
                self.fmt_jump(&mut out, jump);
                out.push('\n');
            }
        }
        out
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        for func in &self.functions {
            out.push_str(&self.dump_function(func));
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for SimpleIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

// ============================================================================
// Tests
// ============================================================================
