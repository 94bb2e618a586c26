//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Name resolution and closure capture analysis
//
// For every function, finds the variables of enclosing functions it
// reads or writes.  Reads become extra by-value parameters, writes
// become by-reference parameters.  Captures are closed over calls: a
// function calling a capturing function must hand those variables on,
// so it captures them too.
//

use crate::ast::{
    AstFunctionId, AstVarId, Block, Expr, FunctionDecl, Program, Stmt, StoreOp, ValueType, VarDecl,
};
use crate::error::{JitError, Result};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// Lexical Scopes
// ============================================================================

struct Frame<'a> {
    function: AstFunctionId,
    vars: HashMap<&'a str, &'a VarDecl>,
    functions: HashMap<&'a str, &'a FunctionDecl>,
}

/// Stack of lexical scopes, innermost last
pub(crate) struct Scopes<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> Scopes<'a> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Open the parameter scope of a function
    pub fn push_function(&mut self, func: &'a FunctionDecl) {
        let mut frame = Frame {
            function: func.id,
            vars: HashMap::new(),
            functions: HashMap::new(),
        };
        for param in &func.params {
            frame.vars.insert(param.name.as_str(), param);
        }
        self.frames.push(frame);
    }

    /// Open a block scope belonging to `function`
    pub fn push_block(&mut self, function: AstFunctionId, block: &'a Block) {
        let mut frame = Frame {
            function,
            vars: HashMap::new(),
            functions: HashMap::new(),
        };
        for var in &block.vars {
            frame.vars.insert(var.name.as_str(), var);
        }
        for func in &block.functions {
            frame.functions.insert(func.name.as_str(), func);
        }
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolve a variable name to its declaration and owning function
    pub fn lookup_var(&self, name: &str) -> Option<(&'a VarDecl, AstFunctionId)> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.vars.get(name).map(|v| (*v, f.function)))
    }

    pub fn lookup_function(&self, name: &str) -> Option<&'a FunctionDecl> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.functions.get(name).copied())
    }
}

// ============================================================================
// Analysis Results
// ============================================================================

/// A variable as seen by the analysis
#[derive(Debug, Clone)]
pub struct VarInfo {
    pub name: String,
    pub ty: ValueType,
    pub owner: AstFunctionId,
}

/// Outer variables a function needs, in declaration-id order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionCaptures {
    pub by_value: Vec<AstVarId>,
    pub by_ref: Vec<AstVarId>,
}

#[derive(Debug, Default)]
pub struct ClosureInfo {
    vars: HashMap<AstVarId, VarInfo>,
    captures: HashMap<AstFunctionId, FunctionCaptures>,
    boxed: HashSet<AstVarId>,
}

static NO_CAPTURES: FunctionCaptures = FunctionCaptures {
    by_value: Vec::new(),
    by_ref: Vec::new(),
};

impl ClosureInfo {
    pub fn analyze(program: &Program) -> Result<Self> {
        let mut walker = Walker::default();
        let mut scopes = Scopes::new();
        walker.function(&program.top, &mut scopes)?;
        Ok(walker.finish())
    }

    pub fn var(&self, id: AstVarId) -> Option<&VarInfo> {
        self.vars.get(&id)
    }

    pub fn captures(&self, func: AstFunctionId) -> &FunctionCaptures {
        self.captures.get(&func).unwrap_or(&NO_CAPTURES)
    }

    /// Is this variable written by a function other than its owner?
    pub fn is_boxed(&self, var: AstVarId) -> bool {
        self.boxed.contains(&var)
    }
}

// ============================================================================
// Tree Walk
// ============================================================================

#[derive(Default)]
struct Walker {
    vars: HashMap<AstVarId, VarInfo>,
    /// Function ids in declaration order
    order: Vec<AstFunctionId>,
    owned: HashMap<AstFunctionId, HashSet<AstVarId>>,
    reads: HashMap<AstFunctionId, BTreeSet<AstVarId>>,
    writes: HashMap<AstFunctionId, BTreeSet<AstVarId>>,
    calls: HashMap<AstFunctionId, BTreeSet<AstFunctionId>>,
    /// Function currently being walked, with its name for diagnostics
    current: Vec<(AstFunctionId, String)>,
}

impl Walker {
    fn current_id(&self) -> AstFunctionId {
        self.current.last().map(|(id, _)| *id).unwrap_or(AstFunctionId(0))
    }

    fn current_name(&self) -> &str {
        self.current.last().map(|(_, n)| n.as_str()).unwrap_or("")
    }

    fn declare(&mut self, decl: &VarDecl, owner: AstFunctionId) {
        self.vars.insert(
            decl.id,
            VarInfo {
                name: decl.name.clone(),
                ty: decl.ty,
                owner,
            },
        );
        self.owned.entry(owner).or_default().insert(decl.id);
    }

    fn function<'a>(&mut self, func: &'a FunctionDecl, scopes: &mut Scopes<'a>) -> Result<()> {
        self.order.push(func.id);
        self.current.push((func.id, func.name.clone()));
        self.owned.entry(func.id).or_default();
        for param in &func.params {
            self.declare(param, func.id);
        }

        scopes.push_function(func);
        if let Some(block) = func.block() {
            self.block(block, scopes)?;
        }
        scopes.pop();

        self.current.pop();
        Ok(())
    }

    fn block<'a>(&mut self, block: &'a Block, scopes: &mut Scopes<'a>) -> Result<()> {
        let owner = self.current_id();
        for var in &block.vars {
            self.declare(var, owner);
        }
        scopes.push_block(owner, block);
        for func in &block.functions {
            self.function(func, scopes)?;
        }
        for stmt in &block.stmts {
            self.stmt(stmt, scopes)?;
        }
        scopes.pop();
        Ok(())
    }

    fn use_var(&mut self, name: &str, scopes: &Scopes, write: bool) -> Result<()> {
        let Some((decl, owner)) = scopes.lookup_var(name) else {
            return Err(JitError::translation(
                self.current_name(),
                format!("unknown variable '{}'", name),
            ));
        };
        let me = self.current_id();
        if owner != me {
            let set = if write {
                self.writes.entry(me).or_default()
            } else {
                self.reads.entry(me).or_default()
            };
            set.insert(decl.id);
        }
        Ok(())
    }

    fn stmt<'a>(&mut self, stmt: &'a Stmt, scopes: &mut Scopes<'a>) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => self.expr(e, scopes),
            Stmt::Store { var, op, value } => {
                self.expr(value, scopes)?;
                if *op != StoreOp::Assign {
                    self.use_var(var, scopes, false)?;
                }
                self.use_var(var, scopes, true)
            }
            Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                self.expr(cond, scopes)?;
                self.block(then_block, scopes)?;
                if let Some(b) = else_block {
                    self.block(b, scopes)?;
                }
                Ok(())
            }
            Stmt::While { cond, body } => {
                self.expr(cond, scopes)?;
                self.block(body, scopes)
            }
            Stmt::For {
                var,
                from,
                to,
                body,
            } => {
                self.expr(from, scopes)?;
                self.expr(to, scopes)?;
                self.use_var(var, scopes, false)?;
                self.use_var(var, scopes, true)?;
                self.block(body, scopes)
            }
            Stmt::Return(Some(e)) => self.expr(e, scopes),
            Stmt::Return(None) => Ok(()),
            Stmt::Print(args) => {
                for a in args {
                    self.expr(a, scopes)?;
                }
                Ok(())
            }
            Stmt::Block(b) => self.block(b, scopes),
        }
    }

    fn expr(&mut self, expr: &Expr, scopes: &Scopes) -> Result<()> {
        match expr {
            Expr::Int(_) | Expr::Double(_) | Expr::Str(_) => Ok(()),
            Expr::Load(name) => self.use_var(name, scopes, false),
            Expr::Binary { left, right, .. } => {
                self.expr(left, scopes)?;
                self.expr(right, scopes)
            }
            Expr::Unary { operand, .. } => self.expr(operand, scopes),
            Expr::Call { name, args } => {
                let Some(callee) = scopes.lookup_function(name) else {
                    return Err(JitError::translation(
                        self.current_name(),
                        format!("unknown function '{}'", name),
                    ));
                };
                let me = self.current_id();
                self.calls.entry(me).or_default().insert(callee.id);
                for a in args {
                    self.expr(a, scopes)?;
                }
                Ok(())
            }
        }
    }

    /// Close captures over the call graph and split them into value and
    /// reference sets.
    fn finish(mut self) -> ClosureInfo {
        let mut changed = true;
        while changed {
            changed = false;
            for &caller in &self.order {
                let callees: Vec<AstFunctionId> = self
                    .calls
                    .get(&caller)
                    .map(|c| c.iter().copied().collect())
                    .unwrap_or_default();
                let owned = self.owned.get(&caller).cloned().unwrap_or_default();

                for callee in callees {
                    for table in [&mut self.reads, &mut self.writes] {
                        let inherited: Vec<AstVarId> = table
                            .get(&callee)
                            .map(|s| s.iter().copied().filter(|v| !owned.contains(v)).collect())
                            .unwrap_or_default();
                        let set = table.entry(caller).or_default();
                        for v in inherited {
                            changed |= set.insert(v);
                        }
                    }
                }
            }
        }

        let mut captures = HashMap::new();
        let mut boxed = HashSet::new();
        for &func in &self.order {
            let writes = self.writes.remove(&func).unwrap_or_default();
            let reads = self.reads.remove(&func).unwrap_or_default();
            let by_value: Vec<AstVarId> =
                reads.iter().copied().filter(|v| !writes.contains(v)).collect();
            boxed.extend(writes.iter().copied());
            let by_ref: Vec<AstVarId> = writes.into_iter().collect();
            if !by_value.is_empty() || !by_ref.is_empty() {
                log::trace!(
                    "closure: function {:?} captures {} by value, {} by reference",
                    func,
                    by_value.len(),
                    by_ref.len()
                );
                captures.insert(func, FunctionCaptures { by_value, by_ref });
            }
        }

        ClosureInfo {
            vars: self.vars,
            captures,
            boxed,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
