//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// AST to IR lowering for mvjit
//
// Walks the closure-analyzed AST and produces one IR Function per AST
// function.  Captured outer variables become trailing parameters:
// by-value captures first, then by-reference captures, which arrive as
// cell addresses.  Variables written by a callee through a reference
// live in a memory cell in their owner; the owner stores them to the
// cell before such a call and reloads them afterwards.
//

use crate::ast::{
    self, AstFunctionId, AstVarId, BinaryOp, FunctionBody, FunctionDecl, Program, StoreOp,
    UnaryOp, ValueType,
};
use crate::closure::{ClosureInfo, FunctionCaptures, Scopes};
use crate::error::{JitError, Result};
use crate::ir::{
    Atom, BinOp, BlockId, Expr, Function, FunctionId, Jump, NativeFunction, SimpleIr, Stmt, UnOp,
    VarId, VarType,
};
use std::collections::HashMap;

/// Function and variable ids must fit 16 bits
pub const MAX_FUNCTIONS: usize = u16::MAX as usize;
pub const MAX_VARIABLES: usize = u16::MAX as usize;

// ============================================================================
// Function Signatures
// ============================================================================

/// Calling interface of one function, known before any body is lowered
#[derive(Debug, Clone)]
struct Signature {
    id: FunctionId,
    name: String,
    return_type: ValueType,
    param_types: Vec<ValueType>,
    captures: FunctionCaptures,
    /// Parameter variables receiving by-value captures
    value_params: Vec<VarId>,
    /// Parameter variables receiving by-reference captures
    ref_params: Vec<VarId>,
}

/// A variable owned by the function being lowered
#[derive(Debug, Clone, Copy)]
struct OwnedVar {
    var: VarId,
    /// Memory cell, if a callee writes the variable through a reference
    cell: Option<VarId>,
}

/// How the current function reaches a source variable
#[derive(Debug, Clone, Copy)]
enum Binding {
    /// Register-class variable: own local, own parameter or by-value capture
    Direct { var: VarId, cell: Option<VarId> },
    /// By-reference capture: accessed through the pointer parameter
    Ref(VarId),
}

/// Zero value of a type, used for local initialization and implicit returns
pub fn zero_atom(ty: VarType) -> Option<Atom> {
    match ty {
        VarType::Int => Some(Atom::Int(0)),
        VarType::Double => Some(Atom::Double(0.0)),
        VarType::Ptr => Some(Atom::Ptr {
            value: 0,
            pooled: false,
        }),
        _ => None,
    }
}

// ============================================================================
// Builder State
// ============================================================================

/// Per-function lowering state
struct FnState {
    ast_id: AstFunctionId,
    func: Function,
    cur: BlockId,
}

pub struct IrBuilder<'a> {
    closures: &'a ClosureInfo,
    natives: &'a HashMap<String, usize>,
    ir: SimpleIr,
    slots: Vec<Option<Function>>,
    sigs: HashMap<AstFunctionId, Signature>,
    owned: HashMap<AstVarId, OwnedVar>,
}

impl<'a> IrBuilder<'a> {
    pub fn new(closures: &'a ClosureInfo, natives: &'a HashMap<String, usize>) -> Self {
        Self {
            closures,
            natives,
            ir: SimpleIr::new(),
            slots: Vec::new(),
            sigs: HashMap::new(),
            owned: HashMap::new(),
        }
    }

    /// Lower a whole program.  The top-level function gets FunctionId(0).
    pub fn build(mut self, program: &Program) -> Result<SimpleIr> {
        self.declare_function(&program.top)?;

        let mut scopes = Scopes::new();
        self.lower_function(&program.top, &mut scopes)?;

        let mut functions = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Some(f) => functions.push(f),
                None => {
                    return Err(JitError::bad_ir(
                        format!("#{}", i),
                        "function declared but never lowered",
                    ))
                }
            }
        }
        self.ir.functions = functions;
        log::debug!(
            "builder: {} functions, {} variables, {} pooled strings",
            self.ir.functions.len(),
            self.ir.vars.len(),
            self.ir.pool.len()
        );
        Ok(self.ir)
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Assign ids and parameter variables to `decl` and every function
    /// nested inside it, so calls can be lowered before their callee.
    fn declare_function(&mut self, decl: &FunctionDecl) -> Result<()> {
        let id = FunctionId(self.slots.len() as u32);
        let return_type = VarType::from_value_type(decl.return_type);
        let mut func = Function::new(id, decl.name.clone(), return_type);

        for param in &decl.params {
            if param.ty == ValueType::Void {
                return Err(JitError::translation(
                    &decl.name,
                    format!("parameter '{}' has void type", param.name),
                ));
            }
            let var = self.declare_owned(&mut func, param.id, &param.name, param.ty);
            func.params.push(var);
        }

        let captures = self.closures.captures(decl.id).clone();
        let mut value_params = Vec::new();
        let mut ref_params = Vec::new();
        for v in &captures.by_value {
            let (name, ty) = self.var_info(&decl.name, *v)?;
            let p = self
                .ir
                .vars
                .new_source_var(&name, VarType::from_value_type(ty));
            func.params.push(p);
            value_params.push(p);
        }
        for v in &captures.by_ref {
            let (name, ty) = self.var_info(&decl.name, *v)?;
            let p = self
                .ir
                .vars
                .new_reference(&name, VarType::from_value_type(ty));
            func.params.push(p);
            func.ref_params.push(p);
            ref_params.push(p);
        }

        if let FunctionBody::Native(symbol) = &decl.body {
            let address = self.resolve_native(&decl.name, symbol)?;
            func.native = Some(NativeFunction {
                symbol: symbol.clone(),
                address,
            });
        }

        self.sigs.insert(
            decl.id,
            Signature {
                id,
                name: decl.name.clone(),
                return_type: decl.return_type,
                param_types: decl.params.iter().map(|p| p.ty).collect(),
                captures,
                value_params,
                ref_params,
            },
        );
        self.slots.push(Some(func));

        if let Some(block) = decl.block() {
            self.declare_nested(block)?;
        }
        Ok(())
    }

    fn declare_nested(&mut self, block: &ast::Block) -> Result<()> {
        for f in &block.functions {
            self.declare_function(f)?;
        }
        for stmt in &block.stmts {
            match stmt {
                ast::Stmt::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    self.declare_nested(then_block)?;
                    if let Some(b) = else_block {
                        self.declare_nested(b)?;
                    }
                }
                ast::Stmt::While { body, .. } | ast::Stmt::For { body, .. } => {
                    self.declare_nested(body)?
                }
                ast::Stmt::Block(b) => self.declare_nested(b)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn var_info(&self, func_name: &str, v: AstVarId) -> Result<(String, ValueType)> {
        self.closures
            .var(v)
            .map(|i| (i.name.clone(), i.ty))
            .ok_or_else(|| JitError::bad_ir(func_name, format!("captured variable {:?} unknown", v)))
    }

    /// Create the IR variable (and cell, if boxed) for a declaration
    fn declare_owned(
        &mut self,
        func: &mut Function,
        id: AstVarId,
        name: &str,
        ty: ValueType,
    ) -> VarId {
        let var = self
            .ir
            .vars
            .new_source_var(name, VarType::from_value_type(ty));
        let cell = if self.closures.is_boxed(id) {
            let c = self
                .ir
                .vars
                .new_reference(&format!("{}.cell", name), VarType::from_value_type(ty));
            func.memory_cells.push(c);
            Some(c)
        } else {
            None
        };
        self.owned.insert(id, OwnedVar { var, cell });
        var
    }

    fn resolve_native(&self, func_name: &str, symbol: &str) -> Result<usize> {
        if let Some(&addr) = self.natives.get(symbol) {
            return Ok(addr);
        }
        crate::runtime::lookup_symbol(symbol).ok_or_else(|| {
            JitError::translation(func_name, format!("unresolved native symbol '{}'", symbol))
        })
    }

    // ========================================================================
    // Function Bodies
    // ========================================================================

    fn lower_function<'p>(&mut self, decl: &'p FunctionDecl, scopes: &mut Scopes<'p>) -> Result<()> {
        let slot = self.signature(&decl.name, decl.id)?.id.0 as usize;
        let mut func = self
            .slots
            .get_mut(slot)
            .and_then(|s| s.take())
            .ok_or_else(|| JitError::bad_ir(&decl.name, "function lowered twice"))?;

        let Some(body) = decl.block() else {
            self.slots[slot] = Some(func);
            return Ok(());
        };

        let entry = func.add_block();
        func.entry = entry;
        let mut st = FnState {
            ast_id: decl.id,
            func,
            cur: entry,
        };

        scopes.push_function(decl);
        self.block(&mut st, body, scopes)?;
        scopes.pop();

        if !self.is_terminated(&st) {
            let ret = zero_atom(st.func.return_type);
            self.emit(&mut st, Stmt::Return(ret))?;
        }

        log::debug!(
            "builder: lowered {} ({} blocks, {} params)",
            st.func.name,
            st.func.num_blocks(),
            st.func.params.len()
        );
        self.slots[slot] = Some(st.func);
        Ok(())
    }

    fn signature(&self, func_name: &str, id: AstFunctionId) -> Result<&Signature> {
        self.sigs
            .get(&id)
            .ok_or_else(|| JitError::bad_ir(func_name, format!("undeclared function {:?}", id)))
    }

    fn emit(&mut self, st: &mut FnState, stmt: Stmt) -> Result<()> {
        let cur = st.cur;
        match st.func.get_block_mut(cur) {
            Some(bb) => {
                bb.stmts.push(stmt);
                Ok(())
            }
            None => Err(JitError::bad_ir(&st.func.name, format!("missing block {}", cur))),
        }
    }

    fn is_terminated(&self, st: &FnState) -> bool {
        st.func
            .get_block(st.cur)
            .map(|bb| bb.jump.is_some() || matches!(bb.stmts.last(), Some(Stmt::Return(_))))
            .unwrap_or(true)
    }

    /// End the current block with `jump` unless it already returned
    fn jump(&mut self, st: &mut FnState, jump: Jump) {
        if !self.is_terminated(st) {
            st.func.set_jump(st.cur, jump);
        }
    }

    fn temp(&mut self) -> VarId {
        self.ir.vars.new_temp(VarType::Undefined)
    }

    fn block<'p>(
        &mut self,
        st: &mut FnState,
        block: &'p ast::Block,
        scopes: &mut Scopes<'p>,
    ) -> Result<()> {
        scopes.push_block(st.ast_id, block);

        for decl in &block.vars {
            if decl.ty == ValueType::Void {
                return Err(JitError::translation(
                    &st.func.name,
                    format!("variable '{}' has void type", decl.name),
                ));
            }
            let var = self.declare_owned(&mut st.func, decl.id, &decl.name, decl.ty);
            if let Some(zero) = zero_atom(VarType::from_value_type(decl.ty)) {
                self.emit(
                    st,
                    Stmt::Assign {
                        var,
                        value: Expr::Atom(zero),
                    },
                )?;
            }
        }
        for f in &block.functions {
            self.lower_function(f, scopes)?;
        }
        for stmt in &block.stmts {
            self.stmt(st, stmt, scopes)?;
        }

        scopes.pop();
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn stmt<'p>(
        &mut self,
        st: &mut FnState,
        stmt: &'p ast::Stmt,
        scopes: &mut Scopes<'p>,
    ) -> Result<()> {
        match stmt {
            ast::Stmt::Expr(e) => {
                self.expr(st, e, None, scopes)?;
            }
            ast::Stmt::Store { var, op, value } => self.store(st, var, *op, value, scopes)?,
            ast::Stmt::If {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.expr(st, cond, None, scopes)?;
                let yes = st.func.add_block();
                let no = st.func.add_block();
                let after = st.func.add_block();
                self.jump(st, Jump::Cond { yes, no, cond });

                st.cur = yes;
                self.block(st, then_block, scopes)?;
                self.jump(st, Jump::Always(after));

                st.cur = no;
                if let Some(b) = else_block {
                    self.block(st, b, scopes)?;
                }
                self.jump(st, Jump::Always(after));

                st.cur = after;
            }
            ast::Stmt::While { cond, body } => {
                let checker = st.func.add_block();
                let body_bb = st.func.add_block();
                let after = st.func.add_block();
                self.jump(st, Jump::Always(checker));

                st.cur = checker;
                let cond = self.expr(st, cond, None, scopes)?;
                self.jump(
                    st,
                    Jump::Cond {
                        yes: body_bb,
                        no: after,
                        cond,
                    },
                );

                st.cur = body_bb;
                self.block(st, body, scopes)?;
                self.jump(st, Jump::Always(checker));

                st.cur = after;
            }
            ast::Stmt::For {
                var,
                from,
                to,
                body,
            } => self.for_loop(st, var, from, to, body, scopes)?,
            ast::Stmt::Return(value) => {
                let ret_ty = st.func.return_type;
                let ret = match value {
                    Some(e) => {
                        if ret_ty == VarType::Unit {
                            return Err(JitError::translation(
                                &st.func.name,
                                "returning a value from a void function",
                            ));
                        }
                        Some(self.expr(st, e, Some(ret_ty), scopes)?)
                    }
                    None => zero_atom(ret_ty),
                };
                self.emit(st, Stmt::Return(ret))?;
                // Anything after a return is unreachable
                st.cur = st.func.add_block();
            }
            ast::Stmt::Print(args) => {
                for a in args {
                    let atom = self.expr(st, a, None, scopes)?;
                    self.emit(st, Stmt::Print(atom))?;
                }
            }
            ast::Stmt::Block(b) => self.block(st, b, scopes)?,
        }
        Ok(())
    }

    /// `for (var in from..to) body`, inclusive of `to`
    fn for_loop<'p>(
        &mut self,
        st: &mut FnState,
        var: &str,
        from: &ast::Expr,
        to: &ast::Expr,
        body: &'p ast::Block,
        scopes: &mut Scopes<'p>,
    ) -> Result<()> {
        let (binding, ty) = self.resolve(st, var, scopes)?;
        if ty != ValueType::Int {
            return Err(JitError::translation(
                &st.func.name,
                format!("loop variable '{}' must be int", var),
            ));
        }

        let start = self.expr(st, from, Some(VarType::Int), scopes)?;
        self.write_binding(st, binding, start)?;

        let checker = st.func.add_block();
        let body_bb = st.func.add_block();
        let after = st.func.add_block();
        self.jump(st, Jump::Always(checker));

        // The upper bound is re-evaluated on every iteration
        st.cur = checker;
        let cur = self.read_binding(st, binding)?;
        let end = self.expr(st, to, Some(VarType::Int), scopes)?;
        let cond = self.temp();
        self.emit(
            st,
            Stmt::Assign {
                var: cond,
                value: Expr::Bin {
                    op: BinOp::Le,
                    left: cur,
                    right: end,
                },
            },
        )?;
        self.jump(
            st,
            Jump::Cond {
                yes: body_bb,
                no: after,
                cond: Atom::Var(cond),
            },
        );

        st.cur = body_bb;
        self.block(st, body, scopes)?;
        if !self.is_terminated(st) {
            let cur = self.read_binding(st, binding)?;
            let next = self.temp();
            self.emit(
                st,
                Stmt::Assign {
                    var: next,
                    value: Expr::Bin {
                        op: BinOp::Add,
                        left: cur,
                        right: Atom::Int(1),
                    },
                },
            )?;
            self.write_binding(st, binding, Atom::Var(next))?;
        }
        self.jump(st, Jump::Always(checker));

        st.cur = after;
        Ok(())
    }

    fn store(
        &mut self,
        st: &mut FnState,
        name: &str,
        op: StoreOp,
        value: &ast::Expr,
        scopes: &Scopes,
    ) -> Result<()> {
        let (binding, ty) = self.resolve(st, name, scopes)?;
        let target = VarType::from_value_type(ty);
        let rhs = self.expr(st, value, Some(target), scopes)?;

        let new_value = match op {
            StoreOp::Assign => rhs,
            StoreOp::AddAssign | StoreOp::SubAssign => {
                let bin = if op == StoreOp::AddAssign {
                    BinOp::Add
                } else {
                    BinOp::Sub
                };
                let cur = self.read_binding(st, binding)?;
                let t = self.temp();
                self.emit(
                    st,
                    Stmt::Assign {
                        var: t,
                        value: Expr::Bin {
                            op: bin,
                            left: cur,
                            right: rhs,
                        },
                    },
                )?;
                Atom::Var(t)
            }
        };
        self.write_binding(st, binding, new_value)
    }

    // ========================================================================
    // Variable Access
    // ========================================================================

    fn resolve(&self, st: &FnState, name: &str, scopes: &Scopes) -> Result<(Binding, ValueType)> {
        let Some((decl, _)) = scopes.lookup_var(name) else {
            return Err(JitError::translation(
                &st.func.name,
                format!("unknown variable '{}'", name),
            ));
        };
        Ok((self.binding(st, decl.id, name)?, decl.ty))
    }

    /// How the current function reaches declaration `id`
    fn binding(&self, st: &FnState, id: AstVarId, name: &str) -> Result<Binding> {
        let owner = self.closures.var(id).map(|v| v.owner);
        if owner == Some(st.ast_id) {
            if let Some(o) = self.owned.get(&id) {
                return Ok(Binding::Direct {
                    var: o.var,
                    cell: o.cell,
                });
            }
        } else {
            let sig = self.signature(&st.func.name, st.ast_id)?;
            if let Some(i) = sig.captures.by_value.iter().position(|v| *v == id) {
                return Ok(Binding::Direct {
                    var: sig.value_params[i],
                    cell: None,
                });
            }
            if let Some(i) = sig.captures.by_ref.iter().position(|v| *v == id) {
                return Ok(Binding::Ref(sig.ref_params[i]));
            }
        }
        Err(JitError::bad_ir(
            &st.func.name,
            format!("variable '{}' is not reachable from this function", name),
        ))
    }

    fn read_binding(&mut self, st: &mut FnState, binding: Binding) -> Result<Atom> {
        match binding {
            Binding::Direct { var, .. } => Ok(Atom::Var(var)),
            Binding::Ref(r) => {
                let t = self.temp();
                self.emit(
                    st,
                    Stmt::Assign {
                        var: t,
                        value: Expr::Atom(Atom::ReadRef(r)),
                    },
                )?;
                Ok(Atom::Var(t))
            }
        }
    }

    fn write_binding(&mut self, st: &mut FnState, binding: Binding, value: Atom) -> Result<()> {
        let stmt = match binding {
            Binding::Direct { var, .. } => Stmt::Assign {
                var,
                value: Expr::Atom(value),
            },
            Binding::Ref(cell) => Stmt::WriteRef { value, cell },
        };
        self.emit(st, stmt)
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    /// Source-level type of an expression
    fn expr_type(&self, st: &FnState, expr: &ast::Expr, scopes: &Scopes) -> Result<ValueType> {
        Ok(match expr {
            ast::Expr::Int(_) => ValueType::Int,
            ast::Expr::Double(_) => ValueType::Double,
            ast::Expr::Str(_) => ValueType::String,
            ast::Expr::Load(name) => match scopes.lookup_var(name) {
                Some((decl, _)) => decl.ty,
                None => {
                    return Err(JitError::translation(
                        &st.func.name,
                        format!("unknown variable '{}'", name),
                    ))
                }
            },
            ast::Expr::Binary { op, left, right } => {
                if op.is_arithmetic() {
                    let l = self.expr_type(st, left, scopes)?;
                    let r = self.expr_type(st, right, scopes)?;
                    if l == ValueType::Double || r == ValueType::Double {
                        ValueType::Double
                    } else {
                        ValueType::Int
                    }
                } else {
                    ValueType::Int
                }
            }
            ast::Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.expr_type(st, operand, scopes)?,
            ast::Expr::Unary {
                op: UnaryOp::Not, ..
            } => ValueType::Int,
            ast::Expr::Call { name, .. } => match scopes.lookup_function(name) {
                Some(f) => f.return_type,
                None => {
                    return Err(JitError::translation(
                        &st.func.name,
                        format!("unknown function '{}'", name),
                    ))
                }
            },
        })
    }

    /// Lower an expression to an atom.  `want` is the type of the slot
    /// receiving the value; a double slot makes arithmetic below it run in
    /// double precision.
    fn expr(
        &mut self,
        st: &mut FnState,
        expr: &ast::Expr,
        want: Option<VarType>,
        scopes: &Scopes,
    ) -> Result<Atom> {
        match expr {
            ast::Expr::Int(v) => Ok(if want == Some(VarType::Double) {
                Atom::Double(*v as f64)
            } else {
                Atom::Int(*v)
            }),
            ast::Expr::Double(v) => Ok(Atom::Double(*v)),
            ast::Expr::Str(s) => Ok(Atom::Ptr {
                value: self.ir.intern_string(s),
                pooled: true,
            }),
            ast::Expr::Load(name) => {
                let (binding, _) = self.resolve(st, name, scopes)?;
                self.read_binding(st, binding)
            }
            ast::Expr::Binary { op, left, right } => {
                let (op, left, right) = match op {
                    BinaryOp::Gt => (BinOp::Lt, right, left),
                    BinaryOp::Ge => (BinOp::Le, right, left),
                    _ => (lower_binop(*op), left, right),
                };

                let operand_want = if op.is_arithmetic()
                    && (want == Some(VarType::Double)
                        || self.expr_type(st, expr, scopes)? == ValueType::Double)
                {
                    Some(VarType::Double)
                } else {
                    None
                };
                let l = self.operand(st, left, operand_want, scopes)?;
                let r = self.operand(st, right, operand_want, scopes)?;

                let t = self.temp();
                self.emit(
                    st,
                    Stmt::Assign {
                        var: t,
                        value: Expr::Bin {
                            op,
                            left: l,
                            right: r,
                        },
                    },
                )?;
                Ok(Atom::Var(t))
            }
            ast::Expr::Unary { op, operand } => {
                let (op, operand_want) = match op {
                    UnaryOp::Neg => (UnOp::Neg, want),
                    UnaryOp::Not => (UnOp::Not, None),
                };
                let a = self.operand(st, operand, operand_want, scopes)?;
                let t = self.temp();
                self.emit(
                    st,
                    Stmt::Assign {
                        var: t,
                        value: Expr::Un { op, operand: a },
                    },
                )?;
                Ok(Atom::Var(t))
            }
            ast::Expr::Call { name, args } => self.call(st, name, args, scopes),
        }
    }

    /// Lower an operand; when a double is wanted, an int-typed operand is
    /// widened right away.
    fn operand(
        &mut self,
        st: &mut FnState,
        expr: &ast::Expr,
        want: Option<VarType>,
        scopes: &Scopes,
    ) -> Result<Atom> {
        let atom = self.expr(st, expr, want, scopes)?;
        if want == Some(VarType::Double)
            && !atom.is_literal()
            && self.expr_type(st, expr, scopes)? == ValueType::Int
        {
            let t = self.temp();
            self.emit(
                st,
                Stmt::Assign {
                    var: t,
                    value: Expr::Un {
                        op: UnOp::I2D,
                        operand: atom,
                    },
                },
            )?;
            return Ok(Atom::Var(t));
        }
        Ok(atom)
    }

    fn call(
        &mut self,
        st: &mut FnState,
        name: &str,
        args: &[ast::Expr],
        scopes: &Scopes,
    ) -> Result<Atom> {
        let Some(callee) = scopes.lookup_function(name) else {
            return Err(JitError::translation(
                &st.func.name,
                format!("unknown function '{}'", name),
            ));
        };
        let sig = self.signature(&st.func.name, callee.id)?.clone();
        if args.len() != sig.param_types.len() {
            return Err(JitError::translation(
                &st.func.name,
                format!(
                    "function '{}' takes {} arguments, {} given",
                    sig.name,
                    sig.param_types.len(),
                    args.len()
                ),
            ));
        }

        let mut values = Vec::with_capacity(args.len() + sig.value_params.len());
        for (arg, ty) in args.iter().zip(&sig.param_types) {
            let want = VarType::from_value_type(*ty);
            values.push(self.expr(st, arg, Some(want), scopes)?);
        }
        for v in &sig.captures.by_value {
            let name = self.closures.var(*v).map(|i| i.name.clone()).unwrap_or_default();
            let binding = self.binding(st, *v, &name)?;
            values.push(self.read_binding(st, binding)?);
        }

        // Written captures: pass a cell, spilling owned values around the call
        let mut ref_args = Vec::with_capacity(sig.ref_params.len());
        let mut reloads = Vec::new();
        for v in &sig.captures.by_ref {
            let name = self.closures.var(*v).map(|i| i.name.clone()).unwrap_or_default();
            match self.binding(st, *v, &name)? {
                Binding::Ref(r) => ref_args.push(r),
                Binding::Direct {
                    var,
                    cell: Some(cell),
                } => {
                    self.emit(
                        st,
                        Stmt::WriteRef {
                            value: Atom::Var(var),
                            cell,
                        },
                    )?;
                    ref_args.push(cell);
                    reloads.push((var, cell));
                }
                Binding::Direct { cell: None, .. } => {
                    return Err(JitError::bad_ir(
                        &st.func.name,
                        format!("variable '{}' is written by '{}' but has no cell", name, sig.name),
                    ))
                }
            }
        }

        let result = self.ir.vars.new_temp(if sig.return_type == ValueType::Void {
            VarType::Unit
        } else {
            VarType::Undefined
        });
        self.emit(
            st,
            Stmt::Assign {
                var: result,
                value: Expr::Call {
                    func: sig.id,
                    args: values,
                    ref_args,
                },
            },
        )?;
        for (var, cell) in reloads {
            self.emit(
                st,
                Stmt::Assign {
                    var,
                    value: Expr::Atom(Atom::ReadRef(cell)),
                },
            )?;
        }
        Ok(Atom::Var(result))
    }
}

fn lower_binop(op: BinaryOp) -> BinOp {
    match op {
        BinaryOp::Or => BinOp::LOr,
        BinaryOp::And => BinOp::LAnd,
        BinaryOp::BitOr => BinOp::Or,
        BinaryOp::BitAnd => BinOp::And,
        BinaryOp::BitXor => BinOp::Xor,
        BinaryOp::Eq => BinOp::Eq,
        BinaryOp::Neq => BinOp::Neq,
        BinaryOp::Lt | BinaryOp::Gt => BinOp::Lt,
        BinaryOp::Le | BinaryOp::Ge => BinOp::Le,
        BinaryOp::Add => BinOp::Add,
        BinaryOp::Sub => BinOp::Sub,
        BinaryOp::Mul => BinOp::Mul,
        BinaryOp::Div => BinOp::Div,
        BinaryOp::Mod => BinOp::Mod,
    }
}

/// Lower a closure-analyzed program to IR
pub fn build_ir(
    program: &Program,
    closures: &ClosureInfo,
    natives: &HashMap<String, usize>,
) -> Result<SimpleIr> {
    let ir = IrBuilder::new(closures, natives).build(program)?;
    if ir.functions.len() > MAX_FUNCTIONS {
        return Err(JitError::translation(
            program.top.name.as_str(),
            format!("{} functions exceed the limit of {}", ir.functions.len(), MAX_FUNCTIONS),
        ));
    }
    if ir.vars.len() > MAX_VARIABLES {
        return Err(JitError::translation(
            program.top.name.as_str(),
            format!("{} variables exceed the limit of {}", ir.vars.len(), MAX_VARIABLES),
        ));
    }
    Ok(ir)
}

// ============================================================================
// Tests
// ============================================================================
