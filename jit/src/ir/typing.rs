//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Type derivation and implicit conversions for mvjit IR
//
// Gives every temporary the type of its defining expression and makes
// the two permitted implicit conversions explicit: int to double
// widening (I2D) and double to int truncation (D2I).  After this pass no
// variable in a lowered function is Undefined, and every operator sees
// operands of the type it computes in.
//

use crate::error::{JitError, Result};
use crate::ir::{Atom, BinOp, Expr, Function, Jump, SimpleIr, Stmt, UnOp, VarId, VarTable, VarType};

// ============================================================================
// Type Rules
// ============================================================================

/// Result type of a binary operator over operands of the given types
pub fn binop_type(op: BinOp, left: VarType, right: VarType) -> VarType {
    let numeric = |t: VarType| matches!(t, VarType::Int | VarType::Double);
    if !numeric(left) || !numeric(right) {
        return VarType::Error;
    }
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
            if left.is_double() || right.is_double() {
                VarType::Double
            } else {
                VarType::Int
            }
        }
        BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Neq => VarType::Int,
        BinOp::Mod | BinOp::Or | BinOp::And | BinOp::Xor | BinOp::LOr | BinOp::LAnd => {
            if left == VarType::Int && right == VarType::Int {
                VarType::Int
            } else {
                VarType::Error
            }
        }
    }
}

/// Result type of a unary operator
pub fn unop_type(op: UnOp, operand: VarType) -> VarType {
    match (op, operand) {
        (UnOp::I2D, VarType::Int) => VarType::Double,
        (UnOp::D2I, VarType::Double) => VarType::Int,
        (UnOp::Neg, VarType::Int | VarType::Double) => operand,
        (UnOp::Not, VarType::Int) => VarType::Int,
        _ => VarType::Error,
    }
}

/// Conversion turning a `from` value into a `to` value, if one is allowed
fn conversion(from: VarType, to: VarType) -> Option<UnOp> {
    match (from, to) {
        (VarType::Int, VarType::Double) => Some(UnOp::I2D),
        (VarType::Double, VarType::Int) => Some(UnOp::D2I),
        _ => None,
    }
}

// ============================================================================
// Type Deriver
// ============================================================================

struct TypeDeriver<'a> {
    vars: &'a mut VarTable,
    func_name: String,
    /// Parameter types of every function, by FunctionId
    signatures: &'a [(Vec<VarType>, VarType)],
    /// Statements of the block being rewritten
    out: Vec<Stmt>,
    inserted: usize,
}

impl<'a> TypeDeriver<'a> {
    fn mismatch(&self, what: &str, want: VarType, got: VarType) -> JitError {
        JitError::translation(
            &self.func_name,
            format!("{}: expected {}, found {}", what, want, got),
        )
    }

    fn atom_type(&self, atom: &Atom) -> Result<VarType> {
        let ty = self.vars.atom_type(atom);
        match ty {
            VarType::Undefined => Err(JitError::bad_ir(
                &self.func_name,
                format!("{:?} read before its type is known", atom),
            )),
            _ => Ok(ty),
        }
    }

    /// Convert `atom` to `want`, emitting a conversion if needed
    fn coerce(&mut self, atom: Atom, want: VarType, what: &str) -> Result<Atom> {
        let got = self.atom_type(&atom)?;
        if got == want {
            return Ok(atom);
        }
        match (atom, conversion(got, want)) {
            (Atom::Int(v), Some(_)) => Ok(Atom::Double(v as f64)),
            (Atom::Double(v), Some(_)) => Ok(Atom::Int(v as i64)),
            (_, Some(op)) => {
                let t = self.vars.new_temp(want);
                self.out.push(Stmt::Assign {
                    var: t,
                    value: Expr::Un { op, operand: atom },
                });
                self.inserted += 1;
                Ok(Atom::Var(t))
            }
            (_, None) => Err(self.mismatch(what, want, got)),
        }
    }

    /// Type an expression, widening mixed operands.  Returns the rewritten
    /// expression and its type.
    fn expr(&mut self, value: Expr) -> Result<(Expr, VarType)> {
        match value {
            Expr::Atom(a) => {
                let ty = self.atom_type(&a)?;
                Ok((Expr::Atom(a), ty))
            }
            Expr::Bin { op, left, right } => {
                let lt = self.atom_type(&left)?;
                let rt = self.atom_type(&right)?;
                let ty = binop_type(op, lt, rt);
                if lt == VarType::Ptr && rt == VarType::Ptr && op.is_comparison() {
                    return Err(JitError::NotImplemented(format!(
                        "{}: string comparison with '{}'",
                        self.func_name,
                        op.symbol()
                    )));
                }
                if ty == VarType::Error {
                    return Err(JitError::translation(
                        &self.func_name,
                        format!("operator '{}' cannot combine {} and {}", op.symbol(), lt, rt),
                    ));
                }
                let (left, right) = if lt != rt {
                    let what = format!("operand of '{}'", op.symbol());
                    (
                        self.coerce(left, VarType::Double, &what)?,
                        self.coerce(right, VarType::Double, &what)?,
                    )
                } else {
                    (left, right)
                };
                Ok((Expr::Bin { op, left, right }, ty))
            }
            Expr::Un { op, operand } => {
                let ot = self.atom_type(&operand)?;
                let ty = unop_type(op, ot);
                if ty == VarType::Error {
                    return Err(JitError::translation(
                        &self.func_name,
                        format!("operator '{}' cannot apply to {}", op.name(), ot),
                    ));
                }
                Ok((Expr::Un { op, operand }, ty))
            }
            Expr::Call {
                func,
                args,
                ref_args,
            } => {
                let Some((params, ret)) = self.signatures.get(func.0 as usize).cloned() else {
                    return Err(JitError::bad_ir(
                        &self.func_name,
                        format!("call to unknown function #{}", func.0),
                    ));
                };
                if params.len() != args.len() {
                    return Err(JitError::bad_ir(
                        &self.func_name,
                        format!(
                            "call passes {} values to function #{} taking {}",
                            args.len(),
                            func.0,
                            params.len()
                        ),
                    ));
                }
                let mut typed = Vec::with_capacity(args.len());
                for (i, (arg, want)) in args.into_iter().zip(params).enumerate() {
                    typed.push(self.coerce(arg, want, &format!("argument {}", i + 1))?);
                }
                Ok((
                    Expr::Call {
                        func,
                        args: typed,
                        ref_args,
                    },
                    ret,
                ))
            }
        }
    }

    /// Assign `value` to `var`, deriving the type of temporaries and
    /// converting into typed variables
    fn assign(&mut self, var: VarId, value: Expr) -> Result<()> {
        let (value, ty) = self.expr(value)?;
        let target = self.vars.var_type(var);

        if target == VarType::Undefined || target == ty {
            if target == VarType::Undefined {
                self.vars.meta_mut(var).ty = ty;
            }
            self.out.push(Stmt::Assign { var, value });
            return Ok(());
        }

        let what = format!("assignment to {}", self.var_label(var));
        match value {
            Expr::Atom(a) => {
                let a = self.coerce(a, target, &what)?;
                self.out.push(Stmt::Assign {
                    var,
                    value: Expr::Atom(a),
                });
            }
            value => {
                let Some(op) = conversion(ty, target) else {
                    return Err(self.mismatch(&what, target, ty));
                };
                let t = self.vars.new_temp(ty);
                self.out.push(Stmt::Assign { var: t, value });
                self.out.push(Stmt::Assign {
                    var,
                    value: Expr::Un {
                        op,
                        operand: Atom::Var(t),
                    },
                });
                self.inserted += 1;
            }
        }
        Ok(())
    }

    fn var_label(&self, var: VarId) -> String {
        match &self.vars.meta(var).name {
            Some(n) => format!("'{}'", n),
            None => var.to_string(),
        }
    }

    fn stmt(&mut self, stmt: Stmt, return_type: VarType) -> Result<()> {
        match stmt {
            Stmt::Assign { var, value } => self.assign(var, value)?,
            Stmt::Phi { var, sources } => {
                // Phis only appear when typing runs again after SSA
                self.out.push(Stmt::Phi { var, sources });
            }
            Stmt::Print(a) => {
                let ty = self.atom_type(&a)?;
                if !matches!(ty, VarType::Int | VarType::Double | VarType::Ptr) {
                    return Err(JitError::translation(
                        &self.func_name,
                        format!("cannot print a {} value", ty),
                    ));
                }
                self.out.push(Stmt::Print(a));
            }
            Stmt::WriteRef { value, cell } => {
                let want = self.vars.var_type(cell);
                let what = format!("store to {}", self.var_label(cell));
                let value = self.coerce(value, want, &what)?;
                self.out.push(Stmt::WriteRef { value, cell });
            }
            Stmt::Return(None) => {
                if return_type != VarType::Unit {
                    return Err(JitError::translation(
                        &self.func_name,
                        format!("missing return value of type {}", return_type),
                    ));
                }
                self.out.push(Stmt::Return(None));
            }
            Stmt::Return(Some(a)) => {
                let a = self.coerce(a, return_type, "return value")?;
                self.out.push(Stmt::Return(Some(a)));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn derive_function(
    func: &mut Function,
    vars: &mut VarTable,
    signatures: &[(Vec<VarType>, VarType)],
) -> Result<usize> {
    let mut deriver = TypeDeriver {
        vars,
        func_name: func.name.clone(),
        signatures,
        out: Vec::new(),
        inserted: 0,
    };

    // Reverse postorder sees every temporary's definition before its uses
    for bb_id in func.rpo() {
        let Some(bb) = func.get_block_mut(bb_id) else {
            continue;
        };
        let stmts = std::mem::take(&mut bb.stmts);
        for stmt in stmts {
            deriver.stmt(stmt, func.return_type)?;
        }
        let Some(bb) = func.get_block_mut(bb_id) else {
            continue;
        };
        bb.stmts = std::mem::take(&mut deriver.out);

        if let Some(Jump::Cond { cond, .. }) = &bb.jump {
            let ty = deriver.atom_type(cond)?;
            if ty != VarType::Int {
                return Err(JitError::translation(
                    &func.name,
                    format!("condition must be int, found {}", ty),
                ));
            }
        }
    }
    Ok(deriver.inserted)
}

/// Derive types and insert conversions in every function.  Unreachable
/// blocks are dropped first since they are never typed.
pub fn derive_types(ir: &mut SimpleIr) -> Result<()> {
    let SimpleIr {
        functions, vars, ..
    } = ir;
    let signatures: Vec<(Vec<VarType>, VarType)> = functions
        .iter()
        .map(|f| {
            let params = f
                .params
                .iter()
                .filter(|p| !f.ref_params.contains(p))
                .map(|p| vars.var_type(*p))
                .collect();
            (params, f.return_type)
        })
        .collect();

    for func in functions.iter_mut() {
        if func.is_native() {
            continue;
        }
        func.remove_unreachable();
        let inserted = derive_function(func, vars, &signatures)?;
        log::debug!("typing: {}: {} conversions inserted", func.name, inserted);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
