//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// x86-64 Code Generator
// Converts allocated SSA IR to x86-64 LIR
//
// Uses linear scan register allocation and the System V AMD64 ABI.
// RAX and RDX are work registers, R10 materializes operands and call
// targets, R11 holds reference addresses, XMM14/XMM15 are the
// floating-point counterparts.
//

use crate::arch::lir::Label;
use crate::arch::DEFAULT_LIR_BUFFER_CAPACITY;
use crate::arch::regalloc::Liveness;
use crate::arch::x86_64::lir::{CallTarget, CondCode, GpOperand, MemAddr, X86Inst, XmmOperand};
use crate::arch::x86_64::regalloc::{Loc, Reg, RegAlloc, XmmReg};
use crate::error::{JitError, Result};
use crate::ir::{
    Atom, BinOp, Block, BlockId, Expr, Function, FunctionId, Jump, SimpleIr, Stmt, UnOp, VarId,
    VarTable, VarType,
};

const WORK: Reg = Reg::Rax;
const WORK2: Reg = Reg::Rdx;
const MAT: Reg = Reg::R10;
const REF: Reg = Reg::R11;
const XMM_WORK: XmmReg = XmmReg::Xmm15;
const XMM_MAT: XmmReg = XmmReg::Xmm14;

/// Addresses of the print helpers the generated code calls
#[derive(Debug, Clone, Copy)]
pub struct RuntimeHelpers {
    pub print_int: usize,
    pub print_double: usize,
    pub print_string: usize,
}

/// LIR for one function
#[derive(Debug, Clone)]
pub struct FunctionCode {
    pub id: FunctionId,
    pub name: String,
    pub insts: Vec<X86Inst>,
}

// ============================================================================
// Calling Convention
// ============================================================================

/// Where one argument travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgSlot {
    Gp(Reg),
    Xmm(XmmReg),
    /// Index among the memory-passed arguments
    Stack(usize),
}

/// System V slots for a list of arguments, given which are doubles
fn assign_arg_slots(is_double: &[bool]) -> Vec<ArgSlot> {
    let (mut gp, mut fp, mut stack) = (0, 0, 0);
    is_double
        .iter()
        .map(|&double| {
            if double {
                if let Some(x) = XmmReg::arg_regs().get(fp) {
                    fp += 1;
                    return ArgSlot::Xmm(*x);
                }
            } else if let Some(r) = Reg::arg_regs().get(gp) {
                gp += 1;
                return ArgSlot::Gp(*r);
            }
            stack += 1;
            ArgSlot::Stack(stack - 1)
        })
        .collect()
}

fn frame(offset: i32) -> MemAddr {
    MemAddr::new(Reg::bp(), -offset)
}

// ============================================================================
// x86-64 Code Generator
// ============================================================================

/// x86-64 code generator for one function
pub struct X86_64CodeGen<'a> {
    ir: &'a SimpleIr,
    func: &'a Function,
    live: &'a Liveness,
    ra: &'a RegAlloc,
    /// Address of each pooled string
    strings: &'a [usize],
    helpers: RuntimeHelpers,
    /// LIR instruction buffer
    lir_buffer: Vec<X86Inst>,
    /// Edge stubs: conditional edges into blocks with phis
    stubs: Vec<(Label, BlockId, BlockId)>,
    /// %rbp is set up only for stack slots, memory arguments or calls
    needs_frame: bool,
}

impl<'a> X86_64CodeGen<'a> {
    pub fn new(
        ir: &'a SimpleIr,
        func: &'a Function,
        live: &'a Liveness,
        ra: &'a RegAlloc,
        strings: &'a [usize],
        helpers: RuntimeHelpers,
    ) -> Self {
        let is_double: Vec<bool> = func
            .params
            .iter()
            .map(|p| !func.ref_params.contains(p) && ir.vars.var_type(*p).is_double())
            .collect();
        let stack_args = assign_arg_slots(&is_double)
            .iter()
            .any(|s| matches!(s, ArgSlot::Stack(_)));
        let needs_frame = ra.stack_size() > 0 || stack_args || !live.call_positions.is_empty();
        Self {
            ir,
            func,
            live,
            ra,
            strings,
            helpers,
            lir_buffer: Vec::with_capacity(DEFAULT_LIR_BUFFER_CAPACITY),
            stubs: Vec::new(),
            needs_frame,
        }
    }

    fn push_lir(&mut self, inst: X86Inst) {
        self.lir_buffer.push(inst);
    }

    fn vars(&self) -> &'a VarTable {
        &self.ir.vars
    }

    fn bad_ir(&self, message: String) -> JitError {
        JitError::bad_ir(&self.func.name, message)
    }

    fn codegen_error(&self, message: String) -> JitError {
        JitError::codegen(&self.func.name, message)
    }

    fn label(&self, bb: BlockId) -> Label {
        Label::new(self.func.id, bb.0)
    }

    fn get_location(&self, var: VarId) -> Result<Loc> {
        self.ra
            .location(var)
            .ok_or_else(|| self.bad_ir(format!("no location for {}", var)))
    }

    // ========================================================================
    // Function Structure
    // ========================================================================

    /// Generate the whole function and return its LIR
    pub fn generate(mut self) -> Result<FunctionCode> {
        let func = self.func;
        let live = self.live;
        self.emit_prologue();
        self.emit_params()?;

        for (i, &bb_id) in live.order.iter().enumerate() {
            let bb = func
                .get_block(bb_id)
                .ok_or_else(|| self.bad_ir(format!("layout names missing block {}", bb_id)))?;
            let span = live
                .span(bb_id)
                .ok_or_else(|| self.bad_ir(format!("no positions for block {}", bb_id)))?;
            self.push_lir(X86Inst::Label(self.label(bb_id)));
            for (idx, stmt) in bb.stmts.iter().enumerate() {
                self.emit_stmt(stmt, span.start + idx)?;
            }
            self.emit_jump(bb, live.order.get(i + 1).copied())?;
        }

        for (label, from, to) in std::mem::take(&mut self.stubs) {
            self.push_lir(X86Inst::Label(label));
            self.emit_phi_moves(from, to)?;
            self.push_lir(X86Inst::Jmp {
                target: self.label(to),
            });
        }

        Ok(FunctionCode {
            id: func.id,
            name: func.name.clone(),
            insts: self.lir_buffer,
        })
    }

    fn emit_prologue(&mut self) {
        if !self.needs_frame {
            for reg in self.ra.callee_saved_used() {
                self.push_lir(X86Inst::Push {
                    src: GpOperand::Reg(*reg),
                });
            }
            return;
        }
        self.push_lir(X86Inst::Push {
            src: GpOperand::Reg(Reg::bp()),
        });
        self.push_lir(X86Inst::Mov {
            src: GpOperand::Reg(Reg::sp()),
            dst: GpOperand::Reg(Reg::bp()),
        });
        for reg in self.ra.callee_saved_used() {
            self.push_lir(X86Inst::Push {
                src: GpOperand::Reg(*reg),
            });
        }
        let size = self.ra.stack_size();
        if size > 0 {
            self.push_lir(X86Inst::Sub {
                src: GpOperand::Imm(size),
                dst: GpOperand::Reg(Reg::sp()),
            });
        }
    }

    fn emit_epilogue(&mut self) {
        let saved = self.ra.callee_saved_used();
        if !self.needs_frame {
            for reg in saved.iter().rev() {
                self.push_lir(X86Inst::Pop {
                    dst: GpOperand::Reg(*reg),
                });
            }
            self.push_lir(X86Inst::Ret);
            return;
        }
        if saved.is_empty() {
            self.push_lir(X86Inst::Mov {
                src: GpOperand::Reg(Reg::bp()),
                dst: GpOperand::Reg(Reg::sp()),
            });
        } else {
            self.push_lir(X86Inst::Lea {
                addr: MemAddr::new(Reg::bp(), -8 * saved.len() as i32),
                dst: Reg::sp(),
            });
        }
        for reg in saved.iter().rev() {
            self.push_lir(X86Inst::Pop {
                dst: GpOperand::Reg(*reg),
            });
        }
        self.push_lir(X86Inst::Pop {
            dst: GpOperand::Reg(Reg::bp()),
        });
        self.push_lir(X86Inst::Ret);
    }

    /// Move incoming arguments to their allocated homes.  Register
    /// arguments are all pushed before any is popped, so no home can
    /// clobber an argument register still to be read.
    fn emit_params(&mut self) -> Result<()> {
        let func = self.func;
        let is_double: Vec<bool> = func
            .params
            .iter()
            .map(|p| !func.ref_params.contains(p) && self.vars().var_type(*p).is_double())
            .collect();
        let slots = assign_arg_slots(&is_double);

        let in_regs: Vec<(VarId, ArgSlot)> = func
            .params
            .iter()
            .copied()
            .zip(slots.iter().copied())
            .filter(|(_, s)| !matches!(s, ArgSlot::Stack(_)))
            .collect();
        for (_, slot) in &in_regs {
            match slot {
                ArgSlot::Gp(r) => self.push_lir(X86Inst::Push {
                    src: GpOperand::Reg(*r),
                }),
                ArgSlot::Xmm(x) => {
                    self.push_lir(X86Inst::MovXmmGp { src: *x, dst: MAT });
                    self.push_lir(X86Inst::Push {
                        src: GpOperand::Reg(MAT),
                    });
                }
                ArgSlot::Stack(_) => {}
            }
        }
        for (param, _) in in_regs.iter().rev() {
            self.emit_pop_param(*param);
        }

        for (param, slot) in func.params.iter().zip(slots) {
            if let ArgSlot::Stack(k) = slot {
                let src = MemAddr::new(Reg::bp(), 16 + 8 * k as i32);
                self.emit_stack_param(*param, src);
            }
        }
        Ok(())
    }

    fn emit_pop_param(&mut self, param: VarId) {
        if let Some(off) = self.ra.ref_pointer_offset(param) {
            self.push_lir(X86Inst::Pop {
                dst: GpOperand::Mem(frame(off)),
            });
            return;
        }
        match self.ra.location(param) {
            Some(Loc::Reg(r)) => self.push_lir(X86Inst::Pop {
                dst: GpOperand::Reg(r),
            }),
            Some(Loc::Stack(off)) => self.push_lir(X86Inst::Pop {
                dst: GpOperand::Mem(frame(off)),
            }),
            Some(Loc::Xmm(x)) => {
                self.push_lir(X86Inst::Pop {
                    dst: GpOperand::Reg(MAT),
                });
                self.push_lir(X86Inst::MovGpXmm { src: MAT, dst: x });
            }
            None => self.push_lir(X86Inst::Pop {
                dst: GpOperand::Reg(MAT),
            }),
        }
    }

    fn emit_stack_param(&mut self, param: VarId, src: MemAddr) {
        let dst = if let Some(off) = self.ra.ref_pointer_offset(param) {
            frame(off)
        } else {
            match self.ra.location(param) {
                Some(Loc::Reg(r)) => {
                    self.push_lir(X86Inst::Mov {
                        src: GpOperand::Mem(src),
                        dst: GpOperand::Reg(r),
                    });
                    return;
                }
                Some(Loc::Xmm(x)) => {
                    self.push_lir(X86Inst::MovFp {
                        src: XmmOperand::Mem(src),
                        dst: XmmOperand::Reg(x),
                    });
                    return;
                }
                Some(Loc::Stack(off)) => frame(off),
                None => return,
            }
        };
        self.push_lir(X86Inst::Mov {
            src: GpOperand::Mem(src),
            dst: GpOperand::Reg(MAT),
        });
        self.push_lir(X86Inst::Mov {
            src: GpOperand::Reg(MAT),
            dst: GpOperand::Mem(dst),
        });
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn emit_stmt(&mut self, stmt: &Stmt, pos: usize) -> Result<()> {
        match stmt {
            Stmt::Assign { var, value } => match value {
                Expr::Atom(a) => self.emit_assign(*var, a),
                Expr::Bin { op, left, right } => {
                    let vars = self.vars();
                    if vars.atom_type(left).is_double() || vars.atom_type(right).is_double() {
                        self.emit_fp_binop(*var, *op, left, right)
                    } else {
                        self.emit_binop(*var, *op, left, right)
                    }
                }
                Expr::Un { op, operand } => self.emit_unop(*var, *op, operand),
                Expr::Call {
                    func,
                    args,
                    ref_args,
                } => self.emit_call(pos, *func, args, ref_args, *var),
            },
            // Phis are resolved by moves on the incoming edges
            Stmt::Phi { var, sources } => {
                if sources.is_empty() {
                    return Err(self.bad_ir(format!("unfilled phi for {}", var)));
                }
                Ok(())
            }
            Stmt::Print(a) => self.emit_print(pos, a),
            Stmt::WriteRef { value, cell } => self.emit_write_ref(value, *cell),
            Stmt::Return(a) => self.emit_return(a.as_ref()),
        }
    }

    fn emit_assign(&mut self, var: VarId, atom: &Atom) -> Result<()> {
        let ty = self.vars().var_type(var);
        if ty == VarType::Unit {
            return Ok(());
        }
        if ty.is_double() {
            return match self.get_location(var)? {
                Loc::Xmm(x) => self.emit_load_xmm(x, atom),
                _ => {
                    self.emit_load_xmm(XMM_WORK, atom)?;
                    self.emit_fp_move_to_loc(XMM_WORK, var)
                }
            };
        }
        match self.get_location(var)? {
            Loc::Reg(r) => self.emit_load_gp(r, atom),
            Loc::Stack(off) => {
                let imm = match atom {
                    Atom::Int(v) => i32::try_from(*v).ok(),
                    _ => None,
                };
                let src = match imm {
                    Some(v) => GpOperand::Imm(v),
                    None => {
                        self.emit_load_gp(WORK, atom)?;
                        GpOperand::Reg(WORK)
                    }
                };
                self.push_lir(X86Inst::Mov {
                    src,
                    dst: GpOperand::Mem(frame(off)),
                });
                Ok(())
            }
            Loc::Xmm(_) => Err(self.bad_ir(format!("integer {} lives in an XMM register", var))),
        }
    }

    fn emit_write_ref(&mut self, value: &Atom, cell: VarId) -> Result<()> {
        if self.vars().var_type(cell).is_double() {
            self.emit_load_xmm(XMM_WORK, value)?;
            let addr = self.locate_ref(cell)?;
            self.push_lir(X86Inst::MovFp {
                src: XmmOperand::Reg(XMM_WORK),
                dst: XmmOperand::Mem(addr),
            });
            return Ok(());
        }
        let imm = match value {
            Atom::Int(v) => i32::try_from(*v).ok(),
            _ => None,
        };
        let src = match imm {
            Some(v) => GpOperand::Imm(v),
            None => {
                self.emit_load_gp(WORK, value)?;
                GpOperand::Reg(WORK)
            }
        };
        let addr = self.locate_ref(cell)?;
        self.push_lir(X86Inst::Mov {
            src,
            dst: GpOperand::Mem(addr),
        });
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&Atom>) -> Result<()> {
        if let Some(a) = value {
            match self.func.return_type {
                VarType::Unit => {}
                VarType::Double => self.emit_load_xmm(XmmReg::Xmm0, a)?,
                _ => self.emit_load_gp(Reg::Rax, a)?,
            }
        }
        self.emit_epilogue();
        Ok(())
    }

    // ========================================================================
    // Operands
    // ========================================================================

    /// Address of a reference cell: a frame slot for cells owned by this
    /// function, or the address passed in for reference parameters
    fn locate_ref(&mut self, cell: VarId) -> Result<MemAddr> {
        if let Some(off) = self.ra.cell_offset(cell) {
            return Ok(frame(off));
        }
        if let Some(off) = self.ra.ref_pointer_offset(cell) {
            self.push_lir(X86Inst::Mov {
                src: GpOperand::Mem(frame(off)),
                dst: GpOperand::Reg(REF),
            });
            return Ok(MemAddr::new(REF, 0));
        }
        Err(self.bad_ir(format!("missing reference-cell location for {}", cell)))
    }

    /// Put the address of a reference cell into `dst`
    fn emit_ref_address(&mut self, cell: VarId, dst: Reg) -> Result<()> {
        if let Some(off) = self.ra.cell_offset(cell) {
            self.push_lir(X86Inst::Lea {
                addr: frame(off),
                dst,
            });
            return Ok(());
        }
        if let Some(off) = self.ra.ref_pointer_offset(cell) {
            self.push_lir(X86Inst::Mov {
                src: GpOperand::Mem(frame(off)),
                dst: GpOperand::Reg(dst),
            });
            return Ok(());
        }
        Err(self.bad_ir(format!("missing reference-cell location for {}", cell)))
    }

    fn pool_address(&self, index: u64) -> Result<i64> {
        self.strings
            .get(index as usize)
            .map(|a| *a as i64)
            .ok_or_else(|| self.bad_ir(format!("string #{} is not in the pool", index)))
    }

    /// Load an integer or pointer atom into `dst`
    fn emit_load_gp(&mut self, dst: Reg, atom: &Atom) -> Result<()> {
        match atom {
            Atom::Int(v) => match i32::try_from(*v) {
                Ok(imm) => self.push_lir(X86Inst::Mov {
                    src: GpOperand::Imm(imm),
                    dst: GpOperand::Reg(dst),
                }),
                Err(_) => self.push_lir(X86Inst::MovAbs { imm: *v, dst }),
            },
            Atom::Ptr { value, pooled } => {
                let imm = if *pooled {
                    self.pool_address(*value)?
                } else {
                    *value as i64
                };
                self.push_lir(X86Inst::MovAbs { imm, dst });
            }
            Atom::Double(_) => {
                return Err(self.bad_ir("double literal in integer context".to_string()))
            }
            Atom::Var(v) => match self.get_location(*v)? {
                Loc::Reg(r) if r == dst => {}
                Loc::Reg(r) => self.push_lir(X86Inst::Mov {
                    src: GpOperand::Reg(r),
                    dst: GpOperand::Reg(dst),
                }),
                Loc::Stack(off) => self.push_lir(X86Inst::Mov {
                    src: GpOperand::Mem(frame(off)),
                    dst: GpOperand::Reg(dst),
                }),
                Loc::Xmm(_) => return Err(self.bad_ir(format!("{} is not an integer", v))),
            },
            Atom::ReadRef(cell) => {
                let addr = self.locate_ref(*cell)?;
                self.push_lir(X86Inst::Mov {
                    src: GpOperand::Mem(addr),
                    dst: GpOperand::Reg(dst),
                });
            }
        }
        Ok(())
    }

    /// Operand form of an integer atom: register, memory or imm32.
    /// Anything else is materialized in `scratch`.
    fn gp_operand(&mut self, atom: &Atom, scratch: Reg) -> Result<GpOperand> {
        match atom {
            Atom::Int(v) => {
                if let Ok(imm) = i32::try_from(*v) {
                    return Ok(GpOperand::Imm(imm));
                }
            }
            Atom::Var(v) => {
                return match self.get_location(*v)? {
                    Loc::Reg(r) => Ok(GpOperand::Reg(r)),
                    Loc::Stack(off) => Ok(GpOperand::Mem(frame(off))),
                    Loc::Xmm(_) => Err(self.bad_ir(format!("{} is not an integer", v))),
                }
            }
            Atom::ReadRef(cell) => return Ok(GpOperand::Mem(self.locate_ref(*cell)?)),
            _ => {}
        }
        self.emit_load_gp(scratch, atom)?;
        Ok(GpOperand::Reg(scratch))
    }

    /// Load a double atom into `dst`
    fn emit_load_xmm(&mut self, dst: XmmReg, atom: &Atom) -> Result<()> {
        match atom {
            Atom::Double(d) => {
                self.push_lir(X86Inst::MovAbs {
                    imm: d.to_bits() as i64,
                    dst: MAT,
                });
                self.push_lir(X86Inst::MovGpXmm { src: MAT, dst });
            }
            Atom::Var(v) => match self.get_location(*v)? {
                Loc::Xmm(x) if x == dst => {}
                Loc::Xmm(x) => self.push_lir(X86Inst::MovFp {
                    src: XmmOperand::Reg(x),
                    dst: XmmOperand::Reg(dst),
                }),
                Loc::Stack(off) => self.push_lir(X86Inst::MovFp {
                    src: XmmOperand::Mem(frame(off)),
                    dst: XmmOperand::Reg(dst),
                }),
                Loc::Reg(_) => return Err(self.bad_ir(format!("{} is not a double", v))),
            },
            Atom::ReadRef(cell) => {
                let addr = self.locate_ref(*cell)?;
                self.push_lir(X86Inst::MovFp {
                    src: XmmOperand::Mem(addr),
                    dst: XmmOperand::Reg(dst),
                });
            }
            Atom::Int(_) | Atom::Ptr { .. } => {
                return Err(self.bad_ir(format!("{:?} used as a double", atom)))
            }
        }
        Ok(())
    }

    fn xmm_operand(&mut self, atom: &Atom, scratch: XmmReg) -> Result<XmmOperand> {
        match atom {
            Atom::Var(v) => match self.get_location(*v)? {
                Loc::Xmm(x) => Ok(XmmOperand::Reg(x)),
                Loc::Stack(off) => Ok(XmmOperand::Mem(frame(off))),
                Loc::Reg(_) => Err(self.bad_ir(format!("{} is not a double", v))),
            },
            Atom::ReadRef(cell) => Ok(XmmOperand::Mem(self.locate_ref(*cell)?)),
            _ => {
                self.emit_load_xmm(scratch, atom)?;
                Ok(XmmOperand::Reg(scratch))
            }
        }
    }

    fn atom_in_reg(&self, atom: &Atom, reg: Reg) -> bool {
        matches!(atom, Atom::Var(v) if self.ra.location(*v) == Some(Loc::Reg(reg)))
    }

    fn atom_in_xmm(&self, atom: &Atom, reg: XmmReg) -> bool {
        matches!(atom, Atom::Var(v) if self.ra.location(*v) == Some(Loc::Xmm(reg)))
    }

    /// Store `src` into the home of `var`
    fn emit_move_to_loc(&mut self, src: Reg, var: VarId) -> Result<()> {
        if self.vars().var_type(var) == VarType::Unit {
            return Ok(());
        }
        match self.get_location(var)? {
            Loc::Reg(r) if r == src => {}
            Loc::Reg(r) => self.push_lir(X86Inst::Mov {
                src: GpOperand::Reg(src),
                dst: GpOperand::Reg(r),
            }),
            Loc::Stack(off) => self.push_lir(X86Inst::Mov {
                src: GpOperand::Reg(src),
                dst: GpOperand::Mem(frame(off)),
            }),
            Loc::Xmm(_) => return Err(self.bad_ir(format!("{} is not an integer", var))),
        }
        Ok(())
    }

    fn emit_fp_move_to_loc(&mut self, src: XmmReg, var: VarId) -> Result<()> {
        match self.get_location(var)? {
            Loc::Xmm(x) if x == src => {}
            Loc::Xmm(x) => self.push_lir(X86Inst::MovFp {
                src: XmmOperand::Reg(src),
                dst: XmmOperand::Reg(x),
            }),
            Loc::Stack(off) => self.push_lir(X86Inst::MovFp {
                src: XmmOperand::Reg(src),
                dst: XmmOperand::Mem(frame(off)),
            }),
            Loc::Reg(_) => return Err(self.bad_ir(format!("{} is not a double", var))),
        }
        Ok(())
    }

    // ========================================================================
    // Integer Operations
    // ========================================================================

    fn alu(&self, op: BinOp, src: GpOperand, dst: Reg) -> Result<X86Inst> {
        let d = GpOperand::Reg(dst);
        Ok(match op {
            BinOp::Add => X86Inst::Add { src, dst: d },
            BinOp::Sub => X86Inst::Sub { src, dst: d },
            BinOp::And => X86Inst::And { src, dst: d },
            BinOp::Or => X86Inst::Or { src, dst: d },
            BinOp::Xor => X86Inst::Xor { src, dst: d },
            BinOp::Mul => X86Inst::IMul2 { src, dst },
            other => {
                return Err(self.codegen_error(format!(
                    "operator '{}' has no two-operand form",
                    other.symbol()
                )))
            }
        })
    }

    /// Two-operand ALU op.  Computes in the destination register when it
    /// has one; if that register already holds an operand the extra move
    /// is skipped (reduced form).
    fn emit_binop(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        match op {
            BinOp::Div | BinOp::Mod => return self.emit_div(var, op, left, right),
            BinOp::Lt | BinOp::Le | BinOp::Eq | BinOp::Neq => {
                return self.emit_compare(var, op, left, right)
            }
            BinOp::LOr | BinOp::LAnd => return self.emit_logical(var, op, left, right),
            _ => {}
        }

        let mut work_reg = match self.get_location(var)? {
            Loc::Reg(r) => r,
            _ => WORK,
        };
        if !op.is_commutative() && self.atom_in_reg(right, work_reg) {
            work_reg = WORK;
        }
        let src = if self.atom_in_reg(left, work_reg) {
            self.gp_operand(right, MAT)?
        } else if self.atom_in_reg(right, work_reg) {
            self.gp_operand(left, MAT)?
        } else {
            self.emit_load_gp(work_reg, left)?;
            self.gp_operand(right, MAT)?
        };
        let inst = self.alu(op, src, work_reg)?;
        self.push_lir(inst);
        self.emit_move_to_loc(work_reg, var)
    }

    fn emit_div(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        self.emit_load_gp(WORK, left)?;
        let divisor = match self.gp_operand(right, MAT)? {
            GpOperand::Imm(v) => {
                self.push_lir(X86Inst::Mov {
                    src: GpOperand::Imm(v),
                    dst: GpOperand::Reg(MAT),
                });
                GpOperand::Reg(MAT)
            }
            other => other,
        };
        self.push_lir(X86Inst::Cqto);
        self.push_lir(X86Inst::IDiv { divisor });
        let result = if op == BinOp::Div { WORK } else { WORK2 };
        self.emit_move_to_loc(result, var)
    }

    fn emit_compare(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        let cc = match op {
            BinOp::Lt => CondCode::Lt,
            BinOp::Le => CondCode::Le,
            BinOp::Eq => CondCode::Eq,
            _ => CondCode::Ne,
        };
        self.emit_load_gp(WORK, left)?;
        let src = self.gp_operand(right, MAT)?;
        self.push_lir(X86Inst::Cmp {
            src,
            dst: GpOperand::Reg(WORK),
        });
        self.emit_flag_to_int(cc, WORK);
        self.emit_move_to_loc(WORK, var)
    }

    /// `dst = flag ? 1 : 0`
    fn emit_flag_to_int(&mut self, cc: CondCode, dst: Reg) {
        self.push_lir(X86Inst::SetCC { cc, dst });
        self.push_lir(X86Inst::Movzx { src: dst, dst });
    }

    /// Logical or/and: both operands are evaluated, the result is 0 or 1
    fn emit_logical(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        self.emit_load_gp(WORK, left)?;
        if op == BinOp::LOr {
            let src = self.gp_operand(right, MAT)?;
            self.push_lir(X86Inst::Or {
                src,
                dst: GpOperand::Reg(WORK),
            });
            self.emit_flag_to_int(CondCode::Ne, WORK);
        } else {
            self.push_lir(X86Inst::Test {
                src: WORK,
                dst: WORK,
            });
            self.emit_flag_to_int(CondCode::Ne, WORK);
            self.emit_load_gp(WORK2, right)?;
            self.push_lir(X86Inst::Test {
                src: WORK2,
                dst: WORK2,
            });
            self.emit_flag_to_int(CondCode::Ne, WORK2);
            self.push_lir(X86Inst::And {
                src: GpOperand::Reg(WORK2),
                dst: GpOperand::Reg(WORK),
            });
        }
        self.emit_move_to_loc(WORK, var)
    }

    // ========================================================================
    // Floating-Point Operations
    // ========================================================================

    fn emit_fp_binop(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        if op.is_comparison() {
            return self.emit_fp_compare(var, op, left, right);
        }
        if !op.is_arithmetic() {
            return Err(self.codegen_error(format!(
                "operator '{}' has no double form",
                op.symbol()
            )));
        }

        let mut work = match self.get_location(var)? {
            Loc::Xmm(x) => x,
            _ => XMM_WORK,
        };
        if !op.is_commutative() && self.atom_in_xmm(right, work) {
            work = XMM_WORK;
        }
        let src = if self.atom_in_xmm(left, work) {
            self.xmm_operand(right, XMM_MAT)?
        } else if self.atom_in_xmm(right, work) {
            self.xmm_operand(left, XMM_MAT)?
        } else {
            self.emit_load_xmm(work, left)?;
            self.xmm_operand(right, XMM_MAT)?
        };
        let inst = match op {
            BinOp::Add => X86Inst::AddFp { src, dst: work },
            BinOp::Sub => X86Inst::SubFp { src, dst: work },
            BinOp::Mul => X86Inst::MulFp { src, dst: work },
            _ => X86Inst::DivFp { src, dst: work },
        };
        self.push_lir(inst);
        self.emit_fp_move_to_loc(work, var)
    }

    /// Ordered compares: NaN operands make every relation false except `!=`
    fn emit_fp_compare(&mut self, var: VarId, op: BinOp, left: &Atom, right: &Atom) -> Result<()> {
        match op {
            BinOp::Lt | BinOp::Le => {
                // left < right  <=>  right > left
                self.emit_load_xmm(XMM_WORK, right)?;
                let src = self.xmm_operand(left, XMM_MAT)?;
                self.push_lir(X86Inst::UComiFp { src, dst: XMM_WORK });
                let cc = if op == BinOp::Lt {
                    CondCode::A
                } else {
                    CondCode::Ae
                };
                self.emit_flag_to_int(cc, WORK);
            }
            _ => {
                self.emit_load_xmm(XMM_WORK, left)?;
                let src = self.xmm_operand(right, XMM_MAT)?;
                self.push_lir(X86Inst::UComiFp { src, dst: XMM_WORK });
                let src = GpOperand::Reg(WORK2);
                let dst = GpOperand::Reg(WORK);
                if op == BinOp::Eq {
                    self.emit_flag_to_int(CondCode::Eq, WORK);
                    self.emit_flag_to_int(CondCode::Np, WORK2);
                    self.push_lir(X86Inst::And { src, dst });
                } else {
                    self.emit_flag_to_int(CondCode::Ne, WORK);
                    self.emit_flag_to_int(CondCode::P, WORK2);
                    self.push_lir(X86Inst::Or { src, dst });
                }
            }
        }
        self.emit_move_to_loc(WORK, var)
    }

    fn emit_unop(&mut self, var: VarId, op: UnOp, operand: &Atom) -> Result<()> {
        match op {
            UnOp::I2D => {
                let src = match self.gp_operand(operand, MAT)? {
                    GpOperand::Imm(v) => {
                        self.push_lir(X86Inst::Mov {
                            src: GpOperand::Imm(v),
                            dst: GpOperand::Reg(MAT),
                        });
                        GpOperand::Reg(MAT)
                    }
                    other => other,
                };
                let work = match self.get_location(var)? {
                    Loc::Xmm(x) => x,
                    _ => XMM_WORK,
                };
                self.push_lir(X86Inst::CvtIntToFp { src, dst: work });
                self.emit_fp_move_to_loc(work, var)
            }
            UnOp::D2I => {
                let src = self.xmm_operand(operand, XMM_MAT)?;
                self.push_lir(X86Inst::CvtFpToInt { src, dst: WORK });
                self.emit_move_to_loc(WORK, var)
            }
            UnOp::Neg if self.vars().atom_type(operand).is_double() => {
                // Flip the sign bit
                self.emit_load_xmm(XMM_WORK, operand)?;
                self.push_lir(X86Inst::MovXmmGp {
                    src: XMM_WORK,
                    dst: WORK,
                });
                self.push_lir(X86Inst::MovAbs {
                    imm: i64::MIN,
                    dst: MAT,
                });
                self.push_lir(X86Inst::Xor {
                    src: GpOperand::Reg(MAT),
                    dst: GpOperand::Reg(WORK),
                });
                self.push_lir(X86Inst::MovGpXmm {
                    src: WORK,
                    dst: XMM_WORK,
                });
                self.emit_fp_move_to_loc(XMM_WORK, var)
            }
            UnOp::Neg => {
                let work_reg = match self.get_location(var)? {
                    Loc::Reg(r) => r,
                    _ => WORK,
                };
                self.emit_load_gp(work_reg, operand)?;
                self.push_lir(X86Inst::Neg {
                    dst: GpOperand::Reg(work_reg),
                });
                self.emit_move_to_loc(work_reg, var)
            }
            UnOp::Not => {
                self.emit_load_gp(WORK, operand)?;
                self.push_lir(X86Inst::Test {
                    src: WORK,
                    dst: WORK,
                });
                self.emit_flag_to_int(CondCode::Eq, WORK);
                self.emit_move_to_loc(WORK, var)
            }
        }
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Caller-saved registers holding values that must survive a call at
    /// `pos`
    fn live_caller_saved(&self, pos: usize) -> (Vec<Reg>, Vec<XmmReg>) {
        let mut gp = Vec::new();
        let mut xmm = Vec::new();
        for var in self.live.live_across(pos) {
            match self.ra.location(var) {
                Some(Loc::Reg(r)) if !r.is_callee_saved() => gp.push(r),
                Some(Loc::Xmm(x)) => xmm.push(x),
                _ => {}
            }
        }
        gp.sort();
        gp.dedup();
        xmm.sort();
        xmm.dedup();
        (gp, xmm)
    }

    fn emit_save(&mut self, gp: &[Reg], xmm: &[XmmReg]) {
        for r in gp {
            self.push_lir(X86Inst::Push {
                src: GpOperand::Reg(*r),
            });
        }
        for x in xmm {
            self.push_lir(X86Inst::MovXmmGp { src: *x, dst: MAT });
            self.push_lir(X86Inst::Push {
                src: GpOperand::Reg(MAT),
            });
        }
    }

    fn emit_restore(&mut self, gp: &[Reg], xmm: &[XmmReg]) {
        for x in xmm.iter().rev() {
            self.push_lir(X86Inst::Pop {
                dst: GpOperand::Reg(MAT),
            });
            self.push_lir(X86Inst::MovGpXmm { src: MAT, dst: *x });
        }
        for r in gp.iter().rev() {
            self.push_lir(X86Inst::Pop {
                dst: GpOperand::Reg(*r),
            });
        }
    }

    fn emit_stack_adjust(&mut self, bytes: i32, grow: bool) {
        if bytes == 0 {
            return;
        }
        let src = GpOperand::Imm(bytes);
        let dst = GpOperand::Reg(Reg::sp());
        self.push_lir(if grow {
            X86Inst::Sub { src, dst }
        } else {
            X86Inst::Add { src, dst }
        });
    }

    fn emit_print(&mut self, pos: usize, atom: &Atom) -> Result<()> {
        let ty = self.vars().atom_type(atom);
        let helper = match ty {
            VarType::Int => self.helpers.print_int,
            VarType::Double => self.helpers.print_double,
            VarType::Ptr => self.helpers.print_string,
            other => return Err(self.bad_ir(format!("cannot print a {} value", other))),
        };
        let (gp, xmm) = self.live_caller_saved(pos);
        self.emit_save(&gp, &xmm);
        let pad = if (gp.len() + xmm.len()) % 2 == 1 { 8 } else { 0 };
        self.emit_stack_adjust(pad, true);

        if ty.is_double() {
            self.emit_load_xmm(XmmReg::Xmm0, atom)?;
        } else {
            self.emit_load_gp(Reg::Rdi, atom)?;
        }
        self.push_lir(X86Inst::MovAbs {
            imm: helper as i64,
            dst: MAT,
        });
        self.push_lir(X86Inst::Call {
            target: CallTarget::Indirect(MAT),
        });

        self.emit_stack_adjust(pad, false);
        self.emit_restore(&gp, &xmm);
        Ok(())
    }

    /// Push argument `i` of a call: value arguments first, then the
    /// addresses of reference arguments
    fn emit_push_arg(&mut self, i: usize, args: &[Atom], ref_args: &[VarId]) -> Result<()> {
        if let Some(atom) = args.get(i) {
            if self.vars().atom_type(atom).is_double() {
                self.emit_load_xmm(XMM_MAT, atom)?;
                self.push_lir(X86Inst::MovXmmGp {
                    src: XMM_MAT,
                    dst: MAT,
                });
                self.push_lir(X86Inst::Push {
                    src: GpOperand::Reg(MAT),
                });
            } else {
                let src = self.gp_operand(atom, MAT)?;
                self.push_lir(X86Inst::Push { src });
            }
            return Ok(());
        }
        let cell = ref_args
            .get(i - args.len())
            .copied()
            .ok_or_else(|| self.bad_ir(format!("call argument {} out of range", i)))?;
        self.emit_ref_address(cell, MAT)?;
        self.push_lir(X86Inst::Push {
            src: GpOperand::Reg(MAT),
        });
        Ok(())
    }

    fn emit_call(
        &mut self,
        pos: usize,
        callee_id: FunctionId,
        args: &[Atom],
        ref_args: &[VarId],
        dest: VarId,
    ) -> Result<()> {
        let ir = self.ir;
        let callee = ir
            .function(callee_id)
            .ok_or_else(|| self.bad_ir(format!("call to unknown function #{}", callee_id.0)))?;

        let mut is_double: Vec<bool> = args
            .iter()
            .map(|a| self.vars().atom_type(a).is_double())
            .collect();
        is_double.extend(ref_args.iter().map(|_| false));
        let slots = assign_arg_slots(&is_double);
        let n_stack = slots
            .iter()
            .filter(|s| matches!(s, ArgSlot::Stack(_)))
            .count();

        let (gp, xmm) = self.live_caller_saved(pos);
        self.emit_save(&gp, &xmm);
        let pad = if (gp.len() + xmm.len() + n_stack) % 2 == 1 {
            8
        } else {
            0
        };
        self.emit_stack_adjust(pad, true);

        // Memory arguments, last one pushed first
        for (i, slot) in slots.iter().enumerate().rev() {
            if matches!(slot, ArgSlot::Stack(_)) {
                self.emit_push_arg(i, args, ref_args)?;
            }
        }
        // Register arguments go through the stack so that no argument
        // register is overwritten before it is read
        let in_regs: Vec<(usize, ArgSlot)> = slots
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, s)| !matches!(s, ArgSlot::Stack(_)))
            .collect();
        for (i, _) in &in_regs {
            self.emit_push_arg(*i, args, ref_args)?;
        }
        for (_, slot) in in_regs.iter().rev() {
            match slot {
                ArgSlot::Gp(r) => self.push_lir(X86Inst::Pop {
                    dst: GpOperand::Reg(*r),
                }),
                ArgSlot::Xmm(x) => {
                    self.push_lir(X86Inst::Pop {
                        dst: GpOperand::Reg(MAT),
                    });
                    self.push_lir(X86Inst::MovGpXmm { src: MAT, dst: *x });
                }
                ArgSlot::Stack(_) => {}
            }
        }

        match &callee.native {
            Some(native) => {
                self.push_lir(X86Inst::MovAbs {
                    imm: native.address as i64,
                    dst: MAT,
                });
                self.push_lir(X86Inst::Call {
                    target: CallTarget::Indirect(MAT),
                });
            }
            None => self.push_lir(X86Inst::Call {
                target: CallTarget::Direct {
                    func: callee_id,
                    name: callee.name.clone(),
                },
            }),
        }
        self.emit_stack_adjust(8 * n_stack as i32 + pad, false);

        // The result's home is never one of the saved registers: it is
        // not live across the call
        match self.vars().var_type(dest) {
            VarType::Unit => {}
            VarType::Double => self.emit_fp_move_to_loc(XmmReg::Xmm0, dest)?,
            _ => self.emit_move_to_loc(Reg::Rax, dest)?,
        }
        self.emit_restore(&gp, &xmm);
        Ok(())
    }

    // ========================================================================
    // Control Flow
    // ========================================================================

    fn emit_jump(&mut self, bb: &Block, next: Option<BlockId>) -> Result<()> {
        match &bb.jump {
            None => {
                if matches!(bb.stmts.last(), Some(Stmt::Return(_))) {
                    Ok(())
                } else {
                    Err(self.bad_ir(format!("block {} has no terminator", bb.id)))
                }
            }
            Some(Jump::Always(target)) => {
                self.emit_phi_moves(bb.id, *target)?;
                if next != Some(*target) {
                    self.push_lir(X86Inst::Jmp {
                        target: self.label(*target),
                    });
                }
                Ok(())
            }
            Some(Jump::Cond { yes, no, cond }) => {
                self.emit_test_cond(cond)?;
                let yes_target = self.edge_target(bb.id, *yes)?;
                let no_target = self.edge_target(bb.id, *no)?;
                let falls_through = next == Some(*no) && no_target == self.label(*no);
                self.push_lir(X86Inst::Jcc {
                    cc: CondCode::Ne,
                    target: yes_target,
                });
                if !falls_through {
                    self.push_lir(X86Inst::Jmp { target: no_target });
                }
                Ok(())
            }
        }
    }

    /// Set ZF from a condition atom
    fn emit_test_cond(&mut self, cond: &Atom) -> Result<()> {
        if let Atom::Var(v) = cond {
            match self.get_location(*v)? {
                Loc::Reg(r) => {
                    self.push_lir(X86Inst::Test { src: r, dst: r });
                    return Ok(());
                }
                Loc::Stack(off) => {
                    self.push_lir(X86Inst::Cmp {
                        src: GpOperand::Imm(0),
                        dst: GpOperand::Mem(frame(off)),
                    });
                    return Ok(());
                }
                Loc::Xmm(_) => return Err(self.bad_ir(format!("condition {} is a double", v))),
            }
        }
        self.emit_load_gp(WORK, cond)?;
        self.push_lir(X86Inst::Test {
            src: WORK,
            dst: WORK,
        });
        Ok(())
    }

    /// Label a conditional edge jumps to: the target block itself, or a
    /// stub performing the target's phi moves first
    fn edge_target(&mut self, from: BlockId, to: BlockId) -> Result<Label> {
        let block = self
            .func
            .get_block(to)
            .ok_or_else(|| self.bad_ir(format!("jump to missing block {}", to)))?;
        if !block.has_phis() {
            return Ok(self.label(to));
        }
        let id = (self.func.blocks.len() + self.stubs.len()) as u32;
        let label = Label::new(self.func.id, id);
        self.stubs.push((label, from, to));
        Ok(label)
    }

    /// Copy every phi source for the edge `from -> to` into its phi
    fn emit_phi_moves(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        let func = self.func;
        let target = func
            .get_block(to)
            .ok_or_else(|| self.bad_ir(format!("jump to missing block {}", to)))?;

        let mut gp_moves = Vec::new();
        let mut fp_moves = Vec::new();
        for stmt in target.stmts.iter().take_while(|s| s.is_phi()) {
            let Stmt::Phi { var, sources } = stmt else {
                continue;
            };
            let Some(&(_, src)) = sources.iter().find(|(b, _)| *b == from) else {
                return Err(self.bad_ir(format!(
                    "unfilled phi for {} on edge {} -> {}",
                    var, from, to
                )));
            };
            let ty = self.vars().var_type(*var);
            if ty == VarType::Unit {
                continue;
            }
            let mv = (self.get_location(*var)?, self.get_location(src)?);
            if ty.is_double() {
                fp_moves.push(mv);
            } else {
                gp_moves.push(mv);
            }
        }
        self.emit_parallel_move(gp_moves, Loc::Reg(WORK))?;
        self.emit_parallel_move(fp_moves, Loc::Xmm(XMM_WORK))
    }

    /// Perform `dst <- src` for every pair as if simultaneously, breaking
    /// cycles through `scratch`
    fn emit_parallel_move(&mut self, mut moves: Vec<(Loc, Loc)>, scratch: Loc) -> Result<()> {
        moves.retain(|(d, s)| d != s);
        while !moves.is_empty() {
            let ready = moves
                .iter()
                .position(|(d, _)| !moves.iter().any(|(_, s)| s == d));
            match ready {
                Some(i) => {
                    let (d, s) = moves.remove(i);
                    self.emit_loc_move(d, s)?;
                }
                None => {
                    // Every destination is still needed as a source
                    let (d, _) = moves[0];
                    self.emit_loc_move(scratch, d)?;
                    for m in moves.iter_mut() {
                        if m.1 == d {
                            m.1 = scratch;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_loc_move(&mut self, dst: Loc, src: Loc) -> Result<()> {
        let inst = match (dst, src) {
            _ if dst == src => return Ok(()),
            (Loc::Reg(d), Loc::Reg(s)) => X86Inst::Mov {
                src: GpOperand::Reg(s),
                dst: GpOperand::Reg(d),
            },
            (Loc::Reg(d), Loc::Stack(off)) => X86Inst::Mov {
                src: GpOperand::Mem(frame(off)),
                dst: GpOperand::Reg(d),
            },
            (Loc::Stack(off), Loc::Reg(s)) => X86Inst::Mov {
                src: GpOperand::Reg(s),
                dst: GpOperand::Mem(frame(off)),
            },
            (Loc::Stack(d), Loc::Stack(s)) => {
                self.push_lir(X86Inst::Mov {
                    src: GpOperand::Mem(frame(s)),
                    dst: GpOperand::Reg(MAT),
                });
                X86Inst::Mov {
                    src: GpOperand::Reg(MAT),
                    dst: GpOperand::Mem(frame(d)),
                }
            }
            (Loc::Xmm(d), Loc::Xmm(s)) => X86Inst::MovFp {
                src: XmmOperand::Reg(s),
                dst: XmmOperand::Reg(d),
            },
            (Loc::Xmm(d), Loc::Stack(off)) => X86Inst::MovFp {
                src: XmmOperand::Mem(frame(off)),
                dst: XmmOperand::Reg(d),
            },
            (Loc::Stack(off), Loc::Xmm(s)) => X86Inst::MovFp {
                src: XmmOperand::Reg(s),
                dst: XmmOperand::Mem(frame(off)),
            },
            _ => {
                return Err(self.codegen_error(format!("cannot move {} to {}", src, dst)));
            }
        };
        self.push_lir(inst);
        Ok(())
    }
}

/// Generate LIR for one compiled (non-native) function
pub fn generate_function(
    ir: &SimpleIr,
    func: &Function,
    live: &Liveness,
    ra: &RegAlloc,
    strings: &[usize],
    helpers: RuntimeHelpers,
) -> Result<FunctionCode> {
    X86_64CodeGen::new(ir, func, live, ra, strings, helpers).generate()
}

// ============================================================================
// Tests
// ============================================================================
