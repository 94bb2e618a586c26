//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// x86-64 machine code encoder
//
// Turns LIR into bytes: legacy prefix, REX, opcode, ModRM/SIB,
// displacement, immediate.  Branches always use rel32 forms.  Labels
// are resolved per function, calls between functions once the whole
// program has been encoded.
//

use super::lir::{CallTarget, GpOperand, MemAddr, X86Inst, XmmOperand};
use super::regalloc::{Reg, XmmReg};
use crate::arch::lir::Label;
use crate::error::{JitError, Result};
use crate::ir::FunctionId;
use std::collections::HashMap;

/// Hardware register number
fn hw(reg: Reg) -> u8 {
    match reg {
        Reg::Rax => 0,
        Reg::Rcx => 1,
        Reg::Rdx => 2,
        Reg::Rbx => 3,
        Reg::Rsp => 4,
        Reg::Rbp => 5,
        Reg::Rsi => 6,
        Reg::Rdi => 7,
        Reg::R8 => 8,
        Reg::R9 => 9,
        Reg::R10 => 10,
        Reg::R11 => 11,
        Reg::R12 => 12,
        Reg::R13 => 13,
        Reg::R14 => 14,
        Reg::R15 => 15,
    }
}

fn xhw(reg: XmmReg) -> u8 {
    reg as u8
}

/// ModRM r/m operand
#[derive(Clone, Copy)]
enum Rm {
    Reg(u8),
    Mem(MemAddr),
}

impl Rm {
    fn base(&self) -> u8 {
        match self {
            Rm::Reg(r) => *r,
            Rm::Mem(m) => hw(m.base),
        }
    }
}

/// Group-1 ALU opcodes: (r/m <- reg form, reg <- r/m form, /digit)
fn alu_opcodes(inst: &X86Inst) -> Option<(u8, u8, u8, &GpOperand, &GpOperand)> {
    match inst {
        X86Inst::Add { src, dst } => Some((0x01, 0x03, 0, src, dst)),
        X86Inst::Or { src, dst } => Some((0x09, 0x0B, 1, src, dst)),
        X86Inst::And { src, dst } => Some((0x21, 0x23, 4, src, dst)),
        X86Inst::Sub { src, dst } => Some((0x29, 0x2B, 5, src, dst)),
        X86Inst::Xor { src, dst } => Some((0x31, 0x33, 6, src, dst)),
        X86Inst::Cmp { src, dst } => Some((0x39, 0x3B, 7, src, dst)),
        _ => None,
    }
}

/// Encoded program: code bytes and the entry offset of every function
#[derive(Debug, Clone, Default)]
pub struct Linked {
    pub code: Vec<u8>,
    pub entries: HashMap<FunctionId, usize>,
}

/// Machine code encoder for a whole program
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    func_name: String,
    labels: HashMap<Label, usize>,
    /// rel32 fields waiting for a label of the current function
    jump_fixups: Vec<(usize, Label)>,
    /// rel32 fields waiting for a function entry
    call_fixups: Vec<(usize, FunctionId)>,
    entries: HashMap<FunctionId, usize>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn error(&self, inst: &X86Inst) -> JitError {
        JitError::codegen(
            self.func_name.clone(),
            format!("no encoding for {:?}", inst),
        )
    }

    /// Start a function; its entry is the current offset
    pub fn begin_function(&mut self, id: FunctionId, name: &str) {
        self.func_name = name.to_string();
        self.entries.insert(id, self.code.len());
        self.labels.clear();
        self.jump_fixups.clear();
    }

    /// Resolve the current function's branches
    pub fn end_function(&mut self) -> Result<()> {
        for (at, label) in std::mem::take(&mut self.jump_fixups) {
            let Some(&target) = self.labels.get(&label) else {
                return Err(JitError::codegen(
                    self.func_name.clone(),
                    format!("undefined label {}", label),
                ));
            };
            self.patch_rel32(at, target);
        }
        Ok(())
    }

    /// Resolve calls and hand out the finished code
    pub fn finish(mut self) -> Result<Linked> {
        for (at, func) in std::mem::take(&mut self.call_fixups) {
            let Some(&target) = self.entries.get(&func) else {
                return Err(JitError::codegen(
                    self.func_name.clone(),
                    format!("call to function #{} that was never emitted", func.0),
                ));
            };
            self.patch_rel32(at, target);
        }
        Ok(Linked {
            code: self.code,
            entries: self.entries,
        })
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn patch_rel32(&mut self, at: usize, target: usize) {
        let rel = target as i64 - (at as i64 + 4);
        self.code[at..at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }

    fn rel32_placeholder(&mut self) -> usize {
        let at = self.code.len();
        self.code.extend_from_slice(&[0; 4]);
        at
    }

    fn imm32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn modrm(&mut self, reg: u8, rm: Rm) {
        match rm {
            Rm::Reg(r) => self.code.push(0xC0 | ((reg & 7) << 3) | (r & 7)),
            Rm::Mem(m) => {
                let base = hw(m.base);
                let mode = if m.offset == 0 && base & 7 != 5 {
                    0x00
                } else if i8::try_from(m.offset).is_ok() {
                    0x40
                } else {
                    0x80
                };
                self.code.push(mode | ((reg & 7) << 3) | (base & 7));
                if base & 7 == 4 {
                    // SIB: no index, base only
                    self.code.push(0x24);
                }
                match mode {
                    0x40 => self.code.push(m.offset as i8 as u8),
                    0x80 => self.imm32(m.offset),
                    _ => {}
                }
            }
        }
    }

    /// Emit [prefix] [REX] opcode ModRM
    fn op(&mut self, prefix: Option<u8>, wide: bool, opcode: &[u8], reg: u8, rm: Rm, force_rex: bool) {
        if let Some(p) = prefix {
            self.code.push(p);
        }
        let rex = 0x40 | ((wide as u8) << 3) | (((reg >> 3) & 1) << 2) | ((rm.base() >> 3) & 1);
        if rex != 0x40 || force_rex {
            self.code.push(rex);
        }
        self.code.extend_from_slice(opcode);
        self.modrm(reg, rm);
    }

    fn gp_rm(op: &GpOperand) -> Option<Rm> {
        match op {
            GpOperand::Reg(r) => Some(Rm::Reg(hw(*r))),
            GpOperand::Mem(m) => Some(Rm::Mem(*m)),
            GpOperand::Imm(_) => None,
        }
    }

    fn xmm_rm(op: &XmmOperand) -> Rm {
        match op {
            XmmOperand::Reg(x) => Rm::Reg(xhw(*x)),
            XmmOperand::Mem(m) => Rm::Mem(*m),
        }
    }

    fn push_pop_reg(&mut self, base: u8, reg: Reg) {
        let r = hw(reg);
        if r >= 8 {
            self.code.push(0x41);
        }
        self.code.push(base + (r & 7));
    }

    /// Encode one instruction
    pub fn emit(&mut self, inst: &X86Inst) -> Result<()> {
        if let Some((mr, rm_op, digit, src, dst)) = alu_opcodes(inst) {
            return match (src, dst) {
                (GpOperand::Reg(s), d) => {
                    let rm = Self::gp_rm(d).ok_or_else(|| self.error(inst))?;
                    self.op(None, true, &[mr], hw(*s), rm, false);
                    Ok(())
                }
                (GpOperand::Mem(m), GpOperand::Reg(d)) => {
                    self.op(None, true, &[rm_op], hw(*d), Rm::Mem(*m), false);
                    Ok(())
                }
                (GpOperand::Imm(v), d) => {
                    let rm = Self::gp_rm(d).ok_or_else(|| self.error(inst))?;
                    if let Ok(b) = i8::try_from(*v) {
                        self.op(None, true, &[0x83], digit, rm, false);
                        self.code.push(b as u8);
                    } else {
                        self.op(None, true, &[0x81], digit, rm, false);
                        self.imm32(*v);
                    }
                    Ok(())
                }
                _ => Err(self.error(inst)),
            };
        }

        match inst {
            X86Inst::Mov { src, dst } => match (src, dst) {
                (GpOperand::Reg(s), d) => {
                    let rm = Self::gp_rm(d).ok_or_else(|| self.error(inst))?;
                    self.op(None, true, &[0x89], hw(*s), rm, false);
                }
                (GpOperand::Mem(m), GpOperand::Reg(d)) => {
                    self.op(None, true, &[0x8B], hw(*d), Rm::Mem(*m), false);
                }
                (GpOperand::Imm(v), d) => {
                    let rm = Self::gp_rm(d).ok_or_else(|| self.error(inst))?;
                    self.op(None, true, &[0xC7], 0, rm, false);
                    self.imm32(*v);
                }
                _ => return Err(self.error(inst)),
            },
            X86Inst::MovAbs { imm, dst } => {
                let r = hw(*dst);
                self.code.push(0x48 | ((r >> 3) & 1));
                self.code.push(0xB8 + (r & 7));
                self.code.extend_from_slice(&imm.to_le_bytes());
            }
            X86Inst::Movzx { src, dst } => {
                self.op(None, true, &[0x0F, 0xB6], hw(*dst), Rm::Reg(hw(*src)), false);
            }
            X86Inst::Lea { addr, dst } => {
                self.op(None, true, &[0x8D], hw(*dst), Rm::Mem(*addr), false);
            }
            X86Inst::Push { src } => match src {
                GpOperand::Reg(r) => self.push_pop_reg(0x50, *r),
                GpOperand::Mem(m) => self.op(None, false, &[0xFF], 6, Rm::Mem(*m), false),
                GpOperand::Imm(v) => {
                    self.code.push(0x68);
                    self.imm32(*v);
                }
            },
            X86Inst::Pop { dst } => match dst {
                GpOperand::Reg(r) => self.push_pop_reg(0x58, *r),
                GpOperand::Mem(m) => self.op(None, false, &[0x8F], 0, Rm::Mem(*m), false),
                GpOperand::Imm(_) => return Err(self.error(inst)),
            },

            X86Inst::IMul2 { src, dst } => match src {
                GpOperand::Imm(v) => {
                    let d = hw(*dst);
                    self.op(None, true, &[0x69], d, Rm::Reg(d), false);
                    self.imm32(*v);
                }
                other => {
                    let rm = Self::gp_rm(other).ok_or_else(|| self.error(inst))?;
                    self.op(None, true, &[0x0F, 0xAF], hw(*dst), rm, false);
                }
            },
            X86Inst::Cqto => self.code.extend_from_slice(&[0x48, 0x99]),
            X86Inst::IDiv { divisor } => {
                let rm = Self::gp_rm(divisor).ok_or_else(|| self.error(inst))?;
                self.op(None, true, &[0xF7], 7, rm, false);
            }
            X86Inst::Neg { dst } => {
                let rm = Self::gp_rm(dst).ok_or_else(|| self.error(inst))?;
                self.op(None, true, &[0xF7], 3, rm, false);
            }
            X86Inst::Test { src, dst } => {
                self.op(None, true, &[0x85], hw(*src), Rm::Reg(hw(*dst)), false);
            }
            X86Inst::SetCC { cc, dst } => {
                let d = hw(*dst);
                // SPL/BPL/SIL/DIL are only reachable with a REX prefix
                let force_rex = (4..8).contains(&d);
                self.op(None, false, &[0x0F, 0x90 | cc.code()], 0, Rm::Reg(d), force_rex);
            }

            X86Inst::Jmp { target } => {
                self.code.push(0xE9);
                let at = self.rel32_placeholder();
                self.jump_fixups.push((at, *target));
            }
            X86Inst::Jcc { cc, target } => {
                self.code.extend_from_slice(&[0x0F, 0x80 | cc.code()]);
                let at = self.rel32_placeholder();
                self.jump_fixups.push((at, *target));
            }
            X86Inst::Call { target } => match target {
                CallTarget::Direct { func, .. } => {
                    self.code.push(0xE8);
                    let at = self.rel32_placeholder();
                    self.call_fixups.push((at, *func));
                }
                CallTarget::Indirect(r) => {
                    self.op(None, false, &[0xFF], 2, Rm::Reg(hw(*r)), false);
                }
            },
            X86Inst::Ret => self.code.push(0xC3),

            X86Inst::MovFp { src, dst } => match (src, dst) {
                (s, XmmOperand::Reg(d)) => {
                    self.op(Some(0xF2), false, &[0x0F, 0x10], xhw(*d), Self::xmm_rm(s), false);
                }
                (XmmOperand::Reg(s), XmmOperand::Mem(m)) => {
                    self.op(Some(0xF2), false, &[0x0F, 0x11], xhw(*s), Rm::Mem(*m), false);
                }
                _ => return Err(self.error(inst)),
            },
            X86Inst::MovGpXmm { src, dst } => {
                self.op(Some(0x66), true, &[0x0F, 0x6E], xhw(*dst), Rm::Reg(hw(*src)), false);
            }
            X86Inst::MovXmmGp { src, dst } => {
                self.op(Some(0x66), true, &[0x0F, 0x7E], xhw(*src), Rm::Reg(hw(*dst)), false);
            }
            X86Inst::AddFp { src, dst }
            | X86Inst::SubFp { src, dst }
            | X86Inst::MulFp { src, dst }
            | X86Inst::DivFp { src, dst } => {
                let opcode = match inst {
                    X86Inst::AddFp { .. } => 0x58,
                    X86Inst::MulFp { .. } => 0x59,
                    X86Inst::SubFp { .. } => 0x5C,
                    _ => 0x5E,
                };
                self.op(Some(0xF2), false, &[0x0F, opcode], xhw(*dst), Self::xmm_rm(src), false);
            }
            X86Inst::UComiFp { src, dst } => {
                self.op(Some(0x66), false, &[0x0F, 0x2E], xhw(*dst), Self::xmm_rm(src), false);
            }
            X86Inst::CvtIntToFp { src, dst } => {
                let rm = Self::gp_rm(src).ok_or_else(|| self.error(inst))?;
                self.op(Some(0xF2), true, &[0x0F, 0x2A], xhw(*dst), rm, false);
            }
            X86Inst::CvtFpToInt { src, dst } => {
                self.op(Some(0xF2), true, &[0x0F, 0x2C], hw(*dst), Self::xmm_rm(src), false);
            }

            X86Inst::Label(label) => {
                self.labels.insert(*label, self.code.len());
            }

            X86Inst::Add { .. }
            | X86Inst::Sub { .. }
            | X86Inst::And { .. }
            | X86Inst::Or { .. }
            | X86Inst::Xor { .. }
            | X86Inst::Cmp { .. } => return Err(self.error(inst)),
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
