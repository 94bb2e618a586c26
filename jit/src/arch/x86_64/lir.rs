//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// x86-64 Low-level Intermediate Representation (LIR)
//
// Strongly-typed representation of the x86-64 instructions the code
// generator selects.  All integer operations are 64-bit and all
// floating-point operations are scalar double.  The same sequence is
// encoded to machine code and printed in AT&T syntax.
//

use super::regalloc::{Reg, XmmReg};
use crate::arch::lir::{EmitAsm, Label};
use crate::ir::FunctionId;
use std::fmt::Write;

// ============================================================================
// Memory Addressing Modes
// ============================================================================

/// x86-64 memory operand: [base + offset]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAddr {
    pub base: Reg,
    pub offset: i32,
}

impl MemAddr {
    pub fn new(base: Reg, offset: i32) -> Self {
        Self { base, offset }
    }

    /// Format memory operand in AT&T syntax
    pub fn format(&self) -> String {
        if self.offset == 0 {
            format!("({})", self.base.name64())
        } else {
            format!("{}({})", self.offset, self.base.name64())
        }
    }
}

// ============================================================================
// General-Purpose Operands
// ============================================================================

/// x86-64 general-purpose operand (register, memory, or immediate)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpOperand {
    /// Register operand
    Reg(Reg),
    /// Memory operand
    Mem(MemAddr),
    /// Immediate integer value (sign-extended 32-bit)
    Imm(i32),
}

impl GpOperand {
    /// Format operand in AT&T syntax
    pub fn format(&self) -> String {
        match self {
            GpOperand::Reg(r) => r.name64().to_string(),
            GpOperand::Mem(addr) => addr.format(),
            GpOperand::Imm(v) => format!("${}", v),
        }
    }
}

// ============================================================================
// XMM (Floating-Point) Operands
// ============================================================================

/// x86-64 XMM operand (register or memory)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmmOperand {
    /// XMM register operand
    Reg(XmmReg),
    /// Memory operand
    Mem(MemAddr),
}

impl XmmOperand {
    /// Format operand in AT&T syntax
    pub fn format(&self) -> String {
        match self {
            XmmOperand::Reg(r) => r.name().to_string(),
            XmmOperand::Mem(addr) => addr.format(),
        }
    }
}

// ============================================================================
// Condition Codes and Call Targets
// ============================================================================

/// Condition codes for Jcc/SETcc
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    /// Equal (ZF=1)
    Eq,
    /// Not equal (ZF=0)
    Ne,
    /// Signed less than
    Lt,
    /// Signed less or equal
    Le,
    /// Unsigned above (CF=0 and ZF=0), ordered greater for ucomisd
    A,
    /// Unsigned above or equal (CF=0)
    Ae,
    /// Parity (unordered compare)
    P,
    /// No parity
    Np,
}

impl CondCode {
    /// AT&T mnemonic suffix
    pub fn suffix(&self) -> &'static str {
        match self {
            CondCode::Eq => "e",
            CondCode::Ne => "ne",
            CondCode::Lt => "l",
            CondCode::Le => "le",
            CondCode::A => "a",
            CondCode::Ae => "ae",
            CondCode::P => "p",
            CondCode::Np => "np",
        }
    }

    /// Low nibble of the Jcc/SETcc opcode
    pub fn code(&self) -> u8 {
        match self {
            CondCode::Eq => 0x4,
            CondCode::Ne => 0x5,
            CondCode::Lt => 0xC,
            CondCode::Le => 0xE,
            CondCode::A => 0x7,
            CondCode::Ae => 0x3,
            CondCode::P => 0xA,
            CondCode::Np => 0xB,
        }
    }
}

/// Call destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Another compiled function, resolved when the program is linked
    Direct { func: FunctionId, name: String },
    /// Absolute address held in a register
    Indirect(Reg),
}

// ============================================================================
// x86-64 LIR Instructions
// ============================================================================

/// x86-64 Low-level IR instruction
#[derive(Debug, Clone, PartialEq)]
pub enum X86Inst {
    // ========================================================================
    // Data Movement
    // ========================================================================
    /// MOV - Move data between registers/memory
    Mov { src: GpOperand, dst: GpOperand },

    /// MOVABS - Move 64-bit immediate to register
    MovAbs { imm: i64, dst: Reg },

    /// MOVZX - Zero-extend the low byte of `src`
    Movzx { src: Reg, dst: Reg },

    /// LEA - Load effective address
    Lea { addr: MemAddr, dst: Reg },

    /// PUSH - Push onto stack
    Push { src: GpOperand },

    /// POP - Pop from stack into register or memory
    Pop { dst: GpOperand },

    // ========================================================================
    // Integer Arithmetic
    // ========================================================================
    Add { src: GpOperand, dst: GpOperand },
    Sub { src: GpOperand, dst: GpOperand },

    /// IMUL - Two-operand signed multiply
    IMul2 { src: GpOperand, dst: Reg },

    /// CQTO - Sign-extend RAX into RDX:RAX
    Cqto,

    /// IDIV - Signed divide RDX:RAX by operand
    IDiv { divisor: GpOperand },

    Neg { dst: GpOperand },

    // ========================================================================
    // Bitwise Operations
    // ========================================================================
    And { src: GpOperand, dst: GpOperand },
    Or { src: GpOperand, dst: GpOperand },
    Xor { src: GpOperand, dst: GpOperand },

    // ========================================================================
    // Comparison and Conditional
    // ========================================================================
    /// CMP - Compare `dst` with `src`
    Cmp { src: GpOperand, dst: GpOperand },

    /// TEST - Bitwise AND, set flags
    Test { src: Reg, dst: Reg },

    /// SETcc - Set low byte on condition
    SetCC { cc: CondCode, dst: Reg },

    // ========================================================================
    // Control Flow
    // ========================================================================
    Jmp { target: Label },
    Jcc { cc: CondCode, target: Label },
    Call { target: CallTarget },
    Ret,

    // ========================================================================
    // Floating-Point (SSE, scalar double)
    // ========================================================================
    /// MOVSD - Move scalar double
    MovFp { src: XmmOperand, dst: XmmOperand },

    /// MOVQ - Move bits from GP register to XMM
    MovGpXmm { src: Reg, dst: XmmReg },

    /// MOVQ - Move bits from XMM to GP register
    MovXmmGp { src: XmmReg, dst: Reg },

    AddFp { src: XmmOperand, dst: XmmReg },
    SubFp { src: XmmOperand, dst: XmmReg },
    MulFp { src: XmmOperand, dst: XmmReg },
    DivFp { src: XmmOperand, dst: XmmReg },

    /// UCOMISD - Unordered compare `dst` with `src`
    UComiFp { src: XmmOperand, dst: XmmReg },

    /// CVTSI2SD - Convert 64-bit integer to double
    CvtIntToFp { src: GpOperand, dst: XmmReg },

    /// CVTTSD2SI - Convert double to 64-bit integer, truncating
    CvtFpToInt { src: XmmOperand, dst: Reg },

    // ========================================================================
    // Labels
    // ========================================================================
    Label(Label),
}

// ============================================================================
// EmitAsm Implementation
// ============================================================================

impl EmitAsm for X86Inst {
    fn emit(&self, out: &mut String) {
        let _ = match self {
            X86Inst::Mov { src, dst } => {
                writeln!(out, "    movq {}, {}", src.format(), dst.format())
            }
            X86Inst::MovAbs { imm, dst } => {
                writeln!(out, "    movabsq ${}, {}", imm, dst.name64())
            }
            X86Inst::Movzx { src, dst } => {
                writeln!(out, "    movzbq {}, {}", src.name8(), dst.name64())
            }
            X86Inst::Lea { addr, dst } => {
                writeln!(out, "    leaq {}, {}", addr.format(), dst.name64())
            }
            X86Inst::Push { src } => writeln!(out, "    pushq {}", src.format()),
            X86Inst::Pop { dst } => writeln!(out, "    popq {}", dst.format()),

            X86Inst::Add { src, dst } => {
                writeln!(out, "    addq {}, {}", src.format(), dst.format())
            }
            X86Inst::Sub { src, dst } => {
                writeln!(out, "    subq {}, {}", src.format(), dst.format())
            }
            X86Inst::IMul2 { src, dst } => {
                writeln!(out, "    imulq {}, {}", src.format(), dst.name64())
            }
            X86Inst::Cqto => writeln!(out, "    cqto"),
            X86Inst::IDiv { divisor } => writeln!(out, "    idivq {}", divisor.format()),
            X86Inst::Neg { dst } => writeln!(out, "    negq {}", dst.format()),

            X86Inst::And { src, dst } => {
                writeln!(out, "    andq {}, {}", src.format(), dst.format())
            }
            X86Inst::Or { src, dst } => {
                writeln!(out, "    orq {}, {}", src.format(), dst.format())
            }
            X86Inst::Xor { src, dst } => {
                writeln!(out, "    xorq {}, {}", src.format(), dst.format())
            }

            X86Inst::Cmp { src, dst } => {
                writeln!(out, "    cmpq {}, {}", src.format(), dst.format())
            }
            X86Inst::Test { src, dst } => {
                writeln!(out, "    testq {}, {}", src.name64(), dst.name64())
            }
            X86Inst::SetCC { cc, dst } => {
                writeln!(out, "    set{} {}", cc.suffix(), dst.name8())
            }

            X86Inst::Jmp { target } => writeln!(out, "    jmp {}", target),
            X86Inst::Jcc { cc, target } => writeln!(out, "    j{} {}", cc.suffix(), target),
            X86Inst::Call { target } => match target {
                CallTarget::Direct { name, .. } => writeln!(out, "    call {}", name),
                CallTarget::Indirect(reg) => writeln!(out, "    call *{}", reg.name64()),
            },
            X86Inst::Ret => writeln!(out, "    ret"),

            X86Inst::MovFp { src, dst } => {
                writeln!(out, "    movsd {}, {}", src.format(), dst.format())
            }
            X86Inst::MovGpXmm { src, dst } => {
                writeln!(out, "    movq {}, {}", src.name64(), dst.name())
            }
            X86Inst::MovXmmGp { src, dst } => {
                writeln!(out, "    movq {}, {}", src.name(), dst.name64())
            }
            X86Inst::AddFp { src, dst } => {
                writeln!(out, "    addsd {}, {}", src.format(), dst.name())
            }
            X86Inst::SubFp { src, dst } => {
                writeln!(out, "    subsd {}, {}", src.format(), dst.name())
            }
            X86Inst::MulFp { src, dst } => {
                writeln!(out, "    mulsd {}, {}", src.format(), dst.name())
            }
            X86Inst::DivFp { src, dst } => {
                writeln!(out, "    divsd {}, {}", src.format(), dst.name())
            }
            X86Inst::UComiFp { src, dst } => {
                writeln!(out, "    ucomisd {}, {}", src.format(), dst.name())
            }
            X86Inst::CvtIntToFp { src, dst } => {
                writeln!(out, "    cvtsi2sdq {}, {}", src.format(), dst.name())
            }
            X86Inst::CvtFpToInt { src, dst } => {
                writeln!(out, "    cvttsd2siq {}, {}", src.format(), dst.name64())
            }

            X86Inst::Label(label) => writeln!(out, "{}:", label),
        };
    }
}

// ============================================================================
// Tests
// ============================================================================
