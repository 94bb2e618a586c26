//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// x86-64 Register Allocator
// Linear scan register allocation for x86-64
//

use crate::arch::regalloc::{linear_scan, sort_by_start, LiveInterval, Liveness};
use crate::ir::{Function, VarId, VarTable, VarType};
use std::collections::BTreeMap;
use std::fmt::{self, Write};

// ============================================================================
// x86-64 Register Definitions
// ============================================================================

/// x86-64 physical registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    // 64-bit general purpose registers
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    /// Get AT&T syntax name for 64-bit register
    pub fn name64(&self) -> &'static str {
        match self {
            Reg::Rax => "%rax",
            Reg::Rbx => "%rbx",
            Reg::Rcx => "%rcx",
            Reg::Rdx => "%rdx",
            Reg::Rsi => "%rsi",
            Reg::Rdi => "%rdi",
            Reg::Rbp => "%rbp",
            Reg::Rsp => "%rsp",
            Reg::R8 => "%r8",
            Reg::R9 => "%r9",
            Reg::R10 => "%r10",
            Reg::R11 => "%r11",
            Reg::R12 => "%r12",
            Reg::R13 => "%r13",
            Reg::R14 => "%r14",
            Reg::R15 => "%r15",
        }
    }

    /// Get AT&T syntax name for 8-bit register (low byte)
    pub fn name8(&self) -> &'static str {
        match self {
            Reg::Rax => "%al",
            Reg::Rbx => "%bl",
            Reg::Rcx => "%cl",
            Reg::Rdx => "%dl",
            Reg::Rsi => "%sil",
            Reg::Rdi => "%dil",
            Reg::Rbp => "%bpl",
            Reg::Rsp => "%spl",
            Reg::R8 => "%r8b",
            Reg::R9 => "%r9b",
            Reg::R10 => "%r10b",
            Reg::R11 => "%r11b",
            Reg::R12 => "%r12b",
            Reg::R13 => "%r13b",
            Reg::R14 => "%r14b",
            Reg::R15 => "%r15b",
        }
    }

    /// Is this a callee-saved register?
    pub fn is_callee_saved(&self) -> bool {
        matches!(
            self,
            Reg::Rbx | Reg::Rbp | Reg::R12 | Reg::R13 | Reg::R14 | Reg::R15
        )
    }

    /// Argument registers in order (System V AMD64 ABI)
    pub fn arg_regs() -> &'static [Reg] {
        &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9]
    }

    /// All allocatable registers, callee-saved first.
    /// RAX and RDX are reserved for results and division, R10 and R11
    /// for operand materialization and reference addressing.
    pub fn allocatable() -> &'static [Reg] {
        &[
            Reg::Rbx,
            Reg::R12,
            Reg::R13,
            Reg::R14,
            Reg::R15,
            Reg::Rcx,
            Reg::Rsi,
            Reg::Rdi,
            Reg::R8,
            Reg::R9,
        ]
    }

    /// Stack pointer register
    pub fn sp() -> Reg {
        Reg::Rsp
    }

    /// Base/frame pointer register
    pub fn bp() -> Reg {
        Reg::Rbp
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name64())
    }
}

// ============================================================================
// XMM Register Definitions (SSE/FP)
// ============================================================================

/// x86-64 XMM registers for floating-point operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XmmReg {
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

impl XmmReg {
    /// Get AT&T syntax name for XMM register
    pub fn name(&self) -> &'static str {
        match self {
            XmmReg::Xmm0 => "%xmm0",
            XmmReg::Xmm1 => "%xmm1",
            XmmReg::Xmm2 => "%xmm2",
            XmmReg::Xmm3 => "%xmm3",
            XmmReg::Xmm4 => "%xmm4",
            XmmReg::Xmm5 => "%xmm5",
            XmmReg::Xmm6 => "%xmm6",
            XmmReg::Xmm7 => "%xmm7",
            XmmReg::Xmm8 => "%xmm8",
            XmmReg::Xmm9 => "%xmm9",
            XmmReg::Xmm10 => "%xmm10",
            XmmReg::Xmm11 => "%xmm11",
            XmmReg::Xmm12 => "%xmm12",
            XmmReg::Xmm13 => "%xmm13",
            XmmReg::Xmm14 => "%xmm14",
            XmmReg::Xmm15 => "%xmm15",
        }
    }

    /// Floating-point argument registers (System V AMD64 ABI)
    pub fn arg_regs() -> &'static [XmmReg] {
        &[
            XmmReg::Xmm0,
            XmmReg::Xmm1,
            XmmReg::Xmm2,
            XmmReg::Xmm3,
            XmmReg::Xmm4,
            XmmReg::Xmm5,
            XmmReg::Xmm6,
            XmmReg::Xmm7,
        ]
    }

    /// All allocatable XMM registers.  Every XMM register is caller-saved
    /// on System V.  XMM14 and XMM15 are reserved as scratch.
    pub fn allocatable() -> &'static [XmmReg] {
        &[
            XmmReg::Xmm0,
            XmmReg::Xmm1,
            XmmReg::Xmm2,
            XmmReg::Xmm3,
            XmmReg::Xmm4,
            XmmReg::Xmm5,
            XmmReg::Xmm6,
            XmmReg::Xmm7,
            XmmReg::Xmm8,
            XmmReg::Xmm9,
            XmmReg::Xmm10,
            XmmReg::Xmm11,
            XmmReg::Xmm12,
            XmmReg::Xmm13,
        ]
    }
}

impl fmt::Display for XmmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Operand - Location of a value (register or memory)
// ============================================================================

/// Location of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loc {
    /// In a general-purpose register
    Reg(Reg),
    /// In an XMM register (floating-point)
    Xmm(XmmReg),
    /// On the stack at [rbp - offset]
    Stack(i32),
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loc::Reg(r) => write!(f, "{}", r),
            Loc::Xmm(x) => write!(f, "{}", x),
            Loc::Stack(off) => write!(f, "stack[-{}]", off),
        }
    }
}

// ============================================================================
// Register Allocator (Linear Scan)
// ============================================================================

/// Linear scan register allocator for x86-64.
///
/// Frame layout below the saved frame pointer: callee-saved registers
/// pushed by the prologue, then 8-byte slots for spilled variables,
/// reference cells and incoming reference pointers.
#[derive(Debug, Clone, Default)]
pub struct RegAlloc {
    /// Mapping from variable to location
    locations: BTreeMap<VarId, Loc>,
    /// Reference cells owned by the frame: value at [rbp - offset]
    cells: BTreeMap<VarId, i32>,
    /// Reference parameters: cell address at [rbp - offset]
    ref_pointers: BTreeMap<VarId, i32>,
    /// Bytes of slots handed out so far
    stack_offset: i32,
    /// Bytes used by callee-saved pushes
    callee_area: i32,
    /// Callee-saved registers that were used
    used_callee_saved: Vec<Reg>,
    spill_count: usize,
}

impl RegAlloc {
    /// Allocate every variable of `func` using the first `gp_count`
    /// general-purpose and `fp_count` XMM registers of the pools
    pub fn allocate(
        func: &Function,
        vars: &VarTable,
        liveness: &Liveness,
        gp_count: usize,
        fp_count: usize,
    ) -> Self {
        let gp_pool = &Reg::allocatable()[..gp_count.min(Reg::allocatable().len())];
        let fp_pool = &XmmReg::allocatable()[..fp_count.min(XmmReg::allocatable().len())];

        let mut gp_intervals: Vec<LiveInterval> = Vec::new();
        let mut fp_intervals: Vec<LiveInterval> = Vec::new();
        for iv in liveness.intervals.values() {
            let meta = vars.meta(iv.var);
            if meta.is_reference || meta.ty == VarType::Unit {
                continue;
            }
            if meta.ty.is_double() {
                fp_intervals.push(*iv);
            } else {
                gp_intervals.push(*iv);
            }
        }
        sort_by_start(&mut gp_intervals);
        sort_by_start(&mut fp_intervals);

        let gp = linear_scan(&gp_intervals, gp_pool);
        let fp = linear_scan(&fp_intervals, fp_pool);

        let mut ra = RegAlloc::default();
        for reg in gp_pool {
            if reg.is_callee_saved() && gp.assigned.values().any(|r| r == reg) {
                ra.used_callee_saved.push(*reg);
            }
        }
        ra.callee_area = 8 * ra.used_callee_saved.len() as i32;

        for (var, reg) in &gp.assigned {
            ra.locations.insert(*var, Loc::Reg(*reg));
        }
        for (var, reg) in &fp.assigned {
            ra.locations.insert(*var, Loc::Xmm(*reg));
        }
        let mut spilled: Vec<VarId> = gp.spilled.iter().chain(fp.spilled.iter()).copied().collect();
        spilled.sort();
        for var in spilled {
            let slot = ra.next_slot();
            ra.locations.insert(var, Loc::Stack(slot));
            ra.spill_count += 1;
        }
        for cell in &func.memory_cells {
            let slot = ra.next_slot();
            ra.cells.insert(*cell, slot);
        }
        for param in &func.ref_params {
            let slot = ra.next_slot();
            ra.ref_pointers.insert(*param, slot);
        }

        if ra.spill_count > 0 {
            log::debug!("regalloc: {}: {} spilled", func.name, ra.spill_count);
        }
        ra
    }

    fn next_slot(&mut self) -> i32 {
        self.stack_offset += 8;
        self.callee_area + self.stack_offset
    }

    /// Where a register-class variable lives
    pub fn location(&self, var: VarId) -> Option<Loc> {
        self.locations.get(&var).copied()
    }

    /// Frame offset of a reference cell owned by this function
    pub fn cell_offset(&self, var: VarId) -> Option<i32> {
        self.cells.get(&var).copied()
    }

    /// Frame offset of the slot holding a reference parameter's address
    pub fn ref_pointer_offset(&self, var: VarId) -> Option<i32> {
        self.ref_pointers.get(&var).copied()
    }

    /// Bytes to reserve below the callee-saved pushes.  Together with
    /// those pushes this keeps %rsp 16-byte aligned in the body.
    pub fn stack_size(&self) -> i32 {
        let total = (self.callee_area + self.stack_offset + 15) & !15;
        total - self.callee_area
    }

    /// Get callee-saved registers that need to be preserved
    pub fn callee_saved_used(&self) -> &[Reg] {
        &self.used_callee_saved
    }

    pub fn spill_count(&self) -> usize {
        self.spill_count
    }

    pub fn locations(&self) -> impl Iterator<Item = (VarId, Loc)> + '_ {
        self.locations.iter().map(|(v, l)| (*v, *l))
    }

    /// One line per decision: `%3 -> %rbx`, `%4 -> stack[-16]`
    pub fn dump(&self, vars: &VarTable) -> String {
        let mut out = String::new();
        let name = |v: VarId| {
            vars.meta(v)
                .name
                .as_ref()
                .map(|n| format!(" [{}]", n))
                .unwrap_or_default()
        };
        for (var, loc) in &self.locations {
            let _ = writeln!(out, "{} -> {}{}", var, loc, name(*var));
        }
        for (var, off) in &self.cells {
            let _ = writeln!(out, "{} -> cell[-{}]{}", var, off, name(*var));
        }
        for (var, off) in &self.ref_pointers {
            let _ = writeln!(out, "{} -> ref[-{}]{}", var, off, name(*var));
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================
