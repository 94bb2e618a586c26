//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Compiler configuration
//

use crate::arch::x86_64::regalloc::{Reg, XmmReg};
use crate::opt::MAX_ITERATIONS;

/// Knobs for one compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitConfig {
    /// Run the optimizer to its fixpoint
    pub optimize: bool,
    /// Cap on optimizer rounds
    pub max_opt_iterations: usize,
    /// General-purpose registers handed to the allocator
    pub gp_registers: usize,
    /// XMM registers handed to the allocator
    pub fp_registers: usize,
    /// Log and keep the SSA IR dump
    pub dump_ir: bool,
    /// Log and keep the register assignment dump
    pub dump_regalloc: bool,
    /// Keep the generated code as AT&T text
    pub dump_asm: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            optimize: true,
            max_opt_iterations: MAX_ITERATIONS,
            gp_registers: Reg::allocatable().len(),
            fp_registers: XmmReg::allocatable().len(),
            dump_ir: false,
            dump_regalloc: false,
            dump_asm: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    Some(!matches!(value.as_str(), "" | "0" | "false" | "no"))
}

fn env_count(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            log::warn!("config: ignoring {}={:?}: not a number", name, value);
            None
        }
    }
}

impl JitConfig {
    /// Defaults overlaid with `MVJIT_*` environment settings
    pub fn from_env() -> Self {
        let mut config = JitConfig::default();
        if let Some(off) = env_flag("MVJIT_NO_OPT") {
            config.optimize = !off;
        }
        if let Some(n) = env_count("MVJIT_OPT_ITERATIONS") {
            config.max_opt_iterations = n;
        }
        if let Some(n) = env_count("MVJIT_GP_REGS") {
            config.gp_registers = n;
        }
        if let Some(n) = env_count("MVJIT_FP_REGS") {
            config.fp_registers = n;
        }
        if let Some(on) = env_flag("MVJIT_DUMP_IR") {
            config.dump_ir = on;
        }
        if let Some(on) = env_flag("MVJIT_DUMP_REGALLOC") {
            config.dump_regalloc = on;
        }
        if let Some(on) = env_flag("MVJIT_DUMP_ASM") {
            config.dump_asm = on;
        }
        config.clamped()
    }

    /// Register counts limited to what the hardware pools hold
    pub fn clamped(mut self) -> Self {
        self.gp_registers = self.gp_registers.min(Reg::allocatable().len());
        self.fp_registers = self.fp_registers.min(XmmReg::allocatable().len());
        self
    }
}
