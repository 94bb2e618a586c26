//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Common test utilities for mvjit integration tests
//

#![allow(dead_code)]

use posixutils_jit::ast::{BinaryOp, Expr, Program, Stmt};
use posixutils_jit::{CompilationContext, CompiledProgram, JitConfig, Value};

// ============================================================================
// Compile Matrix Configuration
// ============================================================================

/// Every program is run under each of these and must print the same
/// thing: optimized, unoptimized, under register pressure, and with
/// every value in memory.
pub fn config_matrix() -> Vec<(&'static str, JitConfig)> {
    vec![
        ("default", JitConfig::default()),
        (
            "no_opt",
            JitConfig {
                optimize: false,
                ..JitConfig::default()
            },
        ),
        (
            "tight_regs",
            JitConfig {
                gp_registers: 2,
                fp_registers: 2,
                ..JitConfig::default()
            },
        ),
        (
            "all_spilled",
            JitConfig {
                optimize: false,
                gp_registers: 0,
                fp_registers: 0,
                ..JitConfig::default()
            },
        ),
    ]
}

// ============================================================================
// Compile and Run
// ============================================================================

pub fn compile_with(ctx: &CompilationContext, program: &Program) -> CompiledProgram {
    match ctx.compile(program) {
        Ok(compiled) => compiled,
        Err(e) => panic!("compilation failed: {}", e),
    }
}

/// Compile under `config` and run, returning the result and the output
pub fn run_with_config(program: &Program, config: JitConfig) -> (Value, String) {
    let ctx = CompilationContext::new(config);
    compile_with(&ctx, program).run_captured()
}

/// Run under the whole matrix, check every configuration agrees, and
/// return the output
pub fn run_program(program: &Program) -> String {
    run_program_with_natives(program, &[])
}

pub fn run_program_with_natives(program: &Program, natives: &[(&str, usize)]) -> String {
    let mut expected: Option<String> = None;
    for (name, config) in config_matrix() {
        let mut ctx = CompilationContext::new(config);
        for (symbol, address) in natives {
            ctx.register_native(symbol, *address);
        }
        let (value, output) = compile_with(&ctx, program).run_captured();
        assert_eq!(value, Value::Unit, "config {}", name);
        match &expected {
            None => expected = Some(output),
            Some(e) => assert_eq!(&output, e, "config {} disagrees", name),
        }
    }
    expected.unwrap_or_default()
}

// ============================================================================
// AST Shorthand
// ============================================================================

pub fn int(v: i64) -> Expr {
    Expr::Int(v)
}

pub fn dbl(v: f64) -> Expr {
    Expr::Double(v)
}

pub fn load(name: &str) -> Expr {
    Expr::load(name)
}

pub fn bin(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::binary(op, left, right)
}

pub fn add(left: Expr, right: Expr) -> Expr {
    bin(BinaryOp::Add, left, right)
}

pub fn print(args: Vec<Expr>) -> Stmt {
    Stmt::Print(args)
}

pub fn ret(value: Expr) -> Stmt {
    Stmt::Return(Some(value))
}
