//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// IR, register allocation and assembly dumps
//

use crate::common::{add, compile_with, int, load, print};
use posixutils_jit::ast::{Block, Program, ProgramBuilder, Stmt, StoreOp, ValueType};
use posixutils_jit::{CompilationContext, JitConfig, Value};
use test_log::test;

// int s; int i; s = 0; for (i in 1..4) { s += i; } print(s + 0);
fn loop_program() -> Program {
    let mut pb = ProgramBuilder::new();
    let s = pb.var("s", ValueType::Int);
    let i = pb.var("i", ValueType::Int);
    pb.program(
        Block::new()
            .var(s)
            .var(i)
            .stmt(Stmt::assign("s", int(0)))
            .stmt(Stmt::For {
                var: "i".to_string(),
                from: int(1),
                to: int(4),
                body: Block::new().stmt(Stmt::store("s", StoreOp::AddAssign, load("i"))),
            })
            .stmt(print(vec![add(load("s"), int(0))])),
    )
}

fn dumping(config: JitConfig) -> JitConfig {
    JitConfig {
        dump_ir: true,
        dump_regalloc: true,
        dump_asm: true,
        ..config
    }
}

#[test]
fn test_dumps_off_by_default() {
    let ctx = CompilationContext::new(JitConfig::default());
    let compiled = compile_with(&ctx, &loop_program());
    assert!(compiled.ir_dump().is_none());
    assert!(compiled.regalloc_dump().is_none());
    assert!(compiled.disassembly().is_none());
    assert!(compiled.code_size() > 0);
}

#[test]
fn test_dumps_in_registers() {
    let ctx = CompilationContext::new(dumping(JitConfig {
        optimize: false,
        ..JitConfig::default()
    }));
    let compiled = compile_with(&ctx, &loop_program());

    let ir = compiled.ir_dump().unwrap();
    assert!(ir.contains("<top>"), "{}", ir);
    assert!(
        ir.lines().any(|l| l.contains(" = phi(")),
        "loop-carried values need phis:\n{}",
        ir
    );

    let ra = compiled.regalloc_dump().unwrap();
    assert!(ra.starts_with("<top>:"), "{}", ra);
    assert!(
        ra.lines().any(|l| l.starts_with('%') && l.contains(" -> %")),
        "{}",
        ra
    );

    let asm = compiled.disassembly().unwrap();
    assert!(asm.starts_with("<top>:\n"), "{}", asm);
    assert!(asm.lines().any(|l| l == "    ret"), "{}", asm);
    assert!(asm.lines().any(|l| l.starts_with("    call")), "{}", asm);
    assert!(asm.contains("%r"), "{}", asm);

    let (value, out) = compiled.run_captured();
    assert_eq!(value, Value::Unit);
    assert_eq!(out, "10");
}

#[test]
fn test_regalloc_dump_shows_stack_slots() {
    let ctx = CompilationContext::new(dumping(JitConfig {
        optimize: false,
        gp_registers: 0,
        fp_registers: 0,
        ..JitConfig::default()
    }));
    let compiled = compile_with(&ctx, &loop_program());

    let ra = compiled.regalloc_dump().unwrap();
    assert!(
        ra.lines().any(|l| l.contains(" -> stack[-")),
        "{}",
        ra
    );
    assert!(!ra.lines().any(|l| l.contains(" -> %")), "{}", ra);

    let asm = compiled.disassembly().unwrap();
    assert!(asm.lines().any(|l| l == "    pushq %rbp"), "{}", asm);
    assert_eq!(compiled.run_captured().1, "10");
}
