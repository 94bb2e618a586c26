//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Nested functions reading and writing outer variables
//

use crate::common::{add, dbl, int, load, print, ret, run_program};
use posixutils_jit::ast::{Block, Expr, ProgramBuilder, Stmt, StoreOp, ValueType};
use test_log::test;

#[test]
fn test_mutation_visible_after_call() {
    // int x; x = 1; function void inc() { x += 1; } inc(); print(x); inc(); print(x);
    let mut pb = ProgramBuilder::new();
    let x = pb.var("x", ValueType::Int);
    let inc = pb.function(
        "inc",
        ValueType::Void,
        &[],
        Block::new().stmt(Stmt::store("x", StoreOp::AddAssign, int(1))),
    );
    let prog = pb.program(
        Block::new()
            .var(x)
            .function(inc)
            .stmt(Stmt::assign("x", int(1)))
            .stmt(Stmt::Expr(Expr::call("inc", vec![])))
            .stmt(print(vec![load("x")]))
            .stmt(Stmt::Expr(Expr::call("inc", vec![])))
            .stmt(print(vec![load("x")])),
    );
    assert_eq!(run_program(&prog), "23");
}

#[test]
fn test_mutation_through_intermediate_call() {
    // outer() never names x but calls inc(), which writes it
    let mut pb = ProgramBuilder::new();
    let x = pb.var("x", ValueType::Int);
    let inc = pb.function(
        "inc",
        ValueType::Void,
        &[("by", ValueType::Int)],
        Block::new().stmt(Stmt::store("x", StoreOp::AddAssign, load("by"))),
    );
    let outer = pb.function(
        "outer",
        ValueType::Void,
        &[],
        Block::new()
            .stmt(Stmt::Expr(Expr::call("inc", vec![int(10)])))
            .stmt(Stmt::Expr(Expr::call("inc", vec![int(5)]))),
    );
    let prog = pb.program(
        Block::new()
            .var(x)
            .function(inc)
            .function(outer)
            .stmt(Stmt::assign("x", int(1)))
            .stmt(Stmt::Expr(Expr::call("outer", vec![])))
            .stmt(print(vec![load("x")])),
    );
    assert_eq!(run_program(&prog), "16");
}

#[test]
fn test_read_only_capture_by_value() {
    let mut pb = ProgramBuilder::new();
    let base = pb.var("base", ValueType::Int);
    let plus = pb.function(
        "plus",
        ValueType::Int,
        &[("v", ValueType::Int)],
        Block::new().stmt(ret(add(load("base"), load("v")))),
    );
    let prog = pb.program(
        Block::new()
            .var(base)
            .function(plus)
            .stmt(Stmt::assign("base", int(100)))
            .stmt(print(vec![Expr::call("plus", vec![int(7)])]))
            .stmt(Stmt::assign("base", int(200)))
            .stmt(print(vec![Expr::call("plus", vec![int(7)])])),
    );
    assert_eq!(run_program(&prog), "107207");
}

#[test]
fn test_double_cell_in_loop() {
    // A boxed double accumulated by a closure inside a loop
    let mut pb = ProgramBuilder::new();
    let total = pb.var("total", ValueType::Double);
    let i = pb.var("i", ValueType::Int);
    let accumulate = pb.function(
        "accumulate",
        ValueType::Void,
        &[("v", ValueType::Int)],
        Block::new().stmt(Stmt::store("total", StoreOp::AddAssign, add(load("v"), dbl(0.25)))),
    );
    let prog = pb.program(
        Block::new()
            .var(total)
            .var(i)
            .function(accumulate)
            .stmt(Stmt::For {
                var: "i".to_string(),
                from: int(1),
                to: int(4),
                body: Block::new().stmt(Stmt::Expr(Expr::call("accumulate", vec![load("i")]))),
            })
            .stmt(print(vec![load("total")])),
    );
    // (1 + 2 + 3 + 4) + 4 * 0.25
    assert_eq!(run_program(&prog), "11");
}

#[test]
fn test_nested_function_owns_cell() {
    // counter() declares its own local n and a nested bump() that writes it
    let mut pb = ProgramBuilder::new();
    let n = pb.var("n", ValueType::Int);
    let bump = pb.function(
        "bump",
        ValueType::Void,
        &[],
        Block::new().stmt(Stmt::store("n", StoreOp::AddAssign, int(2))),
    );
    let counter = pb.function(
        "counter",
        ValueType::Int,
        &[],
        Block::new()
            .var(n)
            .function(bump)
            .stmt(Stmt::assign("n", int(1)))
            .stmt(Stmt::Expr(Expr::call("bump", vec![])))
            .stmt(Stmt::Expr(Expr::call("bump", vec![])))
            .stmt(ret(load("n"))),
    );
    let prog = pb.program(
        Block::new()
            .function(counter)
            .stmt(print(vec![Expr::call("counter", vec![])])),
    );
    assert_eq!(run_program(&prog), "5");
}
