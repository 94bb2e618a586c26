//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Loops, conditionals and phi resolution
//

use crate::common::{add, bin, int, load, print, run_program};
use posixutils_jit::ast::{BinaryOp, Block, Expr, ProgramBuilder, Stmt, StoreOp, ValueType};
use test_log::test;

#[test]
fn test_for_loop_inclusive() {
    // int i; for (i in 1..3) { print(i); }
    let mut pb = ProgramBuilder::new();
    let i = pb.var("i", ValueType::Int);
    let prog = pb.program(Block::new().var(i).stmt(Stmt::For {
        var: "i".to_string(),
        from: int(1),
        to: int(3),
        body: Block::new().stmt(print(vec![load("i")])),
    }));
    assert_eq!(run_program(&prog), "123");
}

#[test]
fn test_for_bound_reevaluated_each_iteration() {
    // n = 3; for (i in 1..n) { n -= 1; print(i); }
    let mut pb = ProgramBuilder::new();
    let i = pb.var("i", ValueType::Int);
    let n = pb.var("n", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(i)
            .var(n)
            .stmt(Stmt::assign("n", int(3)))
            .stmt(Stmt::For {
                var: "i".to_string(),
                from: int(1),
                to: load("n"),
                body: Block::new()
                    .stmt(Stmt::store("n", StoreOp::SubAssign, int(1)))
                    .stmt(print(vec![load("i")])),
            }),
    );
    assert_eq!(run_program(&prog), "12");
}

#[test]
fn test_while_with_if_else() {
    // n = 0; while (n < 6) { if (n % 2 == 0) print(n) else print("-"); n += 1; }
    let mut pb = ProgramBuilder::new();
    let n = pb.var("n", ValueType::Int);
    let body = Block::new()
        .stmt(Stmt::If {
            cond: bin(
                BinaryOp::Eq,
                bin(BinaryOp::Mod, load("n"), int(2)),
                int(0),
            ),
            then_block: Block::new().stmt(print(vec![load("n")])),
            else_block: Some(Block::new().stmt(print(vec![Expr::str("-")]))),
        })
        .stmt(Stmt::store("n", StoreOp::AddAssign, int(1)));
    let prog = pb.program(
        Block::new()
            .var(n)
            .stmt(Stmt::assign("n", int(0)))
            .stmt(Stmt::While {
                cond: bin(BinaryOp::Lt, load("n"), int(6)),
                body,
            }),
    );
    assert_eq!(run_program(&prog), "0-2-4-");
}

#[test]
fn test_swap_in_loop() {
    // Loop-carried swap forces a phi move cycle
    let mut pb = ProgramBuilder::new();
    let a = pb.var("a", ValueType::Int);
    let b = pb.var("b", ValueType::Int);
    let t = pb.var("t", ValueType::Int);
    let i = pb.var("i", ValueType::Int);
    let body = Block::new()
        .stmt(Stmt::assign("t", load("a")))
        .stmt(Stmt::assign("a", load("b")))
        .stmt(Stmt::assign("b", load("t")))
        .stmt(print(vec![load("a")]));
    let prog = pb.program(
        Block::new()
            .var(a)
            .var(b)
            .var(t)
            .var(i)
            .stmt(Stmt::assign("a", int(1)))
            .stmt(Stmt::assign("b", int(2)))
            .stmt(Stmt::For {
                var: "i".to_string(),
                from: int(1),
                to: int(5),
                body,
            })
            .stmt(print(vec![load("b")])),
    );
    assert_eq!(run_program(&prog), "212121");
}

#[test]
fn test_nested_loops_sum() {
    let mut pb = ProgramBuilder::new();
    let i = pb.var("i", ValueType::Int);
    let j = pb.var("j", ValueType::Int);
    let s = pb.var("s", ValueType::Int);
    let inner = Block::new().stmt(Stmt::store(
        "s",
        StoreOp::AddAssign,
        bin(BinaryOp::Mul, load("i"), load("j")),
    ));
    let outer = Block::new().stmt(Stmt::For {
        var: "j".to_string(),
        from: int(1),
        to: load("i"),
        body: inner,
    });
    let prog = pb.program(
        Block::new()
            .var(i)
            .var(j)
            .var(s)
            .stmt(Stmt::For {
                var: "i".to_string(),
                from: int(1),
                to: int(10),
                body: outer,
            })
            .stmt(print(vec![load("s")])),
    );
    // sum over i of i * i(i+1)/2 for i = 1..10
    let expected: i64 = (1..=10).map(|i: i64| i * i * (i + 1) / 2).sum();
    assert_eq!(run_program(&prog), expected.to_string());
}

#[test]
fn test_logical_operators_evaluate_both_sides() {
    let mut pb = ProgramBuilder::new();
    let x = pb.var("x", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(x)
            .stmt(Stmt::assign("x", int(5)))
            .stmt(print(vec![
                bin(BinaryOp::And, load("x"), int(0)),
                bin(BinaryOp::And, load("x"), int(-3)),
                bin(BinaryOp::Or, int(0), load("x")),
                bin(BinaryOp::Or, int(0), int(0)),
                bin(BinaryOp::Gt, load("x"), int(4)),
                bin(BinaryOp::Ge, load("x"), int(6)),
                bin(BinaryOp::Neq, load("x"), int(5)),
            ])),
    );
    assert_eq!(run_program(&prog), "0110100");
}

#[test]
fn test_countdown_with_subtract_assign() {
    let mut pb = ProgramBuilder::new();
    let n = pb.var("n", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(n)
            .stmt(Stmt::assign("n", int(3)))
            .stmt(Stmt::While {
                cond: bin(BinaryOp::Gt, load("n"), int(0)),
                body: Block::new()
                    .stmt(print(vec![load("n")]))
                    .stmt(Stmt::store("n", StoreOp::SubAssign, int(1))),
            })
            .stmt(print(vec![add(load("n"), int(10))])),
    );
    assert_eq!(run_program(&prog), "32110");
}
