//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Arithmetic, conversions, strings and register pressure
//

use crate::common::{add, bin, dbl, int, load, print, run_program};
use posixutils_jit::ast::{BinaryOp, Block, Expr, ProgramBuilder, Stmt, UnaryOp, ValueType};
use test_log::test;

#[test]
fn test_mixed_division_promotes() {
    // double d; d = 1 / 2; print(d);
    let mut pb = ProgramBuilder::new();
    let d = pb.var("d", ValueType::Double);
    let prog = pb.program(
        Block::new()
            .var(d)
            .stmt(Stmt::assign("d", bin(BinaryOp::Div, int(1), int(2))))
            .stmt(print(vec![load("d")])),
    );
    assert_eq!(run_program(&prog), "0.5");
}

#[test]
fn test_integer_division_and_remainder() {
    let mut pb = ProgramBuilder::new();
    let a = pb.var("a", ValueType::Int);
    let b = pb.var("b", ValueType::Int);
    let sep = || Expr::str(" ");
    let prog = pb.program(
        Block::new()
            .var(a)
            .var(b)
            .stmt(Stmt::assign("a", int(-7)))
            .stmt(Stmt::assign("b", int(2)))
            .stmt(print(vec![
                bin(BinaryOp::Div, load("a"), load("b")),
                sep(),
                bin(BinaryOp::Mod, load("a"), load("b")),
                sep(),
                bin(BinaryOp::Div, load("a"), int(3)),
                sep(),
                bin(BinaryOp::Mod, int(100), load("a")),
            ])),
    );
    assert_eq!(run_program(&prog), "-3 -1 -2 2");
}

#[test]
fn test_double_arithmetic_and_compare() {
    let mut pb = ProgramBuilder::new();
    let x = pb.var("x", ValueType::Double);
    let y = pb.var("y", ValueType::Double);
    let prog = pb.program(
        Block::new()
            .var(x)
            .var(y)
            .stmt(Stmt::assign("x", dbl(1.5)))
            .stmt(Stmt::assign("y", bin(BinaryOp::Mul, load("x"), int(3))))
            .stmt(print(vec![
                load("y"),
                Expr::str(","),
                bin(BinaryOp::Sub, load("x"), load("y")),
                Expr::str(","),
                Expr::unary(UnaryOp::Neg, load("x")),
                Expr::str(","),
                bin(BinaryOp::Lt, load("x"), load("y")),
                bin(BinaryOp::Gt, load("x"), load("y")),
                bin(BinaryOp::Le, load("y"), dbl(4.5)),
                bin(BinaryOp::Eq, load("y"), dbl(4.5)),
                bin(BinaryOp::Neq, load("y"), dbl(4.5)),
                bin(BinaryOp::Ge, int(2), load("x")),
            ])),
    );
    assert_eq!(run_program(&prog), "4.5,-3,-1.5,101101");
}

#[test]
fn test_double_print_significant_digits() {
    // double d; d = 1.0 / 3.0; print(d, " ", d * 3703701.0, " ", d / 30000.0);
    let mut pb = ProgramBuilder::new();
    let d = pb.var("d", ValueType::Double);
    let prog = pb.program(
        Block::new()
            .var(d)
            .stmt(Stmt::assign("d", bin(BinaryOp::Div, dbl(1.0), dbl(3.0))))
            .stmt(print(vec![
                load("d"),
                Expr::str(" "),
                bin(BinaryOp::Mul, load("d"), dbl(3703701.0)),
                Expr::str(" "),
                bin(BinaryOp::Div, load("d"), dbl(30000.0)),
            ])),
    );
    assert_eq!(run_program(&prog), "0.333333 1.23457e+06 1.11111e-05");
}

#[test]
fn test_truncating_assignment() {
    let mut pb = ProgramBuilder::new();
    let i = pb.var("i", ValueType::Int);
    let j = pb.var("j", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(i)
            .var(j)
            .stmt(Stmt::assign("i", dbl(7.9)))
            .stmt(Stmt::assign("j", Expr::unary(UnaryOp::Neg, dbl(7.9))))
            .stmt(print(vec![load("i"), Expr::str(" "), load("j")])),
    );
    assert_eq!(run_program(&prog), "7 -7");
}

#[test]
fn test_wide_constants_and_bit_ops() {
    let mut pb = ProgramBuilder::new();
    let big = pb.var("big", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(big)
            .stmt(Stmt::assign("big", int(1 << 40)))
            .stmt(print(vec![
                add(load("big"), int(5_000_000_000)),
                Expr::str(" "),
                bin(BinaryOp::BitAnd, load("big"), int(0xff)),
                Expr::str(" "),
                bin(BinaryOp::BitOr, int(12), int(3)),
                Expr::str(" "),
                bin(BinaryOp::BitXor, int(12), int(10)),
                Expr::str(" "),
                Expr::unary(UnaryOp::Not, load("big")),
                Expr::unary(UnaryOp::Not, int(0)),
            ])),
    );
    let expected = format!("{} 0 15 6 01", (1i64 << 40) + 5_000_000_000);
    assert_eq!(run_program(&prog), expected);
}

#[test]
fn test_string_values() {
    let mut pb = ProgramBuilder::new();
    let s = pb.var("s", ValueType::String);
    let prog = pb.program(
        Block::new()
            .var(s)
            .stmt(print(vec![Expr::str("["), load("s"), Expr::str("]")]))
            .stmt(Stmt::assign("s", Expr::str("hello")))
            .stmt(print(vec![load("s"), Expr::str(", "), load("s")])),
    );
    assert_eq!(run_program(&prog), "[]hello, hello");
}

#[test]
fn test_more_live_values_than_registers() {
    // Sixteen ints and sixteen doubles all live at once, derived from a
    // call result so that nothing folds away
    let mut pb = ProgramBuilder::new();
    let zero = pb.function("zero", ValueType::Int, &[], Block::new().stmt(Stmt::Return(Some(int(0)))));
    let seed = pb.var("seed", ValueType::Int);
    let mut top = Block::new()
        .function(zero)
        .var(seed)
        .stmt(Stmt::assign("seed", Expr::call("zero", vec![])));
    for k in 0..16 {
        top = top
            .var(pb.var(&format!("i{}", k), ValueType::Int))
            .var(pb.var(&format!("d{}", k), ValueType::Double));
    }
    for k in 0..16 {
        top = top
            .stmt(Stmt::assign(&format!("i{}", k), add(load("seed"), int(k * 3 + 1))))
            .stmt(Stmt::assign(
                &format!("d{}", k),
                add(load("seed"), dbl(k as f64 + 0.5)),
            ));
    }
    // Read them back in reverse so every value stays live until the end
    let mut isum = int(0);
    let mut dsum = dbl(0.0);
    for k in (0..16).rev() {
        isum = add(
            bin(BinaryOp::Mul, isum, int(3)),
            load(&format!("i{}", k)),
        );
        dsum = add(dsum, load(&format!("d{}", k)));
    }
    top = top.stmt(print(vec![isum, Expr::str(" "), dsum]));

    let expected_i = (0..16i64).rev().fold(0i64, |acc, k| acc * 3 + (k * 3 + 1));
    let expected_d: f64 = (0..16).rev().fold(0.0, |acc, k| acc + (k as f64 + 0.5));
    assert_eq!(
        run_program(&pb.program(top)),
        format!("{} {}", expected_i, expected_d)
    );
}
