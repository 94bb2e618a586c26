//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Calls: arguments, recursion, natives
//

use crate::common::{add, bin, dbl, int, load, print, ret, run_program, run_program_with_natives};
use posixutils_jit::ast::{BinaryOp, Block, Expr, ProgramBuilder, Stmt, ValueType};
use test_log::test;

#[test]
fn test_call_returns_value() {
    // function int f(int x) { return x + 1; } print(f(41));
    let mut pb = ProgramBuilder::new();
    let f = pb.function(
        "f",
        ValueType::Int,
        &[("x", ValueType::Int)],
        Block::new().stmt(ret(add(load("x"), int(1)))),
    );
    let prog = pb.program(
        Block::new()
            .function(f)
            .stmt(print(vec![Expr::call("f", vec![int(41)])])),
    );
    assert_eq!(run_program(&prog), "42");
}

#[test]
fn test_recursion() {
    // fib(n) = n < 2 ? n : fib(n - 1) + fib(n - 2)
    let mut pb = ProgramBuilder::new();
    let fib = pb.function(
        "fib",
        ValueType::Int,
        &[("n", ValueType::Int)],
        Block::new()
            .stmt(Stmt::If {
                cond: bin(BinaryOp::Lt, load("n"), int(2)),
                then_block: Block::new().stmt(ret(load("n"))),
                else_block: None,
            })
            .stmt(ret(add(
                Expr::call("fib", vec![bin(BinaryOp::Sub, load("n"), int(1))]),
                Expr::call("fib", vec![bin(BinaryOp::Sub, load("n"), int(2))]),
            ))),
    );
    let prog = pb.program(
        Block::new()
            .function(fib)
            .stmt(print(vec![Expr::call("fib", vec![int(20)])])),
    );
    assert_eq!(run_program(&prog), "6765");
}

#[test]
fn test_many_arguments_use_the_stack() {
    // Eight ints and ten doubles: two of each travel in memory
    let mut pb = ProgramBuilder::new();
    let int_names = ["a", "b", "c", "d", "e", "f", "g", "h"];
    let dbl_names = ["p", "q", "r", "s", "t", "u", "v", "w", "y", "z"];
    let mut params: Vec<(&str, ValueType)> = Vec::new();
    for (i, d) in int_names.iter().zip(dbl_names.iter()) {
        params.push((*i, ValueType::Int));
        params.push((*d, ValueType::Double));
    }
    for d in &dbl_names[int_names.len()..] {
        params.push((*d, ValueType::Double));
    }

    // Weighted sums so that any swapped argument shows
    let mut isum = int(0);
    for (k, name) in int_names.iter().enumerate() {
        isum = add(isum, bin(BinaryOp::Mul, load(name), int(k as i64 + 1)));
    }
    let mut dsum = dbl(0.0);
    for (k, name) in dbl_names.iter().enumerate() {
        dsum = add(dsum, bin(BinaryOp::Mul, load(name), dbl(k as f64 + 1.0)));
    }
    let body = Block::new().stmt(print(vec![isum, Expr::str(" "), dsum]));
    let f = pb.function("f", ValueType::Void, &params, body);

    let mut args = Vec::new();
    for k in 0..8 {
        args.push(int(k + 1));
        args.push(dbl(0.5));
    }
    args.push(dbl(0.5));
    args.push(dbl(0.5));
    let prog = pb.program(
        Block::new()
            .function(f)
            .stmt(Stmt::Expr(Expr::call("f", args))),
    );
    // 1*1 + 2*2 + ... + 8*8 = 204; 0.5 * (1 + ... + 10) = 27.5
    assert_eq!(run_program(&prog), "204 27.5");
}

#[test]
fn test_double_return_and_int_argument_widening() {
    let mut pb = ProgramBuilder::new();
    let half = pb.function(
        "half",
        ValueType::Double,
        &[("x", ValueType::Double)],
        Block::new().stmt(ret(bin(BinaryOp::Div, load("x"), int(2)))),
    );
    let prog = pb.program(
        Block::new()
            .function(half)
            .stmt(print(vec![Expr::call("half", vec![int(5)])])),
    );
    assert_eq!(run_program(&prog), "2.5");
}

#[test]
fn test_libc_native() {
    let mut pb = ProgramBuilder::new();
    let abs = pb.native("abs", ValueType::Int, &[("v", ValueType::Int)], "labs");
    let prog = pb.program(
        Block::new()
            .function(abs)
            .stmt(print(vec![Expr::call("abs", vec![int(-17)])])),
    );
    assert_eq!(run_program(&prog), "17");
}

extern "C" fn host_scale(v: i64, factor: f64) -> f64 {
    v as f64 * factor
}

#[test]
fn test_registered_native() {
    let mut pb = ProgramBuilder::new();
    let scale = pb.native(
        "scale",
        ValueType::Double,
        &[("v", ValueType::Int), ("factor", ValueType::Double)],
        "host_scale",
    );
    let n = pb.var("n", ValueType::Int);
    let prog = pb.program(
        Block::new()
            .var(n)
            .function(scale)
            .stmt(Stmt::assign("n", int(3)))
            .stmt(print(vec![
                Expr::call("scale", vec![load("n"), dbl(1.5)]),
                Expr::str(","),
                load("n"),
            ])),
    );
    let natives = [("host_scale", host_scale as usize)];
    assert_eq!(run_program_with_natives(&prog, &natives), "4.5,3");
}

#[test]
fn test_values_survive_calls() {
    // Locals live across a call keep their values
    let mut pb = ProgramBuilder::new();
    let id = pb.function(
        "id",
        ValueType::Int,
        &[("v", ValueType::Int)],
        Block::new().stmt(ret(load("v"))),
    );
    let mut top = Block::new().function(id);
    let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l"];
    for name in &names {
        top = top.var(pb.var(name, ValueType::Int));
    }
    let x = pb.var("x", ValueType::Double);
    top = top.var(x).stmt(Stmt::assign("x", dbl(0.25)));
    for (k, name) in names.iter().enumerate() {
        top = top.stmt(Stmt::assign(name, Expr::call("id", vec![int(k as i64)])));
    }
    let mut sum = load("x");
    for name in &names {
        sum = add(sum, load(name));
    }
    top = top.stmt(print(vec![sum]));
    // 0 + 1 + ... + 11 = 66
    assert_eq!(run_program(&pb.program(top)), "66.25");
}
