//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Property tests over generated programs and control-flow graphs
//

use posixutils_jit::arch::regalloc::Liveness;
use posixutils_jit::arch::x86_64::regalloc::{Loc, RegAlloc};
use posixutils_jit::ast::{BinaryOp, Block, Expr, Program, ProgramBuilder, Stmt, ValueType};
use posixutils_jit::dominate::{dominator_sets, domtree_build};
use posixutils_jit::ir::subst::fold_binop;
use posixutils_jit::ir::{Atom, BinOp, BlockId, Function, FunctionId, Jump, SimpleIr, VarId, VarType};
use posixutils_jit::{CompilationContext, JitConfig};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{TestCaseError, TestRunner};
use std::collections::HashMap;

fn get_test_runner(cases: u32) -> TestRunner {
    TestRunner::new(proptest::test_runner::Config {
        cases,
        failure_persistence: None,
        ..proptest::test_runner::Config::default()
    })
}

// ============================================================================
// Program Generator
// ============================================================================

const VARS: [&str; 4] = ["a", "b", "c", "d"];
const DVARS: [&str; 2] = ["x", "y"];

const OPS: [BinaryOp; 11] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::BitAnd,
    BinaryOp::BitOr,
    BinaryOp::BitXor,
    BinaryOp::Lt,
    BinaryOp::Eq,
    BinaryOp::Gt,
    BinaryOp::And,
    BinaryOp::Or,
];

#[derive(Debug, Clone)]
enum GenExpr {
    Lit(i64),
    Var(usize),
    Bin(BinaryOp, Box<GenExpr>, Box<GenExpr>),
}

/// Double-valued expression; `Int` embeds an integer expression that
/// is widened where it meets a double
#[derive(Debug, Clone)]
enum DExpr {
    Lit(f64),
    Var(usize),
    Int(GenExpr),
    Bin(BinaryOp, Box<DExpr>, Box<DExpr>),
}

const DOPS: [BinaryOp; 3] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul];
const DCMPS: [BinaryOp; 3] = [BinaryOp::Lt, BinaryOp::Eq, BinaryOp::Gt];

type GenAssign = (usize, GenExpr);
type GenDAssign = (usize, DExpr);

#[derive(Debug, Clone)]
enum GenStmt {
    Assign(GenAssign),
    Print(GenExpr),
    If(GenExpr, Vec<GenAssign>, Vec<GenAssign>),
    Loop(i64, i64, Vec<GenAssign>, Option<GenDAssign>),
    DAssign(GenDAssign),
    DPrint(DExpr),
    /// `if (l cmp r) { ... }` over doubles, also printing the comparison
    DIf(BinaryOp, DExpr, DExpr, Vec<GenAssign>),
}

fn expr_strategy() -> impl Strategy<Value = GenExpr> {
    let leaf = prop_oneof![
        (-50i64..50).prop_map(GenExpr::Lit),
        (0..VARS.len()).prop_map(GenExpr::Var),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        (0..OPS.len(), inner.clone(), inner)
            .prop_map(|(op, l, r)| GenExpr::Bin(OPS[op], Box::new(l), Box::new(r)))
    })
}

fn dexpr_strategy() -> impl Strategy<Value = DExpr> {
    let leaf = prop_oneof![
        (-8i32..8).prop_map(|k| DExpr::Lit(k as f64 * 0.25)),
        (0..DVARS.len()).prop_map(DExpr::Var),
        expr_strategy().prop_map(DExpr::Int),
    ];
    leaf.prop_recursive(3, 12, 2, |inner| {
        (0..DOPS.len(), inner.clone(), inner)
            .prop_map(|(op, l, r)| DExpr::Bin(DOPS[op], Box::new(l), Box::new(r)))
    })
}

fn assign_strategy() -> impl Strategy<Value = GenAssign> {
    (0..VARS.len(), expr_strategy())
}

fn dassign_strategy() -> impl Strategy<Value = GenDAssign> {
    (0..DVARS.len(), dexpr_strategy())
}

fn stmt_strategy() -> impl Strategy<Value = GenStmt> {
    prop_oneof![
        assign_strategy().prop_map(GenStmt::Assign),
        expr_strategy().prop_map(GenStmt::Print),
        (
            expr_strategy(),
            vec(assign_strategy(), 0..3),
            vec(assign_strategy(), 0..3)
        )
            .prop_map(|(c, t, e)| GenStmt::If(c, t, e)),
        (
            0i64..3,
            0i64..4,
            vec(assign_strategy(), 1..4),
            proptest::option::of(dassign_strategy())
        )
            .prop_map(|(from, to, body, dbody)| GenStmt::Loop(from, to, body, dbody)),
        dassign_strategy().prop_map(GenStmt::DAssign),
        dexpr_strategy().prop_map(GenStmt::DPrint),
        (
            0..DCMPS.len(),
            dexpr_strategy(),
            dexpr_strategy(),
            vec(assign_strategy(), 0..3)
        )
            .prop_map(|(op, l, r, t)| GenStmt::DIf(DCMPS[op], l, r, t)),
    ]
}

fn program_strategy() -> impl Strategy<Value = Vec<GenStmt>> {
    vec(stmt_strategy(), 1..10)
}

fn to_expr(e: &GenExpr) -> Expr {
    match e {
        GenExpr::Lit(v) => Expr::Int(*v),
        GenExpr::Var(i) => Expr::load(VARS[*i]),
        GenExpr::Bin(op, l, r) => Expr::binary(*op, to_expr(l), to_expr(r)),
    }
}

fn to_dexpr(e: &DExpr) -> Expr {
    match e {
        DExpr::Lit(v) => Expr::Double(*v),
        DExpr::Var(i) => Expr::load(DVARS[*i]),
        DExpr::Int(e) => to_expr(e),
        DExpr::Bin(op, l, r) => Expr::binary(*op, to_dexpr(l), to_dexpr(r)),
    }
}

fn to_block(assigns: &[GenAssign]) -> Block {
    assigns.iter().fold(Block::new(), |b, (v, e)| {
        b.stmt(Stmt::assign(VARS[*v], to_expr(e)))
    })
}

/// `function void body(int a, int b, int c, int d, double x, double y)`
/// called with literals, so that its parameters stay unknown to the
/// optimizer
fn to_program(stmts: &[GenStmt]) -> Program {
    let mut pb = ProgramBuilder::new();
    let mut body = Block::new().var(pb.var("k", ValueType::Int));
    for s in stmts {
        body = body.stmt(match s {
            GenStmt::Assign((v, e)) => Stmt::assign(VARS[*v], to_expr(e)),
            GenStmt::Print(e) => Stmt::Print(vec![to_expr(e), Expr::str(" ")]),
            GenStmt::If(c, t, e) => Stmt::If {
                cond: to_expr(c),
                then_block: to_block(t),
                else_block: Some(to_block(e)),
            },
            GenStmt::Loop(from, to, assigns, dassign) => {
                let mut inner = to_block(assigns);
                if let Some((v, e)) = dassign {
                    inner = inner.stmt(Stmt::assign(DVARS[*v], to_dexpr(e)));
                }
                Stmt::For {
                    var: "k".to_string(),
                    from: Expr::Int(*from),
                    to: Expr::Int(*to),
                    body: inner.stmt(Stmt::Print(vec![Expr::load("a"), Expr::str(";")])),
                }
            }
            GenStmt::DAssign((v, e)) => Stmt::assign(DVARS[*v], to_dexpr(e)),
            GenStmt::DPrint(e) => Stmt::Print(vec![to_dexpr(e), Expr::str(" ")]),
            GenStmt::DIf(op, l, r, t) => {
                let cond = Expr::binary(*op, to_dexpr(l), to_dexpr(r));
                Stmt::If {
                    cond: cond.clone(),
                    then_block: to_block(t).stmt(Stmt::Print(vec![cond, Expr::str("?")])),
                    else_block: None,
                }
            }
        });
    }
    let mut last: Vec<Expr> = VARS.iter().map(|v| Expr::load(v)).collect();
    for v in DVARS {
        last.push(Expr::str(" "));
        last.push(Expr::load(v));
    }
    body = body.stmt(Stmt::Print(last));

    let mut params: Vec<(&str, ValueType)> = VARS.iter().map(|v| (*v, ValueType::Int)).collect();
    params.extend(DVARS.iter().map(|v| (*v, ValueType::Double)));
    let func = pb.function("body", ValueType::Void, &params, body);
    let mut args: Vec<Expr> = (1..=VARS.len() as i64).map(Expr::Int).collect();
    args.push(Expr::Double(0.5));
    args.push(Expr::Double(-1.25));
    pb.program(
        Block::new()
            .function(func)
            .stmt(Stmt::Expr(Expr::call("body", args))),
    )
}

fn lower(program: &Program, optimize: bool) -> Result<SimpleIr, TestCaseError> {
    let ctx = CompilationContext::new(JitConfig {
        optimize,
        ..JitConfig::default()
    });
    ctx.lower(program)
        .map_err(|e| TestCaseError::fail(format!("lowering failed: {}", e)))
}

// ============================================================================
// SSA Form
// ============================================================================

/// Where a variable is defined: block and statement index, with
/// parameters defined before the first statement of the entry
fn collect_defs(func: &Function) -> Result<HashMap<VarId, (BlockId, Option<usize>)>, TestCaseError> {
    let mut defs = HashMap::new();
    for p in &func.params {
        defs.insert(*p, (func.entry, None));
    }
    for bb_id in func.rpo() {
        let Some(bb) = func.get_block(bb_id) else {
            continue;
        };
        for (idx, stmt) in bb.stmts.iter().enumerate() {
            if let Some(var) = stmt.def() {
                if defs.insert(var, (bb_id, Some(idx))).is_some() {
                    return Err(TestCaseError::fail(format!("{} assigned twice", var)));
                }
            }
        }
    }
    Ok(defs)
}

fn check_reaching_def(
    func: &Function,
    defs: &HashMap<VarId, (BlockId, Option<usize>)>,
    var: VarId,
    bb: BlockId,
    idx: Option<usize>,
) -> Result<(), TestCaseError> {
    let Some(&(def_bb, def_idx)) = defs.get(&var) else {
        return Err(TestCaseError::fail(format!("{} read without definition", var)));
    };
    if def_bb == bb {
        // Same block: the definition comes first
        let before = match (def_idx, idx) {
            (None, _) => true,
            (Some(d), Some(u)) => d < u,
            (Some(_), None) => true,
        };
        prop_assert!(before, "{} read before its definition in {}", var, bb);
    } else {
        prop_assert!(func.dominates(def_bb, bb), "{} def in {} does not dominate {}", var, def_bb, bb);
    }
    Ok(())
}

fn check_ssa(ir: &SimpleIr, func: &Function) -> Result<(), TestCaseError> {
    let mut func = func.clone();
    domtree_build(&mut func);
    let defs = collect_defs(&func)?;
    for bb_id in func.rpo() {
        let Some(bb) = func.get_block(bb_id) else {
            continue;
        };
        for (idx, stmt) in bb.stmts.iter().enumerate() {
            if let posixutils_jit::ir::Stmt::Phi { sources, .. } = stmt {
                // Read at the end of the predecessor
                for (pred, src) in sources {
                    check_reaching_def(&func, &defs, *src, *pred, None)?;
                }
                continue;
            }
            for var in stmt.uses() {
                if !ir.vars.meta(var).is_reference {
                    check_reaching_def(&func, &defs, var, bb_id, Some(idx))?;
                }
            }
        }
        if let Some(Jump::Cond {
            cond: Atom::Var(v), ..
        }) = &bb.jump
        {
            check_reaching_def(&func, &defs, *v, bb_id, None)?;
        }
    }
    Ok(())
}

#[test]
fn test_ssa_single_dominating_definition() {
    get_test_runner(64)
        .run(&(program_strategy(), proptest::bool::ANY), |(stmts, optimize)| {
            let ir = lower(&to_program(&stmts), optimize)?;
            for func in ir.functions.iter().filter(|f| !f.is_native()) {
                check_ssa(&ir, func)?;
            }
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Liveness and Allocation
// ============================================================================

fn check_covers(live: &Liveness, var: VarId, pos: usize) -> Result<(), TestCaseError> {
    let Some(iv) = live.interval(var) else {
        return Err(TestCaseError::fail(format!("{} has no interval", var)));
    };
    prop_assert!(
        iv.from <= pos && pos <= iv.to,
        "{} read at {} outside [{}, {}]",
        var,
        pos,
        iv.from,
        iv.to
    );
    Ok(())
}

fn check_liveness(func: &Function) -> Result<(), TestCaseError> {
    let live = Liveness::compute(func);
    for &bb_id in &live.order {
        let (Some(bb), Some(span)) = (func.get_block(bb_id), live.span(bb_id)) else {
            return Err(TestCaseError::fail(format!("{} not laid out", bb_id)));
        };
        for (idx, stmt) in bb.stmts.iter().enumerate() {
            if let posixutils_jit::ir::Stmt::Phi { sources, .. } = stmt {
                // Phi operands are read at the end of their predecessor
                for (pred, src) in sources {
                    if let Some(pred_span) = live.span(*pred) {
                        check_covers(&live, *src, pred_span.end)?;
                    }
                }
                continue;
            }
            for var in stmt.uses() {
                check_covers(&live, var, span.start + idx)?;
            }
        }
        if let Some(Jump::Cond {
            cond: Atom::Var(v), ..
        }) = &bb.jump
        {
            check_covers(&live, *v, span.end)?;
        }
    }
    Ok(())
}

fn check_allocation(ir: &SimpleIr, func: &Function, gp: usize, fp: usize) -> Result<(), TestCaseError> {
    let live = Liveness::compute(func);
    let ra = RegAlloc::allocate(func, &ir.vars, &live, gp, fp);
    let in_regs: Vec<(VarId, Loc)> = ra
        .locations()
        .filter(|(_, loc)| !matches!(loc, Loc::Stack(_)))
        .collect();
    for (i, (u, lu)) in in_regs.iter().enumerate() {
        for (v, lv) in &in_regs[i + 1..] {
            if lu != lv {
                continue;
            }
            let (Some(a), Some(b)) = (live.interval(*u), live.interval(*v)) else {
                return Err(TestCaseError::fail(format!("{} or {} has no interval", u, v)));
            };
            prop_assert!(
                a.to < b.from || b.to < a.from,
                "{} [{}, {}] and {} [{}, {}] share {}",
                u,
                a.from,
                a.to,
                v,
                b.from,
                b.to,
                lu
            );
        }
    }
    Ok(())
}

#[test]
fn test_liveness_intervals_cover_reads() {
    get_test_runner(64)
        .run(&(program_strategy(), proptest::bool::ANY), |(stmts, optimize)| {
            let ir = lower(&to_program(&stmts), optimize)?;
            for func in ir.functions.iter().filter(|f| !f.is_native()) {
                check_liveness(func)?;
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_allocation_never_shares_live_register() {
    get_test_runner(64)
        .run(
            &(program_strategy(), 0usize..=10, 0usize..=14, proptest::bool::ANY),
            |(stmts, gp, fp, optimize)| {
                let ir = lower(&to_program(&stmts), optimize)?;
                for func in ir.functions.iter().filter(|f| !f.is_native()) {
                    check_allocation(&ir, func, gp, fp)?;
                }
                Ok(())
            },
        )
        .unwrap();
}

#[cfg(all(target_arch = "x86_64", unix))]
#[test]
fn test_optimization_preserves_output() {
    get_test_runner(48)
        .run(&program_strategy(), |stmts| {
            let program = to_program(&stmts);
            let mut outputs = Vec::new();
            for optimize in [false, true] {
                let ctx = CompilationContext::new(JitConfig {
                    optimize,
                    ..JitConfig::default()
                });
                let compiled = ctx
                    .compile(&program)
                    .map_err(|e| TestCaseError::fail(format!("compile failed: {}", e)))?;
                outputs.push(compiled.run_captured().1);
            }
            prop_assert_eq!(&outputs[0], &outputs[1]);
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Dominance
// ============================================================================

/// Terminator choice per block: 0 returns, 1 jumps, 2 branches
type GenCfg = Vec<(u8, usize, usize)>;

fn cfg_strategy() -> impl Strategy<Value = GenCfg> {
    (1usize..10).prop_flat_map(|n| vec((0u8..3, 0..n, 0..n), n))
}

fn build_cfg(shape: &GenCfg) -> Function {
    let mut func = Function::new(FunctionId(0), "cfg", VarType::Unit);
    let ids: Vec<BlockId> = shape.iter().map(|_| func.add_block()).collect();
    for (i, (kind, t1, t2)) in shape.iter().enumerate() {
        match kind {
            0 => {
                if let Some(bb) = func.get_block_mut(ids[i]) {
                    bb.stmts.push(posixutils_jit::ir::Stmt::Return(None));
                }
            }
            1 => func.set_jump(ids[i], Jump::Always(ids[*t1])),
            _ => func.set_jump(
                ids[i],
                Jump::Cond {
                    yes: ids[*t1],
                    no: ids[*t2],
                    cond: Atom::Int(1),
                },
            ),
        }
    }
    func
}

#[test]
fn test_dominance_laws() {
    get_test_runner(256)
        .run(&cfg_strategy(), |shape| {
            let mut func = build_cfg(&shape);
            domtree_build(&mut func);
            let sets = dominator_sets(&func);
            let reachable = func.rpo();

            prop_assert_eq!(sets.get(&func.entry).map(|s| s.len()), Some(1));
            for &b in &reachable {
                prop_assert!(func.dominates(b, b));
                prop_assert!(func.dominates(func.entry, b));
                for &a in &reachable {
                    let in_set = sets.get(&b).map(|s| s.contains(&a)).unwrap_or(false);
                    prop_assert_eq!(func.dominates(a, b), in_set, "{} dom {}", a, b);
                    if a != b {
                        prop_assert!(!(func.dominates(a, b) && func.dominates(b, a)));
                    }
                    for &c in &reachable {
                        if func.dominates(a, b) && func.dominates(b, c) {
                            prop_assert!(func.dominates(a, c));
                        }
                    }
                }
            }
            Ok(())
        })
        .unwrap();
}

// ============================================================================
// Constant Folding
// ============================================================================

#[test]
fn test_folding_matches_runtime_semantics() {
    get_test_runner(512)
        .run(&(any::<i64>(), any::<i64>()), |(a, b)| {
            prop_assert_eq!(
                fold_binop(BinOp::Add, Atom::Int(a), Atom::Int(b)),
                Some(Atom::Int(a.wrapping_add(b)))
            );
            prop_assert_eq!(
                fold_binop(BinOp::Mul, Atom::Int(a), Atom::Int(b)),
                Some(Atom::Int(a.wrapping_mul(b)))
            );
            prop_assert_eq!(
                fold_binop(BinOp::Lt, Atom::Int(a), Atom::Int(b)),
                Some(Atom::Int((a < b) as i64))
            );
            // Never folded with a non-literal operand
            prop_assert_eq!(fold_binop(BinOp::Add, Atom::Var(VarId(0)), Atom::Int(b)), None);
            prop_assert_eq!(fold_binop(BinOp::Add, Atom::Int(a), Atom::Var(VarId(1))), None);
            Ok(())
        })
        .unwrap();
}

/// Source operator, the IR operator it lowers to, and whether lowering
/// swaps the operands
const FOLDED_OPS: [(BinaryOp, BinOp, bool); 16] = [
    (BinaryOp::Add, BinOp::Add, false),
    (BinaryOp::Sub, BinOp::Sub, false),
    (BinaryOp::Mul, BinOp::Mul, false),
    (BinaryOp::Div, BinOp::Div, false),
    (BinaryOp::Mod, BinOp::Mod, false),
    (BinaryOp::BitAnd, BinOp::And, false),
    (BinaryOp::BitOr, BinOp::Or, false),
    (BinaryOp::BitXor, BinOp::Xor, false),
    (BinaryOp::And, BinOp::LAnd, false),
    (BinaryOp::Or, BinOp::LOr, false),
    (BinaryOp::Lt, BinOp::Lt, false),
    (BinaryOp::Le, BinOp::Le, false),
    (BinaryOp::Gt, BinOp::Lt, true),
    (BinaryOp::Ge, BinOp::Le, true),
    (BinaryOp::Eq, BinOp::Eq, false),
    (BinaryOp::Neq, BinOp::Neq, false),
];

fn operand_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        any::<i64>(),
        Just(0i64),
        Just(-1i64),
        Just(i64::MIN),
        Just(i64::MAX),
        -8i64..8,
    ]
}

/// `function void f(int p, int q) { print(p op q); } f(a, b);` compiled
/// without optimization, so the operator runs as machine code
#[cfg(all(target_arch = "x86_64", unix))]
#[test]
fn test_folding_matches_generated_code() {
    get_test_runner(128)
        .run(
            &(0..FOLDED_OPS.len(), operand_strategy(), operand_strategy()),
            |(op_index, a, b)| {
                let (ast_op, ir_op, swapped) = FOLDED_OPS[op_index];
                let folded = if swapped {
                    fold_binop(ir_op, Atom::Int(b), Atom::Int(a))
                } else {
                    fold_binop(ir_op, Atom::Int(a), Atom::Int(b))
                };
                // Division traps at runtime exactly where folding declines
                let Some(Atom::Int(expected)) = folded else {
                    return Ok(());
                };

                let mut pb = ProgramBuilder::new();
                let body = Block::new().stmt(Stmt::Print(vec![Expr::binary(
                    ast_op,
                    Expr::load("p"),
                    Expr::load("q"),
                )]));
                let func = pb.function(
                    "f",
                    ValueType::Void,
                    &[("p", ValueType::Int), ("q", ValueType::Int)],
                    body,
                );
                let program = pb.program(
                    Block::new()
                        .function(func)
                        .stmt(Stmt::Expr(Expr::call("f", vec![Expr::Int(a), Expr::Int(b)]))),
                );
                let ctx = CompilationContext::new(JitConfig {
                    optimize: false,
                    ..JitConfig::default()
                });
                let compiled = ctx
                    .compile(&program)
                    .map_err(|e| TestCaseError::fail(format!("compile failed: {}", e)))?;
                let output = compiled.run_captured().1;
                prop_assert_eq!(output, expected.to_string(), "{} {:?} {}", a, ast_op, b);
                Ok(())
            },
        )
        .unwrap();
}
