//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Abstract syntax tree consumed by the mvjit compiler
//
// The parser lives outside this crate.  This module only defines the
// tree it hands over: functions with lexical scopes, statements and
// expressions whose identifiers are still plain names.  Declarations
// carry parser-assigned ids so the closure analyzer and the IR builder
// agree on variable identity even when names are shadowed.
//

use std::fmt;

// ============================================================================
// Identifiers and Types
// ============================================================================

/// Identity of one variable declaration (parameter or local)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AstVarId(pub u32);

/// Identity of one function declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AstFunctionId(pub u32);

/// Source-level value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Void,
    Int,
    Double,
    String,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Void => write!(f, "void"),
            ValueType::Int => write!(f, "int"),
            ValueType::Double => write!(f, "double"),
            ValueType::String => write!(f, "string"),
        }
    }
}

// ============================================================================
// Declarations
// ============================================================================

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub id: AstVarId,
    pub name: String,
    pub ty: ValueType,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    /// Ordinary function with a body
    Code(Block),
    /// External function resolved by symbol name at translation time
    Native(String),
}

#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub id: AstFunctionId,
    pub name: String,
    pub return_type: ValueType,
    pub params: Vec<VarDecl>,
    pub body: FunctionBody,
}

impl FunctionDecl {
    /// Body block, if this is not a native function
    pub fn block(&self) -> Option<&Block> {
        match &self.body {
            FunctionBody::Code(block) => Some(block),
            FunctionBody::Native(_) => None,
        }
    }
}

/// A lexical scope: declared variables, nested functions, then statements
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub vars: Vec<VarDecl>,
    pub functions: Vec<FunctionDecl>,
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(mut self, decl: VarDecl) -> Self {
        self.vars.push(decl);
        self
    }

    pub fn function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.stmts.push(stmt);
        self
    }
}

/// Root of a parsed program.  The top-level code is itself a function
/// taking no arguments.
#[derive(Debug, Clone)]
pub struct Program {
    pub top: FunctionDecl,
}

// ============================================================================
// Statements and Expressions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    BitOr,
    BitAnd,
    BitXor,
    Eq,
    Neq,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Arithmetic operators that widen to double when either side is double
    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Assign,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Double(f64),
    Str(String),
    Load(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn load(name: &str) -> Self {
        Expr::Load(name.to_string())
    }

    pub fn str(s: &str) -> Self {
        Expr::Str(s.to_string())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.to_string(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Store {
        var: String,
        op: StoreOp,
        value: Expr,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    /// `for (var in from..to)`, inclusive of `to`
    For {
        var: String,
        from: Expr,
        to: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Print(Vec<Expr>),
    Block(Block),
}

impl Stmt {
    pub fn assign(var: &str, value: Expr) -> Self {
        Stmt::Store {
            var: var.to_string(),
            op: StoreOp::Assign,
            value,
        }
    }

    pub fn store(var: &str, op: StoreOp, value: Expr) -> Self {
        Stmt::Store {
            var: var.to_string(),
            op,
            value,
        }
    }
}

// ============================================================================
// Program Builder
// ============================================================================

/// Hands out declaration ids the way a parser does while building a tree.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    next_var: u32,
    next_function: u32,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable (local or parameter)
    pub fn var(&mut self, name: &str, ty: ValueType) -> VarDecl {
        let id = AstVarId(self.next_var);
        self.next_var += 1;
        VarDecl {
            id,
            name: name.to_string(),
            ty,
        }
    }

    fn function_id(&mut self) -> AstFunctionId {
        let id = AstFunctionId(self.next_function);
        self.next_function += 1;
        id
    }

    /// Declare a function with a body
    pub fn function(
        &mut self,
        name: &str,
        return_type: ValueType,
        params: &[(&str, ValueType)],
        body: Block,
    ) -> FunctionDecl {
        let id = self.function_id();
        let params = params.iter().map(|(n, t)| self.var(n, *t)).collect();
        FunctionDecl {
            id,
            name: name.to_string(),
            return_type,
            params,
            body: FunctionBody::Code(body),
        }
    }

    /// Declare a native function bound to `symbol`
    pub fn native(
        &mut self,
        name: &str,
        return_type: ValueType,
        params: &[(&str, ValueType)],
        symbol: &str,
    ) -> FunctionDecl {
        let id = self.function_id();
        let params = params.iter().map(|(n, t)| self.var(n, *t)).collect();
        FunctionDecl {
            id,
            name: name.to_string(),
            return_type,
            params,
            body: FunctionBody::Native(symbol.to_string()),
        }
    }

    /// Wrap top-level code into a program
    pub fn program(&mut self, body: Block) -> Program {
        let top = self.function("<top>", ValueType::Void, &[], body);
        Program { top }
    }
}
