//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// mvjit - optimizing x86-64 JIT compiler for the mathvm language
//
// Pipeline: closure analysis, IR construction, SSA conversion, type
// derivation, optimization, liveness, linear scan register allocation,
// x86-64 code generation and encoding into executable memory.
//

pub mod arch;
pub mod ast;
pub mod closure;
pub mod config;
pub mod dominate;
pub mod error;
pub mod ir;
pub mod jit;
pub mod opt;
pub mod runtime;
pub mod ssa;

pub use config::JitConfig;
pub use error::{JitError, Result};
pub use jit::{compile, CompilationContext, CompiledProgram, Value};
