//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Compilation driver: AST to executable machine code
//

use std::collections::HashMap;
use std::ffi::{c_char, CStr, CString};
use std::fmt::Write as _;

use crate::arch::lir::emit_all;
use crate::arch::regalloc::Liveness;
use crate::arch::x86_64::codegen::generate_function;
use crate::arch::x86_64::encode::Assembler;
use crate::arch::x86_64::regalloc::RegAlloc;
use crate::ast::Program;
use crate::closure::ClosureInfo;
use crate::config::JitConfig;
use crate::error::{JitError, Result};
use crate::ir::builder::build_ir;
use crate::ir::typing::derive_types;
use crate::ir::{FunctionId, SimpleIr, VarType};
use crate::opt::optimize_program;
use crate::runtime::{self, ExecBuffer};
use crate::ssa::ssa_convert_all;

/// Name of the function holding a program's top-level statements
pub const TOP_FUNCTION: &str = "<top>";

/// Result of running a compiled program
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    Double(f64),
    Str(String),
}

/// Everything one compilation needs besides the program itself
#[derive(Debug, Clone, Default)]
pub struct CompilationContext {
    config: JitConfig,
    /// Native symbols provided by the host, checked before `dlsym`
    natives: HashMap<String, usize>,
}

impl CompilationContext {
    pub fn new(config: JitConfig) -> Self {
        CompilationContext {
            config: config.clamped(),
            natives: HashMap::new(),
        }
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    /// Make `symbol` resolve to `address` for native function declarations
    pub fn register_native(&mut self, symbol: &str, address: usize) {
        self.natives.insert(symbol.to_string(), address);
    }

    /// Translate the program to SSA IR, optimized when enabled
    pub fn lower(&self, program: &Program) -> Result<SimpleIr> {
        let closures = ClosureInfo::analyze(program)?;
        let mut ir = build_ir(program, &closures, &self.natives)?;
        ssa_convert_all(&mut ir)?;
        derive_types(&mut ir)?;
        if self.config.optimize {
            optimize_program(&mut ir, self.config.max_opt_iterations);
        }
        Ok(ir)
    }

    /// Compile the program to machine code
    pub fn compile(&self, program: &Program) -> Result<CompiledProgram> {
        let ir = self.lower(program)?;
        self.compile_ir(ir)
    }

    /// Allocate registers, generate and load code for lowered IR
    pub fn compile_ir(&self, ir: SimpleIr) -> Result<CompiledProgram> {
        let strings = ir
            .pool
            .iter()
            .map(|s| {
                CString::new(s.as_str()).map_err(|_| {
                    JitError::translation(TOP_FUNCTION, format!("string {:?} contains NUL", s))
                })
            })
            .collect::<Result<Vec<CString>>>()?;
        let addresses: Vec<usize> = strings.iter().map(|s| s.as_ptr() as usize).collect();
        let helpers = runtime::helpers();

        let ir_dump = if self.config.dump_ir {
            let text = ir.dump();
            log::debug!("ir:\n{}", text);
            Some(text)
        } else {
            None
        };

        let mut asm = Assembler::new();
        let mut regalloc_dump = self.config.dump_regalloc.then(String::new);
        let mut disassembly = self.config.dump_asm.then(String::new);
        for func in ir.functions.iter().filter(|f| !f.is_native()) {
            let live = Liveness::compute(func);
            let ra = RegAlloc::allocate(
                func,
                &ir.vars,
                &live,
                self.config.gp_registers,
                self.config.fp_registers,
            );
            if let Some(out) = regalloc_dump.as_mut() {
                let text = ra.dump(&ir.vars);
                log::debug!("regalloc: {}\n{}", func.name, text);
                let _ = writeln!(out, "{}:", func.name);
                out.push_str(&text);
            }

            let code = generate_function(&ir, func, &live, &ra, &addresses, helpers)?;
            let start = asm.len();
            asm.begin_function(code.id, &code.name);
            for inst in &code.insts {
                asm.emit(inst)?;
            }
            asm.end_function()?;
            log::debug!(
                "codegen: {}: {} instructions, {} bytes",
                func.name,
                code.insts.len(),
                asm.len() - start
            );
            if let Some(out) = disassembly.as_mut() {
                out.push_str(&emit_all(&code.name, &code.insts));
            }
        }

        let linked = asm.finish()?;
        let entry_offset = linked
            .entries
            .get(&FunctionId(0))
            .copied()
            .ok_or_else(|| JitError::bad_ir(TOP_FUNCTION, "top-level function was not emitted"))?;
        let return_type = ir
            .function(FunctionId(0))
            .map(|f| f.return_type)
            .unwrap_or(VarType::Unit);
        let buffer = ExecBuffer::new(&linked.code)?;
        let entry = buffer.address(entry_offset);

        Ok(CompiledProgram {
            buffer,
            entry,
            return_type,
            _strings: strings,
            ir_dump,
            regalloc_dump,
            disassembly,
        })
    }
}

/// Loaded machine code for a whole program
#[derive(Debug)]
pub struct CompiledProgram {
    buffer: ExecBuffer,
    entry: usize,
    return_type: VarType,
    /// Pooled strings; the code holds their addresses
    _strings: Vec<CString>,
    ir_dump: Option<String>,
    regalloc_dump: Option<String>,
    disassembly: Option<String>,
}

impl CompiledProgram {
    /// Call the top-level function
    pub fn run(&self) -> Value {
        let entry = self.entry;
        // SAFETY: `entry` is the start of the top-level function in
        // `buffer`, which lives as long as `self`; the function takes no
        // arguments and returns per its IR return type.
        unsafe {
            match self.return_type {
                VarType::Int => {
                    let f: extern "C" fn() -> i64 = std::mem::transmute(entry);
                    Value::Int(f())
                }
                VarType::Double => {
                    let f: extern "C" fn() -> f64 = std::mem::transmute(entry);
                    Value::Double(f())
                }
                VarType::Ptr => {
                    let f: extern "C" fn() -> *const c_char = std::mem::transmute(entry);
                    let p = f();
                    if p.is_null() {
                        Value::Str(String::new())
                    } else {
                        Value::Str(CStr::from_ptr(p).to_string_lossy().into_owned())
                    }
                }
                _ => {
                    let f: extern "C" fn() = std::mem::transmute(entry);
                    f();
                    Value::Unit
                }
            }
        }
    }

    /// Run and collect what the program prints
    pub fn run_captured(&self) -> (Value, String) {
        runtime::capture_output(|| self.run())
    }

    /// IR text, when IR dumping was enabled
    pub fn ir_dump(&self) -> Option<&str> {
        self.ir_dump.as_deref()
    }

    /// Register assignments, when enabled
    pub fn regalloc_dump(&self) -> Option<&str> {
        self.regalloc_dump.as_deref()
    }

    /// Generated code in AT&T syntax, when enabled
    pub fn disassembly(&self) -> Option<&str> {
        self.disassembly.as_deref()
    }

    pub fn code_size(&self) -> usize {
        self.buffer.len()
    }
}

/// Compile with `config` and no host natives
pub fn compile(program: &Program, config: JitConfig) -> Result<CompiledProgram> {
    CompilationContext::new(config).compile(program)
}
