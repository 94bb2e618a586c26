//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Architecture-independent LIR pieces: labels and text emission
//

use crate::ir::FunctionId;
use std::fmt;

// ============================================================================
// Labels
// ============================================================================

/// Branch target inside one function: a block, or an edge stub numbered
/// past the last block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub func: FunctionId,
    pub index: u32,
}

impl Label {
    pub fn new(func: FunctionId, index: u32) -> Self {
        Self { func, index }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".Lf{}_{}", self.func.0, self.index)
    }
}

// ============================================================================
// Text Rendering
// ============================================================================

/// LIR instruction with an AT&T text form
pub trait EmitAsm {
    fn emit(&self, out: &mut String);
}

/// Render one function's instructions under a `name:` header
pub fn emit_all<T: EmitAsm>(name: &str, insts: &[T]) -> String {
    let mut out = format!("{}:\n", name);
    for inst in insts {
        inst.emit(&mut out);
    }
    out
}
