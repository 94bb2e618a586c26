//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Error types for the mvjit compiler pipeline
//

/// Compilation failure.  Every pass either runs to completion or aborts
/// the whole compilation with one of these.
#[derive(thiserror::Error, Debug)]
pub enum JitError {
    /// The program references something the IR builder cannot resolve,
    /// or is ill-typed.
    #[error("translation error in function '{function}': {message}")]
    Translation { function: String, message: String },

    /// An upstream pass produced IR that violates an invariant.
    #[error("bad IR in function '{function}': {message}")]
    BadIr { function: String, message: String },

    /// No instruction form exists for an operand combination.
    #[error("code generation error in function '{function}': {message}")]
    CodeGeneration { function: String, message: String },

    /// Recognized but unsupported language feature.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("cannot map executable memory: {0}")]
    Io(#[from] std::io::Error),
}

impl JitError {
    pub fn translation(function: impl Into<String>, message: impl Into<String>) -> Self {
        JitError::Translation {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn bad_ir(function: impl Into<String>, message: impl Into<String>) -> Self {
        JitError::BadIr {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn codegen(function: impl Into<String>, message: impl Into<String>) -> Self {
        JitError::CodeGeneration {
            function: function.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, JitError>;
