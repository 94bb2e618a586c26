//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Register allocation and code generation
//

/// Default capacity for LIR instruction buffers
pub const DEFAULT_LIR_BUFFER_CAPACITY: usize = 1024;

pub mod lir;
pub mod regalloc;
pub mod x86_64;
