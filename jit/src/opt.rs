//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Optimization infrastructure for mvjit
//
// Runs substitution/folding, dead code elimination and block
// minimization over SSA form until no pass reports a change, bounded by
// an iteration cap.
//

use crate::ir::{dce, minimize, subst};
use crate::ir::{Function, SimpleIr, VarTable};

/// Default cap for the optimization fixed-point loop.
/// Prevents infinite loops if passes keep making changes.
pub const MAX_ITERATIONS: usize = 10;

// ============================================================================
// Pass Runner
// ============================================================================

/// Optimize every function, each running at most `max_iterations` rounds
pub fn optimize_program(ir: &mut SimpleIr, max_iterations: usize) {
    let SimpleIr {
        functions, vars, ..
    } = ir;
    for func in functions.iter_mut() {
        let rounds = optimize_function(func, vars, max_iterations);
        log::debug!("opt: {}: {} rounds", func.name, rounds);
    }
}

/// Optimize a single function by running passes until fixed point.
/// Returns the number of rounds run.
pub fn optimize_function(func: &mut Function, vars: &VarTable, max_iterations: usize) -> usize {
    if func.is_native() {
        return 0;
    }
    let mut rounds = 0;
    while rounds < max_iterations {
        rounds += 1;
        let subst_changed = subst::substitute(func);
        let dce_changed = dce::run(func, vars);
        let min_changed = minimize::run(func);

        if !subst_changed && !dce_changed && !min_changed {
            break;
        }
    }
    if rounds == max_iterations {
        log::debug!("opt: {}: iteration cap reached", func.name);
    }
    rounds
}

// ============================================================================
// Tests
// ============================================================================
