//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// End-to-end programs: compile, execute, compare printed output
//

mod closures;
mod control_flow;
mod dumps;
mod functions;
mod values;
