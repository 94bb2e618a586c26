//
// Copyright (c) 2025-2026 Jeff Garzik
//
// This file is part of the posixutils-rs project covered under
// the MIT License.  For the full license text, please see the LICENSE
// file in the root directory of this project.
// SPDX-License-Identifier: MIT
//
// Runtime support for generated code: executable memory, print helpers,
// native symbol lookup
//

use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::fmt;
use std::io::{self, Write};

use dynasmrt::mmap::MutableBuffer;
use dynasmrt::{AssemblyOffset, ExecutableBuffer};

use crate::arch::x86_64::codegen::RuntimeHelpers;

/// Significant digits of a printed double, as iostream's default
const DOUBLE_PRECISION: i32 = 6;

// ============================================================================
// Native Symbols
// ============================================================================

/// Address of a symbol in the running process, if the dynamic linker
/// knows it
pub fn lookup_symbol(name: &str) -> Option<usize> {
    let cname = CString::new(name).ok()?;
    let addr = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr()) };
    if addr.is_null() {
        None
    } else {
        Some(addr as usize)
    }
}

// ============================================================================
// Executable Memory
// ============================================================================

/// Finished machine code.  Written through a read-write mapping that is
/// then turned read-execute; unmapped when dropped.
pub struct ExecBuffer {
    code: ExecutableBuffer,
    len: usize,
}

impl ExecBuffer {
    pub fn new(code: &[u8]) -> io::Result<Self> {
        let mut staging = MutableBuffer::new(code.len().max(1))?;
        staging.set_len(code.len());
        staging.copy_from_slice(code);
        let exec = staging.make_exec()?;
        log::debug!(
            "runtime: mapped {} bytes of code at {:p}",
            code.len(),
            exec.ptr(AssemblyOffset(0))
        );
        Ok(ExecBuffer {
            code: exec,
            len: code.len(),
        })
    }

    /// Address of byte `offset` of the code
    pub fn address(&self, offset: usize) -> usize {
        self.code.ptr(AssemblyOffset(offset)) as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ExecBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecBuffer")
            .field("address", &format_args!("{:#x}", self.address(0)))
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// Print Helpers
// ============================================================================

// Active output captures, innermost last
thread_local! {
    static CAPTURE: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn emit_output(text: &str) {
    let captured = CAPTURE.with(|c| match c.borrow_mut().last_mut() {
        Some(buf) => {
            buf.push_str(text);
            true
        }
        None => false,
    });
    if !captured {
        let mut out = io::stdout().lock();
        // A failed write has nowhere to be reported from inside generated code
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

pub extern "C" fn jit_print_int(value: i64) {
    emit_output(&value.to_string());
}

/// `%g` rendering: six significant digits, trailing zeros dropped,
/// exponent form outside 1e-4..1e6
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:.*e}", (DOUBLE_PRECISION - 1) as usize, value);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    if exp < -4 || exp >= DOUBLE_PRECISION {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exp.abs())
    } else {
        let digits = (DOUBLE_PRECISION - 1 - exp) as usize;
        trim_fraction(&format!("{:.*}", digits, value)).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

pub extern "C" fn jit_print_double(value: f64) {
    emit_output(&format_double(value));
}

/// # Safety
///
/// `s` is null or points to a NUL-terminated string.
pub unsafe extern "C" fn jit_print_string(s: *const c_char) {
    if s.is_null() {
        return;
    }
    let text = unsafe { CStr::from_ptr(s) }.to_string_lossy();
    emit_output(&text);
}

/// Addresses of the print helpers, for the code generator
pub fn helpers() -> RuntimeHelpers {
    RuntimeHelpers {
        print_int: jit_print_int as usize,
        print_double: jit_print_double as usize,
        print_string: jit_print_string as usize,
    }
}

/// Run `f`, collecting everything the print helpers write on this thread
pub fn capture_output<T>(f: impl FnOnce() -> T) -> (T, String) {
    CAPTURE.with(|c| c.borrow_mut().push(String::new()));
    let result = f();
    let text = CAPTURE
        .with(|c| c.borrow_mut().pop())
        .unwrap_or_default();
    (result, text)
}
