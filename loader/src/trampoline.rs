// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Startup trampoline (C7): the one concrete implementation of the external
//! trampoline contract carried by this crate.
//!
//! A kernel-mode loader hands off to the guest with a context switch into a
//! fresh address space. This loader has no second address space: the
//! guest's pages are demand-paged directly into the *current* process, so
//! "transferring control to the entry point" means casting the entry
//! virtual address to a function pointer and calling it on the current
//! thread, `argc`/`argv`-style. Faults taken while executing guest code are
//! serviced synchronously by the dispatcher before the call returns here.
use std::ffi::CString;
use std::os::raw::c_char;

/// Calls the guest entry point with a conventional `argc`/`argv`, returning
/// whatever the guest returns.
///
/// # Safety
/// `entry` must be the address of a function matching
/// `extern "C" fn(i32, *const *const c_char) -> i32`, fully paged in and
/// executable. The caller (`execute()`) guarantees this by construction:
/// the entry page faults in, through the dispatcher, the first time this
/// call touches it.
pub unsafe fn run(entry: u64, argv: &[String]) -> i32 {
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|s| CString::new(s.as_str()).expect("argv must not contain NUL bytes"))
        .collect();
    let mut c_ptrs: Vec<*const c_char> = c_argv.iter().map(|s| s.as_ptr()).collect();
    c_ptrs.push(std::ptr::null());

    let argc = i32::try_from(argv.len()).expect("argv too long");
    let entry_fn: extern "C" fn(i32, *const *const c_char) -> i32 =
        // Safety: see the function's own safety contract above.
        unsafe { std::mem::transmute(entry as usize) };

    entry_fn(argc, c_ptrs.as_ptr())
}
