// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A userspace on-demand executable loader.
//!
//! Given an executable image described by a segmented binary format, this
//! crate maps segments lazily: no segment content is resident until code
//! actually touches it. Access to an unmapped page is caught through the
//! host OS's access-violation mechanism (the fault dispatcher, C3), the
//! page is allocated and populated (the pager, C4), and execution resumes
//! transparently.
//!
//! Callers embed the loader directly: call [`init`] once per process, then
//! [`execute`] for the (single) image to run.
//!
//! This crate does not support a multithreaded guest, or more than one
//! `execute()` in flight per process: the installed fault handler and the
//! segment table are process-wide, since the kernel hands the handler no
//! context parameter.

mod dispatcher;
mod elf;
mod error;
mod pager;
mod platform;
mod segment_table;
mod trampoline;

pub use error::{Error, ParseError};
pub use loader_format::{ImageDescriptor, Perm, Segment};

use dispatcher::State;
use platform::{HostPlatform, Platform};
use segment_table::SegmentTable;
use std::fs::File;
use std::path::Path;
use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the fault handler. Must be called exactly once per process,
/// before any call to [`execute`].
pub fn init() {
    INIT.call_once(|| {
        HostPlatform::new().install_fault_handler();
        log::debug!("fault handler installed");
    });
}

/// Loads the executable at `path`, runs it to completion on the current
/// thread, and tears down every page it mapped.
///
/// # Errors
/// Returns [`Error::Parse`] if the image cannot be parsed, before any
/// resource has been acquired, and [`Error::Teardown`] if unmapping a
/// resident page or closing the file fails once the guest has finished
/// running. Every other failure (the image file failing to open, or an
/// allocation, I/O, or protection failure inside the fault handler) is
/// fatal and aborts the process instead of being returned here, since
/// there is no instruction left that could usefully retry.
///
/// # Panics
/// Panics if `init` was never called.
pub fn execute(path: &Path, argv: &[String]) -> Result<(), Error> {
    assert!(
        INIT.is_completed(),
        "loader::init() must run before loader::execute()"
    );

    let bytes = std::fs::read(path).map_err(ParseError::Io)?;
    let descriptor = elf::parse(&bytes)?;
    if !descriptor.segments_non_overlapping() {
        return Err(ParseError::OverlappingSegments.into());
    }
    drop(bytes); // the pager re-reads pages from the open file handle below.

    let file = File::open(path).unwrap_or_else(|err| {
        log::error!("fatal error opening {path:?}: {err}");
        std::process::abort();
    });
    let platform = HostPlatform::new();
    let page_size = platform.page_size();
    let entry = descriptor.entry;
    let segments = SegmentTable::new(descriptor, page_size);

    log::debug!("executing {path:?}, entry {entry:#x}, page size {page_size}");
    dispatcher::install(State {
        segments,
        file,
        platform,
    });

    // Safety: `entry` is the image's declared entry point; the dispatcher
    // services the first fault on it (and every subsequent one) before
    // guest code actually runs.
    let exit_code = unsafe { trampoline::run(entry, argv) };
    log::debug!("guest returned exit code {exit_code}");

    teardown()
}

/// Releases every page mapped during the run and closes the image file.
/// Unmap/close failures are aggregated into a single [`Error::Teardown`]
/// rather than treated as fatal: the guest has already finished, so there
/// is no partly-mapped execution left to protect against.
fn teardown() -> Result<(), Error> {
    let Some(state) = dispatcher::take() else {
        return Ok(());
    };

    let page_size = state.platform.page_size();
    let mut failed = false;
    for segment in state.segments.segments() {
        for page_index in segment.resident_pages() {
            let page_va = segment.vaddr + u64::try_from(page_index).expect("page index fits in u64") * page_size;
            // Safety: every resident page was mapped by `pager::page_in`
            // and has not been unmapped since.
            if unsafe { state.platform.unmap(page_va, page_size) }.is_err() {
                failed = true;
            }
        }
    }

    if !close_file(state.file) {
        failed = true;
    }

    if failed {
        Err(Error::Teardown)
    } else {
        Ok(())
    }
}

#[cfg(unix)]
fn close_file(file: File) -> bool {
    use std::os::unix::io::IntoRawFd;
    let fd = file.into_raw_fd();
    // Safety: `fd` came from `IntoRawFd`, which hands over unique
    // ownership of the descriptor.
    unsafe { libc::close(fd) == 0 }
}

#[cfg(windows)]
fn close_file(file: File) -> bool {
    use std::os::windows::io::IntoRawHandle;
    use windows_sys::Win32::Foundation::CloseHandle;
    let handle = file.into_raw_handle();
    // Safety: `handle` came from `IntoRawHandle`, which hands over unique
    // ownership of the handle.
    unsafe { CloseHandle(handle.cast()) != 0 }
}
