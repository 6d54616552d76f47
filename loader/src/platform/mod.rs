// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Platform adapter (C1): the uniform primitives the rest of the core needs
//! from the host OS, plus the two concrete backends that implement them.

use loader_format::Perm;
use std::fs::File;
use std::io;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod posix;
        pub use posix::PosixPlatform as HostPlatform;
    } else if #[cfg(windows)] {
        mod windows;
        pub use windows::WindowsPlatform as HostPlatform;
    } else {
        compile_error!("loader only supports unix-like and windows hosts");
    }
}

/// What the fault dispatcher decided to do with a trap; each backend
/// translates this into whatever its OS needs to see to either resume the
/// faulting instruction or fall through to the previously-installed
/// handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultDecision {
    Resume,
    Decline,
}

/// Uniform primitives the core needs from the host OS. One instance is
/// created per process and lives for the life of `execute()`.
pub trait Platform {
    /// Page size in bytes, constant for the process lifetime.
    fn page_size(&self) -> u64;

    /// Reserves and commits exactly `len` bytes at `addr`, with `perm`
    /// permissions (always including write, so the pager can populate the
    /// page). Fails if the region cannot be placed at `addr`.
    ///
    /// # Safety
    /// `addr` and `len` must be page-aligned, and `addr..addr+len` must not
    /// already be mapped by anything the caller cares about overwriting.
    unsafe fn map_fixed(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()>;

    /// Changes protection on a previously mapped region.
    ///
    /// # Safety
    /// `addr..addr+len` must currently be mapped.
    unsafe fn protect(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()>;

    /// Releases a previously mapped region. Idempotent at whole-page
    /// granularity.
    ///
    /// # Safety
    /// `addr..addr+len` must currently be mapped by this adapter.
    unsafe fn unmap(&self, addr: u64, len: u64) -> io::Result<()>;

    /// Reads exactly `buf.len()` bytes from `file` at `offset`, looping over
    /// short reads. Fails only on I/O error or premature EOF.
    fn pread(&self, file: &File, buf: &mut [u8], offset: u64) -> io::Result<()>;

    /// Registers the process-wide fault handler. The dispatcher
    /// ([`crate::dispatcher`]) is consulted from a raw, OS-specific trap
    /// entry point installed here; this just turns that trap delivery on.
    fn install_fault_handler(&self);
}
