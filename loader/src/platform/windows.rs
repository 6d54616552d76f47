// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Windows-like host backend: vectored exception dispatch, reserve+commit
//! allocator, page-granular protection changes.

use super::Platform;
use crate::dispatcher;
use loader_format::Perm;
use std::fs::File;
use std::io;
use std::os::windows::io::AsRawHandle;

use windows_sys::Win32::Foundation::{EXCEPTION_ACCESS_VIOLATION, HANDLE};
use windows_sys::Win32::System::Diagnostics::Debug::{
    AddVectoredExceptionHandler, EXCEPTION_CONTINUE_EXECUTION, EXCEPTION_CONTINUE_SEARCH,
    EXCEPTION_POINTERS,
};
use windows_sys::Win32::System::IO::OVERLAPPED;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::Storage::FileSystem::ReadFile;

pub struct WindowsPlatform {
    page_size: u64,
}

impl WindowsPlatform {
    #[must_use]
    pub fn new() -> Self {
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        // Safety: `info` is a valid out-parameter for the duration of the call.
        unsafe { GetSystemInfo(&raw mut info) };
        Self {
            page_size: u64::from(info.dwPageSize),
        }
    }
}

impl Default for WindowsPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a declared permission set to the closest `PAGE_*` constant Windows
/// supports. Windows has no execute-only mode, so `X` alone degrades to
/// read+execute.
fn to_page_protect(perm: Perm) -> u32 {
    match (
        perm.contains(Perm::R),
        perm.contains(Perm::W),
        perm.contains(Perm::X),
    ) {
        (_, true, true) => PAGE_EXECUTE_READWRITE,
        (_, true, false) => PAGE_READWRITE,
        (true, false, true) | (false, false, true) => PAGE_EXECUTE_READ,
        (true, false, false) => PAGE_READONLY,
        (false, false, false) => PAGE_NOACCESS,
    }
}

impl Platform for WindowsPlatform {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    unsafe fn map_fixed(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()> {
        // Some hosts refuse to flip a page from non-executable to
        // executable without remapping, so reserve+commit in the most
        // permissive protection the final permission set could need and
        // lower it in `protect` once the page is populated.
        let protect = if perm.contains(Perm::X) {
            PAGE_EXECUTE_READWRITE
        } else {
            PAGE_READWRITE
        };
        // Safety: caller guarantees addr/len are page-aligned.
        let res = unsafe {
            VirtualAlloc(
                addr as *mut core::ffi::c_void,
                usize_from_u64(len),
                MEM_RESERVE | MEM_COMMIT,
                protect,
            )
        };
        if res.is_null() {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn protect(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()> {
        let mut old = 0u32;
        // Safety: caller guarantees the region is currently mapped.
        let ok = unsafe {
            VirtualProtect(
                addr as *mut core::ffi::c_void,
                usize_from_u64(len),
                to_page_protect(perm),
                &raw mut old,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn unmap(&self, addr: u64, _len: u64) -> io::Result<()> {
        // Safety: caller guarantees this region was reserved by `map_fixed`.
        let ok = unsafe { VirtualFree(addr as *mut core::ffi::c_void, 0, MEM_RELEASE) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn pread(&self, file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let handle = file.as_raw_handle() as HANDLE;
        let mut done = 0usize;
        while done < buf.len() {
            let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
            let at = offset + u64::try_from(done).expect("offset fits in u64");
            overlapped.Anonymous.Anonymous.Offset = (at & 0xFFFF_FFFF) as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (at >> 32) as u32;

            let mut read = 0u32;
            let remaining = buf.len() - done;
            // Safety: `buf[done..]` is valid for `remaining` bytes, and
            // `overlapped` describes the absolute file offset to read from.
            let ok = unsafe {
                ReadFile(
                    handle,
                    buf[done..].as_mut_ptr(),
                    u32::try_from(remaining).unwrap_or(u32::MAX),
                    &raw mut read,
                    &raw mut overlapped,
                )
            };
            if ok == 0 {
                return Err(io::Error::last_os_error());
            }
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read past end of file while paging in segment",
                ));
            }
            done += read as usize;
        }
        Ok(())
    }

    fn install_fault_handler(&self) {
        // Safety: `vectored_handler` matches `PVECTORED_EXCEPTION_HANDLER`
        // and remains valid for the life of the process.
        let handle = unsafe { AddVectoredExceptionHandler(1, Some(vectored_handler)) };
        assert!(!handle.is_null(), "failed to install vectored exception handler");
    }
}

fn usize_from_u64(v: u64) -> usize {
    usize::try_from(v).expect("value fits in usize on this platform")
}

/// Raw trap entry point registered with the OS. Classifies the fault
/// through [`dispatcher::classify_and_handle`]; resuming means returning
/// `EXCEPTION_CONTINUE_EXECUTION`, declining means returning
/// `EXCEPTION_CONTINUE_SEARCH` so the next handler in the chain (or the
/// default unhandled-exception behavior) gets a chance.
///
/// # Safety
/// Called directly by the OS on an unhandled exception; `info` is only
/// valid for the duration of this call.
unsafe extern "system" fn vectored_handler(info: *mut EXCEPTION_POINTERS) -> i32 {
    // Safety: `info` and the record it points to are valid for the
    // duration of exception dispatch.
    let record = unsafe { &*(*info).ExceptionRecord };

    if record.ExceptionCode != EXCEPTION_ACCESS_VIOLATION {
        return EXCEPTION_CONTINUE_SEARCH;
    }

    // ExceptionInformation[1] holds the faulting address for access
    // violations.
    let addr = record.ExceptionInformation[1] as u64;

    match dispatcher::classify_and_handle(addr) {
        super::FaultDecision::Resume => EXCEPTION_CONTINUE_EXECUTION,
        super::FaultDecision::Decline => EXCEPTION_CONTINUE_SEARCH,
    }
}
