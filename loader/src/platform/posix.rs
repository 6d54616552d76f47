// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! POSIX-like host backend: signal-driven fault delivery, anonymous
//! `MAP_FIXED` mapping, byte-granular `mprotect`.

use super::Platform;
use crate::dispatcher;
use loader_format::Perm;
use std::fs::File;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::AsRawFd;
use std::sync::Mutex;

/// The handler installed before ours took over, kept for chaining when we
/// decline a fault. `None` until [`PosixPlatform::install_fault_handler`]
/// runs.
static OLD_ACTION: Mutex<Option<libc::sigaction>> = Mutex::new(None);

pub struct PosixPlatform {
    page_size: u64,
}

impl PosixPlatform {
    #[must_use]
    pub fn new() -> Self {
        // Safety: sysconf with a valid name is always safe to call.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: u64::try_from(page_size).expect("page size fits in u64"),
        }
    }
}

impl Default for PosixPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn to_prot(perm: Perm) -> i32 {
    let mut prot = libc::PROT_NONE;
    if perm.contains(Perm::R) {
        prot |= libc::PROT_READ;
    }
    if perm.contains(Perm::W) {
        prot |= libc::PROT_WRITE;
    }
    if perm.contains(Perm::X) {
        prot |= libc::PROT_EXEC;
    }
    prot
}

impl Platform for PosixPlatform {
    fn page_size(&self) -> u64 {
        self.page_size
    }

    unsafe fn map_fixed(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()> {
        // The pager always needs to write the page before the final
        // protection (possibly read-only) is applied.
        let prot = to_prot(perm | Perm::W);
        // Safety: caller guarantees addr/len are page-aligned and free to
        // overwrite.
        let res = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                usize_from_u64(len),
                prot,
                libc::MAP_FIXED | libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if res == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn protect(&self, addr: u64, len: u64, perm: Perm) -> io::Result<()> {
        let prot = to_prot(perm);
        // Safety: caller guarantees the region is currently mapped.
        let res = unsafe { libc::mprotect(addr as *mut libc::c_void, usize_from_u64(len), prot) };
        if res != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    unsafe fn unmap(&self, addr: u64, len: u64) -> io::Result<()> {
        // Safety: caller guarantees the region is currently mapped by us.
        let res = unsafe { libc::munmap(addr as *mut libc::c_void, usize_from_u64(len)) };
        if res != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn pread(&self, file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let mut done = 0usize;
        let offset = i64::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        while done < buf.len() {
            // Safety: `buf[done..]` is a valid, writable slice of the
            // remaining length for the duration of the call.
            let n = unsafe {
                libc::pread(
                    fd,
                    buf[done..].as_mut_ptr().cast(),
                    buf.len() - done,
                    offset + i64::try_from(done).expect("read offset fits in i64"),
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "short read past end of file while paging in segment",
                ));
            }
            done += usize_from_u64(u64::try_from(n).expect("pread return value is non-negative"));
        }
        Ok(())
    }

    fn install_fault_handler(&self) {
        let mut sa: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
        sa.sa_sigaction = handle_sigsegv as usize;
        sa.sa_flags = libc::SA_SIGINFO;
        // Safety: sigemptyset is always safe on a valid pointer.
        unsafe {
            libc::sigemptyset(&raw mut sa.sa_mask);
        }

        let mut old: libc::sigaction = unsafe { MaybeUninit::zeroed().assume_init() };
        // Safety: `sa` is fully initialized above; `old` is an out-param.
        let rc = unsafe { libc::sigaction(libc::SIGSEGV, &raw const sa, &raw mut old) };
        assert_eq!(rc, 0, "failed to install SIGSEGV handler");

        *OLD_ACTION.lock().expect("old action mutex poisoned") = Some(old);
    }
}

fn usize_from_u64(v: u64) -> usize {
    usize::try_from(v).expect("value fits in usize on this platform")
}

/// Raw trap entry point registered with the kernel. Classifies the fault
/// through [`dispatcher::classify_and_handle`] and either resumes execution
/// by returning normally, or chains to whatever handler was previously
/// installed.
///
/// # Safety
/// Called directly by the kernel on `SIGSEGV`; `info` and `_ctx` are only
/// valid for the duration of this call, as guaranteed by `sigaction(2)`.
extern "C" fn handle_sigsegv(
    signo: libc::c_int,
    info: *mut libc::siginfo_t,
    ctx: *mut libc::c_void,
) {
    if signo != libc::SIGSEGV {
        chain(signo, info, ctx);
        return;
    }

    // Safety: `info` is valid for the duration of signal delivery.
    let addr = unsafe { (*info).si_addr() } as u64;

    match dispatcher::classify_and_handle(addr) {
        super::FaultDecision::Resume => {}
        super::FaultDecision::Decline => chain(signo, info, ctx),
    }
}

fn chain(signo: libc::c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let old = *OLD_ACTION.lock().expect("old action mutex poisoned");
    let Some(old) = old else {
        // No previous handler was recorded; fall back to default behavior.
        reraise_default(signo);
        return;
    };

    if old.sa_sigaction == libc::SIG_DFL {
        reraise_default(signo);
    } else if old.sa_sigaction == libc::SIG_IGN {
        // Previous handler ignored the signal; match that.
    } else if old.sa_flags & libc::SA_SIGINFO != 0 {
        // Safety: `old.sa_sigaction` was installed with `SA_SIGINFO`, so it
        // has the three-argument signature, and `info`/`ctx` remain valid
        // for the duration of this call.
        let f: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
            unsafe { std::mem::transmute(old.sa_sigaction) };
        f(signo, info, ctx);
    } else {
        // Safety: without `SA_SIGINFO` the handler has the classic
        // single-argument signature; `libc`'s `sigaction` models the C
        // union of `sa_handler`/`sa_sigaction` as the single field used
        // here.
        let f: extern "C" fn(libc::c_int) = unsafe { std::mem::transmute(old.sa_sigaction) };
        f(signo);
    }
}

fn reraise_default(signo: libc::c_int) {
    // Safety: resetting to the default disposition and re-raising is the
    // standard way to fall through to "terminate the process" semantics.
    unsafe {
        libc::signal(signo, libc::SIG_DFL);
        libc::raise(signo);
    }
}
