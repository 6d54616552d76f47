// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Fault dispatcher (C3): the installed handler the OS calls on an access
//! violation, and the process-wide state it consults.
//!
//! The installed handler has no context parameter (the kernel hands it a
//! signal number and a `siginfo_t`, nothing else), so the segment table and
//! open file handle live here in a single process-wide slot: at most one
//! `execute()` is ever in flight per process.

use crate::pager;
use crate::platform::{FaultDecision, HostPlatform, Platform};
use crate::segment_table::{Residency, SegmentTable};
use std::fs::File;
use std::sync::Mutex;

pub(crate) struct State {
    pub segments: SegmentTable,
    pub file: File,
    pub platform: HostPlatform,
}

static STATE: Mutex<Option<State>> = Mutex::new(None);

pub(crate) fn install(state: State) {
    *STATE.lock().expect("loader state mutex poisoned") = Some(state);
}

/// Tears down the installed state and hands it back to the caller, for
/// `execute()`'s teardown phase.
pub(crate) fn take() -> Option<State> {
    STATE.lock().expect("loader state mutex poisoned").take()
}

/// Classifies a faulting address and, for a legitimate first-touch miss,
/// pages it in.
///
/// This is the C3 algorithm verbatim:
///
/// 1. No segment claims the address -> decline. This is a genuine guest bug.
/// 2. The page is already resident -> decline. The guest violated the
///    segment's final permissions (e.g. wrote to a read-only page).
/// 3. First touch -> invoke the pager. A pager failure is fatal: the
///    process cannot proceed with a partly-mapped image.
pub(crate) fn classify_and_handle(addr: u64) -> FaultDecision {
    let mut guard = STATE.lock().expect("loader state mutex poisoned");
    let Some(state) = guard.as_mut() else {
        return FaultDecision::Decline;
    };

    let Some((idx, page_index)) = state.segments.find(addr) else {
        return FaultDecision::Decline;
    };

    match state.segments.mark_and_test(idx, page_index) {
        Residency::AlreadyResident => FaultDecision::Decline,
        Residency::FirstTouch => {
            let segment = state.segments.segment(idx);
            match pager::page_in(&state.platform, &state.file, segment, page_index) {
                Ok(()) => {
                    state.segments.mark_resident(idx, page_index);
                    log::trace!(addr = format!("{addr:#x}"); "paged in segment {idx} page {page_index}");
                    FaultDecision::Resume
                }
                Err(err) => {
                    // Safety of the running process cannot be guaranteed
                    // with a partly-mapped image, so this class of failure
                    // is fatal.
                    log::error!("fatal error paging in segment {idx} page {page_index}: {err}");
                    std::process::abort();
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use loader_format::{ImageDescriptor, Perm, Segment};
    use std::sync::MutexGuard;

    // `STATE` is process-wide, so tests that touch it must not run
    // concurrently with each other.
    fn lock_for_test() -> MutexGuard<'static, ()> {
        static TEST_LOCK: Mutex<()> = Mutex::new(());
        TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserves a page-aligned address the kernel is free to pick, then
    /// gives it back so a test can treat it as unmapped scratch space.
    fn reserve_scratch(len: u64) -> u64 {
        let len = usize::try_from(len).unwrap();
        // Safety: a bare reserve-then-release probe, never dereferenced.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(addr, libc::MAP_FAILED, "failed to reserve scratch address space");
        // Safety: `addr` was just returned by the matching `mmap` above.
        unsafe {
            libc::munmap(addr, len);
        }
        addr as u64
    }

    fn install_test_state(vaddr: u64, page_size: u64) {
        let descriptor = ImageDescriptor::new(
            vaddr,
            vec![Segment::new(vaddr, 0, 0, page_size, Perm::R | Perm::W)],
        );
        let platform = HostPlatform::new();
        let segments = SegmentTable::new(descriptor, page_size);
        let file = tempfile::tempfile().unwrap();
        install(State {
            segments,
            file,
            platform,
        });
    }

    #[test]
    fn declines_an_address_no_segment_claims() {
        let _guard = lock_for_test();
        let page_size = HostPlatform::new().page_size();
        let vaddr = reserve_scratch(page_size);
        install_test_state(vaddr, page_size);

        assert_eq!(classify_and_handle(vaddr + page_size), FaultDecision::Decline);
        take();
    }

    #[test]
    fn resumes_on_first_touch_then_declines_on_repeat() {
        let _guard = lock_for_test();
        let page_size = HostPlatform::new().page_size();
        let vaddr = reserve_scratch(page_size);
        install_test_state(vaddr, page_size);

        assert_eq!(classify_and_handle(vaddr), FaultDecision::Resume);
        assert_eq!(classify_and_handle(vaddr), FaultDecision::Decline);

        let state = take().unwrap();
        // Safety: `classify_and_handle` mapped exactly this page above.
        unsafe {
            state.platform.unmap(vaddr, page_size).unwrap();
        }
    }

    #[test]
    fn declines_with_no_state_installed() {
        let _guard = lock_for_test();
        assert_eq!(classify_and_handle(0x1000), FaultDecision::Decline);
    }
}
