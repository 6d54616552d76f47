// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Pager (C4): materializes exactly one page on first touch.

use crate::platform::Platform;
use loader_format::{Perm, Segment};
use std::fs::File;
use std::io;

/// Allocates, populates, and finalizes protection for page `page_index` of
/// `segment`.
///
/// Every failure here is treated as fatal by the caller: inside the fault
/// handler there is no instruction the guest could usefully retry, so the
/// error is propagated only far enough to be logged before the process
/// aborts.
pub fn page_in(
    platform: &dyn Platform,
    file: &File,
    segment: &Segment,
    page_index: usize,
) -> io::Result<()> {
    let page_size = platform.page_size();
    let page_va = segment.vaddr + u64::try_from(page_index).expect("page index fits in u64") * page_size;
    let page_off_in_seg = u64::try_from(page_index).expect("page index fits in u64") * page_size;

    let bytes_from_file = if page_off_in_seg >= segment.file_size {
        0
    } else {
        (segment.file_size - page_off_in_seg).min(page_size)
    };

    // Safety: `page_va` is page-aligned (segment.vaddr is page-aligned and
    // page_off_in_seg is a multiple of page_size), and this page has not
    // been mapped before (mark_and_test guarantees we only get here on
    // first touch).
    unsafe {
        platform.map_fixed(page_va, page_size, segment.perm)?;
    }

    if bytes_from_file > 0 {
        let len = usize::try_from(bytes_from_file).expect("bytes_from_file fits in usize");
        // Safety: the page was just mapped read-write by `map_fixed` above,
        // so writing `len` (<= page_size) bytes starting at `page_va` is in
        // bounds and exclusively ours until we return.
        let dst = unsafe { std::slice::from_raw_parts_mut(page_va as *mut u8, len) };
        platform.pread(file, dst, segment.file_offset + page_off_in_seg)?;
    }
    // The rest of the page (BSS tail, or the whole page for a pure-BSS
    // page) is already zero because `map_fixed` maps fresh anonymous
    // memory.

    if !segment.perm.contains(Perm::W) {
        // Safety: the page is currently mapped read-write (or read-write-
        // execute) by `map_fixed`; lowering to the declared permissions is
        // always a valid transition.
        unsafe {
            platform.protect(page_va, page_size, segment.perm)?;
        }
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform::HostPlatform;
    use std::io::Write;

    /// Reserves a page-aligned region of `len` bytes at an address the
    /// kernel is free to pick, then gives it back so a test can treat it as
    /// unmapped scratch address space for `map_fixed`.
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

    fn sample_file(contents: &[u8]) -> std::fs::File {
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(contents).unwrap();
        f
    }

    #[test]
    fn pages_in_file_backed_content() {
        let platform = HostPlatform::new();
        let page_size = platform.page_size();
        let file = sample_file(b"hello world");

        let va = reserve_scratch(page_size);
        let segment = Segment::new(va, 0, 11, page_size, Perm::R);

        page_in(&platform, &file, &segment, 0).unwrap();

        // Safety: page_in just mapped exactly one page at `va`.
        let bytes = unsafe {
            std::slice::from_raw_parts(va as *const u8, usize::try_from(page_size).unwrap())
        };
        assert_eq!(&bytes[..11], b"hello world");
        assert!(bytes[11..].iter().all(|&b| b == 0));

        // Safety: undoes the mapping `page_in` made above.
        unsafe {
            platform.unmap(va, page_size).unwrap();
        }
    }

    #[test]
    fn pages_in_pure_bss() {
        let platform = HostPlatform::new();
        let page_size = platform.page_size();
        let file = sample_file(b"");

        let va = reserve_scratch(page_size);
        let segment = Segment::new(va, 0, 0, page_size, Perm::R | Perm::W);

        page_in(&platform, &file, &segment, 0).unwrap();

        // Safety: page_in just mapped exactly one page at `va`.
        let bytes = unsafe {
            std::slice::from_raw_parts(va as *const u8, usize::try_from(page_size).unwrap())
        };
        assert!(bytes.iter().all(|&b| b == 0));

        // Safety: undoes the mapping `page_in` made above.
        unsafe {
            platform.unmap(va, page_size).unwrap();
        }
    }

    #[test]
    fn pages_in_second_page_of_a_multi_page_segment() {
        let platform = HostPlatform::new();
        let page_size = platform.page_size();
        let mut contents = vec![0u8; page_size as usize];
        contents.extend_from_slice(b"second page");
        let file = sample_file(&contents);

        let va = reserve_scratch(page_size * 2);
        let file_size = u64::try_from(contents.len()).unwrap();
        let segment = Segment::new(va, 0, file_size, page_size * 2, Perm::R);

        page_in(&platform, &file, &segment, 1).unwrap();

        let page_va = va + page_size;
        // Safety: page_in just mapped exactly one page at `page_va`.
        let bytes = unsafe {
            std::slice::from_raw_parts(page_va as *const u8, usize::try_from(page_size).unwrap())
        };
        assert_eq!(&bytes[..11], b"second page");

        // Safety: undoes the mapping `page_in` made above.
        unsafe {
            platform.unmap(page_va, page_size).unwrap();
        }
    }
}
