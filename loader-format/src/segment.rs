// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use bitflags::bitflags;
use std::cell::OnceCell;

bitflags! {
    /// Segment permission bits, stable across parsers and platform adapters.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Perm: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

/// One loadable segment of an [`ImageDescriptor`](crate::ImageDescriptor).
///
/// `residency` is not part of the parser's output: it starts empty and is
/// lazily allocated by the loader's segment table the first time any page
/// of this segment is touched.
#[derive(Debug)]
pub struct Segment {
    /// Base virtual address. Page-aligned by assumption of the image format.
    pub vaddr: u64,
    /// Byte offset of this segment's file-backed bytes within the image.
    pub file_offset: u64,
    /// Bytes backed by the file, starting at `file_offset`.
    pub file_size: u64,
    /// Total bytes this segment occupies in memory. `mem_size >= file_size`;
    /// the difference is BSS.
    pub mem_size: u64,
    /// Declared final protection.
    pub perm: Perm,
    residency: OnceCell<Vec<bool>>,
}

impl Segment {
    #[must_use]
    pub fn new(vaddr: u64, file_offset: u64, file_size: u64, mem_size: u64, perm: Perm) -> Self {
        debug_assert!(mem_size >= file_size);
        Self {
            vaddr,
            file_offset,
            file_size,
            mem_size,
            perm,
            residency: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.vaddr && addr < self.vaddr + self.mem_size
    }

    pub fn page_count(&self, page_size: u64) -> usize {
        usize::try_from(self.mem_size.div_ceil(page_size)).expect("segment too large for usize")
    }

    /// Returns the residency array, allocating it (all-`false`) on first call.
    pub fn residency_mut(&mut self, page_size: u64) -> &mut Vec<bool> {
        let count = self.page_count(page_size);
        self.residency.get_or_init(|| vec![false; count]);
        self.residency.get_mut().expect("just initialized")
    }

    /// Whether a residency array has been allocated for this segment yet.
    #[must_use]
    pub fn has_residency(&self) -> bool {
        self.residency.get().is_some()
    }

    /// Iterates the indices of pages currently marked resident, for teardown.
    pub fn resident_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.residency
            .get()
            .into_iter()
            .flat_map(|v| v.iter().enumerate().filter(|(_, &r)| r).map(|(i, _)| i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_is_half_open() {
        let seg = Segment::new(0x1000, 0, 0x10, 0x3000, Perm::R);
        assert!(!seg.contains(0xfff));
        assert!(seg.contains(0x1000));
        assert!(seg.contains(0x3fff));
        assert!(!seg.contains(0x4000));
    }

    #[test]
    fn page_count_rounds_up() {
        let seg = Segment::new(0x1000, 0, 0, 0x2001, Perm::R);
        assert_eq!(seg.page_count(0x1000), 3);
    }

    #[test]
    fn residency_is_lazy_and_starts_false() {
        let mut seg = Segment::new(0x1000, 0, 0, 0x2000, Perm::R | Perm::W);
        assert!(!seg.has_residency());
        assert_eq!(seg.resident_pages().count(), 0);

        let residency = seg.residency_mut(0x1000);
        assert_eq!(residency, &vec![false, false]);
        assert!(seg.has_residency());
    }

    #[test]
    fn resident_pages_reflects_marks() {
        let mut seg = Segment::new(0x1000, 0, 0, 0x3000, Perm::R);
        seg.residency_mut(0x1000)[1] = true;
        assert_eq!(seg.resident_pages().collect::<Vec<_>>(), vec![1]);
    }
}
