// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use loader_format::{ImageDescriptor, Segment};

/// In-memory record of all loadable segments plus per-page residency
/// bookkeeping (C2).
///
/// Segments are expected to number in the dozens at most, so [`find`] is a
/// plain linear scan rather than an interval tree. Segments are addressed
/// by index rather than by reference so that a single fault can look one
/// up, test and mark its residency, and (elsewhere) reach the open file
/// handle, without fighting the borrow checker over one `&mut Segment`.
pub struct SegmentTable {
    descriptor: ImageDescriptor,
    page_size: u64,
}

/// Outcome of consulting the residency bit for a page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Residency {
    FirstTouch,
    AlreadyResident,
}

impl SegmentTable {
    #[must_use]
    pub fn new(descriptor: ImageDescriptor, page_size: u64) -> Self {
        Self {
            descriptor,
            page_size,
        }
    }

    #[must_use]
    pub fn entry(&self) -> u64 {
        self.descriptor.entry
    }

    /// Finds the segment claiming `addr`, returning its index and the page
    /// index within it.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<(usize, usize)> {
        let (idx, segment) = self
            .descriptor
            .segments
            .iter()
            .enumerate()
            .find(|(_, s)| s.contains(addr))?;
        let page_index = usize::try_from((addr - segment.vaddr) / self.page_size)
            .expect("page index fits in usize");
        Some((idx, page_index))
    }

    #[must_use]
    pub fn segment(&self, idx: usize) -> &Segment {
        &self.descriptor.segments[idx]
    }

    /// Lazily allocates the segment's residency array on first use, then
    /// tests the given page.
    ///
    /// This never marks the page resident itself: the caller must do so
    /// only after the page has been fully populated, so a fault that fails
    /// partway through retries instead of being skipped on the next touch.
    pub fn mark_and_test(&mut self, idx: usize, page_index: usize) -> Residency {
        let residency = self.descriptor.segments[idx].residency_mut(self.page_size);
        if residency[page_index] {
            Residency::AlreadyResident
        } else {
            Residency::FirstTouch
        }
    }

    pub fn mark_resident(&mut self, idx: usize, page_index: usize) {
        self.descriptor.segments[idx].residency_mut(self.page_size)[page_index] = true;
    }

    pub fn segments(&self) -> &[Segment] {
        &self.descriptor.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_format::Perm;

    fn table() -> SegmentTable {
        let descriptor = ImageDescriptor::new(
            0x1000,
            vec![
                Segment::new(0x1000, 0, 0x1000, 0x1000, Perm::R | Perm::X),
                Segment::new(0x3000, 0x1000, 0x800, 0x2000, Perm::R | Perm::W),
            ],
        );
        SegmentTable::new(descriptor, 0x1000)
    }

    #[test]
    fn find_misses_outside_every_segment() {
        assert_eq!(table().find(0x2500), None);
    }

    #[test]
    fn find_locates_segment_and_page() {
        assert_eq!(table().find(0x1000), Some((0, 0)));
        assert_eq!(table().find(0x4000), Some((1, 1)));
    }

    #[test]
    fn mark_and_test_is_first_touch_once() {
        let mut table = table();
        assert_eq!(table.mark_and_test(0, 0), Residency::FirstTouch);
        // A second test before marking resident must still report FirstTouch:
        // mark_and_test never marks on its own.
        assert_eq!(table.mark_and_test(0, 0), Residency::FirstTouch);

        table.mark_resident(0, 0);
        assert_eq!(table.mark_and_test(0, 0), Residency::AlreadyResident);
    }

    #[test]
    fn marking_one_page_leaves_others_untouched() {
        let mut table = table();
        table.mark_resident(1, 1);
        assert_eq!(table.mark_and_test(1, 0), Residency::FirstTouch);
        assert_eq!(table.mark_and_test(1, 1), Residency::AlreadyResident);
    }
}
