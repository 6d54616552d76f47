// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::Segment;

/// Opaque result of parsing an executable image: an entry point and an
/// ordered, non-overlapping list of segments.
///
/// Produced once by the external parser and owned by the loader for the
/// duration of `execute()`. Not mutated after construction except for each
/// segment's residency bookkeeping.
#[derive(Debug)]
pub struct ImageDescriptor {
    pub entry: u64,
    pub segments: Vec<Segment>,
}

impl ImageDescriptor {
    #[must_use]
    pub fn new(entry: u64, mut segments: Vec<Segment>) -> Self {
        segments.sort_by_key(|s| s.vaddr);
        Self { entry, segments }
    }

    /// True iff no two segments overlap in virtual address space.
    ///
    /// The loader's `execute()` checks this once at load time since the
    /// dispatcher's linear scan has no other opportunity to catch a
    /// malformed or adversarial image.
    #[must_use]
    pub fn segments_non_overlapping(&self) -> bool {
        self.segments
            .windows(2)
            .all(|w| w[0].vaddr + w[0].mem_size <= w[1].vaddr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Perm;

    #[test]
    fn new_sorts_segments_by_vaddr() {
        let descriptor = ImageDescriptor::new(
            0x3000,
            vec![
                Segment::new(0x3000, 0, 0x10, 0x10, Perm::R | Perm::X),
                Segment::new(0x1000, 0, 0x10, 0x10, Perm::R | Perm::X),
                Segment::new(0x2000, 0, 0x10, 0x10, Perm::R),
            ],
        );
        let vaddrs: Vec<u64> = descriptor.segments.iter().map(|s| s.vaddr).collect();
        assert_eq!(vaddrs, vec![0x1000, 0x2000, 0x3000]);
    }

    #[test]
    fn detects_adjacent_non_overlap() {
        let descriptor = ImageDescriptor::new(
            0x1000,
            vec![
                Segment::new(0x1000, 0, 0x1000, 0x1000, Perm::R | Perm::X),
                Segment::new(0x2000, 0, 0x1000, 0x1000, Perm::R),
            ],
        );
        assert!(descriptor.segments_non_overlapping());
    }

    #[test]
    fn detects_overlap() {
        let descriptor = ImageDescriptor::new(
            0x1000,
            vec![
                Segment::new(0x1000, 0, 0x1000, 0x1500, Perm::R | Perm::X),
                Segment::new(0x1400, 0, 0x1000, 0x1000, Perm::R),
            ],
        );
        assert!(!descriptor.segments_non_overlapping());
    }
}
