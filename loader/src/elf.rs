// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Image parser (C6): the one concrete implementation of the external
//! parser contract carried by this crate. Reads a real ELF64 executable's
//! `PT_LOAD` program headers into a [`loader_format::ImageDescriptor`].
//!
//! The loader core (`segment_table`, `dispatcher`, `pager`) never touches
//! this module's types; it only ever sees the [`loader_format`] contract,
//! so an embedder is free to swap in a different parser entirely.

use crate::error::ParseError;
use loader_format::{ImageDescriptor, Perm, Segment};
use object::elf;
use object::read::elf::{ElfFile64, FileHeader, ProgramHeader};
use object::Endianness;

/// Parses `bytes` as a static, position-dependent ELF64 executable.
///
/// # Errors
/// Returns [`ParseError`] if the file is not valid ELF64, is not `ET_EXEC`,
/// carries a `PT_DYNAMIC`/`PT_INTERP` header (i.e. needs a dynamic linker),
/// has no `PT_LOAD` segments, or has no entry point.
pub fn parse(bytes: &[u8]) -> Result<ImageDescriptor, ParseError> {
    let elf_file = ElfFile64::<Endianness>::parse(bytes)?;
    let header = elf_file.elf_header();
    let endian = elf_file.endian();

    if header.e_type(endian) != elf::ET_EXEC {
        return Err(ParseError::NotStatic);
    }

    let mut segments = Vec::new();
    for ph in elf_file.elf_program_headers() {
        match ph.p_type(endian) {
            elf::PT_DYNAMIC | elf::PT_INTERP => return Err(ParseError::NotStatic),
            elf::PT_LOAD => segments.push(Segment::new(
                ph.p_vaddr(endian),
                ph.p_offset(endian),
                ph.p_filesz(endian),
                ph.p_memsz(endian),
                perm_from_flags(ph.p_flags(endian)),
            )),
            _ => {}
        }
    }

    if segments.is_empty() {
        return Err(ParseError::NoSegments);
    }

    let entry = header.e_entry(endian);
    if entry == 0 {
        return Err(ParseError::NoEntryPoint);
    }

    Ok(ImageDescriptor::new(entry, segments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_input() {
        let err = parse(b"not an elf file").unwrap_err();
        assert!(matches!(err, ParseError::Object(_)));
    }

    #[test]
    fn rejects_truncated_input() {
        let err = parse(&[0x7f, b'E', b'L', b'F']).unwrap_err();
        assert!(matches!(err, ParseError::Object(_)));
    }

    #[test]
    fn perm_from_flags_maps_all_bits() {
        assert_eq!(perm_from_flags(elf::PF_R), Perm::R);
        assert_eq!(perm_from_flags(elf::PF_W), Perm::W);
        assert_eq!(perm_from_flags(elf::PF_X), Perm::X);
        assert_eq!(
            perm_from_flags(elf::PF_R | elf::PF_W | elf::PF_X),
            Perm::R | Perm::W | Perm::X
        );
        assert_eq!(perm_from_flags(0), Perm::empty());
    }
}

fn perm_from_flags(p_flags: u32) -> Perm {
    let mut perm = Perm::empty();
    if p_flags & elf::PF_R != 0 {
        perm |= Perm::R;
    }
    if p_flags & elf::PF_W != 0 {
        perm |= Perm::W;
    }
    if p_flags & elf::PF_X != 0 {
        perm |= Perm::X;
    }
    perm
}
