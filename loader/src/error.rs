// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Errors returned to the caller of [`crate::execute`]. Every variant here
/// is a *returned* error: parse failures (before any resource is acquired)
/// and aggregated teardown failures. Anything that happens once the guest
/// is running and the fault handler is live is fatal and aborts the
/// process instead.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// Failed to parse the executable image
    Parse(#[from] ParseError),
    /// One or more teardown steps failed while unmapping segments or closing the image
    Teardown,
}

/// Errors from the image parser (C6). Returned to the caller before any
/// segment, mapping, or file handle has been acquired.
#[derive(Debug, onlyerror::Error)]
pub enum ParseError {
    /// Failed to read the executable image
    Io(#[from] std::io::Error),
    /// Malformed or unsupported object file
    Object(#[from] object::read::Error),
    /// The image has no entry point
    NoEntryPoint,
    /// The image has no loadable segments
    NoSegments,
    /// The image is not a static, position-dependent ELF64 executable
    NotStatic,
    /// Two or more segments overlap in virtual address space
    OverlappingSegments,
}
