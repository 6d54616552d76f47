// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Data contract between an executable-image parser and the on-demand
//! loader that maps it.
//!
//! A parser (the `object`-crate-backed one in `loader`, or any other) turns
//! a file on disk into an [`ImageDescriptor`]: an entry point plus an
//! ordered list of [`Segment`]s. The loader core never parses a file format
//! itself; it only ever walks this contract.

mod image;
mod segment;

pub use image::ImageDescriptor;
pub use segment::{Perm, Segment};
