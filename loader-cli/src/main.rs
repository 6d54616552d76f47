// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Command-line front-end (C10): parses arguments, configures logging, and
//! hands a single image off to [`loader::execute`].

mod logger;

use clap::{ArgAction, Parser, ValueHint};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(about = "Runs a static ELF64 executable under on-demand paging")]
struct Options {
    /// Path to the executable image to load
    #[clap(value_hint = ValueHint::FilePath)]
    image: PathBuf,

    /// Arguments passed through to the guest as argv[1..]
    #[clap(trailing_var_arg = true)]
    guest_args: Vec<String>,

    /// Enables verbose logging; repeat for more detail
    #[clap(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let opts = Options::parse();
    logger::init(opts.verbose);

    let mut argv = Vec::with_capacity(opts.guest_args.len() + 1);
    argv.push(opts.image.display().to_string());
    argv.extend(opts.guest_args);

    loader::init();

    match loader::execute(&opts.image, &argv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
