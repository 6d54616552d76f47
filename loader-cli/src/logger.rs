// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use anstyle::{AnsiColor, Color, Style};
use log::{log_enabled, Level};
use std::io::Write;

/// Installs the process-wide logger. `verbosity` is the number of times
/// `-v` was passed on the command line.
///
/// Fault-dispatcher trace records carry an `addr` key-value (the faulting
/// virtual address); those get the address itself printed in place of the
/// level tag, so a `-vv` run reads as a column of addresses rather than a
/// column of repeated `Trace` labels.
pub fn init(verbosity: u8) {
    let mut builder = env_logger::Builder::from_default_env();

    builder
        .format_indent(Some(12))
        .filter(None, verbosity_level(verbosity).to_level_filter())
        .format(|f, record| {
            let style = f.default_level_style(record.level()).bold();

            if let Some(addr) = record.key_values().get("addr".into()) {
                let style = style.fg_color(Some(Color::Ansi(AnsiColor::Cyan)));

                write!(f, "{style}{:>12}{style:#} ", addr)?;
            } else {
                write!(f, "{style}{:>12}{style:#} ", prettyprint_level(record.level()))?;
            }

            if log_enabled!(Level::Debug) {
                let style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack)));

                write!(f, "{style}[{}]{style:#} ", record.target())?;
            }

            writeln!(f, "{}", record.args())
        })
        .init();
}

/// Maps the occurrence count of `--verbose` to the minimum level printed.
fn verbosity_level(num: u8) -> Level {
    match num {
        0 => Level::Info,
        1 => Level::Debug,
        2.. => Level::Trace,
    }
}

fn prettyprint_level(lvl: Level) -> &'static str {
    match lvl {
        Level::Error => "Error",
        Level::Warn => "Warn",
        Level::Info => "Info",
        Level::Debug => "Debug",
        Level::Trace => "Trace",
    }
}
