// SPDX-License-Identifier: MPL-2.0

//! Logging support.

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Metadata, Record};

use crate::arch::console;

const LOGGER: Logger = Logger {};

struct Logger {}

struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            console::send(byte);
        }
        Ok(())
    }
}

impl log::Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(ConsoleWriter, "[{:>5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Chooses the log level from the `loglevel=` boot parameter, defaulting
/// to `Info`.
fn level_from_cmdline(cmdline: &str) -> LevelFilter {
    for piece in cmdline.split_whitespace() {
        if let Some(value) = piece.strip_prefix("loglevel=") {
            return match value {
                "off" => LevelFilter::Off,
                "error" => LevelFilter::Error,
                "warn" => LevelFilter::Warn,
                "info" => LevelFilter::Info,
                "debug" => LevelFilter::Debug,
                "trace" => LevelFilter::Trace,
                _ => Level::Info.to_level_filter(),
            };
        }
    }
    Level::Info.to_level_filter()
}

pub(crate) fn init() {
    let level = level_from_cmdline(&crate::boot::boot_info().cmdline);
    // A second logger may already be installed when tests drive the frame;
    // in that case keep the existing one.
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cmdline_selects_level() {
        assert_eq!(
            level_from_cmdline("root=/dev/vda loglevel=trace"),
            LevelFilter::Trace
        );
        assert_eq!(level_from_cmdline(""), LevelFilter::Info);
        assert_eq!(level_from_cmdline("loglevel=bogus"), LevelFilter::Info);
    }
}
