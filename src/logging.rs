//! Diagnostic logging to stderr through the `log` facade.
//!
//! User-facing output (progress, summaries, per-file errors) is printed
//! directly; this backend only carries diagnostics. The level comes from
//! `GUTWIPE_LOG` when set, otherwise from the verbosity flags.

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

pub const LOG_ENV: &str = "GUTWIPE_LOG";

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;
static INITIALIZED: AtomicBool = AtomicBool::new(false);

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let tag = match record.level() {
            Level::Error => "error",
            Level::Warn => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
            Level::Trace => "trace",
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "gutwipe: {}: {}", tag, record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Level used when the environment does not say otherwise.
pub fn default_level(verbose: bool, silent: bool) -> LevelFilter {
    if silent {
        LevelFilter::Error
    } else if verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    }
}

fn level_from_env() -> Option<LevelFilter> {
    let value = std::env::var(LOG_ENV).ok()?;
    LevelFilter::from_str(value.trim()).ok()
}

/// Installs the stderr logger once; later calls only adjust the level.
pub fn init(verbose: bool, silent: bool) {
    let level = level_from_env().unwrap_or_else(|| default_level(verbose, silent));
    if !INITIALIZED.swap(true, Ordering::SeqCst) && log::set_logger(&LOGGER).is_err() {
        return;
    }
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        assert_eq!(default_level(false, false), LevelFilter::Warn);
        assert_eq!(default_level(true, false), LevelFilter::Info);
        assert_eq!(default_level(true, true), LevelFilter::Error);
    }

    #[test]
    fn test_init_is_idempotent() {
        init(false, false);
        init(true, false);
        assert!(log::max_level() >= LevelFilter::Info || std::env::var(LOG_ENV).is_ok());
    }
}
