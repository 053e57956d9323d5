//! Logging setup on top of env_logger

use std::io::IsTerminal;

/// ANSI color code and padded label for a log level.
fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Default filter for the given verbosity flags (`RUST_LOG` still wins).
fn default_level(quiet: bool, debug: bool) -> &'static str {
    if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    }
}

/// Initialize logging. Colors only when stderr is a terminal.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging(quiet: bool, debug: bool) {
    use std::io::Write;

    let color = std::io::stderr().is_terminal();
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level(quiet, debug)),
    )
    .format(move |buf, record| {
        let (pre, label, post) = level_style(record.level(), color);
        if color {
            writeln!(buf, "[{pre}{label}{post}] {}", record.args())
        } else {
            // Non-TTY: timestamp for log aggregation
            writeln!(
                buf,
                "{} [{label}] {}",
                buf.timestamp_millis(),
                record.args()
            )
        }
    })
    .try_init();

    if result.is_err() {
        log::debug!("logger already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_padded() {
        for level in [
            log::Level::Error,
            log::Level::Warn,
            log::Level::Info,
            log::Level::Debug,
            log::Level::Trace,
        ] {
            assert_eq!(level_style(level, false).1.len(), 5);
        }
    }

    #[test]
    fn no_color_has_no_escape() {
        let (pre, _, post) = level_style(log::Level::Warn, false);
        assert!(pre.is_empty() && post.is_empty());
    }

    #[test]
    fn debug_wins_over_quiet() {
        assert_eq!(default_level(true, true), "debug");
        assert_eq!(default_level(true, false), "warn");
        assert_eq!(default_level(false, false), "info");
    }

    #[test]
    fn init_twice_does_not_panic() {
        init_logging(true, false);
        init_logging(false, true);
    }
}
