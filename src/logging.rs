//! Logging setup for the shelfcache binary.
//!
//! The library only emits records through the `log` facade; this module
//! installs the `env_logger` backend. The level comes from `RUST_LOG` when
//! it is set, otherwise from the `-q`/`-v` flags (error, info, debug,
//! trace).
//!
//! ```rust,no_run
//! shelfcache::logging::init_logging(1, false);
//! log::debug!("cache root ready");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Install the logger.
///
/// A second call after a logger is installed does nothing, so tests that
/// drive `run_app` several times in one process do not panic.
pub fn init_logging(verbose: u8, quiet: bool) {
    let from_env = std::env::var_os("RUST_LOG").is_some();

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }
    configure_format(&mut builder, verbose);

    if builder.try_init().is_ok() {
        log::debug!(
            "Logging initialized at {}",
            if from_env {
                "RUST_LOG".to_string()
            } else {
                determine_level(verbose, quiet).to_string()
            }
        );
    }
}

/// Level for the CLI flags; `quiet` wins over `verbose`.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        return LevelFilter::Error;
    }
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

// Debug builds carry timestamps, and module paths once -v is given. Release
// builds print level and message only.
fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            let timestamp = buf.timestamp_seconds();
            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {style}{:<5}{style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(buf, "{} {style}{:<5}{style:#} {}", timestamp, level, record.args())
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let style = buf.default_level_style(level);
            writeln!(buf, "{style}{:<5}{style:#} {}", level, record.args())
        });
    }
}
