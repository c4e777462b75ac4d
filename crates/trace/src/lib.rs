//! Log output for tests, switched on by the `BTP_TRACE` environment variable:
//!
//! - `1`, `true` or `on`: the full format;
//! - `compact` or `pretty`: the matching format;
//! - `log-file`: daily files under `BTP_TRACE_PATH`, or `logs/` in this crate.
//!
//! `RUST_LOG` selects the events. Without it the relay crates log at `debug`
//! and everything else at `info`.
//!
//! Call [`enable_tracing!`] once in the test crate.

#![deny(clippy::arithmetic_side_effects)]
#![deny(clippy::cast_possible_truncation)]

use ctor::ctor;
use std::{
    env::var,
    path::PathBuf,
};
use tracing_subscriber::{
    fmt::format,
    EnvFilter,
    FmtSubscriber,
};

/// Selects the output.
pub const TRACE_VAR: &str = "BTP_TRACE";
/// The directory of the `log-file` output.
pub const PATH_VAR: &str = "BTP_TRACE_PATH";
/// The filter used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "info,btp_relay_link=debug,btp_relay_bin=debug";

const LOG_FILE_PREFIX: &str = "relay.log";

/// Where and how test logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// The full format, through the test writer.
    Full,
    /// One line per event, through the test writer.
    Compact,
    /// Multi-line events, through the test writer.
    Pretty,
    /// Daily rolling files in the directory.
    LogFile(PathBuf),
}

impl Output {
    /// The output selected by `value`, if any.
    pub fn parse(value: &str, log_path: Option<String>) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "1" | "true" | "on" => Some(Self::Full),
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "log-file" => {
                let dir = log_path.map(PathBuf::from).unwrap_or_else(|| {
                    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/logs"))
                });
                Some(Self::LogFile(dir))
            }
            _ => None,
        }
    }

    fn from_env() -> Option<Self> {
        let value = var(TRACE_VAR).ok()?;
        Self::parse(&value, var(PATH_VAR).ok())
    }

    fn install(self, filter: EnvFilter) {
        let builder = FmtSubscriber::builder().with_env_filter(filter);
        // Another subscriber may already be installed by the test itself.
        let _ = match self {
            Self::Full => builder.with_test_writer().try_init(),
            Self::Compact => builder
                .event_format(format().compact())
                .with_test_writer()
                .try_init(),
            Self::Pretty => builder
                .event_format(format().pretty())
                .with_test_writer()
                .try_init(),
            Self::LogFile(dir) => builder
                .event_format(format().compact())
                .with_ansi(false)
                .with_writer(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
                .try_init(),
        };
    }
}

/// The filter built from `directives`, or from [`DEFAULT_DIRECTIVES`].
pub fn filter(directives: Option<String>) -> EnvFilter {
    EnvFilter::new(directives.as_deref().unwrap_or(DEFAULT_DIRECTIVES))
}

#[ctor]
pub static TRACE: () = {
    if let Some(output) = Output::from_env() {
        output.install(filter(var("RUST_LOG").ok()));
    }
};

#[macro_export]
macro_rules! enable_tracing {
    () => {
        static _TRACE: &$crate::TRACE<()> = &$crate::TRACE;
    };
}
