//! Log levels and diagnostics setup.
//!
//! Two distinct sinks exist. Messages for the *node* travel as `log`
//! notifications on stdout (see [`crate::plugin::Plugin::log`]); the
//! library's own diagnostics go through `tracing`. A tracing layer
//! writing to stdout WILL break the JSON-RPC protocol, so [`init`] only
//! ever points the subscriber at stderr or a log file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Layer, Registry};

/// Severity of a `log` notification, named as the node spells them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Install a global tracing subscriber for the plugin's own diagnostics.
///
/// With a directory the output goes to a daily-rolled `plugin.log` there;
/// without one it goes to stderr. Safe to call more than once; later
/// calls are ignored.
pub fn init(level: LogLevel, log_dir: Option<&Path>) {
    let filter: LevelFilter = level.into();

    let result = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).ok();
            let appender = tracing_appender::rolling::daily(dir, "plugin.log");
            let subscriber = Registry::default().with(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(appender)
                    .with_filter(filter),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
        None => {
            let subscriber = Registry::default().with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .with_filter(filter),
            );
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    // Already-set means an embedding binary configured its own; fine.
    let _ = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(LogLevel::Debug.to_string(), "debug");
        assert_eq!(LogLevel::Warn.as_ref(), "warn");
        assert_eq!(
            serde_json::to_value(LogLevel::Error).unwrap(),
            serde_json::json!("error")
        );
    }

    #[test]
    fn levels_parse_from_wire_names() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("fatal".parse::<LogLevel>().is_err());
    }
}
