//! Tracing initialization for the CLI
//!
//! Logs go to stderr; stdout belongs to the wrapped tool. The
//! `RECACHE_LOG` environment variable takes precedence over the
//! `--level` flag and accepts full `EnvFilter` directives.

use tracing_subscriber::EnvFilter;

/// Log level options for the CLI
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum LogLevel {
    /// Show all logs (trace level)
    Trace,
    /// Show debug and above
    Debug,
    /// Show info and above
    Info,
    /// Show warnings and above (default)
    Warn,
    /// Show errors only
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Initialize tracing with an explicit default level.
pub fn init(level: LogLevel) {
    init_with_default(level.as_str());
}

/// Initialize tracing for symlink invocations, where there are no
/// recache flags to read a level from.
pub fn init_from_env() {
    init_with_default("warn");
}

fn init_with_default(default_level: &str) {
    let filter = EnvFilter::try_from_env("RECACHE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_render_as_filter_directives() {
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(LogLevel::Warn.as_str(), "warn");
    }

    #[test]
    fn init_is_idempotent() {
        init(LogLevel::Warn);
        init(LogLevel::Debug);
        init_from_env();
    }
}
