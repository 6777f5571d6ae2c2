//! Tracing configuration and initialization.

use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::app_config::LogConfig;

/// Output style of the subscriber.
enum TrcMode {
    /// Compact, target-less lines. The default when nobody asked for a filter.
    Pretty,
    /// Plain verbose output with span enter/close events.
    Verbose,
}

pub struct Trc {
    mode: TrcMode,
    env_filter: EnvFilter,
    color: bool,
}

impl Default for Trc {
    fn default() -> Self {
        Self::from_config(&LogConfig::default())
    }
}

impl Trc {
    /// Builds the subscriber settings.
    ///
    /// Filter priority: `REDIR_CACHE_LOG`, then `RUST_LOG`, then the config
    /// file's `log.filter`, then `info`.
    pub fn from_config(log: &LogConfig) -> Self {
        let maybe_env_filter = EnvFilter::try_from_env("REDIR_CACHE_LOG")
            .or_else(|_| EnvFilter::try_from_default_env());

        match maybe_env_filter {
            // Someone asked for specific targets, so they get the verbose output.
            Ok(env_filter) => Self {
                mode: TrcMode::Verbose,
                env_filter,
                color: log.color,
            },
            Err(_) => Self {
                mode: TrcMode::Pretty,
                env_filter: log
                    .filter
                    .as_deref()
                    .and_then(|directive| EnvFilter::try_new(directive).ok())
                    .unwrap_or_else(|| EnvFilter::new("info")),
                color: log.color,
            },
        }
    }

    pub fn init(self) -> Result<(), TryInitError> {
        match self.mode {
            TrcMode::Verbose => self.init_verbose_mode(),
            TrcMode::Pretty => self.init_pretty_mode(),
        }
    }

    fn init_verbose_mode(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(self.color)
                    .with_span_events(FmtSpan::ENTER | FmtSpan::CLOSE),
            )
            .try_init()
    }

    fn init_pretty_mode(self) -> Result<(), TryInitError> {
        tracing_subscriber::registry()
            .with(self.env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(self.color)
                    .with_target(false)
                    .without_time()
                    .compact(),
            )
            .try_init()
    }
}
