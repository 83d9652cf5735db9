//! Process-wide tracing setup: one stdout formatter plus the optional
//! session journal (see [`SqliteLogLayer`]).

mod logging;

pub use logging::{LogQuery, LogRecord, SqliteLogLayer, SqliteLogSink};

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Dependencies that are chatty at the default level.
const QUIET: &[(&str, &str)] = &[("hyper", "warn"), ("tungstenite", "warn"), ("rusqlite", "warn")];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with span context.
    Json,
    Compact,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Ignored when `RUST_LOG` is set.
    pub level: Level,
    pub format: LogFormat,
    /// Journal database; `None` leaves the journal off.
    pub journal: Option<PathBuf>,
}

impl TelemetryConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: LogFormat::Json,
            journal: None,
        }
    }

    fn directives(&self) -> String {
        let mut out = self.level.as_str().to_ascii_lowercase();
        for (target, level) in QUIET {
            out.push_str(&format!(",{target}={level}"));
        }
        out
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directives()))
    }
}

/// Parse a level name such as `"warn"` or `"DEBUG"`.
pub fn parse_level(raw: &str) -> Option<Level> {
    Level::from_str(raw.trim()).ok()
}

/// Holds the journal open for the life of the process.
pub struct TelemetryGuard {
    journal: Option<Arc<SqliteLogSink>>,
}

impl TelemetryGuard {
    pub fn log_sink(&self) -> Option<Arc<SqliteLogSink>> {
        self.journal.clone()
    }
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let stdout = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_filter(config.filter())
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(config.filter())
            .boxed(),
    };

    let (journal, journal_error) = match config.journal.as_deref().map(SqliteLogSink::new) {
        Some(Ok(sink)) => (Some(Arc::new(sink)), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(journal.clone().map(SqliteLogLayer::new))
        .init();

    // Reported only now that there is a subscriber to receive it.
    if let (Some(e), Some(path)) = (journal_error, &config.journal) {
        tracing::warn!(path = %path.display(), error = %e, "session journal unavailable");
    }

    TelemetryGuard { journal }
}
