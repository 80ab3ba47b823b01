//! Logging bootstrap and connection metrics.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `wirebridge_frames_received_total` | Counter | `kind` | Decoded inbound frames |
//! | `wirebridge_protocol_violations_total` | Counter | `status` | Connections closed for a violation |
//! | `wirebridge_pings_sent_total` | Counter | - | Idle pings sent |
//! | `wirebridge_connections_accepted_total` | Counter | - | Connections accepted |
//! | `wirebridge_connections_closed_total` | Counter | - | Connections torn down |
//! | `wirebridge_active_connections` | Gauge | - | Registered connections |
//!
//! No recorder is installed here; without one the macros are no-ops.

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use wirebridge_codec::FrameKind;

/// Errors raised while installing the log subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level or filter directive could not be parsed.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    /// A global subscriber was already installed.
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether logging is enabled.
    pub enabled: bool,

    /// Log level or filter directive (e.g., "info", "wirebridge_ws=debug").
    pub level: String,

    /// Whether to output JSON format.
    pub json_format: bool,

    /// Whether to include span events (new, close).
    pub span_events: bool,

    /// Whether to include file/line info.
    pub file_line_info: bool,

    /// Whether to include target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            json_format: false,
            span_events: true,
            file_line_info: true,
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = EnvFilter::try_new(&config.level)
        .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?;

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    if config.json_format {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter);

        tracing_subscriber::registry()
            .with(fmt_layer)
            .try_init()
            .map_err(|e| LoggingError::Install(e.to_string()))?;
    }

    Ok(())
}

fn kind_label(kind: FrameKind) -> &'static str {
    match kind {
        FrameKind::Text => "text",
        FrameKind::Binary => "binary",
        FrameKind::Ping => "ping",
        FrameKind::Pong => "pong",
        FrameKind::Close => "close",
        FrameKind::Headers => "headers",
        FrameKind::Invalid => "invalid",
        FrameKind::InvalidUtf8 => "invalid_utf8",
        FrameKind::FragmentedControl => "fragmented_control",
    }
}

/// Count a decoded inbound frame.
pub fn record_frame_received(kind: FrameKind) {
    counter!("wirebridge_frames_received_total", "kind" => kind_label(kind)).increment(1);
}

/// Count a connection closed for a protocol violation.
pub fn record_protocol_violation(status: u16) {
    counter!("wirebridge_protocol_violations_total", "status" => status.to_string()).increment(1);
}

/// Count an idle ping.
pub fn record_ping_sent() {
    counter!("wirebridge_pings_sent_total").increment(1);
}

/// Count an accepted connection and update the active gauge.
pub fn record_connection_accepted(active: usize) {
    counter!("wirebridge_connections_accepted_total").increment(1);
    gauge!("wirebridge_active_connections").set(active as f64);
}

/// Count a closed connection and update the active gauge.
pub fn record_connection_closed(active: usize) {
    counter!("wirebridge_connections_closed_total").increment(1);
    gauge!("wirebridge_active_connections").set(active as f64);
}
