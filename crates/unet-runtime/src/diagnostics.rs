//! Diagnostics sink: routes host logging to the native log
//!
//! The host logs through `tracing`. [`NativeLogLayer`] forwards every event to
//! the bridge's log function once the bridge is set; before that, events only
//! reach whatever other layers are installed.

use crate::bridge::Core;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as fmt_layer, EnvFilter, Layer};
use unet_interop::{LogFlags, LogVerbosity};

/// Environment variable holding the console log filter
pub const LOG_ENV_VAR: &str = "UNET_LOG";

/// Field carrying an explicit native verbosity on an event
pub const VERBOSITY_FIELD: &str = "verbosity";

/// Native verbosity for a tracing level
pub fn verbosity_for(level: Level) -> LogVerbosity {
    match level {
        Level::ERROR => LogVerbosity::Error,
        Level::WARN => LogVerbosity::Warning,
        Level::INFO => LogVerbosity::Display,
        Level::DEBUG => LogVerbosity::Log,
        Level::TRACE => LogVerbosity::Verbose,
    }
}

/// Log `message` at a native verbosity
///
/// Blank messages are dropped.
pub fn log(verbosity: LogVerbosity, message: &str) {
    if message.trim().is_empty() {
        return;
    }

    let raw = verbosity as u8;
    match verbosity {
        LogVerbosity::NoLogging => {}
        LogVerbosity::Fatal | LogVerbosity::Error => {
            tracing::error!(verbosity = raw, "{}", message)
        }
        LogVerbosity::Warning => tracing::warn!(verbosity = raw, "{}", message),
        LogVerbosity::Display => tracing::info!(verbosity = raw, "{}", message),
        LogVerbosity::Log => tracing::debug!(verbosity = raw, "{}", message),
        LogVerbosity::Verbose | LogVerbosity::VeryVerbose => {
            tracing::trace!(verbosity = raw, "{}", message)
        }
    }
}

/// Tracing layer writing events to the native log
#[derive(Debug, Clone)]
pub struct NativeLogLayer {
    core: Arc<Core>,
}

impl NativeLogLayer {
    /// Forward to the bridge held by `core`
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

impl<S: Subscriber> Layer<S> for NativeLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Ok(bridge) = self.core.bridge() else {
            return;
        };

        let mut visitor = NativeMessage::default();
        event.record(&mut visitor);

        let verbosity = visitor
            .verbosity
            .and_then(|raw| u8::try_from(raw).ok())
            .and_then(LogVerbosity::from_raw)
            .unwrap_or_else(|| verbosity_for(*event.metadata().level()));

        let text = visitor.finish();
        if text.trim().is_empty() || verbosity == LogVerbosity::NoLogging {
            return;
        }

        bridge.log(verbosity, LogFlags::empty(), &text);
    }
}

#[derive(Default)]
struct NativeMessage {
    message: String,
    fields: String,
    verbosity: Option<u64>,
}

impl NativeMessage {
    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }

    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }
}

impl Visit for NativeMessage {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == VERBOSITY_FIELD {
            self.verbosity = Some(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

/// Install the global subscriber: console output plus the native log
///
/// The console filter comes from `UNET_LOG`, falling back to
/// `default_filter`. Returns false when a global subscriber already exists.
pub fn init_logging(core: Arc<Core>, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(
            fmt_layer::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .with(NativeLogLayer::new(core))
        .try_init()
        .is_ok()
}
