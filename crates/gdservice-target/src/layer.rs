// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! ```rust,ignore
//! use tracing_subscriber::prelude::*;
//!
//! let target = Arc::new(TargetRegistry::with_defaults().create(GDSERVICE, &config)?);
//! target.connect().await?;
//! tracing_subscriber::registry()
//!     .with(GdServiceLayer::new(target))
//!     .init();
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::record::{Level, LogRecord};
use crate::target::GdServiceTarget;

/// Property holding the event's target
pub const LOGGER_PROPERTY: &str = "logger";

// Events from these targets are emitted while forwarding a record.
const INTERNAL_TARGETS: [&str; 8] = [
    "gdservice_target",
    "tokio_tungstenite",
    "tungstenite",
    "rustls",
    "tokio",
    "mio",
    "h2",
    "hyper",
];

/// Forwards every `tracing` event to a [`GdServiceTarget`]
#[derive(Debug, Clone)]
pub struct GdServiceLayer {
    target: Arc<GdServiceTarget>,
}

impl GdServiceLayer {
    #[must_use]
    pub fn new(target: Arc<GdServiceTarget>) -> Self {
        Self { target }
    }
}

impl<S: Subscriber> Layer<S> for GdServiceLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }
        self.target.write(event_to_record(event));
    }
}

fn is_internal(target: &str) -> bool {
    INTERNAL_TARGETS.iter().any(|internal| {
        target
            .strip_prefix(internal)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

fn event_to_record(event: &Event<'_>) -> LogRecord {
    let metadata = event.metadata();
    let mut visitor = RecordVisitor {
        record: LogRecord::new(Level::from(*metadata.level()), String::new()),
    };
    event.record(&mut visitor);

    let mut record = visitor.record;
    record
        .properties
        .insert_if_absent(LOGGER_PROPERTY, metadata.target());
    record
}

struct RecordVisitor {
    record: LogRecord,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.record.message = value.to_string();
        } else {
            self.record.properties.insert_if_absent(field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.record.message = value;
        } else {
            self.record.properties.insert_if_absent(field.name(), value);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    /// Captures converted records instead of forwarding them.
    #[derive(Clone, Default)]
    struct Capture(Arc<std::sync::Mutex<Vec<LogRecord>>>);

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if !is_internal(event.metadata().target()) {
                self.0.lock().unwrap().push(event_to_record(event));
            }
        }
    }

    #[test]
    fn test_event_to_record() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(
                target: "checkout",
                order_id = 42,
                user = "ada",
                "payment {} declined",
                "card"
            );
        });

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.level, Level::Warn);
        assert_eq!(record.message, "payment card declined");
        assert_eq!(record.properties.get("order_id"), Some("42"));
        assert_eq!(record.properties.get("user"), Some("ada"));
        assert_eq!(record.properties.get(LOGGER_PROPERTY), Some("checkout"));
    }

    #[test]
    fn test_internal_events_are_ignored() {
        let capture = Capture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "gdservice_target::connection", "connected");
            tracing::info!(target: "tokio_tungstenite::handshake", "upgrade");
            tracing::info!(target: "tokio_app", "kept");
        });

        let records = capture.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "kept");
    }

    #[test]
    fn test_is_internal() {
        assert!(is_internal("gdservice_target"));
        assert!(is_internal("rustls::client::hs"));
        assert!(!is_internal("hyperion"));
        assert!(!is_internal("my_app::rustls"));
    }
}
