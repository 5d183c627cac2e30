// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of enriched records into the document shipped to the relay.
//!
//! The target only depends on [`DocumentConverter`]; [`JsonConverter`] is the
//! canonical strategy. A converter may decline a record by returning `None`,
//! in which case the record is skipped without error.

use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::record::LogRecord;

/// Serializable document produced from a record
#[derive(Debug, Clone, PartialEq)]
pub struct Document(Value);

impl Document {
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Canonical compact text: no whitespace, keys in insertion order.
    pub fn to_compact_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }
}

pub trait DocumentConverter: Send + Sync {
    /// Returns `None` when the record should be skipped.
    fn convert(&self, record: &LogRecord) -> Option<Document>;
}

/// Emits `{"timestamp", "level", "message", "properties"}` objects.
///
/// Records with a blank message and no properties carry nothing worth
/// forwarding and are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl DocumentConverter for JsonConverter {
    fn convert(&self, record: &LogRecord) -> Option<Document> {
        if record.message.trim().is_empty() && record.properties.is_empty() {
            return None;
        }

        Some(Document(json!({
            "timestamp": record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            "level": record.level,
            "message": record.message,
            "properties": record.properties,
        })))
    }
}
