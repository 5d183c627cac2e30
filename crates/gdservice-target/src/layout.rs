// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Render templates used by configured parameters.
//!
//! A layout is literal text interleaved with `${renderer}` or
//! `${renderer:option=value}` references. Layouts are parsed once when the
//! target is configured, so an unknown renderer is a configuration error and
//! rendering only fails on data that is missing at log time.
//!
//! | renderer | output |
//! |---|---|
//! | `${level}` | record level name |
//! | `${message}` | record message |
//! | `${longdate}` | `yyyy-MM-dd HH:mm:ss.ffff` |
//! | `${date}` | RFC 3339, or `${date:format=<strftime>}` |
//! | `${event-properties:item=<name>}` | property value, empty when absent |
//! | `${environment:variable=<name>}` | environment variable, error when unset |
//! | `${machinename}` | host name |
//! | `${literal:text=<text>}` | the text |

use std::env;
use std::fmt::Write;
use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{SecondsFormat, Timelike};
use tracing::warn;

use crate::record::LogRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Level,
    Message,
    LongDate,
    Date(Option<String>),
    EventProperty(String),
    Environment(String),
    MachineName,
}

/// A parsed render template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    source: String,
    segments: Vec<Segment>,
}

impl Layout {
    /// Parses `source` into a layout.
    ///
    /// Returns a description of the problem when the template references an
    /// unknown renderer, misses a required option, or leaves a `${` open.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                let offset = source.len() - rest.len() + start;
                return Err(format!("unterminated renderer at offset {offset}"));
            };
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(parse_renderer(&after[..end])?);
            rest = &after[end + 1..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text this layout was parsed from
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the layout against `record`.
    pub fn render(&self, record: &LogRecord) -> Result<String, String> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Level => out.push_str(record.level.as_str()),
                Segment::Message => out.push_str(&record.message),
                Segment::LongDate => {
                    let ts = record.timestamp;
                    write!(
                        out,
                        "{}.{:04}",
                        ts.format("%Y-%m-%d %H:%M:%S"),
                        ts.nanosecond() % 1_000_000_000 / 100_000
                    )
                    .map_err(|_| "failed to format timestamp".to_string())?;
                }
                Segment::Date(None) => {
                    out.push_str(&record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
                }
                Segment::Date(Some(format)) => {
                    write!(out, "{}", record.timestamp.format(format))
                        .map_err(|_| format!("failed to format timestamp with '{format}'"))?;
                }
                Segment::EventProperty(name) => {
                    if let Some(value) = record.properties.get(name) {
                        out.push_str(value);
                    }
                }
                Segment::Environment(name) => match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => return Err(format!("environment variable '{name}' is not set")),
                },
                Segment::MachineName => out.push_str(machine_name()),
            }
        }
        Ok(out)
    }
}

fn parse_renderer(body: &str) -> Result<Segment, String> {
    let (name, option) = match body.split_once(':') {
        Some((name, option)) => (name.trim(), Some(option)),
        None => (body.trim(), None),
    };

    match (name.to_ascii_lowercase().as_str(), option) {
        ("level", None) => Ok(Segment::Level),
        ("message", None) => Ok(Segment::Message),
        ("longdate", None) => Ok(Segment::LongDate),
        ("machinename", None) => Ok(Segment::MachineName),
        ("date", None) => Ok(Segment::Date(None)),
        ("date", Some(option)) => {
            let format = option_value(name, option, "format")?;
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(format!("invalid date format '{format}'"));
            }
            Ok(Segment::Date(Some(format.to_string())))
        }
        ("event-properties", Some(option)) => Ok(Segment::EventProperty(
            non_empty(name, option_value(name, option, "item")?)?.to_string(),
        )),
        ("environment", Some(option)) => Ok(Segment::Environment(
            non_empty(name, option_value(name, option, "variable")?)?.to_string(),
        )),
        ("literal", Some(option)) => Ok(Segment::Literal(
            option_value(name, option, "text")?.to_string(),
        )),
        ("event-properties" | "environment" | "literal", None) => {
            Err(format!("renderer '{name}' requires an option"))
        }
        ("level" | "message" | "longdate" | "machinename", Some(_)) => {
            Err(format!("renderer '{name}' takes no options"))
        }
        _ => Err(format!("unknown renderer '{name}'")),
    }
}

fn option_value<'a>(renderer: &str, option: &'a str, key: &str) -> Result<&'a str, String> {
    match option.split_once('=') {
        Some((k, v)) if k.trim().eq_ignore_ascii_case(key) => Ok(v),
        _ => Err(format!("renderer '{renderer}' expects option '{key}='")),
    }
}

fn non_empty<'a>(renderer: &str, value: &'a str) -> Result<&'a str, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(format!("renderer '{renderer}' has an empty option value"));
    }
    Ok(value)
}

/// Host name, resolved once per process
fn machine_name() -> &'static str {
    static MACHINE_NAME: OnceLock<String> = OnceLock::new();
    MACHINE_NAME.get_or_init(|| {
        if let Ok(hostname) = env::var("HOSTNAME") {
            if !hostname.is_empty() {
                return hostname;
            }
        }
        match nix::unistd::gethostname() {
            Ok(hostname) => match hostname.into_string() {
                Ok(hostname) if !hostname.is_empty() => hostname,
                _ => "unknown".to_string(),
            },
            Err(e) => {
                warn!("Failed to get system hostname: {}", e);
                "unknown".to_string()
            }
        }
    })
}
