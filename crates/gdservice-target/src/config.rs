// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::enricher::ParameterSpec;
use crate::error::ConfigError;

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A parameter as written in configuration, before its layout is parsed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterConfig {
    pub name: String,
    pub layout: String,
}

/// Configuration for a GDService target
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Address of the guaranteed-delivery relay, e.g. `https://gd.example/hub`
    pub relay_endpoint: String,
    /// Destination forwarded to the relay with every record
    pub target_endpoint: String,
    /// Parameters added to each record, in order
    pub parameters: Vec<ParameterConfig>,
    /// Upper bound on establishing the relay connection, in seconds
    pub connect_timeout_secs: u64,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            relay_endpoint: String::new(),
            target_endpoint: String::new(),
            parameters: Vec::new(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl TargetConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let relay_endpoint = env::var("GD_RELAY_ENDPOINT").unwrap_or_default();
        let target_endpoint = env::var("GD_TARGET_ENDPOINT").unwrap_or_default();
        let parameters = match env::var("GD_PARAMETERS") {
            Ok(raw) => parse_parameters(&raw)?,
            Err(_) => Vec::new(),
        };
        let connect_timeout_secs = match env::var("GD_CONNECT_TIMEOUT_SECS") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::InvalidValue {
                    field: "GD_CONNECT_TIMEOUT_SECS",
                    reason: e.to_string(),
                })?,
            Err(_) => DEFAULT_CONNECT_TIMEOUT_SECS,
        };
        let log_level = env::var("GD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());

        let config = Self {
            relay_endpoint,
            target_endpoint,
            parameters,
            connect_timeout_secs,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay_url()?;
        self.target_url()?;
        self.parameter_specs()?;

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout_secs",
                reason: "must be greater than 0".to_string(),
            });
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "log_level",
                reason: format!(
                    "'{}' is not one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            });
        }

        Ok(())
    }

    pub fn relay_url(&self) -> Result<Url, ConfigError> {
        parse_endpoint("relay_endpoint", &self.relay_endpoint)
    }

    pub fn target_url(&self) -> Result<Url, ConfigError> {
        parse_endpoint("target_endpoint", &self.target_endpoint)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Parses every parameter layout, rejecting duplicate names.
    pub fn parameter_specs(&self) -> Result<Vec<ParameterSpec>, ConfigError> {
        let mut specs: Vec<ParameterSpec> = Vec::with_capacity(self.parameters.len());
        for parameter in &self.parameters {
            if specs.iter().any(|spec| spec.name == parameter.name) {
                return Err(ConfigError::InvalidParameter(format!(
                    "duplicate parameter name '{}'",
                    parameter.name
                )));
            }
            specs.push(ParameterSpec::new(&parameter.name, &parameter.layout)?);
        }
        Ok(specs)
    }
}

/// Expands environment variables and parses the result as an absolute URL.
pub fn parse_endpoint(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let expanded = expand_environment_variables(raw.trim());
    if expanded.is_empty() {
        return Err(ConfigError::MissingRequired(field));
    }
    Url::parse(&expanded).map_err(|e| ConfigError::InvalidEndpoint {
        field,
        value: expanded.clone(),
        reason: e.to_string(),
    })
}

/// Replaces `%NAME%` with the value of the environment variable `NAME`.
///
/// References to unset variables are left verbatim, and the closing `%` of
/// such a reference may open the next one.
#[must_use]
pub fn expand_environment_variables(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(open) = rest.find('%') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('%') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let name = &after[..close];
        let value = if name.is_empty() {
            None
        } else {
            env::var(name).ok()
        };
        match value {
            Some(value) => {
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('%');
                out.push_str(name);
                rest = &after[close..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parses `name=layout` pairs separated by `;`.
fn parse_parameters(raw: &str) -> Result<Vec<ParameterConfig>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, layout)) => Ok(ParameterConfig {
                name: name.trim().to_string(),
                layout: layout.to_string(),
            }),
            None => Err(ConfigError::InvalidParameter(format!(
                "expected name=layout, got '{entry}'"
            ))),
        })
        .collect()
}
