// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Adds configured parameters to a record before it is converted.

use tracing::trace;

use crate::error::{ConfigError, RenderError};
use crate::layout::Layout;
use crate::record::LogRecord;

/// A named value computed from each record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub layout: Layout,
}

impl ParameterSpec {
    /// Parses `layout` and binds it to `name`.
    pub fn new(name: impl Into<String>, layout: &str) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidParameter(
                "parameter name cannot be empty".to_string(),
            ));
        }
        let layout = Layout::parse(layout).map_err(|reason| ConfigError::InvalidLayout {
            parameter: name.clone(),
            reason,
        })?;
        Ok(Self { name, layout })
    }
}

/// Applies parameters in declaration order, never replacing a property the
/// record already carries.
#[derive(Debug, Clone, Default)]
pub struct ParameterEnricher {
    parameters: Vec<ParameterSpec>,
}

impl ParameterEnricher {
    #[must_use]
    pub fn new(parameters: Vec<ParameterSpec>) -> Self {
        Self { parameters }
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    /// Enriches `record` in place.
    ///
    /// Stops at the first parameter that fails to render. Properties inserted
    /// before the failure stay on the record, but the caller drops it.
    pub fn enrich(&self, record: &mut LogRecord) -> Result<(), RenderError> {
        for parameter in &self.parameters {
            if record.properties.contains_key(&parameter.name) {
                trace!("Parameter '{}' already set on record", parameter.name);
                continue;
            }
            let value = parameter
                .layout
                .render(record)
                .map_err(|reason| RenderError {
                    parameter: parameter.name.clone(),
                    reason,
                })?;
            record.properties.insert_if_absent(parameter.name.clone(), value);
        }
        Ok(())
    }
}
