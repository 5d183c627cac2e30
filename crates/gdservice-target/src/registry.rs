// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::TargetConfig;
use crate::error::ConfigError;
use crate::target::GdServiceTarget;

/// Name under which the GDService target is registered
pub const GDSERVICE: &str = "GDService";

type Constructor =
    Arc<dyn Fn(&TargetConfig) -> Result<GdServiceTarget, ConfigError> + Send + Sync>;

/// Maps target type names to constructors.
///
/// Names are matched case-insensitively.
#[derive(Default, Clone)]
pub struct TargetRegistry {
    constructors: HashMap<String, (String, Constructor)>,
}

impl TargetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `GDService` target registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(GDSERVICE, GdServiceTarget::from_config);
        registry
    }

    /// Registers `constructor` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&TargetConfig) -> Result<GdServiceTarget, ConfigError> + Send + Sync + 'static,
    {
        debug!("Registering log target type {name}");
        self.constructors
            .insert(name.to_lowercase(), (name.to_string(), Arc::new(constructor)));
    }

    /// Builds an unconnected target of type `name`.
    pub fn create(
        &self,
        name: &str,
        config: &TargetConfig,
    ) -> Result<GdServiceTarget, ConfigError> {
        let (_, constructor) = self
            .constructors
            .get(&name.to_lowercase())
            .ok_or_else(|| ConfigError::UnknownTarget(name.to_string()))?;
        constructor(config)
    }

    /// Registered names as originally written, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .constructors
            .values()
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("names", &self.names())
            .finish()
    }
}
