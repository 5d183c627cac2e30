// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The GDService log target.
//!
//! Every record goes through the same pipeline:
//!
//! ```text
//!   LogRecord
//!       │
//!       v
//!   ┌───────────┐
//!   │ Enricher  │  (insert configured parameters)
//!   └─────┬─────┘
//!         v
//!   ┌───────────┐
//!   │ Converter │  (document, or skip)
//!   └─────┬─────┘
//!         v
//!   ┌───────────┐
//!   │ Relay     │  (storeAndForward(target, document))
//!   └───────────┘
//! ```
//!
//! [`GdServiceTarget::write`] is the hook handed to the host: it runs the
//! pipeline in the background and only logs failures.
//! [`GdServiceTarget::dispatch`] and [`GdServiceTarget::write_async`] return
//! the outcome to the caller.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{debug, error, warn, Instrument};
use url::Url;

use crate::config::{parse_endpoint, TargetConfig};
use crate::connection::websocket::WebSocketConnectionFactory;
use crate::connection::{ConnectionFactory, ConnectionManager, ConnectionState};
use crate::converter::{DocumentConverter, JsonConverter};
use crate::enricher::{ParameterEnricher, ParameterSpec};
use crate::error::{ConfigError, ConnectionError, DispatchError};
use crate::record::LogRecord;

/// Outcome of a dispatched record
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// The converter declined the record; nothing was sent.
    Skipped,
    /// The relay completed the call with this value.
    Forwarded(Value),
}

pub struct GdServiceTarget {
    connection: ConnectionManager,
    target_endpoint: RwLock<Url>,
    enricher: ParameterEnricher,
    converter: Arc<dyn DocumentConverter>,
    runtime: Option<Handle>,
}

impl GdServiceTarget {
    #[must_use]
    pub fn builder() -> GdServiceTargetBuilder {
        GdServiceTargetBuilder::default()
    }

    /// Builds an unconnected target from validated configuration.
    pub fn from_config(config: &TargetConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::builder()
            .relay_endpoint(config.relay_url()?)
            .target_endpoint(config.target_url()?)
            .connection_factory(Arc::new(WebSocketConnectionFactory::new(
                config.connect_timeout(),
            )));
        for spec in config.parameter_specs()? {
            builder = builder.parameter(spec);
        }
        builder.build()
    }

    #[must_use]
    pub fn relay_endpoint(&self) -> Option<Url> {
        self.connection.endpoint()
    }

    #[must_use]
    pub fn target_endpoint(&self) -> Url {
        self.target_endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the target endpoint after environment expansion.
    pub fn set_target_endpoint(&self, endpoint: &str) -> Result<(), ConfigError> {
        let url = parse_endpoint("target_endpoint", endpoint)?;
        *self
            .target_endpoint
            .write()
            .unwrap_or_else(PoisonError::into_inner) = url;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterSpec] {
        self.enricher.parameters()
    }

    /// Points the target at a new relay, stopping the current connection.
    ///
    /// `None` leaves the target unconfigured. Call [`connect`](Self::connect)
    /// afterwards to establish the new connection.
    pub async fn configure_relay(&self, endpoint: Option<&str>) -> Result<(), ConfigError> {
        let url = endpoint
            .map(|endpoint| parse_endpoint("relay_endpoint", endpoint))
            .transpose()?;
        self.connection.configure(url).await;
        Ok(())
    }

    /// Establishes the configured relay connection.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connection.connect().await
    }

    pub async fn teardown(&self) {
        self.connection.teardown().await;
    }

    /// Runs the full pipeline for `record` and reports the outcome.
    pub async fn dispatch(&self, mut record: LogRecord) -> Result<Delivery, DispatchError> {
        self.enricher.enrich(&mut record)?;

        let Some(document) = self.converter.convert(&record) else {
            debug!("Converter skipped record");
            return Ok(Delivery::Skipped);
        };
        let payload = document.to_compact_string()?;

        self.write_async(&payload).await.map(Delivery::Forwarded)
    }

    /// Sends a pre-serialized document to the relay.
    pub async fn write_async(&self, document: &str) -> Result<Value, DispatchError> {
        let target = self.target_endpoint();
        self.connection.invoke(target.as_str(), document).await
    }

    /// Queues `record` for dispatch and returns immediately.
    ///
    /// Failures are logged and never reach the caller.
    pub fn write(self: &Arc<Self>, record: LogRecord) {
        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            warn!("No async runtime available, dropping log record");
            return;
        };
        let target = Arc::clone(self);
        runtime.spawn(
            async move {
                if let Err(e) = target.dispatch(record).await {
                    error!("Failed to forward log record: {e}");
                }
            }
            .in_current_span(),
        );
    }
}

impl std::fmt::Debug for GdServiceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GdServiceTarget")
            .field("connection", &self.connection)
            .field("target_endpoint", &self.target_endpoint())
            .field("parameters", &self.enricher.parameters().len())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct GdServiceTargetBuilder {
    relay_endpoint: Option<Url>,
    target_endpoint: Option<Url>,
    parameters: Vec<ParameterSpec>,
    converter: Option<Arc<dyn DocumentConverter>>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    runtime: Option<Handle>,
}

impl GdServiceTargetBuilder {
    #[must_use]
    pub fn relay_endpoint(mut self, endpoint: Url) -> Self {
        self.relay_endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn target_endpoint(mut self, endpoint: Url) -> Self {
        self.target_endpoint = Some(endpoint);
        self
    }

    #[must_use]
    pub fn parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    #[must_use]
    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    #[must_use]
    pub fn connection_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Runtime used by [`GdServiceTarget::write`] when called outside one.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<GdServiceTarget, ConfigError> {
        let target_endpoint = self
            .target_endpoint
            .ok_or(ConfigError::MissingRequired("target_endpoint"))?;
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(WebSocketConnectionFactory::default()));

        Ok(GdServiceTarget {
            connection: ConnectionManager::with_endpoint(factory, self.relay_endpoint),
            target_endpoint: RwLock::new(target_endpoint),
            enricher: ParameterEnricher::new(self.parameters),
            converter: self.converter.unwrap_or_else(|| Arc::new(JsonConverter)),
            runtime: self.runtime.or_else(|| Handle::try_current().ok()),
        })
    }
}
