// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while building or validating a target configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidEndpoint {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid layout for parameter '{parameter}': {reason}")]
    InvalidLayout { parameter: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("No target registered under name '{0}'")]
    UnknownTarget(String),
}

/// Errors raised while establishing the relay connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Relay endpoint '{0}' cannot be dialed")]
    InvalidEndpoint(String),

    #[error("Handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    #[error("Connection to {0} timed out")]
    Timeout(String),
}

/// A parameter layout could not be rendered for a record
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Failed to render parameter '{parameter}': {reason}")]
pub struct RenderError {
    pub parameter: String,
    pub reason: String,
}

/// Errors reported by a single remote invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Connection closed before the call completed")]
    ConnectionClosed,

    #[error("Connection is not established")]
    NotConnected,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors returned by the dispatch path
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Connection to {0} not initialized")]
    NotInitialized(String),

    #[error("Connection to {0} not online")]
    NotConnected(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Failed to serialize log document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}
