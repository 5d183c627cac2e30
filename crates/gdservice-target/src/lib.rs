// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # GDService target
//!
//! A log target that enriches structured records with configured parameters,
//! converts them to JSON documents and forwards each one to a
//! guaranteed-delivery relay over a persistent websocket connection.
//!
//! ## Architecture
//!
//! - [`record`]: the log record and its property bag
//! - [`layout`]: parameter templates such as `${level}` or `${machinename}`
//! - [`enricher`]: adds configured parameters to each record
//! - [`converter`]: turns records into documents, or skips them
//! - [`connection`]: relay connection lifecycle and the websocket transport
//! - [`target`]: the per-record pipeline
//! - [`registry`]: constructs targets by type name
//! - [`layer`]: `tracing_subscriber` integration
//! - [`config`]: programmatic, serde and environment configuration

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod connection;
pub mod converter;
pub mod enricher;
pub mod error;
pub mod layer;
pub mod layout;
pub mod record;
pub mod registry;
pub mod target;

pub use config::TargetConfig;
pub use connection::ConnectionState;
pub use error::{ConfigError, ConnectionError, DispatchError, InvokeError, RenderError};
pub use layer::GdServiceLayer;
pub use record::{Level, LogRecord};
pub use registry::{TargetRegistry, GDSERVICE};
pub use target::{Delivery, GdServiceTarget};
