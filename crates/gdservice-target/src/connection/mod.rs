// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the persistent relay connection.
//!
//! The [`ConnectionManager`] owns at most one [`HubConnection`] at a time.
//! Reconfiguration happens in two phases:
//!
//! ```text
//!   configure(endpoint)          connect()
//!   ┌──────────────────┐        ┌──────────────────────┐
//!   │ stop + drop old  │  ───>  │ start new connection │
//!   │ create new       │        │ drop it on failure   │
//!   └──────────────────┘        └──────────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Every swap of the connection handle goes through a single async owner
//! lock, so the previous connection is fully stopped before the next one is
//! created even when reconfigurations race. `invoke` never takes the owner
//! lock: it clones the current handle and releases the slot immediately.
//! An invoke that races a teardown fails with
//! [`InvokeError::ConnectionClosed`](crate::error::InvokeError) because
//! stopping a connection fails every pending invocation.

pub(crate) mod protocol;
pub mod websocket;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex as TokioMutex, MutexGuard};
use tracing::{debug, error};
use url::Url;

use crate::error::{ConnectionError, DispatchError, InvokeError};

/// Hub name every connection is bound to
pub const CHANNEL_NAME: &str = "GDServiceLogger";

/// The single remote operation invoked per record
pub const STORE_AND_FORWARD: &str = "storeAndForward";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
    Disconnected,
}

/// Lock-free holder for a [`ConnectionState`]
#[derive(Debug)]
pub struct AtomicConnectionState(AtomicU8);

impl AtomicConnectionState {
    #[must_use]
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::Acquire) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            _ => ConnectionState::Uninitialized,
        }
    }

    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves to `to` only if the current state is `from`.
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A stateful connection to the relay hub
#[async_trait]
pub trait HubConnection: Send + Sync {
    /// Establishes the connection. Resolves once it is connected or failed.
    async fn start(&self) -> Result<(), ConnectionError>;

    /// Closes the connection and fails every pending invocation.
    async fn stop(&self);

    fn state(&self) -> ConnectionState;

    /// Invokes `method` on the hub and waits for its completion.
    async fn invoke(&self, method: &str, args: Vec<String>) -> Result<Value, InvokeError>;
}

/// Builds connections bound to a relay endpoint and channel
pub trait ConnectionFactory: Send + Sync {
    fn create(&self, endpoint: &Url, channel: &str) -> Arc<dyn HubConnection>;
}

#[derive(Default)]
struct Slot {
    endpoint: Option<Url>,
    connection: Option<Arc<dyn HubConnection>>,
}

pub struct ConnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    slot: RwLock<Slot>,
    owner: TokioMutex<()>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            slot: RwLock::new(Slot::default()),
            owner: TokioMutex::new(()),
        }
    }

    /// Creates a manager already configured for `endpoint`, without starting
    /// the connection.
    #[must_use]
    pub fn with_endpoint(factory: Arc<dyn ConnectionFactory>, endpoint: Option<Url>) -> Self {
        let connection = endpoint.as_ref().map(|endpoint| {
            debug!("Creating relay connection to {endpoint} on channel {CHANNEL_NAME}");
            factory.create(endpoint, CHANNEL_NAME)
        });
        Self {
            factory,
            slot: RwLock::new(Slot {
                endpoint,
                connection,
            }),
            owner: TokioMutex::new(()),
        }
    }

    /// The relay endpoint last passed to [`configure`](Self::configure)
    #[must_use]
    pub fn endpoint(&self) -> Option<Url> {
        self.read_slot().endpoint.clone()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.read_slot()
            .connection
            .as_ref()
            .map_or(ConnectionState::Uninitialized, |c| c.state())
    }

    /// Replaces the current connection with a new, unstarted one.
    ///
    /// Passing `None` only tears the current connection down.
    pub async fn configure(&self, endpoint: Option<Url>) {
        let owner = self.owner.lock().await;
        self.configure_owned(&owner, endpoint).await;
    }

    /// Starts the configured connection.
    ///
    /// A connection that fails to start is discarded and the manager reports
    /// [`ConnectionState::Uninitialized`] until it is configured again.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let owner = self.owner.lock().await;
        self.connect_owned(&owner).await
    }

    /// Configures and connects without letting another swap interleave.
    pub async fn configure_and_connect(
        &self,
        endpoint: Option<Url>,
    ) -> Result<(), ConnectionError> {
        let owner = self.owner.lock().await;
        let has_endpoint = endpoint.is_some();
        self.configure_owned(&owner, endpoint).await;
        if has_endpoint {
            self.connect_owned(&owner).await
        } else {
            Ok(())
        }
    }

    /// Stops and releases the current connection, if any.
    pub async fn teardown(&self) {
        let owner = self.owner.lock().await;
        self.release(&owner).await;
    }

    /// Calls `storeAndForward(target_endpoint, payload)` on the channel.
    pub async fn invoke(
        &self,
        target_endpoint: &str,
        payload: &str,
    ) -> Result<Value, DispatchError> {
        let (endpoint, connection) = {
            let slot = self.read_slot();
            (slot.endpoint.clone(), slot.connection.clone())
        };
        let Some(connection) = connection else {
            return Err(DispatchError::NotInitialized(display_endpoint(
                endpoint.as_ref(),
            )));
        };
        if connection.state() != ConnectionState::Connected {
            return Err(DispatchError::NotConnected(display_endpoint(
                endpoint.as_ref(),
            )));
        }

        connection
            .invoke(
                STORE_AND_FORWARD,
                vec![target_endpoint.to_string(), payload.to_string()],
            )
            .await
            .map_err(DispatchError::from)
    }

    async fn configure_owned(&self, owner: &MutexGuard<'_, ()>, endpoint: Option<Url>) {
        self.release(owner).await;

        let connection = endpoint.as_ref().map(|endpoint| {
            debug!("Creating relay connection to {endpoint} on channel {CHANNEL_NAME}");
            self.factory.create(endpoint, CHANNEL_NAME)
        });

        let mut slot = self.write_slot();
        slot.endpoint = endpoint;
        slot.connection = connection;
    }

    async fn connect_owned(&self, _owner: &MutexGuard<'_, ()>) -> Result<(), ConnectionError> {
        let (endpoint, connection) = {
            let slot = self.read_slot();
            (slot.endpoint.clone(), slot.connection.clone())
        };
        let Some(connection) = connection else {
            return Err(ConnectionError::InvalidEndpoint(display_endpoint(
                endpoint.as_ref(),
            )));
        };
        if connection.state() == ConnectionState::Connected {
            return Ok(());
        }

        match connection.start().await {
            Ok(()) => {
                debug!("Connected to relay {}", display_endpoint(endpoint.as_ref()));
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to relay: {e}");
                connection.stop().await;
                let mut slot = self.write_slot();
                if slot
                    .connection
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &connection))
                {
                    slot.connection = None;
                }
                Err(e)
            }
        }
    }

    async fn release(&self, _owner: &MutexGuard<'_, ()>) {
        let previous = self.write_slot().connection.take();
        if let Some(connection) = previous {
            debug!("Stopping previous relay connection");
            connection.stop().await;
        }
    }

    fn read_slot(&self) -> std::sync::RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_slot(&self) -> std::sync::RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

pub(crate) fn display_endpoint(endpoint: Option<&Url>) -> String {
    endpoint.map_or_else(|| "<unset>".to_string(), Url::to_string)
}
