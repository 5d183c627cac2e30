// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Websocket transport for the relay hub.
//!
//! A started connection runs two tasks: a writer draining an unbounded
//! outbound queue into the socket, and a reader resolving pending invocations
//! from completion frames. Either task ending moves the connection to
//! [`ConnectionState::Disconnected`] and fails every pending invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use super::protocol::{HubCompletion, HubInvocation};
use super::{AtomicConnectionState, ConnectionFactory, ConnectionState, HubConnection};
use crate::error::{ConnectionError, InvokeError};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the socket tasks to wind down in `stop`
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, InvokeError>>>>>;

/// Produces [`WebSocketHubConnection`]s
#[derive(Debug, Clone)]
pub struct WebSocketConnectionFactory {
    connect_timeout: Duration,
}

impl WebSocketConnectionFactory {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketConnectionFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl ConnectionFactory for WebSocketConnectionFactory {
    fn create(&self, endpoint: &Url, channel: &str) -> Arc<dyn HubConnection> {
        Arc::new(WebSocketHubConnection::new(
            endpoint.clone(),
            channel,
            self.connect_timeout,
        ))
    }
}

struct Session {
    outbound: mpsc::UnboundedSender<WsMessage>,
    cancel_token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Cancels both socket tasks and waits for them to finish.
    async fn retire(self) {
        self.cancel_token.cancel();
        drop(self.outbound);
        for mut task in self.tasks {
            if timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                task.abort();
            }
        }
    }
}

pub struct WebSocketHubConnection {
    endpoint: Url,
    channel: String,
    connect_timeout: Duration,
    state: Arc<AtomicConnectionState>,
    pending: Pending,
    next_id: AtomicU64,
    session: Mutex<Option<Session>>,
}

impl WebSocketHubConnection {
    #[must_use]
    pub fn new(endpoint: Url, channel: &str, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            channel: channel.to_string(),
            connect_timeout,
            state: Arc::new(AtomicConnectionState::new(ConnectionState::Disconnected)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            session: Mutex::new(None),
        }
    }

    fn outbound(&self) -> Option<mpsc::UnboundedSender<WsMessage>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|session| session.outbound.clone())
    }

    fn take_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn remove_pending(&self, id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

#[async_trait]
impl HubConnection for WebSocketHubConnection {
    async fn start(&self) -> Result<(), ConnectionError> {
        if self.state.load() == ConnectionState::Connected {
            return Ok(());
        }

        let url = websocket_url(&self.endpoint, &self.channel)?;
        if let Some(previous) = self.take_session() {
            debug!("Retiring previous websocket session to {}", self.endpoint);
            previous.retire().await;
        }
        self.state.store(ConnectionState::Connecting);
        debug!("Opening websocket to {url}");

        let stream = match timeout(self.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(err)) => {
                self.state.store(ConnectionState::Disconnected);
                return Err(ConnectionError::Handshake {
                    endpoint: self.endpoint.to_string(),
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                self.state.store(ConnectionState::Disconnected);
                return Err(ConnectionError::Timeout(self.endpoint.to_string()));
            }
        };

        let (mut sink, mut source) = stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();
        let cancel_token = CancellationToken::new();

        let writer = {
            let cancel_token = cancel_token.clone();
            let state = Arc::clone(&self.state);
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = cancel_token.cancelled() => {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            let _ = sink.close().await;
                            break;
                        }
                        message = outbound_rx.recv() => {
                            let Some(message) = message else { break };
                            if let Err(err) = sink.send(message).await {
                                warn!("Relay websocket write failed: {err}");
                                disconnect(&state, &pending);
                                break;
                            }
                        }
                    }
                }
            })
        };

        let reader = {
            let cancel_token = cancel_token.clone();
            let state = Arc::clone(&self.state);
            let pending = Arc::clone(&self.pending);
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        () = cancel_token.cancelled() => break,
                        frame = source.next() => frame,
                    };
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => complete(&text, &pending),
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!("Relay closed the websocket");
                            disconnect(&state, &pending);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!("Relay websocket read failed: {err}");
                            disconnect(&state, &pending);
                            break;
                        }
                    }
                }
            })
        };

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(Session {
            outbound,
            cancel_token,
            tasks: vec![writer, reader],
        });

        // The reader may already have seen a close frame.
        if !self
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            if let Some(session) = self.take_session() {
                session.retire().await;
            }
            return Err(ConnectionError::Handshake {
                endpoint: self.endpoint.to_string(),
                reason: "relay closed the connection during setup".to_string(),
            });
        }
        Ok(())
    }

    async fn stop(&self) {
        let Some(session) = self.take_session() else {
            return;
        };

        disconnect(&self.state, &self.pending);
        session.retire().await;
        debug!("Relay websocket to {} stopped", self.endpoint);
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    async fn invoke(&self, method: &str, args: Vec<String>) -> Result<Value, InvokeError> {
        let Some(outbound) = self.outbound() else {
            return Err(InvokeError::NotConnected);
        };
        if self.state.load() != ConnectionState::Connected {
            return Err(InvokeError::NotConnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let frame = serde_json::to_string(&HubInvocation {
            hub: &self.channel,
            method,
            args: &args,
            id: &id,
        })
        .map_err(|err| InvokeError::Protocol(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);

        // A disconnect that drained the map before the insert above must not
        // leave this call waiting forever.
        if self.state.load() != ConnectionState::Connected && self.remove_pending(&id) {
            return Err(InvokeError::ConnectionClosed);
        }

        trace!("Invoking {method} as call {id}");
        if outbound.send(WsMessage::Text(frame)).is_err() {
            self.remove_pending(&id);
            return Err(InvokeError::ConnectionClosed);
        }

        rx.await.unwrap_or(Err(InvokeError::ConnectionClosed))
    }
}

/// Maps the relay endpoint onto its websocket URL and names the hub.
fn websocket_url(endpoint: &Url, channel: &str) -> Result<Url, ConnectionError> {
    let mut url = endpoint.clone();
    let target_scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(ConnectionError::InvalidEndpoint(endpoint.to_string())),
    };
    if url.scheme() != target_scheme && url.set_scheme(target_scheme).is_err() {
        return Err(ConnectionError::InvalidEndpoint(endpoint.to_string()));
    }
    url.query_pairs_mut().append_pair("hub", channel);
    Ok(url)
}

fn complete(text: &str, pending: &Pending) {
    let completion = match serde_json::from_str::<HubCompletion>(text) {
        Ok(completion) => completion,
        Err(err) => {
            debug!("Ignoring unreadable relay frame: {err}");
            return;
        }
    };
    let Some(id) = completion.id.clone() else {
        trace!("Ignoring relay frame without invocation id");
        return;
    };
    let waiter = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
    match waiter {
        Some(waiter) => {
            let _ = waiter.send(completion.into_result());
        }
        None => debug!("Completion for unknown call {id}"),
    }
}

fn disconnect(state: &AtomicConnectionState, pending: &Pending) {
    state.store(ConnectionState::Disconnected);
    let waiters: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .map(|(_, waiter)| waiter)
        .collect();
    for waiter in waiters {
        let _ = waiter.send(Err(InvokeError::ConnectionClosed));
    }
}
