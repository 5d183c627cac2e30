// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Minimal websocket relay hub for end-to-end tests

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Clone, Debug)]
pub struct ReceivedFrame {
    /// Request path and query of the websocket upgrade
    pub uri: String,
    pub frame: Value,
}

#[derive(Clone)]
pub struct MockRelay {
    pub addr: SocketAddr,
    pub received_frames: Arc<Mutex<Vec<ReceivedFrame>>>,
}

impl MockRelay {
    /// Start a relay that acknowledges every invocation with `true`
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Start a relay that fails every invocation with `error`
    pub async fn start_failing(error: &str) -> Self {
        Self::start_with(Some(error.to_string())).await
    }

    async fn start_with(error: Option<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock relay");
        let addr = listener.local_addr().expect("Failed to get local addr");

        let received_frames = Arc::new(Mutex::new(Vec::new()));
        let frames_clone = received_frames.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let frames = frames_clone.clone();
                let error = error.clone();
                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let uri_clone = uri.clone();
                    let callback = move |request: &Request,
                                         response: Response|
                          -> Result<Response, ErrorResponse> {
                        *uri_clone.lock().unwrap() = request.uri().to_string();
                        Ok(response)
                    };
                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };

                    while let Some(Ok(message)) = ws.next().await {
                        let Message::Text(text) = message else {
                            continue;
                        };
                        let frame: Value = match serde_json::from_str(&text) {
                            Ok(frame) => frame,
                            Err(_) => continue,
                        };
                        let id = frame["I"].clone();
                        frames.lock().unwrap().push(ReceivedFrame {
                            uri: uri.lock().unwrap().clone(),
                            frame,
                        });

                        let reply = match &error {
                            Some(error) => json!({"I": id, "E": error}),
                            None => json!({"I": id, "R": true}),
                        };
                        if ws.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            received_frames,
        }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/hub", self.addr)).expect("Failed to build relay url")
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.received_frames.lock().unwrap().clone()
    }
}
