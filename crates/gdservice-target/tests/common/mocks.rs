// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory relay connections that record every call

use async_trait::async_trait;
use gdservice_target::connection::{
    AtomicConnectionState, ConnectionFactory, ConnectionState, HubConnection,
};
use gdservice_target::{ConnectionError, InvokeError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Clone, Debug, PartialEq)]
pub struct Invocation {
    pub connection: usize,
    pub method: String,
    pub args: Vec<String>,
}

#[derive(Default)]
pub struct Recorder {
    pub created: Mutex<Vec<(Url, String)>>,
    pub stopped: Mutex<Vec<usize>>,
    pub invocations: Mutex<Vec<Invocation>>,
}

impl Recorder {
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(Url, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<usize> {
        self.stopped.lock().unwrap().clone()
    }
}

pub struct RecordingConnection {
    id: usize,
    state: AtomicConnectionState,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl HubConnection for RecordingConnection {
    async fn start(&self) -> Result<(), ConnectionError> {
        self.state.store(ConnectionState::Connected);
        Ok(())
    }

    async fn stop(&self) {
        self.recorder.stopped.lock().unwrap().push(self.id);
        self.state.store(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.state.load()
    }

    async fn invoke(&self, method: &str, args: Vec<String>) -> Result<Value, InvokeError> {
        if self.state.load() != ConnectionState::Connected {
            return Err(InvokeError::ConnectionClosed);
        }
        self.recorder.invocations.lock().unwrap().push(Invocation {
            connection: self.id,
            method: method.to_string(),
            args,
        });
        Ok(json!(true))
    }
}

/// Factory whose connections always start and acknowledge every call
#[derive(Clone, Default)]
pub struct RecordingFactory {
    pub recorder: Arc<Recorder>,
}

impl ConnectionFactory for RecordingFactory {
    fn create(&self, endpoint: &Url, channel: &str) -> Arc<dyn HubConnection> {
        let mut created = self.recorder.created.lock().unwrap();
        created.push((endpoint.clone(), channel.to_string()));
        Arc::new(RecordingConnection {
            id: created.len(),
            state: AtomicConnectionState::new(ConnectionState::Disconnected),
            recorder: Arc::clone(&self.recorder),
        })
    }
}
