// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JSON frames exchanged with the relay hub.
//!
//! ```text
//! client -> relay  {"H":"GDServiceLogger","M":"storeAndForward","A":[target, payload],"I":"7"}
//! relay -> client  {"I":"7","R":true}
//! relay -> client  {"I":"7","E":"queue full"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::InvokeError;

#[derive(Debug, Serialize)]
pub(crate) struct HubInvocation<'a> {
    #[serde(rename = "H")]
    pub hub: &'a str,
    #[serde(rename = "M")]
    pub method: &'a str,
    #[serde(rename = "A")]
    pub args: &'a [String],
    #[serde(rename = "I")]
    pub id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HubCompletion {
    #[serde(rename = "I")]
    pub id: Option<String>,
    #[serde(rename = "R", default)]
    pub result: Option<Value>,
    #[serde(rename = "E", default)]
    pub error: Option<String>,
}

impl HubCompletion {
    pub(crate) fn into_result(self) -> Result<Value, InvokeError> {
        match self.error {
            Some(error) => Err(InvokeError::Remote(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}
