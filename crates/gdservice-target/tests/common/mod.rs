// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Common test utilities and mocks for integration tests

pub mod mock_relay;
pub mod mocks;
