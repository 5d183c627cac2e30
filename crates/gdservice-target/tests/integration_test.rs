// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mock_relay::MockRelay;
use common::mocks::RecordingFactory;
use gdservice_target::config::ParameterConfig;
use gdservice_target::connection::websocket::WebSocketConnectionFactory;
use gdservice_target::enricher::ParameterSpec;
use gdservice_target::{
    ConnectionState, Delivery, DispatchError, GdServiceLayer, GdServiceTarget, InvokeError, Level,
    LogRecord, TargetConfig, TargetRegistry, GDSERVICE,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;

const RELAY: &str = "https://gd.example/hub";
const TARGET: &str = "https://ingest.example/logs";

fn build_target(factory: &RecordingFactory, relay: Option<&str>) -> GdServiceTarget {
    let mut builder = GdServiceTarget::builder()
        .target_endpoint(Url::parse(TARGET).unwrap())
        .parameter(ParameterSpec::new("app", "myapp").unwrap())
        .connection_factory(Arc::new(factory.clone()));
    if let Some(relay) = relay {
        builder = builder.relay_endpoint(Url::parse(relay).unwrap());
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn test_forwards_enriched_document() {
    let factory = RecordingFactory::default();
    let target = build_target(&factory, Some(RELAY));
    target.connect().await.unwrap();

    let delivery = target
        .dispatch(LogRecord::new(Level::Info, "hello"))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Forwarded(json!(true)));

    let invocations = factory.recorder.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].method, "storeAndForward");
    assert_eq!(invocations[0].args[0], TARGET);

    let document: Value = serde_json::from_str(&invocations[0].args[1]).unwrap();
    let keys: Vec<&str> = document
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["timestamp", "level", "message", "properties"]);
    assert_eq!(document["message"], "hello");
    assert_eq!(document["properties"], json!({"app": "myapp"}));
}

#[tokio::test]
async fn test_existing_property_is_not_overridden() {
    let factory = RecordingFactory::default();
    let target = build_target(&factory, Some(RELAY));
    target.connect().await.unwrap();

    target
        .dispatch(LogRecord::new(Level::Info, "hello").with_property("app", "override"))
        .await
        .unwrap();

    let invocations = factory.recorder.invocations();
    let document: Value = serde_json::from_str(&invocations[0].args[1]).unwrap();
    assert_eq!(document["properties"], json!({"app": "override"}));
}

#[tokio::test]
async fn test_write_before_configuration_is_not_initialized() {
    let factory = RecordingFactory::default();
    let target = build_target(&factory, None);

    let err = target.write_async("{}").await.unwrap_err();
    assert!(matches!(err, DispatchError::NotInitialized(_)));
    assert!(factory.recorder.invocations().is_empty());
}

#[tokio::test]
async fn test_write_before_connect_is_not_connected() {
    let factory = RecordingFactory::default();
    let target = build_target(&factory, Some(RELAY));
    assert_eq!(target.state(), ConnectionState::Disconnected);

    let err = target
        .dispatch(LogRecord::new(Level::Info, "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotConnected(ref endpoint) if endpoint == RELAY));

    target.teardown().await;
    assert_eq!(target.state(), ConnectionState::Uninitialized);
    assert!(matches!(
        target.write_async("{}").await,
        Err(DispatchError::NotInitialized(_))
    ));
    assert!(factory.recorder.invocations().is_empty());
}

#[tokio::test]
async fn test_blank_record_is_skipped() {
    let factory = RecordingFactory::default();
    let target = GdServiceTarget::builder()
        .relay_endpoint(Url::parse(RELAY).unwrap())
        .target_endpoint(Url::parse(TARGET).unwrap())
        .connection_factory(Arc::new(factory.clone()))
        .build()
        .unwrap();
    target.connect().await.unwrap();

    let delivery = target
        .dispatch(LogRecord::new(Level::Info, "   "))
        .await
        .unwrap();
    assert_eq!(delivery, Delivery::Skipped);
    assert!(factory.recorder.invocations().is_empty());
}

#[tokio::test]
async fn test_reconfigure_keeps_one_live_connection() {
    let factory = RecordingFactory::default();
    let target = build_target(&factory, Some(RELAY));
    target.connect().await.unwrap();

    target
        .configure_relay(Some("https://gd-2.example/hub"))
        .await
        .unwrap();
    assert_eq!(factory.recorder.stopped(), vec![1]);
    assert_eq!(target.state(), ConnectionState::Disconnected);

    target.connect().await.unwrap();
    target.write_async("{}").await.unwrap();

    let created = factory.recorder.created();
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].0.as_str(), "https://gd-2.example/hub");
    assert_eq!(created[1].1, "GDServiceLogger");
    assert_eq!(factory.recorder.invocations()[0].connection, 2);
}

#[tokio::test]
async fn test_concurrent_dispatch_during_reconfigure() {
    let factory = RecordingFactory::default();
    let target = Arc::new(build_target(&factory, Some(RELAY)));
    target.connect().await.unwrap();

    let mut writers = tokio::task::JoinSet::new();
    for i in 0..20 {
        let target = Arc::clone(&target);
        writers.spawn(async move {
            target
                .dispatch(LogRecord::new(Level::Info, format!("record {i}")))
                .await
        });
    }
    target
        .configure_relay(Some("https://gd-2.example/hub"))
        .await
        .unwrap();
    target.connect().await.unwrap();

    while let Some(result) = writers.join_next().await {
        match result.unwrap() {
            Ok(_)
            | Err(DispatchError::NotConnected(_))
            | Err(DispatchError::NotInitialized(_))
            | Err(DispatchError::Invoke(InvokeError::ConnectionClosed)) => {}
            Err(e) => panic!("unexpected dispatch error: {e}"),
        }
    }
    assert_eq!(factory.recorder.stopped(), vec![1]);
    assert_eq!(target.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_registry_builds_target_from_config() {
    let config = TargetConfig {
        relay_endpoint: RELAY.to_string(),
        target_endpoint: TARGET.to_string(),
        parameters: vec![ParameterConfig {
            name: "level".to_string(),
            layout: "${level}".to_string(),
        }],
        ..Default::default()
    };
    let target = TargetRegistry::with_defaults()
        .create(GDSERVICE, &config)
        .unwrap();

    assert_eq!(target.parameters()[0].name, "level");
    assert_eq!(target.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_layer_forwards_tracing_events() {
    let factory = RecordingFactory::default();
    let target = Arc::new(build_target(&factory, Some(RELAY)));
    target.connect().await.unwrap();

    let subscriber =
        tracing_subscriber::registry().with(GdServiceLayer::new(Arc::clone(&target)));
    tracing::subscriber::with_default(subscriber, || {
        tracing::info!(target: "checkout", order_id = 7, "order placed");
    });

    for _ in 0..100 {
        if !factory.recorder.invocations().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let invocations = factory.recorder.invocations();
    assert_eq!(invocations.len(), 1);
    let document: Value = serde_json::from_str(&invocations[0].args[1]).unwrap();
    assert_eq!(document["message"], "order placed");
    assert_eq!(
        document["properties"],
        json!({"order_id": "7", "logger": "checkout", "app": "myapp"})
    );
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let relay = MockRelay::start().await;
    let target = GdServiceTarget::builder()
        .relay_endpoint(relay.url())
        .target_endpoint(Url::parse(TARGET).unwrap())
        .connection_factory(Arc::new(WebSocketConnectionFactory::new(
            Duration::from_secs(5),
        )))
        .build()
        .unwrap();
    target.connect().await.unwrap();
    assert_eq!(target.state(), ConnectionState::Connected);

    let result = target.write_async(r#"{"message":"hi"}"#).await.unwrap();
    assert_eq!(result, json!(true));

    let frames = relay.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].uri, "/hub?hub=GDServiceLogger");
    assert_eq!(frames[0].frame["H"], "GDServiceLogger");
    assert_eq!(frames[0].frame["M"], "storeAndForward");
    assert_eq!(
        frames[0].frame["A"],
        json!([TARGET, r#"{"message":"hi"}"#])
    );

    target.teardown().await;
    assert_eq!(target.state(), ConnectionState::Uninitialized);
}

#[tokio::test]
async fn test_websocket_remote_failure() {
    let relay = MockRelay::start_failing("queue full").await;
    let target = GdServiceTarget::builder()
        .relay_endpoint(relay.url())
        .target_endpoint(Url::parse(TARGET).unwrap())
        .build()
        .unwrap();
    target.connect().await.unwrap();

    let err = target
        .dispatch(LogRecord::new(Level::Error, "disk full"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Invoke(InvokeError::Remote(ref message)) if message == "queue full"
    ));
}
