// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc, time::Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use gdservice_target::{
    converter::{DocumentConverter, JsonConverter},
    Level, LogRecord, TargetConfig, TargetRegistry, GDSERVICE,
};

const DEFAULT_COUNT: usize = 100;
const DEFAULT_MESSAGE: &str = "gdservice load test";

#[tokio::main]
pub async fn main() {
    let config = match TargetConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading GDService configuration: {e}");
            return;
        }
    };

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let count = env::var("GD_LOADGEN_COUNT")
        .ok()
        .and_then(|count| count.parse::<usize>().ok())
        .unwrap_or(DEFAULT_COUNT);
    let message = env::var("GD_LOADGEN_MESSAGE").unwrap_or_else(|_| DEFAULT_MESSAGE.to_string());

    let target = match TargetRegistry::with_defaults().create(GDSERVICE, &config) {
        Ok(target) => Arc::new(target),
        Err(e) => {
            error!("Error creating GDService target: {e}");
            return;
        }
    };

    if let Err(e) = target.connect().await {
        error!("Unable to connect to relay {}: {e}", config.relay_endpoint);
        return;
    }
    info!("Connected to relay, sending {count} documents");

    let started = Instant::now();
    let mut writes = JoinSet::new();
    for i in 0..count {
        let record = LogRecord::new(Level::Info, format!("{message} #{i}"))
            .with_property("sequence", i.to_string());
        let document = match JsonConverter.convert(&record).map(|d| d.to_compact_string()) {
            Some(Ok(document)) => document,
            Some(Err(e)) => {
                error!("Unable to serialize document {i}: {e}");
                continue;
            }
            None => continue,
        };
        let target = Arc::clone(&target);
        writes.spawn(async move { target.write_async(&document).await });
    }

    let (mut succeeded, mut failed) = (0usize, 0usize);
    while let Some(result) = writes.join_next().await {
        match result {
            Ok(Ok(_)) => succeeded += 1,
            Ok(Err(e)) => {
                debug!("Write failed: {e}");
                failed += 1;
            }
            Err(e) => {
                error!("Write task failed: {e}");
                failed += 1;
            }
        }
    }

    info!(
        "Finished in {:?}: {succeeded} succeeded, {failed} failed",
        started.elapsed()
    );

    target.teardown().await;
}
