// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use loggly_relay::{chat::SlackClient, config, relay::Relay, search_client::LogglyClient};

const RELAY_HOST: &str = "0.0.0.0";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("RELAY_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

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
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match config::Config::new() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("Error creating config on relay startup: {e}");
            return;
        }
    };

    let listener = match TcpListener::bind((RELAY_HOST, config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Unable to bind {RELAY_HOST}:{}: {e}", config.port);
            return;
        }
    };
    info!("Relay listening on {RELAY_HOST}:{}", config.port);

    let relay = Relay {
        config: Arc::clone(&config),
        searcher: Arc::new(LogglyClient::from_config(&config)),
        chat: Arc::new(SlackClient::from_config(&config)),
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
            return;
        }
        info!("Received interrupt, shutting down relay");
        signal_token.cancel();
    });

    if let Err(e) = relay.start(listener, shutdown).await {
        error!("Error when running relay: {e:?}");
    }
}
