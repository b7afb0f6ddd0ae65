// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use jiff::tz::TimeZone;
use loggly_relay::{
    chat::SlackClient, config::Config, relay::Relay, search_client::LogglyClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub type RelayResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Config pointing both remote APIs at local mock servers
pub fn test_config(loggly_url: &str, slack_url: &str) -> Config {
    Config {
        loggly_domain: "acme".to_string(),
        loggly_username: "user".to_string(),
        loggly_password: "secret".to_string(),
        loggly_api_url: loggly_url.to_string(),
        search_query: "level:error".to_string(),
        search_from: "-10m".to_string(),
        search_page_size: 50,
        search_interval: None,
        display_time_zone: TimeZone::UTC,
        slack_api_url: slack_url.to_string(),
        slack_bot_token: "xoxb-test".to_string(),
        slack_channel: "#loggly".to_string(),
        port: 0,
        max_request_content_length: 10 * 1024 * 1024,
        http_timeout: Duration::from_secs(2),
        proxy_url: None,
    }
}

pub struct RunningRelay {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<RelayResult>,
}

impl RunningRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Cancels the relay and waits for it to drain its queue
    pub async fn stop(self) -> RelayResult {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("relay did not stop after shutdown")
            .expect("relay task panicked")
    }
}

/// Start a relay with real Loggly and Slack clients on a random local port
pub async fn start_relay(config: Config) -> RunningRelay {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay listener");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let config = Arc::new(config);
    let relay = Relay {
        config: config.clone(),
        searcher: Arc::new(LogglyClient::from_config(&config)),
        chat: Arc::new(SlackClient::from_config(&config)),
    };
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { relay.start(listener, token).await });

    RunningRelay {
        addr,
        shutdown,
        handle,
    }
}

/// Poll until the mock saw at least one request, or give up after two seconds
pub async fn wait_until_matched(mock: &mockito::Mock) -> bool {
    for _ in 0..40 {
        if mock.matched_async().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub fn search_handle_body(rsid: &str) -> String {
    serde_json::json!({
        "rsid": {"status": "SCHEDULED", "date_from": 1700000000000_i64, "elapsed_time": 0, "id": rsid}
    })
    .to_string()
}
