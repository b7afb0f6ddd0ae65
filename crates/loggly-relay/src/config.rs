// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use jiff::tz::TimeZone;
use std::env;
use std::time::Duration;
use tracing::debug;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SEARCH_QUERY: &str = "*";
const DEFAULT_SEARCH_FROM: &str = "-10m";
const DEFAULT_SEARCH_PAGE_SIZE: u32 = 50;
const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";
const DEFAULT_SLACK_CHANNEL: &str = "#loggly";

#[derive(Debug)]
pub struct Config {
    pub loggly_domain: String,
    pub loggly_username: String,
    pub loggly_password: String,
    /// Base URL of the Loggly API, without the `/apiv2` suffix
    pub loggly_api_url: String,
    /// query used by the scheduled search and by empty slash commands
    pub search_query: String,
    pub search_from: String,
    pub search_page_size: u32,
    /// how often to run the scheduled search; disabled when unset
    pub search_interval: Option<Duration>,
    pub display_time_zone: TimeZone,
    pub slack_api_url: String,
    pub slack_bot_token: String,
    pub slack_channel: String,
    pub port: u16,
    pub max_request_content_length: usize,
    /// timeout applied to every outbound request, Loggly and Slack alike
    pub http_timeout: Duration,
    pub proxy_url: Option<String>,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let loggly_domain = required_var("LOGGLY_DOMAIN")?;
        let loggly_username = required_var("LOGGLY_USERNAME")?;
        let loggly_password = required_var("LOGGLY_PASSWORD")?;
        let slack_bot_token = required_var("SLACK_BOT_TOKEN")?;

        // LOGGLY_API_URL will primarily be used for integration tests
        let loggly_api_url = env::var("LOGGLY_API_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("https://{loggly_domain}.loggly.com"));

        let search_interval = env::var("LOGGLY_SEARCH_INTERVAL_SECS")
            .ok()
            .and_then(|secs| secs.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Config {
            loggly_domain,
            loggly_username,
            loggly_password,
            loggly_api_url,
            search_query: env::var("LOGGLY_SEARCH_QUERY")
                .ok()
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SEARCH_QUERY.to_string()),
            search_from: env::var("LOGGLY_SEARCH_FROM")
                .unwrap_or_else(|_| DEFAULT_SEARCH_FROM.to_string()),
            search_page_size: env::var("LOGGLY_SEARCH_SIZE")
                .ok()
                .and_then(|size| size.parse::<u32>().ok())
                .unwrap_or(DEFAULT_SEARCH_PAGE_SIZE),
            search_interval,
            display_time_zone: resolve_time_zone(env::var("LOCATION").ok().as_deref()),
            slack_api_url: env::var("SLACK_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_SLACK_API_URL.to_string()),
            slack_bot_token,
            slack_channel: env::var("SLACK_CHANNEL")
                .unwrap_or_else(|_| DEFAULT_SLACK_CHANNEL.to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            http_timeout: Duration::from_secs(30),
            proxy_url: env::var("HTTPS_PROXY").ok(),
        })
    }
}

fn required_var(name: &str) -> Result<String, anyhow::Error> {
    env::var(name).map_err(|_| anyhow::anyhow!("{name} environment variable is not set"))
}

/// Looks up an IANA zone by name. A missing, empty or unknown name silently yields the
/// process's local zone.
pub fn resolve_time_zone(name: Option<&str>) -> TimeZone {
    match name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => TimeZone::get(name).unwrap_or_else(|err| {
            debug!("Unknown time zone {name:?}, using local time: {err}");
            TimeZone::system()
        }),
        None => TimeZone::system(),
    }
}
