// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for Loggly's two-step search API: a query is submitted to obtain a search handle
//! (`rsid`), and the matching events are then fetched with that handle. Handles are ephemeral
//! and are never reused across searches.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::event::SearchResult;
use crate::http_utils::build_client_or_default;

const SEARCH_PATH: &str = "/apiv2/search";
const EVENTS_PATH: &str = "/apiv2/events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOrder {
    Asc,
    Desc,
}

impl SearchOrder {
    fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Query parameters for the search submission endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchParams {
    pub query: String,
    /// Loggly time expression, e.g. `-10m`
    pub from: String,
    pub until: String,
    pub order: SearchOrder,
    pub size: u32,
}

impl SearchParams {
    pub fn new(query: impl Into<String>, from: impl Into<String>, size: u32) -> Self {
        SearchParams {
            query: query.into(),
            from: from.into(),
            until: "now".to_string(),
            order: SearchOrder::Asc,
            size,
        }
    }

    fn to_query_pairs(&self) -> [(&'static str, String); 5] {
        [
            ("q", self.query.clone()),
            ("from", self.from.clone()),
            ("until", self.until.clone()),
            ("order", self.order.as_str().to_string()),
            ("size", self.size.to_string()),
        ]
    }
}

#[async_trait]
pub trait EventSearch {
    /// Runs a complete search and returns the matching events.
    async fn search(&self, params: &SearchParams) -> Result<SearchResult>;
}

/// Stateless apart from its credentials: no handle or session is kept between calls.
#[derive(Debug, Clone)]
pub struct LogglyClient {
    api_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl LogglyClient {
    pub fn new(
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        client: reqwest::Client,
    ) -> Self {
        LogglyClient {
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            client,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        LogglyClient::new(
            config.loggly_api_url.clone(),
            config.loggly_username.clone(),
            config.loggly_password.clone(),
            build_client_or_default(config.proxy_url.as_deref(), config.http_timeout),
        )
    }

    /// Submits the query and returns the search handle (`rsid.id`).
    pub async fn get_search_handle(&self, params: &SearchParams) -> Result<String> {
        let url = format!("{}{SEARCH_PATH}", self.api_url);
        let body: Value = self.get_json(&url, &params.to_query_pairs()).await?;
        body.get("rsid")
            .and_then(|rsid| rsid.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RelayError::Protocol(format!("search response has no rsid.id field: {body}"))
            })
    }

    pub async fn get_events(&self, handle: &str) -> Result<SearchResult> {
        let url = format!("{}{EVENTS_PATH}", self.api_url);
        self.get_json(&url, &[("rsid", handle)]).await
    }

    async fn get_json<T, Q>(&self, url: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: serde::Serialize + ?Sized,
    {
        let time = Instant::now();
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            "Loggly responded {status} in {} ms to {url}",
            time.elapsed().as_millis()
        );
        if !status.is_success() {
            return Err(RelayError::Remote { status, body });
        }
        serde_json::from_str(&body).map_err(|err| {
            RelayError::Protocol(format!("unable to decode Loggly response: {err}: {body}"))
        })
    }
}

#[async_trait]
impl EventSearch for LogglyClient {
    /// Runs both steps in order. The events call is only made once a handle was obtained.
    async fn search(&self, params: &SearchParams) -> Result<SearchResult> {
        let handle = self.get_search_handle(params).await?;
        let result = self.get_events(&handle).await?;
        info!("rsid={handle} events={}", result.total_events);
        Ok(result)
    }
}
