// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;
use tracing::debug;

use crate::attachment::Attachment;
use crate::config::Config;
use crate::dispatch::DeliveryContext;
use crate::error::{RelayError, Result};
use crate::http_utils::build_client_or_default;

pub const POST_MESSAGE_METHOD: &str = "chat.postMessage";

/// Form fields of a chat API call, in the order they are encoded.
pub type FormData = Vec<(String, String)>;

#[async_trait]
pub trait ChatApi {
    /// Calls the chat API `method` with a form-encoded body. The call is bound to the
    /// originating request's context.
    async fn post_form(&self, ctx: &DeliveryContext, method: &str, form: &FormData) -> Result<()>;
}

pub fn text_message(channel: &str, text: &str) -> FormData {
    vec![
        ("channel".to_string(), channel.to_string()),
        ("text".to_string(), text.to_string()),
        ("as_user".to_string(), "false".to_string()),
    ]
}

pub fn attachment_message(channel: &str, attachment: &Attachment) -> Result<FormData> {
    let attachments = serde_json::to_string(&[attachment])
        .map_err(|err| RelayError::Protocol(format!("unable to encode attachment: {err}")))?;
    Ok(vec![
        ("channel".to_string(), channel.to_string()),
        ("attachments".to_string(), attachments),
        ("as_user".to_string(), "false".to_string()),
    ])
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SlackClient {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>, client: reqwest::Client) -> Self {
        SlackClient {
            api_url: api_url.into(),
            token: token.into(),
            client,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        SlackClient::new(
            config.slack_api_url.clone(),
            config.slack_bot_token.clone(),
            build_client_or_default(config.proxy_url.as_deref(), config.http_timeout),
        )
    }

    async fn send(&self, method: &str, form: &FormData) -> Result<()> {
        let url = format!("{}/{method}", self.api_url);
        let time = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .form(form)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RelayError::Remote { status, body });
        }
        check_slack_response(status, &body)?;
        debug!(
            "Slack | Successfully called {method} in {} ms",
            time.elapsed().as_millis()
        );
        Ok(())
    }
}

#[async_trait]
impl ChatApi for SlackClient {
    async fn post_form(&self, ctx: &DeliveryContext, method: &str, form: &FormData) -> Result<()> {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(RelayError::Cancelled),
            res = self.send(method, form) => res,
        }
    }
}

/// Slack answers 200 for application errors and reports them in the `ok`/`error` fields.
fn check_slack_response(status: StatusCode, body: &str) -> Result<()> {
    let response: SlackResponse = serde_json::from_str(body)
        .map_err(|err| RelayError::Protocol(format!("unable to decode Slack response: {err}")))?;
    match response.ok {
        Some(true) => Ok(()),
        Some(false) => Err(RelayError::Remote {
            status,
            body: response.error.unwrap_or_else(|| body.to_string()),
        }),
        None => Err(RelayError::Protocol(format!(
            "Slack response has no ok field: {body}"
        ))),
    }
}
