// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Errors raised while talking to Loggly or Slack, or while decoding inbound payloads.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Transport error: request context cancelled")]
    Cancelled,

    #[error("Unexpected response shape: {0}")]
    Protocol(String),

    #[error("Unable to decode alert payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Malformed alert: {0}")]
    MalformedAlert(String),

    #[error("Remote returned {status}: {body}")]
    Remote { status: StatusCode, body: String },

    #[error("Unable to read request body: {0}")]
    Body(String),

    #[error("Payload too large: body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Delivery queue is closed")]
    QueueClosed,
}

impl RelayError {
    /// True for failures that happened before or while reaching the remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
