// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns a Loggly HTTP alert into a Slack message attachment.

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::event::MULTI_LINE_MARKER;
use crate::formatter::format_hit;

const ATTACHMENT_COLOR: &str = "warning";

/// Payload Loggly posts when an alert fires.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogglyAlert {
    pub alert_name: String,
    #[serde(default)]
    pub alert_description: String,
    #[serde(default)]
    pub edit_alert_link: String,
    #[serde(default)]
    pub source_group: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default)]
    pub search_link: String,
    #[serde(default)]
    pub query: String,
    pub num_hits: u64,
    pub recent_hits: Vec<String>,
    #[serde(default)]
    pub owner_username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub title: String,
    pub value: String,
    pub short: bool,
}

impl Field {
    fn new(title: &str, value: impl Into<String>, short: bool) -> Self {
        Field {
            title: title.to_string(),
            value: value.into(),
            short,
        }
    }
}

/// Slack's legacy message attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub fallback: String,
    pub color: String,
    pub title: String,
    pub title_link: String,
    pub text: String,
    pub fields: Vec<Field>,
    pub mrkdwn_in: Vec<String>,
}

pub fn build_attachment(raw_payload: &[u8]) -> Result<Attachment> {
    let alert: LogglyAlert = serde_json::from_slice(raw_payload)?;
    attachment_from_alert(alert)
}

pub fn attachment_from_alert(mut alert: LogglyAlert) -> Result<Attachment> {
    let first_hit = alert.recent_hits.first().ok_or_else(|| {
        RelayError::MalformedAlert(format!("alert {:?} has no recent hits", alert.alert_name))
    })?;

    let fallback = match first_hit.split_once(MULTI_LINE_MARKER) {
        Some((summary, _)) => {
            let summary = summary.to_string();
            for hit in alert.recent_hits.iter_mut() {
                *hit = format_hit(hit);
            }
            summary
        }
        None => first_hit.clone(),
    };

    let fields = vec![
        Field::new("Description", alert.alert_description, false),
        Field::new("Query", alert.query, true),
        Field::new("Num Hits", alert.num_hits.to_string(), true),
        Field::new("Recent Hits", alert.recent_hits.join("\n"), false),
    ];
    Ok(Attachment {
        fallback,
        color: ATTACHMENT_COLOR.to_string(),
        title: alert.alert_name,
        title_link: alert.search_link,
        text: format!("Edit this alert on <{}|Loggly>", alert.edit_alert_link),
        fields,
        mrkdwn_in: vec!["fields".to_string()],
    })
}
