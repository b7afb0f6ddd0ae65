// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loggly search result model.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loggly's escape for a line break embedded in a single record.
pub const MULTI_LINE_MARKER: &str = "#012";

/// Result of fetching the events behind a search handle. Events are in the order Loggly
/// returned them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub total_events: u64,
    #[serde(default)]
    pub events: Vec<LogEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub tags: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub logmsg: String,
    #[serde(default)]
    pub logtypes: Vec<String>,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub event: EventBody,
}

/// Parsed portion of an event. Loggly puts the decoded JSON document under `json`; other keys
/// (`syslog`, `http`, ...) are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<StructuredPayload>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// A record emitted as JSON. The request fields used for compact rendering are typed, the rest
/// of the document is preserved for the pretty-printed form.
///
/// Any JSON object decodes. A request field whose value has another type (`"status": "ok"`)
/// is left `None` and kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct StructuredPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Map<String, Value>> for StructuredPayload {
    fn from(mut extra: Map<String, Value>) -> Self {
        StructuredPayload {
            method: take_typed(&mut extra, "method"),
            path: take_typed(&mut extra, "path"),
            status: take_typed(&mut extra, "status"),
            user_id: extra.remove("user_id").filter(|user| !user.is_null()),
            extra,
        }
    }
}

/// Removes `key` from `fields` only when its value decodes as `T`.
fn take_typed<T: DeserializeOwned>(fields: &mut Map<String, Value>, key: &str) -> Option<T> {
    let typed = serde_json::from_value(fields.get(key)?.clone()).ok()?;
    fields.remove(key);
    Some(typed)
}

/// What an event carries, decided once at decode time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventPayload<'a> {
    Structured(&'a StructuredPayload),
    PlainText(&'a str),
}

impl LogEvent {
    pub fn payload(&self) -> EventPayload<'_> {
        match &self.event.json {
            Some(structured) => EventPayload::Structured(structured),
            None => EventPayload::PlainText(&self.logmsg),
        }
    }
}
