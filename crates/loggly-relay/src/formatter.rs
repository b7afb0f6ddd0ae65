// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Renders Loggly events as Slack message text.

use jiff::{tz::TimeZone, Timestamp};
use regex::{Captures, Regex};
use serde_json::Value;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

use crate::event::{EventPayload, LogEvent, StructuredPayload, MULTI_LINE_MARKER};

/// Number of stack frames shown after the summary line of a trace.
const MAX_TRACE_LINES: usize = 5;
const VERBOSE_SEPARATOR_WIDTH: usize = 100;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S %Z";

/// How much room the destination has for each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStyle {
    /// Channel posts: structured records as pretty JSON, records divided by a long rule.
    Verbose,
    /// Slash-command replies: structured records on one line, records divided by a newline.
    Compact,
}

#[derive(Debug, Clone)]
pub struct EventFormatter {
    time_zone: TimeZone,
}

impl EventFormatter {
    pub fn new(time_zone: TimeZone) -> Self {
        EventFormatter { time_zone }
    }

    pub fn format_events(&self, events: &[LogEvent], style: FormatStyle) -> String {
        let separator = match style {
            FormatStyle::Verbose => format!("\n{}\n", "=".repeat(VERBOSE_SEPARATOR_WIDTH)),
            FormatStyle::Compact => "\n".to_string(),
        };
        events
            .iter()
            .map(|event| self.format_event(event, style))
            .collect::<Vec<String>>()
            .join(&separator)
    }

    fn format_event(&self, event: &LogEvent, style: FormatStyle) -> String {
        let text = match event.payload() {
            EventPayload::Structured(payload) => match style {
                FormatStyle::Verbose => pretty_payload(payload, &event.logmsg),
                FormatStyle::Compact => compact_payload(payload),
            },
            EventPayload::PlainText(msg) if msg.contains(MULTI_LINE_MARKER) => format_hit(msg),
            EventPayload::PlainText(msg) => msg.to_string(),
        };
        format!(
            "*{}*\n{text}",
            format_timestamp(event.timestamp, &self.time_zone)
        )
    }
}

/// Formats a millisecond epoch in the given zone, to the second.
pub fn format_timestamp(millis: i64, time_zone: &TimeZone) -> String {
    match Timestamp::from_millisecond(millis) {
        Ok(ts) => ts
            .to_zoned(time_zone.clone())
            .strftime(TIMESTAMP_FORMAT)
            .to_string(),
        Err(err) => {
            debug!("Timestamp {millis} out of range: {err}");
            millis.to_string()
        }
    }
}

fn pretty_payload(payload: &StructuredPayload, raw: &str) -> String {
    match serde_json::to_string_pretty(payload) {
        Ok(json) => format!("```\n{json}\n```"),
        Err(err) => {
            debug!("Unable to pretty print event payload: {err}");
            raw.to_string()
        }
    }
}

fn compact_payload(payload: &StructuredPayload) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(4);
    if let Some(method) = &payload.method {
        parts.push(method.clone());
    }
    if let Some(path) = &payload.path {
        parts.push(path.clone());
    }
    if let Some(status) = payload.status {
        parts.push(status.to_string());
    }
    match &payload.user_id {
        Some(Value::String(user)) => parts.push(format!("user={user}")),
        Some(Value::Null) | None => {}
        Some(user) => parts.push(format!("user={user}")),
    }
    parts.join(" ")
}

#[allow(clippy::expect_used)]
fn qualified_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\w+(?:::\w+)+|\b[A-Z]\w*(?:Exception|Error)\b")
            .expect("qualified name pattern is valid")
    })
}

/// Wraps qualified names (`Foo::Bar`) and exception class names in backticks.
pub fn highlight_qualified_names(line: &str) -> Cow<'_, str> {
    qualified_name_re().replace_all(line, |caps: &Captures| format!("`{}`", &caps[0]))
}

/// Shortens a stack trace so it fits in a chat message: the highlighted summary line, at most
/// five quoted frames, then a count of what was left out.
pub fn format_hit(hit: &str) -> String {
    let stack_trace: Vec<&str> = hit.trim().split(MULTI_LINE_MARKER).collect();
    let mut lines = Vec::with_capacity(MAX_TRACE_LINES + 2);
    for (i, line) in stack_trace.iter().enumerate() {
        if i == 0 {
            lines.push(highlight_qualified_names(line).into_owned());
        } else if i <= MAX_TRACE_LINES {
            lines.push(format!("> {line}"));
        } else {
            lines.push(format!(
                "...and {} lines more",
                stack_trace.len() - MAX_TRACE_LINES
            ));
            break;
        }
    }
    lines.join("\n")
}
