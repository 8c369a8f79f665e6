//! Message rendering for alert notifications.
//!
//! The channel parses HTML, so every interpolated value is escaped before it
//! is placed into the template.

use super::{Alert, STATUS_ACTIVE, STATUS_RECOVERED};

/// Timestamp layout used in messages, always in UTC.
pub const DEFAULT_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Longest message text the channel accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const ELLIPSIS: char = '…';

/// Renders alerts into the HTML message body sent to the channel.
#[derive(Clone, Debug)]
pub struct AlertRenderer {
    time_format: String,
}

impl Default for AlertRenderer {
    fn default() -> Self {
        Self {
            time_format: DEFAULT_TIME_FORMAT.to_string(),
        }
    }
}

impl AlertRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the chrono format string for the timestamp line.
    pub fn with_time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    /// Renders the message body for `alert`.
    ///
    /// ```text
    ///
    /// <b>🚨 [active]</b>
    /// <b>checkout</b>
    /// p95 latency
    /// 04-03-2026 05:06:07 (UTC)
    ///
    /// p95 latency is 2.1s
    /// ```
    ///
    /// The alert message is cut short so the whole text fits in
    /// [`MAX_MESSAGE_CHARS`].
    pub fn render(&self, alert: &Alert) -> String {
        let mut text = format!(
            "\n<b>{} [{}]</b>\n<b>{}</b>\n{}\n{} (UTC)\n\n",
            status_icon(&alert.status),
            escape_html(&alert.status),
            escape_html(&alert.service_name),
            escape_html(&alert.rule_name),
            alert.timestamp.format(&self.time_format),
        );
        let budget = MAX_MESSAGE_CHARS.saturating_sub(text.chars().count());
        text.push_str(&truncate_escaped(&escape_html(&alert.message), budget));
        text
    }
}

/// Icon shown next to the status.
pub fn status_icon(status: &str) -> &'static str {
    match status {
        STATUS_ACTIVE => "🚨",
        STATUS_RECOVERED => "✅",
        _ => "❓",
    }
}

/// Escapes the three characters the channel's HTML parser reserves.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Shortens already escaped text to at most `max_chars` characters, ending
/// with an ellipsis. An entity is never split.
pub fn truncate_escaped(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }

    let keep = max_chars - 1;
    let end = text
        .char_indices()
        .nth(keep)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    let mut cut = &text[..end];
    if let Some(amp) = cut.rfind('&') {
        if !cut[amp..].contains(';') {
            cut = &cut[..amp];
        }
    }

    let mut truncated = String::with_capacity(cut.len() + ELLIPSIS.len_utf8());
    truncated.push_str(cut);
    truncated.push(ELLIPSIS);
    truncated
}
