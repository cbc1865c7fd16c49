//! Console model: the observable output stream of one execution.

use serde::{Deserialize, Serialize};

/// Placeholder rendered while the entry sequence is empty.
pub const EMPTY_PLACEHOLDER: &str = "No logs yet...";

/// Discriminant for one reported output event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Log,
    Error,
}

/// One reported output/error event from an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub message: String,
}

impl LogEntry {
    pub fn log(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Log,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: LogKind::Error,
            message: message.into(),
        }
    }
}

/// Ordered, append-only entry sequence for the current run generation.
///
/// Reset to empty at the start of each run. Entries are kept in arrival
/// order, without truncation or deduplication.
#[derive(Debug, Default)]
pub struct Console {
    entries: Vec<LogEntry>,
}

impl Console {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Render the entry sequence as an HTML fragment.
    ///
    /// Empty sequence renders the placeholder; otherwise one `<div>` per
    /// entry with non-overlapping `console-log` / `console-error` classes.
    /// Entry text is escaped: sandbox output must never execute in the
    /// host page.
    pub fn render_html(&self) -> String {
        if self.entries.is_empty() {
            return format!(
                "<div class=\"console-empty\">{}</div>\n",
                escape_html(EMPTY_PLACEHOLDER)
            );
        }

        let mut out = String::new();
        for entry in &self.entries {
            let class = match entry.kind {
                LogKind::Log => "console-log",
                LogKind::Error => "console-error",
            };
            out.push_str(&format!(
                "<div class=\"console-entry {}\">{}</div>\n",
                class,
                escape_html(&entry.message)
            ));
        }
        out
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_console_renders_placeholder() {
        let console = Console::default();
        let html = console.render_html();
        assert!(html.contains("console-empty"));
        assert!(html.contains(EMPTY_PLACEHOLDER));
    }

    #[test]
    fn entries_render_in_arrival_order_with_distinct_classes() {
        let mut console = Console::default();
        console.push(LogEntry::log("first"));
        console.push(LogEntry::error("second"));
        console.push(LogEntry::log("first"));

        let html = console.render_html();
        let first_at = html.find("console-log\">first").expect("first entry");
        let second_at = html.find("console-error\">second").expect("second entry");
        assert!(first_at < second_at);
        // No deduplication: the repeated message appears twice.
        assert_eq!(html.matches(">first<").count(), 2);
    }

    #[test]
    fn entry_text_is_escaped() {
        let mut console = Console::default();
        console.push(LogEntry::log("<script>alert(1)</script>"));
        let html = console.render_html();
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    }

    #[test]
    fn clear_resets_to_placeholder() {
        let mut console = Console::default();
        console.push(LogEntry::log("x"));
        console.clear();
        assert!(console.is_empty());
        assert!(console.render_html().contains("console-empty"));
    }
}
