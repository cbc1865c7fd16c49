//! Wire contract between an execution context and the host.
//!
//! The only path from the isolated context to the host is an asynchronous,
//! one-directional channel of [`Envelope`]s. The payload text is untyped
//! until [`parse_payload`] accepts it; anything else is dropped by the
//! listener without user-visible effect.

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::console::{LogEntry, LogKind};

/// One inbound message from an execution context.
///
/// `generation` is stamped by the [`Mailbox`] that posted it, not by the
/// injected script, so a superseded context cannot forge its way into the
/// current run's console.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub generation: u64,
    pub payload: String,
}

/// The single outbound post primitive handed to an execution context.
///
/// A mailbox is bound to the generation it was created for. Posting never
/// blocks and never fails loudly: once the host is gone or the generation
/// is superseded, posts are simply discarded.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Envelope>,
    generation: u64,
}

impl Mailbox {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post one raw payload. A send failure means the host listener is
    /// gone; the message is dropped.
    pub fn post(&self, payload: String) {
        let _ = self.tx.send(Envelope {
            generation: self.generation,
            payload,
        });
    }

    /// Post one event in the tagged-union wire shape.
    pub fn post_event(&self, kind: &str, message: &str) {
        let payload = serde_json::json!({ "type": kind, "message": message });
        self.post(payload.to_string());
    }
}

/// Validate one payload against the wire shape
/// `{ "type": "log" | "error", "message": string }`.
///
/// Returns `None` for anything else: non-JSON text, non-objects, missing or
/// unrecognized `type`, non-string `message`. Callers drop such messages
/// silently.
pub fn parse_payload(payload: &str) -> Option<LogEntry> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let object = value.as_object()?;

    let kind = match object.get("type")?.as_str()? {
        "log" => LogKind::Log,
        "error" => LogKind::Error,
        other => {
            debug!(kind = other, "unrecognized message type");
            return None;
        }
    };
    let message = object.get("message")?.as_str()?.to_string();

    Some(LogEntry { kind, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_log_and_error_shapes() {
        assert_eq!(
            parse_payload(r#"{"type":"log","message":"a b"}"#),
            Some(LogEntry::log("a b"))
        );
        assert_eq!(
            parse_payload(r#"{"type":"error","message":"boom"}"#),
            Some(LogEntry::error("boom"))
        );
    }

    #[test]
    fn drops_unrecognized_type() {
        assert_eq!(parse_payload(r#"{"type":"ping","message":"x"}"#), None);
    }

    #[test]
    fn drops_missing_fields() {
        assert_eq!(parse_payload(r#"{"type":"log"}"#), None);
        assert_eq!(parse_payload(r#"{"message":"x"}"#), None);
    }

    #[test]
    fn drops_non_string_message() {
        assert_eq!(parse_payload(r#"{"type":"log","message":42}"#), None);
    }

    #[test]
    fn drops_non_objects_and_non_json() {
        assert_eq!(parse_payload("[1,2,3]"), None);
        assert_eq!(parse_payload("\"log\""), None);
        assert_eq!(parse_payload("not json at all"), None);
        assert_eq!(parse_payload(""), None);
    }

    #[test]
    fn extra_fields_are_tolerated() {
        // Shape validation is a floor, not an exact schema.
        assert_eq!(
            parse_payload(r#"{"type":"log","message":"x","lineno":3}"#),
            Some(LogEntry::log("x"))
        );
    }

    #[test]
    fn mailbox_stamps_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox::new(tx, 7);
        mailbox.post_event("log", "hello");

        let envelope = rx.try_recv().expect("envelope posted");
        assert_eq!(envelope.generation, 7);
        assert_eq!(
            parse_payload(&envelope.payload),
            Some(LogEntry::log("hello"))
        );
    }
}
