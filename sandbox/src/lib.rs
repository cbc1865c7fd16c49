//! HTML/CSS/JS code-execution sandbox.
//!
//! Combines three independently edited sources into a single executable
//! document, runs it in an isolated context, and relays console output and
//! runtime errors back to the host through a validated message channel.
//! The architecture enforces a strict separation:
//!
//! - **[`bundle`] / [`compose`]**: pure text composition. No I/O,
//!   deterministic, fully testable in isolation.
//! - **[`engine`]**: the isolated execution context (embedded JS engine).
//!   The only capabilities granted to injected script are evaluation,
//!   timers, and the outbound post primitive.
//! - **[`message`]**: the `{type, message}` wire contract and its shape
//!   validation.
//! - **[`host`]**: run generations, the inbound listener, and the console
//!   entry sequence.

pub mod bundle;
pub mod compose;
pub mod console;
pub mod engine;
pub mod host;
pub mod message;
