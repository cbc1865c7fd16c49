//! Sandbox host: owns run generations, the inbound listener, and the
//! console entry sequence.
//!
//! The host never calls into an execution context directly; the two halves
//! are independently scheduled and connected only by the one-directional
//! envelope channel. `run()` is fire-and-forget: it replaces the context
//! wholesale and returns immediately. Replacement is the sole cancellation
//! mechanism; there is no stop signal, no timeout, and no infinite-loop
//! detection. A wedged context thread is orphaned and its mailbox goes
//! stale at the next run, so it can no longer touch the console.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::bundle::SourceBundle;
use crate::compose::compose;
use crate::console::{Console, LogEntry};
use crate::engine;
use crate::message::{Envelope, Mailbox, parse_payload};

/// Phase of the current run cycle.
///
/// There is no terminated state: a run is considered ongoing until it is
/// superseded by the next `run()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Composing,
    Installed,
    Streaming,
}

/// Console activity broadcast to subscribers (e.g. an SSE stream).
#[derive(Debug, Clone)]
pub enum ConsoleEvent {
    /// A new generation started and the entry sequence was reset.
    Cleared { generation: u64 },
    /// One validated entry was appended.
    Entry { generation: u64, entry: LogEntry },
}

struct Shared {
    generation: AtomicU64,
    state: Mutex<RunState>,
    console: Mutex<Console>,
    events: broadcast::Sender<ConsoleEvent>,
}

impl Shared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            generation: AtomicU64::new(0),
            state: Mutex::new(RunState::Idle),
            console: Mutex::new(Console::default()),
            events,
        }
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    /// Accept one inbound envelope: drop cross-generation and malformed
    /// messages, append everything else in arrival order.
    ///
    /// Must never panic on input — the payload is untrusted text from the
    /// execution context.
    fn accept(&self, envelope: Envelope) {
        let current = self.generation.load(Ordering::SeqCst);
        if envelope.generation != current {
            debug!(
                stale = envelope.generation,
                current, "dropping cross-generation message"
            );
            return;
        }

        let Some(entry) = parse_payload(&envelope.payload) else {
            debug!(payload = %envelope.payload, "dropping malformed message");
            return;
        };

        self.console
            .lock()
            .expect("console lock poisoned")
            .push(entry.clone());
        self.set_state(RunState::Streaming);
        let _ = self.events.send(ConsoleEvent::Entry {
            generation: current,
            entry,
        });
    }
}

/// Owns the isolated execution side of the editor: one live context at a
/// time, replaced wholesale on every run.
pub struct SandboxHost {
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<Envelope>,
    listener: JoinHandle<()>,
}

impl SandboxHost {
    /// Create a host and register its inbound listener.
    ///
    /// Must be called inside a tokio runtime. The listener is registered
    /// once for the host's lifetime and deregistered on drop.
    pub fn new() -> Self {
        let (inbound, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let shared = Arc::new(Shared::new());

        let listener_shared = Arc::clone(&shared);
        let listener = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                listener_shared.accept(envelope);
            }
        });

        Self {
            shared,
            inbound,
            listener,
        }
    }

    /// Start a new run generation from the given bundle snapshot.
    ///
    /// Clears the entry sequence, composes the document, installs it into a
    /// fresh execution context on its own thread, and returns the new
    /// generation without waiting for anything to execute. No state
    /// survives from the previous run; messages still in flight from it
    /// are discarded by the generation check.
    pub fn run(&self, bundle: &SourceBundle) -> u64 {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(RunState::Composing);

        self.shared
            .console
            .lock()
            .expect("console lock poisoned")
            .clear();
        let _ = self.shared.events.send(ConsoleEvent::Cleared { generation });

        let document = compose(bundle);
        self.shared.set_state(RunState::Installed);
        debug!(generation, "installing composed document");

        // Boa contexts are not Send; each generation gets a dedicated
        // thread so injected script cannot block the host.
        let mailbox = self.mailbox_for(generation);
        std::thread::spawn(move || engine::execute(&document, mailbox));

        generation
    }

    /// Outbound post primitive bound to the current generation.
    pub fn mailbox(&self) -> Mailbox {
        self.mailbox_for(self.generation())
    }

    /// Outbound post primitive bound to an explicit generation. A mailbox
    /// for a superseded generation still sends, but the listener discards
    /// everything it posts.
    pub fn mailbox_for(&self, generation: u64) -> Mailbox {
        Mailbox::new(self.inbound.clone(), generation)
    }

    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RunState {
        *self.shared.state.lock().expect("state lock poisoned")
    }

    /// Snapshot of the current entry sequence in arrival order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.shared
            .console
            .lock()
            .expect("console lock poisoned")
            .entries()
            .to_vec()
    }

    /// Rendered console fragment (placeholder when empty).
    pub fn render_html(&self) -> String {
        self.shared
            .console
            .lock()
            .expect("console lock poisoned")
            .render_html()
    }

    /// Subscribe to console activity for the host's lifetime.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.shared.events.subscribe()
    }
}

impl Default for SandboxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SandboxHost {
    fn drop(&mut self) {
        // The listener is registered once for the component's lifetime;
        // tearing the host down must deregister it.
        self.listener.abort();
    }
}
