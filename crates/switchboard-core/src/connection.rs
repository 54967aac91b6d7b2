//! Live session connection.
//!
//! A [`ConnectionManager`] binds one session at a time to its three event
//! channels and turns the output channel into an ordered [`MessageQueue`].
//!
//! ```text
//! Idle -> Attaching -> Listening -> Completed
//!                               \-> Cancelled
//! ```
//!
//! - `attach` while listening does nothing, so repeated reconnects never
//!   stack subscriptions.
//! - An output event is converted, pushed onto the queue, then passed to the
//!   [`MessageProcessor`] and reported as [`ConnectionUpdate::Message`].
//! - An error event is reported but leaves the connection open.
//! - Completion and [`ConnectionManager::cancel`] share one teardown path
//!   guarded by the listening flag: the queue is closed and the three
//!   subscriptions are released exactly once, whichever comes first.
//!
//! Every attach cycle gets a new generation number. Handlers carry the
//! generation they were registered under and ignore events once a newer
//! cycle (or a teardown) has replaced theirs.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use thiserror::Error;

use crate::engines::{ConverterRegistry, Engine};
use crate::logging::{self, LogHandle};
use crate::message::CanonicalMessage;
use crate::queue::MessageQueue;
use crate::transport::{EventHandler, EventSource, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("session id is empty")]
    EmptySessionId,

    #[error("connection state lock poisoned")]
    Poisoned,

    #[error("orchestrator has shut down")]
    ShutDown,

    #[error("{0} sessions cannot be reattached once they have history")]
    ReattachUnsupported(Engine),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Attaching,
    Listening,
    Completed,
    Cancelled,
}

impl ConnectionPhase {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Attaching | Self::Listening)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    AlreadyListening,
    /// The cycle was torn down before registration finished.
    Cancelled,
}

/// What the connection reports to its owner, in event order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionUpdate {
    Message {
        engine: Engine,
        message: CanonicalMessage,
    },
    Error(String),
    Completed,
}

pub type UpdateSink = Arc<dyn Fn(ConnectionUpdate) + Send + Sync>;

/// Post-processing applied to each accepted live message after it has been
/// queued (translation, redaction, ...).
pub trait MessageProcessor: Send + Sync {
    fn process(&self, message: CanonicalMessage, raw: &str) -> CanonicalMessage;
}

/// Passes messages through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProcessor;

impl MessageProcessor for IdentityProcessor {
    fn process(&self, message: CanonicalMessage, _raw: &str) -> CanonicalMessage {
        message
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    phase: ConnectionPhase,
    generation: u64,
    listening: bool,
    session_id: Option<String>,
    engine: Option<Engine>,
    queue: Option<MessageQueue>,
    subscriptions: Vec<Subscription>,
}

/// Pieces shared with the channel handlers.
struct Shared {
    state: Mutex<ConnectionState>,
    converters: Arc<Mutex<ConverterRegistry>>,
    processor: Arc<dyn MessageProcessor>,
    sink: UpdateSink,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, ConnectionState>, ConnectionError> {
        self.state.lock().map_err(|_| ConnectionError::Poisoned)
    }

    /// Queue and engine of the current cycle, if `generation` is still it.
    fn current(&self, generation: u64) -> Option<(MessageQueue, Engine)> {
        let state = self.lock().ok()?;
        if state.generation != generation || !state.listening {
            return None;
        }
        Some((state.queue.clone()?, state.engine?))
    }

    fn on_output(&self, generation: u64, payload: &Value) {
        let Some((queue, engine)) = self.current(generation) else {
            return;
        };
        let raw = payload_text(payload);

        let converted = match self.converters.lock() {
            Ok(mut registry) => registry.convert_line(&raw, engine),
            Err(_) => return,
        };
        let Some(message) = converted.message else {
            return;
        };

        if !queue.enqueue(message.clone()) {
            return;
        }
        let message = self.processor.process(message, &raw);
        (self.sink)(ConnectionUpdate::Message { engine, message });
    }

    fn on_error(&self, generation: u64, payload: &Value) {
        if self.current(generation).is_none() {
            return;
        }
        (self.sink)(ConnectionUpdate::Error(payload_text(payload)));
    }

    fn on_complete(&self, generation: u64) {
        if self.teardown(generation, ConnectionPhase::Completed) {
            (self.sink)(ConnectionUpdate::Completed);
        }
    }

    /// Close the queue and release the subscriptions of cycle `generation`.
    /// Returns `false` if that cycle was already torn down.
    fn teardown(&self, generation: u64, phase: ConnectionPhase) -> bool {
        let (queue, subscriptions, session_id) = {
            let Ok(mut state) = self.lock() else {
                return false;
            };
            if state.generation != generation || !state.listening {
                return false;
            }
            state.listening = false;
            state.phase = phase;
            (
                state.queue.clone(),
                std::mem::take(&mut state.subscriptions),
                state.session_id.take(),
            )
        };

        if let Some(queue) = queue {
            queue.done();
        }
        for sub in &subscriptions {
            sub.unsubscribe();
        }
        log::info!(
            "live connection {} ended ({:?}), released {} subscriptions",
            session_id.as_deref().unwrap_or("?"),
            phase,
            subscriptions.len()
        );
        true
    }
}

/// Payloads arrive either as the raw line (a JSON string) or already decoded.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ConnectionManager {
    source: Arc<dyn EventSource>,
    shared: Arc<Shared>,
    log_dir: Option<PathBuf>,
}

impl ConnectionManager {
    pub fn new(source: Arc<dyn EventSource>, converters: Arc<Mutex<ConverterRegistry>>) -> Self {
        Self {
            source,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::default()),
                converters,
                processor: Arc::new(IdentityProcessor),
                sink: Arc::new(|_: ConnectionUpdate| {}),
            }),
            log_dir: None,
        }
    }

    /// Replace the post-processing step. Must be called before the first
    /// attach.
    pub fn with_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.processor = processor,
            None => log::warn!("processor set after attach, ignored"),
        }
        self
    }

    /// Replace the update sink. Must be called before the first attach.
    pub fn with_sink(mut self, sink: UpdateSink) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => shared.sink = sink,
            None => log::warn!("update sink set after attach, ignored"),
        }
        self
    }

    /// Append raw traffic to `{dir}/{session_id}.log`.
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Start listening to `session_id`'s channels.
    ///
    /// A no-op while a session is already attached; the caller must
    /// [`cancel`](Self::cancel) first to switch sessions.
    pub fn attach(&self, session_id: &str, engine: Engine) -> Result<AttachOutcome, ConnectionError> {
        if session_id.is_empty() {
            return Err(ConnectionError::EmptySessionId);
        }

        let generation = {
            let mut state = self.shared.lock()?;
            if state.listening {
                log::debug!(
                    "attach({session_id}) ignored, already listening to {}",
                    state.session_id.as_deref().unwrap_or("?")
                );
                return Ok(AttachOutcome::AlreadyListening);
            }
            state.generation += 1;
            state.listening = true;
            state.phase = ConnectionPhase::Attaching;
            state.session_id = Some(session_id.to_string());
            state.engine = Some(engine);
            state.queue = Some(MessageQueue::new());
            state.generation
        };

        let traffic = logging::open_log_file(self.log_dir.as_deref(), session_id);
        let subscriptions = vec![
            self.source.subscribe(
                &engine.output_channel(session_id),
                self.handler(generation, &traffic, "OUTPUT", Shared::on_output),
            ),
            self.source.subscribe(
                &engine.error_channel(session_id),
                self.handler(generation, &traffic, "ERROR", Shared::on_error),
            ),
            self.source.subscribe(
                &engine.complete_channel(session_id),
                self.handler(generation, &traffic, "COMPLETE", |shared, generation, _| {
                    shared.on_complete(generation)
                }),
            ),
        ];

        let mut state = self.shared.lock()?;
        if state.generation != generation || !state.listening {
            drop(state);
            for sub in &subscriptions {
                sub.unsubscribe();
            }
            log::debug!("attach({session_id}) torn down while registering");
            return Ok(AttachOutcome::Cancelled);
        }
        state.subscriptions = subscriptions;
        state.phase = ConnectionPhase::Listening;
        log::info!("listening to {engine}:{session_id}");
        Ok(AttachOutcome::Attached)
    }

    fn handler(
        &self,
        generation: u64,
        traffic: &LogHandle,
        direction: &'static str,
        on_event: fn(&Shared, u64, &Value),
    ) -> EventHandler {
        let shared = Arc::downgrade(&self.shared);
        let traffic = traffic.clone();
        Arc::new(move |payload: &Value| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            logging::log_line(&traffic, direction, &payload_text(payload));
            on_event(&shared, generation, payload);
        })
    }

    /// Tear down the current connection without waiting for completion.
    /// Returns `false` if nothing was attached.
    pub fn cancel(&self) -> bool {
        let generation = match self.shared.lock() {
            Ok(state) => state.generation,
            Err(_) => return false,
        };
        self.shared.teardown(generation, ConnectionPhase::Cancelled)
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.shared.lock().map(|s| s.phase).unwrap_or_default()
    }

    pub fn is_listening(&self) -> bool {
        self.shared.lock().map(|s| s.listening).unwrap_or(false)
    }

    pub fn active_session(&self) -> Option<String> {
        self.shared.lock().ok()?.session_id.clone()
    }

    /// Queue of the most recent attach cycle. It stays readable after the
    /// cycle ends so a consumer can drain it.
    pub fn queue(&self) -> Option<MessageQueue> {
        self.shared.lock().ok()?.queue.clone()
    }

    /// Subscriptions currently held (3 while listening, 0 otherwise).
    pub fn subscription_count(&self) -> usize {
        self.shared
            .lock()
            .map(|s| s.subscriptions.iter().filter(|sub| sub.is_active()).count())
            .unwrap_or(0)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventBus;
    use crate::message::MessageType;
    use serde_json::json;
    use tempfile::tempdir;

    struct Harness {
        bus: Arc<EventBus>,
        manager: ConnectionManager,
        updates: Arc<Mutex<Vec<ConnectionUpdate>>>,
    }

    fn harness() -> Harness {
        let bus = Arc::new(EventBus::new());
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink_updates = updates.clone();
        let manager = ConnectionManager::new(bus.clone(), Arc::new(Mutex::new(ConverterRegistry::new())))
            .with_sink(Arc::new(move |u: ConnectionUpdate| sink_updates.lock().unwrap().push(u)));
        Harness {
            bus,
            manager,
            updates,
        }
    }

    fn assistant_line(text: &str) -> Value {
        Value::String(
            json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}})
                .to_string(),
        )
    }

    fn drain(queue: &MessageQueue) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(m) = queue.try_next() {
            out.push(m.text());
        }
        out
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn attach_registers_three_channels() {
            let h = harness();
            assert_eq!(h.manager.phase(), ConnectionPhase::Idle);

            assert_eq!(h.manager.attach("s1", Engine::Claude), Ok(AttachOutcome::Attached));
            assert_eq!(h.manager.phase(), ConnectionPhase::Listening);
            assert_eq!(h.manager.subscription_count(), 3);
            assert_eq!(h.bus.listener_count("claude-output:s1"), 1);
            assert_eq!(h.bus.listener_count("claude-error:s1"), 1);
            assert_eq!(h.bus.listener_count("claude-complete:s1"), 1);
            assert_eq!(h.manager.active_session().as_deref(), Some("s1"));
        }

        #[test]
        fn reconnect_twice_keeps_three_subscriptions() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let first_queue = h.manager.queue().unwrap();

            assert_eq!(
                h.manager.attach("s1", Engine::Claude),
                Ok(AttachOutcome::AlreadyListening)
            );
            assert_eq!(h.manager.subscription_count(), 3);
            assert_eq!(h.bus.total_listeners(), 3);
            assert!(h.manager.queue().unwrap().same_queue(&first_queue));
        }

        #[test]
        fn empty_session_id_is_rejected() {
            let h = harness();
            assert_eq!(
                h.manager.attach("", Engine::Codex),
                Err(ConnectionError::EmptySessionId)
            );
            assert_eq!(h.bus.total_listeners(), 0);
        }

        #[test]
        fn cancel_releases_everything_once() {
            let h = harness();
            h.manager.attach("s1", Engine::Gemini).unwrap();
            let queue = h.manager.queue().unwrap();

            assert!(h.manager.cancel());
            assert!(!h.manager.cancel());
            assert_eq!(h.manager.phase(), ConnectionPhase::Cancelled);
            assert_eq!(h.bus.total_listeners(), 0);
            assert_eq!(h.manager.subscription_count(), 0);
            assert!(queue.is_closed());
            assert!(!h.manager.is_listening());
            assert!(h.manager.active_session().is_none());
        }

        #[test]
        fn complete_then_cancel_tears_down_once() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();

            h.bus.emit("claude-complete:s1", &json!(null));
            h.bus.emit("claude-complete:s1", &json!(null));
            assert!(!h.manager.cancel());

            let completions = h
                .updates
                .lock()
                .unwrap()
                .iter()
                .filter(|u| **u == ConnectionUpdate::Completed)
                .count();
            assert_eq!(completions, 1);
            assert_eq!(h.manager.phase(), ConnectionPhase::Completed);
        }

        #[test]
        fn new_cycle_gets_fresh_queue() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let q1 = h.manager.queue().unwrap();
            h.manager.cancel();

            h.manager.attach("s2", Engine::Codex).unwrap();
            let q2 = h.manager.queue().unwrap();
            assert!(!q1.same_queue(&q2));
            assert!(!q2.is_closed());
            assert_eq!(h.bus.listener_count("codex-output:s2"), 1);
            assert_eq!(h.bus.listener_count("claude-output:s1"), 0);
        }

        /// Publishes completion as soon as the complete handler is in place,
        /// like an engine that exits during attach.
        struct CompletesOnSubscribe {
            bus: Arc<EventBus>,
        }

        impl EventSource for CompletesOnSubscribe {
            fn subscribe(&self, channel: &str, handler: EventHandler) -> Subscription {
                let sub = self.bus.subscribe(channel, handler);
                if channel.contains("-complete:") {
                    self.bus.emit(channel, &json!(null));
                }
                sub
            }
        }

        #[test]
        fn completion_during_attach_releases_new_subscriptions() {
            let bus = Arc::new(EventBus::new());
            let source = Arc::new(CompletesOnSubscribe { bus: bus.clone() });
            let manager = ConnectionManager::new(source, Arc::new(Mutex::new(ConverterRegistry::new())));

            assert_eq!(manager.attach("s1", Engine::Claude), Ok(AttachOutcome::Cancelled));
            assert_eq!(bus.total_listeners(), 0);
            assert_eq!(manager.subscription_count(), 0);
            assert_eq!(manager.phase(), ConnectionPhase::Completed);
            assert!(manager.queue().unwrap().is_closed());
            assert!(!manager.is_listening());
        }

        #[test]
        fn dropping_manager_releases_subscriptions() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let bus = h.bus.clone();
            drop(h);
            assert_eq!(bus.total_listeners(), 0);
        }
    }

    mod events {
        use super::*;

        #[test]
        fn ordered_stream_with_error_and_completion() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let queue = h.manager.queue().unwrap();

            h.bus.emit("claude-output:s1", &assistant_line("A"));
            h.bus.emit("claude-output:s1", &assistant_line("B"));
            h.bus.emit("claude-error:s1", &"E");
            h.bus.emit("claude-output:s1", &assistant_line("C"));
            h.bus.emit("claude-complete:s1", &json!(null));

            assert!(!queue.enqueue(CanonicalMessage::with_text(MessageType::Assistant, "late")));
            assert_eq!(drain(&queue), vec!["A", "B", "C"]);
            assert!(queue.is_closed());

            let updates = h.updates.lock().unwrap();
            let texts: Vec<String> = updates
                .iter()
                .map(|u| match u {
                    ConnectionUpdate::Message { message, .. } => message.text(),
                    ConnectionUpdate::Error(e) => format!("error:{e}"),
                    ConnectionUpdate::Completed => "complete".to_string(),
                })
                .collect();
            assert_eq!(texts, vec!["A", "B", "error:E", "C", "complete"]);
        }

        #[test]
        fn error_keeps_connection_open() {
            let h = harness();
            h.manager.attach("s1", Engine::Codex).unwrap();
            h.bus.emit("codex-error:s1", &"rate limited");

            assert!(h.manager.is_listening());
            assert_eq!(h.manager.subscription_count(), 3);
        }

        #[test]
        fn malformed_and_unknown_lines_are_skipped() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let queue = h.manager.queue().unwrap();

            h.bus.emit("claude-output:s1", &"not json {");
            h.bus.emit("claude-output:s1", &json!({"type": "stream_event"}));
            h.bus.emit("claude-output:s1", &assistant_line("ok"));

            assert_eq!(drain(&queue), vec!["ok"]);
            assert!(h.manager.is_listening());
        }

        #[test]
        fn decoded_payloads_are_accepted() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            h.bus.emit(
                "claude-output:s1",
                &json!({"type": "user", "message": {"content": "typed"}}),
            );
            assert_eq!(drain(&h.manager.queue().unwrap()), vec!["typed"]);
        }

        #[test]
        fn events_after_cancel_are_ignored() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let queue = h.manager.queue().unwrap();
            h.manager.cancel();

            h.bus.emit("claude-output:s1", &assistant_line("after"));
            assert!(queue.is_empty());
            assert!(h.updates.lock().unwrap().is_empty());
        }

        #[test]
        fn processor_runs_after_enqueue() {
            struct Upper;
            impl MessageProcessor for Upper {
                fn process(&self, message: CanonicalMessage, raw: &str) -> CanonicalMessage {
                    assert!(raw.contains("\"assistant\""));
                    CanonicalMessage::with_text(message.kind, message.text().to_uppercase())
                }
            }

            let bus = Arc::new(EventBus::new());
            let updates = Arc::new(Mutex::new(Vec::new()));
            let sink = updates.clone();
            let manager = ConnectionManager::new(bus.clone(), Arc::new(Mutex::new(ConverterRegistry::new())))
                .with_processor(Arc::new(Upper))
                .with_sink(Arc::new(move |u: ConnectionUpdate| sink.lock().unwrap().push(u)));
            manager.attach("s1", Engine::Claude).unwrap();

            bus.emit("claude-output:s1", &assistant_line("hi"));

            // The queue holds the converted message, the owner sees the processed one.
            assert_eq!(drain(&manager.queue().unwrap()), vec!["hi"]);
            match &updates.lock().unwrap()[0] {
                ConnectionUpdate::Message { message, engine } => {
                    assert_eq!(message.text(), "HI");
                    assert_eq!(*engine, Engine::Claude);
                }
                other => panic!("unexpected update {other:?}"),
            };
        }

        #[test]
        fn raw_traffic_is_logged() {
            let dir = tempdir().unwrap();
            let bus = Arc::new(EventBus::new());
            let manager = ConnectionManager::new(bus.clone(), Arc::new(Mutex::new(ConverterRegistry::new())))
                .with_log_dir(Some(dir.path().to_path_buf()));
            manager.attach("s9", Engine::Claude).unwrap();

            bus.emit("claude-output:s9", &assistant_line("A"));
            bus.emit("claude-error:s9", &"E");
            bus.emit("claude-complete:s9", &json!(null));

            let contents = std::fs::read_to_string(dir.path().join("s9.log")).unwrap();
            let lines: Vec<&str> = contents.lines().collect();
            assert_eq!(lines.len(), 3);
            assert!(lines[0].contains("OUTPUT: "));
            assert!(lines[1].ends_with("ERROR: E"));
            assert!(lines[2].ends_with("COMPLETE: null"));
        }
    }

    mod consumer {
        use super::*;
        use std::time::Duration;

        #[tokio::test]
        async fn parked_consumer_sees_all_messages_then_closure() {
            let h = harness();
            h.manager.attach("s1", Engine::Claude).unwrap();
            let queue = h.manager.queue().unwrap();

            let reader = tokio::spawn(async move {
                let mut out = Vec::new();
                while let Some(m) = queue.next().await {
                    out.push(m.text());
                }
                out
            });

            for t in ["one", "two", "three"] {
                h.bus.emit("claude-output:s1", &assistant_line(t));
                tokio::task::yield_now().await;
            }
            h.bus.emit("claude-complete:s1", &json!(null));

            let out = tokio::time::timeout(Duration::from_secs(1), reader)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(out, vec!["one", "two", "three"]);
        }
    }
}
