//! Stream orchestration.
//!
//! [`StreamOrchestrator`] is what a UI holds for its session panel. It loads
//! history, decides whether to attach to a live session, and publishes one
//! [`StreamState`] through a `watch` channel.
//!
//! # Latest wins
//!
//! Every `load_history` call takes a new loading token. After each await the
//! call compares its token with the current one and drops its result on a
//! mismatch, so a slow fetch for a session the user already switched away
//! from never overwrites the newer session. The alive flag plays the same
//! role for [`StreamOrchestrator::shutdown`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::watch;

use crate::backend::SessionBackend;
use crate::config::OrchestratorConfig;
use crate::connection::{
    AttachOutcome, ConnectionError, ConnectionManager, ConnectionPhase, ConnectionUpdate,
    MessageProcessor, UpdateSink,
};
use crate::engines::{ConverterRegistry, Engine};
use crate::history::{HistoryLoader, LoadError};
use crate::message::CanonicalMessage;
use crate::queue::MessageQueue;
use crate::session::SessionRef;
use crate::transport::EventSource;
use crate::usage::RateLimitSummary;

/// Everything the UI renders for the current session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamState {
    pub messages: Vec<CanonicalMessage>,
    pub loading: bool,
    pub error: Option<String>,
    pub rate_limits: Option<RateLimitSummary>,
    /// Session id of the live connection, while one is attached.
    pub active_session: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(usize),
    NotFound,
    Failed,
    /// A newer load started, or the orchestrator shut down, before this one
    /// finished. Nothing was published.
    Stale,
}

pub type NotFoundCallback = Arc<dyn Fn(&SessionRef) + Send + Sync>;

pub struct StreamOrchestrator {
    loader: HistoryLoader,
    backend: Arc<dyn SessionBackend>,
    connection: ConnectionManager,
    converters: Arc<Mutex<ConverterRegistry>>,
    config: OrchestratorConfig,
    token: AtomicU64,
    alive: Arc<AtomicBool>,
    state: Arc<watch::Sender<StreamState>>,
    current: Mutex<Option<SessionRef>>,
    on_not_found: Option<NotFoundCallback>,
}

impl StreamOrchestrator {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        source: Arc<dyn EventSource>,
        config: OrchestratorConfig,
    ) -> Self {
        let converters = Arc::new(Mutex::new(ConverterRegistry::new()));
        let (state, _) = watch::channel(StreamState::default());
        let state = Arc::new(state);
        let alive = Arc::new(AtomicBool::new(true));

        let connection = ConnectionManager::new(source, converters.clone())
            .with_log_dir(config.log_dir.clone())
            .with_sink(live_sink(state.clone(), alive.clone(), converters.clone()));

        Self {
            loader: HistoryLoader::with_config(backend.clone(), config.loader_config()),
            backend,
            connection,
            converters,
            config,
            token: AtomicU64::new(0),
            alive,
            state,
            current: Mutex::new(None),
            on_not_found: None,
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        self.connection = self.connection.with_processor(processor);
        self
    }

    /// Called instead of publishing an error when a session has no
    /// transcript yet.
    pub fn on_not_found(mut self, callback: NotFoundCallback) -> Self {
        self.on_not_found = Some(callback);
        self
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    pub fn rate_limits(&self, engine: Engine) -> Option<RateLimitSummary> {
        self.converters.lock().ok()?.rate_limits(engine)
    }

    pub fn connection_phase(&self) -> ConnectionPhase {
        self.connection.phase()
    }

    pub fn subscription_count(&self) -> usize {
        self.connection.subscription_count()
    }

    /// Queue of the current (or last) live connection.
    pub fn live_queue(&self) -> Option<MessageQueue> {
        self.connection.queue()
    }

    pub fn current_session(&self) -> Option<SessionRef> {
        self.current.lock().ok()?.clone()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_current(&self, token: u64) -> bool {
        self.is_alive() && self.token.load(Ordering::SeqCst) == token
    }

    fn publish(&self, f: impl FnOnce(&mut StreamState)) {
        if self.is_alive() {
            self.state.send_modify(f);
        }
    }

    /// Make `session` the current one. Switching to a different session
    /// tears down the previous live connection and resets the live
    /// converter of the new session's engine.
    fn switch_to(&self, session: &SessionRef) {
        let switched = match self.current.lock() {
            Ok(mut current) => {
                let switched = current.as_ref() != Some(session);
                *current = Some(session.clone());
                switched
            }
            Err(_) => false,
        };
        if !switched {
            return;
        }

        if self.connection.cancel() {
            log::debug!("switched to {session}, previous live connection cancelled");
        }
        if let Ok(mut converters) = self.converters.lock() {
            converters.reset(session.engine);
        }
    }

    /// Load `session`'s transcript and publish it, unless a newer load
    /// started in the meantime.
    pub async fn load_history(&self, session: &SessionRef) -> LoadOutcome {
        let token = self.token.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.is_alive() {
            return LoadOutcome::Stale;
        }

        self.switch_to(session);
        self.publish(|s| {
            s.loading = true;
            s.error = None;
        });

        let result = self.loader.load(session).await;

        if !self.is_current(token) {
            log::debug!("[{session}] discarding stale history load (token {token})");
            return LoadOutcome::Stale;
        }

        match result {
            Ok(history) => {
                let count = history.messages.len();
                let rate_limits = history
                    .rate_limits
                    .or_else(|| self.rate_limits(session.engine));
                self.publish(|s| {
                    s.messages = history.messages;
                    s.loading = false;
                    s.error = None;
                    s.rate_limits = rate_limits;
                });
                LoadOutcome::Loaded(count)
            }
            Err(LoadError::NotFound) => {
                let rate_limits = self.rate_limits(session.engine);
                self.publish(|s| {
                    s.messages.clear();
                    s.loading = false;
                    s.error = None;
                    s.rate_limits = rate_limits;
                });
                if let Some(callback) = &self.on_not_found {
                    callback(session);
                }
                LoadOutcome::NotFound
            }
            Err(LoadError::Failed(reason)) => {
                log::error!("[{session}] history load failed: {reason}");
                let message = self.config.load_error_message.clone();
                self.publish(|s| {
                    s.messages.clear();
                    s.loading = false;
                    s.error = Some(message);
                });
                LoadOutcome::Failed
            }
        }
    }

    /// Re-attach to `session` if the backend reports it as still running.
    /// Only engines with live discovery are checked. Returns whether a
    /// connection was attached.
    pub async fn check_for_active_session(&self, session: &SessionRef) -> bool {
        if !session.engine.supports_live_discovery() {
            return false;
        }
        let token = self.token.load(Ordering::SeqCst);

        let active = match self.backend.list_active_sessions().await {
            Ok(active) => active,
            Err(e) => {
                log::warn!("[{session}] cannot list active sessions: {e}");
                return false;
            }
        };

        if !self.is_current(token) || self.current_session().as_ref() != Some(session) {
            return false;
        }
        if !active.iter().any(|d| d.session_id == session.session_id) {
            return false;
        }

        log::info!("[{session}] still running, reattaching");
        matches!(
            self.reconnect(&session.session_id, session.engine),
            Ok(AttachOutcome::Attached)
        )
    }

    /// Attach the live connection to `session_id`. Idempotent while a
    /// connection is already listening.
    pub fn reconnect(&self, session_id: &str, engine: Engine) -> Result<AttachOutcome, ConnectionError> {
        if !self.is_alive() {
            return Err(ConnectionError::ShutDown);
        }
        if !engine.supports_reattach() && self.has_loaded_history(session_id, engine) {
            return Err(ConnectionError::ReattachUnsupported(engine));
        }
        let outcome = self.connection.attach(session_id, engine)?;
        if outcome == AttachOutcome::Attached {
            let active = self.connection.active_session();
            self.publish(|s| s.active_session = active);
        }
        Ok(outcome)
    }

    fn has_loaded_history(&self, session_id: &str, engine: Engine) -> bool {
        let is_current = self
            .current_session()
            .is_some_and(|s| s.session_id == session_id && s.engine == engine);
        is_current && !self.state.borrow().messages.is_empty()
    }

    /// Load history, then reattach if the session is still running.
    pub async fn open_session(&self, session: &SessionRef) -> LoadOutcome {
        let outcome = self.load_history(session).await;
        if outcome != LoadOutcome::Stale && session.engine.supports_reattach() {
            self.check_for_active_session(session).await;
        }
        outcome
    }

    /// Stop publishing and drop the live connection. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.connection.cancel();
            log::debug!("orchestrator shut down");
        }
    }
}

/// Applies live connection updates to the published state.
fn live_sink(
    state: Arc<watch::Sender<StreamState>>,
    alive: Arc<AtomicBool>,
    converters: Arc<Mutex<ConverterRegistry>>,
) -> UpdateSink {
    Arc::new(move |update: ConnectionUpdate| {
        if !alive.load(Ordering::SeqCst) {
            return;
        }
        match update {
            ConnectionUpdate::Message { engine, message } => {
                let rate_limits = converters.lock().ok().and_then(|c| c.rate_limits(engine));
                state.send_modify(|s| {
                    s.messages.push(message);
                    if rate_limits.is_some() {
                        s.rate_limits = rate_limits;
                    }
                });
            }
            ConnectionUpdate::Error(error) => {
                state.send_modify(|s| s.error = Some(error));
            }
            ConnectionUpdate::Completed => {
                state.send_modify(|s| s.active_session = None);
            }
        }
    })
}
