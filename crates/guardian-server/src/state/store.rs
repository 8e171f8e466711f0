//! Engine handle, session registry and message fan-out.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use dashmap::DashMap;
use guardian_core::{AirspaceEngine, Envelope, InboundMessage, Origin, OutboundMessage};
use tokio::sync::{broadcast, mpsc};

use crate::config::Config;

/// One open WebSocket session.
#[derive(Debug)]
pub struct SessionHandle {
    pub tx: mpsc::UnboundedSender<Arc<str>>,
    pub operator: bool,
    /// Pilot bound by the last accepted position report
    pub pilot: Option<String>,
}

/// Application state shared by the HTTP handlers, sockets and loops.
pub struct AppState {
    engine: Mutex<AirspaceEngine>,
    sessions: DashMap<String, SessionHandle>,
    /// pilot id -> session id
    pilots: DashMap<String, String>,
    pub tx: broadcast::Sender<Arc<str>>,
    config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity);
        Self {
            engine: Mutex::new(AirspaceEngine::new(config.rules())),
            sessions: DashMap::new(),
            pilots: DashMap::new(),
            tx,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `f` with exclusive access to the engine.
    ///
    /// Engine passes commit atomically, so a poisoned lock still guards the
    /// last good state and is recovered.
    pub fn with_engine<R>(&self, f: impl FnOnce(&mut AirspaceEngine) -> R) -> R {
        let mut guard = self.lock_engine();
        f(&mut guard)
    }

    fn lock_engine(&self) -> MutexGuard<'_, AirspaceEngine> {
        self.engine.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Engine lock poisoned, recovering last state");
            self.engine.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Register a new session and return its id and directed-message queue.
    pub fn open_session(&self, operator: bool) -> (String, mpsc::UnboundedReceiver<Arc<str>>) {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.insert(
            session_id.clone(),
            SessionHandle {
                tx,
                operator,
                pilot: None,
            },
        );
        tracing::info!(
            "Session {} connected{}",
            session_id,
            if operator { " (operator)" } else { "" }
        );
        (session_id, rx)
    }

    /// Drop a session and remove the aircraft still bound to it.
    pub fn close_session(&self, session_id: &str) {
        self.sessions.remove(session_id);
        self.pilots.retain(|_, bound| bound != session_id);
        let envelopes = self.with_engine(|engine| engine.on_disconnect(session_id, Utc::now()));
        tracing::info!("Session {} closed", session_id);
        self.deliver(envelopes, None);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Session currently bound to `pilot_id`.
    pub fn session_for(&self, pilot_id: &str) -> Option<String> {
        self.pilots.get(pilot_id).map(|entry| entry.value().clone())
    }

    /// Decode and apply one text frame from `session_id`.
    pub fn handle_frame(&self, session_id: &str, text: &str) {
        let message: InboundMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!("Dropping undecodable frame from {}: {}", session_id, err);
                return;
            }
        };
        let Some((operator, pilot)) = self
            .sessions
            .get(session_id)
            .map(|handle| (handle.operator, handle.pilot.clone()))
        else {
            return;
        };
        let reporter = match &message {
            InboundMessage::Position(report) => Some(report.id.clone()),
            _ => None,
        };

        let now = Utc::now();
        let (envelopes, accepted) = self.with_engine(|engine| {
            let origin = Origin {
                session: Some(session_id),
                pilot: pilot.as_deref(),
                operator,
            };
            let envelopes = engine.apply(message, origin, now);
            let accepted = reporter.filter(|id| {
                engine
                    .positions()
                    .get(id)
                    .and_then(|state| state.session.as_deref())
                    == Some(session_id)
            });
            (envelopes, accepted)
        });

        if let Some(pilot_id) = accepted {
            self.bind_pilot(&pilot_id, session_id);
        }
        self.deliver(envelopes, Some(session_id));
    }

    /// Point `pilot_id` at `session_id`, moving it off any previous session.
    fn bind_pilot(&self, pilot_id: &str, session_id: &str) {
        let previous = self.pilots.insert(pilot_id.to_string(), session_id.to_string());
        match previous.as_deref() {
            Some(previous) if previous == session_id => return,
            Some(previous) => {
                if let Some(mut handle) = self.sessions.get_mut(previous) {
                    handle.pilot = None;
                }
                tracing::info!("Pilot {} moved to session {}", pilot_id, session_id);
            }
            None => tracing::info!("Pilot {} bound to session {}", pilot_id, session_id),
        }
        if let Some(mut handle) = self.sessions.get_mut(session_id) {
            handle.pilot = Some(pilot_id.to_string());
        }
    }

    fn unbind_pilot(&self, pilot_id: &str) {
        if let Some((_, session_id)) = self.pilots.remove(pilot_id) {
            if let Some(mut handle) = self.sessions.get_mut(&session_id) {
                if handle.pilot.as_deref() == Some(pilot_id) {
                    handle.pilot = None;
                }
            }
        }
    }

    /// Send engine output. Must be called without holding the engine lock.
    pub fn deliver(&self, envelopes: Vec<Envelope>, origin: Option<&str>) {
        for envelope in envelopes {
            if let Envelope::Broadcast(OutboundMessage::AircraftRemoved { id }) = &envelope {
                self.unbind_pilot(id);
            }
            let payload: Arc<str> = match serde_json::to_string(envelope.message()) {
                Ok(text) => text.into(),
                Err(err) => {
                    tracing::error!("Failed to encode outbound message: {}", err);
                    continue;
                }
            };
            match envelope {
                Envelope::Broadcast(_) => {
                    // No subscribers is not an error.
                    let _ = self.tx.send(payload);
                }
                Envelope::Reply(_) => {
                    if let Some(session_id) = origin {
                        self.send_to_session(session_id, payload);
                    }
                }
                Envelope::Direct { aircraft_id, .. } => match self.session_for(&aircraft_id) {
                    Some(session_id) => self.send_to_session(&session_id, payload),
                    None => tracing::debug!("No session bound to {}, message dropped", aircraft_id),
                },
            }
        }
    }

    fn send_to_session(&self, session_id: &str, payload: Arc<str>) {
        if let Some(handle) = self.sessions.get(session_id) {
            if handle.tx.send(payload).is_err() {
                tracing::debug!("Session {} queue closed", session_id);
            }
        }
    }
}
