// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Broker - MQTT-style Transport for Simulation and Tests
//
// Implements the publish/subscribe semantics the swarm protocol relies on:
// - topic filters with `+` and `#` wildcards
// - retained messages replayed to new subscribers
// - last-will messages published when a session drops uncleanly
// - per-session link state, with `sever`/`restore` to simulate radio loss
//
// All broker state sits behind one parking_lot mutex; delivery uses
// unbounded channels so publishing never waits on a slow consumer.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::protocol::ConnectionStatus;
use crate::domain::transport::{
    topic_matches, validate_filter, Message, SessionOptions, Transport, TransportError,
};

type SessionId = u64;

struct Session {
    client_id: String,
    filters: Vec<String>,
    sender: mpsc::UnboundedSender<Message>,
    last_will: Option<Message>,
    link: watch::Sender<ConnectionStatus>,
    severed: bool,
}

#[derive(Default)]
struct BrokerState {
    sessions: HashMap<SessionId, Session>,
    retained: BTreeMap<String, Message>,
    next_id: SessionId,
}

impl BrokerState {
    fn route(&mut self, message: Message) {
        if message.retained {
            if message.payload.is_empty() {
                self.retained.remove(&message.topic);
            } else {
                self.retained.insert(message.topic.clone(), message.clone());
            }
        }
        for session in self.sessions.values() {
            if session.severed {
                continue;
            }
            if session.filters.iter().any(|f| topic_matches(f, &message.topic)) {
                // A dropped receiver just means the client went away.
                let _ = session.sender.send(message.clone());
            }
        }
    }
}

/// Shared in-process broker. Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client handle. The session starts on [`Transport::connect`].
    pub fn client(&self) -> BrokerClient {
        let (link, _) = watch::channel(ConnectionStatus::Disconnected);
        BrokerClient {
            broker: self.clone(),
            session: Mutex::new(None),
            receiver: tokio::sync::Mutex::new(None),
            link,
        }
    }

    /// Publish on behalf of the broker itself (operator tooling, tests).
    pub fn inject(&self, message: Message) {
        self.state.lock().route(message);
    }

    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.state.lock().retained.get(topic).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Drop the radio link of `client_id`: its last will is published and it
    /// stops sending and receiving until [`InMemoryBroker::restore`].
    pub fn sever(&self, client_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state
            .sessions
            .values_mut()
            .find(|s| s.client_id == client_id && !s.severed)
        else {
            return false;
        };
        session.severed = true;
        session.link.send_replace(ConnectionStatus::Disconnected);
        let will = session.last_will.clone();
        warn!(client_id, "Session link severed");
        if let Some(will) = will {
            state.route(will);
        }
        true
    }

    /// Bring a severed session back. The client is expected to re-announce
    /// itself once it sees its link come back up.
    pub fn restore(&self, client_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(session) = state
            .sessions
            .values_mut()
            .find(|s| s.client_id == client_id && s.severed)
        else {
            return false;
        };
        session.severed = false;
        session.link.send_replace(ConnectionStatus::Connected);
        info!(client_id, "Session link restored");
        true
    }
}

pub struct BrokerClient {
    broker: InMemoryBroker,
    session: Mutex<Option<SessionId>>,
    receiver: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    link: watch::Sender<ConnectionStatus>,
}

impl BrokerClient {
    fn session_id(&self) -> Result<SessionId, TransportError> {
        (*self.session.lock()).ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for BrokerClient {
    async fn connect(&self, options: SessionOptions) -> Result<(), TransportError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut state = self.broker.state.lock();
            if let Some(old) = self.session.lock().take() {
                state.sessions.remove(&old);
            }
            let id = state.next_id;
            state.next_id += 1;
            state.sessions.insert(
                id,
                Session {
                    client_id: options.client_id.clone(),
                    filters: Vec::new(),
                    sender,
                    last_will: options.last_will,
                    link: self.link.clone(),
                    severed: false,
                },
            );
            id
        };
        *self.session.lock() = Some(id);
        *self.receiver.lock().await = Some(receiver);
        self.link.send_replace(ConnectionStatus::Connected);
        debug!(client_id = %options.client_id, "Session connected");
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        let id = self.session_id()?;
        let mut state = self.broker.state.lock();
        match state.sessions.get(&id) {
            Some(session) if session.severed => Err(TransportError::LinkDown),
            Some(_) => {
                state.route(message);
                Ok(())
            }
            None => Err(TransportError::NotConnected),
        }
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        validate_filter(filter)?;
        let id = self.session_id()?;
        let mut state = self.broker.state.lock();
        let replay: Vec<Message> = state
            .retained
            .values()
            .filter(|m| topic_matches(filter, &m.topic))
            .cloned()
            .collect();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(TransportError::NotConnected)?;
        if session.severed {
            return Err(TransportError::LinkDown);
        }
        if !session.filters.iter().any(|f| f == filter) {
            session.filters.push(filter.to_string());
        }
        for message in replay {
            let _ = session.sender.send(message);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Message, TransportError> {
        let mut guard = self.receiver.lock().await;
        let receiver = guard.as_mut().ok_or(TransportError::NotConnected)?;
        receiver.recv().await.ok_or(TransportError::Closed)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let id = self.session.lock().take().ok_or(TransportError::NotConnected)?;
        // Clean disconnect: the session's sender is dropped, no last will.
        self.broker.state.lock().sessions.remove(&id);
        self.link.send_replace(ConnectionStatus::Disconnected);
        Ok(())
    }

    fn link_state(&self) -> watch::Receiver<ConnectionStatus> {
        self.link.subscribe()
    }
}
