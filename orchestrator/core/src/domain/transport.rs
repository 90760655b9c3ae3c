// Copyright (c) 2026 Helix Swarm Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Publish/subscribe transport capability.
//!
//! Agent nodes and the ground station are both built on this one trait and
//! differ only in the handlers they attach to it.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;

use crate::domain::protocol::ConnectionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub retained: bool,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retained: false,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }

    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub client_id: String,
    /// Published by the broker if the session drops without a disconnect.
    pub last_will: Option<Message>,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            last_will: None,
        }
    }

    pub fn with_last_will(mut self, will: Message) -> Self {
        self.last_will = Some(will);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport link is down")]
    LinkDown,

    #[error("session closed")]
    Closed,

    #[error("invalid topic filter '{0}'")]
    InvalidFilter(String),

    #[error("broker error: {0}")]
    Broker(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, options: SessionOptions) -> Result<(), TransportError>;

    async fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Subscribe to an MQTT-style filter (`+` one level, `#` the remainder).
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Next inbound message. Returns [`TransportError::Closed`] once the
    /// session has ended.
    async fn recv(&self) -> Result<Message, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    fn link_state(&self) -> watch::Receiver<ConnectionStatus>;
}

/// True when `topic` matches the subscription `filter`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Reject filters with misplaced wildcards.
pub fn validate_filter(filter: &str) -> Result<(), TransportError> {
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let bad_hash = level.contains('#') && (*level != "#" || i != levels.len() - 1);
        let bad_plus = level.contains('+') && *level != "+";
        if filter.is_empty() || bad_hash || bad_plus {
            return Err(TransportError::InvalidFilter(filter.to_string()));
        }
    }
    Ok(())
}
