//! In-process agent channels.
//!
//! `MemoryConnector` hands out channels whose far end is a [`MemorySession`]
//! the caller controls: it can inspect delivered messages, push messages back
//! and close the channel at a chosen moment. Useful for embedding the relay
//! next to an in-process agent and for driving the dispatcher deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;

use crate::channel::{AgentChannel, AgentConnector, AgentPort, ChannelError, ConnectError, EventSink};

#[derive(Debug, Clone, Default)]
enum Behavior {
    #[default]
    Accept,
    Refuse(String),
    FailWrites,
    CloseOnMessage(String),
}

/// Far end of one in-memory channel.
#[derive(Debug, Clone)]
pub struct MemorySession {
    agent: String,
    received: Arc<Mutex<Vec<Bytes>>>,
    sink: EventSink,
    disconnected: Arc<AtomicBool>,
}

impl MemorySession {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Payloads delivered through `post_message`, in order.
    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }

    pub fn send(&self, message: Value) {
        self.sink.message(message);
    }

    pub fn close(&self, reason: impl Into<String>) {
        self.sink.close(reason);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct MemoryPort {
    session: MemorySession,
    behavior: Behavior,
}

impl AgentPort for MemoryPort {
    fn post_message(&self, payload: Bytes) -> Result<(), ChannelError> {
        if self.session.sink.is_closed() || self.session.is_disconnected() {
            return Err(ChannelError::Closed);
        }
        match &self.behavior {
            Behavior::FailWrites => return Err(ChannelError::Closed),
            Behavior::CloseOnMessage(reason) => {
                self.session.received.lock().push(payload);
                self.session.close(reason.clone());
            }
            _ => self.session.received.lock().push(payload),
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.session.disconnected.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    behavior: Behavior,
    sessions: Arc<Mutex<Vec<MemorySession>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connect attempt fails with `reason`.
    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::Refuse(reason.into()),
            ..Self::default()
        }
    }

    /// Channels open but reject every write.
    pub fn failing_writes() -> Self {
        Self {
            behavior: Behavior::FailWrites,
            ..Self::default()
        }
    }

    /// Channels close with `reason` as soon as the request is delivered, the
    /// way an agent that crashes on startup behaves.
    pub fn closing_on_message(reason: impl Into<String>) -> Self {
        Self {
            behavior: Behavior::CloseOnMessage(reason.into()),
            ..Self::default()
        }
    }

    pub fn sessions(&self) -> Vec<MemorySession> {
        self.sessions.lock().clone()
    }

    pub fn last_session(&self) -> Option<MemorySession> {
        self.sessions.lock().last().cloned()
    }
}

#[async_trait]
impl AgentConnector for MemoryConnector {
    async fn connect(&self, agent: &str) -> Result<AgentChannel, ConnectError> {
        if let Behavior::Refuse(reason) = &self.behavior {
            return Err(ConnectError::Refused(reason.clone()));
        }

        let (sink, events) = EventSink::new();
        let session = MemorySession {
            agent: agent.to_owned(),
            received: Arc::new(Mutex::new(Vec::new())),
            sink,
            disconnected: Arc::new(AtomicBool::new(false)),
        };
        self.sessions.lock().push(session.clone());

        Ok(AgentChannel {
            port: Arc::new(MemoryPort {
                session,
                behavior: self.behavior.clone(),
            }),
            events,
        })
    }
}
