//! The message channel between the relay and a signing agent.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::frame::FrameError;

/// What the relay observes on an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(Value),
    Closed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("invalid agent name '{name}'")]
    InvalidName { name: String },
    #[error("no host manifest registered for '{name}'")]
    NotRegistered { name: String },
    #[error("failed to read host manifest {path:?}: {source}")]
    ManifestRead { path: PathBuf, source: io::Error },
    #[error("host manifest {path:?} is invalid: {source}")]
    ManifestInvalid {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("host '{name}' uses unsupported transport '{kind}' (expected 'stdio')")]
    UnsupportedTransport { name: String, kind: String },
    #[error("failed to launch {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("{0}")]
    Refused(String),
}

/// Sending half of an open channel.
///
/// `post_message` only fails synchronously (closed port, unframeable
/// payload); delivery failures after that surface as a `Closed` event.
pub trait AgentPort: Send + Sync + fmt::Debug {
    fn post_message(&self, payload: Bytes) -> Result<(), ChannelError>;
    fn disconnect(&self);
}

/// An open channel: the port to write to and the event stream to observe.
#[derive(Debug)]
pub struct AgentChannel {
    pub port: Arc<dyn AgentPort>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, agent: &str) -> Result<AgentChannel, ConnectError>;
}

/// Producer side of a channel's event stream that emits `Closed` at most once.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ChannelEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (sink, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn message(&self, message: Value) {
        if !self.is_closed() {
            let _ = self.tx.send(ChannelEvent::Message(message));
        }
    }

    /// Returns `true` if this call was the one that closed the channel.
    pub fn close(&self, reason: impl Into<String>) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.tx.send(ChannelEvent::Closed {
            reason: reason.into(),
        });
        true
    }
}
