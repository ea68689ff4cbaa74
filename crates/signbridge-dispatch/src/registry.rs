use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use signbridge_protocol::RequestId;

use crate::channel::AgentPort;

/// Identifies one registration. Two concurrent requests may share a
/// `requestId`; each still owns its own entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub request_id: RequestId,
    pub agent: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    info: ChannelInfo,
    port: Arc<dyn AgentPort>,
}

#[derive(Debug, Default)]
struct Inner {
    next_token: u64,
    entries: IndexMap<RegistrationToken, Entry>,
}

/// Open channels by request, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        request_id: RequestId,
        agent: impl Into<String>,
        port: Arc<dyn AgentPort>,
    ) -> RegistrationToken {
        let mut inner = self.inner.lock();
        inner.next_token += 1;
        let token = RegistrationToken(inner.next_token);
        inner.entries.insert(
            token,
            Entry {
                info: ChannelInfo {
                    request_id,
                    agent: agent.into(),
                    opened_at: Utc::now(),
                },
                port,
            },
        );
        token
    }

    /// Removes the entry; `false` if it was already gone.
    pub fn deregister(&self, token: RegistrationToken) -> bool {
        self.inner.lock().entries.shift_remove(&token).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.inner
            .lock()
            .entries
            .values()
            .any(|entry| entry.info.request_id == *request_id)
    }

    pub fn snapshot(&self) -> Vec<ChannelInfo> {
        self.inner
            .lock()
            .entries
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Disconnects and forgets every open channel. Used on shutdown.
    pub fn disconnect_all(&self) -> usize {
        let entries: Vec<Entry> = self
            .inner
            .lock()
            .entries
            .drain(..)
            .map(|(_, entry)| entry)
            .collect();
        for entry in &entries {
            entry.port.disconnect();
        }
        entries.len()
    }
}
