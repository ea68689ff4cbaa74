use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use signbridge_protocol::{BridgeError, DEFAULT_AGENT_NAME, RequestId};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::channel::{AgentConnector, AgentPort, ChannelError, ChannelEvent, ConnectError};
use crate::registry::{ChannelInfo, ChannelRegistry, RegistrationToken};

/// How long an agent has to fail before a request counts as accepted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(150);

const EVENTS_DROPPED_REASON: &str = "agent channel dropped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Init,
    Connecting,
    ConnectFailed,
    Connected,
    GraceWait,
    AckSent,
    Closed,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::ConnectFailed => "connect_failed",
            Self::Connected => "connected",
            Self::GraceWait => "grace_wait",
            Self::AckSent => "ack_sent",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to connect to signing agent '{agent}': {source}")]
    Connect {
        agent: String,
        #[source]
        source: ConnectError,
    },
    #[error("failed to deliver request to signing agent: {0}")]
    Write(#[source] ChannelError),
    #[error("signing agent closed the channel: {reason}")]
    ClosedEarly { reason: String },
}

impl From<DispatchError> for BridgeError {
    fn from(error: DispatchError) -> Self {
        BridgeError::Internal(error.to_string())
    }
}

/// Delivers validated requests to the signing agent.
///
/// Each dispatch opens its own channel, writes the request once and then
/// waits out a short grace period. A close before the period ends is a
/// failure; otherwise the request is accepted and the channel is left to the
/// agent. Every terminal path removes the registry entry.
#[derive(Clone)]
pub struct Dispatcher {
    connector: Arc<dyn AgentConnector>,
    registry: ChannelRegistry,
    agent: String,
    grace_period: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("agent", &self.agent)
            .field("grace_period", &self.grace_period)
            .field("in_flight", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(connector: Arc<dyn AgentConnector>) -> Self {
        Self {
            connector,
            registry: ChannelRegistry::new(),
            agent: DEFAULT_AGENT_NAME.to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_registry(mut self, registry: ChannelRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.registry.snapshot()
    }

    /// Sends `payload` to the agent and resolves exactly once.
    #[instrument(
        skip_all,
        fields(request_id = %request_id, agent = %self.agent, bytes = payload.len())
    )]
    pub async fn dispatch(&self, request_id: &RequestId, payload: Bytes) -> Result<(), DispatchError> {
        let mut state = DispatchState::Init;
        advance(&mut state, DispatchState::Connecting);

        let channel = match self.connector.connect(&self.agent).await {
            Ok(channel) => channel,
            Err(source) => {
                advance(&mut state, DispatchState::ConnectFailed);
                warn!(error = %source, "agent connect failed");
                return Err(DispatchError::Connect {
                    agent: self.agent.clone(),
                    source,
                });
            }
        };
        advance(&mut state, DispatchState::Connected);

        let port = channel.port;
        let mut events = channel.events;
        let registration = Registration::new(&self.registry, request_id, &self.agent, port.clone());

        if let Err(error) = port.post_message(payload) {
            warn!(%error, "request write failed");
            registration.release();
            advance(&mut state, DispatchState::Closed);
            return Err(DispatchError::Write(error));
        }

        advance(&mut state, DispatchState::GraceWait);
        let grace = tokio::time::sleep(self.grace_period);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                // A close already queued when the timer fires still wins.
                biased;
                event = events.recv() => match event {
                    Some(ChannelEvent::Message(message)) => {
                        debug!(%message, "agent message during grace period");
                    }
                    Some(ChannelEvent::Closed { reason }) => {
                        return Err(closed_early(&mut state, registration, reason));
                    }
                    None => {
                        return Err(closed_early(
                            &mut state,
                            registration,
                            EVENTS_DROPPED_REASON.to_owned(),
                        ));
                    }
                },
                () = &mut grace => break,
            }
        }

        advance(&mut state, DispatchState::AckSent);
        info!("request accepted by agent");
        let token = registration.hand_off();
        tokio::spawn(watch_after_accept(
            request_id.clone(),
            events,
            self.registry.clone(),
            token,
        ));
        Ok(())
    }
}

/// A registry entry owned by an unresolved dispatch.
///
/// Dropping it before [`Registration::hand_off`] disconnects the agent and
/// removes the entry, so a dispatch future cancelled mid-wait cannot leak
/// its channel.
struct Registration {
    registry: ChannelRegistry,
    token: RegistrationToken,
    port: Arc<dyn AgentPort>,
    armed: bool,
}

impl Registration {
    fn new(
        registry: &ChannelRegistry,
        request_id: &RequestId,
        agent: &str,
        port: Arc<dyn AgentPort>,
    ) -> Self {
        let token = registry.register(request_id.clone(), agent, port.clone());
        Self {
            registry: registry.clone(),
            token,
            port,
            armed: true,
        }
    }

    fn release(self) {
        drop(self);
    }

    /// Passes ownership of the entry to the post-accept watcher.
    fn hand_off(mut self) -> RegistrationToken {
        self.armed = false;
        self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.port.disconnect();
        if self.registry.deregister(self.token) {
            debug!(token = ?self.token, "registry entry removed");
        }
    }
}

fn closed_early(state: &mut DispatchState, registration: Registration, reason: String) -> DispatchError {
    warn!(%reason, "agent closed during grace period");
    registration.release();
    advance(state, DispatchState::AckSent);
    advance(state, DispatchState::Closed);
    DispatchError::ClosedEarly { reason }
}

fn advance(state: &mut DispatchState, next: DispatchState) {
    debug!(from = %state, to = %next, "dispatch state");
    *state = next;
}

/// Observes an accepted channel until it closes. Nothing here reaches the
/// caller; the acknowledgment has already been sent.
#[instrument(skip_all, fields(request_id = %request_id))]
async fn watch_after_accept(
    request_id: RequestId,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
    registry: ChannelRegistry,
    token: RegistrationToken,
) {
    let reason = loop {
        match events.recv().await {
            Some(ChannelEvent::Message(message)) => debug!(%message, "agent message"),
            Some(ChannelEvent::Closed { reason }) => break reason,
            None => break EVENTS_DROPPED_REASON.to_owned(),
        }
    };
    registry.deregister(token);
    info!(%reason, "agent channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use serde_json::json;
    use signbridge_protocol::ErrorCode;

    fn dispatcher(connector: &MemoryConnector) -> Dispatcher {
        Dispatcher::new(Arc::new(connector.clone()))
    }

    fn payload() -> Bytes {
        Bytes::from_static(br#"{"requestId":"req-1"}"#)
    }

    /// Lets spawned tasks drain their queues without moving the paused clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_agent_is_accepted_after_grace_period() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);
        let started = tokio::time::Instant::now();

        dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap();

        assert!(started.elapsed() >= DEFAULT_GRACE_PERIOD);
        let session = connector.last_session().unwrap();
        assert_eq!(session.agent(), DEFAULT_AGENT_NAME);
        assert_eq!(session.received(), vec![payload()]);
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(dispatcher.registry().contains(&RequestId::from("req-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn agent_messages_during_grace_do_not_resolve_early() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&RequestId::from("req-1"), payload())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        connector
            .last_session()
            .unwrap()
            .send(json!({ "status": "started" }));

        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn close_inside_grace_period_is_an_internal_error() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&RequestId::from("req-1"), payload())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let session = connector.last_session().unwrap();
        session.close("Native host has exited.");

        let error = task.await.unwrap().unwrap_err();
        assert!(matches!(&error, DispatchError::ClosedEarly { reason } if reason == "Native host has exited."));
        let bridge = BridgeError::from(error);
        assert_eq!(bridge.code(), ErrorCode::InternalError);
        assert!(bridge.to_string().contains("Native host has exited."));
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(session.is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_exit_is_reported_with_its_reason() {
        let connector = MemoryConnector::closing_on_message("agent crashed");
        let dispatcher = dispatcher(&connector);

        let error = dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("agent crashed"));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_grace_period_only_deregisters() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap();
        assert_eq!(dispatcher.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        connector.last_session().unwrap().close("finished");
        settle().await;

        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_queued_at_the_deadline_wins_over_the_timer() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(&RequestId::from("req-1"), payload())
                    .await
            })
        };
        settle().await;
        let session = connector.last_session().unwrap();
        // Queue the close first, then move the clock past the deadline before
        // the dispatcher runs again.
        session.close("late crash");
        tokio::time::advance(DEFAULT_GRACE_PERIOD).await;

        assert!(matches!(
            task.await.unwrap(),
            Err(DispatchError::ClosedEarly { .. })
        ));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_dispatch_disconnects_and_deregisters() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.dispatch(&RequestId::from("req-1"), payload()),
        )
        .await;
        assert!(outcome.is_err());

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(dispatcher.in_flight(), 0);
        assert!(connector.last_session().unwrap().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_dispatch_keeps_its_channel_connected() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap();
        settle().await;
        assert_eq!(dispatcher.in_flight(), 1);
        assert!(!connector.last_session().unwrap().is_disconnected());
    }

    #[tokio::test]
    async fn connect_failure_never_registers() {
        let connector = MemoryConnector::refusing("Specified native messaging host not found.");
        let dispatcher = dispatcher(&connector);

        let error = dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::Connect { .. }));
        assert!(error.to_string().contains("native messaging host not found"));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn write_failure_disconnects_and_deregisters() {
        let connector = MemoryConnector::failing_writes();
        let dispatcher = dispatcher(&connector);

        let error = dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::Write(_)));
        assert!(dispatcher.registry().is_empty());
        assert!(connector.last_session().unwrap().is_disconnected());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_get_independent_channels() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector);

        let req1 = RequestId::from("req-1");
        let req2 = RequestId::from("req-2");
        let (first, second) = tokio::join!(
            dispatcher.dispatch(&req1, payload()),
            dispatcher.dispatch(&req2, payload()),
        );
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(connector.sessions().len(), 2);
        assert_eq!(dispatcher.in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_agent_and_grace_period_are_honoured() {
        let connector = MemoryConnector::new();
        let dispatcher = dispatcher(&connector)
            .with_agent("org.example.signer")
            .with_grace_period(Duration::from_millis(10));
        let started = tokio::time::Instant::now();

        dispatcher
            .dispatch(&RequestId::from("req-1"), payload())
            .await
            .unwrap();
        assert!(started.elapsed() < DEFAULT_GRACE_PERIOD);
        assert_eq!(connector.last_session().unwrap().agent(), "org.example.signer");
    }
}
