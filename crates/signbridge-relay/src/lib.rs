//! # signbridge-relay — the request path
//!
//! `SignRelay` takes the caller origin and the raw request body and produces
//! exactly one [`AcknowledgmentEnvelope`]: origin gate, structural and
//! semantic validation, then dispatch to the signing agent.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;
use signbridge_dispatch::{
    AgentConnector, ChannelInfo, DEFAULT_GRACE_PERIOD, Dispatcher, HostRegistry, ProcessConnector,
};
use signbridge_policy::{FileOriginAllowlist, OriginPolicy};
use signbridge_protocol::{
    AcknowledgmentEnvelope, BridgeError, DEFAULT_AGENT_NAME, accepted_ack, error_ack,
};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub agent_name: String,
    pub grace_period: Duration,
    pub allowlist_path: PathBuf,
    pub manifest_dir: PathBuf,
}

impl RelayConfig {
    /// Defaults rooted at `root`: `allowlist.json` and a `hosts/` manifest dir.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            agent_name: DEFAULT_AGENT_NAME.to_owned(),
            grace_period: DEFAULT_GRACE_PERIOD,
            allowlist_path: root.join("allowlist.json"),
            manifest_dir: root.join("hosts"),
        }
    }
}

/// How a request ended, for transports that map outcomes to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Accepted,
    OriginRejected,
    Invalid,
    DispatchFailed,
}

#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub disposition: Disposition,
    pub ack: AcknowledgmentEnvelope,
}

impl RelayResponse {
    fn rejected(disposition: Disposition, context: Option<&Value>, error: BridgeError) -> Self {
        Self {
            disposition,
            ack: error_ack(context, error.code(), error.to_string()),
        }
    }
}

pub struct RelayBuilder {
    config: RelayConfig,
    connector: Option<Arc<dyn AgentConnector>>,
    origins: Option<Arc<dyn OriginPolicy>>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            connector: None,
            origins: None,
        }
    }

    pub fn connector(mut self, connector: Arc<dyn AgentConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn origin_policy(mut self, origins: Arc<dyn OriginPolicy>) -> Self {
        self.origins = Some(origins);
        self
    }

    pub fn build(self) -> SignRelay {
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(ProcessConnector::new(HostRegistry::new(
                self.config.manifest_dir.clone(),
            )))
        });
        let origins = self.origins.unwrap_or_else(|| {
            Arc::new(FileOriginAllowlist::new(self.config.allowlist_path.clone()))
        });
        let dispatcher = Dispatcher::new(connector)
            .with_agent(self.config.agent_name.clone())
            .with_grace_period(self.config.grace_period);

        SignRelay {
            config: self.config,
            origins,
            dispatcher,
        }
    }
}

#[derive(Clone)]
pub struct SignRelay {
    config: RelayConfig,
    origins: Arc<dyn OriginPolicy>,
    dispatcher: Dispatcher,
}

impl SignRelay {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.dispatcher.channels()
    }

    /// Disconnects every open agent channel.
    pub fn shutdown(&self) -> usize {
        self.dispatcher.registry().disconnect_all()
    }

    /// Runs one request through the gate, the validators and the dispatcher.
    ///
    /// `body` is forwarded to the agent byte for byte once it validates.
    #[instrument(skip_all, fields(origin = origin.unwrap_or(""), bytes = body.len()))]
    pub async fn handle(&self, origin: Option<&str>, body: Bytes) -> RelayResponse {
        let parsed: Option<Value> = serde_json::from_slice(&body).ok();

        let origin = origin.unwrap_or_default();
        if !self.origins.is_allowed(origin).await {
            warn!("origin rejected");
            return RelayResponse::rejected(
                Disposition::OriginRejected,
                parsed.as_ref(),
                BridgeError::BadRequest(format!("origin '{origin}' is not allowed")),
            );
        }

        let Some(raw) = parsed else {
            warn!("request body is not valid JSON");
            return RelayResponse::rejected(
                Disposition::Invalid,
                None,
                BridgeError::BadRequest("request: body is not valid JSON".to_owned()),
            );
        };

        let request = match signbridge_validation::validate(&raw) {
            Ok(request) => request,
            Err(result) => {
                let error = match signbridge_validation::unsupported_version(&raw) {
                    Some(version) => BridgeError::UnsupportedVersion(version.to_owned()),
                    None => BridgeError::BadRequest(result.message()),
                };
                warn!(code = %error.code(), errors = result.errors.len(), "request rejected");
                return RelayResponse::rejected(Disposition::Invalid, Some(&raw), error);
            }
        };

        match self.dispatcher.dispatch(&request.request_id, body).await {
            Ok(()) => {
                info!(request_id = %request.request_id, objects = request.object_count(), "request accepted");
                RelayResponse {
                    disposition: Disposition::Accepted,
                    ack: accepted_ack(&request),
                }
            }
            Err(error) => {
                RelayResponse::rejected(Disposition::DispatchFailed, Some(&raw), error.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use signbridge_dispatch::MemoryConnector;
    use signbridge_policy::StaticOriginAllowlist;
    use signbridge_protocol::{AckStatus, ErrorCode};

    const ORIGIN: &str = "https://app.example.com";

    fn relay(connector: &MemoryConnector) -> SignRelay {
        RelayBuilder::new(RelayConfig::new(std::env::temp_dir().join("signbridge-relay-tests")))
            .connector(Arc::new(connector.clone()))
            .origin_policy(Arc::new(StaticOriginAllowlist::new([ORIGIN])))
            .build()
    }

    fn single_pdf_request() -> Value {
        json!({
            "protocolVersion": "1.0",
            "requestId": "req-2024-0001",
            "appId": "contracts-portal",
            "cert": { "certId": "signing-cert-01" },
            "metadata": { "orderId": 77 },
            "items": [{
                "id": "contract-77",
                "dataType": "pdf",
                "content": {
                    "mode": "remote",
                    "downloadUrl": "https://files.example.com/contracts/<objectId>.pdf"
                },
                "pdfOptions": { "label": "Approved by ACME" },
                "upload": {
                    "uploadUrl": "https://files.example.com/signed/<objectId>",
                    "signedContentType": "pdf"
                },
                "callbacks": {
                    "onSuccess": "https://app.example.com/callbacks/success",
                    "onError": "https://app.example.com/callbacks/error"
                }
            }]
        })
    }

    fn body(value: &Value) -> Bytes {
        Bytes::from(serde_json::to_vec(value).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn documented_example_is_accepted_and_forwarded_unchanged() {
        let connector = MemoryConnector::new();
        let relay = relay(&connector);
        let payload = body(&single_pdf_request());

        let response = relay.handle(Some(ORIGIN), payload.clone()).await;

        assert_eq!(response.disposition, Disposition::Accepted);
        assert_eq!(response.ack.status, AckStatus::Accepted);
        assert_eq!(response.ack.request_id.as_str(), "req-2024-0001");
        assert_eq!(response.ack.metadata, json!({ "orderId": 77 }));
        assert!(response.ack.errors.is_none());
        assert_eq!(connector.last_session().unwrap().received(), vec![payload]);
        assert_eq!(relay.in_flight(), 1);
    }

    #[tokio::test]
    async fn insecure_callback_is_rejected_before_dispatch() {
        let connector = MemoryConnector::new();
        let relay = relay(&connector);
        let mut raw = single_pdf_request();
        raw["items"][0]["callbacks"]["onSuccess"] = json!("http://app.example.com/callbacks/success");

        let response = relay.handle(Some(ORIGIN), body(&raw)).await;

        assert_eq!(response.disposition, Disposition::Invalid);
        assert_eq!(response.ack.error_code(), Some(ErrorCode::BadRequest));
        assert_eq!(response.ack.request_id.as_str(), "req-2024-0001");
        let errors = response.ack.errors.unwrap();
        assert!(errors[0].message.contains("items[0].callbacks.onSuccess"));
        assert!(errors[0].message.contains("https"));
        assert!(connector.sessions().is_empty());
    }

    #[tokio::test]
    async fn unknown_origin_is_a_bad_request() {
        let connector = MemoryConnector::new();
        let relay = relay(&connector);

        let response = relay
            .handle(Some("https://evil.example.com"), body(&single_pdf_request()))
            .await;
        assert_eq!(response.disposition, Disposition::OriginRejected);
        assert_eq!(response.ack.error_code(), Some(ErrorCode::BadRequest));
        assert_eq!(response.ack.request_id.as_str(), "req-2024-0001");

        let response = relay.handle(None, body(&single_pdf_request())).await;
        assert_eq!(response.disposition, Disposition::OriginRejected);
        assert!(connector.sessions().is_empty());
    }

    #[tokio::test]
    async fn unparseable_body_gets_default_envelope() {
        let relay = relay(&MemoryConnector::new());
        let response = relay
            .handle(Some(ORIGIN), Bytes::from_static(b"{ not json"))
            .await;

        assert_eq!(response.disposition, Disposition::Invalid);
        assert_eq!(response.ack.protocol_version, "1.0");
        assert_eq!(response.ack.request_id.as_str(), "unknown");
        assert_eq!(response.ack.metadata, json!({}));
        assert_eq!(response.ack.error_code(), Some(ErrorCode::BadRequest));
    }

    #[tokio::test]
    async fn unsupported_version_has_its_own_code() {
        let relay = relay(&MemoryConnector::new());
        let mut raw = single_pdf_request();
        raw["protocolVersion"] = json!("2.0");

        let response = relay.handle(Some(ORIGIN), body(&raw)).await;
        assert_eq!(response.ack.error_code(), Some(ErrorCode::UnsupportedVersion));
        assert_eq!(response.ack.protocol_version, "2.0");
    }

    #[tokio::test]
    async fn schema_errors_are_joined_into_one_message() {
        let relay = relay(&MemoryConnector::new());
        let mut raw = single_pdf_request();
        raw.as_object_mut().unwrap().remove("appId");
        raw["cert"] = json!({});

        let response = relay.handle(Some(ORIGIN), body(&raw)).await;
        let errors = response.ack.errors.unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("appId"));
        assert!(errors[0].message.contains("; "));
    }

    #[tokio::test]
    async fn missing_agent_is_an_internal_error() {
        let relay = relay(&MemoryConnector::refusing(
            "Specified native messaging host not found.",
        ));
        let response = relay.handle(Some(ORIGIN), body(&single_pdf_request())).await;

        assert_eq!(response.disposition, Disposition::DispatchFailed);
        assert_eq!(response.ack.error_code(), Some(ErrorCode::InternalError));
        assert_eq!(response.ack.request_id.as_str(), "req-2024-0001");
        assert_eq!(relay.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn agent_exit_during_grace_is_an_internal_error() {
        let connector = MemoryConnector::closing_on_message("Native host has exited.");
        let relay = relay(&connector);

        let response = relay.handle(Some(ORIGIN), body(&single_pdf_request())).await;
        assert_eq!(response.ack.error_code(), Some(ErrorCode::InternalError));
        assert!(
            response.ack.errors.unwrap()[0]
                .message
                .contains("Native host has exited.")
        );
        assert!(relay.channels().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_disconnects_open_channels() {
        let connector = MemoryConnector::new();
        let relay = relay(&connector);
        relay.handle(Some(ORIGIN), body(&single_pdf_request())).await;

        assert_eq!(relay.shutdown(), 1);
        assert!(connector.last_session().unwrap().is_disconnected());
    }
}
