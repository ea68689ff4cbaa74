//! Pure builders for acknowledgment envelopes.

use serde_json::{Map, Value};

use crate::PROTOCOL_VERSION;
use crate::ack::{AckError, AckStatus, AcknowledgmentEnvelope};
use crate::error::ErrorCode;
use crate::ids::RequestId;
use crate::request::SigningRequest;

/// Builds an error envelope from whatever is readable in `context`.
///
/// `context` may be absent (unparseable body) or any JSON shape. Only
/// non-empty string `protocolVersion`/`requestId` and an object `metadata`
/// are echoed; everything else falls back to defaults.
pub fn error_ack(
    context: Option<&Value>,
    code: ErrorCode,
    message: impl Into<String>,
) -> AcknowledgmentEnvelope {
    let object = context.and_then(Value::as_object);

    let protocol_version = object
        .and_then(|o| non_empty_str(o, "protocolVersion"))
        .unwrap_or(PROTOCOL_VERSION)
        .to_owned();
    let request_id = object
        .and_then(|o| non_empty_str(o, "requestId"))
        .map(RequestId::from)
        .unwrap_or_else(RequestId::unknown);
    let metadata = object
        .and_then(|o| o.get("metadata"))
        .filter(|value| value.is_object())
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    AcknowledgmentEnvelope {
        protocol_version,
        request_id,
        status: AckStatus::Error,
        errors: Some(vec![AckError {
            code,
            message: message.into(),
        }]),
        metadata,
    }
}

/// Builds the `accepted` envelope for a request that was handed to the agent.
pub fn accepted_ack(request: &SigningRequest) -> AcknowledgmentEnvelope {
    AcknowledgmentEnvelope {
        protocol_version: request.protocol_version.clone(),
        request_id: request.request_id.clone(),
        status: AckStatus::Accepted,
        errors: None,
        metadata: Value::Object(request.metadata.clone()),
    }
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_ack_without_context_uses_defaults() {
        let ack = error_ack(None, ErrorCode::BadRequest, "request body is not valid JSON");
        assert_eq!(ack.protocol_version, "1.0");
        assert_eq!(ack.request_id.as_str(), "unknown");
        assert_eq!(ack.status, AckStatus::Error);
        assert_eq!(ack.metadata, json!({}));
        assert_eq!(ack.error_code(), Some(ErrorCode::BadRequest));
    }

    #[test]
    fn error_ack_echoes_partial_context() {
        let context = json!({
            "requestId": "req-42",
            "metadata": { "tenant": "acme" },
            "protocolVersion": 7
        });
        let ack = error_ack(Some(&context), ErrorCode::InternalError, "agent exited");
        assert_eq!(ack.request_id.as_str(), "req-42");
        assert_eq!(ack.protocol_version, "1.0");
        assert_eq!(ack.metadata, json!({ "tenant": "acme" }));
    }

    #[test]
    fn error_ack_ignores_non_object_metadata_and_empty_id() {
        let context = json!({ "requestId": "", "metadata": [1, 2] });
        let ack = error_ack(Some(&context), ErrorCode::BadRequest, "x");
        assert_eq!(ack.request_id.as_str(), "unknown");
        assert_eq!(ack.metadata, json!({}));
    }

    #[test]
    fn envelope_omits_errors_when_accepted() {
        let request: SigningRequest = serde_json::from_value(json!({
            "protocolVersion": "1.0",
            "requestId": "req-1",
            "appId": "app",
            "cert": { "certId": "c" },
            "metadata": { "orderId": 9 },
            "items": []
        }))
        .unwrap();
        let ack = accepted_ack(&request);
        let rendered = serde_json::to_value(&ack).unwrap();
        assert_eq!(
            rendered,
            json!({
                "protocolVersion": "1.0",
                "requestId": "req-1",
                "status": "accepted",
                "metadata": { "orderId": 9 }
            })
        );
    }
}
