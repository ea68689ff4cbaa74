//! Synchronous acknowledgment returned to the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;
use crate::ids::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Accepted,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    pub code: ErrorCode,
    pub message: String,
}

/// The one answer a caller gets per request.
///
/// `accepted` only means the agent took the request; signing outcomes arrive
/// later through the caller's callback endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgmentEnvelope {
    pub protocol_version: String,
    pub request_id: RequestId,
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<AckError>>,
    pub metadata: Value,
}

impl AcknowledgmentEnvelope {
    pub fn is_accepted(&self) -> bool {
        self.status == AckStatus::Accepted
    }

    /// Code of the first error, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|error| error.code)
    }
}
