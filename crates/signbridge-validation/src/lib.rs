//! Request validation for the signing relay.
//!
//! Validation runs in two phases. The structural phase walks an arbitrary
//! JSON value and never assumes a field exists. The semantic phase runs on the
//! typed [`SigningRequest`] and only if the structural phase reported nothing.
//! Both phases collect every violation instead of stopping at the first one.

mod semantic;
mod structural;
mod transport;

use serde::Serialize;
use serde_json::Value;
use signbridge_protocol::{PROTOCOL_VERSION, SigningRequest};
use tracing::debug;

pub use semantic::validate_semantics;
pub use structural::validate_structure;
pub use transport::{check_transport, is_loopback_host};

/// Outcome of a validation phase.
///
/// Errors are path-qualified (`items[0].upload.uploadUrl: ...`) and kept in
/// discovery order. Repeats are kept because they describe different paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// All errors joined into one human-readable message.
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Runs both phases and returns the typed request when everything passed.
pub fn validate(raw: &Value) -> Result<SigningRequest, ValidationResult> {
    let structural = validate_structure(raw);
    if !structural.valid {
        debug!(errors = structural.errors.len(), "structural validation failed");
        return Err(structural);
    }

    let request: SigningRequest = serde_json::from_value(raw.clone()).map_err(|error| {
        ValidationResult::from_errors(vec![format!("request: {error}")])
    })?;

    let semantic = validate_semantics(&request);
    if !semantic.valid {
        debug!(errors = semantic.errors.len(), "semantic validation failed");
        return Err(semantic);
    }

    Ok(request)
}

/// Convenience wrapper returning only the combined result.
pub fn check(raw: &Value) -> ValidationResult {
    match validate(raw) {
        Ok(_) => ValidationResult::from_errors(Vec::new()),
        Err(result) => result,
    }
}

/// The declared `protocolVersion` when it is a readable string other than the
/// supported one.
pub fn unsupported_version(raw: &Value) -> Option<&str> {
    raw.get("protocolVersion")
        .and_then(Value::as_str)
        .filter(|version| !version.is_empty() && *version != PROTOCOL_VERSION)
}
