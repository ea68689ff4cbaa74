//! # signbridge-protocol — SignBridge wire contract
//!
//! Shared types for the signing relay: the inbound [`SigningRequest`], the
//! synchronous [`AcknowledgmentEnvelope`], and the request-level error
//! taxonomy. This crate does no I/O and carries no runtime dependencies so
//! the validator, the dispatcher and the agent side can all build on it.
//!
//! ## Module Overview
//!
//! - [`ids`] — Typed ID wrappers (RequestId, ItemId)
//! - [`request`] — SigningRequest, SignableItem, ItemGroup, content shapes
//! - [`ack`] — AcknowledgmentEnvelope, AckStatus, AckError
//! - [`response`] — Pure builders for accepted/error envelopes
//! - [`resolve`] — `<objectId>` placeholder substitution contract
//! - [`error`] — ErrorCode, BridgeError

pub mod ack;
pub mod error;
pub mod ids;
pub mod request;
pub mod resolve;
pub mod response;

/// The single protocol version this relay accepts.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Literal token substituted with a member id to derive a concrete URL.
pub const OBJECT_ID_PLACEHOLDER: &str = "<objectId>";

/// `requestId` echoed when the inbound request could not be read at all.
pub const UNKNOWN_REQUEST_ID: &str = "unknown";

/// Name under which the signing agent registers its host manifest.
pub const DEFAULT_AGENT_NAME: &str = "com.ase.signer";

/// Upper bound for a single inline payload.
pub const MAX_INLINE_CONTENT_BYTES: usize = 1024 * 1024;

pub use ack::{AckError, AckStatus, AcknowledgmentEnvelope};
pub use error::{BridgeError, BridgeResult, ErrorCode};
pub use ids::{ItemId, RequestId};
pub use request::{
    CallbackConfig, CertSelector, ContentDefinition, ContentMode, DataType, GroupMember,
    HeaderMap, ItemGroup, MemberContent, PdfOptions, RequestPayload, SignableItem,
    SignedContentType, SigningRequest, UploadConfig, XmlOptions,
};
pub use resolve::{ResolvedItem, ResolvedSource, ResolvedUpload, resolve_items, substitute_object_id};
pub use response::{accepted_ack, error_ack};
