//! Signing request model.
//!
//! These types describe a request that already passed the structural checks.
//! Fields whose presence depends on cross-field rules (inline payloads,
//! download URLs, option blocks) stay optional here so the semantic validator
//! can report them instead of the deserializer rejecting the document.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ItemId, RequestId};

/// HTTP headers in caller order.
pub type HeaderMap = IndexMap<String, String>;

/// Kind of content to sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Xml,
    Json,
    Pdf,
    Binary,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Text,
        DataType::Xml,
        DataType::Json,
        DataType::Pdf,
        DataType::Binary,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Xml => "xml",
            Self::Json => "json",
            Self::Pdf => "pdf",
            Self::Binary => "binary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    /// PDF and binary payloads are never carried inline.
    pub fn requires_remote(self) -> bool {
        matches!(self, Self::Pdf | Self::Binary)
    }
}

/// How a group's members deliver their content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentMode {
    Inline,
    Remote,
}

impl ContentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Remote => "remote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(Self::Inline),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }
}

/// Representation the agent uploads after signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignedContentType {
    String,
    Pdf,
    Xml,
    Binary,
}

impl SignedContentType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "string" => Some(Self::String),
            "pdf" => Some(Self::Pdf),
            "xml" => Some(Self::Xml),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }

    /// `Content-Type` the agent sends with the upload.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::String => "text/plain",
            Self::Pdf => "application/pdf",
            Self::Xml => "application/xml",
            Self::Binary => "application/octet-stream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertSelector {
    pub cert_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfOptions {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlOptions {
    pub xpath: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_attribute: Option<String>,
}

/// Content of a single item, discriminated by `mode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ContentDefinition {
    Inline {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Remote {
        #[serde(
            rename = "downloadUrl",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        download_url: Option<String>,
        #[serde(rename = "httpMethod", default, skip_serializing_if = "Option::is_none")]
        http_method: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HeaderMap>,
    },
}

impl ContentDefinition {
    pub fn mode(&self) -> ContentMode {
        match self {
            Self::Inline { .. } => ContentMode::Inline,
            Self::Remote { .. } => ContentMode::Remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadConfig {
    pub upload_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
    pub signed_content_type: SignedContentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackConfig {
    pub on_success: String,
    pub on_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,
}

/// A standalone signable object from the top-level `items` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignableItem {
    pub id: ItemId,
    pub data_type: DataType,
    pub content: ContentDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_options: Option<PdfOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_options: Option<XmlOptions>,
    pub upload: UploadConfig,
    pub callbacks: CallbackConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// One member of an [`ItemGroup`]. Remote members only carry an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MemberContent>,
}

/// A batch of members sharing download/upload/callback configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemGroup {
    pub data_type: DataType,
    pub mode: ContentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_headers: Option<HeaderMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_options: Option<PdfOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xml_options: Option<XmlOptions>,
    pub callbacks: CallbackConfig,
    pub upload: UploadConfig,
    pub items: Vec<GroupMember>,
}

/// A signing request as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    pub protocol_version: String,
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub app_id: String,
    pub cert: CertSelector,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<SignableItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_groups: Option<Vec<ItemGroup>>,
}

/// Borrowed view of whichever payload array the request carries.
#[derive(Debug, Clone, Copy)]
pub enum RequestPayload<'a> {
    Items(&'a [SignableItem]),
    Groups(&'a [ItemGroup]),
}

impl SigningRequest {
    /// Returns `None` only for requests that never passed validation.
    pub fn payload(&self) -> Option<RequestPayload<'_>> {
        match (&self.items, &self.item_groups) {
            (Some(items), None) => Some(RequestPayload::Items(items)),
            (None, Some(groups)) => Some(RequestPayload::Groups(groups)),
            _ => None,
        }
    }

    /// Number of objects the agent will process.
    pub fn object_count(&self) -> usize {
        match self.payload() {
            Some(RequestPayload::Items(items)) => items.len(),
            Some(RequestPayload::Groups(groups)) => groups.iter().map(|g| g.items.len()).sum(),
            None => 0,
        }
    }
}
