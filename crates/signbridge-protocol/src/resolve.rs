//! Placeholder resolution contract.
//!
//! The relay never downloads or uploads anything itself. These helpers pin down
//! how the agent derives concrete per-object URLs so both sides agree: every
//! `<objectId>` occurrence is replaced by the member id with plain substring
//! substitution. Ids are unique within a validated request, so resolved URLs
//! never collide inside a group.

use serde::Serialize;

use crate::OBJECT_ID_PLACEHOLDER;
use crate::ids::ItemId;
use crate::request::{
    CallbackConfig, ContentDefinition, ContentMode, DataType, HeaderMap, ItemGroup,
    RequestPayload, SignableItem, SignedContentType, SigningRequest, XmlOptions,
};

const DEFAULT_DOWNLOAD_METHOD: &str = "GET";
const DEFAULT_UPLOAD_METHOD: &str = "POST";

pub fn substitute_object_id(template: &str, object_id: &str) -> String {
    template.replace(OBJECT_ID_PLACEHOLDER, object_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ResolvedSource {
    Inline {
        content: String,
    },
    Remote {
        url: String,
        method: String,
        headers: HeaderMap,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedUpload {
    pub url: String,
    pub method: String,
    pub headers: HeaderMap,
    pub signed_content_type: SignedContentType,
}

/// One object as the agent will process it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedItem {
    pub id: ItemId,
    pub data_type: DataType,
    pub source: ResolvedSource,
    pub upload: ResolvedUpload,
    pub callbacks: CallbackConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_options: Option<XmlOptions>,
}

/// Flattens items or groups into the ordered list of objects to process.
///
/// Expects a validated request; missing optional payloads resolve to empty
/// strings rather than failing.
pub fn resolve_items(request: &SigningRequest) -> Vec<ResolvedItem> {
    match request.payload() {
        Some(RequestPayload::Items(items)) => items.iter().map(resolve_item).collect(),
        Some(RequestPayload::Groups(groups)) => groups.iter().flat_map(resolve_group).collect(),
        None => Vec::new(),
    }
}

fn resolve_item(item: &SignableItem) -> ResolvedItem {
    let source = match &item.content {
        ContentDefinition::Inline { content, .. } => ResolvedSource::Inline {
            content: content.clone().unwrap_or_default(),
        },
        // A single item's downloadUrl already names one object.
        ContentDefinition::Remote {
            download_url,
            http_method,
            headers,
        } => ResolvedSource::Remote {
            url: download_url.clone().unwrap_or_default(),
            method: http_method
                .clone()
                .unwrap_or_else(|| DEFAULT_DOWNLOAD_METHOD.to_owned()),
            headers: headers.clone().unwrap_or_default(),
        },
    };

    ResolvedItem {
        id: item.id.clone(),
        data_type: item.data_type,
        source,
        upload: ResolvedUpload {
            url: substitute_object_id(&item.upload.upload_url, item.id.as_str()),
            method: upload_method(item.upload.http_method.as_deref()),
            headers: item.upload.headers.clone().unwrap_or_default(),
            signed_content_type: item.upload.signed_content_type,
        },
        callbacks: item.callbacks.clone(),
        pdf_label: item.pdf_options.as_ref().map(|o| o.label.clone()),
        xml_options: item.xml_options.clone(),
    }
}

fn resolve_group(group: &ItemGroup) -> impl Iterator<Item = ResolvedItem> + '_ {
    group.items.iter().map(move |member| {
        let id = member.id.as_str();
        let source = match &group.download_url {
            Some(template) if group.mode == ContentMode::Remote => {
                ResolvedSource::Remote {
                    url: substitute_object_id(template, id),
                    method: DEFAULT_DOWNLOAD_METHOD.to_owned(),
                    headers: group.download_headers.clone().unwrap_or_default(),
                }
            }
            _ => ResolvedSource::Inline {
                content: member
                    .content
                    .as_ref()
                    .and_then(|c| c.value.clone())
                    .unwrap_or_default(),
            },
        };

        ResolvedItem {
            id: member.id.clone(),
            data_type: group.data_type,
            source,
            upload: ResolvedUpload {
                url: substitute_object_id(&group.upload.upload_url, id),
                method: upload_method(group.upload.http_method.as_deref()),
                headers: group.upload.headers.clone().unwrap_or_default(),
                signed_content_type: group.upload.signed_content_type,
            },
            callbacks: group.callbacks.clone(),
            pdf_label: group.pdf_options.as_ref().map(|o| o.label.clone()),
            xml_options: group.xml_options.clone(),
        }
    })
}

fn upload_method(method: Option<&str>) -> String {
    method.unwrap_or(DEFAULT_UPLOAD_METHOD).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitution_replaces_every_occurrence() {
        assert_eq!(
            substitute_object_id("https://x/<objectId>/v?id=<objectId>", "7"),
            "https://x/7/v?id=7"
        );
    }

    #[test]
    fn groups_resolve_per_member_urls() {
        let request: SigningRequest = serde_json::from_value(json!({
            "protocolVersion": "1.0",
            "requestId": "req-1",
            "appId": "app",
            "cert": { "certId": "c" },
            "itemGroups": [{
                "dataType": "pdf",
                "mode": "remote",
                "downloadUrl": "https://files.example/docs/<objectId>",
                "downloadHeaders": { "X-Tenant": "acme" },
                "pdfOptions": { "label": "Approved" },
                "callbacks": { "onSuccess": "https://cb.example/ok", "onError": "https://cb.example/err" },
                "upload": { "uploadUrl": "https://up.example/<objectId>/signed", "httpMethod": "PUT", "signedContentType": "pdf" },
                "items": [{ "id": "a" }, { "id": "b" }]
            }]
        }))
        .unwrap();

        let resolved = resolve_items(&request);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[1].id.as_str(), "b");
        assert_eq!(resolved[1].upload.url, "https://up.example/b/signed");
        assert_eq!(resolved[1].upload.method, "PUT");
        assert_eq!(resolved[1].pdf_label.as_deref(), Some("Approved"));
        match &resolved[0].source {
            ResolvedSource::Remote { url, method, headers } => {
                assert_eq!(url, "https://files.example/docs/a");
                assert_eq!(method, "GET");
                assert_eq!(headers["X-Tenant"], "acme");
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn single_item_download_url_is_used_verbatim() {
        let request: SigningRequest = serde_json::from_value(json!({
            "protocolVersion": "1.0",
            "requestId": "req-1",
            "appId": "app",
            "cert": { "certId": "c" },
            "items": [{
                "id": "inv-1",
                "dataType": "text",
                "content": { "mode": "inline", "encoding": "utf8", "content": "hello" },
                "callbacks": { "onSuccess": "https://cb.example/ok", "onError": "https://cb.example/err" },
                "upload": { "uploadUrl": "https://up.example/<objectId>", "signedContentType": "string" }
            }]
        }))
        .unwrap();

        let resolved = resolve_items(&request);
        assert_eq!(resolved[0].upload.url, "https://up.example/inv-1");
        assert_eq!(resolved[0].upload.method, "POST");
        assert_eq!(
            resolved[0].source,
            ResolvedSource::Inline {
                content: "hello".to_owned()
            }
        );
    }
}
