//! Cross-field rules over a structurally sound request.

use std::collections::HashSet;

use signbridge_protocol::{
    CallbackConfig, ContentDefinition, ContentMode, DataType, ItemGroup, MAX_INLINE_CONTENT_BYTES,
    OBJECT_ID_PLACEHOLDER, PdfOptions, RequestPayload, SignableItem, SigningRequest,
    UploadConfig, XmlOptions,
};

use crate::ValidationResult;
use crate::transport::check_transport;

const UTF8_ENCODING: &str = "utf8";

/// Applies mode, option, placeholder, transport and uniqueness rules.
///
/// Every item and group is checked in order and all violations are
/// collected; id uniqueness is checked last across the flattened request.
pub fn validate_semantics(request: &SigningRequest) -> ValidationResult {
    let mut rules = Rules::default();
    let mut ids: Vec<(String, &str)> = Vec::new();

    match request.payload() {
        Some(RequestPayload::Items(items)) => {
            for (index, item) in items.iter().enumerate() {
                let path = format!("items[{index}]");
                rules.item(item, &path);
                ids.push((format!("{path}.id"), item.id.as_str()));
            }
        }
        Some(RequestPayload::Groups(groups)) => {
            for (index, group) in groups.iter().enumerate() {
                let path = format!("itemGroups[{index}]");
                rules.group(group, &path);
                for (member_index, member) in group.items.iter().enumerate() {
                    ids.push((
                        format!("{path}.items[{member_index}].id"),
                        member.id.as_str(),
                    ));
                }
            }
        }
        None => rules.push(
            "request",
            "must contain exactly one non-empty items or itemGroups array",
        ),
    }

    let mut seen = HashSet::new();
    for (path, id) in ids {
        if !seen.insert(id) {
            rules.push(&path, format!("duplicate id '{id}'"));
        }
    }

    ValidationResult::from_errors(rules.errors)
}

#[derive(Default)]
struct Rules {
    errors: Vec<String>,
}

impl Rules {
    fn push(&mut self, path: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{path}: {}", message.as_ref()));
    }

    fn item(&mut self, item: &SignableItem, path: &str) {
        self.options(
            item.data_type,
            item.pdf_options.as_ref(),
            item.xml_options.as_ref(),
            path,
        );
        self.remote_only(item.data_type, item.content.mode(), path);

        let content_path = format!("{path}.content");
        match &item.content {
            ContentDefinition::Inline { encoding, content } => {
                self.encoding(encoding.as_deref(), &format!("{content_path}.encoding"));
                self.inline_payload(content.as_deref(), &format!("{content_path}.content"));
            }
            // Item-level downloadUrl names one concrete object; no placeholder needed.
            ContentDefinition::Remote { download_url, .. } => {
                let url_path = format!("{content_path}.downloadUrl");
                match download_url {
                    Some(url) => self.transport(url, &url_path),
                    None => self.push(&url_path, "required for remote mode"),
                }
            }
        }

        self.upload(&item.upload, &format!("{path}.upload"));
        self.callbacks(&item.callbacks, &format!("{path}.callbacks"));
    }

    fn group(&mut self, group: &ItemGroup, path: &str) {
        self.options(
            group.data_type,
            group.pdf_options.as_ref(),
            group.xml_options.as_ref(),
            path,
        );
        self.remote_only(group.data_type, group.mode, path);

        let url_path = format!("{path}.downloadUrl");
        match (group.mode, &group.download_url) {
            (ContentMode::Remote, Some(url)) => {
                self.placeholder(url, &url_path);
                self.transport(url, &url_path);
            }
            (ContentMode::Remote, None) => self.push(&url_path, "required for remote mode"),
            (ContentMode::Inline, Some(url)) => self.transport(url, &url_path),
            (ContentMode::Inline, None) => {}
        }

        if group.mode == ContentMode::Inline {
            for (index, member) in group.items.iter().enumerate() {
                let content_path = format!("{path}.items[{index}].content");
                let content = member.content.as_ref();
                self.encoding(
                    content.and_then(|c| c.encoding.as_deref()),
                    &format!("{content_path}.encoding"),
                );
                self.inline_payload(
                    content.and_then(|c| c.value.as_deref()),
                    &format!("{content_path}.value"),
                );
            }
        }

        self.upload(&group.upload, &format!("{path}.upload"));
        self.callbacks(&group.callbacks, &format!("{path}.callbacks"));
    }

    fn options(
        &mut self,
        data_type: DataType,
        pdf: Option<&PdfOptions>,
        xml: Option<&XmlOptions>,
        path: &str,
    ) {
        match (data_type, pdf.is_some()) {
            (DataType::Pdf, false) => {
                self.push(&format!("{path}.pdfOptions"), "required when dataType is 'pdf'")
            }
            (kind, true) if kind != DataType::Pdf => self.push(
                &format!("{path}.pdfOptions"),
                format!("only allowed when dataType is 'pdf', got '{}'", kind.as_str()),
            ),
            _ => {}
        }
        match (data_type, xml.is_some()) {
            (DataType::Xml, false) => {
                self.push(&format!("{path}.xmlOptions"), "required when dataType is 'xml'")
            }
            (kind, true) if kind != DataType::Xml => self.push(
                &format!("{path}.xmlOptions"),
                format!("only allowed when dataType is 'xml', got '{}'", kind.as_str()),
            ),
            _ => {}
        }
    }

    fn remote_only(&mut self, data_type: DataType, mode: ContentMode, path: &str) {
        if data_type.requires_remote() && mode != ContentMode::Remote {
            self.push(
                path,
                format!(
                    "dataType '{}' requires mode 'remote', got '{}'",
                    data_type.as_str(),
                    mode.as_str()
                ),
            );
        }
    }

    fn encoding(&mut self, encoding: Option<&str>, path: &str) {
        if let Some(encoding) = encoding
            && encoding != UTF8_ENCODING
        {
            self.push(path, format!("unsupported encoding '{encoding}' (expected 'utf8')"));
        }
    }

    fn inline_payload(&mut self, payload: Option<&str>, path: &str) {
        match payload {
            None => self.push(path, "required for inline mode"),
            Some(payload) if payload.len() > MAX_INLINE_CONTENT_BYTES => self.push(
                path,
                format!("inline content exceeds {MAX_INLINE_CONTENT_BYTES} bytes"),
            ),
            Some(_) => {}
        }
    }

    fn upload(&mut self, upload: &UploadConfig, path: &str) {
        let url_path = format!("{path}.uploadUrl");
        self.placeholder(&upload.upload_url, &url_path);
        self.transport(&upload.upload_url, &url_path);
    }

    fn callbacks(&mut self, callbacks: &CallbackConfig, path: &str) {
        self.transport(&callbacks.on_success, &format!("{path}.onSuccess"));
        self.transport(&callbacks.on_error, &format!("{path}.onError"));
        if let Some(progress) = &callbacks.progress {
            self.transport(progress, &format!("{path}.progress"));
        }
    }

    fn placeholder(&mut self, url: &str, path: &str) {
        if !url.contains(OBJECT_ID_PLACEHOLDER) {
            self.push(
                path,
                format!("must contain the {OBJECT_ID_PLACEHOLDER} placeholder"),
            );
        }
    }

    fn transport(&mut self, url: &str, path: &str) {
        if let Err(message) = check_transport(url) {
            self.push(path, message);
        }
    }
}
