//! Shape and type checks over an untrusted JSON value.

use serde_json::{Map, Value};
use signbridge_protocol::{ContentMode, DataType, PROTOCOL_VERSION, SignedContentType};

use crate::ValidationResult;

/// Checks field presence and types across the whole document.
///
/// Never panics on malformed input; every violation becomes one error string.
pub fn validate_structure(raw: &Value) -> ValidationResult {
    let mut walker = Walker::default();
    walker.request(raw);
    ValidationResult::from_errors(walker.errors)
}

#[derive(Default)]
struct Walker {
    errors: Vec<String>,
}

impl Walker {
    fn push(&mut self, path: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{path}: {}", message.as_ref()));
    }

    fn request(&mut self, raw: &Value) {
        let Some(root) = raw.as_object() else {
            self.push("request", "must be a JSON object");
            return;
        };

        if let Some(version) = self.required_str(root, "protocolVersion", "protocolVersion")
            && version != PROTOCOL_VERSION
        {
            self.push(
                "protocolVersion",
                format!("unsupported version '{version}' (expected '{PROTOCOL_VERSION}')"),
            );
        }
        self.required_str(root, "requestId", "requestId");
        self.optional_str(root, "correlationId", "correlationId");
        self.required_str(root, "appId", "appId");

        match root.get("cert") {
            Some(Value::Object(cert)) => {
                self.required_str(cert, "certId", "cert.certId");
                self.optional_str(cert, "label", "cert.label");
            }
            Some(_) => self.push("cert", "must be an object"),
            None => self.push("cert", "missing required field"),
        }

        if let Some(metadata) = root.get("metadata")
            && !metadata.is_object()
        {
            self.push("metadata", "must be an object");
        }

        // An explicit null counts as absent, as it does when deserializing.
        let items = root.get("items").filter(|value| !value.is_null());
        let groups = root.get("itemGroups").filter(|value| !value.is_null());
        match (items, groups) {
            (Some(_), Some(_)) => self.push(
                "request",
                "must contain exactly one of items or itemGroups, not both",
            ),
            (None, None) => self.push("request", "must contain exactly one of items or itemGroups"),
            _ => {}
        }

        if let Some(items) = items.and_then(|value| self.non_empty_array(value, "items")) {
            for (index, item) in items.iter().enumerate() {
                self.item(item, &format!("items[{index}]"));
            }
        }
        if let Some(groups) = groups.and_then(|value| self.non_empty_array(value, "itemGroups")) {
            for (index, group) in groups.iter().enumerate() {
                self.group(group, &format!("itemGroups[{index}]"));
            }
        }
    }

    fn item(&mut self, raw: &Value, path: &str) {
        let Some(item) = raw.as_object() else {
            self.push(path, "must be an object");
            return;
        };

        self.required_str(item, "id", &format!("{path}.id"));
        self.data_type(item, path);

        let content_path = format!("{path}.content");
        match item.get("content") {
            Some(Value::Object(content)) => self.content(content, &content_path),
            Some(_) => self.push(&content_path, "must be an object"),
            None => self.push(&content_path, "missing required field"),
        }

        self.options(item, path);
        self.upload(item.get("upload"), &format!("{path}.upload"));
        self.callbacks(item.get("callbacks"), &format!("{path}.callbacks"));
    }

    fn content(&mut self, content: &Map<String, Value>, path: &str) {
        let mode_path = format!("{path}.mode");
        if let Some(mode) = self.required_str(content, "mode", &mode_path)
            && ContentMode::parse(mode).is_none()
        {
            self.push(&mode_path, "must be 'inline' or 'remote'");
        }
        self.optional_str(content, "encoding", &format!("{path}.encoding"));
        self.optional_str(content, "content", &format!("{path}.content"));
        self.optional_str(content, "downloadUrl", &format!("{path}.downloadUrl"));
        self.optional_str(content, "httpMethod", &format!("{path}.httpMethod"));
        self.headers(content, "headers", &format!("{path}.headers"));
    }

    fn group(&mut self, raw: &Value, path: &str) {
        let Some(group) = raw.as_object() else {
            self.push(path, "must be an object");
            return;
        };

        self.data_type(group, path);
        let mode_path = format!("{path}.mode");
        if let Some(mode) = self.required_str(group, "mode", &mode_path)
            && ContentMode::parse(mode).is_none()
        {
            self.push(&mode_path, "must be 'inline' or 'remote'");
        }
        self.optional_str(group, "downloadUrl", &format!("{path}.downloadUrl"));
        self.headers(group, "downloadHeaders", &format!("{path}.downloadHeaders"));
        self.options(group, path);
        self.callbacks(group.get("callbacks"), &format!("{path}.callbacks"));
        self.upload(group.get("upload"), &format!("{path}.upload"));

        let members_path = format!("{path}.items");
        let Some(members) = group.get("items") else {
            self.push(&members_path, "missing required field");
            return;
        };
        let Some(members) = self.non_empty_array(members, &members_path) else {
            return;
        };
        for (index, member) in members.iter().enumerate() {
            let member_path = format!("{members_path}[{index}]");
            let Some(member) = member.as_object() else {
                self.push(&member_path, "must be an object");
                continue;
            };
            self.required_str(member, "id", &format!("{member_path}.id"));
            let content_path = format!("{member_path}.content");
            match member.get("content") {
                Some(Value::Object(content)) => {
                    self.optional_str(content, "encoding", &format!("{content_path}.encoding"));
                    self.optional_str(content, "value", &format!("{content_path}.value"));
                }
                Some(Value::Null) | None => {}
                Some(_) => self.push(&content_path, "must be an object"),
            }
        }
    }

    fn data_type(&mut self, object: &Map<String, Value>, path: &str) {
        let type_path = format!("{path}.dataType");
        if let Some(data_type) = self.required_str(object, "dataType", &type_path)
            && DataType::parse(data_type).is_none()
        {
            self.push(&type_path, format!("unsupported dataType '{data_type}'"));
        }
    }

    fn options(&mut self, object: &Map<String, Value>, path: &str) {
        let pdf_path = format!("{path}.pdfOptions");
        match object.get("pdfOptions") {
            Some(Value::Object(pdf)) => {
                self.required_str(pdf, "label", &format!("{pdf_path}.label"));
            }
            Some(Value::Null) | None => {}
            Some(_) => self.push(&pdf_path, "must be an object"),
        }

        let xml_path = format!("{path}.xmlOptions");
        match object.get("xmlOptions") {
            Some(Value::Object(xml)) => {
                self.required_str(xml, "xpath", &format!("{xml_path}.xpath"));
                self.optional_str(xml, "idAttribute", &format!("{xml_path}.idAttribute"));
            }
            Some(Value::Null) | None => {}
            Some(_) => self.push(&xml_path, "must be an object"),
        }
    }

    fn upload(&mut self, raw: Option<&Value>, path: &str) {
        let upload = match raw {
            Some(Value::Object(upload)) => upload,
            Some(_) => return self.push(path, "must be an object"),
            None => return self.push(path, "missing required field"),
        };

        self.required_str(upload, "uploadUrl", &format!("{path}.uploadUrl"));
        let type_path = format!("{path}.signedContentType");
        if let Some(kind) = self.required_str(upload, "signedContentType", &type_path)
            && SignedContentType::parse(kind).is_none()
        {
            self.push(
                &type_path,
                format!("unsupported signedContentType '{kind}' (expected string, pdf, xml or binary)"),
            );
        }
        self.optional_str(upload, "httpMethod", &format!("{path}.httpMethod"));
        self.headers(upload, "headers", &format!("{path}.headers"));
    }

    fn callbacks(&mut self, raw: Option<&Value>, path: &str) {
        let callbacks = match raw {
            Some(Value::Object(callbacks)) => callbacks,
            Some(_) => return self.push(path, "must be an object"),
            None => return self.push(path, "missing required field"),
        };

        self.required_str(callbacks, "onSuccess", &format!("{path}.onSuccess"));
        self.required_str(callbacks, "onError", &format!("{path}.onError"));
        self.optional_str(callbacks, "progress", &format!("{path}.progress"));
        self.headers(callbacks, "headers", &format!("{path}.headers"));
    }

    fn required_str<'a>(
        &mut self,
        object: &'a Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Option<&'a str> {
        match object.get(key) {
            None => {
                self.push(path, "missing required field");
                None
            }
            Some(Value::String(value)) if !value.is_empty() => Some(value.as_str()),
            Some(_) => {
                self.push(path, "must be a non-empty string");
                None
            }
        }
    }

    fn optional_str(&mut self, object: &Map<String, Value>, key: &str, path: &str) {
        match object.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => self.push(path, "must be a string"),
        }
    }

    fn headers(&mut self, object: &Map<String, Value>, key: &str, path: &str) {
        match object.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Object(headers)) => {
                for (name, value) in headers {
                    if !value.is_string() {
                        self.push(&format!("{path}.{name}"), "header value must be a string");
                    }
                }
            }
            Some(_) => self.push(path, "must be an object of string values"),
        }
    }

    fn non_empty_array<'a>(&mut self, value: &'a Value, path: &str) -> Option<&'a Vec<Value>> {
        match value {
            Value::Array(values) if !values.is_empty() => Some(values),
            _ => {
                self.push(path, "must be a non-empty array");
                None
            }
        }
    }
}
