use serde_json::{Map, Value};

use super::{LinkDecoder, decode_base64_text, strip_scheme};
use crate::error::ParseError;
use crate::proxy::{NodeSettings, Protocol, ProxyNode, VmessSettings};

/// `vmess://BASE64(JSON)`
pub struct VmessDecoder;

impl LinkDecoder for VmessDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Vmess
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError> {
        let payload = strip_scheme(link, Protocol::Vmess)?;
        let text = decode_base64_text(payload)?;

        let value: Value =
            serde_json::from_str(&text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        let fields = value
            .as_object()
            .ok_or_else(|| ParseError::InvalidJson("expected a json object".to_string()))?;

        let server = text_field(fields, "add");
        if server.is_empty() {
            return Err(ParseError::MissingField("add"));
        }

        let uuid = text_field(fields, "id");
        if uuid.is_empty() {
            return Err(ParseError::MissingField("id"));
        }

        let port = number_field(fields, "port")
            .filter(|port| *port != 0)
            .unwrap_or_else(|| Protocol::Vmess.default_port());

        let settings = VmessSettings {
            uuid,
            alter_id: number_field(fields, "aid").unwrap_or(0),
            network: text_or(fields, "net", "tcp"),
            tls: text_field(fields, "tls"),
            security: text_or(fields, "scy", "auto"),
            host: text_field(fields, "host"),
            path: text_field(fields, "path"),
            header_type: text_field(fields, "type"),
            sni: text_field(fields, "sni"),
            alpn: text_field(fields, "alpn"),
            fingerprint: text_field(fields, "fp"),
        };

        Ok(ProxyNode::new(
            text_or(fields, "ps", Protocol::Vmess.default_name()),
            server,
            port,
            NodeSettings::Vmess(settings),
        ))
    }
}

/// 字符串、数字、布尔值都按文本读取，其余情况为空
fn text_field(fields: &Map<String, Value>, key: &str) -> String {
    match fields.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn text_or(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    let value = text_field(fields, key);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// 数字字段允许以字符串形式给出，无法解析时返回 None
fn number_field(fields: &Map<String, Value>, key: &str) -> Option<u16> {
    match fields.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
