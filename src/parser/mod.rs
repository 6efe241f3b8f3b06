//! 节点分享链接解析
//!
//! 每种协议一个解码器，按链接前缀分发。解析失败只返回 `None`，
//! 具体原因通过日志记录，调用方只需要过滤掉无法识别的行。

mod hysteria2;
mod shadowsocks;
mod trojan;
mod vless;
mod vmess;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use log::{debug, warn};
use std::collections::HashMap;

use crate::error::ParseError;
use crate::proxy::{Protocol, ProxyNode};

pub use hysteria2::Hysteria2Decoder;
pub use shadowsocks::ShadowsocksDecoder;
pub use trojan::TrojanDecoder;
pub use vless::VlessDecoder;
pub use vmess::VmessDecoder;

/// 单个协议的链接解码器
pub trait LinkDecoder {
    fn protocol(&self) -> Protocol;

    fn matches(&self, link: &str) -> bool {
        self.protocol()
            .schemes()
            .iter()
            .any(|scheme| link.starts_with(scheme))
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError>;
}

static DECODERS: [&(dyn LinkDecoder + Sync); 5] = [
    &VmessDecoder,
    &VlessDecoder,
    &ShadowsocksDecoder,
    &Hysteria2Decoder,
    &TrojanDecoder,
];

/// 解析单条链接，无法识别或格式错误时返回 None
pub fn parse_link(text: &str) -> Option<ProxyNode> {
    let link = text.trim();
    if link.is_empty() {
        return None;
    }

    let decoder = DECODERS.iter().find(|d| d.matches(link))?;

    match decoder.decode(link).and_then(|node| node.validate().map(|_| node)) {
        Ok(node) => {
            debug!("解析 {} 节点成功: {}", node.protocol(), node.name);
            Some(node)
        }
        Err(e) => {
            warn!("{} 链接解析失败: {}", decoder.protocol(), e);
            None
        }
    }
}

/// 逐行解析，空行和无关内容直接忽略
pub fn parse_links(text: &str) -> Vec<ProxyNode> {
    text.lines().filter_map(parse_link).collect()
}

/// Base64 解码，自动补齐 `=`，标准字母表失败时再尝试 URL-safe
pub fn decode_base64(text: &str) -> Result<Vec<u8>, ParseError> {
    let mut data: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    while data.len() % 4 != 0 {
        data.push('=');
    }

    STANDARD
        .decode(&data)
        .or_else(|_| URL_SAFE.decode(&data))
        .map_err(|e| ParseError::InvalidBase64(e.to_string()))
}

pub(crate) fn decode_base64_text(text: &str) -> Result<String, ParseError> {
    String::from_utf8(decode_base64(text)?).map_err(|_| ParseError::InvalidUtf8)
}

pub(crate) fn strip_scheme(link: &str, protocol: Protocol) -> Result<&str, ParseError> {
    protocol
        .schemes()
        .iter()
        .find_map(|scheme| link.strip_prefix(scheme))
        .ok_or(ParseError::UnsupportedScheme)
}

pub(crate) fn percent_decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// 端口非数字、为 0 或超出范围时视为缺省
pub(crate) fn parse_port(text: &str) -> Option<u16> {
    text.trim().parse::<u16>().ok().filter(|port| *port != 0)
}

/// 拆分 `host:port`，IPv6 字面量保留方括号
pub(crate) fn split_host_port(text: &str) -> (String, Option<u16>) {
    let text = text.trim();

    if text.starts_with('[') {
        return match text.find(']') {
            Some(end) => {
                let port = text[end + 1..].strip_prefix(':').and_then(parse_port);
                (text[..=end].to_string(), port)
            }
            None => (text.to_string(), None),
        };
    }

    // 没有方括号的 IPv6 地址无法区分端口
    if text.matches(':').count() > 1 {
        return (text.to_string(), None);
    }

    match text.split_once(':') {
        Some((host, port)) => (host.to_string(), parse_port(port)),
        None => (text.to_string(), None),
    }
}

/// 解析查询参数，重复的键只保留第一个值
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

/// `userinfo@host:port/path?query#fragment` 的各部分
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkParts {
    pub userinfo: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub query: HashMap<String, String>,
    pub fragment: Option<String>,
}

impl LinkParts {
    /// `body` 为去掉 scheme 后的部分
    pub fn parse(body: &str) -> Self {
        let (rest, fragment) = match body.split_once('#') {
            Some((rest, fragment)) => (rest, Some(percent_decode(fragment))),
            None => (body, None),
        };

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, parse_query(query)),
            None => (rest, HashMap::new()),
        };

        let (userinfo, host_path) = match rest.rsplit_once('@') {
            Some((userinfo, host_path)) => (Some(percent_decode(userinfo)), host_path),
            None => (None, rest),
        };

        let authority = host_path.split('/').next().unwrap_or_default();
        let (host, port) = split_host_port(authority);

        Self {
            userinfo: userinfo.filter(|u| !u.is_empty()),
            host,
            port,
            query,
            fragment: fragment.filter(|f| !f.trim().is_empty()),
        }
    }

    /// 查询参数，缺失时为空字符串
    pub fn param(&self, key: &str) -> String {
        self.query.get(key).cloned().unwrap_or_default()
    }

    /// 查询参数，缺失或为空时使用默认值
    pub fn param_or(&self, key: &str, default: &str) -> String {
        match self.query.get(key) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => default.to_string(),
        }
    }

    pub fn port_or_default(&self, protocol: Protocol) -> u16 {
        self.port.unwrap_or_else(|| protocol.default_port())
    }

    pub fn name_or_default(&self, protocol: Protocol) -> String {
        self.fragment
            .clone()
            .unwrap_or_else(|| protocol.default_name().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecognized_input_yields_nothing() {
        assert!(parse_link("").is_none());
        assert!(parse_link("   ").is_none());
        assert!(parse_link("hello world").is_none());
        assert!(parse_link("https://example.com/sub").is_none());
        assert!(parse_link("ssr://abcdef").is_none());
    }

    #[test]
    fn test_parse_links_skips_commentary() {
        let text = "\
# my nodes
vless://a1b2c3@example.com:443#One

some random text
trojan://secret@t.example.com:8443#Two
vmess://not-valid-base64!!!
";
        let nodes = parse_links(text);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "One");
        assert_eq!(nodes[1].name, "Two");
    }

    #[test]
    fn test_base64_padding_repair() {
        // "aes-256-gcm:password" 编码后带一个 '='
        let padded = "YWVzLTI1Ni1nY206cGFzc3dvcmQ=";
        let expected = b"aes-256-gcm:password".to_vec();
        assert_eq!(decode_base64(padded).unwrap(), expected);
        assert_eq!(decode_base64(padded.trim_end_matches('=')).unwrap(), expected);

        // 0 到 2 个缺失的 '='
        for (text, plain) in [("YWJj", "abc"), ("YWI", "ab"), ("YQ", "a")] {
            assert_eq!(decode_base64(text).unwrap(), plain.as_bytes());
        }
    }

    #[test]
    fn test_base64_url_safe_fallback() {
        // 0xfb 0xff 在标准字母表中是 "+/8="
        assert_eq!(decode_base64("-_8").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_base64("not-valid-base64!!!").is_err());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:8443"),
            ("example.com".to_string(), Some(8443))
        );
        assert_eq!(split_host_port("example.com"), ("example.com".to_string(), None));
        assert_eq!(split_host_port("example.com:abc"), ("example.com".to_string(), None));
        assert_eq!(split_host_port("example.com:0"), ("example.com".to_string(), None));
        assert_eq!(split_host_port("example.com:70000"), ("example.com".to_string(), None));
        assert_eq!(
            split_host_port("[2001:db8::1]:443"),
            ("[2001:db8::1]".to_string(), Some(443))
        );
        assert_eq!(split_host_port("[2001:db8::1]"), ("[2001:db8::1]".to_string(), None));
    }

    #[test]
    fn test_link_parts() {
        let parts = LinkParts::parse(
            "user%40id@example.com:2053/ws?type=ws&sni=a.com&sni=b.com&path=%2Fray#My%20Node",
        );
        assert_eq!(parts.userinfo.as_deref(), Some("user@id"));
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, Some(2053));
        assert_eq!(parts.param("sni"), "a.com");
        assert_eq!(parts.param("path"), "/ray");
        assert_eq!(parts.param("missing"), "");
        assert_eq!(parts.param_or("security", "none"), "none");
        assert_eq!(parts.fragment.as_deref(), Some("My Node"));
    }

    #[test]
    fn test_link_parts_without_optional_sections() {
        let parts = LinkParts::parse("example.com");
        assert!(parts.userinfo.is_none());
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port_or_default(Protocol::Trojan), 443);
        assert_eq!(parts.name_or_default(Protocol::Trojan), "Unknown Trojan Node");

        let parts = LinkParts::parse("@example.com#");
        assert!(parts.userinfo.is_none());
        assert!(parts.fragment.is_none());
    }
}
