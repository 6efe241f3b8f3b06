use super::{
    LinkDecoder, decode_base64_text, parse_query, percent_decode, split_host_port, strip_scheme,
};
use crate::error::ParseError;
use crate::proxy::{NodeSettings, Protocol, ProxyNode, ShadowsocksSettings};

const DEFAULT_METHOD: &str = "aes-256-gcm";

/// 支持三种写法：
/// - `ss://method:password@host:port#name`
/// - `ss://BASE64(method:password)@host:port#name`
/// - `ss://BASE64(method:password@host:port)#name`
pub struct ShadowsocksDecoder;

impl LinkDecoder for ShadowsocksDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Shadowsocks
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError> {
        let body = strip_scheme(link, Protocol::Shadowsocks)?;

        let (rest, name) = match body.split_once('#') {
            Some((rest, fragment)) => (rest, percent_decode(fragment)),
            None => (body, String::new()),
        };
        let (rest, plugin) = match rest.split_once('?') {
            Some((rest, query)) => (
                rest,
                parse_query(query).remove("plugin").unwrap_or_default(),
            ),
            None => (rest, String::new()),
        };

        let (credentials, host_port) = match rest.rsplit_once('@') {
            Some((userinfo, host_port)) => (decode_userinfo(userinfo)?, host_port.to_string()),
            None => {
                let decoded = decode_base64_text(rest)?;
                let (credentials, host_port) = decoded
                    .rsplit_once('@')
                    .ok_or(ParseError::MissingField("server"))?;
                (credentials.to_string(), host_port.to_string())
            }
        };

        let (method, password) = match credentials.split_once(':') {
            Some((method, password)) => (method.to_string(), password.to_string()),
            None => (DEFAULT_METHOD.to_string(), credentials),
        };

        let authority = host_port.split('/').next().unwrap_or_default();
        let (server, port) = split_host_port(authority);

        let name = if name.trim().is_empty() {
            Protocol::Shadowsocks.default_name().to_string()
        } else {
            name
        };

        Ok(ProxyNode::new(
            name,
            server,
            port.unwrap_or_else(|| Protocol::Shadowsocks.default_port()),
            NodeSettings::Shadowsocks(ShadowsocksSettings {
                method,
                password,
                plugin,
            }),
        ))
    }
}

/// 包含 `:` 的是明文，否则按 Base64 解码
fn decode_userinfo(userinfo: &str) -> Result<String, ParseError> {
    let userinfo = percent_decode(userinfo);
    if userinfo.contains(':') {
        Ok(userinfo)
    } else {
        decode_base64_text(&userinfo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_link;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    fn settings(node: &ProxyNode) -> &ShadowsocksSettings {
        match &node.settings {
            NodeSettings::Shadowsocks(s) => s,
            other => panic!("expected shadowsocks settings, got {other:?}"),
        }
    }

    #[test]
    fn test_base64_userinfo() {
        let node = parse_link("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ=@1.2.3.4:8388#Test").unwrap();
        assert_eq!(node.protocol(), Protocol::Shadowsocks);
        assert_eq!(node.server, "1.2.3.4");
        assert_eq!(node.port, 8388);
        assert_eq!(node.name, "Test");
        assert_eq!(settings(&node).method, "aes-256-gcm");
        assert_eq!(settings(&node).password, "password");
    }

    #[test]
    fn test_base64_userinfo_without_padding() {
        let node = parse_link("ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@1.2.3.4:8388#Test").unwrap();
        assert_eq!(settings(&node).password, "password");
    }

    #[test]
    fn test_plain_userinfo() {
        let node =
            parse_link("ss://chacha20-ietf-poly1305:p%40ss:word@ss.example.com:9000#Plain")
                .unwrap();
        assert_eq!(node.server, "ss.example.com");
        assert_eq!(node.port, 9000);
        assert_eq!(settings(&node).method, "chacha20-ietf-poly1305");
        assert_eq!(settings(&node).password, "p@ss:word");
    }

    #[test]
    fn test_fully_encoded_legacy_form() {
        let blob = STANDARD.encode("aes-128-gcm:secret@10.0.0.1:8443");
        let node = parse_link(&format!("ss://{}#Legacy", blob.trim_end_matches('='))).unwrap();
        assert_eq!(node.server, "10.0.0.1");
        assert_eq!(node.port, 8443);
        assert_eq!(node.name, "Legacy");
        assert_eq!(settings(&node).method, "aes-128-gcm");
        assert_eq!(settings(&node).password, "secret");
    }

    #[test]
    fn test_decoded_without_colon_uses_default_method() {
        let blob = STANDARD.encode("onlypassword");
        let node = parse_link(&format!("ss://{blob}@1.2.3.4")).unwrap();
        assert_eq!(settings(&node).method, "aes-256-gcm");
        assert_eq!(settings(&node).password, "onlypassword");
        assert_eq!(node.port, 8388);
        assert_eq!(node.name, "Unknown SS Node");
    }

    #[test]
    fn test_sip002_plugin() {
        let node = parse_link(
            "ss://YWVzLTI1Ni1nY206cGFzc3dvcmQ@1.2.3.4:8388/?plugin=obfs-local%3Bobfs%3Dhttp#P",
        )
        .unwrap();
        assert_eq!(node.port, 8388);
        assert_eq!(settings(&node).plugin, "obfs-local;obfs=http");
    }

    #[test]
    fn test_rejects_bad_input() {
        // 解码后不是合法 UTF-8
        let invalid_utf8 = STANDARD.encode([0xff, 0xfe, 0xfd]);
        assert!(parse_link(&format!("ss://{invalid_utf8}@1.2.3.4:8388")).is_none());
        // Base64 本身不合法
        assert!(parse_link("ss://!!!@1.2.3.4:8388").is_none());
        // 缺少服务器
        let blob = STANDARD.encode("aes-256-gcm:password");
        assert!(parse_link(&format!("ss://{blob}")).is_none());
        assert!(parse_link(&format!("ss://{blob}@:8388")).is_none());
        // 缺少方法或密码
        assert!(parse_link("ss://:password@1.2.3.4:8388").is_none());
        assert!(parse_link("ss://aes-256-gcm:@1.2.3.4:8388").is_none());
    }
}
