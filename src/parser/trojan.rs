use super::{LinkDecoder, LinkParts, strip_scheme};
use crate::error::ParseError;
use crate::proxy::{NodeSettings, Protocol, ProxyNode, TrojanSettings};

/// `trojan://password@host:port?query#name`
pub struct TrojanDecoder;

impl LinkDecoder for TrojanDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Trojan
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError> {
        let parts = LinkParts::parse(strip_scheme(link, Protocol::Trojan)?);
        let password = parts
            .userinfo
            .clone()
            .ok_or(ParseError::MissingField("password"))?;

        let settings = TrojanSettings {
            password,
            sni: parts.param("sni"),
            network: parts.param_or("type", "tcp"),
            host: parts.param("host"),
            path: parts.param("path"),
            security: parts.param_or("security", "tls"),
            alpn: parts.param("alpn"),
            fingerprint: parts.param("fp"),
        };

        Ok(ProxyNode::new(
            parts.name_or_default(Protocol::Trojan),
            parts.host.clone(),
            parts.port_or_default(Protocol::Trojan),
            NodeSettings::Trojan(settings),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_link;

    fn settings(node: &ProxyNode) -> &TrojanSettings {
        match &node.settings {
            NodeSettings::Trojan(s) => s,
            other => panic!("expected trojan settings, got {other:?}"),
        }
    }

    #[test]
    fn test_trojan_link() {
        let node = parse_link(
            "trojan://s3cret@t.example.com:8443?sni=cdn.com&type=ws&host=h.com&path=%2Fws&alpn=h2&fp=firefox#JP%2001",
        )
        .unwrap();
        assert_eq!(node.protocol(), Protocol::Trojan);
        assert_eq!(node.server, "t.example.com");
        assert_eq!(node.port, 8443);
        assert_eq!(node.name, "JP 01");

        let s = settings(&node);
        assert_eq!(s.password, "s3cret");
        assert_eq!(s.sni, "cdn.com");
        assert_eq!(s.network, "ws");
        assert_eq!(s.host, "h.com");
        assert_eq!(s.path, "/ws");
        assert_eq!(s.security, "tls");
        assert_eq!(s.alpn, "h2");
        assert_eq!(s.fingerprint, "firefox");
    }

    #[test]
    fn test_defaults() {
        let node = parse_link("trojan://pw@t.example.com").unwrap();
        assert_eq!(node.port, 443);
        assert_eq!(node.name, "Unknown Trojan Node");
        assert_eq!(settings(&node).network, "tcp");
        assert_eq!(settings(&node).security, "tls");
    }

    #[test]
    fn test_missing_mandatory_fields() {
        assert!(parse_link("trojan://t.example.com:443").is_none());
        assert!(parse_link("trojan://pw@:443").is_none());
        assert!(parse_link("trojan://").is_none());
    }
}
