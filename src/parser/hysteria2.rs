use super::{LinkDecoder, LinkParts, strip_scheme};
use crate::error::ParseError;
use crate::proxy::{Hysteria2Settings, NodeSettings, Protocol, ProxyNode};

/// `hy2://auth@host:port?query#name`，也接受 `hysteria2://`
pub struct Hysteria2Decoder;

impl LinkDecoder for Hysteria2Decoder {
    fn protocol(&self) -> Protocol {
        Protocol::Hysteria2
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError> {
        let parts = LinkParts::parse(strip_scheme(link, Protocol::Hysteria2)?);

        // 密码优先取 userinfo，其次是 auth 参数
        let password = parts
            .userinfo
            .clone()
            .unwrap_or_else(|| parts.param("auth"));

        let obfs_password = match parts.param("obfs-password") {
            value if value.is_empty() => parts.param("obfs_password"),
            value => value,
        };

        let settings = Hysteria2Settings {
            password,
            sni: parts.param("sni"),
            insecure: parts.param("insecure") == "1",
            obfs: parts.param("obfs"),
            obfs_password,
            up: parts.param("up"),
            down: parts.param("down"),
        };

        Ok(ProxyNode::new(
            parts.name_or_default(Protocol::Hysteria2),
            parts.host.clone(),
            parts.port_or_default(Protocol::Hysteria2),
            NodeSettings::Hysteria2(settings),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_link;

    fn settings(node: &ProxyNode) -> &Hysteria2Settings {
        match &node.settings {
            NodeSettings::Hysteria2(s) => s,
            other => panic!("expected hysteria2 settings, got {other:?}"),
        }
    }

    #[test]
    fn test_both_schemes() {
        let short = parse_link("hy2://letmein@hy.example.com:8443?sni=real.com#HY").unwrap();
        let long = parse_link("hysteria2://letmein@hy.example.com:8443?sni=real.com#HY").unwrap();
        assert_eq!(short, long);
        assert_eq!(short.protocol(), Protocol::Hysteria2);
        assert_eq!(short.port, 8443);
        assert_eq!(settings(&short).password, "letmein");
        assert_eq!(settings(&short).sni, "real.com");
    }

    #[test]
    fn test_auth_query_fallback() {
        let node = parse_link("hy2://hy.example.com?auth=from-query").unwrap();
        assert_eq!(settings(&node).password, "from-query");
        assert_eq!(node.port, 443);
        assert_eq!(node.name, "Unknown Hysteria2 Node");
    }

    #[test]
    fn test_query_parameters() {
        let node = parse_link(
            "hy2://pw@1.2.3.4:443?insecure=1&obfs=salamander&obfs-password=ob&up=50&down=100",
        )
        .unwrap();
        let s = settings(&node);
        assert!(s.insecure);
        assert_eq!(s.obfs, "salamander");
        assert_eq!(s.obfs_password, "ob");
        assert_eq!(s.up, "50");
        assert_eq!(s.down, "100");

        let node = parse_link("hy2://pw@1.2.3.4?insecure=true&obfs_password=alt").unwrap();
        assert!(!settings(&node).insecure);
        assert_eq!(settings(&node).obfs_password, "alt");
    }

    #[test]
    fn test_missing_mandatory_fields() {
        assert!(parse_link("hy2://pw@:443").is_none());
        assert!(parse_link("hy2://hy.example.com:443").is_none());
        assert!(parse_link("hysteria2://").is_none());
    }
}
