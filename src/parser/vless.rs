use super::{LinkDecoder, LinkParts, strip_scheme};
use crate::error::ParseError;
use crate::proxy::{NodeSettings, Protocol, ProxyNode, VlessSettings};

/// `vless://uuid@host:port?query#name`
pub struct VlessDecoder;

impl LinkDecoder for VlessDecoder {
    fn protocol(&self) -> Protocol {
        Protocol::Vless
    }

    fn decode(&self, link: &str) -> Result<ProxyNode, ParseError> {
        let parts = LinkParts::parse(strip_scheme(link, Protocol::Vless)?);
        let uuid = parts
            .userinfo
            .clone()
            .ok_or(ParseError::MissingField("uuid"))?;

        let settings = VlessSettings {
            uuid,
            encryption: parts.param_or("encryption", "none"),
            flow: parts.param("flow"),
            security: parts.param_or("security", "none"),
            sni: parts.param("sni"),
            fingerprint: parts.param("fp"),
            public_key: parts.param("pbk"),
            short_id: parts.param("sid"),
            network: parts.param_or("type", "tcp"),
            host: parts.param("host"),
            path: parts.param("path"),
            header_type: parts.param_or("headerType", "none"),
            alpn: parts.param("alpn"),
        };

        Ok(ProxyNode::new(
            parts.name_or_default(Protocol::Vless),
            parts.host.clone(),
            parts.port_or_default(Protocol::Vless),
            NodeSettings::Vless(settings),
        ))
    }
}
