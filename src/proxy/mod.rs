use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::ParseError;

/// 支持的代理协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    Hysteria2,
    Trojan,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Shadowsocks,
        Protocol::Hysteria2,
        Protocol::Trojan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Trojan => "trojan",
        }
    }

    /// 链接前缀，hysteria2 有两种写法
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Protocol::Vmess => &["vmess://"],
            Protocol::Vless => &["vless://"],
            Protocol::Shadowsocks => &["ss://"],
            Protocol::Hysteria2 => &["hy2://", "hysteria2://"],
            Protocol::Trojan => &["trojan://"],
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Shadowsocks => 8388,
            _ => 443,
        }
    }

    pub fn default_name(&self) -> &'static str {
        match self {
            Protocol::Vmess => "Unknown VMess Node",
            Protocol::Vless => "Unknown VLess Node",
            Protocol::Shadowsocks => "Unknown SS Node",
            Protocol::Hysteria2 => "Unknown Hysteria2 Node",
            Protocol::Trojan => "Unknown Trojan Node",
        }
    }

    /// 根据链接前缀识别协议，无法识别返回 None
    pub fn from_link(link: &str) -> Option<Protocol> {
        Self::ALL
            .into_iter()
            .find(|p| p.schemes().iter().any(|s| link.starts_with(s)))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessSettings {
    pub uuid: String,
    pub alter_id: u16,
    pub network: String,
    pub tls: String,
    pub security: String,
    pub host: String,
    pub path: String,
    pub header_type: String,
    pub sni: String,
    pub alpn: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlessSettings {
    pub uuid: String,
    pub encryption: String,
    pub flow: String,
    pub security: String,
    pub sni: String,
    pub fingerprint: String,
    pub public_key: String,
    pub short_id: String,
    pub network: String,
    pub host: String,
    pub path: String,
    pub header_type: String,
    pub alpn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksSettings {
    pub method: String,
    pub password: String,
    pub plugin: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hysteria2Settings {
    pub password: String,
    pub sni: String,
    pub insecure: bool,
    pub obfs: String,
    pub obfs_password: String,
    pub up: String,
    pub down: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrojanSettings {
    pub password: String,
    pub sni: String,
    pub network: String,
    pub host: String,
    pub path: String,
    pub security: String,
    pub alpn: String,
    pub fingerprint: String,
}

/// 协议相关字段，每种协议一组固定字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum NodeSettings {
    Vmess(VmessSettings),
    Vless(VlessSettings),
    Shadowsocks(ShadowsocksSettings),
    Hysteria2(Hysteria2Settings),
    Trojan(TrojanSettings),
}

/// 规范化后的代理节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyNode {
    pub name: String,
    pub server: String,
    pub port: u16,
    #[serde(flatten)]
    pub settings: NodeSettings,
}

impl ProxyNode {
    pub fn new(name: String, server: String, port: u16, settings: NodeSettings) -> Self {
        Self {
            name,
            server,
            port,
            settings,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match &self.settings {
            NodeSettings::Vmess(_) => Protocol::Vmess,
            NodeSettings::Vless(_) => Protocol::Vless,
            NodeSettings::Shadowsocks(_) => Protocol::Shadowsocks,
            NodeSettings::Hysteria2(_) => Protocol::Hysteria2,
            NodeSettings::Trojan(_) => Protocol::Trojan,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// 用于建立 TCP 连接的主机名（去掉 IPv6 方括号）
    pub fn connect_host(&self) -> &str {
        self.server
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(&self.server)
    }

    pub fn get_ip_address(&self) -> Option<IpAddr> {
        self.connect_host().parse().ok()
    }

    /// 主身份凭据：uuid 或密码
    pub fn credential(&self) -> &str {
        match &self.settings {
            NodeSettings::Vmess(s) => &s.uuid,
            NodeSettings::Vless(s) => &s.uuid,
            NodeSettings::Shadowsocks(s) => &s.password,
            NodeSettings::Hysteria2(s) => &s.password,
            NodeSettings::Trojan(s) => &s.password,
        }
    }

    /// 服务器、端口和协议必需的身份字段都不能为空
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.server.trim().is_empty() || self.connect_host().is_empty() {
            return Err(ParseError::MissingField("server"));
        }

        if self.port == 0 {
            return Err(ParseError::MissingField("port"));
        }

        if let NodeSettings::Shadowsocks(s) = &self.settings {
            if s.method.is_empty() {
                return Err(ParseError::MissingField("method"));
            }
        }

        if self.credential().is_empty() {
            return Err(match self.settings {
                NodeSettings::Vmess(_) | NodeSettings::Vless(_) => ParseError::MissingField("uuid"),
                _ => ParseError::MissingField("password"),
            });
        }

        Ok(())
    }
}
