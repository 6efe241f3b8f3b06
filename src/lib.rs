//! 节点分享链接解析与测速
//!
//! 支持 vmess、vless、ss、hy2/hysteria2、trojan 五种分享链接，
//! 对解析出的节点做 TCP 连通性检测和下载测速。

pub mod check;
pub mod config;
pub mod error;
pub mod parser;
pub mod proxy;
pub mod subscription;
pub mod ui;
