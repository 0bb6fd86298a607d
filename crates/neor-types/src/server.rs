//! Static description of a managed proxy endpoint

use serde::{Deserialize, Serialize};

/// One managed Xray proxy endpoint.
///
/// Immutable at runtime — loaded from the servers file at startup. Bundles
/// both the management-channel coordinates (SSH host/port/user/key, remote
/// config path, reload command) and the connection parameters handed out to
/// clients (listen port, REALITY security material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Human-readable label, also used as the link fragment (remark).
    pub name: String,
    /// Address clients connect to and the management channel dials.
    pub host: String,
    /// SSH port of the management channel.
    #[serde(default = "default_management_port")]
    pub management_port: u16,
    /// SSH user for the management channel.
    pub management_user: String,
    /// Local path to the private key authenticating the management channel.
    pub private_key_path: String,
    /// Live config document path on the remote host.
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,
    /// Staging path the new document is written to before the atomic move.
    #[serde(default = "default_staging_path")]
    pub staging_path: String,
    /// Command that makes the proxy service pick up the replaced document.
    #[serde(default = "default_reload_command")]
    pub service_reload_command: String,
    /// Proxy protocol tag of the inbound section holding the client list.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Port the proxy inbound listens on (goes into the link).
    pub listen_port: u16,
    /// Transport security of the inbound (goes into the link).
    #[serde(default = "default_security")]
    pub security: String,
    /// Flow mode assigned to provisioned clients and echoed in the link.
    #[serde(default = "default_flow_mode")]
    pub flow_mode: String,
    /// REALITY public key (`pbk` link param).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// TLS fingerprint to mimic (`fp` link param).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// REALITY server name (`sni` link param).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    /// REALITY short id (`sid` link param).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_id: Option<String>,
    /// SpiderX path (`spx` link param), carried verbatim — already encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spider_x: Option<String>,
}

fn default_management_port() -> u16 {
    22
}

fn default_remote_config_path() -> String {
    "/usr/local/etc/xray/config.json".to_string()
}

fn default_staging_path() -> String {
    "/tmp/xray-config.staged.json".to_string()
}

fn default_reload_command() -> String {
    "sudo systemctl restart xray".to_string()
}

fn default_protocol() -> String {
    "vless".to_string()
}

fn default_security() -> String {
    "reality".to_string()
}

fn default_flow_mode() -> String {
    "xtls-rprx-vision".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_descriptor_fills_defaults() {
        let json = r#"{
            "name": "Amsterdam-1",
            "host": "203.0.113.7",
            "management_user": "vpnadmin",
            "private_key_path": "/home/ops/.ssh/id_ed25519",
            "listen_port": 443
        }"#;
        let server: ServerDescriptor = serde_json::from_str(json).unwrap();

        assert_eq!(server.management_port, 22);
        assert_eq!(server.remote_config_path, "/usr/local/etc/xray/config.json");
        assert_eq!(server.service_reload_command, "sudo systemctl restart xray");
        assert_eq!(server.protocol, "vless");
        assert_eq!(server.security, "reality");
        assert_eq!(server.flow_mode, "xtls-rprx-vision");
        assert!(server.public_key.is_none());
    }
}
