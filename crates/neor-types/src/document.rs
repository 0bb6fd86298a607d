//! Serde model of the remote Xray configuration document
//!
//! The service only ever touches the client list of one inbound section.
//! Everything else — routing rules, outbounds, stream settings, fields Xray
//! adds in newer releases — is captured by `#[serde(flatten)]` maps so a
//! read-modify-write cycle never drops configuration it does not understand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::ClientIdentity;

/// The full structured configuration of a proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfigDocument {
    /// Inbound sections; exactly one is the mutation target.
    #[serde(default)]
    pub inbounds: Vec<InboundSection>,
    /// Everything else in the document, preserved untouched.
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// One inbound section of the remote document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSection {
    /// Protocol tag, matched against `ServerDescriptor::protocol`.
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<InboundSettings>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// The `settings` object of an inbound section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSettings {
    /// The client list this service mutates. Absent on inbounds that do not
    /// carry clients — a structural error for the mutation target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientEntry>>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// One client entry inside an inbound's client list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEntry {
    pub id: String,
    /// Owner tag. Entries without an email were not provisioned by this
    /// service and are always left alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl RemoteConfigDocument {
    /// The mutation target: the FIRST inbound whose protocol matches.
    ///
    /// A linear scan with a single-target assumption — servers with several
    /// matching inbounds are not supported, and the extra sections are
    /// deliberately never touched.
    pub fn target_inbound(&self, protocol: &str) -> Option<&InboundSection> {
        self.inbounds.iter().find(|i| i.protocol == protocol)
    }

    /// Mutable variant of [`Self::target_inbound`].
    pub fn target_inbound_mut(&mut self, protocol: &str) -> Option<&mut InboundSection> {
        self.inbounds.iter_mut().find(|i| i.protocol == protocol)
    }
}

impl InboundSection {
    pub fn clients(&self) -> Option<&[ClientEntry]> {
        self.settings.as_ref()?.clients.as_deref()
    }

    pub fn clients_mut(&mut self) -> Option<&mut Vec<ClientEntry>> {
        self.settings.as_mut()?.clients.as_mut()
    }
}

impl From<&ClientIdentity> for ClientEntry {
    fn from(identity: &ClientIdentity) -> Self {
        Self {
            id: identity.identity_id.clone(),
            email: Some(identity.owner_email.clone()),
            flow: Some(identity.flow_mode.clone()),
            rest: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "log": { "loglevel": "warning" },
        "inbounds": [
            { "protocol": "dokodemo-door", "port": 8080, "settings": { "address": "127.0.0.1" } },
            {
                "protocol": "vless",
                "port": 443,
                "settings": {
                    "clients": [
                        { "id": "9a1b", "email": "user-1@neor.vpn", "flow": "xtls-rprx-vision" },
                        { "id": "op-static" }
                    ],
                    "decryption": "none"
                },
                "streamSettings": { "network": "tcp", "security": "reality" }
            }
        ],
        "outbounds": [ { "protocol": "freedom" } ]
    }"#;

    #[test]
    fn target_inbound_picks_first_matching_protocol() {
        let doc: RemoteConfigDocument = serde_json::from_str(DOC).unwrap();
        let inbound = doc.target_inbound("vless").unwrap();
        assert_eq!(inbound.clients().unwrap().len(), 2);
        assert!(doc.target_inbound("shadowsocks").is_none());
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let mut doc: RemoteConfigDocument = serde_json::from_str(DOC).unwrap();
        doc.target_inbound_mut("vless")
            .unwrap()
            .clients_mut()
            .unwrap()
            .retain(|c| c.email.as_deref() != Some("user-1@neor.vpn"));

        let value: Value = serde_json::to_value(&doc).unwrap();
        // Top-level, inbound-level, and settings-level extras all preserved.
        assert_eq!(value["log"]["loglevel"], "warning");
        assert_eq!(value["inbounds"][1]["port"], 443);
        assert_eq!(value["inbounds"][1]["streamSettings"]["security"], "reality");
        assert_eq!(value["inbounds"][1]["settings"]["decryption"], "none");
        assert_eq!(value["outbounds"][0]["protocol"], "freedom");
        // The email-less entry was not ours to remove.
        assert_eq!(value["inbounds"][1]["settings"]["clients"][0]["id"], "op-static");
    }
}
