//! The user-facing VLESS connection link
//!
//! Wire format:
//!
//! ```text
//! {protocol}://{identity_id}@{host}:{port}/?{query}#{label}
//! ```
//!
//! where the query always carries `encryption=none&type=tcp&security=…&flow=…`
//! and optionally `pbk`, `fp`, `sni`, `sid`, `spx`. Optional parameter values
//! are emitted and recovered VERBATIM — `spx` in particular arrives
//! pre-encoded (`%2F`) and must not be re-encoded, which is why the query is
//! assembled and split by hand instead of going through a form encoder.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{identity::ClientIdentity, server::ServerDescriptor};

/// Errors from [`ConnectionDescriptor::parse`].
#[derive(Debug, Error)]
pub enum LinkParseError {
    #[error("invalid link: {0}")]
    Url(#[from] url::ParseError),
    #[error("link is missing {0}")]
    Missing(&'static str),
}

/// The derived, user-facing connection link.
///
/// A pure function of `(ServerDescriptor, ClientIdentity)` — see
/// [`Self::build`]. Cached per user by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub protocol: String,
    pub identity_id: String,
    pub host: String,
    pub port: u16,
    pub security: String,
    pub flow_mode: String,
    pub public_key: Option<String>,
    pub fingerprint: Option<String>,
    pub sni: Option<String>,
    pub short_id: Option<String>,
    pub spider_x: Option<String>,
    /// Link fragment (remark), carried as-is.
    pub label: String,
}

impl ConnectionDescriptor {
    /// Derive the link for an identity on a server.
    pub fn build(server: &ServerDescriptor, identity: &ClientIdentity) -> Self {
        Self {
            protocol: server.protocol.clone(),
            identity_id: identity.identity_id.clone(),
            host: server.host.clone(),
            port: server.listen_port,
            security: server.security.clone(),
            flow_mode: identity.flow_mode.clone(),
            public_key: server.public_key.clone(),
            fingerprint: server.fingerprint.clone(),
            sni: server.sni.clone(),
            short_id: server.short_id.clone(),
            spider_x: server.spider_x.clone(),
            label: server.name.clone(),
        }
    }

    /// Render the shareable link text.
    pub fn to_link(&self) -> String {
        let mut query = format!(
            "encryption=none&type=tcp&security={}&flow={}",
            self.security, self.flow_mode
        );
        for (key, value) in [
            ("pbk", &self.public_key),
            ("fp", &self.fingerprint),
            ("sni", &self.sni),
            ("sid", &self.short_id),
            ("spx", &self.spider_x),
        ] {
            if let Some(v) = value {
                if !v.is_empty() {
                    query.push_str(&format!("&{key}={v}"));
                }
            }
        }
        format!(
            "{}://{}@{}:{}/?{}#{}",
            self.protocol, self.identity_id, self.host, self.port, query, self.label
        )
    }

    /// Parse a link back into its parts.
    ///
    /// Recovers everything [`Self::to_link`] emitted: identity, endpoint,
    /// security and flow, and whichever optional parameters were present.
    pub fn parse(link: &str) -> Result<Self, LinkParseError> {
        let url = Url::parse(link)?;

        let identity_id = url.username().to_string();
        if identity_id.is_empty() {
            return Err(LinkParseError::Missing("identity id"));
        }
        let host = url
            .host_str()
            .ok_or(LinkParseError::Missing("host"))?
            .to_string();
        let port = url.port().ok_or(LinkParseError::Missing("port"))?;

        let mut security = None;
        let mut flow_mode = None;
        let mut public_key = None;
        let mut fingerprint = None;
        let mut sni = None;
        let mut short_id = None;
        let mut spider_x = None;

        // Split raw pairs by hand so values stay verbatim (no decoding).
        for pair in url.query().unwrap_or("").split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let value = value.to_string();
            match key {
                "security" => security = Some(value),
                "flow" => flow_mode = Some(value),
                "pbk" => public_key = Some(value),
                "fp" => fingerprint = Some(value),
                "sni" => sni = Some(value),
                "sid" => short_id = Some(value),
                "spx" => spider_x = Some(value),
                _ => {}
            }
        }

        Ok(Self {
            protocol: url.scheme().to_string(),
            identity_id,
            host,
            port,
            security: security.ok_or(LinkParseError::Missing("security parameter"))?,
            flow_mode: flow_mode.ok_or(LinkParseError::Missing("flow parameter"))?,
            public_key,
            fingerprint,
            sni,
            short_id,
            spider_x,
            label: url.fragment().unwrap_or("").to_string(),
        })
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_link())
    }
}
