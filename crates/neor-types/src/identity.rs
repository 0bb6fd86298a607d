//! Provisioned client identities

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One provisioned credential inside a server's client list.
///
/// Uniqueness invariant: at most one identity per (server, owner_email).
/// `CredentialProvisioner::add` enforces this with replace semantics — a new
/// identity for an owner always displaces the previous one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Opaque unique credential token (UUID v4).
    pub identity_id: String,
    /// Stable synthetic per-user identifier, e.g. `user-42@neor.vpn`.
    pub owner_email: String,
    /// Flow mode assigned to this client.
    pub flow_mode: String,
}

impl ClientIdentity {
    /// New identity with a freshly generated random id.
    pub fn random(owner_email: impl Into<String>, flow_mode: impl Into<String>) -> Self {
        Self {
            identity_id: Uuid::new_v4().to_string(),
            owner_email: owner_email.into(),
            flow_mode: flow_mode.into(),
        }
    }
}

/// Deterministic owner email for a user id.
///
/// The same user always maps to the same address, which is what makes
/// replace-on-add and retry-after-timeout safe.
pub fn owner_email(user_id: i64, domain: &str) -> String {
    format!("user-{user_id}@{domain}")
}
