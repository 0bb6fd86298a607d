//! Idempotent add/remove of client identities
//!
//! The single choke point every mutation of a remote document funnels
//! through. Holds the one mandatory lock in the system: a per-server async
//! mutex serializing the read-modify-write cycle, without which two
//! interleaved calls can silently drop each other's change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use neor_types::{ClientEntry, ClientIdentity, ServerDescriptor};

use crate::error::{Error, Result};
use crate::store::RemoteConfigStore;
use crate::traits::ManagementChannel;

/// Adds or removes one client identity on a proxy server.
#[derive(Debug, Clone)]
pub struct CredentialProvisioner<C> {
    store: RemoteConfigStore<C>,
    // Keyed by server name; calls to different servers proceed in parallel.
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<C: ManagementChannel> CredentialProvisioner<C> {
    pub fn new(store: RemoteConfigStore<C>) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &RemoteConfigStore<C> {
        &self.store
    }

    fn server_lock(&self, server: &ServerDescriptor) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            locks
                .entry(server.name.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Provision an identity for `owner_email`, replacing any existing one.
    ///
    /// Replace-not-append is the idempotence mechanism: retrying after a
    /// timeout of unknown outcome, or calling again for the same user, always
    /// converges on exactly one entry per owner. Returns the new identity
    /// only after a successful commit — on any error the caller must assume
    /// the remote state did not change.
    pub async fn add(
        &self,
        server: &ServerDescriptor,
        owner_email: &str,
        flow_mode: &str,
    ) -> Result<ClientIdentity> {
        let lock = self.server_lock(server);
        let _guard = lock.lock().await;

        let mut document = self.store.fetch(server).await?;
        let identity = ClientIdentity::random(owner_email, flow_mode);
        {
            let inbound = document
                .target_inbound_mut(&server.protocol)
                .ok_or_else(|| Error::SectionNotFound {
                    server: server.name.clone(),
                    protocol: server.protocol.clone(),
                })?;
            let clients = inbound
                .clients_mut()
                .ok_or_else(|| Error::MalformedDocument {
                    server: server.name.clone(),
                    reason: "target inbound has no settings.clients list".to_string(),
                })?;

            let before = clients.len();
            clients.retain(|c| c.email.as_deref() != Some(owner_email));
            if clients.len() != before {
                tracing::debug!(server = %server.name, owner_email, "replacing existing client entry");
            }
            clients.push(ClientEntry::from(&identity));
        }

        self.store.commit(server, &document).await?;
        tracing::info!(
            server = %server.name,
            owner_email,
            identity_id = %identity.identity_id,
            "provisioned client identity"
        );
        Ok(identity)
    }

    /// Revoke the identity for `owner_email`, if any.
    ///
    /// Returns whether an entry was actually removed. When nothing matches,
    /// no commit is issued at all — a needless commit means a needless
    /// service reload, and reloads interrupt every active connection.
    pub async fn remove(&self, server: &ServerDescriptor, owner_email: &str) -> Result<bool> {
        let lock = self.server_lock(server);
        let _guard = lock.lock().await;

        let mut document = self.store.fetch(server).await?;
        let changed = {
            let inbound = document
                .target_inbound_mut(&server.protocol)
                .ok_or_else(|| Error::SectionNotFound {
                    server: server.name.clone(),
                    protocol: server.protocol.clone(),
                })?;
            let clients = inbound
                .clients_mut()
                .ok_or_else(|| Error::MalformedDocument {
                    server: server.name.clone(),
                    reason: "target inbound has no settings.clients list".to_string(),
                })?;

            let before = clients.len();
            clients.retain(|c| c.email.as_deref() != Some(owner_email));
            clients.len() != before
        };

        if !changed {
            tracing::debug!(server = %server.name, owner_email, "no client entry to remove");
            return Ok(false);
        }

        self.store.commit(server, &document).await?;
        tracing::info!(server = %server.name, owner_email, "revoked client identity");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockChannel, test_server};

    fn provisioner(channel: MockChannel) -> CredentialProvisioner<MockChannel> {
        CredentialProvisioner::new(RemoteConfigStore::new(channel))
    }

    fn seed_empty(channel: &MockChannel, server: &ServerDescriptor) {
        channel.seed_file(
            &server.remote_config_path,
            br#"{"inbounds":[{"protocol":"vless","settings":{"clients":[],"decryption":"none"}}]}"#,
        );
    }

    // ── idempotence ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn add_twice_leaves_one_entry_with_the_second_id() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        let provisioner = provisioner(channel.clone());

        let first = provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap();
        let second = provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap();

        assert_ne!(first.identity_id, second.identity_id);
        let entries = channel.client_entries(&server);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, second.identity_id);
    }

    #[tokio::test]
    async fn add_preserves_other_owners_entries() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        let provisioner = provisioner(channel.clone());

        provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap();
        provisioner
            .add(&server, "user-2@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap();

        let emails: Vec<_> = channel
            .client_entries(&server)
            .into_iter()
            .map(|(_, email)| email)
            .collect();
        assert_eq!(emails.len(), 2);
        assert!(emails.contains(&Some("user-1@neor.vpn".to_string())));
        assert!(emails.contains(&Some("user-2@neor.vpn".to_string())));
    }

    // ── no-op detection ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn remove_of_absent_owner_commits_nothing() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        let provisioner = provisioner(channel.clone());

        let removed = provisioner.remove(&server, "user-9@neor.vpn").await.unwrap();

        assert!(!removed);
        assert_eq!(channel.write_count(), 0);
        assert_eq!(channel.reload_count(), 0);
    }

    #[tokio::test]
    async fn remove_of_present_owner_commits_once() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        let provisioner = provisioner(channel.clone());

        provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap();
        let writes_before = channel.write_count();

        let removed = provisioner.remove(&server, "user-1@neor.vpn").await.unwrap();

        assert!(removed);
        assert_eq!(channel.write_count(), writes_before + 1);
        assert!(channel.client_entries(&server).is_empty());
    }

    // ── structural errors ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn missing_section_is_a_structural_error() {
        let server = test_server();
        let channel = MockChannel::new();
        channel.seed_file(
            &server.remote_config_path,
            br#"{"inbounds":[{"protocol":"shadowsocks","settings":{"clients":[]}}]}"#,
        );
        let provisioner = provisioner(channel);

        let err = provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SectionNotFound { .. }));
    }

    #[tokio::test]
    async fn missing_clients_list_is_a_structural_error() {
        let server = test_server();
        let channel = MockChannel::new();
        channel.seed_file(
            &server.remote_config_path,
            br#"{"inbounds":[{"protocol":"vless","settings":{"decryption":"none"}}]}"#,
        );
        let provisioner = provisioner(channel);

        let err = provisioner.remove(&server, "user-1@neor.vpn").await.unwrap_err();
        assert!(matches!(err, Error::MalformedDocument { .. }));
    }

    #[tokio::test]
    async fn failed_commit_surfaces_and_returns_no_identity() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        channel.fail_next_write();
        let provisioner = provisioner(channel.clone());

        let err = provisioner
            .add(&server, "user-1@neor.vpn", "xtls-rprx-vision")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
        // Live document untouched.
        assert!(channel.client_entries(&server).is_empty());
    }

    // ── concurrency ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_adds_on_one_server_lose_neither_entry() {
        let server = test_server();
        let channel = MockChannel::new();
        seed_empty(&channel, &server);
        let provisioner = provisioner(channel.clone());

        let (a, b) = tokio::join!(
            provisioner.add(&server, "user-1@neor.vpn", "xtls-rprx-vision"),
            provisioner.add(&server, "user-2@neor.vpn", "xtls-rprx-vision"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(channel.client_entries(&server).len(), 2);
    }

    #[tokio::test]
    async fn concurrent_adds_on_two_servers_land_on_both() {
        let server_a = test_server();
        let mut server_b = test_server();
        server_b.name = "mock-2".to_string();
        server_b.remote_config_path = "/usr/local/etc/xray/config-2.json".to_string();
        server_b.staging_path = "/tmp/xray-config-2.staged.json".to_string();

        let channel = MockChannel::new();
        seed_empty(&channel, &server_a);
        seed_empty(&channel, &server_b);
        let provisioner = provisioner(channel.clone());

        // Distinct server names get distinct locks, so neither call can
        // serialize behind (or deadlock on) the other's guard.
        assert!(!Arc::ptr_eq(
            &provisioner.server_lock(&server_a),
            &provisioner.server_lock(&server_b),
        ));

        let (a, b) = tokio::join!(
            provisioner.add(&server_a, "user-1@neor.vpn", "xtls-rprx-vision"),
            provisioner.add(&server_b, "user-2@neor.vpn", "xtls-rprx-vision"),
        );
        a.unwrap();
        b.unwrap();

        let on_a = channel.client_entries(&server_a);
        let on_b = channel.client_entries(&server_b);
        assert_eq!(on_a.len(), 1);
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_a[0].1.as_deref(), Some("user-1@neor.vpn"));
        assert_eq!(on_b[0].1.as_deref(), Some("user-2@neor.vpn"));
    }
}
