//! Top-level per-user API: get-or-create, force-regenerate, revoke

use std::future::Future;
use std::time::Duration;

use neor_types::{ConnectionDescriptor, ServerDescriptor, owner_email};

use crate::error::{Error, Result};
use crate::provisioner::CredentialProvisioner;
use crate::traits::{ConfigCache, ManagementChannel, SubscriptionLedger};

/// Bounded exponential backoff for transient provisioning failures.
///
/// Retrying is safe only because `add`/`remove` are idempotent; structural
/// and reload errors are never retried here.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Serves per-user descriptor requests, driven by cache hits/misses.
#[derive(Debug, Clone)]
pub struct ConfigOrchestrator<C, L, K> {
    provisioner: CredentialProvisioner<C>,
    ledger: L,
    cache: K,
    server: ServerDescriptor,
    email_domain: String,
    retry: RetryPolicy,
}

impl<C, L, K> ConfigOrchestrator<C, L, K>
where
    C: ManagementChannel,
    L: SubscriptionLedger,
    K: ConfigCache,
{
    pub fn new(
        provisioner: CredentialProvisioner<C>,
        ledger: L,
        cache: K,
        server: ServerDescriptor,
        email_domain: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            ledger,
            cache,
            server,
            email_domain: email_domain.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Return the user's descriptor, provisioning one if necessary.
    ///
    /// Inactive subscription fails fast with [`Error::SubscriptionInactive`]
    /// and performs no remote calls. A cache hit is served without touching
    /// the server at all.
    pub async fn get_or_create(&self, user_id: i64) -> Result<ConnectionDescriptor> {
        let active = self
            .ledger
            .is_active(user_id)
            .await
            .map_err(|e| Error::Ledger(e.to_string()))?;
        if !active {
            return Err(Error::SubscriptionInactive(user_id));
        }

        if let Some(descriptor) = self
            .cache
            .get(user_id)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?
        {
            tracing::debug!(user_id, "descriptor served from cache");
            return Ok(descriptor);
        }

        let email = owner_email(user_id, &self.email_domain);
        let identity = self
            .with_retry(|| {
                self.provisioner
                    .add(&self.server, &email, &self.server.flow_mode)
            })
            .await?;

        let descriptor = ConnectionDescriptor::build(&self.server, &identity);
        self.cache
            .put(user_id, &descriptor)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        tracing::info!(user_id, server = %self.server.name, "issued new descriptor");
        Ok(descriptor)
    }

    /// Invalidate the cached descriptor and issue a fresh one.
    ///
    /// Clear-then-recreate, in that order: the cache entry is deleted first,
    /// then the add replaces the remote identity. The old credential stops
    /// working at the exact moment the new one starts — the granularity of
    /// the single remote commit. A crash between the commit and the cache
    /// write leaves a stale cache, which the next `get_or_create` converges
    /// (add is idempotent).
    pub async fn force_regenerate(&self, user_id: i64) -> Result<ConnectionDescriptor> {
        self.cache
            .delete(user_id)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        tracing::info!(user_id, "forcing descriptor regeneration");
        self.get_or_create(user_id).await
    }

    /// Remove the user's remote identity and cached descriptor.
    ///
    /// Returns whether a remote entry actually existed. The cache entry is
    /// only cleared after the remote revoke succeeds (or is confirmed a
    /// no-op), so a failure leaves both sides as they were.
    pub async fn revoke(&self, user_id: i64) -> Result<bool> {
        let email = owner_email(user_id, &self.email_domain);
        let removed = self
            .with_retry(|| self.provisioner.remove(&self.server, &email))
            .await?;
        self.cache
            .delete(user_id)
            .await
            .map_err(|e| Error::Cache(e.to_string()))?;
        Ok(removed)
    }

    /// The designated server this orchestrator provisions on.
    pub fn server(&self) -> &ServerDescriptor {
        &self.server
    }

    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.base_delay * 2u32.pow(attempt);
                    tracing::warn!(
                        error = %e,
                        kind = e.kind(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient provisioning failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockCache, MockChannel, MockLedger, test_server};
    use crate::store::RemoteConfigStore;

    fn orchestrator(
        channel: MockChannel,
        ledger: MockLedger,
        cache: MockCache,
    ) -> ConfigOrchestrator<MockChannel, MockLedger, MockCache> {
        ConfigOrchestrator::new(
            CredentialProvisioner::new(RemoteConfigStore::new(channel)),
            ledger,
            cache,
            test_server(),
            "neor.vpn",
        )
        .with_retry_policy(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        })
    }

    fn seed_empty(channel: &MockChannel) {
        channel.seed_file(
            &test_server().remote_config_path,
            br#"{"inbounds":[{"protocol":"vless","settings":{"clients":[]}}]}"#,
        );
    }

    // ── inactive rejection ────────────────────────────────────────────────────

    #[tokio::test]
    async fn inactive_user_is_rejected_without_remote_calls() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        let orch = orchestrator(channel.clone(), MockLedger::new(), MockCache::new());

        let err = orch.get_or_create(7).await.unwrap_err();

        assert!(matches!(err, Error::SubscriptionInactive(7)));
        assert_eq!(channel.read_count(), 0);
        assert_eq!(channel.write_count(), 0);
    }

    // ── cache correctness ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let orch = orchestrator(channel.clone(), ledger, MockCache::new());

        let first = orch.get_or_create(7).await.unwrap();
        let writes_after_first = channel.write_count();
        let second = orch.get_or_create(7).await.unwrap();

        assert_eq!(first, second);
        // Exactly one add: no further commits for the cached call.
        assert_eq!(channel.write_count(), writes_after_first);
        assert_eq!(writes_after_first, 1);
    }

    // ── replace atomicity ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn force_regenerate_swaps_exactly_one_identity() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let cache = MockCache::new();
        let orch = orchestrator(channel.clone(), ledger, cache.clone());

        let old = orch.get_or_create(7).await.unwrap();
        let new = orch.force_regenerate(7).await.unwrap();

        assert_ne!(old.identity_id, new.identity_id);
        let entries = channel.client_entries(&test_server());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, new.identity_id);
        // Cache holds the new descriptor.
        assert_eq!(cache.stored(7).unwrap().identity_id, new.identity_id);
    }

    // ── retry policy ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_write_failure_is_retried_and_succeeds() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        channel.fail_next_write();
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let orch = orchestrator(channel.clone(), ledger, MockCache::new());

        let descriptor = orch.get_or_create(7).await.unwrap();

        assert_eq!(channel.client_entries(&test_server())[0].0, descriptor.identity_id);
        // First write failed, second succeeded.
        assert_eq!(channel.write_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_server_is_retried_with_backoff() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        // Two timeouts, then the server comes back.
        channel.fail_reads(2);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let orch = orchestrator(channel.clone(), ledger, MockCache::new());

        let descriptor = orch.get_or_create(7).await.unwrap();

        assert_eq!(channel.client_entries(&test_server())[0].0, descriptor.identity_id);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        // More consecutive timeouts than the policy allows attempts.
        channel.fail_reads(10);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let orch = orchestrator(channel.clone(), ledger, MockCache::new());

        let err = orch.get_or_create(7).await.unwrap_err();

        assert!(matches!(err, Error::Unreachable { .. }));
        assert_eq!(channel.write_count(), 0);
    }

    #[tokio::test]
    async fn reload_failure_is_not_retried() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        channel.set_reload_status(1);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let orch = orchestrator(channel.clone(), ledger, MockCache::new());

        let err = orch.get_or_create(7).await.unwrap_err();

        assert!(matches!(err, Error::Reload { .. }));
        assert_eq!(channel.write_count(), 1);
    }

    // ── revoke ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn revoke_clears_remote_entry_and_cache() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        let ledger = MockLedger::new();
        ledger.set_active(7);
        let cache = MockCache::new();
        let orch = orchestrator(channel.clone(), ledger, cache.clone());

        orch.get_or_create(7).await.unwrap();
        let removed = orch.revoke(7).await.unwrap();

        assert!(removed);
        assert!(channel.client_entries(&test_server()).is_empty());
        assert!(cache.stored(7).is_none());
    }

    #[tokio::test]
    async fn revoke_of_unknown_user_is_a_noop() {
        let channel = MockChannel::new();
        seed_empty(&channel);
        let orch = orchestrator(channel.clone(), MockLedger::new(), MockCache::new());

        let removed = orch.revoke(99).await.unwrap();

        assert!(!removed);
        assert_eq!(channel.write_count(), 0);
    }
}
