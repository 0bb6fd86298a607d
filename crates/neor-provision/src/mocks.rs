//! Mock implementations for unit testing without a real server or database.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! neor-provision = { path = "...", features = ["test-support"] }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicI32, AtomicUsize, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};

use neor_types::{ConnectionDescriptor, RemoteConfigDocument, ServerDescriptor};

use crate::traits::{ChannelError, ConfigCache, ExecOutput, ManagementChannel, SubscriptionLedger};

/// A `ServerDescriptor` every mock-based test shares.
pub fn test_server() -> ServerDescriptor {
    ServerDescriptor {
        name: "mock-1".to_string(),
        host: "192.0.2.1".to_string(),
        management_port: 22,
        management_user: "vpnadmin".to_string(),
        private_key_path: "/tmp/mock-key".to_string(),
        remote_config_path: "/usr/local/etc/xray/config.json".to_string(),
        staging_path: "/tmp/xray-config.staged.json".to_string(),
        service_reload_command: "sudo systemctl restart xray".to_string(),
        protocol: "vless".to_string(),
        listen_port: 443,
        security: "reality".to_string(),
        flow_mode: "xtls-rprx-vision".to_string(),
        public_key: Some("mock-public-key".to_string()),
        fingerprint: Some("chrome".to_string()),
        sni: Some("cloudflare.com".to_string()),
        short_id: None,
        spider_x: Some("%2F".to_string()),
    }
}

// ── MockChannel ───────────────────────────────────────────────────────────────

/// In-memory management channel: a fake remote filesystem plus counters and
/// one-shot failure injection.
///
/// `exec` understands the two command shapes the store issues: `sudo mv A B`
/// moves a file within the fake filesystem; anything else counts as a
/// service reload and exits with the configured reload status.
#[derive(Clone, Default)]
pub struct MockChannel {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    read_count: Arc<AtomicUsize>,
    write_count: Arc<AtomicUsize>,
    reload_count: Arc<AtomicUsize>,
    pending_write_failures: Arc<AtomicUsize>,
    pending_read_failures: Arc<AtomicUsize>,
    reload_status: Arc<AtomicI32>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file on the fake remote filesystem.
    pub fn seed_file(&self, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// `(identity_id, email)` pairs in the live document's target inbound.
    pub fn client_entries(&self, server: &ServerDescriptor) -> Vec<(String, Option<String>)> {
        let Some(bytes) = self.file(&server.remote_config_path) else {
            return Vec::new();
        };
        let doc: RemoteConfigDocument = serde_json::from_slice(&bytes).unwrap();
        doc.target_inbound(&server.protocol)
            .and_then(|inbound| inbound.clients())
            .map(|clients| {
                clients
                    .iter()
                    .map(|c| (c.id.clone(), c.email.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn reload_count(&self) -> usize {
        self.reload_count.load(Ordering::SeqCst)
    }

    /// Make the next write fail (counted, then cleared).
    pub fn fail_next_write(&self) {
        self.fail_writes(1);
    }

    /// Make the next `n` writes fail.
    pub fn fail_writes(&self, n: usize) {
        self.pending_write_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` reads fail as unreachable.
    pub fn fail_reads(&self, n: usize) {
        self.pending_read_failures.store(n, Ordering::SeqCst);
    }

    /// Exit status future reload commands report.
    pub fn set_reload_status(&self, status: i32) {
        self.reload_status.store(status, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl ManagementChannel for MockChannel {
    async fn read_file(
        &self,
        _server: &ServerDescriptor,
        path: &str,
    ) -> Result<Vec<u8>, ChannelError> {
        if Self::take_failure(&self.pending_read_failures) {
            return Err(ChannelError::Timeout(Duration::from_secs(10)));
        }
        self.read_count.fetch_add(1, Ordering::SeqCst);
        self.file(path).ok_or_else(|| ChannelError::Command {
            status: 1,
            stderr: format!("cat: {path}: No such file or directory"),
        })
    }

    async fn write_file(
        &self,
        _server: &ServerDescriptor,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ChannelError> {
        self.write_count.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.pending_write_failures) {
            return Err(ChannelError::Io("injected write failure".to_string()));
        }
        self.seed_file(path, contents);
        Ok(())
    }

    async fn exec(
        &self,
        _server: &ServerDescriptor,
        command: &str,
    ) -> Result<ExecOutput, ChannelError> {
        if let Some(rest) = command.strip_prefix("sudo mv ") {
            let mut parts = rest.split_whitespace().map(unquote);
            let (Some(src), Some(dst)) = (parts.next(), parts.next()) else {
                return Ok(ExecOutput {
                    status: 64,
                    stderr: format!("mv: bad arguments: {rest}"),
                });
            };
            let mut files = self.files.lock().unwrap();
            return match files.remove(&src) {
                Some(contents) => {
                    files.insert(dst, contents);
                    Ok(ExecOutput {
                        status: 0,
                        stderr: String::new(),
                    })
                }
                None => Ok(ExecOutput {
                    status: 1,
                    stderr: format!("mv: cannot stat '{src}': No such file or directory"),
                }),
            };
        }

        // Anything else is the service reload.
        self.reload_count.fetch_add(1, Ordering::SeqCst);
        let status = self.reload_status.load(Ordering::SeqCst);
        Ok(ExecOutput {
            status,
            stderr: if status == 0 {
                String::new()
            } else {
                "injected reload failure".to_string()
            },
        })
    }
}

fn unquote(s: &str) -> String {
    s.trim_matches('\'').to_string()
}

// ── MockLedger ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct LedgerRow {
    active: bool,
    expires_at: Option<DateTime<Utc>>,
}

/// Controllable subscription ledger.
///
/// `BTreeMap` so `list_expired_active` returns users in ascending id order —
/// tests that inject per-call failures rely on a deterministic visit order.
#[derive(Clone, Default)]
pub struct MockLedger {
    rows: Arc<Mutex<BTreeMap<i64, LedgerRow>>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active subscription with a far-future expiry.
    pub fn set_active(&self, user_id: i64) {
        self.rows.lock().unwrap().insert(
            user_id,
            LedgerRow {
                active: true,
                expires_at: Some(Utc::now() + chrono::Duration::days(30)),
            },
        );
    }

    /// Active subscription that has already lapsed.
    pub fn set_expired_active(&self, user_id: i64) {
        self.rows.lock().unwrap().insert(
            user_id,
            LedgerRow {
                active: true,
                expires_at: Some(Utc::now() - chrono::Duration::days(1)),
            },
        );
    }

    pub fn active(&self, user_id: i64) -> bool {
        self.rows
            .lock()
            .unwrap()
            .get(&user_id)
            .is_some_and(|row| row.active)
    }
}

impl SubscriptionLedger for MockLedger {
    type Error = std::convert::Infallible;

    async fn is_active(&self, user_id: i64) -> Result<bool, Self::Error> {
        Ok(self.active(user_id))
    }

    async fn list_expired_active(&self) -> Result<Vec<i64>, Self::Error> {
        let now = Utc::now();
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, row)| row.active && row.expires_at.is_some_and(|t| t < now))
            .map(|(&user_id, _)| user_id)
            .collect())
    }

    async fn mark_inactive(&self, user_id: i64) -> Result<(), Self::Error> {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&user_id) {
            row.active = false;
            row.expires_at = None;
        }
        Ok(())
    }

    async fn extend(&self, user_id: i64, months: u32) -> Result<DateTime<Utc>, Self::Error> {
        let expires_at = Utc::now() + chrono::Duration::days(30 * i64::from(months));
        self.rows.lock().unwrap().insert(
            user_id,
            LedgerRow {
                active: true,
                expires_at: Some(expires_at),
            },
        );
        Ok(expires_at)
    }
}

// ── MockCache ─────────────────────────────────────────────────────────────────

/// In-memory config cache.
#[derive(Clone, Default)]
pub struct MockCache {
    entries: Arc<Mutex<HashMap<i64, ConnectionDescriptor>>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stored(&self, user_id: i64) -> Option<ConnectionDescriptor> {
        self.entries.lock().unwrap().get(&user_id).cloned()
    }
}

impl ConfigCache for MockCache {
    type Error = std::convert::Infallible;

    async fn get(&self, user_id: i64) -> Result<Option<ConnectionDescriptor>, Self::Error> {
        Ok(self.stored(user_id))
    }

    async fn put(
        &self,
        user_id: i64,
        descriptor: &ConnectionDescriptor,
    ) -> Result<(), Self::Error> {
        self.entries
            .lock()
            .unwrap()
            .insert(user_id, descriptor.clone());
        Ok(())
    }

    async fn delete(&self, user_id: i64) -> Result<(), Self::Error> {
        self.entries.lock().unwrap().remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `extend` is the consumption point for payment events — a paid user
    // must come out active and no longer show up in the expiry sweep.
    #[tokio::test]
    async fn extend_activates_and_clears_expiry() {
        let ledger = MockLedger::new();
        ledger.set_expired_active(7);
        assert_eq!(ledger.list_expired_active().await.unwrap(), vec![7]);

        let expires_at = ledger.extend(7, 6).await.unwrap();

        assert!(expires_at > Utc::now());
        assert!(ledger.is_active(7).await.unwrap());
        assert!(ledger.list_expired_active().await.unwrap().is_empty());
    }
}
