//! # neor-provision
//!
//! Credential provisioning and reconciliation for NEOR VPN servers.
//!
//! ## What it does
//!
//! - Provisions per-user VLESS credentials on remote Xray servers by
//!   rewriting the server's config document over SSH and reloading the
//!   service — idempotently, so a retry after a timeout of unknown outcome
//!   is always safe.
//! - Caches the issued connection link per user so repeated requests never
//!   trigger redundant remote mutations.
//! - Sweeps lapsed subscriptions in the background, revoking their
//!   credentials and marking them inactive — remote state first, ledger
//!   second.
//!
//! ## Layout
//!
//! [`ConfigOrchestrator`] is the per-user entry point; [`ExpirySweeper`] is
//! the background loop. Both funnel into [`CredentialProvisioner`], the
//! single choke point that serializes mutation of each server's document.
//! [`RemoteConfigStore`] does the staging-write / atomic-replace / reload
//! dance over a [`ManagementChannel`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use neor_provision::{
//!     ConfigOrchestrator, CredentialProvisioner, RemoteConfigStore, SshChannel,
//!     pg::{PgConfigCache, PgSubscriptionLedger},
//! };
//!
//! # async fn example(server: neor_types::ServerDescriptor) -> anyhow::Result<()> {
//! let pool = sqlx::PgPool::connect("postgres://localhost/neor").await?;
//! let provisioner =
//!     CredentialProvisioner::new(RemoteConfigStore::new(SshChannel::default()));
//! let orchestrator = ConfigOrchestrator::new(
//!     provisioner,
//!     PgSubscriptionLedger::new(pool.clone()),
//!     PgConfigCache::new(pool),
//!     server,
//!     "neor.vpn",
//! );
//! let link = orchestrator.get_or_create(42).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pg;
pub mod provisioner;
pub mod ssh;
pub mod store;
pub mod sweeper;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use config::{ConfigError, ServiceConfig};
pub use error::{Error, Result};
pub use orchestrator::{ConfigOrchestrator, RetryPolicy};
pub use provisioner::CredentialProvisioner;
pub use ssh::SshChannel;
pub use store::RemoteConfigStore;
pub use sweeper::{CycleStats, ExpirySweeper};
pub use traits::{ChannelError, ConfigCache, ExecOutput, ManagementChannel, SubscriptionLedger};
