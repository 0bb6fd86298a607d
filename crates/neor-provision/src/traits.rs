//! Trait seams between the reconciliation core and its collaborators
//!
//! Each seam has one production implementation ([`crate::ssh::SshChannel`],
//! [`crate::pg`]) and one mock ([`crate::mocks`]).

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use neor_types::{ConnectionDescriptor, ServerDescriptor};

/// Failure of a single management-channel operation.
///
/// A concrete type (not an associated one) on purpose: the config store must
/// classify channel failures into the retry taxonomy — a timeout is
/// "outcome unknown", never "assume failure" — and that classification
/// cannot be done through an opaque error.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Could not establish or authenticate the connection.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The operation did not complete in time. Outcome unknown.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// Data transfer failed mid-operation.
    #[error("remote i/o failed: {0}")]
    Io(String),
    /// The remote command ran and exited non-zero.
    #[error("remote command exited with status {status}: {stderr}")]
    Command { status: i32, stderr: String },
}

impl ChannelError {
    /// Timeouts and connection failures leave the remote state unknown;
    /// the caller maps these to `Unreachable` and relies on idempotent retry.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout(_))
    }
}

/// Exit status and captured stderr of a remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub status: i32,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Remote management channel of one proxy server: file read, file write,
/// command execution. Authenticated by a private key; every operation has a
/// timeout.
pub trait ManagementChannel: Send + Sync + Clone + 'static {
    /// Read the full contents of a remote file.
    fn read_file(
        &self,
        server: &ServerDescriptor,
        path: &str,
    ) -> impl Future<Output = Result<Vec<u8>, ChannelError>> + Send;

    /// Replace the contents of a remote file (creating it if absent).
    fn write_file(
        &self,
        server: &ServerDescriptor,
        path: &str,
        contents: &[u8],
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Run a shell command on the remote host. `Ok` means the command ran to
    /// completion — inspect [`ExecOutput::status`] for its verdict.
    fn exec(
        &self,
        server: &ServerDescriptor,
        command: &str,
    ) -> impl Future<Output = Result<ExecOutput, ChannelError>> + Send;
}

/// Subscription state per user. Consumed, never owned, by this service.
pub trait SubscriptionLedger: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn is_active(&self, user_id: i64) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Users whose subscription is still marked active but has lapsed.
    fn list_expired_active(&self) -> impl Future<Output = Result<Vec<i64>, Self::Error>> + Send;

    fn mark_inactive(&self, user_id: i64)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Extend (or start) a subscription by N months. The consumption point
    /// for "payment succeeded" events; returns the new expiry.
    fn extend(
        &self,
        user_id: i64,
        months: u32,
    ) -> impl Future<Output = Result<DateTime<Utc>, Self::Error>> + Send;
}

/// Last-issued connection descriptor per user.
pub trait ConfigCache: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync;

    fn get(
        &self,
        user_id: i64,
    ) -> impl Future<Output = Result<Option<ConnectionDescriptor>, Self::Error>> + Send;

    fn put(
        &self,
        user_id: i64,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn delete(&self, user_id: i64) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
