//! Error taxonomy for provisioning operations

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Every way a provisioning operation can fail.
///
/// The split that matters operationally is transient vs structural:
/// transient failures ([`Error::Unreachable`], [`Error::Write`]) are safe to
/// retry because `add`/`remove` are idempotent, while structural failures
/// ([`Error::MalformedDocument`], [`Error::SectionNotFound`]) stay broken
/// until someone fixes the server and must not be retried blindly.
/// [`Error::Reload`] is its own category: the document was replaced but the
/// running service did not pick it up, so file and process have diverged.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection, auth, or timeout failure on the management channel.
    /// A timeout means the outcome is UNKNOWN, not failed.
    #[error("server {server} unreachable: {reason}")]
    Unreachable { server: String, reason: String },

    /// The remote document does not match the expected schema.
    #[error("malformed config document on {server}: {reason}")]
    MalformedDocument { server: String, reason: String },

    /// No inbound section with the expected protocol tag.
    #[error("no {protocol} inbound section in config on {server}")]
    SectionNotFound { server: String, protocol: String },

    /// Staging write or atomic replace failed; the live document is intact.
    #[error("failed to write config on {server}: {reason}")]
    Write { server: String, reason: String },

    /// Document replaced but the reload command exited non-zero — the file
    /// and the running service now disagree.
    #[error("config replaced on {server} but reload exited with status {status}: {stderr}")]
    Reload {
        server: String,
        status: i32,
        stderr: String,
    },

    /// The user has no active subscription. Expected, user-facing.
    #[error("no active subscription for user {0}")]
    SubscriptionInactive(i64),

    /// Config cache backend failure.
    #[error("config cache error: {0}")]
    Cache(String),

    /// Subscription ledger backend failure.
    #[error("subscription ledger error: {0}")]
    Ledger(String),
}

impl Error {
    /// Whether retrying the same operation can succeed without operator
    /// intervention. Relies on the provisioner's idempotence guarantees.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable { .. } | Self::Write { .. })
    }

    /// Short stable tag for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::MalformedDocument { .. } => "malformed_document",
            Self::SectionNotFound { .. } => "section_not_found",
            Self::Write { .. } => "write",
            Self::Reload { .. } => "reload",
            Self::SubscriptionInactive(_) => "subscription_inactive",
            Self::Cache(_) => "cache",
            Self::Ledger(_) => "ledger",
        }
    }
}
