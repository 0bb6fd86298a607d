//! Remote config document fetch and atomic commit

use neor_types::{RemoteConfigDocument, ServerDescriptor};

use crate::error::{Error, Result};
use crate::ssh::sh_quote;
use crate::traits::{ChannelError, ManagementChannel};

/// Reads and rewrites one server's config document over a management channel.
///
/// `commit` is atomic from the point of view of any concurrent reader of the
/// live path: the serialized document goes to a staging path first and is
/// then moved into place with `mv` (a rename on the same filesystem), so the
/// live file is never observed half-written. The service reload that follows
/// is NOT instantaneous — the new client list becomes externally observable
/// some time after `commit` returns, never before.
#[derive(Debug, Clone)]
pub struct RemoteConfigStore<C> {
    channel: C,
}

impl<C: ManagementChannel> RemoteConfigStore<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Fetch and parse the live config document.
    ///
    /// A read command that runs but exits non-zero (missing or unreadable
    /// config file) is a structural problem with the document, not a
    /// transport failure, so it is not worth retrying as `Unreachable`.
    pub async fn fetch(&self, server: &ServerDescriptor) -> Result<RemoteConfigDocument> {
        let bytes = self
            .channel
            .read_file(server, &server.remote_config_path)
            .await
            .map_err(|e| match e {
                ChannelError::Command { status, stderr } => Error::MalformedDocument {
                    server: server.name.clone(),
                    reason: format!("failed to read config (status {status}): {stderr}"),
                },
                other => Error::Unreachable {
                    server: server.name.clone(),
                    reason: other.to_string(),
                },
            })?;
        serde_json::from_slice(&bytes).map_err(|e| Error::MalformedDocument {
            server: server.name.clone(),
            reason: e.to_string(),
        })
    }

    /// Write the document to staging, atomically replace the live path, and
    /// reload the service.
    ///
    /// Error classification follows the taxonomy: channel timeouts and
    /// connection failures at any step are `Unreachable` (outcome unknown);
    /// staging/replace failures are `Write` (live document intact); a
    /// non-zero reload is `Reload` (live document replaced, service
    /// divergent).
    pub async fn commit(
        &self,
        server: &ServerDescriptor,
        document: &RemoteConfigDocument,
    ) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(document).map_err(|e| Error::Write {
            server: server.name.clone(),
            reason: format!("failed to serialize document: {e}"),
        })?;

        self.channel
            .write_file(server, &server.staging_path, &bytes)
            .await
            .map_err(|e| write_step_error(server, e))?;

        let replace = format!(
            "sudo mv {} {}",
            sh_quote(&server.staging_path),
            sh_quote(&server.remote_config_path)
        );
        let out = self
            .channel
            .exec(server, &replace)
            .await
            .map_err(|e| write_step_error(server, e))?;
        if !out.success() {
            return Err(Error::Write {
                server: server.name.clone(),
                reason: format!("replace exited with status {}: {}", out.status, out.stderr),
            });
        }

        let out = self
            .channel
            .exec(server, &server.service_reload_command)
            .await
            .map_err(|e| write_step_error(server, e))?;
        if !out.success() {
            // The file is already replaced; this is the divergent state the
            // caller must alert on rather than blindly retry.
            return Err(Error::Reload {
                server: server.name.clone(),
                status: out.status,
                stderr: out.stderr,
            });
        }

        tracing::info!(server = %server.name, bytes = bytes.len(), "committed config document");
        Ok(())
    }
}

fn write_step_error(server: &ServerDescriptor, e: ChannelError) -> Error {
    if e.is_unreachable() {
        Error::Unreachable {
            server: server.name.clone(),
            reason: e.to_string(),
        }
    } else {
        Error::Write {
            server: server.name.clone(),
            reason: e.to_string(),
        }
    }
}
