//! Production management channel: the system `ssh` binary
//!
//! Each operation is one short-lived `ssh` invocation authenticated by the
//! server's private key, spawned with `tokio::process` and bounded by a
//! wall-clock timeout. `kill_on_drop` guarantees a timed-out invocation does
//! not linger.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use neor_types::ServerDescriptor;

use crate::traits::{ChannelError, ExecOutput, ManagementChannel};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Management channel backed by the system `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshChannel {
    timeout: Duration,
}

impl Default for SshChannel {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl SshChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn command(&self, server: &ServerDescriptor, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&server.private_key_path)
            .arg("-p")
            .arg(server.management_port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.timeout.as_secs()))
            .arg(format!("{}@{}", server.management_user, server.host))
            .arg("--")
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run to completion within the timeout, or kill on drop.
    async fn run(&self, mut cmd: Command) -> Result<std::process::Output, ChannelError> {
        let child = cmd
            .spawn()
            .map_err(|e| ChannelError::Connect(format!("failed to spawn ssh: {e}")))?;
        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ChannelError::Io(e.to_string())),
            Err(_) => Err(ChannelError::Timeout(self.timeout)),
        }
    }
}

impl ManagementChannel for SshChannel {
    async fn read_file(
        &self,
        server: &ServerDescriptor,
        path: &str,
    ) -> Result<Vec<u8>, ChannelError> {
        let output = self
            .run(self.command(server, &format!("cat {}", sh_quote(path))))
            .await?;
        if !output.status.success() {
            return Err(ChannelError::Command {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        tracing::debug!(server = %server.name, path, bytes = output.stdout.len(), "read remote file");
        Ok(output.stdout)
    }

    async fn write_file(
        &self,
        server: &ServerDescriptor,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ChannelError> {
        let mut cmd = self.command(server, &format!("cat > {}", sh_quote(path)));
        cmd.stdin(Stdio::piped());
        let output = stream_to_child(cmd, contents, self.timeout).await?;
        if !output.status.success() {
            return Err(ChannelError::Command {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        tracing::debug!(server = %server.name, path, bytes = contents.len(), "wrote remote file");
        Ok(())
    }

    async fn exec(
        &self,
        server: &ServerDescriptor,
        command: &str,
    ) -> Result<ExecOutput, ChannelError> {
        let output = self.run(self.command(server, command)).await?;
        let out = ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(server = %server.name, command, status = out.status, "ran remote command");
        Ok(out)
    }
}

/// Spawn `cmd`, stream `contents` to its stdin, and collect its output.
///
/// The whole interaction — stdin transfer included — runs under a single
/// wall-clock timeout. A peer that stops draining the pipe mid-transfer
/// would otherwise park `write_all` forever once the payload exceeds the
/// pipe buffer, and the caller may be holding a per-server lock.
/// On elapse the child is dropped, which kills it.
async fn stream_to_child(
    mut cmd: Command,
    contents: &[u8],
    timeout: Duration,
) -> Result<std::process::Output, ChannelError> {
    let mut child = cmd
        .spawn()
        .map_err(|e| ChannelError::Connect(format!("failed to spawn ssh: {e}")))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ChannelError::Io("ssh stdin unavailable".to_string()))?;

    let transfer = async {
        stdin.write_all(contents).await?;
        drop(stdin);
        child.wait_with_output().await
    };
    match tokio::time::timeout(timeout, transfer).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(ChannelError::Io(e.to_string())),
        Err(_) => Err(ChannelError::Timeout(timeout)),
    }
}

/// Single-quote a path for the remote shell.
pub(crate) fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_survives_embedded_single_quotes() {
        assert_eq!(sh_quote("/etc/xray/config.json"), "'/etc/xray/config.json'");
        assert_eq!(sh_quote("/tmp/o'brien"), r"'/tmp/o'\''brien'");
    }

    fn piped(program: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    #[tokio::test]
    async fn transfer_completes_within_timeout() {
        let out = stream_to_child(piped("cat", &[]), b"hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, b"hello");
        assert_eq!(out.status.code(), Some(0));
    }

    #[tokio::test]
    async fn stalled_transfer_times_out_instead_of_hanging() {
        // `sleep` never drains stdin; a payload larger than the pipe buffer
        // parks the write until the timeout fires.
        let payload = vec![0u8; 4 * 1024 * 1024];
        let err = stream_to_child(piped("sleep", &["30"]), &payload, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }
}
