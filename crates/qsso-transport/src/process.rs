//! Child-process transport: the language server speaks JSON-RPC on its
//! stdin/stdout. An optional preamble line is written to stdin before any
//! framed traffic.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionOptions, RpcConnection};
use crate::error::TransportError;

const EXIT_GRACE: Duration = Duration::from_secs(5);

pub struct ServerProcess {
    child: Child,
    connection: RpcConnection,
}

impl ServerProcess {
    /// Spawn `program`, send `preamble` (newline-terminated) and start the
    /// connection on the child's pipes.
    pub async fn spawn<I, S>(
        program: &OsStr,
        args: I,
        preamble: Option<&[u8]>,
        options: ConnectionOptions,
    ) -> Result<Self, TransportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        info!(program = ?program, pid = ?child.id(), "language server started");

        let mut stdin = child.stdin.take().ok_or(TransportError::Disconnected)?;
        let stdout = child.stdout.take().ok_or(TransportError::Disconnected)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        if let Some(preamble) = preamble {
            stdin.write_all(preamble).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await?;
        }

        let connection = RpcConnection::start(stdout, stdin, options);
        Ok(Self { child, connection })
    }

    pub fn connection(&self) -> &RpcConnection {
        &self.connection
    }

    /// `shutdown` request, `exit` notification, then wait briefly before
    /// killing the child.
    pub async fn shutdown(mut self) -> Result<(), TransportError> {
        if self.connection.is_connected() {
            if let Err(e) = self.connection.request("shutdown", json!(null), None).await {
                debug!(error = %e, "shutdown request failed");
            }
            if let Err(e) = self.connection.notify("exit", &json!(null)) {
                debug!(error = %e, "exit notification failed");
            }
        }

        match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(%status, "language server exited");
            }
            Err(_) => {
                warn!("language server did not exit, killing it");
                self.child.kill().await?;
            }
        }
        self.connection.close();
        Ok(())
    }
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "qsso::server", "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "stderr closed");
                break;
            }
        }
    }
}
