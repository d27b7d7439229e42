//! Child-process transport for MCP servers.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::error::{Error, Result};

/// Maximum size of a single response line (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Launch parameters plus the live stdio streams of one server subprocess.
///
/// A transport starts out closed; `connect` spawns the subprocess and pipes
/// its stdio, and `cleanup` tears everything down. Because the launch
/// parameters are retained, a cleaned-up transport can be connected again.
#[derive(Debug)]
pub struct Transport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    io: Option<TransportIo>,
}

#[derive(Debug)]
struct TransportIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Transport {
    /// Create a closed transport for the given launch command.
    ///
    /// Environment entries are layered on top of the inherited parent
    /// environment rather than replacing it.
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            io: None,
        }
    }

    /// Whether a live subprocess stream is currently held.
    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Spawn the server subprocess and open its duplex stdio stream.
    ///
    /// On any failure the partially spawned process is released before the
    /// error is returned; `kill_on_drop` guarantees the subprocess does not
    /// outlive the handle on any exit path.
    pub async fn connect(&mut self) -> Result<()> {
        if self.io.is_some() {
            return Ok(());
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                let _ = child.kill().await;
                return Err(Error::Io(std::io::Error::other("failed to capture stdin")));
            }
        };

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill().await;
                return Err(Error::Io(std::io::Error::other("failed to capture stdout")));
            }
        };

        debug!(command = %self.command, "transport connected");
        self.io = Some(TransportIo {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });

        Ok(())
    }

    /// Write one line to the server's stdin.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let io = self.io.as_mut().ok_or(Error::TransportClosed)?;
        io.stdin.write_all(line.as_bytes()).await?;
        io.stdin.write_all(b"\n").await?;
        io.stdin.flush().await?;
        Ok(())
    }

    /// Read one line from the server's stdout.
    pub async fn read_line(&mut self) -> Result<String> {
        let io = self.io.as_mut().ok_or(Error::TransportClosed)?;

        let mut line = String::new();
        let bytes_read = io.stdout.read_line(&mut line).await?;
        if bytes_read == 0 {
            return Err(Error::ServerExited);
        }

        if line.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: line.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }

        Ok(line)
    }

    /// Release the stream and the subprocess.
    ///
    /// Safe to call multiple times or before `connect`; once cleaned up, no
    /// stream is reachable until the next `connect`.
    pub async fn cleanup(&mut self) {
        if let Some(mut io) = self.io.take() {
            let _ = io.child.kill().await;
            debug!(command = %self.command, "transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let mut transport = Transport::new("true", vec![], HashMap::new());
        transport.cleanup().await;
        transport.cleanup().await;
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn connect_failure_leaves_transport_closed() {
        let mut transport =
            Transport::new("definitely-not-a-real-binary-4d2a", vec![], HashMap::new());
        let result = transport.connect().await;
        assert!(result.is_err());
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn closed_transport_rejects_io() {
        let mut transport = Transport::new("true", vec![], HashMap::new());
        assert!(matches!(
            transport.send_line("{}").await,
            Err(Error::TransportClosed)
        ));
        assert!(matches!(
            transport.read_line().await,
            Err(Error::TransportClosed)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn connect_and_cleanup_round_trip() {
        let mut transport = Transport::new(
            "sh",
            vec!["-c".to_string(), "cat".to_string()],
            HashMap::new(),
        );
        transport.connect().await.unwrap();
        assert!(transport.is_open());

        transport.send_line("hello").await.unwrap();
        let line = transport.read_line().await.unwrap();
        assert_eq!(line.trim(), "hello");

        transport.cleanup().await;
        assert!(!transport.is_open());
        transport.cleanup().await;
    }
}
