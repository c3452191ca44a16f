//! Stdio connector for child-process servers
//!
//! [`StdioConnector`] spawns a server process (by default the current
//! `querywire` binary with `serve --stdio`) and hands its stdout/stdin pipes
//! to the RPC engine as a [`Connection`].
//!
//! # Protocol
//!
//! - Outbound frames are written to the child's stdin.
//! - Inbound frames are read from the child's stdout.
//! - The child's stderr carries its logs only; lines are forwarded to
//!   `tracing::debug!` and never treated as errors.
//!
//! # Lifecycle
//!
//! The child is spawned with `kill_on_drop`, and the [`Connection`] owns it,
//! so the process ends when the session drops the connection. Each reconnect
//! spawns a fresh child.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{QuerywireError, Result};
use crate::mcp::transport::{Connection, Connector};

/// Spawns a child server and connects to it over stdio.
///
/// # Examples
///
/// ```no_run
/// use querywire::mcp::transport::{stdio::StdioConnector, Connector};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let connector = StdioConnector::for_current_exe("data.db")?;
/// let conn = connector.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StdioConnector {
    executable: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
}

impl StdioConnector {
    /// Run `executable` with `args`.
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
            env: HashMap::new(),
            working_dir: None,
        }
    }

    /// Run this binary as `querywire serve --stdio --database <path>`.
    ///
    /// # Errors
    ///
    /// Returns [`QuerywireError::Transport`] if the current executable path
    /// cannot be determined.
    pub fn for_current_exe(database: impl Into<String>) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            QuerywireError::Transport(format!("cannot locate querywire executable: {e}"))
        })?;
        Ok(Self::new(
            exe,
            vec![
                "serve".into(),
                "--stdio".into(),
                "--database".into(),
                database.into(),
            ],
        ))
    }

    /// Add an environment variable for the child. The parent environment is
    /// inherited.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl Connector for StdioConnector {
    async fn connect(&self) -> Result<Connection> {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            QuerywireError::Transport(format!(
                "failed to spawn `{}`: {e}",
                self.executable.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| QuerywireError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            QuerywireError::Transport("child stdout unavailable after spawn".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            QuerywireError::Transport("child stderr unavailable after spawn".into())
        })?;

        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(?pid, "child stderr: {line}");
            }
        });

        tracing::info!(?pid, executable = %self.executable.display(), "spawned stdio server");
        Ok(Connection::new(stdout, stdin, self.endpoint()).with_child(child))
    }

    fn endpoint(&self) -> String {
        format!("stdio:{}", self.executable.display())
    }
}
