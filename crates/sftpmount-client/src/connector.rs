//! Endpoints that yield a duplex byte stream.
//!
//! The stream is assumed to be already authenticated and encrypted; in the
//! usual deployment it is the stdin/stdout of `ssh -s sftp` or of a local
//! `sftp-server`.

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Boxed read half of a connection.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A freshly established byte stream.
pub struct Connection {
    pub reader: BoxReader,
    pub writer: BoxWriter,
    /// The spawned endpoint, if any. Dropping it kills the process.
    pub child: Option<Child>,
    /// Human-readable description for logs.
    pub peer: String,
}

impl Connection {
    pub fn new(reader: BoxReader, writer: BoxWriter, peer: impl Into<String>) -> Self {
        Self {
            reader,
            writer,
            child: None,
            peer: peer.into(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("pid", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Source of connections. Called once at mount and again on every reconnect.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> io::Result<Connection>;
}

/// Spawns a command and speaks over its stdin/stdout.
#[derive(Debug, Clone)]
pub struct CommandConnector {
    program: String,
    args: Vec<String>,
}

impl CommandConnector {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds a connector from a full command line, program first.
    pub fn from_argv(argv: &[String]) -> io::Result<Self> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty endpoint command")
        })?;
        Ok(Self::new(program.clone(), args.iter().cloned()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Connector for CommandConnector {
    async fn connect(&self) -> io::Result<Connection> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("endpoint stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("endpoint stdout not captured"))?;

        tracing::debug!(program = %self.program, pid = ?child.id(), "Spawned endpoint");

        Ok(Connection {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            peer: format!("{} (pid {})", self.program, child.id().unwrap_or_default()),
            child: Some(child),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_argv_splits_program() {
        let argv = vec!["ssh".to_string(), "-s".into(), "host".into(), "sftp".into()];
        let connector = CommandConnector::from_argv(&argv).unwrap();
        assert_eq!(connector.program(), "ssh");
        assert_eq!(connector.args, vec!["-s", "host", "sftp"]);
    }

    #[test]
    fn test_from_argv_rejects_empty() {
        let err = CommandConnector::from_argv(&[]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_connect() {
        let connector = CommandConnector::new("/nonexistent/sftp-endpoint", Vec::<String>::new());
        assert!(connector.connect().await.is_err());
    }
}
