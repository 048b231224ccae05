//! A filesystem mounted on an in-memory SFTP server.

use parking_lot::Mutex;
use sftpmount_client::ReconnectPolicy;
use sftpmount_client::testing::MemoryServer;
use sftpmount_vfs::{FsResult, MountConfig, NodeAttr, Notifier, OpenMode, ROOT_INO, SftpFs};
use std::sync::Arc;
use std::time::Duration;

/// Mount configuration for tests: root at `/`, quick reconnects.
pub fn test_config() -> MountConfig {
    MountConfig::default()
        .remote_root("/")
        .cache_ttl(Duration::from_secs(30))
        .reconnect(ReconnectPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        })
}

/// Records every invalidation it receives.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub data: Mutex<Vec<u64>>,
    pub entries: Mutex<Vec<(u64, String)>>,
}

impl Notifier for RecordingNotifier {
    fn invalidate_data(&self, ino: u64) {
        self.data.lock().push(ino);
    }

    fn invalidate_entry(&self, parent: u64, name: &str) {
        self.entries.lock().push((parent, name.to_string()));
    }
}

/// A mounted filesystem together with the server behind it.
pub struct TestMount {
    pub server: MemoryServer,
    pub fs: SftpFs,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestMount {
    pub async fn new(server: &MemoryServer) -> Self {
        Self::with_config(server, test_config()).await
    }

    pub async fn with_config(server: &MemoryServer, config: MountConfig) -> Self {
        let notifier = Arc::new(RecordingNotifier::default());
        let fs = SftpFs::mount_with_notifier(server.connector(), config, notifier.clone())
            .await
            .expect("mount failed");
        Self {
            server: server.clone(),
            fs,
            notifier,
        }
    }

    /// Resolves an absolute path by looking up each component.
    pub async fn resolve(&self, path: &str) -> FsResult<NodeAttr> {
        let mut attr = self.fs.getattr(ROOT_INO).await?;
        for name in path.split('/').filter(|s| !s.is_empty()) {
            attr = self.fs.lookup(attr.ino, name).await?;
        }
        Ok(attr)
    }

    pub async fn ino(&self, path: &str) -> u64 {
        self.resolve(path).await.expect("resolve failed").ino
    }

    /// Opens, reads the whole file, and releases.
    pub async fn read_all(&self, ino: u64) -> Vec<u8> {
        self.fs
            .open(ino, OpenMode::ReadOnly, false)
            .await
            .expect("open failed");
        let mut out = Vec::new();
        loop {
            let offset = out.len() as u64;
            let chunk = self.fs.read(ino, offset, 64 * 1024).await.expect("read failed");
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        self.fs
            .release(ino, OpenMode::ReadOnly)
            .await
            .expect("release failed");
        out
    }

    /// Requests the server has seen since the last reset.
    pub fn requests(&self) -> usize {
        self.server.total_requests()
    }
}
