pub mod cat;
pub mod ls;
pub mod mkdir;
pub mod mv;
pub mod readlink;
pub mod rm;
pub mod stat;
pub mod tree;

use anyhow::{Result, bail};
use sftpmount_vfs::{DirEntry, FsResult, NodeAttr, ROOT_INO, SftpFs};

/// Normalize a remote path to ensure it starts with `/`.
/// This makes paths like `notes.txt` work the same as `/notes.txt`.
pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Resolves a mount-relative path by looking up each component.
pub async fn resolve(fs: &SftpFs, path: &str) -> FsResult<NodeAttr> {
    let mut attr = fs.getattr(ROOT_INO).await?;
    for name in path.split('/').filter(|s| !s.is_empty() && *s != ".") {
        attr = fs.lookup(attr.ino, name).await?;
    }
    Ok(attr)
}

/// Splits `path` into its parent directory and final name.
pub fn split_parent(path: &str) -> Result<(String, String)> {
    let normalized = normalize_path(path);
    let trimmed = normalized.trim_end_matches('/');
    let Some((parent, name)) = trimmed.rsplit_once('/') else {
        bail!("Path has no parent: {path}");
    };
    if name.is_empty() {
        bail!("Path has no final component: {path}");
    }
    let parent = if parent.is_empty() { "/" } else { parent };
    Ok((parent.to_string(), name.to_string()))
}

/// Resolves the parent of `path`, returning its inode and the final name.
pub async fn resolve_parent(fs: &SftpFs, path: &str) -> Result<(u64, String)> {
    let (parent, name) = split_parent(path)?;
    let attr = resolve(fs, &parent).await?;
    Ok((attr.ino, name))
}

/// Every entry of a directory, following cursors until the end.
pub async fn list_dir(fs: &SftpFs, dir: u64) -> FsResult<Vec<DirEntry>> {
    let mut entries = fs.readdir(dir, 0).await?;
    loop {
        let Some(cursor) = entries.last().map(|e| e.next_cursor) else {
            break;
        };
        let more = fs.readdir(dir, cursor).await?;
        if more.is_empty() {
            break;
        }
        entries.extend(more);
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sftpmount_client::testing::MemoryServer;
    use sftpmount_vfs::MountConfig;

    pub(crate) async fn mount(server: &MemoryServer) -> SftpFs {
        SftpFs::mount(server.connector(), MountConfig::default().remote_root("/"))
            .await
            .unwrap()
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(
            split_parent("/a/b/c").unwrap(),
            ("/a/b".to_string(), "c".to_string())
        );
        assert_eq!(
            split_parent("top").unwrap(),
            ("/".to_string(), "top".to_string())
        );
        assert_eq!(
            split_parent("/dir/").unwrap(),
            ("/".to_string(), "dir".to_string())
        );
        assert!(split_parent("/").is_err());
    }

    #[tokio::test]
    async fn test_resolve_walks_components() {
        let server = MemoryServer::new();
        server.add_dir("/a");
        server.add_file("/a/b.txt", b"hello");
        let fs = mount(&server).await;

        let attr = resolve(&fs, "/a/./b.txt").await.unwrap();
        assert_eq!(attr.size, 5);
        assert!(resolve(&fs, "/a/missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_dir_follows_cursor_and_sorts() {
        let server = MemoryServer::new();
        for i in (0..120).rev() {
            server.add_file(&format!("/f{i:03}"), b"");
        }
        let fs = mount(&server).await;

        let entries = list_dir(&fs, ROOT_INO).await.unwrap();
        assert_eq!(entries.len(), 120);
        assert_eq!(entries[0].name, "f000");
        assert_eq!(entries[119].name, "f119");
    }
}
