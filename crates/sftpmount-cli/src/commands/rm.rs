use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::SftpFs;

use super::{list_dir, normalize_path, resolve_parent};

#[derive(ClapArgs)]
pub struct Args {
    /// Path to remove
    pub path: String,

    /// Remove directories and their contents recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Ignore nonexistent paths
    #[arg(short, long)]
    pub force: bool,
}

/// Counts of what a recursive removal deleted.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RemoveStats {
    pub files: usize,
    pub directories: usize,
}

#[instrument(level = "info", name = "cmd::rm", skip_all, fields(path = %args.path, recursive = args.recursive))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let (parent, name) = resolve_parent(fs, &path).await?;
    let attr = match fs.lookup(parent, &name).await {
        Ok(attr) => attr,
        Err(e) if e.is_not_found() && args.force => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if attr.kind != FileKind::Directory {
        fs.remove(parent, &name).await?;
        return Ok(());
    }
    if !args.recursive {
        fs.rmdir(parent, &name).await?;
        return Ok(());
    }
    let mut stats = RemoveStats::default();
    remove_tree(fs, parent, &name, attr.ino, &mut stats).await?;
    eprintln!(
        "Deleted {} files and {} directories",
        stats.files, stats.directories
    );
    Ok(())
}

/// Removes the directory `parent/name` (inode `dir`) and everything below it.
pub async fn remove_tree(
    fs: &SftpFs,
    parent: u64,
    name: &str,
    dir: u64,
    stats: &mut RemoveStats,
) -> Result<()> {
    // Depth-first with an explicit stack of directories still to empty.
    let mut stack = vec![(parent, name.to_string(), dir, false)];
    while let Some((parent, name, dir, emptied)) = stack.pop() {
        if emptied {
            fs.rmdir(parent, &name).await?;
            stats.directories += 1;
            continue;
        }
        stack.push((parent, name, dir, true));
        for entry in list_dir(fs, dir).await? {
            if entry.kind == FileKind::Directory {
                let child = fs.lookup(dir, &entry.name).await?;
                stack.push((dir, entry.name, child.ino, false));
            } else {
                fs.remove(dir, &entry.name).await?;
                stats.files += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::mount;
    use sftpmount_client::testing::MemoryServer;

    #[tokio::test]
    async fn test_recursive_remove() {
        let server = MemoryServer::new();
        server.add_dir("/top");
        server.add_dir("/top/sub");
        server.add_file("/top/a", b"1");
        server.add_file("/top/sub/b", b"2");
        server.add_symlink("/top/link", "a");
        let fs = mount(&server).await;

        let (parent, name) = resolve_parent(&fs, "/top").await.unwrap();
        let top = fs.lookup(parent, &name).await.unwrap();
        let mut stats = RemoveStats::default();
        remove_tree(&fs, parent, &name, top.ino, &mut stats)
            .await
            .unwrap();

        assert_eq!(
            stats,
            RemoveStats {
                files: 3,
                directories: 2
            }
        );
        assert!(!server.exists("/top"));
    }

    #[tokio::test]
    async fn test_force_ignores_missing() {
        let server = MemoryServer::new();
        let fs = mount(&server).await;
        let args = Args {
            path: "/nope".to_string(),
            recursive: false,
            force: true,
        };
        execute(&fs, &args).await.unwrap();
    }
}
