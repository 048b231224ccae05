use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::SftpFs;

use super::{normalize_path, resolve, resolve_parent};

#[derive(ClapArgs)]
pub struct Args {
    /// Source path
    pub source: String,

    /// Destination path (an existing directory receives the source by name)
    pub dest: String,
}

#[instrument(level = "info", name = "cmd::mv", skip_all, fields(source = %args.source, dest = %args.dest))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let source = normalize_path(&args.source);
    let dest = normalize_path(&args.dest);
    let (from_parent, from_name) = resolve_parent(fs, &source).await?;

    let (to_parent, to_name) = match resolve(fs, &dest).await {
        Ok(attr) if attr.kind == FileKind::Directory => (attr.ino, from_name.clone()),
        _ => resolve_parent(fs, &dest).await?,
    };
    fs.rename(from_parent, &from_name, to_parent, &to_name).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::mount;
    use sftpmount_client::testing::MemoryServer;

    #[tokio::test]
    async fn test_move_into_directory() {
        let server = MemoryServer::new();
        server.add_dir("/dest");
        server.add_file("/file.txt", b"x");
        let fs = mount(&server).await;
        let args = Args {
            source: "/file.txt".to_string(),
            dest: "/dest".to_string(),
        };
        execute(&fs, &args).await.unwrap();
        assert_eq!(server.read_file("/dest/file.txt").unwrap(), b"x");
        assert!(!server.exists("/file.txt"));
    }

    #[tokio::test]
    async fn test_rename_replaces_file() {
        let server = MemoryServer::new();
        server.add_file("/old", b"new contents");
        server.add_file("/target", b"old contents");
        let fs = mount(&server).await;
        let args = Args {
            source: "old".to_string(),
            dest: "target".to_string(),
        };
        execute(&fs, &args).await.unwrap();
        assert_eq!(server.read_file("/target").unwrap(), b"new contents");
    }
}
