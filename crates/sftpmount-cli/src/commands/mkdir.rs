use anyhow::Result;
use clap::Args as ClapArgs;
use tracing::instrument;

use sftpmount_vfs::{FsError, SftpFs};

use super::{normalize_path, resolve, resolve_parent};

#[derive(ClapArgs)]
pub struct Args {
    /// Directory path to create
    pub path: String,

    /// Create parent directories as needed
    #[arg(short, long)]
    pub parents: bool,

    /// Permission bits for new directories (octal)
    #[arg(short, long, default_value = "755", value_parser = parse_mode)]
    pub mode: u32,
}

fn parse_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8)
        .ok()
        .filter(|m| *m <= 0o7777)
        .ok_or_else(|| format!("invalid octal mode: {s}"))
}

#[instrument(level = "info", name = "cmd::mkdir", skip_all, fields(path = %args.path, parents = args.parents))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    if !args.parents {
        let (parent, name) = resolve_parent(fs, &path).await?;
        fs.mkdir(parent, &name, args.mode).await?;
        return Ok(());
    }

    let mut dir = resolve(fs, "/").await?.ino;
    for name in path.split('/').filter(|s| !s.is_empty()) {
        dir = match fs.lookup(dir, name).await {
            Ok(attr) if attr.kind == sftpmount_proto::FileKind::Directory => attr.ino,
            Ok(attr) => return Err(FsError::NotADirectory(attr.ino).into()),
            Err(e) if e.is_not_found() => fs.mkdir(dir, name, args.mode).await?.ino,
            Err(e) => return Err(e.into()),
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::mount;
    use sftpmount_client::testing::MemoryServer;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert!(parse_mode("999").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[tokio::test]
    async fn test_mkdir_parents() {
        let server = MemoryServer::new();
        server.add_dir("/a");
        let fs = mount(&server).await;
        let args = Args {
            path: "a/b/c".to_string(),
            parents: true,
            mode: 0o700,
        };
        execute(&fs, &args).await.unwrap();
        assert!(server.exists("/a/b/c"));

        // Existing directories are fine with --parents.
        execute(&fs, &args).await.unwrap();
    }
}
