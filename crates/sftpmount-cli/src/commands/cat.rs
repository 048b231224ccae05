use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::{OpenMode, SftpFs};

use super::{normalize_path, resolve};

/// Bytes requested per read call.
const READ_SIZE: u32 = 256 * 1024;

#[derive(ClapArgs)]
pub struct Args {
    /// Remote file path
    pub file: String,
}

#[instrument(level = "info", name = "cmd::cat", skip_all, fields(file = %args.file))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.file);
    let attr = resolve(fs, &path).await?;
    if attr.kind == FileKind::Directory {
        bail!("Is a directory: {path}");
    }

    fs.open(attr.ino, OpenMode::ReadOnly, false).await?;
    let result = copy_to(fs, attr.ino, &mut tokio::io::stdout()).await;
    fs.release(attr.ino, OpenMode::ReadOnly).await?;
    result
}

/// Streams the whole of an open file into `out`.
pub async fn copy_to<W>(fs: &SftpFs, ino: u64, out: &mut W) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut offset = 0u64;
    loop {
        let chunk = fs.read(ino, offset, READ_SIZE).await?;
        if chunk.is_empty() {
            break;
        }
        offset += chunk.len() as u64;
        out.write_all(&chunk).await?;
    }
    out.flush().await?;
    Ok(())
}
