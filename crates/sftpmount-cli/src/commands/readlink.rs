use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::SftpFs;

use super::{normalize_path, resolve};

#[derive(ClapArgs)]
pub struct Args {
    /// Symbolic link path
    pub path: String,
}

#[instrument(level = "info", name = "cmd::readlink", skip_all, fields(path = %args.path))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let attr = resolve(fs, &path).await?;
    if attr.kind != FileKind::Symlink {
        bail!("Not a symbolic link: {path}");
    }
    println!("{}", fs.readlink(attr.ino).await?);
    Ok(())
}
