use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use sftpmount_vfs::SftpFs;

use super::{normalize_path, resolve};
use crate::output::{create_table, format_mode, format_size, format_time, kind_name};

#[derive(ClapArgs)]
pub struct Args {
    /// Remote path
    pub path: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatOutput {
    path: String,
    remote_path: String,
    inode: u64,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    mode: String,
    uid: u32,
    gid: u32,
    atime: u64,
    mtime: u64,
}

fn epoch_secs(time: std::time::SystemTime) -> u64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[instrument(level = "info", name = "cmd::stat", skip_all, fields(path = %args.path))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let attr = resolve(fs, &path).await?;
    let remote_path = fs.path_of(attr.ino)?;

    if args.json {
        let output = StatOutput {
            path,
            remote_path,
            inode: attr.ino,
            entry_type: kind_name(attr.kind),
            size: attr.size,
            mode: format!("{:04o}", attr.perm),
            uid: attr.uid,
            gid: attr.gid,
            atime: epoch_secs(attr.atime),
            mtime: epoch_secs(attr.mtime),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let mut table = create_table();
    table.add_row(vec!["Path".to_string(), path]);
    table.add_row(vec!["Remote path".to_string(), remote_path]);
    table.add_row(vec!["Type".to_string(), kind_name(attr.kind).to_string()]);
    table.add_row(vec![
        "Size".to_string(),
        format!("{} ({} bytes)", format_size(attr.size), attr.size),
    ]);
    table.add_row(vec![
        "Mode".to_string(),
        format!("{} ({:04o})", format_mode(attr.kind, attr.perm), attr.perm),
    ]);
    table.add_row(vec!["Owner".to_string(), format!("{}:{}", attr.uid, attr.gid)]);
    table.add_row(vec!["Accessed".to_string(), format_time(attr.atime)]);
    table.add_row(vec!["Modified".to_string(), format_time(attr.mtime)]);
    println!("{table}");
    Ok(())
}
