//! List command - list directory contents on the server.
//!
//! # Examples
//!
//! ```bash
//! # List the mount root
//! sftpmount ls -- ssh -s host sftp
//!
//! # List with details
//! sftpmount ls -l /var/log -- ssh -s host sftp
//!
//! # Output as JSON for scripting
//! sftpmount ls --json / -- ssh -s host sftp | jq '.entries[].name'
//! ```

use anyhow::Result;
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::{DirEntry, NodeAttr, SftpFs};

use super::{list_dir, normalize_path, resolve};
use crate::output::{create_table, decorated_name, format_mode, format_size, format_time, kind_name};

#[derive(ClapArgs, Clone)]
pub struct Args {
    /// Remote path (default: mount root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Show detailed information
    #[arg(short, long)]
    pub long: bool,

    /// Show all files including hidden
    #[arg(short, long)]
    pub all: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// One entry per line (script-friendly)
    #[arg(short = '1')]
    pub one_per_line: bool,
}

/// JSON output format for ls command
#[derive(Serialize)]
struct LsOutput {
    path: String,
    entries: Vec<EntryInfo>,
}

#[derive(Serialize)]
struct EntryInfo {
    name: String,
    #[serde(rename = "type")]
    entry_type: &'static str,
    size: u64,
    mode: String,
    mtime: u64,
}

#[instrument(level = "info", name = "cmd::ls", skip_all, fields(path = %args.path))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let attr = resolve(fs, &path).await?;

    // A plain file lists as itself.
    let rows: Vec<(String, NodeAttr)> = if attr.kind == FileKind::Directory {
        list_dir(fs, attr.ino)
            .await?
            .into_iter()
            .filter(|e| args.all || !e.name.starts_with('.'))
            .map(|e| row(&e))
            .collect()
    } else {
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        vec![(name, attr)]
    };

    if args.json {
        print_json(&path, &rows)?;
    } else if args.long {
        print_long_format(&rows);
    } else {
        print_short_format(&rows, args.one_per_line);
    }
    Ok(())
}

fn row(entry: &DirEntry) -> (String, NodeAttr) {
    let attr = NodeAttr::from_attributes(entry.ino.unwrap_or(0), &entry.attrs);
    (entry.name.clone(), attr)
}

fn mtime_secs(attr: &NodeAttr) -> u64 {
    attr.mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn print_json(path: &str, rows: &[(String, NodeAttr)]) -> Result<()> {
    let output = LsOutput {
        path: path.to_string(),
        entries: rows
            .iter()
            .map(|(name, attr)| EntryInfo {
                name: name.clone(),
                entry_type: kind_name(attr.kind),
                size: attr.size,
                mode: format!("{:04o}", attr.perm),
                mtime: mtime_secs(attr),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_long_format(rows: &[(String, NodeAttr)]) {
    let mut table = create_table();
    table.set_header(vec!["Mode", "Owner", "Size", "Modified", "Name"]);
    for (name, attr) in rows {
        let size = if attr.kind == FileKind::Directory {
            "-".to_string()
        } else {
            format_size(attr.size)
        };
        table.add_row(vec![
            format_mode(attr.kind, attr.perm),
            format!("{}:{}", attr.uid, attr.gid),
            size,
            format_time(attr.mtime),
            decorated_name(name, attr.kind),
        ]);
    }
    println!("{table}");
}

fn print_short_format(rows: &[(String, NodeAttr)], one_per_line: bool) {
    let entries: Vec<String> = rows
        .iter()
        .map(|(name, attr)| decorated_name(name, attr.kind))
        .collect();

    if one_per_line || entries.len() > 10 {
        for entry in entries {
            println!("{entry}");
        }
    } else if !entries.is_empty() {
        println!("{}", entries.join("  "));
    }
}
