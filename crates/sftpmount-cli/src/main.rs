#![deny(unsafe_code)]

mod commands;
mod config;
mod exit_code;
mod output;

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sftpmount_client::CommandConnector;
use sftpmount_vfs::{FsError, SftpFs};

use crate::commands::{cat, ls, mkdir, mv, readlink, rm, stat, tree};

/// Browse an SFTP server through the sftpmount filesystem layer
#[derive(Parser)]
#[command(name = "sftpmount")]
#[command(author, version)]
#[command(propagate_version = true)]
#[command(after_help = "EXAMPLES:
    # List the remote home directory
    sftpmount ls -l / -- ssh -s user@host sftp

    # Print a file
    sftpmount cat /etc/motd -- ssh -s user@host sftp

    # Talk to a local sftp-server binary directly
    sftpmount tree -d 2 / -- /usr/lib/openssh/sftp-server
")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Mount configuration file (TOML)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List directory contents
    Ls(RemoteCommand<ls::Args>),

    /// Show attributes of a path
    Stat(RemoteCommand<stat::Args>),

    /// Print file contents
    Cat(RemoteCommand<cat::Args>),

    /// Create a directory
    Mkdir(RemoteCommand<mkdir::Args>),

    /// Remove a file or directory
    Rm(RemoteCommand<rm::Args>),

    /// Move or rename a file or directory
    Mv(RemoteCommand<mv::Args>),

    /// Print the target of a symbolic link
    Readlink(RemoteCommand<readlink::Args>),

    /// Show directory tree
    Tree(RemoteCommand<tree::Args>),
}

/// Wrapper for commands that talk to a server
#[derive(Parser, Clone)]
pub struct RemoteCommand<T: clap::Args> {
    #[command(flatten)]
    pub args: T,

    /// Command that speaks SFTP on its stdin/stdout, e.g. `ssh -s host sftp`
    #[arg(last = true, required = true, value_name = "ENDPOINT")]
    pub endpoint: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let quiet = cli.quiet;
    match run(cli) {
        Ok(()) => ExitCode::from(exit_code::SUCCESS),
        Err(e) => {
            if !quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(categorize_error(&e))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if !cli.quiet {
        setup_tracing(cli.verbose);
    }
    let config = config::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Commands::Ls(cmd) => with_mount(config, &cmd, ls::execute).await,
            Commands::Stat(cmd) => with_mount(config, &cmd, stat::execute).await,
            Commands::Cat(cmd) => with_mount(config, &cmd, cat::execute).await,
            Commands::Mkdir(cmd) => with_mount(config, &cmd, mkdir::execute).await,
            Commands::Rm(cmd) => with_mount(config, &cmd, rm::execute).await,
            Commands::Mv(cmd) => with_mount(config, &cmd, mv::execute).await,
            Commands::Readlink(cmd) => with_mount(config, &cmd, readlink::execute).await,
            Commands::Tree(cmd) => with_mount(config, &cmd, tree::execute).await,
        }
    })
}

/// Mounts the endpoint, runs one command against it, and unmounts.
async fn with_mount<T, F>(
    config: sftpmount_vfs::MountConfig,
    cmd: &RemoteCommand<T>,
    f: F,
) -> Result<()>
where
    T: clap::Args,
    F: AsyncFnOnce(&SftpFs, &T) -> Result<()>,
{
    let connector = CommandConnector::from_argv(&cmd.endpoint)
        .context("Invalid endpoint command")?;
    let program = connector.program().to_string();
    let fs = SftpFs::mount(Arc::new(connector), config)
        .await
        .with_context(|| format!("Failed to mount through `{program}`"))?;
    let result = tokio::select! {
        result = f(&fs, &cmd.args) => result,
        () = fs.wait_dead() => Err(FsError::Disconnected.into()),
    };
    fs.unmount().await;
    result
}

/// Set up tracing/logging based on verbosity level
fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}

/// Picks an exit code from the first filesystem error in the chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(fs_error) = cause.downcast_ref::<FsError>() {
            return exit_code::from_errno(fs_error.to_errno());
        }
        if cause.downcast_ref::<config::ConfigFileError>().is_some() {
            return exit_code::CONFIG_ERROR;
        }
    }
    exit_code::GENERAL_ERROR
}
