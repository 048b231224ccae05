use anyhow::{Result, bail};
use clap::Args as ClapArgs;
use serde::Serialize;
use tracing::instrument;

use sftpmount_proto::FileKind;
use sftpmount_vfs::SftpFs;

use super::{list_dir, normalize_path, resolve};

#[derive(ClapArgs)]
pub struct Args {
    /// Starting path (default: mount root)
    #[arg(default_value = "/")]
    pub path: String,

    /// Maximum depth to display
    #[arg(short = 'd', long)]
    pub max_depth: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// One node of the printed tree.
#[derive(Debug, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
    #[serde(skip)]
    pub is_dir: bool,
}

#[instrument(level = "info", name = "cmd::tree", skip_all, fields(path = %args.path))]
pub async fn execute(fs: &SftpFs, args: &Args) -> Result<()> {
    let path = normalize_path(&args.path);
    let attr = resolve(fs, &path).await?;
    if attr.kind != FileKind::Directory {
        bail!("Not a directory: {}", args.path);
    }

    let name = if path == "/" { "." } else { args.path.as_str() };
    let root = TreeNode {
        name: name.to_string(),
        target: None,
        children: build(fs, attr.ino, 0, args.max_depth).await?,
        is_dir: true,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&root)?);
    } else {
        println!("{}", root.name);
        let mut out = String::new();
        render(&root.children, "", &mut out);
        print!("{out}");
    }
    Ok(())
}

/// Collects the tree under `dir`, directories first.
pub async fn build(
    fs: &SftpFs,
    dir: u64,
    depth: usize,
    max_depth: Option<usize>,
) -> Result<Vec<TreeNode>> {
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(Vec::new());
    }
    let mut entries = list_dir(fs, dir).await?;
    entries.sort_by_key(|e| e.kind != FileKind::Directory);

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut node = TreeNode {
            name: entry.name,
            target: None,
            children: Vec::new(),
            is_dir: entry.kind == FileKind::Directory,
        };
        match entry.kind {
            FileKind::Directory => {
                let child = fs.lookup(dir, &node.name).await?;
                node.children = Box::pin(build(fs, child.ino, depth + 1, max_depth)).await?;
            }
            FileKind::Symlink => {
                let child = fs.lookup(dir, &node.name).await?;
                node.target = Some(fs.readlink(child.ino).await?);
            }
            _ => {}
        }
        nodes.push(node);
    }
    Ok(nodes)
}

/// Draws `nodes` with box-drawing connectors.
pub fn render(nodes: &[TreeNode], prefix: &str, out: &mut String) {
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i + 1 == nodes.len();
        let connector = if is_last { "└── " } else { "├── " };
        out.push_str(prefix);
        out.push_str(connector);
        out.push_str(&node.name);
        if node.is_dir {
            out.push('/');
        }
        if let Some(target) = &node.target {
            out.push_str(" -> ");
            out.push_str(target);
        }
        out.push('\n');
        if node.is_dir {
            let new_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            render(&node.children, &new_prefix, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::mount;
    use sftpmount_client::testing::MemoryServer;
    use sftpmount_vfs::ROOT_INO;

    #[tokio::test]
    async fn test_tree_render() {
        let server = MemoryServer::new();
        server.add_dir("/docs");
        server.add_file("/docs/a.md", b"");
        server.add_file("/z.txt", b"");
        server.add_symlink("/latest", "docs/a.md");
        let fs = mount(&server).await;

        let nodes = build(&fs, ROOT_INO, 0, None).await.unwrap();
        let mut out = String::new();
        render(&nodes, "", &mut out);
        assert_eq!(
            out,
            "├── docs/\n│   └── a.md\n├── latest -> docs/a.md\n└── z.txt\n"
        );
    }

    #[tokio::test]
    async fn test_tree_max_depth() {
        let server = MemoryServer::new();
        server.add_dir("/a");
        server.add_dir("/a/b");
        server.add_file("/a/b/c", b"");
        let fs = mount(&server).await;

        let nodes = build(&fs, ROOT_INO, 0, Some(1)).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(nodes[0].children.is_empty());
    }
}
