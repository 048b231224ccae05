//! Node reclamation and exported handles.

mod common;

use common::{TestMount, assert_errno};
use sftpmount_client::testing::MemoryServer;
use sftpmount_vfs::{ExportHandle, FsError, OpenMode, ROOT_INO};

#[tokio::test]
async fn test_reclaim_defers_until_children_go() {
    let server = MemoryServer::new();
    server.add_file("/a/b/c.txt", b"c");
    let mount = TestMount::new(&server).await;
    let a = mount.ino("/a").await;
    let b = mount.ino("/a/b").await;
    let c = mount.ino("/a/b/c.txt").await;
    assert_eq!(mount.fs.statistics().nodes, 4);

    mount.fs.reclaim(a).await;
    mount.fs.reclaim(b).await;
    let stats = mount.fs.statistics();
    assert_eq!(stats.nodes, 4);
    assert_eq!(stats.reclaim_pending, 2);
    // Children still resolve paths through their pending parents.
    assert_eq!(mount.fs.path_of(c).unwrap(), "/a/b/c.txt");

    mount.fs.reclaim(c).await;
    let stats = mount.fs.statistics();
    assert_eq!(stats.nodes, 1);
    assert_eq!(stats.reclaim_pending, 0);
}

#[tokio::test]
async fn test_lookup_revives_pending_node() {
    let server = MemoryServer::new();
    server.add_file("/a/f", b"");
    let mount = TestMount::new(&server).await;
    let a = mount.ino("/a").await;
    let f = mount.ino("/a/f").await;

    mount.fs.reclaim(a).await;
    assert_eq!(mount.fs.statistics().reclaim_pending, 1);
    assert_eq!(mount.fs.lookup(ROOT_INO, "a").await.unwrap().ino, a);
    assert_eq!(mount.fs.statistics().reclaim_pending, 0);

    mount.fs.reclaim(f).await;
    // No longer pending, so it stays.
    assert!(mount.fs.getattr(a).await.is_ok());
}

#[tokio::test]
async fn test_reclaimed_name_gets_new_node() {
    let server = MemoryServer::new();
    server.add_file("/f", b"");
    let mount = TestMount::new(&server).await;
    let first = mount.ino("/f").await;
    mount.fs.reclaim(first).await;
    assert_errno(mount.fs.getattr(first).await, libc::ENOENT);

    let second = mount.ino("/f").await;
    assert_ne!(first, second);
}

#[tokio::test]
async fn test_root_is_never_reclaimed() {
    let server = MemoryServer::new();
    let mount = TestMount::new(&server).await;
    mount.fs.reclaim(ROOT_INO).await;
    assert!(mount.fs.getattr(ROOT_INO).await.is_ok());
}

#[tokio::test]
async fn test_reclaim_closes_open_handles() {
    let server = MemoryServer::new();
    server.add_file("/f", b"data");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/f").await;
    mount.fs.open(f, OpenMode::ReadOnly, false).await.unwrap();
    assert_eq!(server.open_handles(), 1);

    mount.fs.reclaim(f).await;
    assert_eq!(server.open_handles(), 0);
}

#[tokio::test]
async fn test_exported_node_is_kept() {
    let server = MemoryServer::new();
    server.add_file("/d/f", b"");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/d/f").await;
    let handle = mount.fs.node_to_handle(f).unwrap();

    mount.fs.reclaim(f).await;
    let decoded = ExportHandle::from_bytes(&handle.to_bytes()).unwrap();
    assert_eq!(mount.fs.handle_to_node(&decoded).unwrap(), f);
    assert_eq!(mount.fs.statistics().exported, 1);
}

#[tokio::test]
async fn test_handle_from_other_mount_is_stale() {
    let server = MemoryServer::new();
    server.add_file("/f", b"");
    let first = TestMount::new(&server).await;
    let f = first.ino("/f").await;
    let handle = first.fs.node_to_handle(f).unwrap();

    let second = TestMount::new(&server).await;
    second.ino("/f").await;
    assert!(matches!(
        second.fs.handle_to_node(&handle),
        Err(FsError::StaleExport)
    ));
}

#[tokio::test]
async fn test_handle_to_unlinked_node_is_stale() {
    let server = MemoryServer::new();
    server.add_file("/f", b"");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/f").await;
    let handle = mount.fs.node_to_handle(f).unwrap();
    mount.fs.remove(ROOT_INO, "f").await.unwrap();
    assert_errno(mount.fs.handle_to_node(&handle), libc::ESTALE);
}
