//! mkdir, symlink, remove, rmdir and rename.

mod common;

use common::{TestMount, assert_errno, assert_not_found};
use sftpmount_client::testing::MemoryServer;
use sftpmount_proto::{FileKind, PacketType, StatusCode};
use sftpmount_vfs::ROOT_INO;

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_mkdir_then_lookup_is_local() {
    let server = MemoryServer::new();
    let mount = TestMount::new(&server).await;
    mount.fs.readdir(ROOT_INO, 0).await.unwrap();

    let dir = mount.fs.mkdir(ROOT_INO, "new", 0o750).await.unwrap();
    assert_eq!(dir.kind, FileKind::Directory);
    assert_eq!(dir.perm, 0o750);
    assert!(server.exists("/new"));

    server.reset_counts();
    assert_eq!(mount.fs.lookup(ROOT_INO, "new").await.unwrap().ino, dir.ino);
    // Known empty: no listing round trip.
    assert!(mount.fs.readdir(dir.ino, 1).await.unwrap().is_empty());
    assert_eq!(mount.requests(), 0);
}

#[tokio::test]
async fn test_mkdir_existing_fails() {
    let server = MemoryServer::new();
    server.add_dir("/d");
    let mount = TestMount::new(&server).await;

    // Unlisted parent: the server decides.
    assert_errno(mount.fs.mkdir(ROOT_INO, "d", 0o755).await, libc::EEXIST);

    // Listed parent: answered locally.
    mount.fs.readdir(ROOT_INO, 0).await.unwrap();
    server.reset_counts();
    assert_errno(mount.fs.mkdir(ROOT_INO, "d", 0o755).await, libc::EEXIST);
    assert_eq!(server.count(PacketType::Mkdir), 0);
}

#[tokio::test]
async fn test_invalid_names_are_rejected() {
    let server = MemoryServer::new();
    let mount = TestMount::new(&server).await;
    server.reset_counts();
    assert_errno(mount.fs.mkdir(ROOT_INO, "a/b", 0o755).await, libc::EINVAL);
    assert_errno(mount.fs.remove(ROOT_INO, "").await, libc::EINVAL);
    assert_eq!(mount.requests(), 0);
}

#[tokio::test]
async fn test_symlink_and_readlink() {
    let server = MemoryServer::new();
    server.add_file("/target.txt", b"t");
    let mount = TestMount::new(&server).await;

    let link = mount.fs.symlink(ROOT_INO, "link", "target.txt").await.unwrap();
    assert_eq!(link.kind, FileKind::Symlink);
    assert_eq!(mount.fs.readlink(link.ino).await.unwrap(), "target.txt");

    // Attributes describe the link itself.
    let attr = mount.fs.getattr(link.ino).await.unwrap();
    assert_eq!(attr.kind, FileKind::Symlink);
}

// ============================================================================
// Remove
// ============================================================================

#[tokio::test]
async fn test_remove_hides_name() {
    let server = MemoryServer::new();
    server.add_file("/f", b"x");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/f").await;

    mount.fs.remove(ROOT_INO, "f").await.unwrap();
    assert!(!server.exists("/f"));
    assert_not_found(mount.fs.lookup(ROOT_INO, "f").await);
    // The node lives on until reclaimed.
    assert!(mount.fs.statistics().nodes >= 2);
    mount.fs.reclaim(f).await;
    assert_eq!(mount.fs.statistics().nodes, 1);
}

#[tokio::test]
async fn test_remove_directory_fails() {
    let server = MemoryServer::new();
    server.add_dir("/d");
    let mount = TestMount::new(&server).await;
    assert!(mount.fs.remove(ROOT_INO, "d").await.is_err());
    assert!(server.exists("/d"));
}

#[tokio::test]
async fn test_rmdir_non_empty_listed_is_local() {
    let server = MemoryServer::new();
    server.add_file("/d/f", b"");
    let mount = TestMount::new(&server).await;
    let d = mount.ino("/d").await;
    mount.fs.readdir(d, 0).await.unwrap();
    server.reset_counts();

    assert_errno(mount.fs.rmdir(ROOT_INO, "d").await, libc::ENOTEMPTY);
    assert_eq!(server.count(PacketType::Rmdir), 0);
}

#[tokio::test]
async fn test_rmdir_empty() {
    let server = MemoryServer::new();
    server.add_dir("/d");
    let mount = TestMount::new(&server).await;
    mount.ino("/d").await;
    mount.fs.rmdir(ROOT_INO, "d").await.unwrap();
    assert!(!server.exists("/d"));
    assert_not_found(mount.fs.lookup(ROOT_INO, "d").await);
}

// ============================================================================
// Rename
// ============================================================================

#[tokio::test]
async fn test_rename_keeps_identity() {
    let server = MemoryServer::new();
    server.add_file("/a.txt", b"a");
    let mount = TestMount::new(&server).await;
    let a = mount.ino("/a.txt").await;

    mount.fs.rename(ROOT_INO, "a.txt", ROOT_INO, "b.txt").await.unwrap();
    assert!(server.exists("/b.txt"));
    assert!(!server.exists("/a.txt"));

    server.reset_counts();
    assert_eq!(mount.fs.lookup(ROOT_INO, "b.txt").await.unwrap().ino, a);
    assert_not_found(mount.fs.lookup(ROOT_INO, "a.txt").await);
    assert_eq!(mount.requests(), 0);
    assert_eq!(mount.fs.path_of(a).unwrap(), "/b.txt");
}

#[tokio::test]
async fn test_rename_over_existing_removes_target_first() {
    let server = MemoryServer::new();
    server.add_file("/a.txt", b"from a");
    server.add_file("/b.txt", b"from b");
    let mount = TestMount::new(&server).await;
    let a = mount.ino("/a.txt").await;
    let b = mount.ino("/b.txt").await;
    server.reset_counts();

    mount.fs.rename(ROOT_INO, "a.txt", ROOT_INO, "b.txt").await.unwrap();
    assert_eq!(server.count(PacketType::Remove), 1);
    assert_eq!(server.count(PacketType::Rename), 1);
    assert_eq!(server.read_file("/b.txt").unwrap(), b"from a");

    assert_eq!(mount.fs.lookup(ROOT_INO, "b.txt").await.unwrap().ino, a);
    // The replaced node is unreachable but alive until reclaimed.
    assert!(mount.fs.path_of(b).is_ok());
}

#[tokio::test]
async fn test_rename_aborts_when_target_removal_fails() {
    let server = MemoryServer::new();
    server.add_file("/a.txt", b"a");
    server.add_file("/b.txt", b"b");
    let mount = TestMount::new(&server).await;
    mount.ino("/a.txt").await;
    server.reset_counts();

    server.fail_next(PacketType::Remove, StatusCode::PermissionDenied);
    assert_errno(
        mount.fs.rename(ROOT_INO, "a.txt", ROOT_INO, "b.txt").await,
        libc::EACCES,
    );
    assert_eq!(server.count(PacketType::Rename), 0);
    assert_eq!(server.read_file("/a.txt").unwrap(), b"a");
    assert_eq!(server.read_file("/b.txt").unwrap(), b"b");
    assert!(mount.fs.lookup(ROOT_INO, "a.txt").await.is_ok());
}

#[tokio::test]
async fn test_rename_over_directory_uses_rmdir() {
    let server = MemoryServer::new();
    server.add_dir("/src");
    server.add_dir("/dst");
    let mount = TestMount::new(&server).await;
    server.reset_counts();

    mount.fs.rename(ROOT_INO, "src", ROOT_INO, "dst").await.unwrap();
    assert_eq!(server.count(PacketType::Rmdir), 1);
    assert!(server.exists("/dst"));
    assert!(!server.exists("/src"));
}

#[tokio::test]
async fn test_rename_across_directories_frees_pending_parent() {
    let server = MemoryServer::new();
    server.add_file("/old/f", b"f");
    server.add_dir("/new");
    let mount = TestMount::new(&server).await;
    let old = mount.ino("/old").await;
    let new = mount.ino("/new").await;
    let f = mount.ino("/old/f").await;

    mount.fs.reclaim(old).await;
    assert_eq!(mount.fs.statistics().reclaim_pending, 1);

    mount.fs.rename(old, "f", new, "g").await.unwrap();
    assert_errno(mount.fs.getattr(old).await, libc::ENOENT);
    assert_eq!(mount.fs.path_of(f).unwrap(), "/new/g");
    assert_eq!(mount.fs.lookup(new, "g").await.unwrap().ino, f);
    assert_eq!(server.read_file("/new/g").unwrap(), b"f");
}

#[tokio::test]
async fn test_renamed_directory_moves_descendants() {
    let server = MemoryServer::new();
    server.add_file("/d/sub/f", b"deep");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/d/sub/f").await;

    mount.fs.rename(ROOT_INO, "d", ROOT_INO, "e").await.unwrap();
    assert_eq!(mount.fs.path_of(f).unwrap(), "/e/sub/f");
    assert_eq!(mount.read_all(f).await, b"deep");
}

#[tokio::test]
async fn test_rename_to_same_name_is_noop() {
    let server = MemoryServer::new();
    server.add_file("/a", b"");
    let mount = TestMount::new(&server).await;
    server.reset_counts();
    mount.fs.rename(ROOT_INO, "a", ROOT_INO, "a").await.unwrap();
    assert_eq!(mount.requests(), 0);
}
