//! Behavior of the filesystem across connection loss and reply reordering.

mod common;

use common::{TestMount, assert_errno, test_config};
use sftpmount_client::testing::MemoryServer;
use sftpmount_client::{ChannelMode, LinkStatus, ReconnectPolicy};
use sftpmount_proto::PacketType;
use sftpmount_vfs::{FsError, MountConfig, OpenMode, SftpFs};
use std::time::Duration;

async fn wait_for_reconnect(mount: &TestMount) {
    while mount.fs.statistics().reconnects == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_connection_loss_fails_outstanding_requests() {
    let server = MemoryServer::new();
    for name in ["a", "b", "c"] {
        server.add_file(&format!("/{name}"), b"x");
    }
    let mount = TestMount::new(&server).await;
    let inos = [
        mount.ino("/a").await,
        mount.ino("/b").await,
        mount.ino("/c").await,
    ];
    mount.fs.invalidate_all();
    server.hold_replies(true);

    let (a, b, c, ()) = tokio::join!(
        mount.fs.getattr(inos[0]),
        mount.fs.getattr(inos[1]),
        mount.fs.getattr(inos[2]),
        async {
            server.wait_for_held(3).await;
            server.hold_replies(false);
            server.kill_connections();
        }
    );
    assert_errno(a, libc::ESHUTDOWN);
    assert_errno(b, libc::ESHUTDOWN);
    assert_errno(c, libc::ESHUTDOWN);

    wait_for_reconnect(&mount).await;
    let attr = mount.fs.getattr(inos[1]).await.unwrap();
    assert_eq!(attr.ino, inos[1]);
    assert_eq!(mount.fs.statistics().reconnects, 1);
    assert_eq!(mount.fs.statistics().outstanding, 0);
}

#[tokio::test]
async fn test_requests_wait_for_reconnect() {
    let server = MemoryServer::new();
    server.add_file("/f", b"x");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/f").await;
    mount.fs.invalidate_all();

    server.kill_connections();
    // Issued while the link is down or coming back; either way it lands on
    // the new connection or fails with the lost one.
    match mount.fs.getattr(f).await {
        Ok(attr) => assert_eq!(attr.ino, f),
        Err(e) => assert_eq!(e.to_errno(), libc::ESHUTDOWN),
    }
    wait_for_reconnect(&mount).await;
    assert_eq!(mount.fs.getattr(f).await.unwrap().ino, f);
}

#[tokio::test]
async fn test_open_during_reconnect_is_tagged_with_new_connection() {
    let server = MemoryServer::new();
    server.add_file("/f", b"hello");
    let config = test_config().reconnect(ReconnectPolicy {
        max_attempts: 100,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(5),
    });
    let mount = TestMount::with_config(&server, config).await;
    let f = mount.ino("/f").await;

    server.refuse_connections(true);
    server.kill_connections();
    while mount.fs.client().stats().channels[0].status != LinkStatus::Reconnecting {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    server.reset_counts();

    let (opened, ()) = tokio::join!(mount.fs.open(f, OpenMode::ReadOnly, false), async {
        server.refuse_connections(false);
    });
    opened.unwrap();
    let data = mount.fs.read(f, 0, 16).await.unwrap();
    assert_eq!(&data[..], b"hello");
    assert_eq!(server.count(PacketType::Open), 1);
    assert_eq!(server.open_handles(), 1);

    mount.fs.release(f, OpenMode::ReadOnly).await.unwrap();
    assert_eq!(server.open_handles(), 0);
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let server = MemoryServer::new();
    server.add_file("/one", b"1");
    server.add_file("/two", b"22");
    server.add_file("/three", b"333");
    let mount = TestMount::new(&server).await;
    let one = mount.ino("/one").await;
    let two = mount.ino("/two").await;
    let three = mount.ino("/three").await;
    mount.fs.invalidate_all();
    server.hold_replies(true);

    let (a, b, c, ()) = tokio::join!(
        mount.fs.getattr(one),
        mount.fs.getattr(two),
        mount.fs.getattr(three),
        async {
            server.wait_for_held(3).await;
            server.hold_replies(false);
            server.release_held(&[2, 0, 1]);
        }
    );
    assert_eq!(a.unwrap().size, 1);
    assert_eq!(b.unwrap().size, 2);
    assert_eq!(c.unwrap().size, 3);
}

#[tokio::test]
async fn test_exhausted_reconnects_are_fatal() {
    let server = MemoryServer::new();
    server.add_file("/f", b"x");
    let config = test_config().reconnect(ReconnectPolicy {
        max_attempts: 1,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(5),
    });
    let mount = TestMount::with_config(&server, config).await;
    let f = mount.ino("/f").await;
    mount.fs.open(f, OpenMode::ReadOnly, false).await.unwrap();
    mount.fs.invalidate_all();
    assert!(!mount.fs.is_dead());

    server.refuse_connections(true);
    server.kill_connections();
    mount.fs.wait_dead().await;

    assert!(mount.fs.is_dead());
    assert_errno(mount.fs.getattr(f).await, libc::ENOTCONN);

    // Nothing is sent on a dead mount; the handles are just forgotten.
    server.reset_counts();
    mount.fs.unmount().await;
    assert_eq!(mount.fs.statistics().open_handles, 0);
    assert_eq!(server.total_requests(), 0);
}

#[tokio::test]
async fn test_two_channel_mount_survives_data_channel_loss() {
    let server = MemoryServer::new();
    server.add_file("/f", b"payload");
    let config = test_config().channels(ChannelMode::Two);
    let mount = TestMount::with_config(&server, config).await;
    let f = mount.ino("/f").await;
    assert_eq!(mount.read_all(f).await, b"payload");

    server.kill_connections();
    while mount.fs.statistics().reconnects < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(mount.read_all(f).await, b"payload");
}

#[tokio::test]
async fn test_mount_resolves_remote_root() {
    let server = MemoryServer::new();
    server.add_dir("/srv");
    server.add_file("/srv/data.bin", b"abc");
    let mount = TestMount::with_config(&server, test_config().remote_root("/srv/")).await;

    assert_eq!(mount.fs.root_path(), "/srv");
    let attr = mount.resolve("/data.bin").await.unwrap();
    assert_eq!(attr.size, 3);
    assert_eq!(mount.fs.path_of(attr.ino).unwrap(), "/srv/data.bin");
}

#[tokio::test]
async fn test_mount_on_file_fails() {
    let server = MemoryServer::new();
    server.add_file("/plain", b"");
    let result = SftpFs::mount(server.connector(), test_config().remote_root("/plain")).await;
    assert!(matches!(result, Err(FsError::NotADirectory(_))));
}

#[tokio::test]
async fn test_mount_on_missing_root_fails() {
    let server = MemoryServer::new();
    let result = SftpFs::mount(server.connector(), test_config().remote_root("/nowhere")).await;
    assert!(result.is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_connecting() {
    let server = MemoryServer::new();
    let config = MountConfig::default().max_read(0);
    let result = SftpFs::mount(server.connector(), config).await;
    assert!(matches!(result, Err(FsError::Config(_))));
    assert_eq!(server.connections_attempted(), 0);
}

#[tokio::test]
async fn test_unmount_closes_handles() {
    let server = MemoryServer::new();
    server.add_file("/f", b"x");
    let mount = TestMount::new(&server).await;
    let f = mount.ino("/f").await;
    mount
        .fs
        .open(f, sftpmount_vfs::OpenMode::ReadWrite, false)
        .await
        .unwrap();
    assert_eq!(server.open_handles(), 2);

    mount.fs.unmount().await;
    assert_eq!(server.open_handles(), 0);
    assert_eq!(mount.fs.statistics().open_handles, 0);
}
