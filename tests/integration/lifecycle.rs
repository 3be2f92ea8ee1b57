//! Snapshot lifecycle through the public façade, without remote backends

use crate::integration::test_utils::{commit_layer, id_of, labels, live_ids, open_snapshotter, snapshot_dirs};
use lazysnap::{Kind, MountKind};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_base_layer_binds_read_write() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    let mounts = snapshotter.prepare(&cancel, "base", None, labels(&[])).await.unwrap();
    let id = id_of(&snapshotter, "base").await;

    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].kind, MountKind::Bind);
    assert_eq!(mounts[0].source, snapshotter.layout().fs_path(&id).to_string_lossy());
    assert_eq!(mounts[0].options, vec!["rw", "rbind"]);
    assert!(snapshotter.layout().fs_path(&id).is_dir());
    assert!(snapshotter.layout().work_path(&id).is_dir());
}

#[tokio::test]
async fn test_overlay_lowerdir_is_nearest_parent_first() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    let p1 = commit_layer(&snapshotter, "p1", None, None).await;
    let p2 = commit_layer(&snapshotter, "p2", Some("p1"), None).await;
    let p3 = commit_layer(&snapshotter, "p3", Some("p2"), None).await;

    let mounts = snapshotter.prepare(&cancel, "ctr", Some("p3"), labels(&[])).await.unwrap();
    let id = id_of(&snapshotter, "ctr").await;
    let layout = snapshotter.layout();

    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].kind, MountKind::Overlay);
    assert_eq!(mounts[0].source, "overlay");
    assert_eq!(
        mounts[0].options,
        vec![
            format!("workdir={}", layout.work_path(&id).display()),
            format!("upperdir={}", layout.fs_path(&id).display()),
            format!(
                "lowerdir={}:{}:{}",
                layout.fs_path(&p3).display(),
                layout.fs_path(&p2).display(),
                layout.fs_path(&p1).display()
            ),
        ]
    );

    let again = snapshotter.mounts(&cancel, "ctr").await.unwrap();
    assert_eq!(again, mounts);
}

#[tokio::test]
async fn test_view_of_single_parent_is_read_only_bind() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    let p1 = commit_layer(&snapshotter, "p1", None, None).await;
    let mounts = snapshotter.view(&cancel, "v", Some("p1"), labels(&[])).await.unwrap();

    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0].kind, MountKind::Bind);
    assert!(mounts[0].is_read_only());
    assert_eq!(mounts[0].source, snapshotter.layout().fs_path(&p1).to_string_lossy());
    assert_eq!(snapshotter.stat(&cancel, "v").await.unwrap().kind, Kind::View);
}

#[tokio::test]
async fn test_view_of_chain_has_no_upper() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    commit_layer(&snapshotter, "p1", None, None).await;
    commit_layer(&snapshotter, "p2", Some("p1"), None).await;
    let mounts = snapshotter.view(&cancel, "v", Some("p2"), labels(&[])).await.unwrap();

    assert_eq!(mounts[0].kind, MountKind::Overlay);
    assert_eq!(mounts[0].options.len(), 1);
    assert!(mounts[0].options[0].starts_with("lowerdir="));
}

#[tokio::test]
async fn test_committed_base_layer_mounts_read_only() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    commit_layer(&snapshotter, "p1", None, None).await;
    let mounts = snapshotter.mounts(&cancel, "p1").await.unwrap();
    assert!(mounts[0].is_read_only());
}

#[tokio::test]
async fn test_duplicate_key_is_rejected_without_leftovers() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    snapshotter.prepare(&cancel, "a", None, labels(&[])).await.unwrap();
    let before = snapshot_dirs(&snapshotter);

    let err = snapshotter.prepare(&cancel, "a", None, labels(&[])).await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(snapshot_dirs(&snapshotter), before);
}

#[tokio::test]
async fn test_failed_create_leaves_no_temp_dir() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    let err = snapshotter
        .prepare(&cancel, "orphan", Some("missing"), labels(&[]))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(snapshot_dirs(&snapshotter).is_empty());
    assert!(live_ids(&snapshotter).await.is_empty());
}

#[tokio::test]
async fn test_uncommitted_parent_is_invalid_state() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    snapshotter.prepare(&cancel, "active", None, labels(&[])).await.unwrap();
    let err = snapshotter
        .prepare(&cancel, "child", Some("active"), labels(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, lazysnap::SnapshotError::InvalidState(_)));
}

#[tokio::test]
async fn test_commit_renames_and_records_usage() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    snapshotter.prepare(&cancel, "work", None, labels(&[])).await.unwrap();
    let id = id_of(&snapshotter, "work").await;
    std::fs::write(snapshotter.layout().fs_path(&id).join("data"), vec![7u8; 8192]).unwrap();

    snapshotter
        .commit(&cancel, "layer", "work", Some(labels(&[("team", "infra")])))
        .await
        .unwrap();

    assert!(snapshotter.stat(&cancel, "work").await.unwrap_err().is_not_found());
    let info = snapshotter.stat(&cancel, "layer").await.unwrap();
    assert_eq!(info.kind, Kind::Committed);
    assert_eq!(info.labels.get("team").map(String::as_str), Some("infra"));

    let usage = snapshotter.usage(&cancel, "layer").await.unwrap();
    assert!(usage.size > 0);
    assert_eq!(usage.inodes, 2);
}

#[tokio::test]
async fn test_commit_of_view_is_invalid_state() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    commit_layer(&snapshotter, "p1", None, None).await;
    snapshotter.view(&cancel, "v", Some("p1"), labels(&[])).await.unwrap();
    let err = snapshotter.commit(&cancel, "c", "v", None).await.unwrap_err();
    assert!(matches!(err, lazysnap::SnapshotError::InvalidState(_)));
}

#[tokio::test]
async fn test_sync_remove_reclaims_directory() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    snapshotter.prepare(&cancel, "gone", None, labels(&[])).await.unwrap();
    let id = id_of(&snapshotter, "gone").await;
    snapshotter.remove(&cancel, "gone").await.unwrap();

    assert!(!snapshotter.layout().snapshot_dir(&id).exists());
    assert!(snapshotter.stat(&cancel, "gone").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_async_remove_defers_to_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], true);
    let cancel = CancellationToken::new();

    snapshotter.prepare(&cancel, "gone", None, labels(&[])).await.unwrap();
    let id = id_of(&snapshotter, "gone").await;
    snapshotter.remove(&cancel, "gone").await.unwrap();

    assert!(snapshotter.layout().snapshot_dir(&id).exists());
    let reclaimed = snapshotter.cleanup(&cancel).await.unwrap();
    assert_eq!(reclaimed, vec![snapshotter.layout().snapshot_dir(&id)]);
    assert!(!snapshotter.layout().snapshot_dir(&id).exists());
}

#[tokio::test]
async fn test_parent_with_children_cannot_be_removed() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    let cancel = CancellationToken::new();

    commit_layer(&snapshotter, "p1", None, None).await;
    snapshotter.prepare(&cancel, "child", Some("p1"), labels(&[])).await.unwrap();

    let err = snapshotter.remove(&cancel, "p1").await.unwrap_err();
    assert!(matches!(err, lazysnap::SnapshotError::InvalidState(_)));

    snapshotter.remove(&cancel, "child").await.unwrap();
    snapshotter.remove(&cancel, "p1").await.unwrap();
    assert!(live_ids(&snapshotter).await.is_empty());
}

#[tokio::test]
async fn test_directories_match_records_after_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let snapshotter = open_snapshotter(&temp_dir, vec![], true);
    let cancel = CancellationToken::new();

    commit_layer(&snapshotter, "p1", None, None).await;
    snapshotter.prepare(&cancel, "a", Some("p1"), labels(&[])).await.unwrap();
    snapshotter.prepare(&cancel, "b", Some("p1"), labels(&[])).await.unwrap();
    snapshotter.remove(&cancel, "a").await.unwrap();

    snapshotter.cleanup(&cancel).await.unwrap();
    assert_eq!(snapshot_dirs(&snapshotter), live_ids(&snapshotter).await);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let first_id = {
        let snapshotter = open_snapshotter(&temp_dir, vec![], false);
        commit_layer(&snapshotter, "p1", None, None).await;
        snapshotter.prepare(&cancel, "tmp", None, labels(&[])).await.unwrap();
        let id = id_of(&snapshotter, "tmp").await;
        snapshotter.remove(&cancel, "tmp").await.unwrap();
        snapshotter.close().await.unwrap();
        id
    };

    let snapshotter = open_snapshotter(&temp_dir, vec![], false);
    assert_eq!(snapshotter.stat(&cancel, "p1").await.unwrap().kind, Kind::Committed);

    snapshotter.prepare(&cancel, "next", None, labels(&[])).await.unwrap();
    let next_id = id_of(&snapshotter, "next").await;
    assert_ne!(next_id, first_id);
}
