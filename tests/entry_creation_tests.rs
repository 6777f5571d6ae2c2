#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use redir_cache::fs::{CacheError, FileAttributes, FileType, ObjectId, RemoteAttributes};

use common::namespace_mocks::MockProvider;
use common::{cache_over, dir, file, mount_point, oid};

#[tokio::test]
async fn plain_file_entry_copies_remote_attributes() {
    let provider = MockProvider::new(oid(1, 1));
    let cache = cache_over(&provider).await;

    let remote = file(oid(1, 3), "notes.txt", 99);
    let entry = cache
        .create_entry(oid(1, 1), "notes.txt", None, &remote, 4)
        .await
        .unwrap();

    assert_eq!(entry.name(), "notes.txt");
    assert_eq!(entry.parent_id(), oid(1, 1));
    assert_eq!(entry.object_id(), oid(1, 3));
    assert_eq!(entry.file_type(), FileType::File);
    assert_eq!(entry.file_index(), 4);
    assert_eq!(entry.attributes().end_of_file, 99);
    assert!(!entry.is_in_parent_tree());
    assert!(entry.target_name().is_none());
    assert_eq!(provider.evaluations(), 0);
}

#[tokio::test]
async fn mount_point_with_known_target_skips_the_resolver() {
    let provider = MockProvider::new(oid(1, 1));
    let cache = cache_over(&provider).await;

    let remote = mount_point(oid(1, 8), "vol2", oid(2, 1)).with_target_name("#cell:vol2");
    let entry = cache
        .create_entry(oid(1, 1), "vol2", Some("#cell:vol2"), &remote, 0)
        .await
        .unwrap();

    assert_eq!(entry.target_id(), oid(2, 1));
    assert_eq!(entry.target_name(), Some("#cell:vol2"));
    assert_eq!(provider.evaluations(), 0);
    let attributes = entry.attributes().file_attributes;
    assert!(attributes.contains(FileAttributes::REPARSE_POINT | FileAttributes::DIRECTORY));

    // The target volume gets an unevaluated root on the way.
    let volume = cache.registry().volume_of(&oid(2, 1)).unwrap();
    let root = volume.root().unwrap();
    assert_eq!(root.object_id(), oid(2, 1));
    assert!(root.is_not_evaluated());
}

#[tokio::test]
async fn mount_point_without_target_is_resolved() {
    let provider = MockProvider::new(oid(1, 1));
    provider.add_object(mount_point(oid(1, 8), "vol2", oid(2, 1)));
    provider.add_object(dir(oid(2, 1), ""));
    let cache = cache_over(&provider).await;

    let listed = RemoteAttributes::new(oid(1, 8), Some(FileType::MountPoint), "vol2");
    let entry = cache
        .create_entry(oid(1, 1), "vol2", None, &listed, 0)
        .await
        .unwrap();

    assert_eq!(entry.target_id(), oid(2, 1));
    assert_eq!(provider.evaluations(), 2, "mount point, then its target");
    assert!(cache.registry().volume_of(&oid(2, 1)).is_some());
}

#[tokio::test]
async fn existing_target_volume_is_reused() {
    let provider = MockProvider::new(oid(1, 1));
    let cache = cache_over(&provider).await;
    let first = cache.registry().init_root(oid(2, 1)).unwrap();

    let remote = mount_point(oid(1, 8), "vol2", oid(2, 1));
    cache
        .create_entry(oid(1, 1), "vol2", None, &remote, 0)
        .await
        .unwrap();

    let second = cache.registry().volume_of(&oid(2, 1)).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(cache.registry().len(), 2);
}

#[tokio::test]
async fn unresolvable_mount_point_fails_without_side_effects() {
    let provider = MockProvider::new(oid(1, 1));
    let cache = cache_over(&provider).await;

    // Nothing is evaluable, so resolution fails at the first hop.
    let listed = RemoteAttributes::new(oid(1, 8), Some(FileType::MountPoint), "dangling");
    let result = cache
        .create_entry(oid(1, 1), "dangling", None, &listed, 0)
        .await;

    assert!(matches!(result, Err(CacheError::NotFound)));
    assert_eq!(cache.registry().len(), 1);
}

/// A listing with an unresolvable mount point fails as a whole and is
/// retried from scratch on the next access.
#[tokio::test]
async fn unresolvable_mount_point_fails_its_directory_listing() {
    let provider = MockProvider::new(oid(1, 1));
    provider.add_child(oid(1, 1), dir(oid(1, 2), "D"));
    provider.add_child(
        oid(1, 1),
        RemoteAttributes::new(oid(1, 8), Some(FileType::MountPoint), "dangling"),
    );
    let cache = cache_over(&provider).await;
    let root = cache.global_root().unwrap();

    let result = cache.enumerate(&root).await;
    assert!(matches!(result, Err(CacheError::NotFound)));
    let state = root.directory().unwrap();
    assert!(!state.is_enumerated());
    assert_eq!(state.entry_count(), 0);

    provider.remove(oid(1, 8));
    cache.enumerate(&root).await.unwrap();
    assert_eq!(state.names(), [".", "..", "D"]);
}

#[tokio::test]
async fn cyclic_mount_point_hits_the_hop_bound() {
    let provider = MockProvider::new(oid(1, 1));
    provider.add_object(mount_point(oid(1, 8), "a", oid(3, 1)));
    provider.add_object(mount_point(oid(3, 1), "b", oid(1, 8)));
    let cache = cache_over(&provider).await;

    let listed = RemoteAttributes::new(oid(1, 8), Some(FileType::MountPoint), "a");
    let result = cache.create_entry(oid(1, 1), "a", None, &listed, 0).await;

    let hops = cache.resolver().max_hops();
    assert!(matches!(result, Err(CacheError::ResolutionLimit { hops: h }) if h == hops));
    assert_eq!(provider.evaluations(), hops);
}

#[tokio::test]
async fn unclassified_entry_is_flagged() {
    let provider = MockProvider::new(oid(1, 1));
    let cache = cache_over(&provider).await;

    let remote = RemoteAttributes::new(oid(1, 9), None, "odd");
    let entry = cache
        .create_entry(oid(1, 1), "odd", None, &remote, 0)
        .await
        .unwrap();
    assert_eq!(entry.file_type(), FileType::Directory);
    assert!(entry.is_not_evaluated());
    assert_eq!(entry.target_id(), ObjectId::EMPTY);
}
