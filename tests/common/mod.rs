#![allow(dead_code, missing_docs, clippy::unwrap_used)]

pub mod namespace_mocks;

use std::time::Duration;

use redir_cache::fs::{CacheOptions, FileType, NamespaceCache, ObjectId, RemoteAttributes};

use namespace_mocks::{MockExtents, MockProvider};

/// Cell used by every test object.
pub const CELL: u32 = 1;

/// Builds an id in the test cell. Volume roots use vnode 1.
pub fn oid(volume: u32, vnode: u32) -> ObjectId {
    ObjectId::new(CELL, volume, vnode, 1)
}

pub fn dir(id: ObjectId, name: &str) -> RemoteAttributes {
    RemoteAttributes::new(id, Some(FileType::Directory), name)
}

pub fn file(id: ObjectId, name: &str, size: u64) -> RemoteAttributes {
    RemoteAttributes::new(id, Some(FileType::File), name).with_size(size)
}

pub fn mount_point(id: ObjectId, name: &str, target: ObjectId) -> RemoteAttributes {
    RemoteAttributes::new(id, Some(FileType::MountPoint), name).with_target(target)
}

pub fn symlink(id: ObjectId, name: &str, target: ObjectId) -> RemoteAttributes {
    RemoteAttributes::new(id, Some(FileType::SymLink), name).with_target(target)
}

pub type TestCache = NamespaceCache<MockProvider, MockExtents>;

/// Builds a cache over `provider` with default options.
pub async fn cache_over(provider: &MockProvider) -> TestCache {
    NamespaceCache::new(provider.clone(), MockExtents::default(), CacheOptions::default())
        .await
        .unwrap()
}

/// The standard tree used across suites:
///
/// ```text
/// /            (1,1)
/// ├── D        (1,2) dir
/// │   ├── A    (1,3) file
/// │   ├── B    (1,4) dir
/// │   │   └── E (1,6) file
/// │   └── C    (1,5) file
/// └── readme   (1,7) file
/// ```
pub fn standard_tree() -> MockProvider {
    let provider = MockProvider::new(oid(1, 1));
    provider.add_child(oid(1, 1), dir(oid(1, 2), "D"));
    provider.add_child(oid(1, 2), file(oid(1, 3), "A", 10));
    provider.add_child(oid(1, 2), dir(oid(1, 4), "B"));
    provider.add_child(oid(1, 2), file(oid(1, 5), "C", 20));
    provider.add_child(oid(1, 4), file(oid(1, 6), "E", 30));
    provider.add_child(oid(1, 1), file(oid(1, 7), "readme", 40));
    provider
}

/// Polls `check` until it returns true, or panics after a second.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1 second");
}
