//! Invalidation of cached state on remote change notifications.
//!
//! A node, once invalid, is never revalidated: the next lookup materializes
//! a fresh one. Teardown is not transactional across a directory's children;
//! an interrupted invalidation leaves what it processed invalid, and running
//! it again skips those nodes.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::fs::dcache::DirState;
use crate::fs::fcb::NodePayload;
use crate::fs::provider::{ExtentManager, RemoteProvider};
use crate::fs::{CacheError, FileType, NamespaceCache, NodePin, ObjectId};

/// Why the remote invalidated an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidationReason {
    /// The object was deleted. Tears down cached structure.
    Deleted,
    /// The object's data version changed.
    DataVersion,
    /// The server broke its callback promise.
    Callback,
    /// The callback promise expired.
    Expired,
    /// Explicit flush request.
    Flush,
    /// The caller's credentials changed.
    Credentials,
}

/// One invalidation event as delivered to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InvalidationRecord {
    /// The invalidated object.
    pub object: ObjectId,
    /// Why it was invalidated.
    pub reason: InvalidationReason,
    /// The change is too broad for one object; rebuild everything.
    #[serde(default)]
    pub whole_volume: bool,
}

impl<P: RemoteProvider, X: ExtentManager> NamespaceCache<P, X> {
    /// Applies one invalidation record.
    ///
    /// # Errors
    ///
    /// As [`invalidate_whole_volume`](Self::invalidate_whole_volume) or
    /// [`invalidate_object`](Self::invalidate_object).
    pub async fn invalidate(&self, record: &InvalidationRecord) -> Result<(), CacheError> {
        if record.whole_volume {
            self.invalidate_whole_volume().await
        } else {
            self.invalidate_object(record.object, record.reason).await
        }
    }

    /// Drops every cached volume and rebuilds the global root.
    ///
    /// Every node is retired and pending cached-data waits are cancelled;
    /// files are flushed and torn down before the root is rebuilt.
    ///
    /// # Errors
    ///
    /// Fails if the global root cannot be rebuilt.
    #[instrument(name = "NamespaceCache::invalidate_whole_volume", skip(self))]
    pub async fn invalidate_whole_volume(&self) -> Result<(), CacheError> {
        let volumes = self.registry.drain();
        let mut retired = Vec::new();
        for volume in &volumes {
            for node in volume.pin_all() {
                node.cancel_extents();
                volume.retire(&node);
                retired.push(node);
            }
        }
        debug!(volumes = volumes.len(), nodes = retired.len(), "volumes dropped");

        for node in retired.iter().filter(|node| node.file_type() == FileType::File) {
            self.release_file_data(node.object_id()).await;
        }
        drop(retired);

        self.rebuild_root().await.map(|_| ())
    }

    /// Invalidates one object.
    ///
    /// The node is marked "not evaluated". A symlink or mount point is
    /// resolved first and the rest applies to its target. Only
    /// [`InvalidationReason::Deleted`] tears down cached structure.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Unsuccessful`] if nothing is cached for `id`, or a
    ///   redirect's target cannot be found.
    /// - Target resolution and allocation failures.
    /// - [`CacheError::InternalInconsistency`] if a teardown reaches a
    ///   redirect.
    #[instrument(name = "NamespaceCache::invalidate_object", skip(self))]
    pub async fn invalidate_object(
        &self,
        id: ObjectId,
        reason: InvalidationReason,
    ) -> Result<(), CacheError> {
        let Some(volume) = self.registry.volume_of(&id) else {
            debug!(object = ?id, volume = ?id.high_key(), "volume not cached");
            return Err(CacheError::Unsuccessful);
        };
        let Some(node) = volume.locate(&id) else {
            debug!(object = ?id, "object not cached");
            return Err(CacheError::Unsuccessful);
        };
        node.mark_not_evaluated();

        let target = if node.file_type().is_redirect() {
            match self.resolve_target(&node).await {
                Ok(target) => {
                    target.mark_not_evaluated();
                    target
                }
                Err(CacheError::NotFound) => {
                    warn!(object = ?id, "redirect target not found");
                    return Err(CacheError::Unsuccessful);
                }
                Err(error) => return Err(error),
            }
        } else {
            node.clone()
        };

        match reason {
            InvalidationReason::Deleted => self.tear_down_deleted(&target).await,
            InvalidationReason::DataVersion
            | InvalidationReason::Callback
            | InvalidationReason::Expired
            | InvalidationReason::Flush
            | InvalidationReason::Credentials => Ok(()),
        }
    }

    async fn tear_down_deleted(&self, target: &NodePin) -> Result<(), CacheError> {
        // Lookups that lose the race with the teardown below see the target
        // invalid instead of repopulating it. A volume root stays valid.
        if target.id() != target.volume().root_id() && !target.file_type().is_redirect() {
            target.mark_invalid();
        }
        let mut retired = match target.payload() {
            NodePayload::Directory(dir) => {
                let mut retired = clear_directory(target, dir);
                let volume = target.volume();
                for node in volume.descendants_of(target.id()) {
                    node.cancel_extents();
                    volume.retire(&node);
                    retired.push(node);
                }
                retired
            }
            NodePayload::File(extents) => {
                extents.cancel();
                Vec::new()
            }
            NodePayload::SymLink(_) | NodePayload::MountPoint(_) => {
                debug_assert!(
                    !target.file_type().is_redirect(),
                    "deleted teardown reached a redirect node"
                );
                error!(object = ?target.object_id(), "deleted teardown reached a redirect node");
                return Err(CacheError::InternalInconsistency(
                    "deleted teardown reached a redirect node",
                ));
            }
        };

        detach_from_parent(target);
        if target.file_type() == FileType::File {
            retired.push(target.clone());
        }
        debug!(object = ?target.object_id(), retired = retired.len(), "deleted object torn down");

        for node in retired.iter().filter(|node| node.file_type() == FileType::File) {
            self.release_file_data(node.object_id()).await;
        }
        Ok(())
    }

    async fn release_file_data(&self, id: ObjectId) {
        if let Err(error) = self.extents.flush(id).await {
            warn!(object = ?id, %error, "failed to flush cached data");
        }
        if let Err(error) = self.extents.tear_down(id).await {
            warn!(object = ?id, %error, "failed to tear down cached data");
        }
    }
}

/// Empties `target`'s listing and retires every materialized child.
///
/// Runs under `target`'s node lock and entry-tree lock, taking each child's
/// locks inside them. Unmaterialized entries are simply dropped.
fn clear_directory(target: &NodePin, dir: &DirState) -> Vec<NodePin> {
    let volume = target.volume();
    let _target_guard = target.write();
    let mut tree = dir.write();
    let drained = dir.clear_listing(&mut tree);

    let mut retired = Vec::new();
    for (_, entry) in drained {
        let Some(child) = entry.node().and_then(|id| volume.pin(id)) else {
            continue;
        };
        if child.is_invalid() {
            continue;
        }
        child.cancel_extents();
        volume.retire(&child);
        retired.push(child);
    }
    retired
}

/// Unlinks `target`'s entry from its parent and retires it.
///
/// Locks the parent node, then the parent's entry tree, then `target`, and
/// re-checks the link under them. A volume root keeps its node.
fn detach_from_parent(target: &NodePin) {
    let volume = target.volume();
    if let Some(link) = target.entry_link()
        && let Some(parent) = volume.pin(link.parent)
        && let Some(parent_dir) = parent.directory()
    {
        let _parent_guard = parent.write();
        let mut tree = parent_dir.write();
        let mut child = target.write();
        if child.entry == Some(link) {
            tree.remove(link.entry);
            child.entry = None;
        }
    }
    if target.id() != volume.root_id() {
        volume.retire(target);
    }
}
