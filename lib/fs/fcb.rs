//! Cache nodes: the materialized, lockable, reference-counted representation
//! of one object.
//!
//! Nodes live in their volume's arena and refer to each other by [`NodeId`].
//! A [`NodePin`] is the only way to keep a node alive across an operation.
//!
//! Lock order, outermost first:
//!
//! 1. parent node lock
//! 2. parent entry-tree lock
//! 3. child node lock
//! 4. volume `LowKey` tree
//! 5. volume node arena
//!
//! The `INVALID` and `NOT_EVALUATED` bits are atomics, so arena scans read
//! them without taking node locks.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;

use crate::fs::dcache::{DirState, EntryId};
use crate::fs::extents::ExtentState;
use crate::fs::volume::VolumeRoot;
use crate::fs::{CacheError, EntryAttributes, FileType, ObjectId, VolumeKey};
use crate::sync::{self, Acquire, Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Index of a node within its volume's arena. Never reused, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Stored in a node's parent slot while it has no parent.
const NO_PARENT: u64 = 0;

/// A node in any volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    /// The volume whose arena holds the node.
    pub volume: VolumeKey,
    /// The node within that arena.
    pub node: NodeId,
}

/// Back-link from a node to the directory entry it was materialized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryLink {
    /// The directory node holding the entry.
    pub parent: NodeId,
    /// The entry within the parent's tree.
    pub entry: EntryId,
}

bitflags! {
    /// Atomic state bits of a [`CacheNode`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u32 {
        /// Terminal. The node is excluded from new lookups.
        const INVALID       = 1 << 0;
        /// Attributes must be re-fetched before they are reported.
        const NOT_EVALUATED = 1 << 1;
    }
}

/// Mutable node state guarded by the node's resource lock.
#[derive(Debug)]
pub struct NodeState {
    pub(crate) entry: Option<EntryLink>,
    pub(crate) target_id: ObjectId,
    pub(crate) attributes: EntryAttributes,
}

impl NodeState {
    /// The entry this node is bound to, `None` once detached.
    #[must_use]
    pub fn entry(&self) -> Option<EntryLink> {
        self.entry
    }

    /// The redirect target id.
    #[must_use]
    pub fn target_id(&self) -> ObjectId {
        self.target_id
    }

    /// Cached attributes.
    #[must_use]
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }
}

/// Lazily resolved target of a symlink or mount point.
#[derive(Debug, Default)]
pub struct RedirectTarget {
    resolved: Mutex<Option<NodeRef>>,
}

impl RedirectTarget {
    /// The resolved target, if any.
    #[must_use]
    pub fn resolved(&self) -> Option<NodeRef> {
        *sync::locked(&self.resolved)
    }

    pub(crate) fn set(&self, target: NodeRef) {
        *sync::locked(&self.resolved) = Some(target);
    }

    pub(crate) fn clear(&self) {
        *sync::locked(&self.resolved) = None;
    }
}

/// Type-specific payload of a node.
#[derive(Debug)]
pub enum NodePayload {
    /// Entry tree plus enumeration gate.
    Directory(DirState),
    /// Cached-data request status and signal.
    File(ExtentState),
    /// Symlink and its resolved target.
    SymLink(RedirectTarget),
    /// Mount point and its resolved target.
    MountPoint(RedirectTarget),
}

impl NodePayload {
    fn for_type(file_type: FileType) -> Self {
        match file_type {
            FileType::Directory => Self::Directory(DirState::new()),
            FileType::File => Self::File(ExtentState::new()),
            FileType::SymLink => Self::SymLink(RedirectTarget::default()),
            FileType::MountPoint => Self::MountPoint(RedirectTarget::default()),
        }
    }
}

/// Everything needed to allocate a node.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeSeed {
    pub(crate) parent: Option<NodeId>,
    pub(crate) object_id: ObjectId,
    pub(crate) file_type: FileType,
    pub(crate) link: Option<EntryLink>,
    pub(crate) target_id: ObjectId,
    pub(crate) attributes: EntryAttributes,
    pub(crate) not_evaluated: bool,
}

/// One materialized object.
#[derive(Debug)]
pub struct CacheNode {
    id: NodeId,
    object_id: ObjectId,
    /// Back-reference only; the parent does not own the child. Set once,
    /// either at allocation or when a detached node is adopted.
    parent: AtomicU64,
    flags: AtomicU32,
    open_refs: AtomicUsize,
    resource: RwLock<NodeState>,
    payload: NodePayload,
}

impl CacheNode {
    pub(crate) fn new(id: NodeId, seed: NodeSeed) -> Self {
        let flags = if seed.not_evaluated {
            NodeFlags::NOT_EVALUATED
        } else {
            NodeFlags::empty()
        };
        Self {
            id,
            object_id: seed.object_id,
            parent: AtomicU64::new(seed.parent.map_or(NO_PARENT, |parent| parent.0)),
            flags: AtomicU32::new(flags.bits()),
            open_refs: AtomicUsize::new(0),
            resource: RwLock::new(NodeState {
                entry: seed.link,
                target_id: seed.target_id,
                attributes: seed.attributes,
            }),
            payload: NodePayload::for_type(seed.file_type),
        }
    }

    /// The node's arena index.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The object this node represents.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// The parent directory node, `None` for roots and detached targets.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        match self.parent.load(Ordering::Acquire) {
            NO_PARENT => None,
            id => Some(NodeId(id)),
        }
    }

    /// Gives a detached node its parent. Returns `false` if it already had
    /// one.
    pub(crate) fn adopt_parent(&self, parent: NodeId) -> bool {
        parent != self.id
            && self
                .parent
                .compare_exchange(NO_PARENT, parent.0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// The node's type, fixed by its payload.
    #[must_use]
    pub fn file_type(&self) -> FileType {
        match self.payload {
            NodePayload::Directory(_) => FileType::Directory,
            NodePayload::File(_) => FileType::File,
            NodePayload::SymLink(_) => FileType::SymLink,
            NodePayload::MountPoint(_) => FileType::MountPoint,
        }
    }

    /// The type-specific payload.
    #[must_use]
    pub fn payload(&self) -> &NodePayload {
        &self.payload
    }

    /// The directory payload, if this is a directory.
    #[must_use]
    pub fn directory(&self) -> Option<&DirState> {
        match &self.payload {
            NodePayload::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    /// The extent state, if this is a file.
    #[must_use]
    pub fn extents(&self) -> Option<&ExtentState> {
        match &self.payload {
            NodePayload::File(extents) => Some(extents),
            _ => None,
        }
    }

    /// The redirect payload, if this is a symlink or mount point.
    #[must_use]
    pub fn redirect(&self) -> Option<&RedirectTarget> {
        match &self.payload {
            NodePayload::SymLink(target) | NodePayload::MountPoint(target) => Some(target),
            _ => None,
        }
    }

    /// Acquires the node lock shared, blocking.
    pub fn read(&self) -> RwLockReadGuard<'_, NodeState> {
        sync::shared(&self.resource)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, NodeState> {
        sync::exclusive(&self.resource)
    }

    /// Acquires the node lock shared in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WouldBlock`] under contention in
    /// [`Acquire::NoWait`] mode.
    pub fn lock_shared(&self, mode: Acquire) -> Result<RwLockReadGuard<'_, NodeState>, CacheError> {
        sync::acquire_shared(&self.resource, mode)
    }

    /// A copy of the cached attributes.
    #[must_use]
    pub fn attributes(&self) -> EntryAttributes {
        self.read().attributes
    }

    /// The redirect target id.
    #[must_use]
    pub fn target_id(&self) -> ObjectId {
        self.read().target_id
    }

    pub(crate) fn set_target_id(&self, target_id: ObjectId) {
        self.write().target_id = target_id;
    }

    /// The entry this node is bound to.
    #[must_use]
    pub fn entry_link(&self) -> Option<EntryLink> {
        self.read().entry
    }

    /// The node's state bits.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Whether the node was invalidated.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.flags().contains(NodeFlags::INVALID)
    }

    /// Whether the node's attributes must be re-fetched.
    #[must_use]
    pub fn is_not_evaluated(&self) -> bool {
        self.flags().contains(NodeFlags::NOT_EVALUATED)
    }

    /// Forces a re-fetch of attributes on next access.
    pub fn mark_not_evaluated(&self) {
        self.flags
            .fetch_or(NodeFlags::NOT_EVALUATED.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_not_evaluated(&self) {
        self.flags
            .fetch_and(!NodeFlags::NOT_EVALUATED.bits(), Ordering::AcqRel);
    }

    /// Marks the node invalid. Returns `false` if it already was.
    pub(crate) fn mark_invalid(&self) -> bool {
        let previous = self.flags.fetch_or(NodeFlags::INVALID.bits(), Ordering::AcqRel);
        previous & NodeFlags::INVALID.bits() == 0
    }

    /// Cancels a pending cached-data request and wakes its waiters.
    ///
    /// Returns `true` if this call cancelled it. A no-op on non-files.
    pub fn cancel_extents(&self) -> bool {
        self.extents().is_some_and(ExtentState::cancel)
    }

    /// Number of live pins.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_refs.load(Ordering::Acquire)
    }
}

/// Scoped reference to a cache node.
///
/// Creating a pin increments the node's reference count and dropping it
/// decrements it, on every exit path. Dropping the last pin of an invalid
/// node removes it from its volume's arena.
pub struct NodePin {
    volume: Arc<VolumeRoot>,
    node: Arc<CacheNode>,
}

impl NodePin {
    /// Pins `node`. Callers hold the arena lock they found it under, so a
    /// concurrent reap cannot observe a zero count in between.
    pub(crate) fn new(volume: Arc<VolumeRoot>, node: Arc<CacheNode>) -> Self {
        node.open_refs.fetch_add(1, Ordering::AcqRel);
        Self { volume, node }
    }

    /// The volume holding the node.
    #[must_use]
    pub fn volume(&self) -> &Arc<VolumeRoot> {
        &self.volume
    }

    /// The pinned node.
    #[must_use]
    pub fn node(&self) -> &Arc<CacheNode> {
        &self.node
    }

    /// A copyable reference to the node.
    #[must_use]
    pub fn node_ref(&self) -> NodeRef {
        NodeRef {
            volume: self.volume.key(),
            node: self.node.id(),
        }
    }
}

impl Deref for NodePin {
    type Target = CacheNode;

    fn deref(&self) -> &CacheNode {
        &self.node
    }
}

impl Clone for NodePin {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.volume), Arc::clone(&self.node))
    }
}

impl Drop for NodePin {
    fn drop(&mut self) {
        if self.node.open_refs.fetch_sub(1, Ordering::AcqRel) == 1 && self.node.is_invalid() {
            self.volume.reap(self.node.id());
        }
    }
}

impl fmt::Debug for NodePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePin")
            .field("volume", &self.volume.key())
            .field("node", &self.node.id())
            .field("object_id", &self.node.object_id())
            .field("file_type", &self.node.file_type())
            .finish()
    }
}

/// Whether `ancestor` appears on `candidate`'s parent chain.
///
/// A node is not its own descendant. An adopted node may have a parent
/// allocated after it, so the walk is bounded by the arena size.
pub(crate) fn is_descendant_of(
    nodes: &BTreeMap<NodeId, Arc<CacheNode>>,
    candidate: NodeId,
    ancestor: NodeId,
) -> bool {
    let mut current = nodes.get(&candidate).and_then(|node| node.parent());
    for _ in 0..nodes.len() {
        let Some(id) = current else {
            return false;
        };
        if id == ancestor {
            return true;
        }
        current = nodes.get(&id).and_then(|node| node.parent());
    }
    false
}
