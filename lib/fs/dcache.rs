use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use bitflags::bitflags;
use hashlink::LinkedHashMap;
use rustc_hash::FxHashMap;
use tokio::sync::Notify;

use crate::fs::fcb::NodeId;
use crate::fs::name_hash::{self, NameHashes};
use crate::fs::{CacheError, EntryAttributes, FileAttributes, FileType, ObjectId, RemoteAttributes};
use crate::sync::{self, Acquire, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// File index of the synthesized "." entry.
pub const DOT_FILE_INDEX: u32 = u32::MAX;
/// File index of the synthesized ".." entry.
pub const DOT_DOT_FILE_INDEX: u32 = u32::MAX - 1;

/// Identifies an entry within one directory's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub u64);

bitflags! {
    /// State bits of a [`DirectoryEntry`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u8 {
        /// The remote did not classify the object; its type is assumed.
        const NOT_EVALUATED  = 1 << 0;
        /// The entry is indexed by the parent's name-hash trees.
        const IN_PARENT_TREE = 1 << 1;
    }
}

/// One named child of a directory.
#[derive(Debug)]
pub struct DirectoryEntry {
    name: String,
    target_name: Option<String>,
    parent_id: ObjectId,
    object_id: ObjectId,
    target_id: ObjectId,
    file_type: FileType,
    attributes: EntryAttributes,
    file_index: u32,
    hashes: NameHashes,
    flags: EntryFlags,
    /// The materialized node, if any. The node links back through its
    /// `EntryLink`; both sides are severed under this tree's lock.
    node: Option<NodeId>,
}

fn copy_name(name: &str) -> Result<String, CacheError> {
    let mut owned = String::new();
    owned.try_reserve_exact(name.len())?;
    owned.push_str(name);
    Ok(owned)
}

impl DirectoryEntry {
    /// Builds an entry from remote attributes.
    ///
    /// An unclassified object becomes a directory flagged
    /// [`EntryFlags::NOT_EVALUATED`]. Attribute bits are decorated by type.
    /// Mount-point target resolution is layered on top by
    /// [`NamespaceCache::create_entry`](crate::fs::NamespaceCache::create_entry).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the name buffers cannot be
    /// allocated. Nothing is retained on failure.
    pub fn new(
        parent_id: ObjectId,
        name: &str,
        target_name: Option<&str>,
        remote: &RemoteAttributes,
        file_index: u32,
    ) -> Result<Self, CacheError> {
        let owned_name = copy_name(name)?;
        let owned_target = target_name.map(copy_name).transpose()?;

        let (file_type, flags) = match remote.file_type {
            Some(file_type) => (file_type, EntryFlags::empty()),
            None => (FileType::Directory, EntryFlags::NOT_EVALUATED),
        };
        let mut attributes = remote.attributes;
        attributes.file_attributes = file_type.decorate(attributes.file_attributes);

        Ok(Self {
            hashes: NameHashes::of(&owned_name),
            name: owned_name,
            target_name: owned_target,
            parent_id,
            object_id: remote.object_id,
            target_id: remote.target_id,
            file_type,
            attributes,
            file_index,
            flags,
            node: None,
        })
    }

    fn pseudo(
        name: &'static str,
        parent_id: ObjectId,
        object_id: ObjectId,
        times: &EntryAttributes,
        file_index: u32,
    ) -> Result<Self, CacheError> {
        let mut attributes = EntryAttributes::timestamps_of(times);
        attributes.file_attributes = FileAttributes::DIRECTORY;
        Ok(Self {
            name: copy_name(name)?,
            target_name: None,
            parent_id,
            object_id,
            target_id: ObjectId::EMPTY,
            file_type: FileType::Directory,
            attributes,
            file_index,
            hashes: NameHashes::of(name),
            flags: EntryFlags::empty(),
            node: None,
        })
    }

    /// The entry's name. Immutable once created.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target text of a symlink or mount point.
    #[must_use]
    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    /// The directory holding this entry.
    #[must_use]
    pub fn parent_id(&self) -> ObjectId {
        self.parent_id
    }

    /// The object this entry names.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// The redirect target, empty for non-redirects.
    #[must_use]
    pub fn target_id(&self) -> ObjectId {
        self.target_id
    }

    pub(crate) fn set_target_id(&mut self, target_id: ObjectId) {
        self.target_id = target_id;
    }

    /// The entry's type.
    #[must_use]
    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Cached attributes, decorated by type.
    #[must_use]
    pub fn attributes(&self) -> &EntryAttributes {
        &self.attributes
    }

    pub(crate) fn set_attributes(&mut self, attributes: EntryAttributes) {
        self.attributes = attributes;
        self.flags.remove(EntryFlags::NOT_EVALUATED);
    }

    /// Position assigned at enumeration.
    #[must_use]
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    /// Both name hashes.
    #[must_use]
    pub fn hashes(&self) -> NameHashes {
        self.hashes
    }

    /// The entry's state bits.
    #[must_use]
    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    /// Whether the parent's name-hash trees index this entry.
    #[must_use]
    pub fn is_in_parent_tree(&self) -> bool {
        self.flags.contains(EntryFlags::IN_PARENT_TREE)
    }

    /// Whether the entry's type was assumed rather than reported.
    #[must_use]
    pub fn is_not_evaluated(&self) -> bool {
        self.flags.contains(EntryFlags::NOT_EVALUATED)
    }

    /// The node materialized from this entry, if any.
    #[must_use]
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub(crate) fn bind(&mut self, node: NodeId) {
        self.node = Some(node);
    }
}

type HashTree = FxHashMap<u32, Vec<EntryId>>;

fn unindex(tree: &mut HashTree, hash: u32, id: EntryId) {
    if let Some(bucket) = tree.get_mut(&hash) {
        bucket.retain(|candidate| *candidate != id);
        if bucket.is_empty() {
            tree.remove(&hash);
        }
    }
}

/// A directory's children: an insertion-ordered list plus case-sensitive and
/// case-insensitive hash trees over the same entries.
///
/// Hash buckets hold every entry sharing a hash; lookups confirm a hit by
/// comparing the full name.
#[derive(Debug)]
pub struct DirectoryTree {
    entries: LinkedHashMap<EntryId, DirectoryEntry>,
    case_sensitive: HashTree,
    case_insensitive: HashTree,
    /// Never reset, so ids stay unique across re-enumerations.
    next_entry: u64,
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: LinkedHashMap::new(),
            case_sensitive: HashTree::default(),
            case_insensitive: HashTree::default(),
            next_entry: 0,
        }
    }

    fn allocate_id(&mut self) -> EntryId {
        let id = EntryId(self.next_entry);
        self.next_entry += 1;
        id
    }

    /// Number of entries in the list, pseudo-entries included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replaces the list with the "." and ".." pseudo-entries.
    ///
    /// Both copy `parent_attrs`' timestamps and stay out of the hash trees.
    /// Any previous contents are discarded, so this is only called on a fresh
    /// or drained tree.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if either entry cannot be
    /// allocated; the list is left empty.
    pub fn initialize_empty(
        &mut self,
        dir_id: ObjectId,
        parent_id: ObjectId,
        parent_attrs: &EntryAttributes,
    ) -> Result<(), CacheError> {
        self.drain();
        let dot = DirectoryEntry::pseudo(".", dir_id, dir_id, parent_attrs, DOT_FILE_INDEX)?;
        let dot_dot =
            DirectoryEntry::pseudo("..", dir_id, parent_id, parent_attrs, DOT_DOT_FILE_INDEX)?;
        let dot_id = self.allocate_id();
        self.entries.insert(dot_id, dot);
        let dot_dot_id = self.allocate_id();
        self.entries.insert(dot_dot_id, dot_dot);
        Ok(())
    }

    /// Appends `entry` to the list and indexes it in both hash trees.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the hash trees cannot
    /// grow. The entry is dropped and the tree is unchanged.
    pub fn insert(&mut self, mut entry: DirectoryEntry) -> Result<EntryId, CacheError> {
        self.case_sensitive.try_reserve(1)?;
        self.case_insensitive.try_reserve(1)?;

        let id = self.allocate_id();
        self.case_sensitive
            .entry(entry.hashes.case_sensitive)
            .or_default()
            .push(id);
        self.case_insensitive
            .entry(entry.hashes.case_insensitive)
            .or_default()
            .push(id);
        entry.flags.insert(EntryFlags::IN_PARENT_TREE);
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Finds an entry by name through the matching hash tree.
    ///
    /// Pseudo-entries are positional and never match.
    #[must_use]
    pub fn lookup(&self, name: &str, case_insensitive: bool) -> Option<EntryId> {
        let (tree, hash) = if case_insensitive {
            (&self.case_insensitive, name_hash::hash_name(name, true))
        } else {
            (&self.case_sensitive, name_hash::hash_name(name, false))
        };
        tree.get(&hash)?.iter().copied().find(|id| {
            self.entries.get(id).is_some_and(|entry| {
                if case_insensitive {
                    name_hash::eq_ignore_case(&entry.name, name)
                } else {
                    entry.name == name
                }
            })
        })
    }

    /// Returns the entry with the given id.
    #[must_use]
    pub fn get(&self, id: EntryId) -> Option<&DirectoryEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut DirectoryEntry> {
        self.entries.get_mut(&id)
    }

    /// Unlinks one entry from the list and both trees.
    pub fn remove(&mut self, id: EntryId) -> Option<DirectoryEntry> {
        let mut entry = self.entries.remove(&id)?;
        if entry.flags.contains(EntryFlags::IN_PARENT_TREE) {
            unindex(&mut self.case_sensitive, entry.hashes.case_sensitive, id);
            unindex(&mut self.case_insensitive, entry.hashes.case_insensitive, id);
            entry.flags.remove(EntryFlags::IN_PARENT_TREE);
        }
        Some(entry)
    }

    /// Unlinks every entry, returning them in list order.
    pub fn drain(&mut self) -> Vec<(EntryId, DirectoryEntry)> {
        self.case_sensitive.clear();
        self.case_insensitive.clear();
        let entries = std::mem::replace(&mut self.entries, LinkedHashMap::new());
        entries
            .into_iter()
            .map(|(id, mut entry)| {
                entry.flags.remove(EntryFlags::IN_PARENT_TREE);
                (id, entry)
            })
            .collect()
    }

    /// Iterates entries in list (insertion) order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &DirectoryEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }
}

/// Population states for a directory.
const POPULATE_UNCLAIMED: u8 = 0;
const POPULATE_IN_PROGRESS: u8 = 1;
const POPULATE_DONE: u8 = 2;

/// Result of attempting to claim a directory for enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateStatus {
    /// This caller won the race and should enumerate the directory.
    /// Carries the generation at claim time so
    /// [`DirState::finish_populate`] can detect an intervening invalidation.
    Claimed(u64),
    /// Another caller is enumerating; wait and re-check.
    InProgress,
    /// The directory is enumerated.
    Done,
}

/// Directory payload of a cache node: the entry tree and its enumeration gate.
///
/// The tree has its own lock, taken after the owning node's lock and before
/// any child node's lock.
#[derive(Debug)]
pub struct DirState {
    tree: RwLock<DirectoryTree>,
    populated: AtomicU8,
    /// Bumped by every [`clear_listing`](Self::clear_listing) so an
    /// enumeration racing an invalidation does not install stale entries.
    generation: AtomicU64,
    /// Wakes waiters when `populated` transitions out of `IN_PROGRESS`.
    notify: Notify,
}

impl Default for DirState {
    fn default() -> Self {
        Self::new()
    }
}

impl DirState {
    /// Creates an unenumerated, empty directory payload.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(DirectoryTree::new()),
            populated: AtomicU8::new(POPULATE_UNCLAIMED),
            generation: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Acquires the entry tree shared, blocking.
    pub fn read(&self) -> RwLockReadGuard<'_, DirectoryTree> {
        sync::shared(&self.tree)
    }

    /// Acquires the entry tree shared in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WouldBlock`] under contention in
    /// [`Acquire::NoWait`] mode.
    pub fn read_with(&self, mode: Acquire) -> Result<RwLockReadGuard<'_, DirectoryTree>, CacheError> {
        sync::acquire_shared(&self.tree, mode)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, DirectoryTree> {
        sync::exclusive(&self.tree)
    }

    /// Whether the directory is enumerated.
    #[must_use]
    pub fn is_enumerated(&self) -> bool {
        self.populated.load(Ordering::Acquire) == POPULATE_DONE
    }

    /// Number of entries currently listed, pseudo-entries included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.read().len()
    }

    /// Names in list order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|(_, entry)| entry.name().to_owned())
            .collect()
    }

    /// The current invalidation generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Atomically try to claim the directory for enumeration.
    ///
    /// - `UNCLAIMED → IN_PROGRESS`: returns `Claimed` (caller enumerates)
    /// - Already `IN_PROGRESS`: returns `InProgress` (caller waits)
    /// - Already `DONE`: returns `Done`
    pub fn try_claim_populate(&self) -> PopulateStatus {
        match self.populated.compare_exchange(
            POPULATE_UNCLAIMED,
            POPULATE_IN_PROGRESS,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => PopulateStatus::Claimed(self.generation.load(Ordering::Acquire)),
            Err(POPULATE_IN_PROGRESS) => PopulateStatus::InProgress,
            Err(_) => PopulateStatus::Done,
        }
    }

    /// Installs an enumeration under the tree lock.
    ///
    /// `fill` runs only if no invalidation bumped the generation since
    /// `claimed_gen`. Returns `Ok(true)` when the listing was installed and
    /// `Ok(false)` when it was stale; the gate is then back to `UNCLAIMED`.
    ///
    /// # Errors
    ///
    /// Propagates `fill`'s error after emptying the list, so a failed
    /// enumeration never leaves a partial listing behind.
    pub fn finish_populate(
        &self,
        claimed_gen: u64,
        fill: impl FnOnce(&mut DirectoryTree) -> Result<(), CacheError>,
    ) -> Result<bool, CacheError> {
        let outcome = {
            let mut tree = self.write();
            let outcome = if self.generation.load(Ordering::Acquire) == claimed_gen {
                fill(&mut tree).map(|()| true).inspect_err(|_| {
                    tree.drain();
                })
            } else {
                Ok(false)
            };
            let next = if matches!(outcome, Ok(true)) {
                POPULATE_DONE
            } else {
                POPULATE_UNCLAIMED
            };
            self.populated.store(next, Ordering::Release);
            outcome
        };
        self.notify.notify_waiters();
        outcome
    }

    /// Abort an enumeration attempt, resetting back to unclaimed so another
    /// caller can retry.
    pub fn abort_populate(&self) {
        self.populated.store(POPULATE_UNCLAIMED, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Drains the listing and forces re-enumeration on next access.
    ///
    /// Takes the tree by `&mut` so the caller holds the write lock, which
    /// serializes the generation bump with [`finish_populate`](Self::finish_populate).
    /// The reset is `DONE → UNCLAIMED` only; an in-flight enumeration sees
    /// the new generation and resets itself.
    pub fn clear_listing(&self, tree: &mut DirectoryTree) -> Vec<(EntryId, DirectoryEntry)> {
        let drained = tree.drain();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = self.populated.compare_exchange(
            POPULATE_DONE,
            POPULATE_UNCLAIMED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        self.notify.notify_waiters();
        drained
    }

    /// Wait until the directory is no longer in the `InProgress` state.
    ///
    /// The `Notified` future is pinned and `enable()`d before checking the
    /// flag so the waiter is registered before the state check; a
    /// `notify_waiters()` between the two would otherwise be lost.
    pub async fn wait_populated(&self) {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            if self.populated.load(Ordering::Acquire) != POPULATE_IN_PROGRESS {
                return;
            }
            notified.await;
        }
    }
}

/// RAII guard that calls [`DirState::abort_populate`] on drop unless defused.
///
/// Keeps the gate from sticking in `IN_PROGRESS` if the enumerating future is
/// cancelled.
pub(crate) struct PopulateGuard<'a> {
    state: &'a DirState,
    armed: bool,
}

impl<'a> PopulateGuard<'a> {
    pub(crate) fn new(state: &'a DirState) -> Self {
        Self { state, armed: true }
    }

    /// Defuse the guard once [`DirState::finish_populate`] has run.
    pub(crate) fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for PopulateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.abort_populate();
        }
    }
}
