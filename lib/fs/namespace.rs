use tracing::{debug, instrument, warn};

use crate::fs::access;
use crate::fs::dcache::{DirectoryEntry, EntryId, PopulateGuard, PopulateStatus};
use crate::fs::fcb::{EntryLink, NodeSeed};
use crate::fs::provider::{ExtentManager, RemoteProvider};
use crate::fs::resolver::{DEFAULT_MAX_HOPS, TargetResolver};
use crate::fs::sysname::{self, SysNameArch, SysNameTable};
use crate::fs::volume::VolumeRegistry;
use crate::fs::{
    CacheError, DirEntry, EntryAttributes, FileType, NodePin, ObjectId, RemoteAttributes,
};
use crate::sync::Acquire;

/// Attempts a lookup makes before giving up on a directory that keeps being
/// invalidated underneath it.
const MAX_LOOKUP_ATTEMPTS: usize = 4;

/// Tunables handed to [`NamespaceCache::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Evaluations the target resolver may make per resolution.
    pub max_resolve_hops: usize,
    /// Name of the namespace root.
    pub server_name: String,
    /// `@sys` substitutions for 32-bit callers, in preference order.
    pub sysnames_32: Vec<String>,
    /// `@sys` substitutions for 64-bit callers, in preference order.
    pub sysnames_64: Vec<String>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_resolve_hops: DEFAULT_MAX_HOPS,
            server_name: "AFS".to_owned(),
            sysnames_32: vec!["amd64_linux26".to_owned()],
            sysnames_64: vec!["amd64_linux26".to_owned()],
        }
    }
}

/// Whether the cache can serve requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// The global root exists and is enumerated.
    Ready,
    /// The global root is missing or not yet enumerated.
    NotReady,
}

/// The namespace cache: volumes, nodes and entries mirroring the remote
/// namespace, kept coherent by invalidation.
///
/// All state is owned by the instance, so independent caches never share
/// anything.
pub struct NamespaceCache<P: RemoteProvider, X: ExtentManager> {
    pub(super) registry: VolumeRegistry,
    pub(super) provider: P,
    pub(super) extents: X,
    pub(super) resolver: TargetResolver,
    pub(super) sysnames: SysNameTable,
    server_name: String,
}

impl<P: RemoteProvider, X: ExtentManager> NamespaceCache<P, X> {
    /// Create a cache and build the global root from the provider.
    ///
    /// # Errors
    ///
    /// Fails if the global root cannot be evaluated or allocated.
    pub async fn new(provider: P, extents: X, options: CacheOptions) -> Result<Self, CacheError> {
        let cache = Self {
            registry: VolumeRegistry::new(),
            provider,
            extents,
            resolver: TargetResolver::new(options.max_resolve_hops),
            sysnames: SysNameTable::with_lists(options.sysnames_32, options.sysnames_64),
            server_name: options.server_name,
        };
        cache.rebuild_root().await?;
        Ok(cache)
    }

    /// Fetches the global root from the provider and installs it, replacing
    /// any previous root volume.
    ///
    /// # Errors
    ///
    /// Propagates evaluation and allocation failures.
    /// [`CacheError::NotADirectory`] if the remote root is not a directory.
    #[instrument(name = "NamespaceCache::rebuild_root", skip(self))]
    pub async fn rebuild_root(&self) -> Result<NodePin, CacheError> {
        let remote = self.provider.global_root().await?;
        if let Some(file_type) = remote.file_type
            && file_type != FileType::Directory
        {
            warn!(object = ?remote.object_id, ?file_type, "global root is not a directory");
            return Err(CacheError::NotADirectory);
        }
        let volume = self.registry.install_global_root(&remote)?;
        debug!(object = ?remote.object_id, volume = ?volume.key(), "global root rebuilt");
        volume.root().ok_or(CacheError::NotFound)
    }

    /// The volume registry.
    #[must_use]
    pub fn registry(&self) -> &VolumeRegistry {
        &self.registry
    }

    /// The remote provider.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The cached-data collaborator.
    #[must_use]
    pub fn extents(&self) -> &X {
        &self.extents
    }

    /// The target resolver.
    #[must_use]
    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    /// The `@sys` substitution table.
    #[must_use]
    pub fn sysnames(&self) -> &SysNameTable {
        &self.sysnames
    }

    /// Name of the namespace root.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Pins the global root, if one is installed and valid.
    #[must_use]
    pub fn global_root(&self) -> Option<NodePin> {
        let id = self.registry.global_root()?;
        self.registry.volume_of(&id)?.locate(&id)
    }

    /// Whether the cache can serve requests.
    #[must_use]
    pub fn status(&self) -> CacheStatus {
        let ready = self
            .global_root()
            .is_some_and(|root| root.directory().is_some_and(|dir| dir.is_enumerated()));
        if ready {
            CacheStatus::Ready
        } else {
            CacheStatus::NotReady
        }
    }

    /// Builds a directory entry, resolving a mount point's target when the
    /// remote did not report one.
    ///
    /// A missing target volume root is initialized best-effort; failing to
    /// do so leaves it for the first real access.
    ///
    /// # Errors
    ///
    /// [`CacheError::ResourceExhausted`] on allocation failure and any
    /// target resolution failure. Nothing is retained on failure.
    pub async fn create_entry(
        &self,
        parent_id: ObjectId,
        name: &str,
        target_name: Option<&str>,
        remote: &RemoteAttributes,
        file_index: u32,
    ) -> Result<DirectoryEntry, CacheError> {
        let mut entry = DirectoryEntry::new(parent_id, name, target_name, remote, file_index)?;
        if entry.file_type() != FileType::MountPoint {
            return Ok(entry);
        }

        if entry.target_id().is_empty() {
            let target = self
                .resolver
                .resolve_to_directory(&self.provider, entry.object_id(), ObjectId::EMPTY)
                .await?;
            entry.set_target_id(target);
        }
        let target = entry.target_id();
        if self.registry.volume_of(&target).is_none()
            && let Err(error) = self.registry.init_root(target)
        {
            debug!(object = ?target, %error, "deferring target volume root");
        }
        Ok(entry)
    }

    /// Enumerates `dir` unless it already is.
    ///
    /// One caller enumerates while the rest wait on the populate gate. An
    /// enumeration that races an invalidation of `dir` is discarded and
    /// retried.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotADirectory`], [`CacheError::NotFound`] once `dir`
    /// is invalid, or the enumeration's own failure.
    #[instrument(name = "NamespaceCache::enumerate", skip(self, dir), fields(dir = ?dir.object_id()))]
    pub async fn enumerate(&self, dir: &NodePin) -> Result<(), CacheError> {
        let state = dir.directory().ok_or(CacheError::NotADirectory)?;
        loop {
            if dir.is_invalid() {
                return Err(CacheError::NotFound);
            }
            match state.try_claim_populate() {
                PopulateStatus::Claimed(claim_gen) => {
                    // Cancellation between claim and finish resets the gate.
                    let mut guard = PopulateGuard::new(state);
                    // Retirement bumps the generation after marking the node
                    // invalid, so a claim made after that bump lands here.
                    if dir.is_invalid() {
                        return Err(CacheError::NotFound);
                    }

                    let children = self.provider.enumerate_directory(dir.object_id()).await?;
                    let mut entries = Vec::new();
                    entries.try_reserve_exact(children.len())?;
                    for (index, child) in children.iter().enumerate() {
                        let file_index =
                            u32::try_from(index).map_err(|_| CacheError::ResourceExhausted)?;
                        let entry = self
                            .create_entry(
                                dir.object_id(),
                                &child.name,
                                child.target_name.as_deref(),
                                child,
                                file_index,
                            )
                            .await?;
                        entries.push(entry);
                    }

                    let dir_id = dir.object_id();
                    let (dot_dot_id, times) = Self::dot_dot_of(dir);
                    let outcome = state.finish_populate(claim_gen, |tree| {
                        tree.initialize_empty(dir_id, dot_dot_id, &times)?;
                        for entry in entries {
                            tree.insert(entry)?;
                        }
                        Ok(())
                    });
                    guard.defuse();
                    if outcome? {
                        debug!(entries = state.entry_count(), "directory enumerated");
                        return Ok(());
                    }
                    debug!("enumeration raced an invalidation, retrying");
                }
                PopulateStatus::InProgress => state.wait_populated().await,
                PopulateStatus::Done => return Ok(()),
            }
        }
    }

    /// The id and attributes "." and ".." are built from: the parent's, or
    /// the directory's own for a root.
    fn dot_dot_of(dir: &NodePin) -> (ObjectId, EntryAttributes) {
        dir.parent()
            .and_then(|parent| dir.volume().node(parent))
            .map_or_else(
                || (dir.object_id(), dir.attributes()),
                |parent| (parent.object_id(), parent.attributes()),
            )
    }

    fn parent_of(dir: &NodePin, mode: Acquire) -> Result<NodePin, CacheError> {
        let Some(parent) = dir.parent() else {
            return Ok(dir.clone());
        };
        dir.volume()
            .pin_with(parent, mode)?
            .filter(|pin| !pin.is_invalid())
            .ok_or(CacheError::NotFound)
    }

    /// Looks `name` up in `dir`, enumerating it first if needed, and pins the
    /// materialized child.
    ///
    /// `.` is `dir` itself and `..` its parent; a root is its own parent.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if no such entry exists or `dir` is invalid.
    /// [`CacheError::NotADirectory`] if `dir` is not a directory.
    #[instrument(name = "NamespaceCache::lookup", skip(self, dir), fields(dir = ?dir.object_id()))]
    pub async fn lookup(
        &self,
        dir: &NodePin,
        name: &str,
        case_insensitive: bool,
    ) -> Result<NodePin, CacheError> {
        let state = dir.directory().ok_or(CacheError::NotADirectory)?;
        if dir.is_invalid() {
            return Err(CacheError::NotFound);
        }
        match name {
            "" | "." => return Ok(dir.clone()),
            ".." => return Self::parent_of(dir, Acquire::Wait),
            _ => {}
        }

        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            self.enumerate(dir).await?;
            let found = state.read().lookup(name, case_insensitive);
            match found {
                Some(entry) => match self.materialize_child(dir, entry) {
                    Err(CacheError::NotFound) if !dir.is_invalid() => {}
                    other => return other,
                },
                None if state.is_enumerated() => return Err(CacheError::NotFound),
                None => {}
            }
            debug!(component = name, "directory changed during lookup, retrying");
        }
        Err(CacheError::NotFound)
    }

    /// Try-mode lookup that never blocks.
    ///
    /// # Errors
    ///
    /// [`CacheError::WouldBlock`] on lock contention, or when answering
    /// would require enumerating `dir` or materializing the child.
    /// Otherwise as [`lookup`](Self::lookup).
    pub fn lookup_nowait(
        &self,
        dir: &NodePin,
        name: &str,
        case_insensitive: bool,
    ) -> Result<NodePin, CacheError> {
        let state = dir.directory().ok_or(CacheError::NotADirectory)?;
        if dir.is_invalid() {
            return Err(CacheError::NotFound);
        }
        match name {
            "" | "." => return Ok(dir.clone()),
            ".." => return Self::parent_of(dir, Acquire::NoWait),
            _ => {}
        }
        if !state.is_enumerated() {
            return Err(CacheError::WouldBlock);
        }

        let _dir_guard = dir.lock_shared(Acquire::NoWait)?;
        let tree = state.read_with(Acquire::NoWait)?;
        let entry = tree.lookup(name, case_insensitive).ok_or(CacheError::NotFound)?;
        let node = tree
            .get(entry)
            .and_then(DirectoryEntry::node)
            .ok_or(CacheError::WouldBlock)?;
        dir.volume()
            .pin_with(node, Acquire::NoWait)?
            .filter(|pin| !pin.is_invalid())
            .ok_or(CacheError::WouldBlock)
    }

    /// Creates or returns the node bound to `entry` in `parent`.
    ///
    /// Holds the parent's node lock shared and its entry tree exclusively
    /// while binding, so an invalidation detaching the entry is serialized
    /// with it.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if the entry is gone, `parent` is invalid,
    /// or the entry's node is being deleted.
    /// [`CacheError::ResourceExhausted`] if the volume index cannot grow.
    pub fn materialize_child(&self, parent: &NodePin, entry: EntryId) -> Result<NodePin, CacheError> {
        let state = parent.directory().ok_or(CacheError::NotADirectory)?;
        let _parent_guard = parent.read();
        if parent.is_invalid() {
            return Err(CacheError::NotFound);
        }
        let mut tree = state.write();
        let record = tree.get(entry).ok_or(CacheError::NotFound)?;
        let volume = parent.volume();
        let link = EntryLink {
            parent: parent.id(),
            entry,
        };

        if let Some(bound) = record.node()
            && let Some(pin) = volume.pin(bound)
        {
            if !pin.is_invalid() {
                return Ok(pin);
            }
            // Invalid but still linked: a deletion is tearing it down.
            if pin.entry_link() == Some(link) {
                return Err(CacheError::NotFound);
            }
        }

        if record.object_id().high_key() != volume.key() {
            return Err(CacheError::InternalInconsistency(
                "directory entry outside its directory's volume",
            ));
        }
        let pin = volume.insert_node(NodeSeed {
            parent: Some(parent.id()),
            object_id: record.object_id(),
            file_type: record.file_type(),
            link: Some(link),
            target_id: record.target_id(),
            attributes: *record.attributes(),
            not_evaluated: record.is_not_evaluated(),
        })?;
        if pin.id() != volume.root_id() {
            // A reused detached node adopts this entry and its parent.
            let mut child = pin.write();
            if child.entry.is_none() {
                child.entry = Some(link);
                if pin.adopt_parent(parent.id()) {
                    debug!(object = ?pin.object_id(), "detached node adopted");
                }
            }
        }
        if let Some(record) = tree.get_mut(entry) {
            record.bind(pin.id());
        }
        Ok(pin)
    }

    /// Pins the directory a symlink or mount point leads to, resolving and
    /// caching the target on first use. Other nodes resolve to themselves.
    ///
    /// A mount point's target volume gets an unevaluated root if it has
    /// none. A symlink target in a cached volume that is not itself cached is
    /// materialized detached from any parent.
    ///
    /// # Errors
    ///
    /// Resolution failures, and [`CacheError::NotFound`] if the node is
    /// invalid or a symlink's target volume is not cached.
    #[instrument(name = "NamespaceCache::resolve_target", skip(self, node), fields(object = ?node.object_id()))]
    pub async fn resolve_target(&self, node: &NodePin) -> Result<NodePin, CacheError> {
        let Some(redirect) = node.redirect() else {
            return Ok(node.clone());
        };
        if node.is_invalid() {
            return Err(CacheError::NotFound);
        }
        if let Some(resolved) = redirect.resolved()
            && let Some(volume) = self.registry.get(resolved.volume)
            && let Some(pin) = volume.pin(resolved.node)
            && !pin.is_invalid()
        {
            return Ok(pin);
        }

        let known = node.target_id();
        let file_type = node.file_type();
        let target_id = if file_type == FileType::MountPoint && !known.is_empty() {
            known
        } else {
            let resolved = self
                .resolver
                .resolve_to_directory(&self.provider, node.object_id(), known)
                .await?;
            if resolved != known {
                node.set_target_id(resolved);
            }
            resolved
        };

        let pin = if file_type == FileType::MountPoint {
            self.registry
                .init_root(target_id)?
                .locate(&target_id)
                .ok_or(CacheError::NotFound)?
        } else {
            self.materialize_detached(target_id)?
        };
        redirect.set(pin.node_ref());
        debug!(target = ?target_id, volume = ?pin.volume().key(), "redirect target bound");
        Ok(pin)
    }

    fn materialize_detached(&self, target_id: ObjectId) -> Result<NodePin, CacheError> {
        let volume = self
            .registry
            .volume_of(&target_id)
            .ok_or(CacheError::NotFound)?;
        if let Some(pin) = volume.locate(&target_id) {
            return Ok(pin);
        }
        volume.insert_node(NodeSeed {
            parent: None,
            object_id: target_id,
            file_type: FileType::Directory,
            link: None,
            target_id: ObjectId::EMPTY,
            attributes: EntryAttributes::unevaluated_directory(),
            not_evaluated: true,
        })
    }

    /// Re-fetches `node`'s attributes and clears its "not evaluated" mark.
    ///
    /// The bound directory entry is refreshed too, taking the parent's locks
    /// after the node's lock is released.
    ///
    /// # Errors
    ///
    /// Evaluation failures. [`CacheError::NotFound`] if the remote cannot
    /// classify the object or reports a different type than the node's.
    #[instrument(name = "NamespaceCache::evaluate_node", skip(self, node), fields(object = ?node.object_id()))]
    pub async fn evaluate_node(&self, node: &NodePin) -> Result<(), CacheError> {
        let remote = self.provider.evaluate_object(node.object_id()).await?;
        let Some(file_type) = remote.file_type else {
            return Err(CacheError::NotFound);
        };
        if file_type != node.file_type() {
            debug!(cached = ?node.file_type(), remote = ?file_type, "object changed type");
            return Err(CacheError::NotFound);
        }

        let mut attributes = remote.attributes;
        attributes.file_attributes = file_type.decorate(attributes.file_attributes);
        let link = {
            let mut state = node.write();
            state.attributes = attributes;
            if file_type.is_redirect()
                && !remote.target_id.is_empty()
                && remote.target_id != state.target_id
            {
                state.target_id = remote.target_id;
                if let Some(redirect) = node.redirect() {
                    redirect.clear();
                }
            }
            state.entry
        };
        node.clear_not_evaluated();

        if let Some(link) = link
            && let Some(parent) = node.volume().pin(link.parent)
            && let Some(dir) = parent.directory()
        {
            let _parent_guard = parent.read();
            let mut tree = dir.write();
            if let Some(entry) = tree.get_mut(link.entry)
                && entry.node() == Some(node.id())
            {
                entry.set_attributes(attributes);
            }
        }
        Ok(())
    }

    /// The node's attributes, evaluating it first if they are stale.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if the node is invalid; evaluation failures.
    pub async fn getattr(&self, node: &NodePin) -> Result<EntryAttributes, CacheError> {
        if node.is_invalid() {
            return Err(CacheError::NotFound);
        }
        if node.is_not_evaluated() {
            self.evaluate_node(node).await?;
        }
        Ok(node.attributes())
    }

    /// Pre-qualifies an open of `node` and returns a fresh pin for the
    /// handle.
    ///
    /// # Errors
    ///
    /// [`CacheError::AccessDenied`] when a write-class request meets a
    /// read-only grant; [`CacheError::NotFound`] if the node is invalid.
    pub fn open(&self, node: &NodePin, desired: u32, granted: u32) -> Result<NodePin, CacheError> {
        if node.is_invalid() {
            return Err(CacheError::NotFound);
        }
        if !access::check_access(desired, granted) {
            debug!(object = ?node.object_id(), desired, granted, "open refused");
            return Err(CacheError::AccessDenied);
        }
        Ok(node.clone())
    }

    /// Iterate directory entries of `dir`, starting from `offset`.
    ///
    /// Entries are yielded in enumeration order, `.` and `..` first. For
    /// each entry, `filler` is called with the [`DirEntry`] and the next
    /// offset value. If `filler` returns `true` (the caller's buffer is
    /// full), iteration stops early.
    ///
    /// # Errors
    ///
    /// As [`enumerate`](Self::enumerate).
    #[instrument(name = "NamespaceCache::readdir", skip(self, dir, filler), fields(dir = ?dir.object_id()))]
    pub async fn readdir(
        &self,
        dir: &NodePin,
        offset: u64,
        mut filler: impl FnMut(DirEntry<'_>, u64) -> bool,
    ) -> Result<(), CacheError> {
        self.enumerate(dir).await?;
        let state = dir.directory().ok_or(CacheError::NotADirectory)?;

        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let snapshot: Vec<(String, ObjectId, FileType, EntryAttributes, u32)> = state
            .read()
            .iter()
            .skip(skip)
            .map(|(_, entry)| {
                (
                    entry.name().to_owned(),
                    entry.object_id(),
                    entry.file_type(),
                    *entry.attributes(),
                    entry.file_index(),
                )
            })
            .collect();

        for (position, (name, object_id, file_type, attributes, file_index)) in
            snapshot.iter().enumerate()
        {
            let next_offset = (skip + position + 1) as u64;
            let entry = DirEntry {
                name,
                object_id: *object_id,
                file_type: *file_type,
                attributes: *attributes,
                file_index: *file_index,
            };
            if filler(entry, next_offset) {
                break;
            }
        }
        Ok(())
    }

    /// Walks `path` from the global root.
    ///
    /// `/` and `\` both separate components. Intermediate symlinks and mount
    /// points are followed; the final component is returned as found. A
    /// component containing `@sys` is tried with each substitution in order.
    ///
    /// # Errors
    ///
    /// [`CacheError::NotFound`] if the root is missing or any component does
    /// not resolve; any lookup or resolution failure.
    #[instrument(name = "NamespaceCache::lookup_path", skip(self))]
    pub async fn lookup_path(&self, path: &str, case_insensitive: bool) -> Result<NodePin, CacheError> {
        let mut current = self.global_root().ok_or(CacheError::NotFound)?;
        for component in path.split(['/', '\\']).filter(|c| !c.is_empty()) {
            let dir = self.resolve_target(&current).await?;
            current = self.lookup_component(&dir, component, case_insensitive).await?;
        }
        Ok(current)
    }

    async fn lookup_component(
        &self,
        dir: &NodePin,
        component: &str,
        case_insensitive: bool,
    ) -> Result<NodePin, CacheError> {
        if !sysname::contains_sysname(component) {
            return self.lookup(dir, component, case_insensitive).await;
        }
        let arch = SysNameArch::native();
        for index in 1..=self.sysnames.len(arch) {
            let candidate = match self.sysnames.substitute(component, index, arch) {
                Ok(candidate) => candidate,
                Err(CacheError::NotFound) => break,
                Err(error) => return Err(error),
            };
            match self.lookup(dir, &candidate, case_insensitive).await {
                Err(CacheError::NotFound) => {}
                other => return other,
            }
        }
        Err(CacheError::NotFound)
    }
}
