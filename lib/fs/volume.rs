use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::fs::fcb::{self, CacheNode, NodeId, NodePin, NodeSeed};
use crate::fs::{CacheError, EntryAttributes, FileType, ObjectId, ObjectKey, RemoteAttributes, VolumeKey};
use crate::sync::{self, Acquire, Arc, RwLock};

/// Arena index of every volume's root node.
const ROOT_NODE: NodeId = NodeId(1);

/// One cached volume: the `LowKey` tree over its indexed nodes plus the arena
/// holding every live node, indexed or not.
///
/// Retired nodes leave the `LowKey` tree immediately but stay in the arena
/// until their last pin drops.
#[derive(Debug)]
pub struct VolumeRoot {
    key: VolumeKey,
    root: NodeId,
    id_tree: RwLock<FxHashMap<ObjectKey, NodeId>>,
    nodes: RwLock<BTreeMap<NodeId, Arc<CacheNode>>>,
    next_node: AtomicU64,
}

impl VolumeRoot {
    /// Creates a volume holding only its root directory node.
    ///
    /// An unevaluated root is flagged so its attributes are fetched on first
    /// access.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the index cannot grow.
    pub fn new(
        root_id: ObjectId,
        attributes: EntryAttributes,
        evaluated: bool,
    ) -> Result<Arc<Self>, CacheError> {
        let mut id_tree = FxHashMap::default();
        id_tree.try_reserve(1)?;
        id_tree.insert(root_id.low_key(), ROOT_NODE);

        let root = CacheNode::new(
            ROOT_NODE,
            NodeSeed {
                parent: None,
                object_id: root_id,
                file_type: FileType::Directory,
                link: None,
                target_id: ObjectId::EMPTY,
                attributes: EntryAttributes {
                    file_attributes: FileType::Directory.decorate(attributes.file_attributes),
                    ..attributes
                },
                not_evaluated: !evaluated,
            },
        );
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT_NODE, Arc::new(root));

        Ok(Arc::new(Self {
            key: root_id.high_key(),
            root: ROOT_NODE,
            id_tree: RwLock::new(id_tree),
            nodes: RwLock::new(nodes),
            next_node: AtomicU64::new(ROOT_NODE.0 + 1),
        }))
    }

    /// The volume's `HighKey`.
    #[must_use]
    pub fn key(&self) -> VolumeKey {
        self.key
    }

    /// The arena index of the root node.
    #[must_use]
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Pins the root node unless it was invalidated.
    #[must_use]
    pub fn root(self: &Arc<Self>) -> Option<NodePin> {
        self.pin(self.root).filter(|pin| !pin.is_invalid())
    }

    /// Finds and pins the valid node for `id`.
    #[must_use]
    pub fn locate(self: &Arc<Self>, id: &ObjectId) -> Option<NodePin> {
        self.locate_with(id, Acquire::Wait).ok().flatten()
    }

    /// Finds and pins the valid node for `id` in the given mode.
    ///
    /// Hits are confirmed against the full identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WouldBlock`] under contention in
    /// [`Acquire::NoWait`] mode.
    pub fn locate_with(
        self: &Arc<Self>,
        id: &ObjectId,
        mode: Acquire,
    ) -> Result<Option<NodePin>, CacheError> {
        if id.high_key() != self.key {
            return Ok(None);
        }
        let node_id = {
            let tree = sync::acquire_shared(&self.id_tree, mode)?;
            match tree.get(&id.low_key()) {
                Some(node_id) => *node_id,
                None => return Ok(None),
            }
        };
        Ok(self
            .pin_with(node_id, mode)?
            .filter(|pin| pin.object_id() == *id && !pin.is_invalid()))
    }

    /// Pins the node at `id`, valid or not.
    #[must_use]
    pub fn pin(self: &Arc<Self>, id: NodeId) -> Option<NodePin> {
        self.pin_with(id, Acquire::Wait).ok().flatten()
    }

    /// Pins the node at `id` in the given mode.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::WouldBlock`] under contention in
    /// [`Acquire::NoWait`] mode.
    pub fn pin_with(
        self: &Arc<Self>,
        id: NodeId,
        mode: Acquire,
    ) -> Result<Option<NodePin>, CacheError> {
        let nodes = sync::acquire_shared(&self.nodes, mode)?;
        Ok(nodes
            .get(&id)
            .map(|node| NodePin::new(Arc::clone(self), Arc::clone(node))))
    }

    /// Whether a valid node for `id` is indexed.
    #[must_use]
    pub fn contains(&self, id: &ObjectId) -> bool {
        if id.high_key() != self.key {
            return false;
        }
        let Some(node_id) = sync::shared(&self.id_tree).get(&id.low_key()).copied() else {
            return false;
        };
        self.node(node_id)
            .is_some_and(|node| node.object_id() == *id && !node.is_invalid())
    }

    /// Number of nodes in the arena, retired ones included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        sync::shared(&self.nodes).len()
    }

    /// Number of nodes in the `LowKey` tree.
    #[must_use]
    pub fn indexed_count(&self) -> usize {
        sync::shared(&self.id_tree).len()
    }

    /// Whether `ancestor` is on `candidate`'s parent chain.
    #[must_use]
    pub fn is_descendant_of(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        fcb::is_descendant_of(&sync::shared(&self.nodes), candidate, ancestor)
    }

    pub(crate) fn node(&self, id: NodeId) -> Option<Arc<CacheNode>> {
        sync::shared(&self.nodes).get(&id).map(Arc::clone)
    }

    /// Returns the valid node already indexed for the seed's object, or
    /// allocates and indexes a new one.
    pub(crate) fn insert_node(self: &Arc<Self>, seed: NodeSeed) -> Result<NodePin, CacheError> {
        let key = seed.object_id.low_key();
        let mut tree = sync::exclusive(&self.id_tree);
        if let Some(existing) = tree.get(&key).copied() {
            let nodes = sync::shared(&self.nodes);
            if let Some(node) = nodes.get(&existing)
                && node.object_id() == seed.object_id
                && !node.is_invalid()
            {
                return Ok(NodePin::new(Arc::clone(self), Arc::clone(node)));
            }
        }

        tree.try_reserve(1)?;
        let id = NodeId(self.next_node.fetch_add(1, Ordering::Relaxed));
        let node = Arc::new(CacheNode::new(id, seed));
        let pin = {
            let mut nodes = sync::exclusive(&self.nodes);
            nodes.insert(id, Arc::clone(&node));
            NodePin::new(Arc::clone(self), node)
        };
        tree.insert(key, id);
        debug!(volume = ?self.key, object = ?seed.object_id, node = id.0, "node materialized");
        Ok(pin)
    }

    /// Removes `node` from the `LowKey` tree if it is the indexed one.
    pub(crate) fn unindex(&self, node: &CacheNode) {
        let mut tree = sync::exclusive(&self.id_tree);
        let key = node.object_id().low_key();
        if tree.get(&key) == Some(&node.id()) {
            tree.remove(&key);
        }
    }

    /// Marks `node` invalid, severs its entry link and unindexes it. A
    /// directory's listing is cleared too, so an enumeration in flight is
    /// discarded.
    ///
    /// Takes the node lock and then the entry-tree lock, so the caller must
    /// hold neither. Returns `false` if the node was already invalid; the
    /// unlink steps are repeated harmlessly.
    pub(crate) fn retire(&self, node: &CacheNode) -> bool {
        let newly = node.mark_invalid();
        node.write().entry = None;
        if let Some(redirect) = node.redirect() {
            redirect.clear();
        }
        if let Some(dir) = node.directory() {
            let mut tree = dir.write();
            dir.clear_listing(&mut tree);
        }
        self.unindex(node);
        if newly {
            debug!(volume = ?self.key, object = ?node.object_id(), node = node.id().0, "node retired");
        }
        newly
    }

    /// Pins every valid node whose parent chain contains `ancestor`.
    ///
    /// The pins hold retired ancestors in the arena, so chains stay walkable
    /// while a cascade runs.
    pub(crate) fn descendants_of(self: &Arc<Self>, ancestor: NodeId) -> Vec<NodePin> {
        let nodes = sync::shared(&self.nodes);
        nodes
            .values()
            .filter(|node| !node.is_invalid() && fcb::is_descendant_of(&nodes, node.id(), ancestor))
            .map(|node| NodePin::new(Arc::clone(self), Arc::clone(node)))
            .collect()
    }

    /// Pins every node in the arena.
    pub(crate) fn pin_all(self: &Arc<Self>) -> Vec<NodePin> {
        sync::shared(&self.nodes)
            .values()
            .map(|node| NodePin::new(Arc::clone(self), Arc::clone(node)))
            .collect()
    }

    /// Removes `id` from the arena if it is invalid and unpinned.
    ///
    /// Both conditions are re-checked under the arena write lock, which pin
    /// creation also holds shared.
    pub(crate) fn reap(&self, id: NodeId) -> bool {
        let mut nodes = sync::exclusive(&self.nodes);
        let reapable = nodes
            .get(&id)
            .is_some_and(|node| node.is_invalid() && node.open_count() == 0);
        if reapable {
            nodes.remove(&id);
            debug!(volume = ?self.key, node = id.0, "node reaped");
        }
        reapable
    }
}

/// Indexes every cached volume by `HighKey`, plus the global namespace root.
#[derive(Debug)]
pub struct VolumeRegistry {
    volumes: scc::HashMap<VolumeKey, Arc<VolumeRoot>>,
    global_root: RwLock<Option<ObjectId>>,
}

impl Default for VolumeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            volumes: scc::HashMap::new(),
            global_root: RwLock::new(None),
        }
    }

    /// The volume for `key`, confirmed against the full key.
    #[must_use]
    pub fn get(&self, key: VolumeKey) -> Option<Arc<VolumeRoot>> {
        self.volumes
            .read_sync(&key, |_, volume| Arc::clone(volume))
            .filter(|volume| volume.key() == key)
    }

    /// The volume holding `id`.
    #[must_use]
    pub fn volume_of(&self, id: &ObjectId) -> Option<Arc<VolumeRoot>> {
        self.get(id.high_key())
    }

    /// Returns the volume rooted at `root_id`, lazily creating it with an
    /// unevaluated root.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the root cannot be
    /// allocated.
    pub fn init_root(&self, root_id: ObjectId) -> Result<Arc<VolumeRoot>, CacheError> {
        match self.volumes.entry_sync(root_id.high_key()) {
            scc::hash_map::Entry::Occupied(occ) => Ok(Arc::clone(occ.get())),
            scc::hash_map::Entry::Vacant(vac) => {
                let volume = VolumeRoot::new(root_id, EntryAttributes::unevaluated_directory(), false)?;
                vac.insert_entry(Arc::clone(&volume));
                debug!(volume = ?volume.key(), root = ?root_id, "volume root initialized");
                Ok(volume)
            }
        }
    }

    /// Installs (or replaces) the global namespace root from evaluated
    /// attributes.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ResourceExhausted`] if the root cannot be
    /// allocated.
    pub fn install_global_root(
        &self,
        remote: &RemoteAttributes,
    ) -> Result<Arc<VolumeRoot>, CacheError> {
        let volume = VolumeRoot::new(remote.object_id, remote.attributes, true)?;
        match self.volumes.entry_sync(volume.key()) {
            scc::hash_map::Entry::Occupied(mut occ) => {
                *occ.get_mut() = Arc::clone(&volume);
            }
            scc::hash_map::Entry::Vacant(vac) => {
                vac.insert_entry(Arc::clone(&volume));
            }
        }
        *sync::exclusive(&self.global_root) = Some(remote.object_id);
        Ok(volume)
    }

    /// The global root's identifier, if one was installed.
    #[must_use]
    pub fn global_root(&self) -> Option<ObjectId> {
        *sync::shared(&self.global_root)
    }

    /// Removes every volume and forgets the global root.
    pub fn drain(&self) -> Vec<Arc<VolumeRoot>> {
        let mut drained = Vec::new();
        self.volumes.retain_sync(|_, volume| {
            drained.push(Arc::clone(volume));
            false
        });
        *sync::exclusive(&self.global_root) = None;
        drained
    }

    /// Every registered volume.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<VolumeRoot>> {
        let mut volumes = Vec::new();
        self.volumes.retain_sync(|_, volume| {
            volumes.push(Arc::clone(volume));
            true
        });
        volumes
    }

    /// Number of registered volumes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no volume is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
