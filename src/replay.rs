//! Scenario replay: load a namespace into an in-memory provider, warm the
//! cache by walking paths, then deliver invalidation records in order.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use redir_cache::fs::provider::{ExtentManager, RemoteProvider};
use redir_cache::fs::{
    CacheError, CacheOptions, CacheStatus, FileType, InvalidationRecord, NamespaceCache, ObjectId,
    RemoteAttributes,
};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read scenario: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// One object of a scenario namespace.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScenarioObject {
    pub id: ObjectId,
    /// Omitted for objects the remote cannot classify.
    #[serde(rename = "type", default)]
    pub file_type: Option<FileType>,
    pub name: String,
    pub parent: ObjectId,
    #[serde(default)]
    pub target: ObjectId,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// A replay scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    pub root: ObjectId,
    #[serde(default)]
    pub walk: Vec<String>,
    #[serde(default)]
    pub objects: Vec<ScenarioObject>,
    #[serde(default)]
    pub events: Vec<InvalidationRecord>,
}

/// In-memory remote built from a scenario.
pub struct ScenarioProvider {
    root: RemoteAttributes,
    objects: HashMap<ObjectId, RemoteAttributes>,
    children: HashMap<ObjectId, Vec<ObjectId>>,
}

impl ScenarioProvider {
    pub fn new(scenario: &Scenario) -> Self {
        let mut objects = HashMap::new();
        let mut children: HashMap<ObjectId, Vec<ObjectId>> = HashMap::new();
        for object in &scenario.objects {
            let mut remote = RemoteAttributes::new(object.id, object.file_type, &object.name)
                .with_target(object.target)
                .with_size(object.size);
            remote.target_name.clone_from(&object.target_name);
            objects.insert(object.id, remote);
            children.entry(object.parent).or_default().push(object.id);
        }
        Self {
            root: RemoteAttributes::new(scenario.root, Some(FileType::Directory), ""),
            objects,
            children,
        }
    }

    fn find(&self, id: ObjectId) -> Result<RemoteAttributes, std::io::Error> {
        if id == self.root.object_id {
            return Ok(self.root.clone());
        }
        self.objects
            .get(&id)
            .cloned()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))
    }
}

impl RemoteProvider for ScenarioProvider {
    async fn evaluate_object(&self, id: ObjectId) -> Result<RemoteAttributes, std::io::Error> {
        self.find(id)
    }

    async fn enumerate_directory(
        &self,
        id: ObjectId,
    ) -> Result<Vec<RemoteAttributes>, std::io::Error> {
        self.find(id)?;
        Ok(self
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.objects.get(child).cloned())
            .collect())
    }

    async fn global_root(&self) -> Result<RemoteAttributes, std::io::Error> {
        Ok(self.root.clone())
    }
}

/// Extent collaborator that only logs and counts.
#[derive(Debug, Default)]
pub struct LoggingExtents {
    flushed: AtomicUsize,
    torn_down: AtomicUsize,
}

impl ExtentManager for LoggingExtents {
    async fn flush(&self, id: ObjectId) -> Result<(), std::io::Error> {
        self.flushed.fetch_add(1, Ordering::Relaxed);
        info!(object = ?id, "flush cached data");
        Ok(())
    }

    async fn tear_down(&self, id: ObjectId) -> Result<(), std::io::Error> {
        self.torn_down.fetch_add(1, Ordering::Relaxed);
        info!(object = ?id, "tear down cached data");
        Ok(())
    }
}

/// What the cache looked like after a replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub walked: usize,
    pub invalidated: usize,
    pub volumes: usize,
    pub nodes: usize,
    pub indexed: usize,
    pub flushed: usize,
    pub torn_down: usize,
    pub status: CacheStatus,
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "walked:      {}", self.walked)?;
        writeln!(f, "invalidated: {}", self.invalidated)?;
        writeln!(f, "volumes:     {}", self.volumes)?;
        writeln!(f, "nodes:       {} ({} indexed)", self.nodes, self.indexed)?;
        writeln!(f, "flushed:     {}", self.flushed)?;
        writeln!(f, "torn down:   {}", self.torn_down)?;
        write!(f, "status:      {:?}", self.status)
    }
}

/// Runs the scenario at `path`.
pub async fn run(path: &Path, options: CacheOptions) -> Result<ReplaySummary, ReplayError> {
    let text = std::fs::read_to_string(path)?;
    let scenario: Scenario = toml::from_str(&text)?;
    info!(
        objects = scenario.objects.len(),
        events = scenario.events.len(),
        "Loaded scenario."
    );

    let provider = ScenarioProvider::new(&scenario);
    let cache = NamespaceCache::new(provider, LoggingExtents::default(), options).await?;

    let mut walked = 0;
    for walk in &scenario.walk {
        match cache.lookup_path(walk, true).await {
            Ok(node) => {
                walked += 1;
                info!(path = %walk, object = ?node.object_id(), file_type = ?node.file_type(), "walked");
            }
            Err(e) => warn!(path = %walk, error = %e, "walk failed"),
        }
    }

    let mut invalidated = 0;
    for record in &scenario.events {
        match cache.invalidate(record).await {
            Ok(()) => {
                invalidated += 1;
                info!(object = ?record.object, reason = ?record.reason, "invalidated");
            }
            Err(e) => warn!(object = ?record.object, reason = ?record.reason, error = %e, "invalidation failed"),
        }
    }

    let volumes = cache.registry().snapshot();
    Ok(ReplaySummary {
        walked,
        invalidated,
        volumes: volumes.len(),
        nodes: volumes.iter().map(|volume| volume.node_count()).sum(),
        indexed: volumes.iter().map(|volume| volume.indexed_count()).sum(),
        flushed: cache.extents().flushed.load(Ordering::Relaxed),
        torn_down: cache.extents().torn_down.load(Ordering::Relaxed),
        status: cache.status(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SCENARIO: &str = r#"
root = { cell = 1, volume = 1, vnode = 1, unique = 1 }
walk = ["docs/readme", "docs\\missing"]

[[objects]]
id = { cell = 1, volume = 1, vnode = 2, unique = 1 }
type = "directory"
name = "docs"
parent = { cell = 1, volume = 1, vnode = 1, unique = 1 }

[[objects]]
id = { cell = 1, volume = 1, vnode = 3, unique = 1 }
type = "file"
name = "readme"
parent = { cell = 1, volume = 1, vnode = 2, unique = 1 }
size = 42

[[events]]
object = { cell = 1, volume = 1, vnode = 2, unique = 1 }
reason = "deleted"

[[events]]
object = { cell = 1, volume = 1, vnode = 2, unique = 1 }
reason = "deleted"
"#;

    #[tokio::test]
    async fn replay_walks_then_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.toml");
        std::fs::write(&path, SCENARIO).unwrap();

        let summary = run(&path, CacheOptions::default()).await.unwrap();
        assert_eq!(summary.walked, 1);
        // The second delete finds nothing cached.
        assert_eq!(summary.invalidated, 1);
        assert_eq!(summary.volumes, 1);
        assert_eq!(summary.flushed, 1);
        assert_eq!(summary.torn_down, 1);
        assert_eq!(summary.indexed, 1);
    }

    #[test]
    fn scenario_defaults_optional_fields() {
        let scenario: Scenario = toml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.objects[0].target, ObjectId::EMPTY);
        assert!(!scenario.events[0].whole_volume);
        assert_eq!(scenario.objects[1].size, 42);
    }
}
