#![allow(missing_docs, clippy::unwrap_used)]

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use redir_cache::fs::provider::{ExtentManager, RemoteProvider};
use redir_cache::fs::{FileType, ObjectId, RemoteAttributes};

/// Shared state backing `MockProvider`.
#[derive(Debug, Default)]
pub struct MockState {
    /// What `global_root` reports.
    pub root: Mutex<Option<RemoteAttributes>>,
    /// `object -> attributes` answered by `evaluate_object`.
    pub objects: Mutex<HashMap<ObjectId, RemoteAttributes>>,
    /// `directory -> listing` answered by `enumerate_directory`. Listing
    /// entries are snapshots, so `set_object` changes evaluation only.
    pub listings: Mutex<HashMap<ObjectId, Vec<RemoteAttributes>>>,
    /// Directories whose enumeration fails with a non-NotFound error.
    pub failing_listings: Mutex<HashSet<ObjectId>>,
    /// Objects whose evaluation fails with a non-NotFound error.
    pub failing_objects: Mutex<HashSet<ObjectId>>,
    /// While held by a test, enumerations park after counting themselves.
    pub enumerate_hold: tokio::sync::Mutex<()>,
    pub evaluations: AtomicUsize,
    pub enumerations: AtomicUsize,
}

/// A clonable in-memory remote.
#[derive(Debug, Clone)]
pub struct MockProvider {
    pub state: Arc<MockState>,
}

impl MockProvider {
    /// A remote whose global root is the empty directory `root`.
    pub fn new(root: ObjectId) -> Self {
        let state = MockState::default();
        let attrs = RemoteAttributes::new(root, Some(FileType::Directory), "");
        *state.root.lock().unwrap() = Some(attrs.clone());
        state.objects.lock().unwrap().insert(root, attrs);
        state.listings.lock().unwrap().insert(root, Vec::new());
        Self {
            state: Arc::new(state),
        }
    }

    /// Replaces the global root's attributes.
    pub fn set_root(&self, attrs: RemoteAttributes) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(attrs.object_id, attrs.clone());
        self.state
            .listings
            .lock()
            .unwrap()
            .entry(attrs.object_id)
            .or_default();
        *self.state.root.lock().unwrap() = Some(attrs);
    }

    /// Adds `child` to `parent`'s listing and makes it evaluable. A
    /// directory child gets an empty listing.
    pub fn add_child(&self, parent: ObjectId, child: RemoteAttributes) {
        if child.file_type == Some(FileType::Directory) {
            self.state
                .listings
                .lock()
                .unwrap()
                .entry(child.object_id)
                .or_default();
        }
        self.state
            .listings
            .lock()
            .unwrap()
            .entry(parent)
            .or_default()
            .push(child.clone());
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(child.object_id, child);
    }

    /// Makes an object evaluable without listing it anywhere, e.g. the root
    /// of another volume. Directories get an empty listing.
    pub fn add_object(&self, attrs: RemoteAttributes) {
        if attrs.file_type == Some(FileType::Directory) {
            self.state
                .listings
                .lock()
                .unwrap()
                .entry(attrs.object_id)
                .or_default();
        }
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(attrs.object_id, attrs);
    }

    /// Changes what evaluation reports for an object. Listings keep their
    /// snapshot.
    pub fn set_object(&self, attrs: RemoteAttributes) {
        self.state
            .objects
            .lock()
            .unwrap()
            .insert(attrs.object_id, attrs);
    }

    /// Removes an object from evaluation and from every listing.
    pub fn remove(&self, id: ObjectId) {
        self.state.objects.lock().unwrap().remove(&id);
        self.state.listings.lock().unwrap().remove(&id);
        for listing in self.state.listings.lock().unwrap().values_mut() {
            listing.retain(|entry| entry.object_id != id);
        }
    }

    pub fn fail_listing(&self, id: ObjectId, fail: bool) {
        let mut failing = self.state.failing_listings.lock().unwrap();
        if fail {
            failing.insert(id);
        } else {
            failing.remove(&id);
        }
    }

    pub fn fail_evaluate(&self, id: ObjectId) {
        self.state.failing_objects.lock().unwrap().insert(id);
    }

    pub fn evaluations(&self) -> usize {
        self.state.evaluations.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.state.enumerations.load(Ordering::SeqCst)
    }
}

impl RemoteProvider for MockProvider {
    async fn evaluate_object(&self, id: ObjectId) -> Result<RemoteAttributes, std::io::Error> {
        self.state.evaluations.fetch_add(1, Ordering::SeqCst);
        if self.state.failing_objects.lock().unwrap().contains(&id) {
            return Err(std::io::Error::other("evaluation failed"));
        }
        self.state
            .objects
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))
    }

    async fn enumerate_directory(
        &self,
        id: ObjectId,
    ) -> Result<Vec<RemoteAttributes>, std::io::Error> {
        self.state.enumerations.fetch_add(1, Ordering::SeqCst);
        drop(self.state.enumerate_hold.lock().await);
        if self.state.failing_listings.lock().unwrap().contains(&id) {
            return Err(std::io::Error::other("enumeration failed"));
        }
        self.state
            .listings
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))
    }

    async fn global_root(&self) -> Result<RemoteAttributes, std::io::Error> {
        self.state
            .root
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| std::io::Error::from(ErrorKind::NotFound))
    }
}

/// Records every flush and teardown it is asked for.
#[derive(Debug, Default)]
pub struct MockExtents {
    pub flushed: Mutex<Vec<ObjectId>>,
    pub torn_down: Mutex<Vec<ObjectId>>,
    /// When set, every flush fails after being recorded.
    pub fail_flush: AtomicBool,
}

impl MockExtents {
    pub fn flushed(&self) -> Vec<ObjectId> {
        self.flushed.lock().unwrap().clone()
    }

    pub fn torn_down(&self) -> Vec<ObjectId> {
        self.torn_down.lock().unwrap().clone()
    }
}

impl ExtentManager for MockExtents {
    async fn flush(&self, id: ObjectId) -> Result<(), std::io::Error> {
        self.flushed.lock().unwrap().push(id);
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("flush failed"));
        }
        Ok(())
    }

    async fn tear_down(&self, id: ObjectId) -> Result<(), std::io::Error> {
        self.torn_down.lock().unwrap().push(id);
        Ok(())
    }
}
