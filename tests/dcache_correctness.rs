#![allow(clippy::unwrap_used, missing_docs)]

mod common;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use redir_cache::fs::dcache::{
    DOT_DOT_FILE_INDEX, DOT_FILE_INDEX, DirState, DirectoryEntry, DirectoryTree, EntryFlags,
    PopulateStatus,
};
use redir_cache::fs::{
    CacheError, EntryAttributes, FileAttributes, FileType, ObjectId, RemoteAttributes,
};

use common::{dir, file, oid};

fn entry(parent: ObjectId, remote: &RemoteAttributes, index: u32) -> DirectoryEntry {
    DirectoryEntry::new(parent, &remote.name, None, remote, index).unwrap()
}

fn tree_with(names: &[&str]) -> DirectoryTree {
    let mut tree = DirectoryTree::new();
    tree.initialize_empty(oid(1, 2), oid(1, 1), &EntryAttributes::default())
        .unwrap();
    for (index, name) in names.iter().enumerate() {
        let vnode = u32::try_from(index).unwrap() + 10;
        let remote = file(oid(1, vnode), name, 0);
        tree.insert(entry(oid(1, 2), &remote, u32::try_from(index).unwrap()))
            .unwrap();
    }
    tree
}

#[test]
fn initialize_empty_adds_unindexed_dot_entries() {
    let times = EntryAttributes {
        last_write_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
        end_of_file: 512,
        ..EntryAttributes::default()
    };
    let mut tree = DirectoryTree::new();
    tree.initialize_empty(oid(1, 2), oid(1, 1), &times).unwrap();

    assert_eq!(tree.len(), 2);
    assert!(tree.lookup(".", false).is_none());
    assert!(tree.lookup("..", true).is_none());

    let entries: Vec<_> = tree.iter().map(|(_, e)| e).collect();
    assert_eq!(entries[0].name(), ".");
    assert_eq!(entries[0].object_id(), oid(1, 2));
    assert_eq!(entries[0].file_index(), DOT_FILE_INDEX);
    assert_eq!(entries[1].name(), "..");
    assert_eq!(entries[1].object_id(), oid(1, 1));
    assert_eq!(entries[1].file_index(), DOT_DOT_FILE_INDEX);
    for pseudo in entries {
        assert_eq!(pseudo.file_type(), FileType::Directory);
        assert_eq!(pseudo.attributes().last_write_time, times.last_write_time);
        assert_eq!(pseudo.attributes().end_of_file, 0, "only timestamps are copied");
        assert!(!pseudo.is_in_parent_tree());
    }
}

#[test]
fn initialize_empty_discards_previous_contents() {
    let mut tree = tree_with(&["a", "b"]);
    tree.initialize_empty(oid(1, 2), oid(1, 1), &EntryAttributes::default())
        .unwrap();
    assert_eq!(tree.len(), 2);
    assert!(tree.lookup("a", false).is_none());
}

#[test]
fn insert_then_lookup_both_modes() {
    let tree = tree_with(&["ReadMe.md"]);

    let exact = tree.lookup("ReadMe.md", false).unwrap();
    assert_eq!(tree.get(exact).unwrap().name(), "ReadMe.md");
    assert!(tree.lookup("readme.md", false).is_none());

    let folded = tree.lookup("README.MD", true).unwrap();
    assert_eq!(folded, exact);
    assert!(tree.get(exact).unwrap().is_in_parent_tree());
}

#[test]
fn lookup_compares_full_names_on_hash_collision() {
    let tree = tree_with(&["A", "\u{0141}"]);
    let latin = tree.lookup("A", false).unwrap();
    let stroke = tree.lookup("\u{0141}", false).unwrap();
    assert_ne!(latin, stroke);
    assert_eq!(tree.get(latin).unwrap().name(), "A");
    assert_eq!(tree.get(stroke).unwrap().name(), "\u{0141}");
}

#[test]
fn case_insensitive_lookup_returns_first_match() {
    let tree = tree_with(&["note", "NOTE"]);
    let first = tree.lookup("Note", true).unwrap();
    assert_eq!(tree.get(first).unwrap().name(), "note");
    let exact = tree.lookup("NOTE", false).unwrap();
    assert_eq!(tree.get(exact).unwrap().name(), "NOTE");
}

#[test]
fn remove_unindexes_from_both_trees() {
    let mut tree = tree_with(&["a", "b"]);
    let a = tree.lookup("a", false).unwrap();
    let removed = tree.remove(a).unwrap();
    assert_eq!(removed.name(), "a");
    assert!(!removed.is_in_parent_tree());
    assert!(tree.lookup("a", false).is_none());
    assert!(tree.lookup("A", true).is_none());
    assert!(tree.lookup("b", false).is_some());
    assert_eq!(tree.len(), 3);
    assert!(tree.remove(a).is_none());
}

#[test]
fn drain_returns_entries_in_list_order() {
    let mut tree = tree_with(&["z", "y", "x"]);
    let drained: Vec<_> = tree
        .drain()
        .into_iter()
        .map(|(_, e)| e.name().to_owned())
        .collect();
    assert_eq!(drained, [".", "..", "z", "y", "x"]);
    assert!(tree.is_empty());
    assert!(tree.lookup("z", false).is_none());
}

#[test]
fn iteration_preserves_insertion_order() {
    let tree = tree_with(&["b", "a", "c"]);
    let names: Vec<_> = tree.iter().map(|(_, e)| e.name()).collect();
    assert_eq!(names, [".", "..", "b", "a", "c"]);
}

#[test]
fn unclassified_entry_becomes_unevaluated_directory() {
    let remote = RemoteAttributes::new(oid(1, 9), None, "mystery");
    let made = entry(oid(1, 2), &remote, 0);
    assert_eq!(made.file_type(), FileType::Directory);
    assert!(made.is_not_evaluated());
    assert!(made.flags().contains(EntryFlags::NOT_EVALUATED));
    assert!(
        made.attributes()
            .file_attributes
            .contains(FileAttributes::DIRECTORY)
    );
}

#[test]
fn entry_attributes_are_decorated_by_type() {
    let made = entry(oid(1, 2), &dir(oid(1, 9), "sub"), 0);
    assert!(
        made.attributes()
            .file_attributes
            .contains(FileAttributes::DIRECTORY)
    );
    let made = entry(oid(1, 2), &file(oid(1, 10), "plain", 7), 1);
    assert!(made.attributes().file_attributes.is_empty());
    assert_eq!(made.attributes().end_of_file, 7);
    assert_eq!(made.file_index(), 1);
    assert_eq!(made.parent_id(), oid(1, 2));
    assert!(made.node().is_none());
}

#[test]
fn claim_populate_transitions() {
    let state = DirState::new();
    assert!(!state.is_enumerated());
    let PopulateStatus::Claimed(generation) = state.try_claim_populate() else {
        panic!("first claim should win");
    };
    assert_eq!(generation, state.generation());
    assert_eq!(state.try_claim_populate(), PopulateStatus::InProgress);

    let installed = state
        .finish_populate(generation, |tree| {
            tree.initialize_empty(oid(1, 2), oid(1, 1), &EntryAttributes::default())
        })
        .unwrap();
    assert!(installed);
    assert!(state.is_enumerated());
    assert_eq!(state.try_claim_populate(), PopulateStatus::Done);
    assert_eq!(state.names(), [".", ".."]);
}

#[test]
fn stale_generation_is_discarded() {
    let state = DirState::new();
    let PopulateStatus::Claimed(generation) = state.try_claim_populate() else {
        panic!("first claim should win");
    };
    let mut fill_ran = false;
    let installed = state
        .finish_populate(generation + 1, |_| {
            fill_ran = true;
            Ok(())
        })
        .unwrap();
    assert!(!installed);
    assert!(!fill_ran);
    assert!(!state.is_enumerated());
    assert!(matches!(
        state.try_claim_populate(),
        PopulateStatus::Claimed(_)
    ));
}

#[test]
fn failed_fill_leaves_no_partial_listing() {
    let state = DirState::new();
    let PopulateStatus::Claimed(generation) = state.try_claim_populate() else {
        panic!("first claim should win");
    };
    let result = state.finish_populate(generation, |tree| {
        tree.initialize_empty(oid(1, 2), oid(1, 1), &EntryAttributes::default())?;
        Err(CacheError::ResourceExhausted)
    });
    assert!(matches!(result, Err(CacheError::ResourceExhausted)));
    assert_eq!(state.entry_count(), 0);
    assert!(!state.is_enumerated());
}

#[test]
fn abort_resets_to_unclaimed() {
    let state = DirState::new();
    assert!(matches!(
        state.try_claim_populate(),
        PopulateStatus::Claimed(_)
    ));
    state.abort_populate();
    assert!(matches!(
        state.try_claim_populate(),
        PopulateStatus::Claimed(_)
    ));
}

#[tokio::test]
async fn waiters_wake_when_population_finishes() {
    let state = Arc::new(DirState::new());
    let PopulateStatus::Claimed(generation) = state.try_claim_populate() else {
        panic!("first claim should win");
    };

    let waiter = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.wait_populated().await;
            state.is_enumerated()
        })
    };
    tokio::task::yield_now().await;

    state
        .finish_populate(generation, |tree| {
            tree.initialize_empty(oid(1, 2), oid(1, 1), &EntryAttributes::default())
        })
        .unwrap();

    let enumerated = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should wake")
        .unwrap();
    assert!(enumerated);
}

#[tokio::test]
async fn wait_returns_immediately_when_not_in_progress() {
    let state = DirState::new();
    tokio::time::timeout(Duration::from_millis(100), state.wait_populated())
        .await
        .expect("unclaimed directory should not block waiters");
}
