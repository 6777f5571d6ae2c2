#![allow(clippy::unwrap_used, missing_docs)]

use redir_cache::fs::CacheError;
use redir_cache::fs::sysname::{SysNameArch, SysNameTable, contains_sysname};

fn table() -> SysNameTable {
    SysNameTable::with_lists(
        vec!["i386_linux26".to_owned()],
        vec!["amd64_linux26".to_owned(), "amd64_linux24".to_owned()],
    )
}

#[test]
fn detects_the_token_in_any_case() {
    assert!(contains_sysname("@sys"));
    assert!(contains_sysname("@SYS"));
    assert!(contains_sysname("lib@Sys"));
    assert!(!contains_sysname("system"));
    assert!(!contains_sysname("@sy"));
}

#[test]
fn whole_component_is_replaced() {
    let table = table();
    assert_eq!(
        table.substitute("@sys", 1, SysNameArch::Bits64).unwrap(),
        "amd64_linux26"
    );
    assert_eq!(
        table.substitute("@SYS", 2, SysNameArch::Bits64).unwrap(),
        "amd64_linux24"
    );
    assert_eq!(
        table.substitute("@sys", 1, SysNameArch::Bits32).unwrap(),
        "i386_linux26"
    );
}

#[test]
fn prefix_before_the_token_is_kept() {
    let table = table();
    assert_eq!(
        table.substitute("lib@sys", 1, SysNameArch::Bits64).unwrap(),
        "libamd64_linux26"
    );
}

#[test]
fn out_of_range_index_is_not_found() {
    let table = table();
    assert!(matches!(
        table.substitute("@sys", 0, SysNameArch::Bits64),
        Err(CacheError::NotFound)
    ));
    assert!(matches!(
        table.substitute("@sys", 3, SysNameArch::Bits64),
        Err(CacheError::NotFound)
    ));
    assert!(matches!(
        table.substitute("@sys", 2, SysNameArch::Bits32),
        Err(CacheError::NotFound)
    ));
}

#[test]
fn set_replaces_one_list() {
    let table = table();
    table
        .set(SysNameArch::Bits32, &["a".to_owned(), "b".to_owned()])
        .unwrap();
    assert_eq!(table.names(SysNameArch::Bits32), ["a", "b"]);
    assert_eq!(table.len(SysNameArch::Bits32), 2);
    assert_eq!(table.len(SysNameArch::Bits64), 2);

    table.set(SysNameArch::Bits64, &[]).unwrap();
    assert_eq!(table.len(SysNameArch::Bits64), 0);
    assert!(table.substitute("@sys", 1, SysNameArch::Bits64).is_err());
}

#[test]
fn empty_table_has_no_substitutions() {
    let table = SysNameTable::new();
    assert_eq!(table.len(SysNameArch::Bits32), 0);
    assert_eq!(table.len(SysNameArch::native()), 0);
}

#[test]
fn native_arch_follows_pointer_width() {
    let expected = if cfg!(target_pointer_width = "32") {
        SysNameArch::Bits32
    } else {
        SysNameArch::Bits64
    };
    assert_eq!(SysNameArch::native(), expected);
}
