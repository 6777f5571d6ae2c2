//! CRC-32 name hashing for directory lookups.
//!
//! The checksum is the reflected 0xEDB88320 polynomial with initial value
//! 0xFFFFFFFF and a final complement. It folds in the low byte of each UTF-16
//! code unit of the name, so names that differ only in the high byte of a code
//! unit collide; trees compare full names after a hash hit.

use std::borrow::Cow;

/// Both hashes of a name, as stored on every indexed directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameHashes {
    /// Hash of the name as given.
    pub case_sensitive: u32,
    /// Hash of the upcased name.
    pub case_insensitive: u32,
}

impl NameHashes {
    /// Computes both hashes of `name`.
    #[must_use]
    pub fn of(name: &str) -> Self {
        Self {
            case_sensitive: hash_name(name, false),
            case_insensitive: hash_name(name, true),
        }
    }
}

/// Hashes `name`, upcasing it first when `case_insensitive` is set.
#[must_use]
pub fn hash_name(name: &str, case_insensitive: bool) -> u32 {
    let folded: Cow<'_, str> = if case_insensitive {
        Cow::Owned(name.chars().map(upcase).collect())
    } else {
        Cow::Borrowed(name)
    };

    let mut hasher = crc32fast::Hasher::new();
    let mut chunk = [0u8; 64];
    let mut filled = 0;
    for unit in folded.encode_utf16() {
        chunk[filled] = unit.to_le_bytes()[0];
        filled += 1;
        if filled == chunk.len() {
            hasher.update(&chunk);
            filled = 0;
        }
    }
    hasher.update(&chunk[..filled]);
    hasher.finalize()
}

/// Compares two names the way the case-insensitive tree does.
#[must_use]
pub fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.chars().map(upcase).eq(b.chars().map(upcase))
}

/// Simple one-to-one upcasing. Characters whose uppercase form expands to
/// several characters are left alone.
fn upcase(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => c,
    }
}
