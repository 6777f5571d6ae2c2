//! Namespace cache: identifiers, directory entries, cache nodes, volumes and
//! invalidation.
/// Access-mask pre-qualification for open requests.
pub mod access;
/// Directory entry store: ordered children plus name-hash indexes.
pub mod dcache;
mod error;
/// Pending cached-data request status and its cancellation signal.
pub mod extents;
pub mod fcb;
pub mod index;
pub mod invalidate;
pub mod name_hash;
/// Request-facing facade over the cache.
pub mod namespace;
/// External collaborators consumed by the cache.
pub mod provider;
pub mod resolver;
/// `@sys` path component substitution.
pub mod sysname;
/// Per-volume node arenas and the registry indexing them.
pub mod volume;

pub use error::CacheError;
pub use fcb::{CacheNode, NodeId, NodePin};
pub use index::{ObjectKey, VolumeKey};
pub use invalidate::{InvalidationReason, InvalidationRecord};
pub use namespace::{CacheOptions, CacheStatus, NamespaceCache};

use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Globally unique identifier of one remote filesystem object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ObjectId {
    /// The cell (administrative domain) holding the volume.
    pub cell: u32,
    /// The volume within the cell.
    pub volume: u32,
    /// The vnode within the volume.
    pub vnode: u32,
    /// Uniquifier distinguishing reuses of the same vnode.
    pub unique: u32,
}

impl ObjectId {
    /// The all-zero identifier, meaning "no object".
    pub const EMPTY: Self = Self::new(0, 0, 0, 0);

    /// Creates an identifier from its four parts.
    #[must_use]
    pub const fn new(cell: u32, volume: u32, vnode: u32, unique: u32) -> Self {
        Self {
            cell,
            volume,
            vnode,
            unique,
        }
    }

    /// Whether this is the empty identifier.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.cell == 0 && self.volume == 0 && self.vnode == 0 && self.unique == 0
    }
}

/// The type of a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileType {
    /// A directory.
    Directory,
    /// A regular file.
    File,
    /// A symbolic link; resolves to a directory through the target resolver.
    SymLink,
    /// A volume mount point; its target is the root of another volume.
    MountPoint,
}

impl FileType {
    /// Whether this type redirects to a target object.
    #[must_use]
    pub const fn is_redirect(self) -> bool {
        matches!(self, Self::SymLink | Self::MountPoint)
    }

    /// Applies the attribute bits implied by the type.
    #[must_use]
    pub fn decorate(self, attributes: FileAttributes) -> FileAttributes {
        match self {
            Self::Directory | Self::SymLink => attributes | FileAttributes::DIRECTORY,
            Self::MountPoint => {
                attributes | FileAttributes::REPARSE_POINT | FileAttributes::DIRECTORY
            }
            Self::File => attributes,
        }
    }
}

bitflags! {
    /// File attribute bits reported to the dispatch layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        /// Read-only object.
        const READONLY      = 0x0000_0001;
        /// Hidden object.
        const HIDDEN        = 0x0000_0002;
        /// System object.
        const SYSTEM        = 0x0000_0004;
        /// Directory.
        const DIRECTORY     = 0x0000_0010;
        /// Archive bit.
        const ARCHIVE       = 0x0000_0020;
        /// No other attributes set.
        const NORMAL        = 0x0000_0080;
        /// Reparse point (mount points).
        const REPARSE_POINT = 0x0000_0400;
    }
}

/// Timestamps, sizes and attribute bits cached for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryAttributes {
    /// Creation time.
    pub creation_time: SystemTime,
    /// Last access time.
    pub last_access_time: SystemTime,
    /// Last data write time.
    pub last_write_time: SystemTime,
    /// Last metadata change time.
    pub change_time: SystemTime,
    /// Logical size in bytes.
    pub end_of_file: u64,
    /// Allocated size in bytes.
    pub allocation_size: u64,
    /// Attribute bits, already decorated by file type.
    pub file_attributes: FileAttributes,
    /// Extended attribute size.
    pub ea_size: u32,
    /// Hard link count.
    pub links: u32,
    /// Remote data version.
    pub data_version: u64,
}

impl Default for EntryAttributes {
    fn default() -> Self {
        Self {
            creation_time: SystemTime::UNIX_EPOCH,
            last_access_time: SystemTime::UNIX_EPOCH,
            last_write_time: SystemTime::UNIX_EPOCH,
            change_time: SystemTime::UNIX_EPOCH,
            end_of_file: 0,
            allocation_size: 0,
            file_attributes: FileAttributes::empty(),
            ea_size: 0,
            links: 1,
            data_version: 0,
        }
    }
}

impl EntryAttributes {
    /// Attributes of a directory whose metadata has not been fetched yet.
    #[must_use]
    pub fn unevaluated_directory() -> Self {
        Self {
            file_attributes: FileAttributes::DIRECTORY,
            ..Self::default()
        }
    }

    /// Copies only the four timestamps of `other`.
    #[must_use]
    pub fn timestamps_of(other: &Self) -> Self {
        Self {
            creation_time: other.creation_time,
            last_access_time: other.last_access_time,
            last_write_time: other.last_write_time,
            change_time: other.change_time,
            ..Self::default()
        }
    }
}

/// An object as reported by the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttributes {
    /// The object's identifier.
    pub object_id: ObjectId,
    /// Redirect target; empty unless this is a symlink or mount point.
    pub target_id: ObjectId,
    /// The object's type. `None` means the remote could not classify it.
    pub file_type: Option<FileType>,
    /// Name within the enumerated directory. Empty for direct evaluations.
    pub name: String,
    /// Target path text of a symlink or mount point.
    pub target_name: Option<String>,
    /// Timestamps, sizes and raw attribute bits.
    pub attributes: EntryAttributes,
}

impl RemoteAttributes {
    /// Creates attributes for `object_id` with default metadata.
    #[must_use]
    pub fn new(object_id: ObjectId, file_type: Option<FileType>, name: impl Into<String>) -> Self {
        Self {
            object_id,
            target_id: ObjectId::EMPTY,
            file_type,
            name: name.into(),
            target_name: None,
            attributes: EntryAttributes::default(),
        }
    }

    /// Sets the redirect target.
    #[must_use]
    pub fn with_target(mut self, target_id: ObjectId) -> Self {
        self.target_id = target_id;
        self
    }

    /// Sets the redirect target text.
    #[must_use]
    pub fn with_target_name(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = Some(target_name.into());
        self
    }

    /// Sets the logical and allocated size.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.attributes.end_of_file = size;
        self.attributes.allocation_size = size;
        self
    }
}

/// A directory entry yielded by [`namespace::NamespaceCache::readdir`].
///
/// Borrows the entry name from the snapshot taken under the directory lock.
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    /// The name of this entry within its parent directory.
    pub name: &'a str,
    /// The object the entry names.
    pub object_id: ObjectId,
    /// The entry's type.
    pub file_type: FileType,
    /// Cached attributes of the entry.
    pub attributes: EntryAttributes,
    /// Position assigned at enumeration.
    pub file_index: u32,
}
