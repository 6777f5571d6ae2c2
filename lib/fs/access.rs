use bitflags::bitflags;

bitflags! {
    /// Access rights of an open request, in the dispatch layer's encoding.
    ///
    /// Directory rights alias the file rights with the same value:
    /// `LIST_DIRECTORY` is `FILE_READ_DATA`, `TRAVERSE` is `FILE_EXECUTE`
    /// and `ADD_FILE` is `FILE_WRITE_DATA`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessMask: u32 {
        /// Read file data or list a directory.
        const FILE_READ_DATA         = 0x0000_0001;
        /// Write file data or add a file to a directory.
        const FILE_WRITE_DATA        = 0x0000_0002;
        /// Append file data or add a subdirectory.
        const FILE_APPEND_DATA       = 0x0000_0004;
        /// Read extended attributes.
        const FILE_READ_EA           = 0x0000_0008;
        /// Write extended attributes.
        const FILE_WRITE_EA          = 0x0000_0010;
        /// Execute a file or traverse a directory.
        const FILE_EXECUTE           = 0x0000_0020;
        /// Delete children of a directory.
        const FILE_DELETE_CHILD      = 0x0000_0040;
        /// Read attributes.
        const FILE_READ_ATTRIBUTES   = 0x0000_0080;
        /// Write attributes.
        const FILE_WRITE_ATTRIBUTES  = 0x0000_0100;
        /// Delete the object.
        const DELETE                 = 0x0001_0000;
        /// Read the security descriptor.
        const READ_CONTROL           = 0x0002_0000;
        /// Write the discretionary ACL.
        const WRITE_DAC              = 0x0004_0000;
        /// Change the owner.
        const WRITE_OWNER            = 0x0008_0000;
        /// Wait on the object.
        const SYNCHRONIZE            = 0x0010_0000;
        /// Access the system ACL.
        const ACCESS_SYSTEM_SECURITY = 0x0100_0000;

        /// Alias of `FILE_READ_DATA` for directories.
        const LIST_DIRECTORY = Self::FILE_READ_DATA.bits();
        /// Alias of `FILE_EXECUTE` for directories.
        const TRAVERSE       = Self::FILE_EXECUTE.bits();
    }
}

impl AccessMask {
    /// Every right the check reasons about.
    pub const RECOGNIZED: Self = Self::DELETE
        .union(Self::READ_CONTROL)
        .union(Self::WRITE_OWNER)
        .union(Self::WRITE_DAC)
        .union(Self::SYNCHRONIZE)
        .union(Self::ACCESS_SYSTEM_SECURITY)
        .union(Self::FILE_READ_DATA)
        .union(Self::FILE_WRITE_DATA)
        .union(Self::FILE_READ_EA)
        .union(Self::FILE_WRITE_EA)
        .union(Self::FILE_READ_ATTRIBUTES)
        .union(Self::FILE_WRITE_ATTRIBUTES)
        .union(Self::LIST_DIRECTORY)
        .union(Self::TRAVERSE)
        .union(Self::FILE_DELETE_CHILD)
        .union(Self::FILE_APPEND_DATA);

    /// Rights compatible with a read-only grant. Security-descriptor and
    /// attribute writes are included; data, append, delete and delete-child
    /// are not.
    pub const READ_ONLY_ALLOW: Self = Self::READ_CONTROL
        .union(Self::WRITE_OWNER)
        .union(Self::WRITE_DAC)
        .union(Self::SYNCHRONIZE)
        .union(Self::ACCESS_SYSTEM_SECURITY)
        .union(Self::FILE_READ_DATA)
        .union(Self::FILE_READ_EA)
        .union(Self::FILE_WRITE_EA)
        .union(Self::FILE_READ_ATTRIBUTES)
        .union(Self::FILE_WRITE_ATTRIBUTES)
        .union(Self::FILE_EXECUTE);
}

/// Whether `mask` stays inside the read-only allow-list.
///
/// Raw bits outside the recognized set count as write-class.
#[must_use]
pub fn is_read_only_request(mask: u32) -> bool {
    mask & !AccessMask::READ_ONLY_ALLOW.bits() == 0
}

/// Pre-qualifies an open request.
///
/// `granted` is reduced to the recognized rights first. The request is
/// refused only when it asks for write-class access and the reduced grant is
/// confined to the read-only set.
#[must_use]
pub fn check_access(desired: u32, granted: u32) -> bool {
    let reduced = granted & AccessMask::RECOGNIZED.bits();
    is_read_only_request(desired) || !is_read_only_request(reduced)
}
