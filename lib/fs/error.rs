use std::collections::TryReserveError;
use std::io::ErrorKind;

use thiserror::Error;

/// Errors surfaced by the namespace cache.
///
/// `NotFound` is the expected outcome of racing an invalidation: callers
/// re-resolve (re-enumerate or re-evaluate) rather than report it.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An allocation failed; partial state was unwound.
    #[error("allocation failed")]
    ResourceExhausted,

    /// The object, volume or entry is not cached.
    #[error("object not found")]
    NotFound,

    /// The invalidation target could not be located or pinned.
    #[error("invalidation target could not be located")]
    Unsuccessful,

    /// The cache graph reached a state it must never be in.
    #[error("cache graph inconsistency: {0}")]
    InternalInconsistency(&'static str),

    /// A cached-data wait was cancelled by a concurrent invalidation.
    #[error("cached-data request cancelled")]
    Cancelled,

    /// A try-mode lock acquisition found the lock held.
    #[error("resource is busy")]
    WouldBlock,

    /// Target resolution did not reach a directory within the hop bound.
    #[error("target resolution exceeded {hops} hops")]
    ResolutionLimit {
        /// The hop bound that was exhausted.
        hops: usize,
    },

    /// A directory operation was issued against a non-directory node.
    #[error("not a directory")]
    NotADirectory,

    /// The requested access is not covered by the granted access.
    #[error("access denied")]
    AccessDenied,

    /// A remote collaborator failed.
    #[error("remote call failed: {0}")]
    Remote(std::io::Error),
}

impl CacheError {
    /// The `errno` a dispatch layer should report for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::ResourceExhausted => libc::ENOMEM,
            Self::NotFound => libc::ENOENT,
            Self::Unsuccessful | Self::InternalInconsistency(_) => libc::EIO,
            Self::Cancelled => libc::ECANCELED,
            Self::WouldBlock => libc::EAGAIN,
            Self::ResolutionLimit { .. } => libc::ELOOP,
            Self::NotADirectory => libc::ENOTDIR,
            Self::AccessDenied => libc::EACCES,
            Self::Remote(inner) => inner.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::OutOfMemory => Self::ResourceExhausted,
            _ => Self::Remote(error),
        }
    }
}

impl From<TryReserveError> for CacheError {
    fn from(_: TryReserveError) -> Self {
        Self::ResourceExhausted
    }
}

impl From<CacheError> for std::io::Error {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Remote(inner) => inner,
            other => Self::from_raw_os_error(other.errno()),
        }
    }
}
