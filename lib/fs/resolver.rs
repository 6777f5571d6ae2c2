//! Redirect target resolution.
//!
//! A symlink or mount point names a target object that may itself be a
//! redirect, possibly in another volume. The resolver follows target ids
//! through [`RemoteProvider::evaluate_object`] until it reaches a directory.

use tracing::{debug, instrument, warn};

use crate::fs::provider::RemoteProvider;
use crate::fs::{CacheError, FileType, ObjectId};

/// Evaluations allowed before resolution gives up.
pub const DEFAULT_MAX_HOPS: usize = 16;

/// Follows redirect chains to a directory, bounded by a hop count so a cyclic
/// or misconfigured mount graph cannot loop forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetResolver {
    max_hops: usize,
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HOPS)
    }
}

impl TargetResolver {
    /// Creates a resolver allowing `max_hops` evaluations (at least one).
    #[must_use]
    pub fn new(max_hops: usize) -> Self {
        Self {
            max_hops: max_hops.max(1),
        }
    }

    /// The hop bound.
    #[must_use]
    pub fn max_hops(&self) -> usize {
        self.max_hops
    }

    /// Resolves the redirect `start` to the directory it ultimately names.
    ///
    /// Starts from `target` when it is known, otherwise from `start` itself.
    ///
    /// # Errors
    ///
    /// - Evaluation failures are propagated.
    /// - [`CacheError::NotFound`] if the chain ends at a non-directory with
    ///   no target, or the remote cannot classify an object.
    /// - [`CacheError::ResolutionLimit`] once the hop bound is exhausted.
    #[instrument(name = "TargetResolver::resolve_to_directory", skip(self, provider))]
    pub async fn resolve_to_directory<P: RemoteProvider>(
        &self,
        provider: &P,
        start: ObjectId,
        target: ObjectId,
    ) -> Result<ObjectId, CacheError> {
        let mut current = if target.is_empty() { start } else { target };

        for hop in 0..self.max_hops {
            let remote = provider.evaluate_object(current).await?;
            match remote.file_type {
                Some(FileType::Directory) => {
                    let resolved = if remote.object_id.is_empty() {
                        current
                    } else {
                        remote.object_id
                    };
                    debug!(start = ?start, target = ?resolved, hops = hop + 1, "target resolved");
                    return Ok(resolved);
                }
                Some(_) if !remote.target_id.is_empty() => current = remote.target_id,
                _ => {
                    debug!(object = ?current, "redirect chain ends at a non-directory");
                    return Err(CacheError::NotFound);
                }
            }
        }

        warn!(start = ?start, hops = self.max_hops, "target resolution exceeded hop bound");
        Err(CacheError::ResolutionLimit {
            hops: self.max_hops,
        })
    }
}
