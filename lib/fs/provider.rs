use crate::fs::{ObjectId, RemoteAttributes};

/// The remote side of the cache: evaluates objects and enumerates
/// directories on behalf of lookups, target resolution and invalidation.
///
/// Calls are blocking from the cache's point of view; timeouts and retries
/// belong to the implementor. An [`std::io::ErrorKind::NotFound`] error means
/// the object is gone and is surfaced as
/// [`CacheError::NotFound`](crate::fs::CacheError::NotFound).
pub trait RemoteProvider: Send + Sync + 'static {
    /// Fetch the current type, target, size, times and attributes of `id`.
    fn evaluate_object(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<RemoteAttributes, std::io::Error>> + Send;

    /// List the children of directory `id` in remote order.
    ///
    /// `.` and `..` are synthesized by the cache and must not be returned.
    fn enumerate_directory(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<Vec<RemoteAttributes>, std::io::Error>> + Send;

    /// Fetch the global namespace root, used to rebuild the cache after a
    /// whole-volume invalidation.
    fn global_root(&self) -> impl Future<Output = Result<RemoteAttributes, std::io::Error>> + Send;
}

/// The cached-data subsystem, driven by invalidation.
///
/// Both operations must be idempotent: a file can be flushed and torn down by
/// a directory teardown and again by the descendant scan that follows it.
pub trait ExtentManager: Send + Sync + 'static {
    /// Write back dirty cached data of `id`.
    fn flush(&self, id: ObjectId) -> impl Future<Output = Result<(), std::io::Error>> + Send;

    /// Drop every cached extent of `id`.
    fn tear_down(&self, id: ObjectId) -> impl Future<Output = Result<(), std::io::Error>> + Send;
}
