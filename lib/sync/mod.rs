//! Synchronization primitives.
//!
//! Resource-lock helpers shared by cache nodes, directory entry trees and
//! volume indexes. Every acquisition can run in blocking or try mode, and
//! poisoned locks are recovered with [`PoisonError::into_inner`].

use std::sync::{PoisonError, TryLockError};

pub use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::fs::CacheError;

/// Whether an acquisition may suspend the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Acquire {
    /// Block until the lock is available.
    #[default]
    Wait,
    /// Fail with [`CacheError::WouldBlock`] instead of blocking.
    NoWait,
}

/// Acquires `lock` shared, blocking until available.
pub fn shared<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires `lock` exclusively, blocking until available.
pub fn exclusive<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Locks a mutex, blocking until available.
pub fn locked<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Acquires `lock` shared in the given mode.
///
/// # Errors
///
/// Returns [`CacheError::WouldBlock`] if `mode` is [`Acquire::NoWait`] and the
/// lock is held exclusively.
pub fn acquire_shared<T>(
    lock: &RwLock<T>,
    mode: Acquire,
) -> Result<RwLockReadGuard<'_, T>, CacheError> {
    match mode {
        Acquire::Wait => Ok(shared(lock)),
        Acquire::NoWait => match lock.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(CacheError::WouldBlock),
        },
    }
}

/// Acquires `lock` exclusively in the given mode.
///
/// # Errors
///
/// Returns [`CacheError::WouldBlock`] if `mode` is [`Acquire::NoWait`] and the
/// lock is held by anyone else.
pub fn acquire_exclusive<T>(
    lock: &RwLock<T>,
    mode: Acquire,
) -> Result<RwLockWriteGuard<'_, T>, CacheError> {
    match mode {
        Acquire::Wait => Ok(exclusive(lock)),
        Acquire::NoWait => match lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(CacheError::WouldBlock),
        },
    }
}
