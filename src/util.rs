use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared, lock-guarded ownership of a value.
pub type Pod<T> = Arc<RwLock<T>>;

pub fn pod<T>(v: T) -> Pod<T> {
    Arc::new(RwLock::new(v))
}

/// A handy shortcut for the `RwLock` read()/write().unwrap() pattern.
///
/// The storage core is single-writer per engine, so lock poisoning only
/// happens after a panic already unwound through a page mutation; there is
/// nothing useful to do but propagate the panic.
pub trait HandyRwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T>;
    fn rl(&self) -> RwLockReadGuard<'_, T>;
}

impl<T> HandyRwLock<T> for RwLock<T> {
    fn wl(&self) -> RwLockWriteGuard<'_, T> {
        self.write().unwrap()
    }

    fn rl(&self) -> RwLockReadGuard<'_, T> {
        self.read().unwrap()
    }
}
