//! Recyclable resource handles.
//!
//! A [`Resource`] owns a decoded payload behind an `Arc`. Recycling returns the
//! payload to whatever pool produced it; afterwards the resource can no longer
//! be read. A resource can be locked while a background encoder is still
//! reading it, in which case recycling is deferred until the last lock is
//! dropped.

use crate::TypeTag;
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A decoded value that can be cached and recycled.
pub trait Payload: Any + Send + Sync + fmt::Debug {
    /// Registry tag of the payload.
    fn tag(&self) -> TypeTag;

    /// Approximate size in bytes, used for memory cache accounting.
    fn byte_size(&self) -> usize;

    /// Return the payload's buffers to their pool. The default drops them.
    fn recycle(self: Box<Self>) {}

    /// Access for downcasting to the concrete payload type.
    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Default)]
struct LockState {
    locks: usize,
    recycle_requested: bool,
}

/// Shared handle to a payload.
pub struct Resource {
    payload: RwLock<Option<Box<dyn Payload>>>,
    tag: TypeTag,
    size: usize,
    lock: Mutex<LockState>,
}

impl Resource {
    /// Wrap a payload.
    pub fn new<P: Payload>(payload: P) -> Arc<Self> {
        Self::from_boxed(Box::new(payload))
    }

    /// Wrap an already boxed payload.
    pub fn from_boxed(payload: Box<dyn Payload>) -> Arc<Self> {
        Arc::new(Self {
            tag: payload.tag(),
            size: payload.byte_size(),
            payload: RwLock::new(Some(payload)),
            lock: Mutex::new(LockState::default()),
        })
    }

    /// Registry tag of the payload.
    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// Size in bytes reported by the payload when it was wrapped.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Read the payload.
    ///
    /// # Panics
    ///
    /// Reading a recycled resource is a usage error and panics.
    pub fn get(&self) -> MappedRwLockReadGuard<'_, dyn Payload> {
        RwLockReadGuard::try_map(self.payload.read(), |slot| slot.as_deref())
            .unwrap_or_else(|_| panic!("Cannot read a recycled {} resource", self.tag))
    }

    /// Read the payload as a concrete type, `None` if it is another type.
    ///
    /// # Panics
    ///
    /// Panics if the resource has been recycled.
    pub fn downcast<T: Payload>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        MappedRwLockReadGuard::try_map(self.get(), |payload| payload.as_any().downcast_ref::<T>())
            .ok()
    }

    /// True once the payload has been handed back to its pool.
    pub fn is_recycled(&self) -> bool {
        self.payload.read().is_none()
    }

    /// Recycle the payload, or defer recycling while the resource is locked.
    ///
    /// # Panics
    ///
    /// Recycling twice is a usage error and panics.
    pub fn recycle(&self) {
        {
            let mut state = self.lock.lock();
            assert!(
                !state.recycle_requested,
                "Cannot recycle a {} resource that has already been recycled",
                self.tag
            );
            state.recycle_requested = true;
            if state.locks > 0 {
                return;
            }
        }
        self.release_payload();
    }

    /// Lock the resource against recycling until the returned guard is dropped.
    pub fn lock(self: &Arc<Self>) -> LockedResource {
        self.lock.lock().locks += 1;
        LockedResource { resource: Arc::clone(self) }
    }

    fn unlock(&self) {
        let recycle = {
            let mut state = self.lock.lock();
            state.locks -= 1;
            state.locks == 0 && state.recycle_requested
        };
        if recycle {
            self.release_payload();
        }
    }

    fn release_payload(&self) {
        if let Some(payload) = self.payload.write().take() {
            payload.recycle();
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("tag", &self.tag)
            .field("size", &self.size)
            .field("recycled", &self.is_recycled())
            .finish()
    }
}

/// A resource locked against recycling.
///
/// Dropping the guard unlocks the resource and performs any recycle that was
/// requested in the meantime.
#[derive(Debug)]
pub struct LockedResource {
    resource: Arc<Resource>,
}

impl LockedResource {
    /// The locked resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }
}

impl Drop for LockedResource {
    fn drop(&mut self) {
        self.resource.unlock();
    }
}
