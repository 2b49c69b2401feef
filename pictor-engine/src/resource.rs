//! Reference-counted handles to decoded resources.
//!
//! An [`EngineResource`] counts how many consumers currently hold it. The
//! count is only touched on the control thread. When it drops back to zero the
//! engine decides whether the resource moves into the memory cache or is
//! recycled.
//!
//! Each handle handed to a consumer stands for exactly one acquisition, which
//! is why handles cannot be cloned. The shared state behind the handles
//! reports itself to the active-resource monitor when the last handle goes
//! away, so a consumer that drops its handle instead of releasing it does not
//! leak the entry.

use crate::request::RequestKey;
use pictor_cache::CacheWeight;
use pictor_common::{Payload, Resource};
use parking_lot::MappedRwLockReadGuard;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

/// Unique identity of one [`EngineResource`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Events delivered to the active-resource monitor.
#[derive(Debug)]
pub(crate) enum Reference {
    /// Every handle of the resource is gone.
    Collected(Collected),
    /// Stop monitoring.
    Shutdown,
}

/// Identity of a resource whose last handle went away.
#[derive(Debug, Clone)]
pub(crate) struct Collected {
    pub key: RequestKey,
    pub id: ResourceId,
}

pub(crate) struct EngineResourceState {
    id: ResourceId,
    key: RequestKey,
    resource: Arc<Resource>,
    cacheable: bool,
    recyclable: bool,
    acquired: AtomicUsize,
    recycled: AtomicBool,
    control_thread: ThreadId,
    collected: flume::Sender<Reference>,
}

impl EngineResourceState {
    fn assert_control_thread(&self, operation: &str) {
        assert_eq!(
            thread::current().id(),
            self.control_thread,
            "Must call {operation} on the control thread"
        );
    }
}

impl Drop for EngineResourceState {
    fn drop(&mut self) {
        let _ = self.collected.send(Reference::Collected(Collected {
            key: self.key.clone(),
            id: self.id,
        }));
    }
}

/// A decoded resource handed out by the engine.
///
/// Return it with [`LoaderHandle::release`](crate::LoaderHandle::release)
/// when done with it.
pub struct EngineResource {
    state: Arc<EngineResourceState>,
}

impl EngineResource {
    /// The underlying resource.
    pub fn resource(&self) -> &Arc<Resource> {
        &self.state.resource
    }

    /// Read the payload.
    ///
    /// # Panics
    ///
    /// Panics if the resource has been recycled.
    pub fn get(&self) -> MappedRwLockReadGuard<'_, dyn Payload> {
        self.state.resource.get()
    }

    /// Read the payload as a concrete type.
    pub fn downcast<T: Payload>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        self.state.resource.downcast::<T>()
    }

    /// Key of the request that produced this resource.
    pub fn key(&self) -> &RequestKey {
        &self.state.key
    }

    /// Identity of this resource instance.
    pub fn id(&self) -> ResourceId {
        self.state.id
    }

    /// Whether the resource may enter the memory tiers.
    pub fn is_cacheable(&self) -> bool {
        self.state.cacheable
    }

    /// Whether recycling returns the payload to its pool.
    pub fn is_recyclable(&self) -> bool {
        self.state.recyclable
    }

    /// Current number of acquisitions.
    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::Acquire)
    }

    /// True if both handles refer to the same resource instance.
    pub fn same_instance(&self, other: &EngineResource) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Acquire once and return the handle that stands for the acquisition.
    pub(crate) fn acquire(&self) -> EngineResource {
        self.state.assert_control_thread("acquire");
        assert!(
            !self.state.recycled.load(Ordering::Acquire),
            "Cannot acquire a recycled resource"
        );
        self.state.acquired.fetch_add(1, Ordering::AcqRel);
        EngineResource { state: Arc::clone(&self.state) }
    }

    /// Give back one acquisition. Returns the handle if the count reached
    /// zero, at which point the caller owns the decision of what to do with
    /// the resource.
    pub(crate) fn release(self) -> Option<EngineResource> {
        self.state.assert_control_thread("release");
        let previous = self.state.acquired.load(Ordering::Acquire);
        assert!(previous > 0, "Cannot release a recycled or not yet acquired resource");
        self.state.acquired.store(previous - 1, Ordering::Release);
        (previous == 1).then_some(self)
    }

    /// Recycle the payload.
    pub(crate) fn recycle(self) {
        assert!(
            self.acquired() == 0,
            "Cannot recycle a resource while it is still acquired"
        );
        assert!(
            !self.state.recycled.swap(true, Ordering::AcqRel),
            "Cannot recycle a resource that has already been recycled"
        );
        if self.state.recyclable {
            self.state.resource.recycle();
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineResourceState> {
        Arc::downgrade(&self.state)
    }

    /// A count-neutral handle from a weak reference, if the resource is alive.
    pub(crate) fn upgrade(weak: &Weak<EngineResourceState>) -> Option<EngineResource> {
        weak.upgrade().map(|state| EngineResource { state })
    }
}

impl CacheWeight for EngineResource {
    fn weight(&self) -> u64 {
        self.state.resource.size() as u64
    }
}

impl fmt::Debug for EngineResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineResource")
            .field("id", &self.state.id)
            .field("key", &self.state.key.to_string())
            .field("acquired", &self.acquired())
            .field("cacheable", &self.state.cacheable)
            .field("resource", &self.state.resource)
            .finish()
    }
}

/// Creates [`EngineResource`]s bound to the control thread.
pub(crate) struct ResourceFactory {
    next_id: u64,
    control_thread: ThreadId,
    collected: flume::Sender<Reference>,
}

impl ResourceFactory {
    pub fn new(collected: flume::Sender<Reference>) -> Self {
        Self { next_id: 0, control_thread: thread::current().id(), collected }
    }

    /// Make the current thread the control thread for resources built from now on.
    pub fn bind_to_current_thread(&mut self) {
        self.control_thread = thread::current().id();
    }

    /// A new resource with no acquisitions.
    pub fn build(
        &mut self,
        key: RequestKey,
        resource: Arc<Resource>,
        cacheable: bool,
        recyclable: bool,
    ) -> EngineResource {
        self.next_id += 1;
        EngineResource {
            state: Arc::new(EngineResourceState {
                id: ResourceId(self.next_id),
                key,
                resource,
                cacheable,
                recyclable,
                acquired: AtomicUsize::new(0),
                recycled: AtomicBool::new(false),
                control_thread: self.control_thread,
                collected: self.collected.clone(),
            }),
        }
    }

    /// Tell the monitor to stop.
    pub fn stop_monitor(&self) {
        let _ = self.collected.send(Reference::Shutdown);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::request::{EngineKeyFactory, LoadRequest};
    use pictor_common::{Model, TypeTag};
    use std::any::Any;

    #[derive(Debug)]
    pub(crate) struct Blob {
        pub size: usize,
        pub recycled: Arc<AtomicUsize>,
    }

    impl Payload for Blob {
        fn tag(&self) -> TypeTag {
            TypeTag::BITMAP
        }
        fn byte_size(&self) -> usize {
            self.size
        }
        fn recycle(self: Box<Self>) {
            self.recycled.fetch_add(1, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    pub(crate) fn blob(size: usize) -> (Arc<Resource>, Arc<AtomicUsize>) {
        let recycled = Arc::new(AtomicUsize::new(0));
        (Resource::new(Blob { size, recycled: Arc::clone(&recycled) }), recycled)
    }

    pub(crate) fn key(name: &str) -> RequestKey {
        EngineKeyFactory.build_key(&LoadRequest::new(Model::Url(name.to_string())))
    }

    fn factory() -> (ResourceFactory, flume::Receiver<Reference>) {
        let (tx, rx) = flume::unbounded();
        (ResourceFactory::new(tx), rx)
    }

    #[test]
    fn test_acquire_release_counts() {
        let (mut factory, _rx) = factory();
        let (payload, _) = blob(8);
        let base = factory.build(key("a"), payload, true, true);
        let first = base.acquire();
        let second = base.acquire();
        assert_eq!(base.acquired(), 2);
        assert!(first.release().is_none());
        let last = second.release().expect("count reached zero");
        assert_eq!(last.acquired(), 0);
        assert!(last.same_instance(&base));
    }

    #[test]
    #[should_panic(expected = "not yet acquired")]
    fn test_release_at_zero_panics() {
        let (mut factory, _rx) = factory();
        let (payload, _) = blob(8);
        let base = factory.build(key("a"), payload, true, true);
        let _ = base.release();
    }

    #[test]
    #[should_panic(expected = "still acquired")]
    fn test_recycle_while_acquired_panics() {
        let (mut factory, _rx) = factory();
        let (payload, _) = blob(8);
        let base = factory.build(key("a"), payload, true, true);
        let _held = base.acquire();
        base.recycle();
    }

    #[test]
    #[should_panic(expected = "control thread")]
    fn test_acquire_off_control_thread_panics() {
        let (mut factory, _rx) = factory();
        let (payload, _) = blob(8);
        let base = factory.build(key("a"), payload, true, true);
        let result = std::thread::spawn(move || {
            let _ = base.acquire();
        })
        .join();
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    #[test]
    fn test_recycle_respects_recyclable_flag() {
        let (mut factory, _rx) = factory();
        let (payload, recycled) = blob(8);
        factory.build(key("a"), Arc::clone(&payload), true, false).recycle();
        assert_eq!(recycled.load(Ordering::SeqCst), 0);
        factory.build(key("a"), payload, true, true).recycle();
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_last_handle_reports_collection() {
        let (mut factory, rx) = factory();
        let (payload, _) = blob(8);
        let base = factory.build(key("a"), payload, true, true);
        let id = base.id();
        let held = base.acquire();
        drop(base);
        assert!(rx.try_recv().is_err());
        drop(held);
        match rx.try_recv().unwrap() {
            Reference::Collected(collected) => {
                assert_eq!(collected.id, id);
                assert_eq!(collected.key, key("a"));
            }
            Reference::Shutdown => panic!("unexpected shutdown"),
        }
    }
}
