//! Request deduplication, cache tiers and the staged decode pipeline.
//!
//! A [`Loader`] turns a [`LoadRequest`] into a decoded, transformed resource.
//! Each request is served by the first tier that can satisfy it:
//!
//! 1. **Active resources**: resources currently held by some consumer
//! 2. **Memory cache**: released resources, bounded by size
//! 3. **Running jobs**: a request with the same key already in flight
//! 4. **A new job**: reads the resource cache, then the data cache, then the
//!    source, writing to the disk cache as the strategy allows
//!
//! # Quick Start
//!
//! ```no_run
//! use pictor_common::Model;
//! use pictor_engine::{Config, LoadRequest, LoaderBuilder};
//! use pictor_registry::Registry;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::builder().memory_cache_size(32 * 1024 * 1024).build()?;
//!     let registry = Registry::new(); // register loaders and decoders here
//!
//!     let loader = LoaderBuilder::new(config).registry(registry).build()?;
//!     let handle = loader.handle();
//!
//!     let loaded = handle
//!         .load_async(LoadRequest::new(Model::File("cat.png".into())).size(200, 200))
//!         .await?;
//!     println!("{} from {}", loaded.resource.key(), loaded.data_source);
//!     handle.release(loaded.resource);
//!
//!     loader.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Threads
//!
//! - **Control thread**: owns the engine, handles loads, releases and job
//!   results one message at a time, and runs every [`ResourceCallback`]
//! - **Executors**: `disk-cache`, `source`, `source-unlimited` and
//!   `animation` pools running decode jobs by priority
//! - **Monitor**: notices handles that were dropped without being released
//!
//! # Error Handling
//!
//! A failed load reports one [`EngineError::LoadFailed`] carrying every
//! cause that was collected while trying each stage. Misusing a resource,
//! such as releasing it more often than it was handed out, panics.

#![forbid(unsafe_code)]
#![deny(missing_docs, clippy::all, clippy::pedantic, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

// Public modules
pub mod config;
pub mod errors;
pub mod messages;
pub mod request;
pub mod resource;

// Private implementation modules
mod active;
mod control;
mod decode_job;
mod engine;
mod engine_job;
mod executor;
mod generators;
mod helper;
mod jobs;

// Re-exports
pub use config::{Config, ConfigBuilder};
pub use engine::EngineSnapshot;
pub use errors::EngineError;
pub use messages::{LoadTicket, ResourceCallback};
pub use request::{LoadRequest, RequestKey};
pub use resource::{EngineResource, ResourceId};

use config::DiskCacheConfig;
use control::{Intake, Threads};
use messages::ControlMessage;
use parking_lot::Mutex;
use pictor_cache::{DiskCache, DiskCacheAdapter, DiskLruCache, TrimLevel};
use pictor_common::DataSource;
use pictor_registry::Registry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Builder for a [`Loader`].
pub struct LoaderBuilder {
    config: Config,
    registry: Option<Registry>,
    disk_cache: Option<Arc<dyn DiskCache>>,
}

impl LoaderBuilder {
    /// Creates a builder with the given configuration and an empty registry.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config, registry: None, disk_cache: None }
    }

    /// Sets the registry of loaders, decoders and encoders.
    #[must_use]
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `disk_cache` instead of the one described by the configuration.
    #[must_use]
    pub fn disk_cache(mut self, disk_cache: Arc<dyn DiskCache>) -> Self {
        self.disk_cache = Some(disk_cache);
        self
    }

    /// Starts the control thread, the executors and the monitor.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a thread cannot
    /// be spawned. A disk cache that cannot be opened is not an error; the
    /// loader runs without one.
    pub fn build(self) -> Result<Loader, EngineError> {
        self.config.validate()?;
        let disk_cache = match self.disk_cache {
            Some(disk_cache) => disk_cache,
            None => open_disk_cache(&self.config.disk_cache),
        };
        let registry = Arc::new(self.registry.unwrap_or_default());
        let intake = Intake::default();
        let (control, threads) = control::spawn(&self.config, registry, disk_cache, intake.clone())?;
        info!("Loader started");
        Ok(Loader {
            handle: LoaderHandle { control, intake, next_ticket: Arc::new(AtomicU64::new(1)) },
            threads: Mutex::new(Some(threads)),
        })
    }
}

fn open_disk_cache(config: &DiskCacheConfig) -> Arc<dyn DiskCache> {
    if !config.enabled {
        return Arc::new(DiskCacheAdapter);
    }
    match DiskLruCache::open(&config.directory, config.max_size_bytes) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(
                "Failed to open disk cache at {}, continuing without it: {e}",
                config.directory.display()
            );
            Arc::new(DiskCacheAdapter)
        }
    }
}

/// A resource delivered by [`LoaderHandle::load_async`].
#[derive(Debug)]
pub struct Loaded {
    /// The resource. Hand it back with [`LoaderHandle::release`].
    pub resource: EngineResource,
    /// Where the resource came from.
    pub data_source: DataSource,
}

/// Handle for submitting work to a running loader.
///
/// It can be cloned and shared across threads.
#[derive(Clone)]
pub struct LoaderHandle {
    control: flume::Sender<ControlMessage>,
    intake: Intake,
    next_ticket: Arc<AtomicU64>,
}

impl LoaderHandle {
    /// Starts a load. `callback` is told about the outcome on the control
    /// thread, or immediately if the loader has shut down.
    pub fn load(&self, request: LoadRequest, callback: Arc<dyn ResourceCallback>) -> LoadHandle {
        let ticket = LoadTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        if let Err(ControlMessage::Load { callback, .. }) =
            self.intake.submit(&self.control, ControlMessage::Load { ticket, request, callback })
        {
            callback.on_load_failed(EngineError::Shutdown);
        }
        LoadHandle { ticket, control: self.control.clone() }
    }

    /// Loads a resource and waits for it.
    pub async fn load_async(&self, request: LoadRequest) -> Result<Loaded, EngineError> {
        let (tx, rx) = flume::bounded(1);
        self.load(request, Arc::new(ChannelCallback { tx, control: self.control.clone() }));
        rx.recv_async().await.map_err(|_| EngineError::Shutdown)?
    }

    /// Hands back a resource received from a load.
    pub fn release(&self, resource: EngineResource) {
        let _ = self.control.send(ControlMessage::Release(resource));
    }

    /// Empties the memory cache.
    pub fn clear_memory(&self) {
        let _ = self.control.send(ControlMessage::ClearMemory);
    }

    /// Shrinks the memory cache according to memory pressure.
    pub fn trim_memory(&self, level: TrimLevel) {
        let _ = self.control.send(ControlMessage::TrimMemory(level));
    }

    /// Scales the memory cache's configured size.
    pub fn set_memory_size_multiplier(&self, multiplier: f32) {
        let _ = self.control.send(ControlMessage::SetMemorySizeMultiplier(multiplier));
    }

    /// Deletes every disk cache entry, in the background.
    pub fn clear_disk_cache(&self) {
        let _ = self.control.send(ControlMessage::ClearDiskCache);
    }

    /// The keys held by each tier.
    ///
    /// Blocks until the control thread answers, so it must not be called
    /// from a [`ResourceCallback`].
    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (tx, rx) = flume::bounded(1);
        self.control
            .send(ControlMessage::Snapshot(tx))
            .map_err(|_| EngineError::Shutdown)?;
        rx.recv().map_err(|_| EngineError::Shutdown)
    }

    /// The keys held by each tier, awaited without blocking the runtime.
    pub async fn snapshot_async(&self) -> Result<EngineSnapshot, EngineError> {
        let (tx, rx) = flume::bounded(1);
        self.control
            .send_async(ControlMessage::Snapshot(tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.recv_async().await.map_err(|_| EngineError::Shutdown)
    }

    /// Asks the loader to shut down without waiting for it.
    pub fn shutdown(&self) {
        let _ = self.control.send(ControlMessage::Shutdown);
    }
}

/// One consumer's interest in a load.
#[derive(Debug)]
pub struct LoadHandle {
    ticket: LoadTicket,
    control: flume::Sender<ControlMessage>,
}

impl LoadHandle {
    /// Identity of the load.
    #[must_use]
    pub fn ticket(&self) -> LoadTicket {
        self.ticket
    }

    /// Stops delivering to this consumer. The decode itself is cancelled
    /// once no consumer is left.
    pub fn cancel(&self) {
        let _ = self.control.send(ControlMessage::Cancel(self.ticket));
    }
}

struct ChannelCallback {
    tx: flume::Sender<Result<Loaded, EngineError>>,
    control: flume::Sender<ControlMessage>,
}

impl ResourceCallback for ChannelCallback {
    fn on_resource_ready(&self, resource: EngineResource, data_source: DataSource) {
        if let Err(flume::SendError(Ok(loaded))) = self.tx.send(Ok(Loaded { resource, data_source })) {
            let _ = self.control.send(ControlMessage::Release(loaded.resource));
        }
    }

    fn on_load_failed(&self, error: EngineError) {
        let _ = self.tx.send(Err(error));
    }
}

/// A running loader.
///
/// Dropping the loader shuts it down and waits for its threads.
pub struct Loader {
    handle: LoaderHandle,
    threads: Mutex<Option<Threads>>,
}

impl Loader {
    /// Returns a handle for submitting work.
    #[must_use]
    pub fn handle(&self) -> LoaderHandle {
        self.handle.clone()
    }

    /// Fails pending loads with [`EngineError::Shutdown`], stops every thread
    /// and waits for them.
    pub fn shutdown(self) {
        self.stop();
    }

    fn stop(&self) {
        let Some(threads) = self.threads.lock().take() else {
            return;
        };
        self.handle.shutdown();
        threads.join();
        info!("Loader stopped");
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoaderHandle>();
        assert_send_sync::<Loader>();
        assert_send_sync::<EngineResource>();
    }

    #[test]
    fn test_build_and_shutdown_without_disk_cache() {
        let config = Config::builder().disk_cache_enabled(false).build().unwrap();
        let loader = LoaderBuilder::new(config).build().unwrap();
        let snapshot = loader.handle().snapshot().unwrap();
        assert!(snapshot.active.is_empty());
        assert!(snapshot.jobs.is_empty());
        let handle = loader.handle();
        loader.shutdown();
        assert!(matches!(handle.snapshot(), Err(EngineError::Shutdown)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.executors.source_threads = 0;
        assert!(matches!(LoaderBuilder::new(config).build(), Err(EngineError::Config(_))));
    }
}
