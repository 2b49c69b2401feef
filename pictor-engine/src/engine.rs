//! Cache-tier coordination and job bookkeeping.
//!
//! The [`Engine`] lives on the control thread. A load is satisfied by the
//! first tier that has it: active resources, then the memory cache, then an
//! already running job for the same key, and only then a new job.

use crate::active::ActiveResources;
use crate::config::Config;
use crate::decode_job::{DecodeContext, DecodeJob, DecodeStatePool};
use crate::engine_job::EngineJob;
use crate::errors::EngineError;
use crate::executor::Executors;
use crate::jobs::{JobArena, JobId, Jobs};
use crate::messages::{ControlMessage, LoadTicket, ResourceCallback};
use crate::request::{EngineKeyFactory, LoadRequest, RequestKey};
use crate::resource::{Collected, EngineResource, ResourceFactory};
use pictor_cache::{CacheStats, DiskCache, MemoryCache, TrimLevel};
use pictor_common::{DataSource, Priority, Resource};
use pictor_registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Point-in-time view of the engine's tiers, for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    /// Keys of resources currently handed out to consumers.
    pub active: Vec<RequestKey>,
    /// Keys held by the memory cache, least recently used first.
    pub memory: Vec<RequestKey>,
    /// Keys of jobs that are still running.
    pub jobs: Vec<RequestKey>,
    /// Memory cache statistics.
    pub memory_stats: CacheStats,
    /// Decode states waiting in the pool for reuse.
    pub pooled_decode_states: usize,
}

pub(crate) struct Engine {
    key_factory: EngineKeyFactory,
    jobs: Jobs,
    arena: JobArena<EngineJob>,
    tickets: HashMap<LoadTicket, JobId>,
    active: ActiveResources,
    memory: MemoryCache<RequestKey, EngineResource>,
    executors: Executors,
    factory: ResourceFactory,
    decode: Arc<DecodeContext>,
}

impl Engine {
    pub fn new(
        config: &Config,
        registry: Arc<Registry>,
        disk_cache: Arc<dyn DiskCache>,
        control: flume::Sender<ControlMessage>,
        factory: ResourceFactory,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let executors = Executors::new(&config.executors)?;
        let decode = Arc::new(DecodeContext {
            registry,
            disk_cache,
            control,
            pool: DecodeStatePool::new(config.decode_job_pool_size),
        });
        Ok(Self {
            key_factory: EngineKeyFactory,
            jobs: Jobs::default(),
            arena: JobArena::new(),
            tickets: HashMap::new(),
            active: ActiveResources::new(config.active_resources.retention_allowed),
            memory: MemoryCache::new(config.memory_cache.max_size_bytes),
            executors,
            factory,
            decode,
        })
    }

    /// Resources built from now on belong to the current thread.
    pub fn bind_to_current_thread(&mut self) {
        self.factory.bind_to_current_thread();
    }

    /// Handle one control message. Returns false once the engine has shut down.
    pub fn handle(&mut self, message: ControlMessage) -> bool {
        trace!("Handling {message:?}");
        match message {
            ControlMessage::Load { ticket, request, callback } => self.load(ticket, request, callback),
            ControlMessage::Cancel(ticket) => self.cancel(ticket),
            ControlMessage::Release(resource) => self.release(resource),
            ControlMessage::JobReady { job, resource, data_source, is_from_alternate } => {
                self.on_job_ready(job, resource, data_source, is_from_alternate);
            }
            ControlMessage::JobFailed { job, error } => self.on_job_failed(job, &error),
            ControlMessage::ResourceCollected(collected) => self.on_resource_collected(&collected),
            ControlMessage::SweepActive => self.sweep_active(),
            ControlMessage::ClearMemory => self.clear_memory(),
            ControlMessage::TrimMemory(level) => self.trim_memory(level),
            ControlMessage::SetMemorySizeMultiplier(multiplier) => {
                self.set_memory_size_multiplier(multiplier);
            }
            ControlMessage::ClearDiskCache => self.clear_disk_cache(),
            ControlMessage::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ControlMessage::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn load(&mut self, ticket: LoadTicket, request: LoadRequest, callback: Arc<dyn ResourceCallback>) {
        let key = self.key_factory.build_key(&request);

        if request.memory_cacheable {
            if let Some(resource) = self.load_from_active(&key) {
                debug!("Loaded resource from active resources: {key}");
                callback.on_resource_ready(resource, DataSource::MemoryCache);
                return;
            }
            if let Some(resource) = self.load_from_cache(&key) {
                debug!("Loaded resource from cache: {key}");
                callback.on_resource_ready(resource, DataSource::MemoryCache);
                return;
            }
        }

        let only_cache = request.only_retrieve_from_cache;
        if let Some(job_id) = self.jobs.get(&key, only_cache) {
            if let Some(job) = self.arena.get_mut(job_id) {
                job.add_callback(ticket, callback);
                self.tickets.insert(ticket, job_id);
                debug!("Added to existing load: {key}");
                return;
            }
        }

        let decode = Arc::clone(&self.decode);
        let source_executor = self
            .executors
            .active_source(request.use_unlimited_source_pool, request.use_animation_pool)
            .clone();
        let job_source_executor = source_executor.clone();
        let memory_cacheable = request.memory_cacheable;
        let job_key = key.clone();
        let job_id = self.arena.insert_with(|id| {
            let decode_job = DecodeJob::new(id, decode, request, job_source_executor);
            EngineJob::new(job_key, memory_cacheable, only_cache, decode_job)
        });
        self.jobs.put(key.clone(), job_id, only_cache);
        self.tickets.insert(ticket, job_id);
        if let Some(job) = self.arena.get_mut(job_id) {
            job.add_callback(ticket, callback);
            let executor = if job.decode_job.will_decode_from_cache() {
                &self.executors.disk_cache
            } else {
                &source_executor
            };
            job.decode_job.start(executor);
        }
        debug!("Started new load: {key} as {job_id}");
    }

    fn load_from_active(&mut self, key: &RequestKey) -> Option<EngineResource> {
        let resource = self.active.get(key).map(|active| active.acquire());
        self.process_reclaimed();
        resource
    }

    fn load_from_cache(&mut self, key: &RequestKey) -> Option<EngineResource> {
        let cached = self.memory.remove(key)?;
        let resource = cached.acquire();
        self.active.activate(key.clone(), &resource);
        Some(resource)
    }

    fn cancel(&mut self, ticket: LoadTicket) {
        let Some(job_id) = self.tickets.remove(&ticket) else {
            trace!("Nothing to cancel for {ticket}");
            return;
        };
        let Some(job) = self.arena.get_mut(job_id) else {
            return;
        };
        if job.remove_callback(ticket) {
            debug!("Cancelling {job_id} for {}", job.key);
            job.cancel();
            let (key, only_cache) = (job.key.clone(), job.only_retrieve_from_cache);
            self.jobs.remove_if_current(&key, job_id, only_cache);
        }
    }

    fn release(&mut self, resource: EngineResource) {
        if let Some(released) = resource.release() {
            self.on_resource_released(released);
        }
    }

    /// The last consumer let go of `resource`.
    fn on_resource_released(&mut self, resource: EngineResource) {
        let key = resource.key().clone();
        self.active.deactivate(&key);
        if resource.is_cacheable() {
            trace!("Moving {key} to the memory cache");
            let evicted = self.memory.put(key, resource);
            recycle_all(evicted);
        } else {
            resource.recycle();
        }
    }

    fn on_job_ready(
        &mut self,
        job_id: JobId,
        resource: Arc<Resource>,
        data_source: DataSource,
        is_from_alternate: bool,
    ) {
        let Some(job) = self.arena.get(job_id) else {
            debug!("Result for finished {job_id}, recycling it");
            resource.recycle();
            return;
        };
        if job.is_cancelled() {
            debug!("Result for cancelled {job_id}, recycling it");
            resource.recycle();
            self.finish_job(job_id);
            return;
        }

        let (key, only_cache) = (job.key.clone(), job.only_retrieve_from_cache);
        let handle = self.factory.build(key.clone(), resource, job.memory_cacheable, true);
        let hold = handle.acquire();
        if handle.is_cacheable() {
            self.active.activate(key.clone(), &handle);
        }
        self.jobs.remove_if_current(&key, job_id, only_cache);

        let callbacks = match self.arena.get_mut(job_id) {
            Some(job) => job.take_callbacks(),
            None => Vec::new(),
        };
        debug!(
            "{job_id} finished {key} from {data_source}{}, notifying {} callbacks",
            if is_from_alternate { " (alternate key)" } else { "" },
            callbacks.len()
        );
        for (ticket, callback) in callbacks {
            self.tickets.remove(&ticket);
            callback.on_resource_ready(handle.acquire(), data_source);
        }
        drop(handle);
        if let Some(released) = hold.release() {
            self.on_resource_released(released);
        }
        self.finish_job(job_id);
        self.process_reclaimed();
    }

    fn on_job_failed(&mut self, job_id: JobId, error: &EngineError) {
        let Some(job) = self.arena.get_mut(job_id) else {
            return;
        };
        if !job.is_cancelled() {
            let (key, only_cache) = (job.key.clone(), job.only_retrieve_from_cache);
            let callbacks = job.take_callbacks();
            self.jobs.remove_if_current(&key, job_id, only_cache);
            warn!("Load failed for {key}: {error}");
            error.log_root_causes(&format!("Load failed for {key}"));
            for (ticket, callback) in callbacks {
                self.tickets.remove(&ticket);
                callback.on_load_failed(error.clone());
            }
        }
        self.finish_job(job_id);
    }

    fn finish_job(&mut self, job_id: JobId) {
        if let Some(job) = self.arena.remove(job_id) {
            job.decode_job.release(false);
        }
    }

    fn on_resource_collected(&mut self, collected: &Collected) {
        self.active.cleanup(&collected.key, collected.id);
        self.process_reclaimed();
    }

    fn sweep_active(&mut self) {
        let removed = self.active.sweep();
        if removed > 0 {
            trace!("Swept {removed} collected active resources");
        }
        self.process_reclaimed();
    }

    /// Payloads kept alive for forgotten releases go to the memory cache.
    fn process_reclaimed(&mut self) {
        for reclaimed in self.active.take_reclaimed() {
            debug!("Reclaiming forgotten resource for {}", reclaimed.key);
            let resource = self.factory.build(reclaimed.key, reclaimed.resource, true, false);
            self.on_resource_released(resource);
        }
    }

    fn clear_memory(&mut self) {
        recycle_all(self.memory.clear_memory());
    }

    fn trim_memory(&mut self, level: TrimLevel) {
        recycle_all(self.memory.trim_memory(level));
    }

    fn set_memory_size_multiplier(&mut self, multiplier: f32) {
        recycle_all(self.memory.set_size_multiplier(multiplier));
    }

    fn clear_disk_cache(&self) {
        let disk_cache = Arc::clone(&self.decode.disk_cache);
        let accepted = self.executors.disk_cache.execute(
            Priority::Normal,
            Box::new(move || {
                disk_cache.clear();
                debug!("Cleared disk cache");
            }),
        );
        if !accepted {
            warn!("Disk cache executor is shut down, not clearing the disk cache");
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            active: self.active.keys(),
            memory: self.memory.keys(),
            jobs: self.jobs.keys(),
            memory_stats: self.memory.stats(),
            pooled_decode_states: self.decode.pool.idle(),
        }
    }

    /// Cancel every job, fail its consumers and stop the workers and monitor.
    pub fn shutdown(&mut self) {
        debug!("Shutting down with {} jobs", self.arena.len());
        for job_id in self.arena.ids() {
            let Some(mut job) = self.arena.remove(job_id) else {
                continue;
            };
            if !job.is_cancelled() {
                let callbacks = job.take_callbacks();
                job.cancel();
                for (_, callback) in callbacks {
                    callback.on_load_failed(EngineError::Shutdown);
                }
            }
            job.decode_job.release(true);
        }
        self.tickets.clear();
        self.jobs = Jobs::default();
        self.executors.shutdown();
        self.factory.stop_monitor();
    }
}

fn recycle_all(evicted: Vec<(RequestKey, EngineResource)>) {
    for (key, resource) in evicted {
        trace!("Recycling evicted {key}");
        resource.recycle();
    }
}
