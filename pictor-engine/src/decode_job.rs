//! The staged decode pipeline of one engine job.
//!
//! A decode job walks the disk-cache stages in order, asking each stage's
//! generator for data, decodes whatever arrives, transforms it, reports the
//! result to the control thread and finally writes the result to the
//! resource cache. Work runs on the executors. Fetchers report back from any
//! thread, and every outcome is handed to exactly one run of the job.

use crate::errors::EngineError;
use crate::executor::Executor;
use crate::generators::{
    Cx, DataCacheGenerator, DataFetcherGenerator, FetchOutcome, ResourceCacheGenerator, Retrieved,
    SourceGenerator, Step,
};
use crate::helper::DecodeHelper;
use crate::jobs::JobId;
use crate::messages::ControlMessage;
use crate::request::LoadRequest;
use anyhow::anyhow;
use bitflags::bitflags;
use parking_lot::Mutex;
use pictor_cache::{DataCacheKey, DiskCache, DiskCacheStrategy, DiskKey, ResourceCacheKey};
use pictor_common::{
    Data, DataSource, EncodeStrategy, LockedResource, Options, Priority, Resource, SourceKey, TypeTag,
};
use pictor_registry::{DataCallback, DataFetcher, FetchTarget, Registry, ResourceEncoder};
use std::any::Any;
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Where the decode job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Initialize,
    ResourceCache,
    DataCache,
    Source,
    Encode,
    Finished,
}

/// Stage following `current`, skipping stages the strategy disables.
pub(crate) fn next_stage(current: Stage, strategy: DiskCacheStrategy, only_retrieve_from_cache: bool) -> Stage {
    let mut stage = current;
    loop {
        stage = match stage {
            Stage::Initialize => Stage::ResourceCache,
            Stage::ResourceCache => Stage::DataCache,
            Stage::DataCache if only_retrieve_from_cache => return Stage::Finished,
            Stage::DataCache => return Stage::Source,
            Stage::Source | Stage::Encode | Stage::Finished => return Stage::Finished,
        };
        let enabled = match stage {
            Stage::ResourceCache => strategy.decode_cached_resource(),
            Stage::DataCache => strategy.decode_cached_data(),
            _ => true,
        };
        if enabled {
            return stage;
        }
    }
}

/// Why the job was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunReason {
    Initialize,
    SwitchToSource,
    DecodeData,
}

/// Everything the engine shares with its decode jobs.
pub(crate) struct DecodeContext {
    pub registry: Arc<Registry>,
    pub disk_cache: Arc<dyn DiskCache>,
    pub control: flume::Sender<ControlMessage>,
    pub pool: DecodeStatePool,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ReleaseFlags: u8 {
        const RELEASED = 1;
        const ENCODE_COMPLETE = 1 << 1;
        const FAILED = 1 << 2;
    }
}

/// Decides when a job's state may return to the pool: once the engine has
/// released the job and the job has either failed or finished encoding.
struct ReleaseManager {
    flags: ReleaseFlags,
    done: bool,
}

impl ReleaseManager {
    fn new() -> Self {
        Self { flags: ReleaseFlags::empty(), done: false }
    }

    fn release(&mut self, removed_from_queue: bool) -> bool {
        self.flags |= ReleaseFlags::RELEASED;
        self.is_complete(removed_from_queue)
    }

    fn on_encode_complete(&mut self) -> bool {
        self.flags |= ReleaseFlags::ENCODE_COMPLETE;
        self.is_complete(false)
    }

    fn on_failed(&mut self) -> bool {
        self.flags |= ReleaseFlags::FAILED;
        self.is_complete(false)
    }

    fn is_complete(&mut self, removed_from_queue: bool) -> bool {
        let finished = self.flags.intersects(ReleaseFlags::FAILED | ReleaseFlags::ENCODE_COMPLETE)
            || removed_from_queue;
        if finished && self.flags.contains(ReleaseFlags::RELEASED) && !self.done {
            self.done = true;
            return true;
        }
        false
    }
}

/// A transformed resource waiting to be written to the disk cache.
struct DeferredEncode {
    key: Box<dyn DiskKey>,
    encoder: Arc<dyn ResourceEncoder>,
    locked: LockedResource,
}

impl DeferredEncode {
    fn encode(self, disk_cache: &dyn DiskCache, options: &Options) {
        let Self { key, encoder, locked } = self;
        let mut writer = |file: &mut File| {
            let written = encoder.encode(locked.resource(), file, options);
            if !written {
                warn!("Failed to encode resource for {key:?}");
            }
            written
        };
        disk_cache.put(key.as_ref(), &mut writer);
        trace!("Finished resource encode for {key:?}");
    }
}

/// Mutable state of a running job. Pooled between jobs.
#[derive(Default)]
pub(crate) struct DecodeState {
    helper: Option<Arc<DecodeHelper>>,
    stage: Option<Stage>,
    generator: Option<Box<dyn DataFetcherGenerator>>,
    throwables: Vec<anyhow::Error>,
    deferred: Option<DeferredEncode>,
    notified: bool,
}

impl DecodeState {
    fn reset(&mut self) {
        self.helper = None;
        self.stage = None;
        self.generator = None;
        self.throwables.clear();
        self.deferred = None;
        self.notified = false;
    }
}

/// Pool of [`DecodeState`] values, bounded in size.
pub(crate) struct DecodeStatePool {
    free: Mutex<Vec<DecodeState>>,
    max: usize,
}

impl DecodeStatePool {
    pub fn new(max: usize) -> Self {
        Self { free: Mutex::new(Vec::new()), max }
    }

    fn obtain(&self, helper: Arc<DecodeHelper>) -> DecodeState {
        let mut state = self.free.lock().pop().unwrap_or_default();
        state.helper = Some(helper);
        state
    }

    fn recycle(&self, mut state: DecodeState) {
        state.reset();
        let mut free = self.free.lock();
        if free.len() < self.max {
            free.push(state);
        }
    }

    /// States waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

/// Hand-off point between fetcher callbacks and runs of the job.
#[derive(Default)]
struct Handoff {
    in_run: bool,
    outcome: Option<FetchOutcome>,
}

/// How a run ended.
enum RunEnd {
    /// Waiting for a fetch or for a rescheduled run.
    Suspended,
    /// The failure was reported.
    Failed,
    /// The result was reported and encoded.
    EncodeComplete,
}

/// What the drive loop does next.
enum Action {
    Generate,
    Outcome(FetchOutcome),
    Decode(Retrieved),
}

pub(crate) struct DecodeJob {
    id: JobId,
    ctx: Arc<DecodeContext>,
    priority: Priority,
    first_stage: Stage,
    source_executor: Executor,
    state: Mutex<Option<DecodeState>>,
    cancelled: AtomicBool,
    active_fetcher: Mutex<Option<Arc<dyn DataFetcher>>>,
    handoff: Mutex<Handoff>,
    release: Mutex<ReleaseManager>,
}

impl DecodeJob {
    pub fn new(id: JobId, ctx: Arc<DecodeContext>, request: LoadRequest, source_executor: Executor) -> Arc<Self> {
        let priority = request.priority;
        let first_stage =
            next_stage(Stage::Initialize, request.disk_cache_strategy, request.only_retrieve_from_cache);
        let helper = Arc::new(DecodeHelper::new(
            Arc::clone(&ctx.registry),
            Arc::clone(&ctx.disk_cache),
            request,
        ));
        let state = ctx.pool.obtain(helper);
        Arc::new(Self {
            id,
            ctx,
            priority,
            first_stage,
            source_executor,
            state: Mutex::new(Some(state)),
            cancelled: AtomicBool::new(false),
            active_fetcher: Mutex::new(None),
            handoff: Mutex::new(Handoff::default()),
            release: Mutex::new(ReleaseManager::new()),
        })
    }

    /// True if the first stage reads from the disk cache.
    pub fn will_decode_from_cache(&self) -> bool {
        matches!(self.first_stage, Stage::ResourceCache | Stage::DataCache)
    }

    /// Schedule the first run on `executor`.
    pub fn start(self: &Arc<Self>, executor: &Executor) {
        self.schedule(executor, RunReason::Initialize);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let fetcher = self.active_fetcher.lock().clone();
        if let Some(fetcher) = fetcher {
            fetcher.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Called by the engine once it no longer needs the job.
    pub fn release(&self, removed_from_queue: bool) {
        if self.release.lock().release(removed_from_queue) {
            self.release_internal();
        }
    }

    fn release_internal(&self) {
        trace!("Releasing {}", self.id);
        self.discard_outcome();
        let state = self.state.lock().take();
        if let Some(state) = state {
            self.ctx.pool.recycle(state);
        }
    }

    fn schedule(self: &Arc<Self>, executor: &Executor, reason: RunReason) -> bool {
        let job = Arc::clone(self);
        let scheduled = executor.execute(self.priority, Box::new(move || job.run(reason)));
        if !scheduled {
            debug!("{} not scheduled, {} is shut down", self.id, executor.name());
        }
        scheduled
    }

    fn reschedule(self: &Arc<Self>, reason: RunReason) -> bool {
        self.schedule(&self.source_executor, reason)
    }

    /// Start `fetcher`, routing its outcome back to this job.
    pub(crate) fn start_fetch(self: &Arc<Self>, fetcher: &Arc<dyn DataFetcher>) {
        *self.active_fetcher.lock() = Some(Arc::clone(fetcher));
        let relay = Arc::new(FetchRelay { job: Arc::downgrade(self), fetcher: Arc::clone(fetcher) });
        fetcher.load_data(self.priority, DataCallback::new(relay));
    }

    fn on_fetch_outcome(self: &Arc<Self>, outcome: FetchOutcome) {
        {
            let mut handoff = self.handoff.lock();
            handoff.outcome = Some(outcome);
            if handoff.in_run {
                return;
            }
        }
        if !self.reschedule(RunReason::DecodeData) {
            self.discard_outcome();
        }
    }

    /// Drop a reported outcome that no run will consume and clean up the
    /// fetcher that produced it. A fetch still in flight is left alone; its
    /// outcome is discarded once it arrives.
    fn discard_outcome(&self) {
        let outcome = self.handoff.lock().outcome.take();
        if outcome.is_none() {
            return;
        }
        let fetcher = self.active_fetcher.lock().take();
        if let Some(fetcher) = fetcher {
            trace!("{} discarding an unconsumed fetch outcome", self.id);
            fetcher.cleanup();
        }
    }

    /// Take a pending outcome, or mark the run as finished if there is none
    /// so that the next outcome schedules a new run.
    fn take_outcome_or_idle(&self) -> Option<FetchOutcome> {
        let mut handoff = self.handoff.lock();
        let outcome = handoff.outcome.take();
        if outcome.is_none() {
            handoff.in_run = false;
        }
        outcome
    }

    fn run(self: &Arc<Self>, reason: RunReason) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run_wrapped(reason)));
        if let Err(panic) = result {
            let message = panic_message(panic.as_ref());
            error!("{} panicked: {message}", self.id);
            let release_now = {
                let mut guard = self.state.lock();
                match guard.as_mut() {
                    Some(state) if !state.notified => {
                        state.throwables.push(anyhow!("Decode job panicked: {message}"));
                        self.notify_failed(state);
                        self.release.lock().on_failed()
                    }
                    _ => false,
                }
            };
            self.handoff.lock().in_run = false;
            if release_now {
                self.release_internal();
            }
        }
    }

    fn run_wrapped(self: &Arc<Self>, reason: RunReason) {
        let release_now = {
            let mut guard = self.state.lock();
            let Some(state) = guard.as_mut() else {
                trace!("{} already released, ignoring {reason:?}", self.id);
                self.discard_outcome();
                return;
            };
            self.handoff.lock().in_run = true;
            let end = self.run_locked(state, reason);
            self.handoff.lock().in_run = false;
            match end {
                RunEnd::Suspended => false,
                RunEnd::Failed => {
                    self.discard_outcome();
                    self.release.lock().on_failed()
                }
                RunEnd::EncodeComplete => {
                    self.discard_outcome();
                    self.release.lock().on_encode_complete()
                }
            }
        };
        if release_now {
            self.release_internal();
        }
    }

    fn run_locked(self: &Arc<Self>, state: &mut DecodeState, reason: RunReason) -> RunEnd {
        if state.notified {
            trace!("{} already notified, ignoring {reason:?}", self.id);
            self.discard_outcome();
            return RunEnd::Suspended;
        }
        if self.is_cancelled() {
            return self.notify_failed(state);
        }
        let action = match reason {
            RunReason::Initialize => {
                let Some(helper) = state.helper.clone() else {
                    return self.notify_failed(state);
                };
                state.stage = Some(self.first_stage);
                state.generator = new_generator(self.first_stage, &helper);
                if self.first_stage == Stage::Source {
                    self.reschedule(RunReason::SwitchToSource);
                    return RunEnd::Suspended;
                }
                Action::Generate
            }
            RunReason::SwitchToSource => Action::Generate,
            RunReason::DecodeData => match self.handoff.lock().outcome.take() {
                Some(outcome) => Action::Outcome(outcome),
                None => return RunEnd::Suspended,
            },
        };
        self.drive(state, action)
    }

    fn drive(self: &Arc<Self>, state: &mut DecodeState, mut action: Action) -> RunEnd {
        loop {
            action = match action {
                Action::Generate => match self.generate(state) {
                    Ok(next) => next,
                    Err(end) => return end,
                },
                Action::Outcome(outcome) => {
                    *self.active_fetcher.lock() = None;
                    let Some(generator) = state.generator.as_mut() else {
                        return self.notify_failed(state);
                    };
                    let mut cx = Cx { job: self, throwables: &mut state.throwables };
                    match generator.on_outcome(outcome, &mut cx) {
                        Step::Ready(retrieved) => Action::Decode(retrieved),
                        Step::Reschedule => {
                            self.reschedule(RunReason::SwitchToSource);
                            return RunEnd::Suspended;
                        }
                        Step::Started => match self.take_outcome_or_idle() {
                            Some(outcome) => Action::Outcome(outcome),
                            None => return RunEnd::Suspended,
                        },
                        Step::Failed | Step::Exhausted => Action::Generate,
                    }
                }
                Action::Decode(retrieved) => match self.decode_retrieved(state, retrieved) {
                    Some(end) => return end,
                    None => Action::Generate,
                },
            };
        }
    }

    /// Ask generators for data, moving through the stages until a fetch
    /// starts, data is ready or no stage is left.
    fn generate(self: &Arc<Self>, state: &mut DecodeState) -> Result<Action, RunEnd> {
        let Some(helper) = state.helper.clone() else {
            return Err(self.notify_failed(state));
        };
        loop {
            if self.is_cancelled() {
                return Err(self.notify_failed(state));
            }
            let Some(generator) = state.generator.as_mut() else {
                return Err(self.notify_failed(state));
            };
            let mut cx = Cx { job: self, throwables: &mut state.throwables };
            match generator.start_next(&mut cx) {
                Step::Started => {
                    return match self.take_outcome_or_idle() {
                        Some(outcome) => Ok(Action::Outcome(outcome)),
                        None => Err(RunEnd::Suspended),
                    };
                }
                Step::Ready(retrieved) => return Ok(Action::Decode(retrieved)),
                Step::Reschedule => {
                    self.reschedule(RunReason::SwitchToSource);
                    return Err(RunEnd::Suspended);
                }
                Step::Failed => {}
                Step::Exhausted => {
                    let current = state.stage.unwrap_or(Stage::Initialize);
                    let request = helper.request();
                    let stage =
                        next_stage(current, request.disk_cache_strategy, request.only_retrieve_from_cache);
                    trace!("{} moving from {current:?} to {stage:?}", self.id);
                    state.stage = Some(stage);
                    state.generator = new_generator(stage, &helper);
                    if stage == Stage::Source {
                        self.reschedule(RunReason::SwitchToSource);
                        return Err(RunEnd::Suspended);
                    }
                }
            }
        }
    }

    /// Decode retrieved data. `None` means decoding produced nothing and the
    /// generators should be asked again.
    fn decode_retrieved(self: &Arc<Self>, state: &mut DecodeState, retrieved: Retrieved) -> Option<RunEnd> {
        let Retrieved { source_key, data, fetcher, data_source, attempted_key } = retrieved;
        let Some(helper) = state.helper.clone() else {
            fetcher.cleanup();
            return Some(self.notify_failed(state));
        };
        let Some(data) = data else {
            debug!("{} got no data for {attempted_key} from {data_source}", self.id);
            fetcher.cleanup();
            return None;
        };
        trace!("{} decoding {attempted_key} from {data_source}", self.id);
        let is_from_alternate = helper.cache_keys().first() != Some(&source_key);
        let decoded = self.decode_data(state, &helper, &data, &source_key, data_source);
        fetcher.cleanup();
        match decoded {
            Some(resource) => Some(self.notify_encode_and_release(
                state,
                &helper,
                resource,
                data_source,
                is_from_alternate,
            )),
            None => {
                state.deferred = None;
                None
            }
        }
    }

    fn decode_data(
        &self,
        state: &mut DecodeState,
        helper: &DecodeHelper,
        data: &Data,
        source_key: &SourceKey,
        data_source: DataSource,
    ) -> Option<Arc<Resource>> {
        let Some(load_path) = helper.load_path(data.tag()) else {
            state.throwables.push(
                EngineError::NoLoadPath(format!("No load path for {} data", data.tag())).into(),
            );
            return None;
        };
        let request = helper.request();
        let deferred = &mut state.deferred;
        let mut on_decoded =
            |decoded: Arc<Resource>| on_resource_decoded(helper, data_source, source_key, decoded, &mut *deferred);
        match load_path.load(data, request.width, request.height, &request.options, &mut on_decoded) {
            Ok(resource) => Some(resource),
            Err(e) => {
                state.throwables.push(e.into());
                None
            }
        }
    }

    fn notify_encode_and_release(
        &self,
        state: &mut DecodeState,
        helper: &DecodeHelper,
        resource: Arc<Resource>,
        data_source: DataSource,
        is_from_alternate: bool,
    ) -> RunEnd {
        mark_notified(state);
        debug!("{} decoded {} from {data_source}", self.id, resource.tag());
        let _ = self.ctx.control.send(ControlMessage::JobReady {
            job: self.id,
            resource,
            data_source,
            is_from_alternate,
        });
        state.stage = Some(Stage::Encode);
        if let Some(deferred) = state.deferred.take() {
            deferred.encode(helper.disk_cache(), &helper.request().options);
        }
        RunEnd::EncodeComplete
    }

    fn notify_failed(&self, state: &mut DecodeState) -> RunEnd {
        mark_notified(state);
        let mut causes: Vec<EngineError> =
            state.throwables.drain(..).map(|e| EngineError::from_cause(&e)).collect();
        if self.is_cancelled() {
            causes.push(EngineError::Cancelled);
        }
        state.stage = Some(Stage::Finished);
        state.generator = None;
        state.deferred = None;
        self.discard_outcome();
        let error = EngineError::LoadFailed { message: "Failed to load resource".to_string(), causes };
        let _ = self.ctx.control.send(ControlMessage::JobFailed { job: self.id, error });
        RunEnd::Failed
    }
}

fn mark_notified(state: &mut DecodeState) {
    assert!(!state.notified, "Already notified");
    state.notified = true;
}

fn new_generator(stage: Stage, helper: &Arc<DecodeHelper>) -> Option<Box<dyn DataFetcherGenerator>> {
    let helper = Arc::clone(helper);
    match stage {
        Stage::ResourceCache => Some(Box::new(ResourceCacheGenerator::new(helper))),
        Stage::DataCache => Some(Box::new(DataCacheGenerator::new(helper))),
        Stage::Source => Some(Box::new(SourceGenerator::new(helper))),
        Stage::Initialize | Stage::Encode | Stage::Finished => None,
    }
}

/// Transform a freshly decoded resource and decide whether, and under which
/// key, the result is written to the disk cache. On error only resources
/// created here are recycled; the caller owns `decoded`.
fn on_resource_decoded(
    helper: &DecodeHelper,
    data_source: DataSource,
    source_key: &SourceKey,
    decoded: Arc<Resource>,
    deferred: &mut Option<DeferredEncode>,
) -> anyhow::Result<Arc<Resource>> {
    let request = helper.request();
    let resource_tag = decoded.tag();
    let (transformed, transformation_id) = if data_source == DataSource::ResourceDiskCache {
        (Arc::clone(&decoded), String::new())
    } else {
        let transformation = helper.transformation(resource_tag)?;
        let transformed = transformation
            .transform(Arc::clone(&decoded), request.width, request.height)
            .map_err(|e| EngineError::Transformation(format!("{}: {e:#}", transformation.id())))?;
        (transformed, transformation.id().to_string())
    };
    let replaced = !Arc::ptr_eq(&decoded, &transformed);
    match plan_encode(helper, data_source, source_key, resource_tag, &transformed, transformation_id) {
        Ok(plan) => {
            if replaced {
                decoded.recycle();
            }
            *deferred = plan;
            Ok(transformed)
        }
        Err(e) => {
            if replaced {
                transformed.recycle();
            }
            Err(e)
        }
    }
}

/// The disk cache write for `transformed`, if the strategy wants one.
fn plan_encode(
    helper: &DecodeHelper,
    data_source: DataSource,
    source_key: &SourceKey,
    resource_tag: TypeTag,
    transformed: &Arc<Resource>,
    transformation_id: String,
) -> anyhow::Result<Option<DeferredEncode>> {
    let request = helper.request();
    let encoder = helper.resource_encoder(transformed.tag());
    let encode_strategy = encoder
        .as_ref()
        .map_or(EncodeStrategy::None, |encoder| encoder.encode_strategy(&request.options));
    let is_from_alternate = !helper.is_source_key(source_key);
    if !helper.strategy().is_resource_cacheable(is_from_alternate, data_source, encode_strategy) {
        return Ok(None);
    }
    let Some(encoder) = encoder else {
        return Err(EngineError::NoResultEncoder(transformed.tag().to_string()).into());
    };
    let key: Box<dyn DiskKey> = match encode_strategy {
        EncodeStrategy::Source => {
            Box::new(DataCacheKey::new(source_key.clone(), request.signature.clone()))
        }
        EncodeStrategy::Transformed => Box::new(ResourceCacheKey {
            source_key: source_key.clone(),
            signature: request.signature.clone(),
            width: request.width,
            height: request.height,
            transformation: transformation_id,
            resource_tag,
            options: request.options.clone(),
        }),
        EncodeStrategy::None => return Ok(None),
    };
    Ok(Some(DeferredEncode { key, encoder, locked: transformed.lock() }))
}

/// Routes a fetcher's callback to the job without keeping it alive. If the
/// job is gone by the time the fetcher reports, the fetcher is cleaned up here.
struct FetchRelay {
    job: Weak<DecodeJob>,
    fetcher: Arc<dyn DataFetcher>,
}

impl FetchRelay {
    fn deliver(&self, outcome: FetchOutcome) {
        match self.job.upgrade() {
            Some(job) => job.on_fetch_outcome(outcome),
            None => self.fetcher.cleanup(),
        }
    }
}

impl FetchTarget for FetchRelay {
    fn on_data_ready(&self, data: Option<Data>) {
        self.deliver(FetchOutcome::Ready(data));
    }

    fn on_load_failed(&self, error: anyhow::Error) {
        self.deliver(FetchOutcome::Failed(error));
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
