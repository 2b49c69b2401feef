//! Fakes shared by the engine integration tests.

#![allow(dead_code)]

use anyhow::anyhow;
use bytes::Bytes;
use pictor_common::{Data, DataSource, Model, ModelKind, Options, Payload, Priority, Resource, SourceKey, TypeTag};
use pictor_engine::{Config, EngineError, EngineResource, LoadRequest, Loader, LoaderBuilder, ResourceCallback};
use pictor_registry::{DataCallback, DataFetcher, LoadData, ModelLoader, Registry, ResourceDecoder};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// A decoded value that counts how often it is recycled.
#[derive(Debug)]
pub struct Blob {
    pub name: String,
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

#[derive(Clone, Default)]
pub struct Counters {
    fetches: Arc<AtomicUsize>,
    decodes: Arc<AtomicUsize>,
    recycled: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

impl Counters {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }
}

/// How the fake source behaves.
#[derive(Clone)]
pub struct Behavior {
    pub fail_fetch: bool,
    /// The fetch succeeds without producing data.
    pub no_data: bool,
    pub fail_decode: bool,
    pub panic_decode: bool,
    pub size: usize,
    /// Each fetch waits for one message on this channel.
    pub gate: Option<flume::Receiver<()>>,
    /// Report from a separate thread after this delay instead of inline.
    pub report_after: Option<Duration>,
    pub data_source: DataSource,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fail_fetch: false,
            no_data: false,
            fail_decode: false,
            panic_decode: false,
            size: 10,
            gate: None,
            report_after: None,
            data_source: DataSource::Local,
        }
    }
}

struct FakeLoader {
    behavior: Behavior,
    counters: Counters,
}

impl ModelLoader for FakeLoader {
    fn build_load_data(&self, model: &Model, _: u32, _: u32, _: &Options) -> Option<LoadData> {
        let Model::Url(url) = model else {
            return None;
        };
        let fetcher = FakeFetcher {
            url: url.clone(),
            behavior: self.behavior.clone(),
            counters: self.counters.clone(),
        };
        Some(LoadData::new(SourceKey::new(url), Arc::new(fetcher)))
    }
}

struct FakeFetcher {
    url: String,
    behavior: Behavior,
    counters: Counters,
}

impl FakeFetcher {
    fn report(url: &str, behavior: &Behavior, callback: DataCallback) {
        if behavior.fail_fetch {
            callback.on_load_failed(anyhow!("connection reset fetching {url}"));
        } else if behavior.no_data {
            callback.on_data_ready(None);
        } else {
            callback.on_data_ready(Some(Data::Bytes(Bytes::from(url.to_string()))));
        }
    }
}

impl DataFetcher for FakeFetcher {
    fn load_data(&self, _priority: Priority, callback: DataCallback) {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.behavior.gate {
            let _ = gate.recv_timeout(TIMEOUT);
        }
        let Some(delay) = self.behavior.report_after else {
            Self::report(&self.url, &self.behavior, callback);
            return;
        };
        let url = self.url.clone();
        let behavior = self.behavior.clone();
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            Self::report(&url, &behavior, callback);
        });
    }

    fn cleanup(&self) {
        self.counters.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self) {
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn data_tag(&self) -> TypeTag {
        TypeTag::BYTES
    }

    fn data_source(&self) -> DataSource {
        self.behavior.data_source
    }
}

struct FakeDecoder {
    behavior: Behavior,
    counters: Counters,
}

impl ResourceDecoder for FakeDecoder {
    fn handles(&self, _data: &Data, _options: &Options) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn decode(&self, data: &Data, _: u32, _: u32, _: &Options) -> anyhow::Result<Option<Arc<Resource>>> {
        self.counters.decodes.fetch_add(1, Ordering::SeqCst);
        if self.behavior.panic_decode {
            panic!("decoder exploded");
        }
        if self.behavior.fail_decode {
            return Err(anyhow!("corrupt image"));
        }
        let name = String::from_utf8(data.read_bytes()?.to_vec())?;
        Ok(Some(Resource::new(Blob {
            name,
            size: self.behavior.size,
            recycled: Arc::clone(&self.counters.recycled),
        })))
    }
}

/// A registry that loads `Model::Url` through the fake source.
pub fn fake_registry(behavior: Behavior) -> (Registry, Counters) {
    let counters = Counters::default();
    let mut registry = Registry::new();
    registry
        .append_model_loader(
            ModelKind::Url,
            TypeTag::BYTES,
            FakeLoader { behavior: behavior.clone(), counters: counters.clone() },
        )
        .append_decoder(TypeTag::BYTES, TypeTag::BITMAP, FakeDecoder { behavior, counters: counters.clone() });
    (registry, counters)
}

pub fn config() -> Config {
    Config::builder().disk_cache_enabled(false).build().unwrap()
}

pub fn loader(registry: Registry, config: Config) -> Loader {
    LoaderBuilder::new(config).registry(registry).build().unwrap()
}

pub fn request(url: &str) -> LoadRequest {
    LoadRequest::new(Model::Url(url.to_string())).size(100, 100)
}

pub enum Outcome {
    Ready(EngineResource, DataSource),
    Failed(EngineError),
}

impl Outcome {
    pub fn ready(self) -> (EngineResource, DataSource) {
        match self {
            Self::Ready(resource, source) => (resource, source),
            Self::Failed(e) => panic!("expected a resource, load failed: {e:?}"),
        }
    }

    pub fn failed(self) -> EngineError {
        match self {
            Self::Ready(resource, _) => panic!("expected a failure, got {resource:?}"),
            Self::Failed(e) => e,
        }
    }
}

/// Callback forwarding every outcome to a channel.
pub struct Recorder {
    tx: flume::Sender<Outcome>,
}

impl ResourceCallback for Recorder {
    fn on_resource_ready(&self, resource: EngineResource, data_source: DataSource) {
        let _ = self.tx.send(Outcome::Ready(resource, data_source));
    }

    fn on_load_failed(&self, error: EngineError) {
        let _ = self.tx.send(Outcome::Failed(error));
    }
}

pub fn recorder() -> (Arc<Recorder>, flume::Receiver<Outcome>) {
    let (tx, rx) = flume::unbounded();
    (Arc::new(Recorder { tx }), rx)
}

/// Poll `condition` until it holds or the timeout passes.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
