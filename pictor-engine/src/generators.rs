//! Data fetcher generators, one per disk-cache stage.
//!
//! A generator walks the candidate fetchers of its stage, starting at most one
//! fetch at a time. The decode job feeds each fetch outcome back into the
//! generator that started it and asks for the next candidate when the outcome
//! cannot be decoded.

use crate::decode_job::DecodeJob;
use crate::errors::EngineError;
use crate::helper::DecodeHelper;
use pictor_cache::{DataCacheKey, ResourceCacheKey};
use pictor_common::{Data, DataSource, Model, SourceKey};
use pictor_registry::{DataFetcher, ModelLoader};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result reported through a fetcher's callback.
pub(crate) enum FetchOutcome {
    Ready(Option<Data>),
    Failed(anyhow::Error),
}

/// Data that is ready to decode together with where it came from.
pub(crate) struct Retrieved {
    pub source_key: SourceKey,
    pub data: Option<Data>,
    pub fetcher: Arc<dyn DataFetcher>,
    pub data_source: DataSource,
    pub attempted_key: String,
}

/// What a generator did with the latest call.
pub(crate) enum Step {
    /// A fetch is in flight; its outcome arrives later.
    Started,
    /// No candidates are left in this stage.
    Exhausted,
    /// Data can be decoded right away.
    Ready(Retrieved),
    /// The fetch failed; ask for the next candidate.
    Failed,
    /// Continue on the source executor.
    Reschedule,
}

/// State shared with generators while the decode job drives them.
pub(crate) struct Cx<'a> {
    pub job: &'a Arc<DecodeJob>,
    pub throwables: &'a mut Vec<anyhow::Error>,
}

impl Cx<'_> {
    fn record(&mut self, error: EngineError) {
        self.throwables.push(error.into());
    }
}

pub(crate) trait DataFetcherGenerator: Send {
    /// Start the next candidate fetch.
    fn start_next(&mut self, cx: &mut Cx<'_>) -> Step;

    /// Handle the outcome of the fetch this generator started.
    fn on_outcome(&mut self, outcome: FetchOutcome, cx: &mut Cx<'_>) -> Step;
}

/// Candidate fetchers for one disk cache file.
struct CacheFileLoaders {
    model: Model,
    loaders: Vec<Arc<dyn ModelLoader>>,
    next: usize,
}

impl CacheFileLoaders {
    fn new(helper: &DecodeHelper, file: &Path) -> Self {
        let (model, loaders) = helper.cache_file_loaders(file);
        Self { model, loaders, next: 0 }
    }

    /// Start the first remaining loader with a usable load path.
    fn start(&mut self, helper: &DecodeHelper, cx: &mut Cx<'_>) -> Option<Arc<dyn DataFetcher>> {
        let request = helper.request();
        while self.next < self.loaders.len() {
            let loader = &self.loaders[self.next];
            self.next += 1;
            let Some(load_data) =
                loader.build_load_data(&self.model, request.width, request.height, &request.options)
            else {
                continue;
            };
            if helper.has_load_path(load_data.fetcher.data_tag()) {
                cx.job.start_fetch(&load_data.fetcher);
                return Some(load_data.fetcher);
            }
        }
        None
    }
}

/// Looks for transformed resources in the disk cache.
pub(crate) struct ResourceCacheGenerator {
    helper: Arc<DecodeHelper>,
    position: usize,
    loaders: Option<CacheFileLoaders>,
    source_key: Option<SourceKey>,
    cache_key: Option<ResourceCacheKey>,
    current: Option<Arc<dyn DataFetcher>>,
}

impl ResourceCacheGenerator {
    pub fn new(helper: Arc<DecodeHelper>) -> Self {
        Self { helper, position: 0, loaders: None, source_key: None, cache_key: None, current: None }
    }
}

impl DataFetcherGenerator for ResourceCacheGenerator {
    fn start_next(&mut self, cx: &mut Cx<'_>) -> Step {
        let helper = Arc::clone(&self.helper);
        let source_keys = helper.cache_keys();
        if source_keys.is_empty() {
            return Step::Exhausted;
        }
        let resource_tags = helper.registered_resource_tags();
        if resource_tags.is_empty() {
            cx.record(EngineError::NoLoadPath(format!(
                "No registered resource types for {}",
                helper.request().model
            )));
            return Step::Exhausted;
        }
        loop {
            if let Some(loaders) = self.loaders.as_mut() {
                if let Some(fetcher) = loaders.start(&helper, cx) {
                    self.current = Some(fetcher);
                    return Step::Started;
                }
                self.loaders = None;
            }
            if self.position >= source_keys.len() * resource_tags.len() {
                return Step::Exhausted;
            }
            let source_key = &source_keys[self.position / resource_tags.len()];
            let resource_tag = resource_tags[self.position % resource_tags.len()];
            self.position += 1;

            let transformation = match helper.transformation(resource_tag) {
                Ok(transformation) => transformation,
                Err(e) => {
                    cx.record(e);
                    continue;
                }
            };
            let request = helper.request();
            let key = ResourceCacheKey {
                source_key: source_key.clone(),
                signature: request.signature.clone(),
                width: request.width,
                height: request.height,
                transformation: transformation.id().to_string(),
                resource_tag,
                options: request.options.clone(),
            };
            if let Some(file) = helper.disk_cache().get(&key) {
                trace!("Resource cache hit for {source_key} as {resource_tag}");
                self.loaders = Some(CacheFileLoaders::new(&helper, &file));
                self.source_key = Some(source_key.clone());
                self.cache_key = Some(key);
            }
        }
    }

    fn on_outcome(&mut self, outcome: FetchOutcome, cx: &mut Cx<'_>) -> Step {
        let (Some(source_key), Some(fetcher)) = (self.source_key.clone(), self.current.take()) else {
            return Step::Failed;
        };
        match outcome {
            FetchOutcome::Ready(data) => Step::Ready(Retrieved {
                source_key,
                data,
                fetcher,
                data_source: DataSource::ResourceDiskCache,
                attempted_key: format!("{:?}", self.cache_key),
            }),
            FetchOutcome::Failed(e) => {
                fetcher.cleanup();
                cx.record(EngineError::Fetch(format!(
                    "Failed to read cached resource for {source_key}: {e:#}"
                )));
                Step::Failed
            }
        }
    }
}

/// Looks for original source data in the disk cache.
pub(crate) struct DataCacheGenerator {
    helper: Arc<DecodeHelper>,
    source_keys: Vec<SourceKey>,
    next: usize,
    loaders: Option<CacheFileLoaders>,
    source_key: Option<SourceKey>,
    current: Option<Arc<dyn DataFetcher>>,
}

impl DataCacheGenerator {
    pub fn new(helper: Arc<DecodeHelper>) -> Self {
        let source_keys = helper.cache_keys().to_vec();
        Self::with_keys(helper, source_keys)
    }

    /// Generator restricted to the given keys.
    pub fn with_keys(helper: Arc<DecodeHelper>, source_keys: Vec<SourceKey>) -> Self {
        Self { helper, source_keys, next: 0, loaders: None, source_key: None, current: None }
    }
}

impl DataFetcherGenerator for DataCacheGenerator {
    fn start_next(&mut self, cx: &mut Cx<'_>) -> Step {
        let helper = Arc::clone(&self.helper);
        loop {
            if let Some(loaders) = self.loaders.as_mut() {
                if let Some(fetcher) = loaders.start(&helper, cx) {
                    self.current = Some(fetcher);
                    return Step::Started;
                }
                self.loaders = None;
            }
            let Some(source_key) = self.source_keys.get(self.next).cloned() else {
                return Step::Exhausted;
            };
            self.next += 1;
            let key = DataCacheKey::new(source_key.clone(), helper.request().signature.clone());
            if let Some(file) = helper.disk_cache().get(&key) {
                trace!("Data cache hit for {source_key}");
                self.loaders = Some(CacheFileLoaders::new(&helper, &file));
                self.source_key = Some(source_key);
            }
        }
    }

    fn on_outcome(&mut self, outcome: FetchOutcome, cx: &mut Cx<'_>) -> Step {
        let (Some(source_key), Some(fetcher)) = (self.source_key.clone(), self.current.take()) else {
            return Step::Failed;
        };
        match outcome {
            FetchOutcome::Ready(data) => Step::Ready(Retrieved {
                attempted_key: source_key.to_string(),
                source_key,
                data,
                fetcher,
                data_source: DataSource::DataDiskCache,
            }),
            FetchOutcome::Failed(e) => {
                fetcher.cleanup();
                cx.record(EngineError::Fetch(format!(
                    "Failed to read cached data for {source_key}: {e:#}"
                )));
                Step::Failed
            }
        }
    }
}

/// Fetches from the original source, writing cacheable data to the data cache
/// and decoding it back from there.
pub(crate) struct SourceGenerator {
    helper: Arc<DecodeHelper>,
    next: usize,
    current: Option<pictor_registry::LoadData>,
    data_to_cache: Option<Data>,
    source_cache: Option<DataCacheGenerator>,
}

impl SourceGenerator {
    pub fn new(helper: Arc<DecodeHelper>) -> Self {
        Self { helper, next: 0, current: None, data_to_cache: None, source_cache: None }
    }

    /// Write fetched data to the data cache. On success the data is read back
    /// through a data cache generator, otherwise it is decoded directly.
    fn cache_data(&mut self, data: Data, cx: &mut Cx<'_>) -> Option<Retrieved> {
        let load_data = self.current.clone()?;
        let helper = &self.helper;
        let key = DataCacheKey::new(load_data.source_key.clone(), helper.request().signature.clone());
        let direct = |data: Data| Retrieved {
            attempted_key: load_data.source_key.to_string(),
            source_key: load_data.source_key.clone(),
            data: Some(data),
            fetcher: Arc::clone(&load_data.fetcher),
            data_source: load_data.fetcher.data_source(),
        };

        let Some(encoder) = helper.source_encoder(&data) else {
            cx.record(EngineError::NoResultEncoder(format!(
                "No source encoder for {}, decoding without caching",
                data.tag()
            )));
            return Some(direct(data));
        };
        let options = &helper.request().options;
        let mut writer = |file: &mut File| encoder.encode(&data, file, options);
        helper.disk_cache().put(&key, &mut writer);

        if helper.disk_cache().get(&key).is_some() {
            debug!("Wrote source data for {} to the data cache", load_data.source_key);
            load_data.fetcher.cleanup();
            self.source_cache = Some(DataCacheGenerator::with_keys(
                Arc::clone(helper),
                vec![load_data.source_key.clone()],
            ));
            None
        } else {
            debug!("Could not cache source data for {}, decoding directly", load_data.source_key);
            Some(direct(data))
        }
    }

    /// Report data read back from the data cache as coming from the source.
    fn relabel(&self, retrieved: Retrieved) -> Retrieved {
        let data_source = self
            .current
            .as_ref()
            .map_or(retrieved.data_source, |load_data| load_data.fetcher.data_source());
        Retrieved { attempted_key: retrieved.source_key.to_string(), data_source, ..retrieved }
    }
}

impl Drop for SourceGenerator {
    fn drop(&mut self) {
        // Fetched data that never reached the cache still holds the fetcher.
        if self.data_to_cache.take().is_some() {
            if let Some(load_data) = &self.current {
                load_data.fetcher.cleanup();
            }
        }
    }
}

impl DataFetcherGenerator for SourceGenerator {
    fn start_next(&mut self, cx: &mut Cx<'_>) -> Step {
        if let Some(data) = self.data_to_cache.take() {
            if let Some(retrieved) = self.cache_data(data, cx) {
                return Step::Ready(retrieved);
            }
        }
        if let Some(source_cache) = self.source_cache.as_mut() {
            match source_cache.start_next(cx) {
                Step::Started => return Step::Started,
                Step::Ready(retrieved) => return Step::Ready(self.relabel(retrieved)),
                Step::Exhausted | Step::Failed | Step::Reschedule => {}
            }
            self.source_cache = None;
        }

        let helper = Arc::clone(&self.helper);
        let load_data = helper.load_data();
        if load_data.is_empty() && self.next == 0 {
            self.next = 1;
            cx.record(EngineError::NoLoadPath(format!(
                "No model loader produced load data for {}",
                helper.request().model
            )));
        }
        while let Some(candidate) = load_data.get(self.next) {
            self.next += 1;
            let fetcher = &candidate.fetcher;
            if helper.strategy().is_data_cacheable(fetcher.data_source())
                || helper.has_load_path(fetcher.data_tag())
            {
                self.current = Some(candidate.clone());
                cx.job.start_fetch(fetcher);
                return Step::Started;
            }
        }
        Step::Exhausted
    }

    fn on_outcome(&mut self, outcome: FetchOutcome, cx: &mut Cx<'_>) -> Step {
        if let Some(source_cache) = self.source_cache.as_mut() {
            return match source_cache.on_outcome(outcome, cx) {
                Step::Ready(retrieved) => Step::Ready(self.relabel(retrieved)),
                other => other,
            };
        }
        let Some(load_data) = self.current.clone() else {
            return Step::Failed;
        };
        let fetcher = load_data.fetcher;
        match outcome {
            FetchOutcome::Ready(Some(data))
                if self.helper.strategy().is_data_cacheable(fetcher.data_source()) =>
            {
                self.data_to_cache = Some(data);
                Step::Reschedule
            }
            FetchOutcome::Ready(data) => Step::Ready(Retrieved {
                attempted_key: load_data.source_key.to_string(),
                source_key: load_data.source_key,
                data,
                data_source: fetcher.data_source(),
                fetcher,
            }),
            FetchOutcome::Failed(e) => {
                fetcher.cleanup();
                cx.record(EngineError::Fetch(format!(
                    "Failed to fetch {}: {e:#}",
                    load_data.source_key
                )));
                Step::Failed
            }
        }
    }
}
