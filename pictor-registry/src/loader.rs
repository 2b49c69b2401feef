//! Model loaders and data fetchers.

use anyhow::anyhow;
use pictor_common::{Data, DataSource, Model, Options, Priority, SourceKey, TypeTag};
use std::sync::Arc;

/// Turns a model into one way of fetching its data.
pub trait ModelLoader: Send + Sync {
    /// True if this loader can load `model`.
    fn handles(&self, _model: &Model) -> bool {
        true
    }

    /// Describe how to fetch `model`, or `None` if this loader cannot.
    fn build_load_data(
        &self,
        model: &Model,
        width: u32,
        height: u32,
        options: &Options,
    ) -> Option<LoadData>;
}

/// One candidate way of fetching a model's data.
#[derive(Clone)]
pub struct LoadData {
    /// Key identifying the source, used for both disk cache keyspaces.
    pub source_key: SourceKey,
    /// Other keys the same data may have been cached under.
    pub alternate_keys: Vec<SourceKey>,
    /// The fetcher that produces the data.
    pub fetcher: Arc<dyn DataFetcher>,
}

impl LoadData {
    /// Load data without alternate keys.
    pub fn new(source_key: SourceKey, fetcher: Arc<dyn DataFetcher>) -> Self {
        Self { source_key, alternate_keys: Vec::new(), fetcher }
    }
}

/// Fetches raw data for one [`LoadData`].
///
/// `load_data` may report through the callback synchronously or from any
/// other thread. `cancel` may be called from any thread while a load is in
/// progress and should make it finish quickly.
pub trait DataFetcher: Send + Sync {
    /// Start fetching. The callback must eventually receive exactly one result.
    fn load_data(&self, priority: Priority, callback: DataCallback);

    /// Release anything held after the data has been consumed.
    fn cleanup(&self) {}

    /// Ask an in-flight load to stop.
    fn cancel(&self) {}

    /// Tag of the data this fetcher produces.
    fn data_tag(&self) -> TypeTag;

    /// Where the data comes from.
    fn data_source(&self) -> DataSource;
}

/// Receiver of fetch results.
pub trait FetchTarget: Send + Sync {
    /// Data is available; `None` means the fetch produced nothing.
    fn on_data_ready(&self, data: Option<Data>);

    /// The fetch failed.
    fn on_load_failed(&self, error: anyhow::Error);
}

/// Single-use handle through which a fetcher reports its result.
///
/// Dropping the callback without reporting counts as a failure, so a fetch
/// always produces exactly one notification.
pub struct DataCallback {
    target: Option<Arc<dyn FetchTarget>>,
}

impl DataCallback {
    /// Wrap a target.
    pub fn new(target: Arc<dyn FetchTarget>) -> Self {
        Self { target: Some(target) }
    }

    /// Report fetched data.
    pub fn on_data_ready(mut self, data: Option<Data>) {
        if let Some(target) = self.target.take() {
            target.on_data_ready(data);
        }
    }

    /// Report a failed fetch.
    pub fn on_load_failed(mut self, error: anyhow::Error) {
        if let Some(target) = self.target.take() {
            target.on_load_failed(error);
        }
    }
}

impl Drop for DataCallback {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            target.on_load_failed(anyhow!("Fetcher dropped its callback without a result"));
        }
    }
}
