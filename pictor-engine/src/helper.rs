//! Per-load view of the registry and caches used by the decode pipeline.

use crate::errors::EngineError;
use crate::request::LoadRequest;
use once_cell::sync::OnceCell;
use pictor_cache::{DiskCache, DiskCacheStrategy};
use pictor_common::{Data, Model, SourceKey, TypeTag};
use pictor_registry::{
    LoadData, LoadPath, ModelLoader, Registry, ResourceEncoder, SourceEncoder, Transformation,
    UnitTransformation,
};
use std::path::Path;
use std::sync::Arc;

pub(crate) struct DecodeHelper {
    registry: Arc<Registry>,
    disk_cache: Arc<dyn DiskCache>,
    request: LoadRequest,
    load_data: OnceCell<Vec<LoadData>>,
    cache_keys: OnceCell<Vec<SourceKey>>,
}

impl DecodeHelper {
    pub fn new(registry: Arc<Registry>, disk_cache: Arc<dyn DiskCache>, request: LoadRequest) -> Self {
        Self { registry, disk_cache, request, load_data: OnceCell::new(), cache_keys: OnceCell::new() }
    }

    pub fn request(&self) -> &LoadRequest {
        &self.request
    }

    pub fn disk_cache(&self) -> &dyn DiskCache {
        self.disk_cache.as_ref()
    }

    pub fn strategy(&self) -> DiskCacheStrategy {
        self.request.disk_cache_strategy
    }

    /// Every way the registered model loaders offer to fetch the model.
    pub fn load_data(&self) -> &[LoadData] {
        self.load_data.get_or_init(|| {
            let request = &self.request;
            self.registry
                .model_loaders(&request.model)
                .iter()
                .filter_map(|loader| {
                    loader.build_load_data(&request.model, request.width, request.height, &request.options)
                })
                .collect()
        })
    }

    /// Source keys and alternate keys of every load data, without duplicates.
    pub fn cache_keys(&self) -> &[SourceKey] {
        self.cache_keys.get_or_init(|| {
            let mut keys: Vec<SourceKey> = Vec::new();
            for data in self.load_data() {
                for key in std::iter::once(&data.source_key).chain(&data.alternate_keys) {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
            keys
        })
    }

    pub fn is_source_key(&self, key: &SourceKey) -> bool {
        self.load_data().iter().any(|data| &data.source_key == key)
    }

    pub fn load_path(&self, data_tag: TypeTag) -> Option<Arc<LoadPath>> {
        self.registry.load_path(data_tag, self.request.resource_tag, self.request.transcode_tag)
    }

    pub fn has_load_path(&self, data_tag: TypeTag) -> bool {
        self.load_path(data_tag).is_some()
    }

    pub fn registered_resource_tags(&self) -> Arc<Vec<TypeTag>> {
        self.registry.registered_resource_tags(
            self.request.model.kind(),
            self.request.resource_tag,
            self.request.transcode_tag,
        )
    }

    /// Loaders able to read a disk cache entry.
    pub fn cache_file_loaders(&self, path: &Path) -> (Model, Vec<Arc<dyn ModelLoader>>) {
        let model = Model::File(path.to_path_buf());
        let loaders = self.registry.model_loaders(&model);
        (model, loaders)
    }

    /// The transformation applied to decoded resources of `resource_tag`.
    pub fn transformation(&self, resource_tag: TypeTag) -> Result<Arc<dyn Transformation>, EngineError> {
        let transformations = &self.request.transformations;
        if let Some(found) = transformations.get(&resource_tag) {
            return Ok(Arc::clone(found));
        }
        if let Some((_, found)) = transformations.iter().find(|(tag, _)| tag.is_assignable_from(resource_tag)) {
            return Ok(Arc::clone(found));
        }
        if transformations.is_empty() && self.request.transformation_required {
            return Err(EngineError::Transformation(format!(
                "Missing transformation for {resource_tag}"
            )));
        }
        Ok(Arc::new(UnitTransformation))
    }

    pub fn source_encoder(&self, data: &Data) -> Option<Arc<dyn SourceEncoder>> {
        self.registry.source_encoder(data.tag())
    }

    pub fn resource_encoder(&self, resource_tag: TypeTag) -> Option<Arc<dyn ResourceEncoder>> {
        self.registry.resource_encoder(resource_tag)
    }
}
