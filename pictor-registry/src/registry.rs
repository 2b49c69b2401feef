//! The registry of every capability the decode pipeline can use.

use crate::decoder::{ResourceDecoder, ResourceTranscoder, UnitTranscoder};
use crate::encoder::{ResourceEncoder, SourceEncoder};
use crate::loader::ModelLoader;
use crate::path::{DecodePath, LoadPath};
use crate::{
    BUCKET_ANIMATED, BUCKET_APPEND_ALL, BUCKET_BITMAP, BUCKET_DRAWABLE, BUCKET_PREPEND_ALL,
};
use parking_lot::Mutex;
use pictor_common::{Model, ModelKind, TypeTag};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type PathKey = (TypeTag, TypeTag, TypeTag);
type ResourceTagKey = (ModelKind, TypeTag, TypeTag);

struct DecoderEntry {
    data_tag: TypeTag,
    resource_tag: TypeTag,
    decoder: Arc<dyn ResourceDecoder>,
}

impl DecoderEntry {
    fn handles(&self, data_tag: TypeTag, resource_tag: TypeTag) -> bool {
        self.data_tag.is_assignable_from(data_tag) && resource_tag.is_assignable_from(self.resource_tag)
    }
}

struct TranscoderEntry {
    resource_tag: TypeTag,
    transcode_tag: TypeTag,
    transcoder: Arc<dyn ResourceTranscoder>,
}

struct ModelLoaderEntry {
    kind: ModelKind,
    data_tag: TypeTag,
    loader: Arc<dyn ModelLoader>,
}

/// Tagged capability providers and memoized path resolution.
///
/// Registration takes `&mut self`; once built the registry is shared
/// read-only behind an `Arc` and only its memo tables change.
pub struct Registry {
    bucket_order: Vec<String>,
    decoders: HashMap<String, Vec<DecoderEntry>>,
    transcoders: Vec<TranscoderEntry>,
    model_loaders: Vec<ModelLoaderEntry>,
    source_encoders: Vec<(TypeTag, Arc<dyn SourceEncoder>)>,
    resource_encoders: Vec<(TypeTag, Arc<dyn ResourceEncoder>)>,
    load_paths: Mutex<HashMap<PathKey, Option<Arc<LoadPath>>>>,
    resource_tags: Mutex<HashMap<ResourceTagKey, Arc<Vec<TypeTag>>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Empty registry with the default bucket order.
    pub fn new() -> Self {
        let mut registry = Self {
            bucket_order: Vec::new(),
            decoders: HashMap::new(),
            transcoders: Vec::new(),
            model_loaders: Vec::new(),
            source_encoders: Vec::new(),
            resource_encoders: Vec::new(),
            load_paths: Mutex::new(HashMap::new()),
            resource_tags: Mutex::new(HashMap::new()),
        };
        registry.set_bucket_priority(&[BUCKET_ANIMATED, BUCKET_BITMAP, BUCKET_DRAWABLE]);
        registry
    }

    /// Replace the decoder bucket order.
    ///
    /// The prepend-all and append-all buckets always bracket the given list.
    /// Buckets missing from the list are no longer consulted.
    pub fn set_bucket_priority(&mut self, buckets: &[&str]) -> &mut Self {
        let mut order = Vec::with_capacity(buckets.len() + 2);
        order.push(BUCKET_PREPEND_ALL.to_string());
        order.extend(buckets.iter().map(|b| (*b).to_string()));
        order.push(BUCKET_APPEND_ALL.to_string());
        self.bucket_order = order;
        self.invalidate();
        self
    }

    /// The current bucket order, including the bracketing buckets.
    pub fn bucket_priority(&self) -> &[String] {
        &self.bucket_order
    }

    /// Register a decoder after all others for its edge.
    pub fn append_decoder<D: ResourceDecoder + 'static>(
        &mut self,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        decoder: D,
    ) -> &mut Self {
        self.append_decoder_to_bucket(BUCKET_APPEND_ALL, data_tag, resource_tag, decoder)
    }

    /// Register a decoder before all others for its edge.
    pub fn prepend_decoder<D: ResourceDecoder + 'static>(
        &mut self,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        decoder: D,
    ) -> &mut Self {
        self.prepend_decoder_to_bucket(BUCKET_PREPEND_ALL, data_tag, resource_tag, decoder)
    }

    /// Register a decoder at the end of a bucket.
    pub fn append_decoder_to_bucket<D: ResourceDecoder + 'static>(
        &mut self,
        bucket: &str,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        decoder: D,
    ) -> &mut Self {
        let entry = DecoderEntry { data_tag, resource_tag, decoder: Arc::new(decoder) };
        self.bucket_mut(bucket).push(entry);
        self.invalidate();
        self
    }

    /// Register a decoder at the start of a bucket.
    pub fn prepend_decoder_to_bucket<D: ResourceDecoder + 'static>(
        &mut self,
        bucket: &str,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        decoder: D,
    ) -> &mut Self {
        let entry = DecoderEntry { data_tag, resource_tag, decoder: Arc::new(decoder) };
        self.bucket_mut(bucket).insert(0, entry);
        self.invalidate();
        self
    }

    /// Register a transcoder for a `(resource, transcode)` edge.
    pub fn register_transcoder<T: ResourceTranscoder + 'static>(
        &mut self,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
        transcoder: T,
    ) -> &mut Self {
        self.transcoders.push(TranscoderEntry {
            resource_tag,
            transcode_tag,
            transcoder: Arc::new(transcoder),
        });
        self.invalidate();
        self
    }

    /// Register a model loader after existing ones for the same model kind.
    pub fn append_model_loader<L: ModelLoader + 'static>(
        &mut self,
        kind: ModelKind,
        data_tag: TypeTag,
        loader: L,
    ) -> &mut Self {
        self.model_loaders.push(ModelLoaderEntry { kind, data_tag, loader: Arc::new(loader) });
        self.invalidate();
        self
    }

    /// Register a model loader before existing ones for the same model kind.
    pub fn prepend_model_loader<L: ModelLoader + 'static>(
        &mut self,
        kind: ModelKind,
        data_tag: TypeTag,
        loader: L,
    ) -> &mut Self {
        self.model_loaders
            .insert(0, ModelLoaderEntry { kind, data_tag, loader: Arc::new(loader) });
        self.invalidate();
        self
    }

    /// Register an encoder for original data of `data_tag`.
    pub fn append_source_encoder<E: SourceEncoder + 'static>(
        &mut self,
        data_tag: TypeTag,
        encoder: E,
    ) -> &mut Self {
        self.source_encoders.push((data_tag, Arc::new(encoder)));
        self
    }

    /// Register an encoder for decoded resources of `resource_tag`.
    pub fn append_resource_encoder<E: ResourceEncoder + 'static>(
        &mut self,
        resource_tag: TypeTag,
        encoder: E,
    ) -> &mut Self {
        self.resource_encoders.push((resource_tag, Arc::new(encoder)));
        self
    }

    /// Model loaders able to load `model`, in registration order.
    pub fn model_loaders(&self, model: &Model) -> Vec<Arc<dyn ModelLoader>> {
        let kind = model.kind();
        self.model_loaders
            .iter()
            .filter(|entry| entry.kind == kind && entry.loader.handles(model))
            .map(|entry| Arc::clone(&entry.loader))
            .collect()
    }

    /// Encoder for original data of `data_tag`, if any.
    pub fn source_encoder(&self, data_tag: TypeTag) -> Option<Arc<dyn SourceEncoder>> {
        self.source_encoders
            .iter()
            .find(|(tag, _)| tag.is_assignable_from(data_tag))
            .map(|(_, encoder)| Arc::clone(encoder))
    }

    /// Encoder for decoded resources of `resource_tag`, if any.
    pub fn resource_encoder(&self, resource_tag: TypeTag) -> Option<Arc<dyn ResourceEncoder>> {
        self.resource_encoders
            .iter()
            .find(|(tag, _)| tag.is_assignable_from(resource_tag))
            .map(|(_, encoder)| Arc::clone(encoder))
    }

    /// The memoized load path for a `(data, resource, transcode)` triple.
    ///
    /// `None` means no decoder/transcoder chain exists; that answer is
    /// memoized too.
    pub fn load_path(
        &self,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
    ) -> Option<Arc<LoadPath>> {
        let key = (data_tag, resource_tag, transcode_tag);
        if let Some(cached) = self.load_paths.lock().get(&key) {
            return cached.clone();
        }
        let paths = self.decode_paths(data_tag, resource_tag, transcode_tag);
        let resolved = if paths.is_empty() {
            debug!("No load path from {data_tag} to {transcode_tag} via {resource_tag}");
            None
        } else {
            Some(Arc::new(LoadPath::new(data_tag, resource_tag, transcode_tag, paths)))
        };
        self.load_paths.lock().insert(key, resolved.clone());
        resolved
    }

    /// Resource tags that some registered chain can produce for a model kind
    /// and then transcode to `transcode_tag`. Memoized.
    pub fn registered_resource_tags(
        &self,
        kind: ModelKind,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
    ) -> Arc<Vec<TypeTag>> {
        let key = (kind, resource_tag, transcode_tag);
        if let Some(cached) = self.resource_tags.lock().get(&key) {
            return Arc::clone(cached);
        }
        let mut result = Vec::new();
        for data_tag in self.data_tags(kind) {
            for registered in self.decodable_resource_tags(data_tag, resource_tag) {
                if !self.transcode_tags(registered, transcode_tag).is_empty()
                    && !result.contains(&registered)
                {
                    result.push(registered);
                }
            }
        }
        let result = Arc::new(result);
        self.resource_tags.lock().insert(key, Arc::clone(&result));
        result
    }

    fn decode_paths(
        &self,
        data_tag: TypeTag,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
    ) -> Vec<DecodePath> {
        let mut paths = Vec::new();
        for registered_resource in self.decodable_resource_tags(data_tag, resource_tag) {
            for registered_transcode in self.transcode_tags(registered_resource, transcode_tag) {
                let Some(transcoder) = self.transcoder(registered_resource, registered_transcode)
                else {
                    continue;
                };
                let decoders = self.decoders(data_tag, registered_resource);
                paths.push(DecodePath::new(
                    data_tag,
                    registered_resource,
                    registered_transcode,
                    decoders,
                    transcoder,
                ));
            }
        }
        paths
    }

    fn data_tags(&self, kind: ModelKind) -> Vec<TypeTag> {
        let mut tags = Vec::new();
        for entry in self.model_loaders.iter().filter(|e| e.kind == kind) {
            if !tags.contains(&entry.data_tag) {
                tags.push(entry.data_tag);
            }
        }
        tags
    }

    fn ordered_decoders(&self) -> impl Iterator<Item = &DecoderEntry> {
        self.bucket_order
            .iter()
            .filter_map(|bucket| self.decoders.get(bucket))
            .flatten()
    }

    fn decodable_resource_tags(&self, data_tag: TypeTag, resource_tag: TypeTag) -> Vec<TypeTag> {
        let mut tags = Vec::new();
        for entry in self.ordered_decoders() {
            if entry.handles(data_tag, resource_tag) && !tags.contains(&entry.resource_tag) {
                tags.push(entry.resource_tag);
            }
        }
        tags
    }

    fn decoders(&self, data_tag: TypeTag, resource_tag: TypeTag) -> Vec<Arc<dyn ResourceDecoder>> {
        self.ordered_decoders()
            .filter(|entry| entry.handles(data_tag, resource_tag))
            .map(|entry| Arc::clone(&entry.decoder))
            .collect()
    }

    fn transcode_tags(&self, resource_tag: TypeTag, transcode_tag: TypeTag) -> Vec<TypeTag> {
        if transcode_tag.is_assignable_from(resource_tag) {
            return vec![transcode_tag];
        }
        let mut tags = Vec::new();
        for entry in &self.transcoders {
            if entry.resource_tag.is_assignable_from(resource_tag)
                && transcode_tag.is_assignable_from(entry.transcode_tag)
                && !tags.contains(&transcode_tag)
            {
                tags.push(transcode_tag);
            }
        }
        tags
    }

    fn transcoder(
        &self,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
    ) -> Option<Arc<dyn ResourceTranscoder>> {
        if transcode_tag.is_assignable_from(resource_tag) {
            return Some(Arc::new(UnitTranscoder));
        }
        self.transcoders
            .iter()
            .find(|entry| {
                entry.resource_tag.is_assignable_from(resource_tag)
                    && transcode_tag.is_assignable_from(entry.transcode_tag)
            })
            .map(|entry| Arc::clone(&entry.transcoder))
    }

    fn bucket_mut(&mut self, bucket: &str) -> &mut Vec<DecoderEntry> {
        if !self.bucket_order.iter().any(|b| b == bucket) {
            let append_at = self.bucket_order.len().saturating_sub(1);
            self.bucket_order.insert(append_at, bucket.to_string());
        }
        self.decoders.entry(bucket.to_string()).or_default()
    }

    fn invalidate(&mut self) {
        self.load_paths.get_mut().clear();
        self.resource_tags.get_mut().clear();
    }
}
