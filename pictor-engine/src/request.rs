//! Load requests and the keys that identify them.

use pictor_cache::DiskCacheStrategy;
use pictor_common::{Model, Options, Priority, Signature, TypeTag, SIZE_ORIGINAL};
use pictor_registry::Transformation;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Everything needed to load one resource.
///
/// # Examples
///
/// ```
/// use pictor_common::{Model, TypeTag};
/// use pictor_engine::LoadRequest;
///
/// let request = LoadRequest::new(Model::File("cat.png".into()))
///     .size(100, 100)
///     .transcode(TypeTag::BITMAP);
/// assert_eq!(request.width(), 100);
/// ```
#[derive(Clone)]
pub struct LoadRequest {
    pub(crate) model: Model,
    pub(crate) signature: Signature,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) resource_tag: TypeTag,
    pub(crate) transcode_tag: TypeTag,
    pub(crate) transformations: BTreeMap<TypeTag, Arc<dyn Transformation>>,
    pub(crate) transformation_required: bool,
    pub(crate) options: Options,
    pub(crate) priority: Priority,
    pub(crate) disk_cache_strategy: DiskCacheStrategy,
    pub(crate) memory_cacheable: bool,
    pub(crate) use_unlimited_source_pool: bool,
    pub(crate) use_animation_pool: bool,
    pub(crate) only_retrieve_from_cache: bool,
}

impl LoadRequest {
    /// A request for `model` at its original size, decoded to any resource
    /// type and delivered as a bitmap.
    pub fn new(model: Model) -> Self {
        Self {
            model,
            signature: Signature::empty(),
            width: SIZE_ORIGINAL,
            height: SIZE_ORIGINAL,
            resource_tag: TypeTag::ANY,
            transcode_tag: TypeTag::BITMAP,
            transformations: BTreeMap::new(),
            transformation_required: false,
            options: Options::new(),
            priority: Priority::Normal,
            disk_cache_strategy: DiskCacheStrategy::default(),
            memory_cacheable: true,
            use_unlimited_source_pool: false,
            use_animation_pool: false,
            only_retrieve_from_cache: false,
        }
    }

    /// Sets the target size.
    #[must_use]
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Sets the signature mixed into every cache key.
    #[must_use]
    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = signature;
        self
    }

    /// Restricts decoding to resources of `tag`.
    #[must_use]
    pub fn resource_tag(mut self, tag: TypeTag) -> Self {
        self.resource_tag = tag;
        self
    }

    /// Sets the type delivered to the callback.
    #[must_use]
    pub fn transcode(mut self, tag: TypeTag) -> Self {
        self.transcode_tag = tag;
        self
    }

    /// Applies `transformation` to decoded resources of `tag`.
    #[must_use]
    pub fn transform<T: Transformation + 'static>(mut self, tag: TypeTag, transformation: T) -> Self {
        self.transformations.insert(tag, Arc::new(transformation));
        self
    }

    /// Fail instead of skipping the transformation when none matches the
    /// decoded resource.
    #[must_use]
    pub fn transformation_required(mut self, required: bool) -> Self {
        self.transformation_required = required;
        self
    }

    /// Sets decoder and encoder options.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Sets the scheduling priority.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the disk cache strategy.
    #[must_use]
    pub fn disk_cache_strategy(mut self, strategy: DiskCacheStrategy) -> Self {
        self.disk_cache_strategy = strategy;
        self
    }

    /// Bypass the active resources and memory cache tiers.
    #[must_use]
    pub fn skip_memory_cache(mut self, skip: bool) -> Self {
        self.memory_cacheable = !skip;
        self
    }

    /// Run source work on the unbounded pool.
    #[must_use]
    pub fn use_unlimited_source_pool(mut self, unlimited: bool) -> Self {
        self.use_unlimited_source_pool = unlimited;
        self
    }

    /// Run source work on the animation pool.
    #[must_use]
    pub fn use_animation_pool(mut self, animation: bool) -> Self {
        self.use_animation_pool = animation;
        self
    }

    /// Never fetch from the source; fail if no cache tier has the resource.
    #[must_use]
    pub fn only_retrieve_from_cache(mut self, only: bool) -> Self {
        self.only_retrieve_from_cache = only;
        self
    }

    /// The model being loaded.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Target width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Target height.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whether the result may enter the memory tiers.
    pub fn is_memory_cacheable(&self) -> bool {
        self.memory_cacheable
    }
}

impl fmt::Debug for LoadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadRequest")
            .field("model", &self.model)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transcode_tag", &self.transcode_tag)
            .field("transformations", &self.transformations.values().map(|t| t.id()).collect::<Vec<_>>())
            .field("disk_cache_strategy", &self.disk_cache_strategy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
struct KeyFields {
    model: Model,
    signature: Signature,
    width: u32,
    height: u32,
    transformations: Vec<(TypeTag, String)>,
    resource_tag: TypeTag,
    transcode_tag: TypeTag,
    options: Options,
}

/// Identity of a logical load, used by every in-memory tier and the job table.
///
/// Two keys are equal when the model, signature, size, transformations,
/// resource and transcode tags and options are all equal. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(Arc<KeyFields>);

impl RequestKey {
    /// The model of the request.
    pub fn model(&self) -> &Model {
        &self.0.model
    }

    /// `(width, height)` of the request.
    pub fn size(&self) -> (u32, u32) {
        (self.0.width, self.0.height)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = |v: u32| if v == SIZE_ORIGINAL { "orig".to_string() } else { v.to_string() };
        write!(
            f,
            "RequestKey{{{}, {}x{}, {} -> {}",
            self.0.model,
            dim(self.0.width),
            dim(self.0.height),
            self.0.resource_tag,
            self.0.transcode_tag
        )?;
        for (_, id) in &self.0.transformations {
            write!(f, ", {id}")?;
        }
        f.write_str("}")
    }
}

/// Builds [`RequestKey`]s from requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineKeyFactory;

impl EngineKeyFactory {
    /// Build the key of `request`. Equal requests always give equal keys.
    pub fn build_key(&self, request: &LoadRequest) -> RequestKey {
        RequestKey(Arc::new(KeyFields {
            model: request.model.clone(),
            signature: request.signature.clone(),
            width: request.width,
            height: request.height,
            transformations: request
                .transformations
                .iter()
                .map(|(tag, t)| (*tag, t.id().to_string()))
                .collect(),
            resource_tag: request.resource_tag,
            transcode_tag: request.transcode_tag,
            options: request.options.clone(),
        }))
    }
}
