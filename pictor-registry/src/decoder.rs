//! Decoding, transcoding and transformation capabilities.

use anyhow::Result;
use pictor_common::{Data, Options, Resource};
use std::fmt;
use std::sync::Arc;

/// Decodes raw data into a resource.
///
/// Errors are recoverable: they are recorded as one cause among many and the
/// next decoder on the path is tried.
pub trait ResourceDecoder: Send + Sync {
    /// True if this decoder can probably decode `data`.
    fn handles(&self, data: &Data, options: &Options) -> Result<bool>;

    /// Decode `data` for the requested target size.
    ///
    /// Returns `Ok(None)` when the data turned out not to be decodable by
    /// this decoder after all.
    fn decode(
        &self,
        data: &Data,
        width: u32,
        height: u32,
        options: &Options,
    ) -> Result<Option<Arc<Resource>>>;
}

/// Converts a decoded resource into the type the caller asked for.
pub trait ResourceTranscoder: Send + Sync {
    /// Transcode `resource`. Implementations may return the input unchanged.
    /// On error the input must be left alone; the caller recycles it.
    fn transcode(&self, resource: Arc<Resource>, options: &Options) -> Result<Arc<Resource>>;
}

/// Transcoder used when the resource already has the requested type.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitTranscoder;

impl ResourceTranscoder for UnitTranscoder {
    fn transcode(&self, resource: Arc<Resource>, _options: &Options) -> Result<Arc<Resource>> {
        Ok(resource)
    }
}

/// Modifies a decoded resource, for example by resizing or cropping it.
pub trait Transformation: Send + Sync + fmt::Debug {
    /// Stable identity of the transformation and its parameters.
    ///
    /// Two transformations with equal ids must produce the same output; the id
    /// is part of request keys and of transformed disk cache keys.
    fn id(&self) -> &str;

    /// Transform `resource` for the given target size.
    ///
    /// Returning the same `Arc` signals that nothing changed.
    fn transform(&self, resource: Arc<Resource>, width: u32, height: u32) -> Result<Arc<Resource>>;
}

/// Transformation that returns its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitTransformation;

impl Transformation for UnitTransformation {
    fn id(&self) -> &str {
        "pictor.UnitTransformation"
    }

    fn transform(&self, resource: Arc<Resource>, _width: u32, _height: u32) -> Result<Arc<Resource>> {
        Ok(resource)
    }
}
