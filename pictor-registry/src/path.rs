//! Resolved decode and load paths.

use crate::decoder::{ResourceDecoder, ResourceTranscoder};
use pictor_common::{Data, Options, Resource, TypeTag};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Failure of a decode or load path, carrying every underlying cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PathError {
    /// Description of the path that failed.
    pub message: String,
    /// Errors from each decoder or nested path that was tried.
    pub causes: Vec<anyhow::Error>,
}

impl PathError {
    fn new(message: String, causes: Vec<anyhow::Error>) -> Self {
        Self { message, causes }
    }
}

/// Callback applied to a freshly decoded resource before it is transcoded.
///
/// On error the decoded resource is recycled by the path. The callback must
/// recycle anything else it created and must not recycle the decoded resource
/// itself.
pub type DecodedCallback<'a> =
    &'a mut dyn FnMut(Arc<Resource>) -> anyhow::Result<Arc<Resource>>;

/// A list of decoders for one resource tag followed by one transcoder.
pub struct DecodePath {
    data_tag: TypeTag,
    resource_tag: TypeTag,
    transcode_tag: TypeTag,
    decoders: Vec<Arc<dyn ResourceDecoder>>,
    transcoder: Arc<dyn ResourceTranscoder>,
}

impl DecodePath {
    /// Create a path.
    pub fn new(
        data_tag: TypeTag,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
        decoders: Vec<Arc<dyn ResourceDecoder>>,
        transcoder: Arc<dyn ResourceTranscoder>,
    ) -> Self {
        Self { data_tag, resource_tag, transcode_tag, decoders, transcoder }
    }

    /// Resource tag produced by the decoders.
    pub fn resource_tag(&self) -> TypeTag {
        self.resource_tag
    }

    /// Number of decoders on the path.
    pub fn decoder_count(&self) -> usize {
        self.decoders.len()
    }

    /// Decode, hand the result to `on_decoded`, then transcode what it returns.
    ///
    /// The first decoder that handles the data and produces a resource wins.
    /// Intermediate resources are recycled when a later step fails.
    pub fn decode(
        &self,
        data: &Data,
        width: u32,
        height: u32,
        options: &Options,
        on_decoded: DecodedCallback<'_>,
    ) -> Result<Arc<Resource>, PathError> {
        let decoded = self.decode_resource(data, width, height, options)?;
        let transformed = match on_decoded(Arc::clone(&decoded)) {
            Ok(transformed) => transformed,
            Err(e) => {
                trace!("Recycling decoded {} after a failed callback", decoded.tag());
                decoded.recycle();
                return Err(PathError::new(format!("Failed to process {self}"), vec![e]));
            }
        };
        drop(decoded);
        match self.transcoder.transcode(Arc::clone(&transformed), options) {
            Ok(transcoded) => Ok(transcoded),
            Err(e) => {
                trace!("Recycling {} after a failed transcode", transformed.tag());
                transformed.recycle();
                Err(PathError::new(format!("Failed to transcode {self}"), vec![e]))
            }
        }
    }

    fn decode_resource(
        &self,
        data: &Data,
        width: u32,
        height: u32,
        options: &Options,
    ) -> Result<Arc<Resource>, PathError> {
        let mut causes = Vec::new();
        for decoder in &self.decoders {
            match decoder.handles(data, options) {
                Ok(true) => match decoder.decode(data, width, height, options) {
                    Ok(Some(resource)) => return Ok(resource),
                    Ok(None) => {}
                    Err(e) => {
                        trace!("Failed to decode data for {self}: {e:#}");
                        causes.push(e);
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    trace!("Decoder rejected data for {self}: {e:#}");
                    causes.push(e);
                }
            }
        }
        Err(PathError::new(format!("Failed {self}"), causes))
    }
}

impl fmt::Display for DecodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecodePath{{{} -> {} -> {}, decoders={}}}",
            self.data_tag,
            self.resource_tag,
            self.transcode_tag,
            self.decoders.len()
        )
    }
}

/// Every decode path from one data tag to one transcode tag, in priority order.
pub struct LoadPath {
    data_tag: TypeTag,
    resource_tag: TypeTag,
    transcode_tag: TypeTag,
    decode_paths: Vec<DecodePath>,
}

impl LoadPath {
    /// Create a load path. `decode_paths` must not be empty.
    pub fn new(
        data_tag: TypeTag,
        resource_tag: TypeTag,
        transcode_tag: TypeTag,
        decode_paths: Vec<DecodePath>,
    ) -> Self {
        Self { data_tag, resource_tag, transcode_tag, decode_paths }
    }

    /// Tag of the data this path consumes.
    pub fn data_tag(&self) -> TypeTag {
        self.data_tag
    }

    /// The decode paths, in the order they are tried.
    pub fn decode_paths(&self) -> &[DecodePath] {
        &self.decode_paths
    }

    /// Try every decode path in order and return the first success.
    pub fn load(
        &self,
        data: &Data,
        width: u32,
        height: u32,
        options: &Options,
        on_decoded: DecodedCallback<'_>,
    ) -> Result<Arc<Resource>, PathError> {
        let mut causes = Vec::new();
        for path in &self.decode_paths {
            match path.decode(data, width, height, options, &mut *on_decoded) {
                Ok(resource) => return Ok(resource),
                Err(e) => causes.push(anyhow::Error::new(e)),
            }
        }
        Err(PathError::new(format!("Failed {self}"), causes))
    }
}

impl fmt::Display for LoadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LoadPath{{{} -> {} -> {}, paths={}}}",
            self.data_tag,
            self.resource_tag,
            self.transcode_tag,
            self.decode_paths.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::UnitTranscoder;
    use anyhow::{bail, Result};
    use bytes::Bytes;
    use pictor_common::Payload;
    use pretty_assertions::assert_eq;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Counted(Arc<AtomicUsize>);

    impl Payload for Counted {
        fn tag(&self) -> TypeTag {
            TypeTag::BITMAP
        }
        fn byte_size(&self) -> usize {
            1
        }
        fn recycle(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct CountedDecoder(Arc<AtomicUsize>);

    impl ResourceDecoder for CountedDecoder {
        fn handles(&self, _data: &Data, _options: &Options) -> Result<bool> {
            Ok(true)
        }
        fn decode(&self, _: &Data, _: u32, _: u32, _: &Options) -> Result<Option<Arc<Resource>>> {
            Ok(Some(Resource::new(Counted(Arc::clone(&self.0)))))
        }
    }

    struct FailingTranscoder;

    impl ResourceTranscoder for FailingTranscoder {
        fn transcode(&self, _resource: Arc<Resource>, _: &Options) -> Result<Arc<Resource>> {
            bail!("unsupported pixel layout")
        }
    }

    fn path(decoded: &Arc<AtomicUsize>, transcoder: Arc<dyn ResourceTranscoder>) -> DecodePath {
        let decoder: Arc<dyn ResourceDecoder> = Arc::new(CountedDecoder(Arc::clone(decoded)));
        DecodePath::new(TypeTag::BYTES, TypeTag::BITMAP, TypeTag::BITMAP, vec![decoder], transcoder)
    }

    fn data() -> Data {
        Data::Bytes(Bytes::from_static(b"pixels"))
    }

    #[test]
    fn test_failed_callback_recycles_decoded_resource() {
        let decoded = Arc::new(AtomicUsize::new(0));
        let path = path(&decoded, Arc::new(UnitTranscoder));
        let mut on_decoded =
            |_resource: Arc<Resource>| -> Result<Arc<Resource>> { bail!("transformation failed") };
        let error = path.decode(&data(), 10, 10, &Options::new(), &mut on_decoded).unwrap_err();
        assert!(error.message.starts_with("Failed to process"));
        assert_eq!(decoded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_transcode_recycles_transformed_resource() {
        let decoded = Arc::new(AtomicUsize::new(0));
        let transformed = Arc::new(AtomicUsize::new(0));
        let path = path(&decoded, Arc::new(FailingTranscoder));
        let made = Arc::clone(&transformed);
        let mut on_decoded = |resource: Arc<Resource>| -> Result<Arc<Resource>> {
            resource.recycle();
            Ok(Resource::new(Counted(Arc::clone(&made))))
        };
        let error = path.decode(&data(), 10, 10, &Options::new(), &mut on_decoded).unwrap_err();
        assert!(error.message.starts_with("Failed to transcode"));
        assert_eq!(decoded.load(Ordering::SeqCst), 1);
        assert_eq!(transformed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_successful_decode_recycles_nothing() {
        let decoded = Arc::new(AtomicUsize::new(0));
        let path = path(&decoded, Arc::new(UnitTranscoder));
        let mut on_decoded = |resource: Arc<Resource>| -> Result<Arc<Resource>> { Ok(resource) };
        let resource = path.decode(&data(), 10, 10, &Options::new(), &mut on_decoded).unwrap();
        assert_eq!(resource.tag(), TypeTag::BITMAP);
        assert_eq!(decoded.load(Ordering::SeqCst), 0);
    }
}
