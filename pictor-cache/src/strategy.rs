//! Disk cache strategies.
//!
//! Each strategy answers four independent questions. The formulas below are
//! load-bearing: in particular `Automatic` treats a transformed resource
//! decoded from an alternate key's data cache entry as cacheable while a
//! resource decoded from the primary key's entry is not.

use pictor_common::{DataSource, EncodeStrategy};
use serde::{Deserialize, Serialize};

/// What to write to, and read from, the two disk cache keyspaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskCacheStrategy {
    /// Cache remote data and every transformed resource.
    All,
    /// Cache nothing.
    None,
    /// Cache original data only.
    Data,
    /// Cache transformed resources only.
    Resource,
    /// Cache original bytes of remote data and transformed bytes of local data.
    #[default]
    Automatic,
}

impl DiskCacheStrategy {
    /// True if original data from `source` should be written to the data cache.
    pub fn is_data_cacheable(self, source: DataSource) -> bool {
        match self {
            Self::All | Self::Automatic => source == DataSource::Remote,
            Self::None | Self::Resource => false,
            Self::Data => {
                source != DataSource::DataDiskCache && source != DataSource::MemoryCache
            }
        }
    }

    /// True if a transformed resource should be written to the disk cache.
    pub fn is_resource_cacheable(
        self,
        is_from_alternate_key: bool,
        source: DataSource,
        encode_strategy: EncodeStrategy,
    ) -> bool {
        match self {
            Self::All | Self::Resource => {
                source != DataSource::ResourceDiskCache && source != DataSource::MemoryCache
            }
            Self::None | Self::Data => false,
            Self::Automatic => {
                ((is_from_alternate_key && source == DataSource::DataDiskCache)
                    || source == DataSource::Local)
                    && encode_strategy == EncodeStrategy::Transformed
            }
        }
    }

    /// True if the transformed resource cache should be consulted first.
    pub fn decode_cached_resource(self) -> bool {
        matches!(self, Self::All | Self::Resource | Self::Automatic)
    }

    /// True if the original data cache should be consulted.
    pub fn decode_cached_data(self) -> bool {
        matches!(self, Self::All | Self::Data | Self::Automatic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SOURCES: [DataSource; 5] = [
        DataSource::Local,
        DataSource::Remote,
        DataSource::DataDiskCache,
        DataSource::ResourceDiskCache,
        DataSource::MemoryCache,
    ];
    const ENCODES: [EncodeStrategy; 3] =
        [EncodeStrategy::Source, EncodeStrategy::Transformed, EncodeStrategy::None];

    fn source() -> impl Strategy<Value = DataSource> {
        prop::sample::select(SOURCES.to_vec())
    }

    fn encode() -> impl Strategy<Value = EncodeStrategy> {
        prop::sample::select(ENCODES.to_vec())
    }

    proptest! {
        #[test]
        fn automatic_caches_original_bytes_only_for_remote(source in source()) {
            prop_assert_eq!(
                DiskCacheStrategy::Automatic.is_data_cacheable(source),
                source == DataSource::Remote
            );
        }

        #[test]
        fn automatic_caches_transformed_bytes_for_local_or_alternate_hits(
            alternate in any::<bool>(),
            source in source(),
            encode in encode(),
        ) {
            let expected = encode == EncodeStrategy::Transformed
                && (source == DataSource::Local
                    || (alternate && source == DataSource::DataDiskCache));
            prop_assert_eq!(
                DiskCacheStrategy::Automatic.is_resource_cacheable(alternate, source, encode),
                expected
            );
        }

        #[test]
        fn none_caches_nothing(alternate in any::<bool>(), source in source(), encode in encode()) {
            prop_assert!(!DiskCacheStrategy::None.is_data_cacheable(source));
            prop_assert!(!DiskCacheStrategy::None.is_resource_cacheable(alternate, source, encode));
        }

        #[test]
        fn all_never_recaches_cache_hits(alternate in any::<bool>(), encode in encode()) {
            for source in [DataSource::ResourceDiskCache, DataSource::MemoryCache] {
                prop_assert!(!DiskCacheStrategy::All.is_resource_cacheable(alternate, source, encode));
                prop_assert!(!DiskCacheStrategy::Resource.is_resource_cacheable(alternate, source, encode));
            }
        }
    }

    #[test]
    fn test_primary_data_cache_hit_is_not_resource_cacheable_under_automatic() {
        assert!(!DiskCacheStrategy::Automatic.is_resource_cacheable(
            false,
            DataSource::DataDiskCache,
            EncodeStrategy::Transformed
        ));
        assert!(DiskCacheStrategy::Automatic.is_resource_cacheable(
            true,
            DataSource::DataDiskCache,
            EncodeStrategy::Transformed
        ));
    }

    #[test]
    fn test_data_strategy() {
        let data = DiskCacheStrategy::Data;
        assert!(data.is_data_cacheable(DataSource::Local));
        assert!(data.is_data_cacheable(DataSource::Remote));
        assert!(!data.is_data_cacheable(DataSource::DataDiskCache));
        assert!(!data.is_data_cacheable(DataSource::MemoryCache));
        assert!(!data.decode_cached_resource());
        assert!(data.decode_cached_data());
    }

    #[test]
    fn test_decode_flags() {
        let flags = |s: DiskCacheStrategy| (s.decode_cached_resource(), s.decode_cached_data());
        assert_eq!(flags(DiskCacheStrategy::All), (true, true));
        assert_eq!(flags(DiskCacheStrategy::None), (false, false));
        assert_eq!(flags(DiskCacheStrategy::Data), (false, true));
        assert_eq!(flags(DiskCacheStrategy::Resource), (true, false));
        assert_eq!(flags(DiskCacheStrategy::Automatic), (true, true));
    }

    #[test]
    fn test_default_is_automatic() {
        assert_eq!(DiskCacheStrategy::default(), DiskCacheStrategy::Automatic);
    }
}
