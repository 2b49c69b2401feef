//! Type tags used to index the registry graph.

use std::fmt;

/// Identity of a data, resource or transcode type.
///
/// Tags replace runtime class matching: a decoder is registered for a
/// `(data tag, resource tag)` edge and a transcoder for a
/// `(resource tag, transcode tag)` edge. [`TypeTag::ANY`] is assignable from
/// every other tag and is used as the "no preference" resource hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(&'static str);

impl TypeTag {
    /// Matches every tag.
    pub const ANY: TypeTag = TypeTag("any");
    /// In-memory encoded bytes.
    pub const BYTES: TypeTag = TypeTag("bytes");
    /// A file on local storage.
    pub const FILE: TypeTag = TypeTag("file");
    /// A decoded still image.
    pub const BITMAP: TypeTag = TypeTag("bitmap");
    /// A decoded animated image.
    pub const ANIMATED: TypeTag = TypeTag("animated");
    /// A displayable wrapper around a decoded image.
    pub const DRAWABLE: TypeTag = TypeTag("drawable");

    /// Create a custom tag.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Name of the tag.
    pub const fn name(&self) -> &'static str {
        self.0
    }

    /// True if a value tagged `other` can be used where `self` is expected.
    pub fn is_assignable_from(self, other: TypeTag) -> bool {
        self == Self::ANY || self == other
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_is_assignable_from_everything() {
        assert!(TypeTag::ANY.is_assignable_from(TypeTag::BITMAP));
        assert!(TypeTag::ANY.is_assignable_from(TypeTag::new("custom")));
        assert!(TypeTag::BITMAP.is_assignable_from(TypeTag::BITMAP));
        assert!(!TypeTag::BITMAP.is_assignable_from(TypeTag::ANY));
        assert!(!TypeTag::BITMAP.is_assignable_from(TypeTag::DRAWABLE));
    }

    #[test]
    fn test_custom_tags_compare_by_name() {
        assert_eq!(TypeTag::new("bitmap"), TypeTag::BITMAP);
        assert_eq!(TypeTag::new("svg").to_string(), "svg");
    }
}
