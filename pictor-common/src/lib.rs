//! Common types shared across the pictor image loading engine.
//!
//! This crate provides the vocabulary used by every other crate in the workspace:
//! - [`TypeTag`] - identity of a data, resource or transcode type in the registry graph
//! - [`Model`] - what a request loads (URL, file, bytes, asset)
//! - [`DataSource`] / [`EncodeStrategy`] / [`Priority`] - pipeline enums
//! - [`Data`] - raw fetched data handed to decoders
//! - [`Resource`] - a recyclable, lockable handle to a decoded payload

pub mod data;
pub mod model;
pub mod resource;
pub mod source;
pub mod tag;

pub use data::Data;
pub use model::{Model, ModelKind, Options, Signature, SourceKey};
pub use resource::{LockedResource, Payload, Resource};
pub use source::{DataSource, EncodeStrategy, Priority};
pub use tag::TypeTag;

/// Requests the original dimension of the source instead of a target size.
pub const SIZE_ORIGINAL: u32 = u32::MAX;
