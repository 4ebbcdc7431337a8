//! # Module / Weight Caches
//!
//! * [`disk`] - the read-through disk cache.
//! * [`weights`] - pretrained weight descriptors.
//! * [`prefabs`] - named, well-known model configs.

pub mod disk;
pub mod prefabs;
pub mod weights;
