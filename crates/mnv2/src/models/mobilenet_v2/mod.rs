//! # `MobileNetV2` Feature Backbone
//!
//! A `MobileNetV2` trunk which maps ``[batch, 3, height, width]`` images
//! to four feature maps at strides 1/4, 1/8, 1/16 and 1/32.
//!
//! * [`settings`] - the ``(t, c, n, s)`` stage table and width scaling.
//! * [`inverted_residual`] - the inverted residual block.
//! * [`mobilenet_model`] - [`MobileNetV2Config`] / [`MobileNetV2`].
//! * [`init`] - weight (re-)initialization and pretrained loading.
//! * [`backbone`] - the pipeline-facing backbone factory.
//! * [`mobilenet_io`] - ``torch`` checkpoint loading.
//! * [`prefabs`] - well-known configs and pretrained weights.

pub mod backbone;
pub mod init;
pub mod inverted_residual;
pub mod mobilenet_io;
pub mod mobilenet_model;
pub mod prefabs;
pub mod settings;

pub use backbone::{BackboneConfig, build_backbone};
pub use init::WeightInitOptions;
pub use mobilenet_io::CheckpointLayout;
pub use mobilenet_model::{MobileNetV2, MobileNetV2Config, MobileNetV2Features};
pub use prefabs::PREFAB_MOBILENET_V2_MAP;
