#![warn(missing_docs)]
//!# mnv2 - `MobileNetV2` Feature Backbone for Burn
//!
//! ## Notable Components
//!
//! * [`cache`] - weight loading cache.
//! * [`compat`] - compat code, ported or planned for an upcoming release of ``burn``.
//!   * [`compat::activation_wrapper::Activation`] - activation layer abstraction wrapper.
//!   * [`compat::conv_shape`] - convolution output shape arithmetic.
//! * [`layers`] - reusable neural network modules.
//!   * [`layers::blocks`] - conv blocks.
//!     * [`layers::blocks::conv_norm`] - ``Conv2d + BatchNorm2d`` block.
//!     * [`layers::blocks::cna`] - ``Conv2d + BatchNorm2d + Activation`` block.
//! * [`models`] - complete model families.
//!   * [`models::mobilenet_v2`] - the `MobileNetV2` stride 4/8/16/32 feature backbone.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod cache;
pub mod compat;
pub mod layers;
pub mod models;
