//! # Compat Layers
//!
//! Wrappers and helpers that `burn` does not (yet) ship in the shape we need.
pub mod activation_wrapper;
pub mod conv_shape;
