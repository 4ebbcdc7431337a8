//! Common low-level modules for building convolutional backbones in Burn.
pub mod blocks;
