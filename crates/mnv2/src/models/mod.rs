//! # Complete Model Families
pub mod mobilenet_v2;
