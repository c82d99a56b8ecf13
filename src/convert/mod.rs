// src/convert/mod.rs
//! Capsule conversion pipeline
//!
//! `Detect -> ExtractIR -> EmitNative -> Commit`, with loss tracked at
//! every plugin step.

pub mod detect;
mod loss;
mod pipeline;

pub use detect::{Detection, DetectionSource};
pub use loss::{LossClass, combine_all};
pub use pipeline::{ConversionPipeline, ConversionResult};
