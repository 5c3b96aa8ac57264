//! Transformation pipeline: template cache and engine.
//!
//! The [`TemplateCache`] holds compiled stylesheets keyed by content
//! fingerprint; the [`TransformEngine`] drives one whole-body transformation
//! per call on top of it. Both are shared across exchanges behind `Arc` and
//! carry no per-call state.

pub mod cache;
pub mod engine;

pub use cache::{CacheStats, Fingerprint, TemplateCache};
pub use engine::TransformEngine;
