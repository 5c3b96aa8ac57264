//! XSLT Transformation Policy - secure XML rewriting for API gateway pipelines
//!
//! This library implements an embeddable transformation policy: request or
//! response bodies are rewritten through configured XSLT stylesheets before
//! they continue down the pipeline. Features include:
//!
//! - **Hardened XML intake**: DOCTYPE declarations rejected by default,
//!   external entities never resolved, element nesting depth bounded
//! - **Content-addressed template cache**: each distinct stylesheet compiles
//!   at most once per SHA-256 fingerprint, even under concurrent first use
//! - **Deterministic output**: results serialize with a fixed three-space
//!   indent, independent of stylesheet output directives
//! - **Late-bound configuration**: stylesheet text and parameter values pass
//!   through the host's expression resolver fresh on every call
//! - **Scope gating**: a policy attaches to the request or the response
//!   phase of an exchange, defaulting to response
//!
//! # Architecture
//!
//! The codebase is organized into five layers:
//!
//! - [`core`]: configuration, error taxonomy, and the expression-resolver seam
//! - [`xml`]: hardened reader, in-memory document model, fixed-format writer
//! - [`xslt`]: stylesheet compiler and interpreter behind a backend trait
//! - [`transformer`]: compiled-template cache and the transformation engine
//! - [`policy`]: the gateway-facing policy object and header finalization
//!
//! # Configuration
//!
//! Each policy instance receives a JSON fragment (see [`XsltPolicyConfig`]).
//! The security posture is read from the node environment, never from the
//! fragment:
//! - `XSLT_SECURE_PROCESSING`: set to `false`, `0`, `no` or `off` (any case)
//!   to accept DOCTYPE declarations with internal entities; external entities
//!   stay disabled. Anything else, including unset, keeps strict processing.

pub mod core;
pub mod policy;
pub mod transformer;
pub mod xml;
pub mod xslt;

// Re-export commonly used types for convenience
pub use crate::core::{
    CompileError, ExpressionError, ExpressionResolver, IdentityResolver, ParseError, PolicyScope,
    Result, RuntimeError, SecurityProfile, TransformError, XsltParameter, XsltPolicyConfig,
};
pub use crate::policy::{finalize_headers, BodyTransform, XsltTransformationPolicy};
pub use crate::transformer::{CacheStats, Fingerprint, TemplateCache, TransformEngine};
pub use crate::xslt::{CompiledStylesheet, ParameterBindings, XsltBackend, XsltProcessor};
