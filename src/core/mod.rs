//! Core functionality for the transformation policy.
//!
//! This module contains fundamental components used throughout the crate:
//! - Policy configuration and security posture
//! - Error handling
//! - The host expression-language seam

pub mod config;
pub mod error;
pub mod resolver;

// Re-export commonly used types
pub use config::{PolicyScope, SecurityProfile, XsltParameter, XsltPolicyConfig};
pub use error::{
    CompileError, ExpressionError, ParseError, Result, RuntimeError, TransformError,
};
pub use resolver::{ExpressionResolver, IdentityResolver};
