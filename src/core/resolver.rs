//! Expression-language seam between the policy and its host gateway.
//!
//! Stylesheet text and parameter values in the policy configuration may embed
//! host expression-language snippets (request attributes, headers, context
//! properties). The engine never interprets those itself; it delegates to an
//! [`ExpressionResolver`] supplied per exchange and treats the results as
//! opaque strings.

use crate::core::error::ExpressionError;

/// Resolves host expression-language content to plain strings.
///
/// Both methods are invoked on every transformation; implementations must not
/// memoize across calls, since expressions typically reference per-exchange
/// state.
pub trait ExpressionResolver: Send + Sync {
    /// Render a whole template (the stylesheet source) to its final text.
    fn convert(&self, template: &str) -> Result<String, ExpressionError>;

    /// Evaluate a single value expression (a stylesheet parameter).
    fn evaluate(&self, expression: &str) -> Result<String, ExpressionError>;
}

/// Resolver for deployments without an expression language: every input is
/// returned verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityResolver;

impl ExpressionResolver for IdentityResolver {
    fn convert(&self, template: &str) -> Result<String, ExpressionError> {
        Ok(template.to_string())
    }

    fn evaluate(&self, expression: &str) -> Result<String, ExpressionError> {
        Ok(expression.to_string())
    }
}
