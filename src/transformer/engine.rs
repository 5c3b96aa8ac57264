//! Transformation orchestration.
//!
//! One engine instance serves every in-flight exchange; calls run on the
//! caller's thread and share nothing but the template cache. Each call gets a
//! fresh parse of the input, fresh parameter bindings and a fresh execution,
//! so no state leaks between exchanges.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::core::config::{SecurityProfile, XsltParameter};
use crate::core::error::Result;
use crate::core::resolver::ExpressionResolver;
use crate::transformer::cache::TemplateCache;
use crate::xml::reader::read_document;
use crate::xslt::ParameterBindings;

/// Stateless transformation front end over a shared [`TemplateCache`].
#[derive(Debug, Clone)]
pub struct TransformEngine {
    cache: Arc<TemplateCache>,
}

impl TransformEngine {
    pub fn new(cache: Arc<TemplateCache>) -> Self {
        TransformEngine { cache }
    }

    pub fn cache(&self) -> &TemplateCache {
        &self.cache
    }

    /// Run one whole-body transformation.
    ///
    /// The stylesheet template and every configured parameter value go
    /// through `resolver` on every call; nothing resolved here is ever
    /// memoized, because expressions see per-exchange state. Any failure —
    /// resolution, compilation, input parsing, execution — surfaces as a
    /// [`TransformError`](crate::core::error::TransformError).
    pub fn transform(
        &self,
        input: &[u8],
        stylesheet_template: &str,
        parameters: &[XsltParameter],
        resolver: &dyn ExpressionResolver,
        profile: SecurityProfile,
    ) -> Result<Bytes> {
        let stylesheet = resolver.convert(stylesheet_template)?;
        let template = self.cache.get_or_compile(&stylesheet, profile)?;
        let document = read_document(input, profile)?;

        let mut bindings = ParameterBindings::new();
        for parameter in parameters {
            if parameter.name.trim().is_empty() {
                continue;
            }
            let value = match &parameter.value {
                Some(expression) => resolver.evaluate(expression)?,
                None => String::new(),
            };
            bindings.bind(parameter.name.clone(), value);
        }

        let output = template.execute(&document, &bindings)?;
        debug!(
            input_bytes = input.len(),
            output_bytes = output.len(),
            parameters = bindings.len(),
            "transformation complete"
        );
        Ok(Bytes::from(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{ExpressionError, MESSAGE_PREFIX, TransformError};
    use crate::core::resolver::IdentityResolver;
    use crate::xslt::XsltProcessor;
    use std::sync::atomic::{AtomicU64, Ordering};

    const STYLESHEET: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
    <xsl:param name="label" select="'unset'"/>
    <xsl:template match="/">
        <wrapped label="{$label}"><xsl:value-of select="payload"/></wrapped>
    </xsl:template>
</xsl:stylesheet>"#;

    fn engine() -> TransformEngine {
        TransformEngine::new(Arc::new(TemplateCache::new(Arc::new(XsltProcessor::new()))))
    }

    struct SequenceResolver {
        evaluations: AtomicU64,
    }

    impl SequenceResolver {
        fn new() -> Self {
            SequenceResolver {
                evaluations: AtomicU64::new(0),
            }
        }
    }

    impl ExpressionResolver for SequenceResolver {
        fn convert(&self, template: &str) -> Result<String, ExpressionError> {
            Ok(template.to_string())
        }

        fn evaluate(&self, _expression: &str) -> Result<String, ExpressionError> {
            let n = self.evaluations.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n.to_string())
        }
    }

    struct BrokenResolver;

    impl ExpressionResolver for BrokenResolver {
        fn convert(&self, _template: &str) -> Result<String, ExpressionError> {
            Err(ExpressionError("no such context property".to_string()))
        }

        fn evaluate(&self, _expression: &str) -> Result<String, ExpressionError> {
            Err(ExpressionError("no such context property".to_string()))
        }
    }

    fn param(name: &str, value: Option<&str>) -> XsltParameter {
        XsltParameter {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn test_transform_binds_configured_parameters() {
        let output = engine()
            .transform(
                b"<payload>data</payload>",
                STYLESHEET,
                &[param("label", Some("tagged"))],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
            .unwrap();
        let text = String::from_utf8(output.to_vec()).unwrap();
        assert!(text.contains(r#"<wrapped label="tagged">data</wrapped>"#));
    }

    #[test]
    fn test_parameters_are_resolved_fresh_per_call() {
        let engine = engine();
        let resolver = SequenceResolver::new();
        let parameters = [param("label", Some("ctx.counter"))];

        for expected in ["1", "2"] {
            let output = engine
                .transform(
                    b"<payload>x</payload>",
                    STYLESHEET,
                    &parameters,
                    &resolver,
                    SecurityProfile::Secure,
                )
                .unwrap();
            let text = String::from_utf8(output.to_vec()).unwrap();
            assert!(text.contains(&format!("label=\"{}\"", expected)));
        }
        assert_eq!(resolver.evaluations.load(Ordering::SeqCst), 2);
        // both calls reused one compiled template
        assert_eq!(engine.cache().stats().compilations, 1);
    }

    #[test]
    fn test_blank_parameter_names_are_skipped() {
        let resolver = SequenceResolver::new();
        let output = engine()
            .transform(
                b"<payload>x</payload>",
                STYLESHEET,
                &[param("", Some("a")), param("   ", Some("b"))],
                &resolver,
                SecurityProfile::Secure,
            )
            .unwrap();
        let text = String::from_utf8(output.to_vec()).unwrap();
        assert!(text.contains(r#"label="unset""#));
        assert_eq!(resolver.evaluations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parameter_without_value_binds_empty_string() {
        let output = engine()
            .transform(
                b"<payload>x</payload>",
                STYLESHEET,
                &[param("label", None)],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
            .unwrap();
        let text = String::from_utf8(output.to_vec()).unwrap();
        assert!(text.contains(r#"label="""#));
    }

    #[test]
    fn test_broken_stylesheet_reports_prefixed_compile_error() {
        let err = engine()
            .transform(
                b"<payload>x</payload>",
                "<xsl:stylesheet",
                &[],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
            .unwrap_err();
        assert!(matches!(err, TransformError::Compile(_)));
        assert!(err.to_string().starts_with(MESSAGE_PREFIX));
    }

    #[test]
    fn test_malformed_input_reports_prefixed_parse_error() {
        let err = engine()
            .transform(
                b"<payload>never closed",
                STYLESHEET,
                &[],
                &IdentityResolver,
                SecurityProfile::Secure,
            )
            .unwrap_err();
        assert!(matches!(err, TransformError::Parse(_)));
        assert!(err.to_string().starts_with(MESSAGE_PREFIX));
    }

    #[test]
    fn test_resolver_failure_is_unified() {
        let err = engine()
            .transform(
                b"<payload>x</payload>",
                STYLESHEET,
                &[],
                &BrokenResolver,
                SecurityProfile::Secure,
            )
            .unwrap_err();
        assert!(err.to_string().starts_with(MESSAGE_PREFIX));
        assert!(err.to_string().contains("no such context property"));
    }
}
