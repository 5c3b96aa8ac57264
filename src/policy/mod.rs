//! Gateway-facing policy surface.
//!
//! [`XsltTransformationPolicy`] is the unit the hosting gateway instantiates
//! per configured policy. For each exchange the gateway offers the policy
//! both phases; when the configured scope matches the phase, the policy hands
//! back a [`BodyTransform`] bound to that exchange, and the gateway invokes
//! it exactly once with the fully buffered body. A phase the policy is not
//! scoped to is declined silently.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::HeaderMap;
use tracing::{debug, info};

use crate::core::config::{PolicyScope, SecurityProfile, XsltParameter, XsltPolicyConfig};
use crate::core::error::Result;
use crate::core::resolver::ExpressionResolver;
use crate::transformer::TransformEngine;

/// `Content-Type` written for transformed bodies.
pub const OUTPUT_CONTENT_TYPE: &str = "application/xml";

/// One configured XSLT transformation policy.
pub struct XsltTransformationPolicy {
    config: XsltPolicyConfig,
    engine: TransformEngine,
}

impl XsltTransformationPolicy {
    pub fn new(config: XsltPolicyConfig, engine: TransformEngine) -> Self {
        info!(
            scope = ?config.scope,
            parameters = config.parameters.len(),
            "XSLT transformation policy created"
        );
        XsltTransformationPolicy { config, engine }
    }

    pub fn config(&self) -> &XsltPolicyConfig {
        &self.config
    }

    /// Offer the request phase. `Some` only for REQUEST-scoped policies.
    pub fn on_request_content(
        &self,
        resolver: Arc<dyn ExpressionResolver>,
    ) -> Option<BodyTransform> {
        self.attach(PolicyScope::Request, resolver)
    }

    /// Offer the response phase. `Some` for RESPONSE-scoped policies, which
    /// is also the default scope.
    pub fn on_response_content(
        &self,
        resolver: Arc<dyn ExpressionResolver>,
    ) -> Option<BodyTransform> {
        self.attach(PolicyScope::Response, resolver)
    }

    fn attach(
        &self,
        phase: PolicyScope,
        resolver: Arc<dyn ExpressionResolver>,
    ) -> Option<BodyTransform> {
        if self.config.scope != phase {
            // a mismatched phase is deliberately a silent no-op
            return None;
        }
        let profile = SecurityProfile::from_env();
        debug!(phase = ?phase, secure = profile.is_secure(), "body transform attached");
        Some(BodyTransform {
            engine: self.engine.clone(),
            stylesheet: self.config.stylesheet.clone(),
            parameters: self.config.parameters.clone(),
            resolver,
            profile,
        })
    }
}

/// One exchange's whole-body transform function.
///
/// Captures a configuration snapshot, the exchange's expression resolver and
/// the security profile resolved at attach time, making [`apply`] a pure
/// bytes-to-bytes call for the rest of the exchange.
///
/// [`apply`]: BodyTransform::apply
pub struct BodyTransform {
    engine: TransformEngine,
    stylesheet: String,
    parameters: Vec<XsltParameter>,
    resolver: Arc<dyn ExpressionResolver>,
    profile: SecurityProfile,
}

impl BodyTransform {
    /// Transform the buffered body. Failures propagate for the gateway to
    /// fail the exchange; nothing is written on error.
    pub fn apply(&self, body: &[u8]) -> Result<Bytes> {
        self.engine.transform(
            body,
            &self.stylesheet,
            &self.parameters,
            self.resolver.as_ref(),
            self.profile,
        )
    }

    pub fn profile(&self) -> SecurityProfile {
        self.profile
    }
}

/// Rewrite exchange headers for a transformed body: the output is XML of a
/// known length, and any chunked transfer coding no longer applies.
pub fn finalize_headers(headers: &mut HeaderMap, body_len: usize) {
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(OUTPUT_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(body_len));
    headers.remove(TRANSFER_ENCODING);
}
