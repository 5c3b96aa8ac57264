//! Policy configuration.
//!
//! The hosting gateway hands each policy instance its configuration as a JSON
//! fragment taken from the API definition. Security posture is not part of
//! that fragment: it comes from the node environment so operators can relax
//! it per deployment, never per API.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable controlling the XML security posture.
pub const SECURE_PROCESSING_ENV: &str = "XSLT_SECURE_PROCESSING";

/// Configuration of one XSLT transformation policy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XsltPolicyConfig {
    /// Stylesheet source, evaluated through the expression resolver on every
    /// transformation (it may embed dynamic expressions)
    pub stylesheet: String,

    /// Which phase of the exchange the policy applies to
    #[serde(default)]
    pub scope: PolicyScope,

    /// Stylesheet parameters, re-evaluated on every transformation
    #[serde(default)]
    pub parameters: Vec<XsltParameter>,
}

/// Exchange phase a policy is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyScope {
    Request,
    Response,
}

impl Default for PolicyScope {
    fn default() -> Self {
        PolicyScope::Response
    }
}

/// A named stylesheet parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XsltParameter {
    /// Parameter name; entries with a blank name are ignored
    pub name: String,

    /// Value expression; an absent value binds the empty string
    #[serde(default)]
    pub value: Option<String>,
}

impl XsltPolicyConfig {
    /// Parse a policy configuration from its JSON representation.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse XSLT policy configuration")
    }
}

/// XML security posture, resolved from the environment per transformation.
///
/// [`SecurityProfile::Secure`] is the default and rejects DOCTYPE
/// declarations outright, which closes off external entities and external
/// DTD subsets. [`SecurityProfile::Permissive`] accepts DOCTYPEs and
/// internal-subset entities but still performs no network or file I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProfile {
    Secure,
    Permissive,
}

impl SecurityProfile {
    /// Resolve the profile from the node environment.
    pub fn from_env() -> Self {
        Self::from_setting(std::env::var(SECURE_PROCESSING_ENV).ok().as_deref())
    }

    /// Interpret a raw setting value.
    ///
    /// Only an explicit opt-out ("false", "0", "no", "off", any case)
    /// disables secure processing; absent or unrecognized values stay secure.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            Some(raw)
                if matches!(
                    raw.trim().to_lowercase().as_str(),
                    "false" | "0" | "no" | "off"
                ) =>
            {
                SecurityProfile::Permissive
            }
            _ => SecurityProfile::Secure,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, SecurityProfile::Secure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_full_config() {
        let raw = r#"{
            "scope": "REQUEST",
            "stylesheet": "<xsl:stylesheet/>",
            "parameters": [
                {"name": "lang", "value": "en"},
                {"name": "trace-id"}
            ]
        }"#;

        let config = XsltPolicyConfig::from_json(raw).unwrap();
        assert_eq!(config.scope, PolicyScope::Request);
        assert_eq!(config.stylesheet, "<xsl:stylesheet/>");
        assert_eq!(config.parameters.len(), 2);
        assert_eq!(config.parameters[0].value.as_deref(), Some("en"));
        assert_eq!(config.parameters[1].value, None);
    }

    #[test]
    fn test_scope_defaults_to_response() {
        let raw = r#"{"stylesheet": "<xsl:stylesheet/>"}"#;
        let config = XsltPolicyConfig::from_json(raw).unwrap();
        assert_eq!(config.scope, PolicyScope::Response);
        assert!(config.parameters.is_empty());
    }

    #[test]
    fn test_invalid_json_carries_context() {
        let err = XsltPolicyConfig::from_json("not json").unwrap_err();
        assert!(err.to_string().contains("XSLT policy configuration"));
    }

    #[test]
    fn test_profile_from_setting() {
        assert_eq!(
            SecurityProfile::from_setting(None),
            SecurityProfile::Secure
        );
        assert_eq!(
            SecurityProfile::from_setting(Some("true")),
            SecurityProfile::Secure
        );
        assert_eq!(
            SecurityProfile::from_setting(Some("garbage")),
            SecurityProfile::Secure
        );
        assert_eq!(
            SecurityProfile::from_setting(Some("false")),
            SecurityProfile::Permissive
        );
        assert_eq!(
            SecurityProfile::from_setting(Some("FALSE")),
            SecurityProfile::Permissive
        );
        assert_eq!(
            SecurityProfile::from_setting(Some(" off ")),
            SecurityProfile::Permissive
        );
        assert_eq!(
            SecurityProfile::from_setting(Some("0")),
            SecurityProfile::Permissive
        );
    }

    #[test]
    #[serial]
    fn test_profile_from_env() {
        std::env::remove_var(SECURE_PROCESSING_ENV);
        assert!(SecurityProfile::from_env().is_secure());

        std::env::set_var(SECURE_PROCESSING_ENV, "false");
        assert!(!SecurityProfile::from_env().is_secure());

        std::env::set_var(SECURE_PROCESSING_ENV, "yes please");
        assert!(SecurityProfile::from_env().is_secure());

        std::env::remove_var(SECURE_PROCESSING_ENV);
    }
}
