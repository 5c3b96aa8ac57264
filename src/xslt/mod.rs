//! Stylesheet compilation and execution.
//!
//! The cache and engine talk to the transformation machinery only through
//! the [`XsltBackend`] / [`CompiledStylesheet`] trait pair, so the built-in
//! interpreter ([`XsltProcessor`]) can be swapped for another engine without
//! touching the orchestration layers.

use std::sync::Arc;

use crate::core::config::SecurityProfile;
use crate::core::error::{CompileError, RuntimeError};
use crate::xml::document::XmlDocument;

pub mod compiler;
pub mod expr;
pub mod interpreter;

// Re-export commonly used types
pub use compiler::Stylesheet;
pub use interpreter::XsltProcessor;

// ============================================================
// Backend traits
// ============================================================

/// Turns stylesheet text into an executable template.
///
/// Compilation parses the stylesheet under the caller's [`SecurityProfile`];
/// a compiled template carries no per-call state and may be shared freely
/// across threads and reused for any number of executions.
pub trait XsltBackend: Send + Sync {
    fn compile(
        &self,
        source: &str,
        profile: SecurityProfile,
    ) -> Result<Arc<dyn CompiledStylesheet>, CompileError>;
}

/// An immutable, reusable compiled template.
///
/// `execute` builds a fresh invocation internally on every call; parameter
/// bindings supplied here never outlive the call.
pub trait CompiledStylesheet: Send + Sync {
    fn execute(
        &self,
        input: &XmlDocument,
        parameters: &ParameterBindings,
    ) -> Result<Vec<u8>, RuntimeError>;
}

// ============================================================
// External parameters
// ============================================================

/// Externally supplied stylesheet parameter values for a single execution.
///
/// Values are plain strings: the hosting gateway resolves its expression
/// language before binding. Rebinding a name replaces the earlier value.
#[derive(Debug, Clone, Default)]
pub struct ParameterBindings {
    values: Vec<(String, String)>,
}

impl ParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.values.retain(|(existing, _)| *existing != name);
        self.values.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}
