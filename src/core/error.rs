//! Error types for the transformation policy.
//!
//! Internal stages (parsing, stylesheet compilation, execution) have their own
//! error enums; everything crossing the policy boundary is folded into the
//! unified [`TransformError`], whose message always carries the same prefix so
//! gateway operators can grep for transformation failures.

use thiserror::Error;

/// Prefix carried by every [`TransformError`] message.
pub const MESSAGE_PREFIX: &str = "Unable to apply XSL Transformation: ";

/// Failures while parsing an XML document (input payload or stylesheet text).
#[derive(Error, Debug)]
pub enum ParseError {
    /// A DOCTYPE declaration was found while secure processing is active.
    #[error("DOCTYPE is disallowed when secure processing is enabled")]
    DoctypeDisallowed,

    /// The document is not well-formed XML.
    #[error("malformed XML at byte {offset}: {message}")]
    Syntax { message: String, offset: u64 },

    /// The document is not valid UTF-8.
    #[error("invalid UTF-8 in document: {0}")]
    Encoding(String),

    /// An element or attribute uses a prefix with no in-scope declaration.
    #[error("undeclared namespace prefix '{0}'")]
    UnboundPrefix(String),

    /// Element nesting went past the configured safety limit.
    #[error("element nesting deeper than {0} levels")]
    TooDeep(usize),

    /// Reference to an entity that was never declared (or that secure
    /// processing refuses to resolve).
    #[error("reference to undeclared entity '&{0};'")]
    UndeclaredEntity(String),
}

/// Failures while turning stylesheet text into an executable template.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The stylesheet text is not well-formed XML.
    #[error("stylesheet is not well-formed: {0}")]
    InvalidXml(#[from] ParseError),

    /// The document parsed but its root is not an XSL stylesheet.
    #[error("not an XSL stylesheet: {0}")]
    NotAStylesheet(String),

    /// An element in the XSLT namespace that this engine does not implement.
    #[error("unsupported XSLT instruction 'xsl:{0}'")]
    UnsupportedInstruction(String),

    /// A required attribute is missing from an XSLT instruction.
    #[error("xsl:{element} is missing its '{attribute}' attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    /// An instruction appears somewhere the language does not allow it.
    #[error("invalid stylesheet structure: {0}")]
    Structure(String),

    /// A select/test expression failed to parse.
    #[error("invalid expression '{expression}': {message}")]
    BadExpression {
        expression: String,
        message: String,
    },

    /// A template match pattern failed to parse.
    #[error("invalid match pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },
}

/// Failure reported by the host's expression-language resolver.
#[derive(Error, Debug)]
#[error("expression resolution failed: {0}")]
pub struct ExpressionError(pub String);

/// Failures raised while executing a compiled template.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// Template application recursed past the safety limit.
    #[error("template recursion deeper than {0} levels")]
    RecursionLimit(usize),

    /// `xsl:attribute` fired after child content was already written.
    #[error("cannot add attribute '{0}' after element content has been written")]
    AttributeAfterContent(String),

    /// A `$name` reference with no binding in scope.
    #[error("reference to undefined variable '${0}'")]
    UndefinedVariable(String),

    /// A node-set was required (for-each, count, apply-templates select) but
    /// the expression produced a plain value.
    #[error("expression '{0}' does not evaluate to a node-set")]
    NotANodeSet(String),
}

/// Unified error for the whole transformation pipeline.
///
/// The variant records which stage failed; the rendered message is uniform so
/// the host surfaces one recognizable failure string regardless of cause.
#[derive(Error, Debug)]
pub enum TransformError {
    /// The input payload could not be parsed.
    #[error("Unable to apply XSL Transformation: {0}")]
    Parse(#[from] ParseError),

    /// The stylesheet could not be compiled.
    #[error("Unable to apply XSL Transformation: {0}")]
    Compile(#[from] CompileError),

    /// Compilation succeeded but execution failed.
    #[error("Unable to apply XSL Transformation: {0}")]
    Execute(#[from] RuntimeError),
}

impl From<ExpressionError> for TransformError {
    fn from(err: ExpressionError) -> Self {
        TransformError::Execute(RuntimeError::Expression(err))
    }
}

/// Convenience type alias for Results using [`TransformError`]. The error
/// type stays overridable so stage-specific signatures can reuse it.
pub type Result<T, E = TransformError> = std::result::Result<T, E>;
