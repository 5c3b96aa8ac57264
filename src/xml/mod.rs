//! XML handling: the document model, hardened parsing and serialization.
//!
//! Everything XML-specific lives here; `quick-xml` types never escape this
//! module, so the rest of the crate works against the owned tree model.

pub mod document;
pub mod reader;
pub mod writer;

// Re-export commonly used types
pub use document::{Attribute, NamespaceDecl, NodeId, NodeKind, NodeRef, QName, XmlDocument};
pub use reader::{read_document, read_document_str};
pub use writer::{serialize, OutputOptions};
