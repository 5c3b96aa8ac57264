//! In-memory XML document model.
//!
//! Documents are flat arenas of nodes indexed by [`NodeId`]; ids are assigned
//! in parse order, so comparing them gives document order. The same tree type
//! backs parsed input documents and the result trees built by the
//! interpreter.

use std::fmt;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Index of a node inside its [`XmlDocument`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Prefix as written in the source, kept for serialization
    pub prefix: Option<String>,
    /// Local part
    pub local: String,
    /// Resolved namespace URI, if any
    pub namespace: Option<String>,
}

impl QName {
    /// Name with no prefix and no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        QName {
            prefix: None,
            local: local.into(),
            namespace: None,
        }
    }

    /// Expanded-name equality: namespace URI plus local part, prefix ignored.
    pub fn matches(&self, namespace: Option<&str>, local: &str) -> bool {
        self.local == local && self.namespace.as_deref() == namespace
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// An attribute (namespace declarations are kept separately).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

/// A namespace declaration appearing on an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    /// `None` for the default namespace (`xmlns=`)
    pub prefix: Option<String>,
    pub uri: String,
}

/// Node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Synthetic root; always node 0, never has a parent
    Document,
    Element {
        name: QName,
        attributes: Vec<Attribute>,
        namespaces: Vec<NamespaceDecl>,
    },
    Text(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

#[derive(Debug, Clone)]
pub struct NodeData {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

/// Reference to either a tree node or one attribute of an element.
///
/// XPath treats attributes as nodes; the arena does not store them as such,
/// so selections carry this two-headed reference instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Node(NodeId),
    Attribute(NodeId, usize),
}

impl NodeRef {
    /// Sort key yielding document order: an element's attributes come after
    /// the element itself and before its first child (children always have
    /// larger ids than their parent).
    pub fn order_key(&self) -> (NodeId, usize) {
        match *self {
            NodeRef::Node(id) => (id, 0),
            NodeRef::Attribute(element, index) => (element, index + 1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct XmlDocument {
    nodes: Vec<NodeData>,
}

impl XmlDocument {
    pub fn new() -> Self {
        XmlDocument {
            nodes: vec![NodeData {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Document,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// First element child of the document node.
    pub fn document_element(&self) -> Option<NodeId> {
        self.nodes[0]
            .children
            .iter()
            .copied()
            .find(|id| matches!(self.kind(*id), NodeKind::Element { .. }))
    }

    /// Append a new node under `parent` and return its id.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Append text under `parent`, merging with a trailing text sibling so
    /// adjacent character data forms a single node.
    pub fn append_text(&mut self, parent: NodeId, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(&last) = self.nodes[parent.0].children.last() {
            if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
                existing.push_str(text);
                return;
            }
        }
        self.append(parent, NodeKind::Text(text.to_string()));
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn kind_mut(&mut self, id: NodeId) -> &mut NodeKind {
        &mut self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_name(&self, id: NodeId) -> Option<&QName> {
        match self.kind(id) {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match self.kind(id) {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    /// XPath string-value of a node: concatenated descendant text for the
    /// document and elements, the content itself for the rest.
    pub fn string_value(&self, node: NodeRef) -> String {
        match node {
            NodeRef::Attribute(element, index) => self.attributes(element)[index].value.clone(),
            NodeRef::Node(id) => match self.kind(id) {
                NodeKind::Document | NodeKind::Element { .. } => {
                    let mut out = String::new();
                    self.collect_text(id, &mut out);
                    out
                }
                NodeKind::Text(text) => text.clone(),
                NodeKind::Comment(text) => text.clone(),
                NodeKind::ProcessingInstruction { data, .. } => data.clone(),
            },
        }
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        for &child in self.children(id) {
            match self.kind(child) {
                NodeKind::Text(text) => out.push_str(text),
                NodeKind::Element { .. } => self.collect_text(child, out),
                _ => {}
            }
        }
    }

    /// Resolve a namespace prefix against the declarations in scope at
    /// `start`, walking ancestors outward. An empty-string declaration
    /// un-binds the prefix.
    pub fn lookup_prefix(&self, start: NodeId, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        let mut current = Some(start);
        while let Some(id) = current {
            if let NodeKind::Element { namespaces, .. } = self.kind(id) {
                if let Some(decl) = namespaces
                    .iter()
                    .rev()
                    .find(|decl| decl.prefix.as_deref() == Some(prefix))
                {
                    return if decl.uri.is_empty() {
                        None
                    } else {
                        Some(&decl.uri)
                    };
                }
            }
            current = self.parent(id);
        }
        None
    }

    /// Deep-copy `source_node` (from another document) as the last child of
    /// `parent`, preserving attributes and namespace declarations.
    pub fn copy_subtree(&mut self, parent: NodeId, source: &XmlDocument, source_node: NodeId) {
        match source.kind(source_node) {
            NodeKind::Document => {
                for &child in source.children(source_node) {
                    self.copy_subtree(parent, source, child);
                }
            }
            NodeKind::Text(text) => self.append_text(parent, text),
            kind => {
                let id = self.append(parent, kind.clone());
                if let NodeKind::Element { .. } = source.kind(source_node) {
                    // a NodeKind holds no children; those live in the
                    // arena's child lists
                    for &child in source.children(source_node) {
                        self.copy_subtree(id, source, child);
                    }
                }
            }
        }
    }
}
