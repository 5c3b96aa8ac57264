//! Result-tree serialization.
//!
//! Output formatting is deliberately not negotiable: every result document is
//! pretty-printed with a fixed three-space indent, whatever the stylesheet's
//! own output directives say. Only `omit-xml-declaration` is honored. This
//! keeps transformed payloads byte-stable across engine upgrades, which
//! downstream consumers have come to rely on.

use quick_xml::escape::{escape, partial_escape};

use crate::xml::document::{NodeId, NodeKind, QName, XmlDocument};

/// Spaces per nesting level.
const INDENT_WIDTH: usize = 3;

/// The honored subset of `xsl:output`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub omit_xml_declaration: bool,
}

/// Serialize a document to UTF-8 bytes.
pub fn serialize(doc: &XmlDocument, options: &OutputOptions) -> Vec<u8> {
    let mut out = String::new();
    if !options.omit_xml_declaration {
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    }
    let mut first = true;
    for &child in doc.children(doc.root()) {
        if is_ignorable_whitespace(doc, child) {
            continue;
        }
        if !first {
            out.push('\n');
        }
        write_node(doc, child, 0, &mut out);
        first = false;
    }
    out.into_bytes()
}

fn write_node(doc: &XmlDocument, id: NodeId, depth: usize, out: &mut String) {
    push_pad(out, depth);
    match doc.kind(id) {
        NodeKind::Document => {}
        NodeKind::Element { name, .. } => write_element(doc, id, name, depth, out),
        NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction { target, data } => write_pi(target, data, out),
    }
}

fn write_element(doc: &XmlDocument, id: NodeId, name: &QName, depth: usize, out: &mut String) {
    write_open_tag(doc, id, name, out);

    let block_children: Vec<NodeId> = doc
        .children(id)
        .iter()
        .copied()
        .filter(|&child| !is_ignorable_whitespace(doc, child))
        .collect();
    if block_children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    if has_significant_text(doc, id) {
        // mixed content: preserve the run verbatim, no added whitespace
        for &child in doc.children(id) {
            write_inline(doc, child, out);
        }
    } else {
        for &child in &block_children {
            out.push('\n');
            write_node(doc, child, depth + 1, out);
        }
        out.push('\n');
        push_pad(out, depth);
    }
    out.push_str("</");
    out.push_str(&name.to_string());
    out.push('>');
}

fn write_inline(doc: &XmlDocument, id: NodeId, out: &mut String) {
    match doc.kind(id) {
        NodeKind::Document => {}
        NodeKind::Element { name, .. } => {
            write_open_tag(doc, id, name, out);
            if doc.children(id).is_empty() {
                out.push_str("/>");
                return;
            }
            out.push('>');
            for &child in doc.children(id) {
                write_inline(doc, child, out);
            }
            out.push_str("</");
            out.push_str(&name.to_string());
            out.push('>');
        }
        NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
        NodeKind::Comment(text) => {
            out.push_str("<!--");
            out.push_str(text);
            out.push_str("-->");
        }
        NodeKind::ProcessingInstruction { target, data } => write_pi(target, data, out),
    }
}

fn write_open_tag(doc: &XmlDocument, id: NodeId, name: &QName, out: &mut String) {
    out.push('<');
    out.push_str(&name.to_string());
    if let NodeKind::Element {
        attributes,
        namespaces,
        ..
    } = doc.kind(id)
    {
        for decl in namespaces {
            match &decl.prefix {
                Some(prefix) => {
                    out.push_str(" xmlns:");
                    out.push_str(prefix);
                }
                None => out.push_str(" xmlns"),
            }
            out.push_str("=\"");
            out.push_str(&escape(decl.uri.as_str()));
            out.push('"');
        }
        for attr in attributes {
            out.push(' ');
            out.push_str(&attr.name.to_string());
            out.push_str("=\"");
            out.push_str(&escape(attr.value.as_str()));
            out.push('"');
        }
    }
}

fn write_pi(target: &str, data: &str, out: &mut String) {
    out.push_str("<?");
    out.push_str(target);
    if !data.is_empty() {
        out.push(' ');
        out.push_str(data);
    }
    out.push_str("?>");
}

fn push_pad(out: &mut String, depth: usize) {
    for _ in 0..depth * INDENT_WIDTH {
        out.push(' ');
    }
}

fn has_significant_text(doc: &XmlDocument, id: NodeId) -> bool {
    doc.children(id)
        .iter()
        .any(|&child| matches!(doc.kind(child), NodeKind::Text(text) if !text.trim().is_empty()))
}

fn is_ignorable_whitespace(doc: &XmlDocument, id: NodeId) -> bool {
    matches!(doc.kind(id), NodeKind::Text(text) if text.trim().is_empty())
}
