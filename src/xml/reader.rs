//! Hardened XML parsing.
//!
//! Every document the engine touches, payload or stylesheet, comes through
//! [`read_document`]. The active [`SecurityProfile`] decides how hostile
//! input is treated:
//!
//! - `Secure` (the default): any DOCTYPE declaration aborts the parse, which
//!   rules out external entities, external DTD subsets and entity-expansion
//!   tricks wholesale; element nesting is capped.
//! - `Permissive`: DOCTYPEs are accepted and internal-subset `<!ENTITY>`
//!   declarations are honored, but external entities resolve to the empty
//!   string. The parser never performs file or network I/O in either mode.
//!
//! Parsing is namespace-aware in both modes; a prefix without an in-scope
//! declaration is an error, not a pass-through.

use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use tracing::trace;

use crate::core::config::SecurityProfile;
use crate::core::error::ParseError;
use crate::xml::document::{
    Attribute, NamespaceDecl, NodeId, NodeKind, QName, XmlDocument, XML_NAMESPACE,
};

/// Maximum open-element depth accepted under the secure profile.
const MAX_ELEMENT_DEPTH: usize = 512;

/// Cap on the total expanded size of declared entity values (permissive
/// profile), so chained declarations cannot snowball.
const MAX_ENTITY_TABLE_BYTES: usize = 64 * 1024;

static ENTITY_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<!ENTITY\s+(?P<pe>%\s+)?(?P<name>[^\s>]+)\s+(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<ext>(?:SYSTEM|PUBLIC)[^>]*))\s*>"#,
    )
    .unwrap()
});

/// Parse a raw payload into a document tree under the given profile.
///
/// The payload must be UTF-8 (a leading BOM is tolerated); a declared
/// encoding other than UTF-8 is rejected rather than silently misread.
pub fn read_document(bytes: &[u8], profile: SecurityProfile) -> Result<XmlDocument, ParseError> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(bytes);
    let text =
        std::str::from_utf8(bytes).map_err(|err| ParseError::Encoding(err.to_string()))?;
    read_document_str(text, profile)
}

/// Parse already-decoded text into a document tree under the given profile.
pub fn read_document_str(
    text: &str,
    profile: SecurityProfile,
) -> Result<XmlDocument, ParseError> {
    let mut builder = TreeBuilder::new(profile);

    // The event reader ends a DocType event at the first `>`, which tears
    // apart internal subsets whose entity values contain one. Any DOCTYPE is
    // carved out of the prolog here, before the reader sees the text.
    let text = match scan_prolog_doctype(text) {
        DoctypeScan::None => Cow::Borrowed(text),
        DoctypeScan::Unterminated(offset) => {
            if profile.is_secure() {
                return Err(ParseError::DoctypeDisallowed);
            }
            return Err(ParseError::Syntax {
                message: "unterminated DOCTYPE declaration".to_string(),
                offset,
            });
        }
        DoctypeScan::Declaration(span) => {
            builder.doctype(&text[span.clone()], span.start as u64)?;
            // blanked out in place so later error offsets still line up
            // with the caller's payload
            let mut scrubbed = String::with_capacity(text.len());
            scrubbed.push_str(&text[..span.start]);
            scrubbed.extend(std::iter::repeat(' ').take(span.len()));
            scrubbed.push_str(&text[span.end..]);
            Cow::Owned(scrubbed)
        }
    };

    let mut reader = Reader::from_str(&text);
    reader.config_mut().trim_text(false);

    loop {
        let offset = reader.buffer_position() as u64;
        match reader.read_event() {
            Err(err) => {
                return Err(ParseError::Syntax {
                    message: err.to_string(),
                    offset: reader.buffer_position() as u64,
                })
            }
            Ok(Event::Decl(decl)) => {
                if let Some(encoding) = decl.encoding() {
                    let encoding = encoding.map_err(|err| ParseError::Syntax {
                        message: err.to_string(),
                        offset,
                    })?;
                    if !encoding.eq_ignore_ascii_case(b"utf-8") {
                        return Err(ParseError::Encoding(format!(
                            "declared encoding '{}' is not supported, only UTF-8",
                            String::from_utf8_lossy(&encoding)
                        )));
                    }
                }
            }
            Ok(Event::DocType(_)) => {
                // anything still reaching this arm sits outside the prolog
                // or is too mangled for the scan to recognize
                if profile.is_secure() {
                    return Err(ParseError::DoctypeDisallowed);
                }
                return Err(ParseError::Syntax {
                    message: "unexpected DOCTYPE declaration".to_string(),
                    offset,
                });
            }
            Ok(Event::Start(start)) => builder.start_element(&start, offset, false)?,
            Ok(Event::Empty(start)) => builder.start_element(&start, offset, true)?,
            Ok(Event::End(_)) => builder.end_element(),
            Ok(Event::Text(text)) => {
                let raw = std::str::from_utf8(text.as_ref())
                    .map_err(|err| ParseError::Encoding(err.to_string()))?;
                builder.text(raw, offset)?;
            }
            Ok(Event::CData(data)) => {
                let raw = std::str::from_utf8(&data)
                    .map_err(|err| ParseError::Encoding(err.to_string()))?;
                builder.raw_text(raw, offset)?;
            }
            Ok(Event::Comment(comment)) => {
                let raw = std::str::from_utf8(comment.as_ref())
                    .map_err(|err| ParseError::Encoding(err.to_string()))?;
                builder.comment(raw);
            }
            Ok(Event::PI(pi)) => {
                let raw = std::str::from_utf8(&pi)
                    .map_err(|err| ParseError::Encoding(err.to_string()))?;
                builder.processing_instruction(raw);
            }
            Ok(Event::Eof) => break,
        }
    }
    builder.finish(reader.buffer_position() as u64)
}

/// Outcome of scanning the prolog for a DOCTYPE declaration.
enum DoctypeScan {
    None,
    /// Byte span of the whole declaration, `<!DOCTYPE` through its `>`.
    Declaration(Range<usize>),
    /// A declaration starts at this offset but never closes.
    Unterminated(u64),
}

/// Locate the DOCTYPE declaration in the document prolog, if there is one.
///
/// Only the prolog is searched: the XML declaration, comments, processing
/// instructions and whitespace are stepped over, and anything else ends the
/// scan. The closing `>` is found with the quoted literals and the `[...]`
/// internal subset taken into account, so a `>` inside an entity value does
/// not end the declaration early.
fn scan_prolog_doctype(text: &str) -> DoctypeScan {
    let bytes = text.as_bytes();
    let mut pos = 0usize;
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let rest = &text[pos..];
        if rest.starts_with("<?") {
            match rest.find("?>") {
                Some(end) => pos += end + 2,
                None => return DoctypeScan::None,
            }
        } else if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => pos += end + 3,
                None => return DoctypeScan::None,
            }
        } else if rest.starts_with("<!DOCTYPE")
            && rest[9..].starts_with(|c: char| c.is_ascii_whitespace())
        {
            break;
        } else {
            return DoctypeScan::None;
        }
    }

    let start = pos;
    let mut quote: Option<u8> = None;
    let mut subset_depth = 0usize;
    for (i, &byte) in bytes[start..].iter().enumerate() {
        match quote {
            Some(open) => {
                if byte == open {
                    quote = None;
                }
            }
            None => match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'[' => subset_depth += 1,
                b']' => subset_depth = subset_depth.saturating_sub(1),
                b'>' if subset_depth == 0 => {
                    return DoctypeScan::Declaration(start..start + i + 1);
                }
                _ => {}
            },
        }
    }
    DoctypeScan::Unterminated(start as u64)
}

struct TreeBuilder {
    doc: XmlDocument,
    open: Vec<NodeId>,
    /// One frame of (prefix, uri) bindings per open element; an empty uri
    /// un-declares the binding
    scopes: Vec<Vec<(Option<String>, String)>>,
    entities: HashMap<String, String>,
    profile: SecurityProfile,
}

impl TreeBuilder {
    fn new(profile: SecurityProfile) -> Self {
        let doc = XmlDocument::new();
        let root = doc.root();
        TreeBuilder {
            doc,
            open: vec![root],
            scopes: Vec::new(),
            entities: HashMap::new(),
            profile,
        }
    }

    fn current(&self) -> NodeId {
        *self.open.last().unwrap_or(&NodeId(0))
    }

    fn at_document_level(&self) -> bool {
        self.open.len() == 1
    }

    fn doctype(&mut self, raw: &str, offset: u64) -> Result<(), ParseError> {
        if self.profile.is_secure() {
            return Err(ParseError::DoctypeDisallowed);
        }
        // Internal-subset general entities only; parameter entities are
        // skipped and external entities neutralize to the empty string.
        let mut table_bytes = 0usize;
        for decl in ENTITY_DECL.captures_iter(raw) {
            if decl.name("pe").is_some() {
                continue;
            }
            let name = decl["name"].to_string();
            let value = if decl.name("ext").is_some() {
                String::new()
            } else {
                let raw_value = decl
                    .name("dq")
                    .or_else(|| decl.name("sq"))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                // one level of substitution against earlier declarations
                unescape_with(raw_value, |entity| {
                    resolve_predefined_entity(entity)
                        .or_else(|| self.entities.get(entity).map(String::as_str))
                })
                .map(Cow::into_owned)
                .unwrap_or_else(|_| raw_value.to_string())
            };
            table_bytes += value.len();
            if table_bytes > MAX_ENTITY_TABLE_BYTES {
                return Err(ParseError::Syntax {
                    message: "entity declarations expand beyond the allowed size".to_string(),
                    offset,
                });
            }
            trace!(entity = %name, bytes = value.len(), "declared general entity");
            self.entities.insert(name, value);
        }
        Ok(())
    }

    fn start_element(
        &mut self,
        start: &BytesStart<'_>,
        offset: u64,
        self_closing: bool,
    ) -> Result<(), ParseError> {
        if self.profile.is_secure() && self.open.len() > MAX_ELEMENT_DEPTH {
            return Err(ParseError::TooDeep(MAX_ELEMENT_DEPTH));
        }
        if self.at_document_level() && self.doc.document_element().is_some() {
            return Err(ParseError::Syntax {
                message: "content after the document element".to_string(),
                offset,
            });
        }

        // Namespace declarations first so they are in scope for the element
        // and its other attributes.
        let mut frame: Vec<(Option<String>, String)> = Vec::new();
        let mut declarations: Vec<NamespaceDecl> = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| ParseError::Syntax {
                message: err.to_string(),
                offset,
            })?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|err| ParseError::Encoding(err.to_string()))?;
            let raw_value = std::str::from_utf8(&attr.value)
                .map_err(|err| ParseError::Encoding(err.to_string()))?;
            let (prefix, rest) = split_name(key);
            let declared = match (prefix, rest) {
                (None, "xmlns") => Some(None),
                (Some("xmlns"), local) => Some(Some(local.to_string())),
                _ => None,
            };
            if let Some(bound_prefix) = declared {
                let uri = self.unescape(raw_value, offset)?.into_owned();
                declarations.push(NamespaceDecl {
                    prefix: bound_prefix.clone(),
                    uri: uri.clone(),
                });
                frame.push((bound_prefix, uri));
            }
        }
        self.scopes.push(frame);

        let name = start.name();
        let name_raw = std::str::from_utf8(name.as_ref())
            .map_err(|err| ParseError::Encoding(err.to_string()))?;
        let (prefix, local) = split_name(name_raw);
        let namespace = self.resolve_prefix(prefix, true)?;
        let name = QName {
            prefix: prefix.map(str::to_string),
            local: local.to_string(),
            namespace,
        };

        let mut attributes: Vec<Attribute> = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|err| ParseError::Syntax {
                message: err.to_string(),
                offset,
            })?;
            let key = std::str::from_utf8(attr.key.as_ref())
                .map_err(|err| ParseError::Encoding(err.to_string()))?;
            let (prefix, local) = split_name(key);
            if local == "xmlns" && prefix.is_none() || prefix == Some("xmlns") {
                continue;
            }
            let raw_value = std::str::from_utf8(&attr.value)
                .map_err(|err| ParseError::Encoding(err.to_string()))?;
            let value = self.unescape(raw_value, offset)?.into_owned();
            // unprefixed attributes live in no namespace
            let namespace = match prefix {
                Some(_) => self.resolve_prefix(prefix, false)?,
                None => None,
            };
            attributes.push(Attribute {
                name: QName {
                    prefix: prefix.map(str::to_string),
                    local: local.to_string(),
                    namespace,
                },
                value,
            });
        }

        let parent = self.current();
        let id = self.doc.append(
            parent,
            NodeKind::Element {
                name,
                attributes,
                namespaces: declarations,
            },
        );
        if self_closing {
            self.scopes.pop();
        } else {
            self.open.push(id);
        }
        Ok(())
    }

    fn end_element(&mut self) {
        // mismatched names are already rejected by the event reader
        if self.open.len() > 1 {
            self.open.pop();
            self.scopes.pop();
        }
    }

    fn text(&mut self, raw: &str, offset: u64) -> Result<(), ParseError> {
        let unescaped = self.unescape(raw, offset)?;
        self.raw_text(&unescaped, offset)
    }

    fn raw_text(&mut self, text: &str, offset: u64) -> Result<(), ParseError> {
        if self.at_document_level() {
            if text.trim().is_empty() {
                return Ok(());
            }
            return Err(ParseError::Syntax {
                message: "character data outside the document element".to_string(),
                offset,
            });
        }
        let parent = self.current();
        self.doc.append_text(parent, text);
        Ok(())
    }

    fn comment(&mut self, text: &str) {
        let parent = self.current();
        self.doc.append(parent, NodeKind::Comment(text.to_string()));
    }

    fn processing_instruction(&mut self, raw: &str) {
        let (target, data) = match raw.split_once(char::is_whitespace) {
            Some((target, data)) => (target, data.trim_start()),
            None => (raw, ""),
        };
        let parent = self.current();
        self.doc.append(
            parent,
            NodeKind::ProcessingInstruction {
                target: target.to_string(),
                data: data.to_string(),
            },
        );
    }

    fn finish(self, offset: u64) -> Result<XmlDocument, ParseError> {
        if self.open.len() > 1 {
            return Err(ParseError::Syntax {
                message: format!("unexpected end of document, {} unclosed element(s)", self.open.len() - 1),
                offset,
            });
        }
        if self.doc.document_element().is_none() {
            return Err(ParseError::Syntax {
                message: "no document element".to_string(),
                offset,
            });
        }
        Ok(self.doc)
    }

    /// Expand character and entity references in text or attribute content.
    ///
    /// Under the secure profile no custom entities exist, so anything beyond
    /// the predefined five is reported as undeclared.
    fn unescape<'a>(&self, raw: &'a str, offset: u64) -> Result<Cow<'a, str>, ParseError> {
        let mut missing: Option<String> = None;
        let result = unescape_with(raw, |entity| {
            let resolved = resolve_predefined_entity(entity)
                .or_else(|| self.entities.get(entity).map(String::as_str));
            if resolved.is_none() {
                missing = Some(entity.to_string());
            }
            resolved
        });
        match result {
            Ok(text) => Ok(text),
            Err(err) => Err(match missing {
                Some(entity) => ParseError::UndeclaredEntity(entity),
                None => ParseError::Syntax {
                    message: err.to_string(),
                    offset,
                },
            }),
        }
    }

    fn resolve_prefix(
        &self,
        prefix: Option<&str>,
        use_default: bool,
    ) -> Result<Option<String>, ParseError> {
        match prefix {
            Some("xml") => Ok(Some(XML_NAMESPACE.to_string())),
            Some(prefix) => {
                for frame in self.scopes.iter().rev() {
                    for (bound, uri) in frame.iter().rev() {
                        if bound.as_deref() == Some(prefix) {
                            if uri.is_empty() {
                                return Err(ParseError::UnboundPrefix(prefix.to_string()));
                            }
                            return Ok(Some(uri.clone()));
                        }
                    }
                }
                Err(ParseError::UnboundPrefix(prefix.to_string()))
            }
            None if use_default => {
                for frame in self.scopes.iter().rev() {
                    for (bound, uri) in frame.iter().rev() {
                        if bound.is_none() {
                            return Ok(if uri.is_empty() { None } else { Some(uri.clone()) });
                        }
                    }
                }
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

fn split_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}
