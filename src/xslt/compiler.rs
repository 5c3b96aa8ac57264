//! Stylesheet compilation.
//!
//! Compilation parses stylesheet text with the hardened reader, validates the
//! XSLT structure and lowers it to an instruction tree with all expressions,
//! patterns and attribute value templates parsed up front. A compiled
//! [`Stylesheet`] is immutable and shared; execution state lives entirely in
//! the interpreter.

use std::sync::Arc;

use tracing::debug;

use crate::core::config::SecurityProfile;
use crate::core::error::{CompileError, RuntimeError};
use crate::xml::document::{NamespaceDecl, NodeId, NodeKind, NodeRef, QName, XmlDocument};
use crate::xml::reader::read_document_str;
use crate::xml::writer::OutputOptions;
use crate::xslt::expr::{
    parse_expression, parse_pattern, EvalContext, Expr, PathPattern,
};

/// The XSLT namespace; any prefix bound to it is recognized.
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

// ============================================================
// Compiled representation
// ============================================================

/// A compiled, immutable stylesheet.
#[derive(Debug)]
pub struct Stylesheet {
    /// Template rules, one entry per match-pattern alternative, in
    /// declaration order
    pub rules: Vec<TemplateRule>,
    /// Top-level params and variables, in declaration order
    pub globals: Vec<GlobalBinding>,
    pub output: OutputOptions,
}

#[derive(Debug)]
pub struct TemplateRule {
    pub pattern: PathPattern,
    pub priority: f64,
    /// Declaration index; later rules win priority ties
    pub order: usize,
    pub body: Arc<Vec<Instruction>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    Param,
    Variable,
}

#[derive(Debug)]
pub struct GlobalBinding {
    pub kind: GlobalKind,
    pub name: String,
    pub value: BindingValue,
}

/// A variable or parameter default: a select expression, or an instruction
/// body whose string value is taken.
#[derive(Debug)]
pub enum BindingValue {
    Select(Expr),
    Content(Vec<Instruction>),
}

#[derive(Debug)]
pub enum Instruction {
    LiteralElement {
        name: QName,
        namespaces: Vec<NamespaceDecl>,
        attributes: Vec<(QName, AttrTemplate)>,
        body: Vec<Instruction>,
    },
    LiteralText(String),
    ValueOf(Expr),
    ApplyTemplates {
        select: Option<Expr>,
    },
    ForEach {
        select: Expr,
        body: Vec<Instruction>,
    },
    If {
        test: Expr,
        body: Vec<Instruction>,
    },
    Choose {
        whens: Vec<(Expr, Vec<Instruction>)>,
        otherwise: Option<Vec<Instruction>>,
    },
    Copy {
        body: Vec<Instruction>,
    },
    CopyOf(Expr),
    Element {
        name: AttrTemplate,
        namespace: Option<AttrTemplate>,
        /// Prefix bindings in scope at the instruction, for resolving the
        /// computed name at runtime
        scope: Vec<(Option<String>, String)>,
        body: Vec<Instruction>,
    },
    Attribute {
        name: AttrTemplate,
        namespace: Option<AttrTemplate>,
        scope: Vec<(Option<String>, String)>,
        body: Vec<Instruction>,
    },
    Variable {
        name: String,
        value: BindingValue,
    },
}

/// An attribute value template: literal runs and `{expr}` holes.
#[derive(Debug)]
pub struct AttrTemplate {
    parts: Vec<AvtPart>,
}

#[derive(Debug)]
enum AvtPart {
    Literal(String),
    Dynamic(Expr),
}

impl AttrTemplate {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<String, RuntimeError> {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                AvtPart::Literal(text) => out.push_str(text),
                AvtPart::Dynamic(expr) => out.push_str(&expr.evaluate_string(ctx)?),
            }
        }
        Ok(out)
    }
}

// ============================================================
// Compilation
// ============================================================

/// Compile stylesheet text under the given security profile.
pub fn compile(source: &str, profile: SecurityProfile) -> Result<Stylesheet, CompileError> {
    let doc = read_document_str(source, profile)?;
    let root = doc
        .document_element()
        .ok_or_else(|| CompileError::NotAStylesheet("empty document".to_string()))?;

    let compiler = Compiler { doc: &doc };
    let stylesheet = compiler.compile_root(root)?;
    debug!(
        rules = stylesheet.rules.len(),
        globals = stylesheet.globals.len(),
        "compiled stylesheet"
    );
    Ok(stylesheet)
}

struct Compiler<'a> {
    doc: &'a XmlDocument,
}

impl Compiler<'_> {
    fn compile_root(&self, root: NodeId) -> Result<Stylesheet, CompileError> {
        let name = match self.doc.element_name(root) {
            Some(name) => name,
            None => return Err(CompileError::NotAStylesheet("no root element".to_string())),
        };
        let is_xslt_root = name.namespace.as_deref() == Some(XSLT_NAMESPACE)
            && matches!(name.local.as_str(), "stylesheet" | "transform");
        if !is_xslt_root {
            return Err(CompileError::NotAStylesheet(format!(
                "root element is '{}'",
                name
            )));
        }
        if self.attr(root, "version").is_none() {
            return Err(CompileError::MissingAttribute {
                element: "stylesheet",
                attribute: "version",
            });
        }

        let mut rules = Vec::new();
        let mut globals = Vec::new();
        let mut output = OutputOptions::default();
        for &child in self.doc.children(root) {
            match self.doc.kind(child) {
                NodeKind::Text(text) if text.trim().is_empty() => {}
                NodeKind::Text(_) => {
                    return Err(CompileError::Structure(
                        "character data at the stylesheet top level".to_string(),
                    ))
                }
                NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => {}
                NodeKind::Element { name, .. }
                    if name.namespace.as_deref() == Some(XSLT_NAMESPACE) =>
                {
                    match name.local.as_str() {
                        "template" => self.compile_template(child, &mut rules)?,
                        "output" => {
                            // formatting is normalized at serialization time;
                            // only the declaration toggle is honored
                            output.omit_xml_declaration =
                                self.attr(child, "omit-xml-declaration") == Some("yes");
                        }
                        "param" => globals.push(self.compile_global(child, GlobalKind::Param)?),
                        "variable" => {
                            globals.push(self.compile_global(child, GlobalKind::Variable)?)
                        }
                        "import" | "include" => {
                            return Err(CompileError::UnsupportedInstruction(
                                name.local.clone(),
                            ))
                        }
                        other => {
                            return Err(CompileError::UnsupportedInstruction(other.to_string()))
                        }
                    }
                }
                // non-XSLT top-level elements are data, skipped
                NodeKind::Element { .. } => {}
                NodeKind::Document => {}
            }
        }
        Ok(Stylesheet {
            rules,
            globals,
            output,
        })
    }

    fn compile_template(
        &self,
        el: NodeId,
        rules: &mut Vec<TemplateRule>,
    ) -> Result<(), CompileError> {
        let Some(match_value) = self.attr(el, "match") else {
            return Err(CompileError::MissingAttribute {
                element: "template",
                attribute: "match",
            });
        };
        let explicit_priority = match self.attr(el, "priority") {
            Some(raw) => Some(raw.trim().parse::<f64>().map_err(|_| {
                CompileError::BadExpression {
                    expression: raw.to_string(),
                    message: "priority must be a number".to_string(),
                }
            })?),
            None => None,
        };
        let resolve = self.resolver(el);
        let pattern = parse_pattern(match_value, &resolve)?;
        let body = Arc::new(self.compile_body(el)?);
        for alternative in pattern.alternatives {
            let priority = explicit_priority.unwrap_or_else(|| alternative.default_priority());
            rules.push(TemplateRule {
                pattern: alternative,
                priority,
                order: rules.len(),
                body: Arc::clone(&body),
            });
        }
        Ok(())
    }

    fn compile_global(&self, el: NodeId, kind: GlobalKind) -> Result<GlobalBinding, CompileError> {
        let element = match kind {
            GlobalKind::Param => "param",
            GlobalKind::Variable => "variable",
        };
        let name = self
            .attr(el, "name")
            .ok_or(CompileError::MissingAttribute {
                element,
                attribute: "name",
            })?
            .to_string();
        let value = self.compile_binding_value(el, element)?;
        Ok(GlobalBinding { kind, name, value })
    }

    fn compile_binding_value(
        &self,
        el: NodeId,
        element: &'static str,
    ) -> Result<BindingValue, CompileError> {
        match self.attr(el, "select") {
            Some(select) => {
                if self.has_content(el) {
                    return Err(CompileError::Structure(format!(
                        "xsl:{} has both a select attribute and content",
                        element
                    )));
                }
                let resolve = self.resolver(el);
                Ok(BindingValue::Select(parse_expression(select, &resolve)?))
            }
            None => Ok(BindingValue::Content(self.compile_body(el)?)),
        }
    }

    fn compile_body(&self, el: NodeId) -> Result<Vec<Instruction>, CompileError> {
        let mut body = Vec::new();
        for &child in self.doc.children(el) {
            match self.doc.kind(child) {
                NodeKind::Text(text) => {
                    // whitespace-only nodes are stylesheet formatting
                    if !text.trim().is_empty() {
                        body.push(Instruction::LiteralText(text.clone()));
                    }
                }
                NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => {}
                NodeKind::Document => {}
                NodeKind::Element { name, .. } => {
                    if name.namespace.as_deref() == Some(XSLT_NAMESPACE) {
                        body.push(self.compile_instruction(child, &name.local)?);
                    } else {
                        body.push(self.compile_literal_element(child)?);
                    }
                }
            }
        }
        Ok(body)
    }

    fn compile_instruction(&self, el: NodeId, local: &str) -> Result<Instruction, CompileError> {
        match local {
            "value-of" => {
                let select = self.required_attr(el, "value-of", "select")?;
                let resolve = self.resolver(el);
                Ok(Instruction::ValueOf(parse_expression(select, &resolve)?))
            }
            "apply-templates" => {
                for &child in self.doc.children(el) {
                    if let Some(name) = self.doc.element_name(child) {
                        return Err(CompileError::UnsupportedInstruction(name.local.clone()));
                    }
                }
                let select = match self.attr(el, "select") {
                    Some(select) => {
                        let resolve = self.resolver(el);
                        Some(parse_expression(select, &resolve)?)
                    }
                    None => None,
                };
                Ok(Instruction::ApplyTemplates { select })
            }
            "for-each" => {
                let select = self.required_attr(el, "for-each", "select")?;
                let resolve = self.resolver(el);
                Ok(Instruction::ForEach {
                    select: parse_expression(select, &resolve)?,
                    body: self.compile_body(el)?,
                })
            }
            "if" => {
                let test = self.required_attr(el, "if", "test")?;
                let resolve = self.resolver(el);
                Ok(Instruction::If {
                    test: parse_expression(test, &resolve)?,
                    body: self.compile_body(el)?,
                })
            }
            "choose" => self.compile_choose(el),
            "copy" => Ok(Instruction::Copy {
                body: self.compile_body(el)?,
            }),
            "copy-of" => {
                let select = self.required_attr(el, "copy-of", "select")?;
                let resolve = self.resolver(el);
                Ok(Instruction::CopyOf(parse_expression(select, &resolve)?))
            }
            "element" => {
                let name = self.required_attr(el, "element", "name")?;
                Ok(Instruction::Element {
                    name: self.parse_avt(el, name)?,
                    namespace: self.optional_avt(el, "namespace")?,
                    scope: self.in_scope_namespaces(el),
                    body: self.compile_body(el)?,
                })
            }
            "attribute" => {
                let name = self.required_attr(el, "attribute", "name")?;
                Ok(Instruction::Attribute {
                    name: self.parse_avt(el, name)?,
                    namespace: self.optional_avt(el, "namespace")?,
                    scope: self.in_scope_namespaces(el),
                    body: self.compile_body(el)?,
                })
            }
            "text" => Ok(Instruction::LiteralText(
                self.doc.string_value(NodeRef::Node(el)),
            )),
            "variable" => {
                let name = self
                    .attr(el, "name")
                    .ok_or(CompileError::MissingAttribute {
                        element: "variable",
                        attribute: "name",
                    })?
                    .to_string();
                Ok(Instruction::Variable {
                    name,
                    value: self.compile_binding_value(el, "variable")?,
                })
            }
            "param" => Err(CompileError::Structure(
                "xsl:param is only allowed at the stylesheet top level".to_string(),
            )),
            "when" | "otherwise" => Err(CompileError::Structure(format!(
                "xsl:{} is only allowed inside xsl:choose",
                local
            ))),
            "stylesheet" | "transform" | "template" => Err(CompileError::Structure(format!(
                "xsl:{} cannot be nested in a template body",
                local
            ))),
            other => Err(CompileError::UnsupportedInstruction(other.to_string())),
        }
    }

    fn compile_choose(&self, el: NodeId) -> Result<Instruction, CompileError> {
        let mut whens = Vec::new();
        let mut otherwise = None;
        for &child in self.doc.children(el) {
            match self.doc.kind(child) {
                NodeKind::Text(text) if text.trim().is_empty() => {}
                NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => {}
                NodeKind::Element { name, .. }
                    if name.namespace.as_deref() == Some(XSLT_NAMESPACE)
                        && name.local == "when" =>
                {
                    if otherwise.is_some() {
                        return Err(CompileError::Structure(
                            "xsl:when after xsl:otherwise".to_string(),
                        ));
                    }
                    let test = self.required_attr(child, "when", "test")?;
                    let resolve = self.resolver(child);
                    whens.push((parse_expression(test, &resolve)?, self.compile_body(child)?));
                }
                NodeKind::Element { name, .. }
                    if name.namespace.as_deref() == Some(XSLT_NAMESPACE)
                        && name.local == "otherwise" =>
                {
                    if otherwise.is_some() {
                        return Err(CompileError::Structure(
                            "xsl:choose has multiple xsl:otherwise branches".to_string(),
                        ));
                    }
                    otherwise = Some(self.compile_body(child)?);
                }
                _ => {
                    return Err(CompileError::Structure(
                        "xsl:choose may only contain xsl:when and xsl:otherwise".to_string(),
                    ))
                }
            }
        }
        if whens.is_empty() {
            return Err(CompileError::Structure(
                "xsl:choose requires at least one xsl:when".to_string(),
            ));
        }
        Ok(Instruction::Choose { whens, otherwise })
    }

    fn compile_literal_element(&self, el: NodeId) -> Result<Instruction, CompileError> {
        let NodeKind::Element {
            name,
            attributes,
            namespaces,
        } = self.doc.kind(el)
        else {
            return Err(CompileError::Structure("expected an element".to_string()));
        };
        let kept_namespaces: Vec<NamespaceDecl> = namespaces
            .iter()
            .filter(|decl| decl.uri != XSLT_NAMESPACE)
            .cloned()
            .collect();
        let mut compiled_attrs = Vec::new();
        for attr in attributes {
            // xsl:version and friends on literal elements are not copied
            if attr.name.namespace.as_deref() == Some(XSLT_NAMESPACE) {
                continue;
            }
            compiled_attrs.push((attr.name.clone(), self.parse_avt(el, &attr.value)?));
        }
        Ok(Instruction::LiteralElement {
            name: name.clone(),
            namespaces: kept_namespaces,
            attributes: compiled_attrs,
            body: self.compile_body(el)?,
        })
    }

    // ---- helpers ----

    fn attr(&self, el: NodeId, name: &str) -> Option<&str> {
        self.doc
            .attributes(el)
            .iter()
            .find(|attr| attr.name.namespace.is_none() && attr.name.local == name)
            .map(|attr| attr.value.as_str())
    }

    fn required_attr(
        &self,
        el: NodeId,
        element: &'static str,
        attribute: &'static str,
    ) -> Result<&str, CompileError> {
        self.attr(el, attribute)
            .ok_or(CompileError::MissingAttribute { element, attribute })
    }

    fn has_content(&self, el: NodeId) -> bool {
        self.doc.children(el).iter().any(|&child| match self.doc.kind(child) {
            NodeKind::Text(text) => !text.trim().is_empty(),
            NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => false,
            _ => true,
        })
    }

    fn resolver(&self, el: NodeId) -> impl Fn(&str) -> Option<String> + '_ {
        move |prefix| self.doc.lookup_prefix(el, prefix).map(str::to_string)
    }

    fn optional_avt(&self, el: NodeId, name: &str) -> Result<Option<AttrTemplate>, CompileError> {
        match self.attr(el, name) {
            Some(value) => Ok(Some(self.parse_avt(el, value)?)),
            None => Ok(None),
        }
    }

    fn parse_avt(&self, el: NodeId, value: &str) -> Result<AttrTemplate, CompileError> {
        let resolve = self.resolver(el);
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = value.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut source = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        source.push(c);
                    }
                    if !closed {
                        return Err(CompileError::BadExpression {
                            expression: value.to_string(),
                            message: "unterminated '{' in attribute value template".to_string(),
                        });
                    }
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(AvtPart::Dynamic(parse_expression(&source, &resolve)?));
                }
                '}' => {
                    return Err(CompileError::BadExpression {
                        expression: value.to_string(),
                        message: "unmatched '}' in attribute value template".to_string(),
                    })
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        Ok(AttrTemplate { parts })
    }

    /// First-wins prefix bindings visible at `el`, outermost last.
    fn in_scope_namespaces(&self, el: NodeId) -> Vec<(Option<String>, String)> {
        let mut seen: Vec<Option<String>> = Vec::new();
        let mut bindings = Vec::new();
        let mut current = Some(el);
        while let Some(id) = current {
            if let NodeKind::Element { namespaces, .. } = self.doc.kind(id) {
                for decl in namespaces.iter().rev() {
                    if seen.contains(&decl.prefix) {
                        continue;
                    }
                    seen.push(decl.prefix.clone());
                    if !decl.uri.is_empty() {
                        bindings.push((decl.prefix.clone(), decl.uri.clone()));
                    }
                }
            }
            current = self.doc.parent(id);
        }
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> Stylesheet {
        compile(source, SecurityProfile::Secure).unwrap()
    }

    fn wrap(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    #[test]
    fn test_minimal_stylesheet() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="/"><out/></xsl:template>"#,
        ));
        assert_eq!(stylesheet.rules.len(), 1);
        assert!(stylesheet.rules[0].pattern.root);
        assert_eq!(stylesheet.rules[0].priority, -0.5);
    }

    #[test]
    fn test_transform_root_alias() {
        let source = r#"<t:transform version="1.0" xmlns:t="http://www.w3.org/1999/XSL/Transform">
            <t:template match="/"><ok/></t:template>
        </t:transform>"#;
        assert!(compile(source, SecurityProfile::Secure).is_ok());
    }

    #[test]
    fn test_rejects_non_stylesheet_root() {
        let err = compile("<html><body/></html>", SecurityProfile::Secure).unwrap_err();
        assert!(matches!(err, CompileError::NotAStylesheet(msg) if msg.contains("html")));
    }

    #[test]
    fn test_rejects_missing_version() {
        let source = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform"/>"#;
        let err = compile(source, SecurityProfile::Secure).unwrap_err();
        assert!(matches!(
            err,
            CompileError::MissingAttribute {
                attribute: "version",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_xml_is_wrapped() {
        let err = compile("<xsl:stylesheet", SecurityProfile::Secure).unwrap_err();
        assert!(matches!(err, CompileError::InvalidXml(_)));
    }

    #[test]
    fn test_unknown_instruction() {
        let err = compile(
            &wrap(r#"<xsl:template match="/"><xsl:script lang="js"/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedInstruction(name) if name == "script"));
    }

    #[test]
    fn test_value_of_requires_select() {
        let err = compile(
            &wrap(r#"<xsl:template match="/"><xsl:value-of/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::MissingAttribute {
                element: "value-of",
                attribute: "select",
            }
        ));
    }

    #[test]
    fn test_bad_pattern_is_reported() {
        let err = compile(
            &wrap(r#"<xsl:template match="///"><x/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::BadPattern { .. }));
    }

    #[test]
    fn test_union_pattern_produces_one_rule_per_alternative() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="a | b | c"><hit/></xsl:template>"#,
        ));
        assert_eq!(stylesheet.rules.len(), 3);
        assert!(Arc::ptr_eq(
            &stylesheet.rules[0].body,
            &stylesheet.rules[2].body
        ));
    }

    #[test]
    fn test_explicit_priority_overrides_default() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="a" priority="7.5"><hit/></xsl:template>"#,
        ));
        assert_eq!(stylesheet.rules[0].priority, 7.5);
    }

    #[test]
    fn test_output_declaration_toggle() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:output method="xml" indent="no" omit-xml-declaration="yes"/>
               <xsl:template match="/"><x/></xsl:template>"#,
        ));
        assert!(stylesheet.output.omit_xml_declaration);
    }

    #[test]
    fn test_globals_in_declaration_order() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:param name="greeting" select="'hello'"/>
               <xsl:variable name="subject">world</xsl:variable>
               <xsl:template match="/"><x/></xsl:template>"#,
        ));
        assert_eq!(stylesheet.globals.len(), 2);
        assert_eq!(stylesheet.globals[0].kind, GlobalKind::Param);
        assert_eq!(stylesheet.globals[0].name, "greeting");
        assert_eq!(stylesheet.globals[1].kind, GlobalKind::Variable);
    }

    #[test]
    fn test_select_with_content_is_rejected() {
        let err = compile(
            &wrap(r#"<xsl:variable name="v" select="'x'">y</xsl:variable>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Structure(_)));
    }

    #[test]
    fn test_param_in_template_body_is_rejected() {
        let err = compile(
            &wrap(r#"<xsl:template match="/"><xsl:param name="p"/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Structure(_)));
    }

    #[test]
    fn test_when_outside_choose_is_rejected() {
        let err = compile(
            &wrap(r#"<xsl:template match="/"><xsl:when test="true()"/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Structure(_)));
    }

    #[test]
    fn test_choose_with_two_otherwise_is_rejected() {
        let err = compile(
            &wrap(
                r#"<xsl:template match="/"><xsl:choose>
                    <xsl:when test="true()"><a/></xsl:when>
                    <xsl:otherwise><b/></xsl:otherwise>
                    <xsl:otherwise><c/></xsl:otherwise>
                </xsl:choose></xsl:template>"#,
            ),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Structure(_)));
    }

    #[test]
    fn test_whitespace_stripped_but_text_preserved() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="/">
                <out>
                    <xsl:text>  padded  </xsl:text>
                </out>
            </xsl:template>"#,
        ));
        let body = &stylesheet.rules[0].body;
        assert_eq!(body.len(), 1);
        let Instruction::LiteralElement { body: inner, .. } = &body[0] else {
            panic!("expected a literal element");
        };
        assert_eq!(inner.len(), 1);
        assert!(matches!(&inner[0], Instruction::LiteralText(text) if text == "  padded  "));
    }

    #[test]
    fn test_avt_mixing_literals_and_expressions() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="item"><out tag="id-{@id}-{{raw}}"/></xsl:template>"#,
        ));
        let Instruction::LiteralElement { attributes, .. } = &stylesheet.rules[0].body[0] else {
            panic!("expected a literal element");
        };
        let parts = &attributes[0].1.parts;
        assert_eq!(parts.len(), 3);
        assert!(matches!(&parts[0], AvtPart::Literal(text) if text == "id-"));
        assert!(matches!(&parts[1], AvtPart::Dynamic(_)));
        assert!(matches!(&parts[2], AvtPart::Literal(text) if text == "-{raw}"));
    }

    #[test]
    fn test_unterminated_avt_is_rejected() {
        let err = compile(
            &wrap(r#"<xsl:template match="/"><out tag="{oops"/></xsl:template>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::BadExpression { .. }));
    }

    #[test]
    fn test_import_is_unsupported() {
        let err = compile(
            &wrap(r#"<xsl:import href="other.xsl"/>"#),
            SecurityProfile::Secure,
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedInstruction(name) if name == "import"));
    }

    #[test]
    fn test_literal_element_drops_xslt_namespace_declaration() {
        let stylesheet = compile_ok(&wrap(
            r#"<xsl:template match="/"><out xmlns:extra="urn:keep"/></xsl:template>"#,
        ));
        let Instruction::LiteralElement { namespaces, .. } = &stylesheet.rules[0].body[0] else {
            panic!("expected a literal element");
        };
        assert_eq!(namespaces.len(), 1);
        assert_eq!(namespaces[0].uri, "urn:keep");
    }
}
