//! The built-in template interpreter.
//!
//! Executes a compiled [`Stylesheet`] against a parsed input document,
//! building the result tree in a fresh arena. Every execution starts from a
//! clean variable environment, so one compiled template can serve any number
//! of concurrent callers.

use std::sync::Arc;

use tracing::trace;

use crate::core::config::SecurityProfile;
use crate::core::error::{CompileError, RuntimeError};
use crate::xml::document::{
    Attribute, NamespaceDecl, NodeId, NodeKind, NodeRef, QName, XmlDocument, XML_NAMESPACE,
};
use crate::xml::writer::serialize;
use crate::xslt::compiler::{
    self, BindingValue, GlobalKind, Instruction, Stylesheet, TemplateRule,
};
use crate::xslt::expr::{EvalContext, Expr, Value, Variables};
use crate::xslt::{CompiledStylesheet, ParameterBindings, XsltBackend};

/// Template nesting bound; crossing it aborts the execution instead of
/// blowing the stack on self-recursive rules.
const MAX_TEMPLATE_DEPTH: usize = 256;

/// The built-in XSLT backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct XsltProcessor;

impl XsltProcessor {
    pub fn new() -> Self {
        XsltProcessor
    }
}

impl XsltBackend for XsltProcessor {
    fn compile(
        &self,
        source: &str,
        profile: SecurityProfile,
    ) -> Result<Arc<dyn CompiledStylesheet>, CompileError> {
        let stylesheet = compiler::compile(source, profile)?;
        Ok(Arc::new(CompiledProgram { stylesheet }))
    }
}

struct CompiledProgram {
    stylesheet: Stylesheet,
}

impl CompiledStylesheet for CompiledProgram {
    fn execute(
        &self,
        input: &XmlDocument,
        parameters: &ParameterBindings,
    ) -> Result<Vec<u8>, RuntimeError> {
        let mut execution = Execution {
            source: input,
            stylesheet: &self.stylesheet,
            variables: Variables::new(),
            depth: 0,
        };
        execution.bind_globals(parameters)?;

        let mut out = XmlDocument::new();
        let root = out.root();
        execution.apply_templates(&[NodeRef::Node(input.root())], &mut out, root)?;
        Ok(serialize(&out, &self.stylesheet.output))
    }
}

// ============================================================
// Execution state
// ============================================================

struct Execution<'a> {
    source: &'a XmlDocument,
    stylesheet: &'a Stylesheet,
    variables: Variables,
    depth: usize,
}

impl<'a> Execution<'a> {
    fn ctx(&self, node: NodeRef) -> EvalContext<'_> {
        EvalContext {
            doc: self.source,
            node,
            variables: &self.variables,
        }
    }

    /// Evaluate top-level params and variables in declaration order; an
    /// externally bound parameter wins over its default.
    fn bind_globals(&mut self, parameters: &ParameterBindings) -> Result<(), RuntimeError> {
        for global in &self.stylesheet.globals {
            let external = match global.kind {
                GlobalKind::Param => parameters.get(&global.name),
                GlobalKind::Variable => None,
            };
            let value = match external {
                Some(supplied) => Value::Str(supplied.to_string()),
                None => self.binding_value(&global.value, NodeRef::Node(self.source.root()))?,
            };
            self.variables.bind(global.name.clone(), value);
        }
        Ok(())
    }

    fn binding_value(
        &mut self,
        value: &BindingValue,
        node: NodeRef,
    ) -> Result<Value, RuntimeError> {
        match value {
            BindingValue::Select(expr) => expr.evaluate(&self.ctx(node)),
            BindingValue::Content(body) => {
                Ok(Value::Str(self.fragment_string(body, node)?))
            }
        }
    }

    /// Run `body` into a detached arena and take its string value.
    fn fragment_string(
        &mut self,
        body: &[Instruction],
        node: NodeRef,
    ) -> Result<String, RuntimeError> {
        let mut fragment = XmlDocument::new();
        let root = fragment.root();
        self.execute_body(body, node, &mut fragment, root)?;
        Ok(fragment.string_value(NodeRef::Node(root)))
    }

    // ---- template application ----

    fn apply_templates(
        &mut self,
        nodes: &[NodeRef],
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        if self.depth >= MAX_TEMPLATE_DEPTH {
            return Err(RuntimeError::RecursionLimit(MAX_TEMPLATE_DEPTH));
        }
        self.depth += 1;
        let result = self.apply_each(nodes, out, parent);
        self.depth -= 1;
        result
    }

    fn apply_each(
        &mut self,
        nodes: &[NodeRef],
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        for &node in nodes {
            match self.best_rule(node) {
                Some(rule) => {
                    trace!(order = rule.order, priority = rule.priority, "rule selected");
                    self.variables.push_scope();
                    let result = self.execute_body(&rule.body, node, out, parent);
                    self.variables.pop_scope();
                    result?;
                }
                None => self.builtin_rule(node, out, parent)?,
            }
        }
        Ok(())
    }

    /// Highest-priority matching rule; among equal priorities the one
    /// declared last wins.
    fn best_rule(&self, node: NodeRef) -> Option<&'a TemplateRule> {
        self.stylesheet
            .rules
            .iter()
            .filter(|rule| rule.pattern.matches(self.source, node))
            .max_by(|a, b| {
                a.priority
                    .partial_cmp(&b.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.order.cmp(&b.order))
            })
    }

    /// XSLT built-in rules: recurse through containers, echo character data,
    /// drop comments and processing instructions.
    fn builtin_rule(
        &mut self,
        node: NodeRef,
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        match node {
            NodeRef::Attribute(..) => {
                let text = self.source.string_value(node);
                out.append_text(parent, &text);
                Ok(())
            }
            NodeRef::Node(id) => match self.source.kind(id) {
                NodeKind::Document | NodeKind::Element { .. } => {
                    let children = self.child_refs(id);
                    self.apply_templates(&children, out, parent)
                }
                NodeKind::Text(text) => {
                    out.append_text(parent, text);
                    Ok(())
                }
                NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. } => Ok(()),
            },
        }
    }

    fn child_refs(&self, id: NodeId) -> Vec<NodeRef> {
        self.source
            .children(id)
            .iter()
            .map(|&child| NodeRef::Node(child))
            .collect()
    }

    // ---- instructions ----

    fn execute_body(
        &mut self,
        body: &[Instruction],
        node: NodeRef,
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        for instruction in body {
            self.execute_instruction(instruction, node, out, parent)?;
        }
        Ok(())
    }

    fn execute_instruction(
        &mut self,
        instruction: &Instruction,
        node: NodeRef,
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        match instruction {
            Instruction::LiteralElement {
                name,
                namespaces,
                attributes,
                body,
            } => {
                let mut attrs = Vec::with_capacity(attributes.len());
                for (attr_name, template) in attributes {
                    attrs.push(Attribute {
                        name: attr_name.clone(),
                        value: template.evaluate(&self.ctx(node))?,
                    });
                }
                let element = out.append(
                    parent,
                    NodeKind::Element {
                        name: name.clone(),
                        attributes: attrs,
                        namespaces: namespaces.clone(),
                    },
                );
                self.execute_body(body, node, out, element)
            }
            Instruction::LiteralText(text) => {
                out.append_text(parent, text);
                Ok(())
            }
            Instruction::ValueOf(expr) => {
                let text = expr.evaluate_string(&self.ctx(node))?;
                out.append_text(parent, &text);
                Ok(())
            }
            Instruction::ApplyTemplates { select } => {
                let selected = match select {
                    Some(expr) => expr.evaluate_nodes(&self.ctx(node))?,
                    None => match node {
                        NodeRef::Node(id) => self.child_refs(id),
                        NodeRef::Attribute(..) => Vec::new(),
                    },
                };
                self.apply_templates(&selected, out, parent)
            }
            Instruction::ForEach { select, body } => {
                let selected = select.evaluate_nodes(&self.ctx(node))?;
                for item in selected {
                    self.variables.push_scope();
                    let result = self.execute_body(body, item, out, parent);
                    self.variables.pop_scope();
                    result?;
                }
                Ok(())
            }
            Instruction::If { test, body } => {
                if test.evaluate_boolean(&self.ctx(node))? {
                    self.execute_body(body, node, out, parent)?;
                }
                Ok(())
            }
            Instruction::Choose { whens, otherwise } => {
                for (test, body) in whens {
                    if test.evaluate_boolean(&self.ctx(node))? {
                        return self.execute_body(body, node, out, parent);
                    }
                }
                if let Some(body) = otherwise {
                    return self.execute_body(body, node, out, parent);
                }
                Ok(())
            }
            Instruction::Copy { body } => self.execute_copy(body, node, out, parent),
            Instruction::CopyOf(expr) => self.execute_copy_of(expr, node, out, parent),
            Instruction::Element {
                name,
                namespace,
                scope,
                body,
            } => {
                let computed = name.evaluate(&self.ctx(node))?;
                let explicit = match namespace {
                    Some(template) => Some(template.evaluate(&self.ctx(node))?),
                    None => None,
                };
                let qname = resolve_computed_name(&computed, explicit.as_deref(), scope, true);
                // declare the namespace on the element itself so the result
                // serializes self-contained
                let decls = match &qname.namespace {
                    Some(uri) => vec![NamespaceDecl {
                        prefix: qname.prefix.clone(),
                        uri: uri.clone(),
                    }],
                    None => Vec::new(),
                };
                let element = out.append(
                    parent,
                    NodeKind::Element {
                        name: qname,
                        attributes: Vec::new(),
                        namespaces: decls,
                    },
                );
                self.execute_body(body, node, out, element)
            }
            Instruction::Attribute {
                name,
                namespace,
                scope,
                body,
            } => {
                let computed = name.evaluate(&self.ctx(node))?;
                let explicit = match namespace {
                    Some(template) => Some(template.evaluate(&self.ctx(node))?),
                    None => None,
                };
                let value = self.fragment_string(body, node)?;
                let qname = resolve_computed_name(&computed, explicit.as_deref(), scope, false);
                set_attribute(out, parent, Attribute { name: qname, value })
            }
            Instruction::Variable { name, value } => {
                let value = self.binding_value(value, node)?;
                self.variables.bind(name.clone(), value);
                Ok(())
            }
        }
    }

    /// `xsl:copy`: shallow-copy the context node, then run the body inside
    /// the copy. Attributes and namespace declarations of elements are not
    /// carried over.
    fn execute_copy(
        &mut self,
        body: &[Instruction],
        node: NodeRef,
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        match node {
            NodeRef::Attribute(element, index) => {
                let attr = self.source.attributes(element)[index].clone();
                set_attribute(out, parent, attr)
            }
            NodeRef::Node(id) => match self.source.kind(id) {
                NodeKind::Document => self.execute_body(body, node, out, parent),
                NodeKind::Element { name, namespaces, .. } => {
                    let element = out.append(
                        parent,
                        NodeKind::Element {
                            name: name.clone(),
                            attributes: Vec::new(),
                            namespaces: namespaces.clone(),
                        },
                    );
                    self.execute_body(body, node, out, element)
                }
                NodeKind::Text(text) => {
                    out.append_text(parent, text);
                    Ok(())
                }
                kind @ (NodeKind::Comment(_) | NodeKind::ProcessingInstruction { .. }) => {
                    out.append(parent, kind.clone());
                    Ok(())
                }
            },
        }
    }

    /// `xsl:copy-of`: deep-copy a node-set, or insert the string form of any
    /// other value.
    fn execute_copy_of(
        &mut self,
        expr: &Expr,
        node: NodeRef,
        out: &mut XmlDocument,
        parent: NodeId,
    ) -> Result<(), RuntimeError> {
        match expr.evaluate(&self.ctx(node))? {
            Value::NodeSet(nodes) => {
                for item in nodes {
                    match item {
                        NodeRef::Node(id) => out.copy_subtree(parent, self.source, id),
                        NodeRef::Attribute(element, index) => {
                            let attr = self.source.attributes(element)[index].clone();
                            set_attribute(out, parent, attr)?;
                        }
                    }
                }
                Ok(())
            }
            other => {
                out.append_text(parent, &other.string(self.source));
                Ok(())
            }
        }
    }
}

// ============================================================
// Result-tree attribute handling
// ============================================================

/// Attach an attribute to `parent`, replacing an existing attribute with the
/// same expanded name. Attaching to a non-element is silently dropped;
/// attaching after children exist is an error.
fn set_attribute(
    out: &mut XmlDocument,
    parent: NodeId,
    attr: Attribute,
) -> Result<(), RuntimeError> {
    if !matches!(out.kind(parent), NodeKind::Element { .. }) {
        return Ok(());
    }
    if !out.children(parent).is_empty() {
        return Err(RuntimeError::AttributeAfterContent(attr.name.to_string()));
    }
    let attr = declare_attribute_namespace(out, parent, attr);
    if let NodeKind::Element { attributes, .. } = out.kind_mut(parent) {
        match attributes
            .iter_mut()
            .find(|existing| existing.name.matches(attr.name.namespace.as_deref(), &attr.name.local))
        {
            Some(existing) => *existing = attr,
            None => attributes.push(attr),
        }
    }
    Ok(())
}

/// Make sure a namespaced attribute has a prefix declared on its element,
/// inventing one when the name came in unprefixed.
fn declare_attribute_namespace(
    out: &mut XmlDocument,
    parent: NodeId,
    mut attr: Attribute,
) -> Attribute {
    let Some(uri) = attr.name.namespace.clone() else {
        return attr;
    };
    if uri == XML_NAMESPACE {
        attr.name.prefix = Some("xml".to_string());
        return attr;
    }
    if let NodeKind::Element { namespaces, .. } = out.kind_mut(parent) {
        if let Some(decl) = namespaces
            .iter()
            .find(|decl| decl.uri == uri && decl.prefix.is_some())
        {
            attr.name.prefix = decl.prefix.clone();
            return attr;
        }
        let prefix = match attr.name.prefix.clone() {
            Some(prefix) if namespaces.iter().all(|d| d.prefix.as_deref() != Some(&*prefix)) => {
                prefix
            }
            _ => {
                // attributes never take the default namespace, so an
                // unprefixed name in a namespace needs a generated prefix
                let mut n = 0;
                loop {
                    let candidate = format!("ns{}", n);
                    if namespaces.iter().all(|d| d.prefix.as_deref() != Some(&*candidate)) {
                        break candidate;
                    }
                    n += 1;
                }
            }
        };
        namespaces.push(NamespaceDecl {
            prefix: Some(prefix.clone()),
            uri,
        });
        attr.name.prefix = Some(prefix);
    }
    attr
}

/// Split a computed element/attribute name and resolve its namespace: an
/// explicit `namespace` attribute wins, otherwise the prefix is looked up in
/// the bindings that were in scope at the instruction. Unprefixed element
/// names take the default namespace; attribute names never do.
fn resolve_computed_name(
    computed: &str,
    explicit: Option<&str>,
    scope: &[(Option<String>, String)],
    use_default: bool,
) -> QName {
    let (mut prefix, local) = match computed.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, computed.to_string()),
    };
    let namespace = match explicit {
        Some("") => None,
        Some(uri) => Some(uri.to_string()),
        None => {
            if prefix.is_none() && !use_default {
                None
            } else if prefix.as_deref() == Some("xml") {
                Some(XML_NAMESPACE.to_string())
            } else {
                scope
                    .iter()
                    .find(|(candidate, _)| candidate.as_deref() == prefix.as_deref())
                    .map(|(_, uri)| uri.clone())
            }
        }
    };
    // a prefix without a namespace would serialize as an undeclared binding
    if namespace.is_none() {
        prefix = None;
    }
    QName {
        prefix,
        local,
        namespace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::reader::read_document_str;
    use pretty_assertions::assert_eq;

    const DECL: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";

    fn wrap(body: &str) -> String {
        format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">{}</xsl:stylesheet>"#,
            body
        )
    }

    fn run(stylesheet: &str, input: &str) -> String {
        run_with(stylesheet, input, &ParameterBindings::new())
    }

    fn run_with(stylesheet: &str, input: &str, parameters: &ParameterBindings) -> String {
        String::from_utf8(run_raw(stylesheet, input, parameters).unwrap()).unwrap()
    }

    fn run_raw(
        stylesheet: &str,
        input: &str,
        parameters: &ParameterBindings,
    ) -> Result<Vec<u8>, RuntimeError> {
        let compiled = XsltProcessor::new()
            .compile(stylesheet, SecurityProfile::Secure)
            .unwrap();
        let doc = read_document_str(input, SecurityProfile::Secure).unwrap();
        compiled.execute(&doc, parameters)
    }

    #[test]
    fn test_value_of_takes_string_value() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><greeting><xsl:value-of select="name"/></greeting></xsl:template>"#),
            "<name>Ada</name>",
        );
        assert_eq!(output, format!("{}<greeting>Ada</greeting>", DECL));
    }

    #[test]
    fn test_value_of_uses_first_node_in_document_order() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><first><xsl:value-of select="list/entry"/></first></xsl:template>"#),
            "<list><entry>one</entry><entry>two</entry></list>",
        );
        assert_eq!(output, format!("{}<first>one</first>", DECL));
    }

    #[test]
    fn test_literal_attributes_expand_value_templates() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><profile ref="u-{user/@id}"><xsl:value-of select="user/name"/></profile></xsl:template>"#),
            r#"<user id="42"><name>Ada</name></user>"#,
        );
        assert_eq!(output, format!("{}<profile ref=\"u-42\">Ada</profile>", DECL));
    }

    #[test]
    fn test_for_each_iterates_in_document_order() {
        let output = run(
            &wrap(
                r#"<xsl:template match="/"><list><xsl:for-each select="order/item"><entry><xsl:value-of select="."/></entry></xsl:for-each></list></xsl:template>"#,
            ),
            "<order><item>a</item><item>b</item></order>",
        );
        assert_eq!(
            output,
            format!(
                "{}<list>\n   <entry>a</entry>\n   <entry>b</entry>\n</list>",
                DECL
            )
        );
    }

    #[test]
    fn test_if_and_choose_branching() {
        let stylesheet = wrap(
            r#"<xsl:template match="/">
                <result>
                    <xsl:if test="cfg/flag = 'on'"><enabled/></xsl:if>
                    <xsl:choose>
                        <xsl:when test="cfg/mode = 'fast'"><fast/></xsl:when>
                        <xsl:otherwise><slow/></xsl:otherwise>
                    </xsl:choose>
                </result>
            </xsl:template>"#,
        );
        let output = run(&stylesheet, "<cfg><flag>on</flag><mode>steady</mode></cfg>");
        assert_eq!(
            output,
            format!("{}<result>\n   <enabled/>\n   <slow/>\n</result>", DECL)
        );
    }

    #[test]
    fn test_copy_is_shallow() {
        // identity walk without attribute copying
        let stylesheet = wrap(
            r#"<xsl:template match="/"><xsl:copy><xsl:apply-templates/></xsl:copy></xsl:template>
               <xsl:template match="*"><xsl:copy><xsl:apply-templates/></xsl:copy></xsl:template>"#,
        );
        let output = run(&stylesheet, r#"<a kept="no"><b>hi</b></a>"#);
        assert_eq!(output, format!("{}<a>\n   <b>hi</b>\n</a>", DECL));
    }

    #[test]
    fn test_copy_of_is_deep() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><wrap><xsl:copy-of select="order/item"/></wrap></xsl:template>"#),
            r#"<order><item id="1">a</item><item id="2">b</item></order>"#,
        );
        assert_eq!(
            output,
            format!(
                "{}<wrap>\n   <item id=\"1\">a</item>\n   <item id=\"2\">b</item>\n</wrap>",
                DECL
            )
        );
    }

    #[test]
    fn test_copy_of_string_value() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><echo><xsl:copy-of select="'verbatim'"/></echo></xsl:template>"#),
            "<x/>",
        );
        assert_eq!(output, format!("{}<echo>verbatim</echo>", DECL));
    }

    #[test]
    fn test_attribute_instruction_sets_and_replaces() {
        let output = run(
            &wrap(
                r#"<xsl:template match="/"><out lang="de"><xsl:attribute name="lang">en</xsl:attribute></out></xsl:template>"#,
            ),
            "<x/>",
        );
        assert_eq!(output, format!("{}<out lang=\"en\"/>", DECL));
    }

    #[test]
    fn test_attribute_after_content_is_an_error() {
        let err = run_raw(
            &wrap(
                r#"<xsl:template match="/"><out><child/><xsl:attribute name="late">x</xsl:attribute></out></xsl:template>"#,
            ),
            "<x/>",
            &ParameterBindings::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::AttributeAfterContent(name) if name == "late"));
    }

    #[test]
    fn test_builtin_rules_recurse_to_matching_template() {
        let output = run(
            &wrap(r#"<xsl:template match="note"><hit/></xsl:template>"#),
            "<doc><note>x</note></doc>",
        );
        assert_eq!(output, format!("{}<hit/>", DECL));
    }

    #[test]
    fn test_builtin_rules_echo_text() {
        // no templates at all: string value of the document comes through
        let output = run(
            &wrap(r#"<xsl:template match="nothing"><never/></xsl:template>"#),
            "<doc><a>one</a><b>two</b></doc>",
        );
        assert_eq!(output, format!("{}onetwo", DECL));
    }

    #[test]
    fn test_more_specific_pattern_wins() {
        let stylesheet = wrap(
            r#"<xsl:template match="*"><any/></xsl:template>
               <xsl:template match="item"><named/></xsl:template>
               <xsl:template match="/item"><rooted/></xsl:template>"#,
        );
        let output = run(&stylesheet, "<item/>");
        assert_eq!(output, format!("{}<rooted/>", DECL));
    }

    #[test]
    fn test_equal_priority_last_declaration_wins() {
        let stylesheet = wrap(
            r#"<xsl:template match="item"><first/></xsl:template>
               <xsl:template match="item"><second/></xsl:template>"#,
        );
        let output = run(&stylesheet, "<item/>");
        assert_eq!(output, format!("{}<second/>", DECL));
    }

    #[test]
    fn test_explicit_priority_beats_declaration_order() {
        let stylesheet = wrap(
            r#"<xsl:template match="item" priority="2"><kept/></xsl:template>
               <xsl:template match="item"><shadowed/></xsl:template>"#,
        );
        let output = run(&stylesheet, "<item/>");
        assert_eq!(output, format!("{}<kept/>", DECL));
    }

    #[test]
    fn test_external_parameter_overrides_default() {
        let stylesheet = wrap(
            r#"<xsl:param name="greeting" select="'hi'"/>
               <xsl:template match="/"><msg><xsl:value-of select="$greeting"/></msg></xsl:template>"#,
        );
        let mut parameters = ParameterBindings::new();
        parameters.bind("greeting", "hello");
        assert_eq!(
            run_with(&stylesheet, "<x/>", &parameters),
            format!("{}<msg>hello</msg>", DECL)
        );
        assert_eq!(
            run(&stylesheet, "<x/>"),
            format!("{}<msg>hi</msg>", DECL)
        );
    }

    #[test]
    fn test_global_variable_content_body() {
        let stylesheet = wrap(
            r#"<xsl:variable name="label"><xsl:text>v-</xsl:text><xsl:value-of select="/env/name"/></xsl:variable>
               <xsl:template match="/"><tag><xsl:value-of select="$label"/></tag></xsl:template>"#,
        );
        let output = run(&stylesheet, "<env><name>prod</name></env>");
        assert_eq!(output, format!("{}<tag>v-prod</tag>", DECL));
    }

    #[test]
    fn test_local_variable_scope_ends_with_for_each() {
        let stylesheet = wrap(
            r#"<xsl:template match="/">
                <out>
                    <xsl:for-each select="r/i">
                        <xsl:variable name="v" select="."/>
                        <got><xsl:value-of select="$v"/></got>
                    </xsl:for-each>
                    <xsl:value-of select="$v"/>
                </out>
            </xsl:template>"#,
        );
        let err = run_raw(&stylesheet, "<r><i>1</i></r>", &ParameterBindings::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::UndefinedVariable(name) if name == "v"));
    }

    #[test]
    fn test_self_recursion_hits_depth_limit() {
        let err = run_raw(
            &wrap(r#"<xsl:template match="loop"><xsl:apply-templates select="."/></xsl:template>"#),
            "<loop/>",
            &ParameterBindings::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::RecursionLimit(MAX_TEMPLATE_DEPTH)));
    }

    #[test]
    fn test_for_each_over_non_node_set_is_an_error() {
        let err = run_raw(
            &wrap(r#"<xsl:template match="/"><xsl:for-each select="'oops'"><x/></xsl:for-each></xsl:template>"#),
            "<x/>",
            &ParameterBindings::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::NotANodeSet(_)));
    }

    #[test]
    fn test_element_instruction_with_computed_name() {
        let output = run(
            &wrap(
                r#"<xsl:template match="thing"><xsl:element name="new-{name()}"><xsl:value-of select="."/></xsl:element></xsl:template>"#,
            ),
            "<thing>v</thing>",
        );
        assert_eq!(output, format!("{}<new-thing>v</new-thing>", DECL));
    }

    #[test]
    fn test_element_instruction_with_namespace() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><xsl:element name="e" namespace="urn:x"/></xsl:template>"#),
            "<x/>",
        );
        assert_eq!(output, format!("{}<e xmlns=\"urn:x\"/>", DECL));
    }

    #[test]
    fn test_element_with_unknown_prefix_falls_back_to_no_namespace() {
        let output = run(
            &wrap(r#"<xsl:template match="/"><xsl:element name="mist:e"/></xsl:template>"#),
            "<x/>",
        );
        assert_eq!(output, format!("{}<e/>", DECL));
    }

    #[test]
    fn test_omit_xml_declaration() {
        let stylesheet = wrap(
            r#"<xsl:output omit-xml-declaration="yes"/>
               <xsl:template match="/"><bare/></xsl:template>"#,
        );
        assert_eq!(run(&stylesheet, "<x/>"), "<bare/>");
    }

    #[test]
    fn test_fresh_variables_per_execution() {
        // the same compiled template sees different parameter values
        let stylesheet = wrap(
            r#"<xsl:param name="n" select="'default'"/>
               <xsl:template match="/"><v><xsl:value-of select="$n"/></v></xsl:template>"#,
        );
        let compiled = XsltProcessor::new()
            .compile(&stylesheet, SecurityProfile::Secure)
            .unwrap();
        let doc = read_document_str("<x/>", SecurityProfile::Secure).unwrap();

        let mut first = ParameterBindings::new();
        first.bind("n", "1");
        let mut second = ParameterBindings::new();
        second.bind("n", "2");

        let one = String::from_utf8(compiled.execute(&doc, &first).unwrap()).unwrap();
        let two = String::from_utf8(compiled.execute(&doc, &second).unwrap()).unwrap();
        assert_eq!(one, format!("{}<v>1</v>", DECL));
        assert_eq!(two, format!("{}<v>2</v>", DECL));
    }
}
