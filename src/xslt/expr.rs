//! XPath 1.0 subset: select/test expressions and match patterns.
//!
//! The subset covers what gateway stylesheets actually use: child and
//! attribute paths, `.`/`..`, node-kind tests, variables, string and number
//! literals, `=`/`!=`, `and`/`or`, unions and a handful of core functions.
//! Prefixes inside expressions are resolved against the stylesheet's
//! namespace context at compile time, so evaluation never sees a prefix.
//!
//! Value semantics follow XPath 1.0: existential comparison against
//! node-sets, string-value of the first node in document order, permissive
//! number coercion yielding NaN.

use crate::core::error::{CompileError, RuntimeError};
use crate::xml::document::{NodeId, NodeKind, NodeRef, XmlDocument};

// ============================================================
// Values
// ============================================================

/// An XPath value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    NodeSet(Vec<NodeRef>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    pub fn boolean(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    pub fn string(&self, doc: &XmlDocument) -> String {
        match self {
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|node| doc.string_value(*node))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn number(&self, doc: &XmlDocument) -> f64 {
        match self {
            Value::NodeSet(_) => parse_number(&self.string(doc)),
            Value::Str(s) => parse_number(s),
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// XPath string form of a number: integral values print without a fraction,
/// non-numbers print as NaN/Infinity.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

// ============================================================
// Variable scopes
// ============================================================

/// Lexically scoped variable bindings.
#[derive(Debug)]
pub struct Variables {
    frames: Vec<Vec<(String, Value)>>,
}

impl Default for Variables {
    fn default() -> Self {
        Self::new()
    }
}

impl Variables {
    pub fn new() -> Self {
        Variables {
            frames: vec![Vec::new()],
        }
    }

    pub fn push_scope(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop_scope(&mut self) {
        self.frames.pop();
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.into(), value));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.iter().rev().find(|(n, _)| n == name))
            .map(|(_, value)| value)
    }
}

/// Everything an expression needs at evaluation time.
pub struct EvalContext<'a> {
    pub doc: &'a XmlDocument,
    pub node: NodeRef,
    pub variables: &'a Variables,
}

// ============================================================
// AST
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    Number(f64),
    Variable(String),
    Path(LocationPath),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Equals(Box<Expr>, Box<Expr>),
    NotEquals(Box<Expr>, Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Not,
    Count,
    Concat,
    NormalizeSpace,
    Name,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Attribute,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// Expanded-name test; `namespace` is the resolved URI, not a prefix
    Name {
        namespace: Option<String>,
        local: String,
    },
    AnyName,
    Text,
    Comment,
    ProcessingInstruction,
    AnyNode,
}

// ============================================================
// Match patterns
// ============================================================

/// A compiled `match` pattern: one alternative per `|` branch.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub alternatives: Vec<PathPattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    /// The pattern is exactly `/`
    pub root: bool,
    /// Pattern started with `/`: the first step must sit directly under the
    /// document node
    pub anchored: bool,
    pub steps: Vec<Step>,
}

impl PathPattern {
    /// Default priority per XSLT 1.0 conflict resolution.
    pub fn default_priority(&self) -> f64 {
        if self.root {
            return -0.5;
        }
        if self.steps.len() == 1 && !self.anchored {
            return match &self.steps[0].test {
                NodeTest::Name { .. } => 0.0,
                _ => -0.5,
            };
        }
        0.5
    }

    /// Does `node` match this pattern?
    pub fn matches(&self, doc: &XmlDocument, node: NodeRef) -> bool {
        if self.root {
            return matches!(node, NodeRef::Node(id) if id == doc.root());
        }
        let mut steps = self.steps.iter().rev();
        let Some(last) = steps.next() else {
            return false;
        };
        if !step_matches(doc, node, last) {
            return false;
        }
        let mut current = parent_of(doc, node);
        for step in steps {
            match current {
                Some(node) if step_matches(doc, node, step) => {
                    current = parent_of(doc, node);
                }
                _ => return false,
            }
        }
        if self.anchored {
            matches!(current, Some(NodeRef::Node(id)) if id == doc.root())
        } else {
            true
        }
    }
}

fn parent_of(doc: &XmlDocument, node: NodeRef) -> Option<NodeRef> {
    match node {
        NodeRef::Attribute(element, _) => Some(NodeRef::Node(element)),
        NodeRef::Node(id) => doc.parent(id).map(NodeRef::Node),
    }
}

fn step_matches(doc: &XmlDocument, node: NodeRef, step: &Step) -> bool {
    match step.axis {
        Axis::Attribute => match node {
            NodeRef::Attribute(element, index) => {
                let attr = &doc.attributes(element)[index];
                match &step.test {
                    NodeTest::AnyName | NodeTest::AnyNode => true,
                    NodeTest::Name { namespace, local } => {
                        attr.name.matches(namespace.as_deref(), local)
                    }
                    _ => false,
                }
            }
            _ => false,
        },
        // in a pattern, a child-axis step can never select the document node
        // or an attribute, whatever its node test says
        Axis::Child => match node {
            NodeRef::Node(id) => {
                !matches!(doc.kind(id), NodeKind::Document)
                    && node_test_matches(doc, id, &step.test)
            }
            NodeRef::Attribute(..) => false,
        },
        _ => match node {
            NodeRef::Node(id) => node_test_matches(doc, id, &step.test),
            NodeRef::Attribute(..) => matches!(step.test, NodeTest::AnyNode),
        },
    }
}

fn node_test_matches(doc: &XmlDocument, id: NodeId, test: &NodeTest) -> bool {
    match (test, doc.kind(id)) {
        (NodeTest::AnyNode, _) => true,
        (NodeTest::AnyName, NodeKind::Element { .. }) => true,
        (NodeTest::Name { namespace, local }, NodeKind::Element { name, .. }) => {
            name.matches(namespace.as_deref(), local)
        }
        (NodeTest::Text, NodeKind::Text(_)) => true,
        (NodeTest::Comment, NodeKind::Comment(_)) => true,
        (NodeTest::ProcessingInstruction, NodeKind::ProcessingInstruction { .. }) => true,
        _ => false,
    }
}

// ============================================================
// Evaluation
// ============================================================

impl Expr {
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, RuntimeError> {
        match self {
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Variable(name) => ctx
                .variables
                .lookup(name)
                .cloned()
                .ok_or_else(|| RuntimeError::UndefinedVariable(name.clone())),
            Expr::Path(path) => Ok(Value::NodeSet(eval_path(path, ctx))),
            Expr::Or(left, right) => Ok(Value::Bool(
                left.evaluate(ctx)?.boolean() || right.evaluate(ctx)?.boolean(),
            )),
            Expr::And(left, right) => Ok(Value::Bool(
                left.evaluate(ctx)?.boolean() && right.evaluate(ctx)?.boolean(),
            )),
            Expr::Equals(left, right) => Ok(Value::Bool(compare(
                ctx.doc,
                &left.evaluate(ctx)?,
                &right.evaluate(ctx)?,
                true,
            ))),
            Expr::NotEquals(left, right) => Ok(Value::Bool(compare(
                ctx.doc,
                &left.evaluate(ctx)?,
                &right.evaluate(ctx)?,
                false,
            ))),
            Expr::Union(left, right) => {
                let mut nodes = left.evaluate_nodes(ctx)?;
                nodes.extend(right.evaluate_nodes(ctx)?);
                nodes.sort_by_key(NodeRef::order_key);
                nodes.dedup();
                Ok(Value::NodeSet(nodes))
            }
            Expr::Call(function, args) => eval_function(*function, args, ctx),
        }
    }

    pub fn evaluate_string(&self, ctx: &EvalContext<'_>) -> Result<String, RuntimeError> {
        Ok(self.evaluate(ctx)?.string(ctx.doc))
    }

    pub fn evaluate_boolean(&self, ctx: &EvalContext<'_>) -> Result<bool, RuntimeError> {
        Ok(self.evaluate(ctx)?.boolean())
    }

    /// Evaluate to a node-set, in document order and duplicate-free.
    pub fn evaluate_nodes(&self, ctx: &EvalContext<'_>) -> Result<Vec<NodeRef>, RuntimeError> {
        match self.evaluate(ctx)? {
            Value::NodeSet(nodes) => Ok(nodes),
            _ => Err(RuntimeError::NotANodeSet(format!("{:?}", self))),
        }
    }
}

fn eval_path(path: &LocationPath, ctx: &EvalContext<'_>) -> Vec<NodeRef> {
    let mut current = if path.absolute {
        vec![NodeRef::Node(ctx.doc.root())]
    } else {
        vec![ctx.node]
    };
    for step in &path.steps {
        current = apply_step(ctx.doc, &current, step);
    }
    current
}

fn apply_step(doc: &XmlDocument, inputs: &[NodeRef], step: &Step) -> Vec<NodeRef> {
    let mut output = Vec::new();
    for &input in inputs {
        match step.axis {
            Axis::SelfNode => {
                if step_matches(doc, input, step) {
                    output.push(input);
                }
            }
            Axis::Parent => {
                if let Some(parent) = parent_of(doc, input) {
                    output.push(parent);
                }
            }
            Axis::Child => {
                if let NodeRef::Node(id) = input {
                    for &child in doc.children(id) {
                        if node_test_matches(doc, child, &step.test) {
                            output.push(NodeRef::Node(child));
                        }
                    }
                }
            }
            Axis::Attribute => {
                if let NodeRef::Node(id) = input {
                    for (index, attr) in doc.attributes(id).iter().enumerate() {
                        let keep = match &step.test {
                            NodeTest::AnyName | NodeTest::AnyNode => true,
                            NodeTest::Name { namespace, local } => {
                                attr.name.matches(namespace.as_deref(), local)
                            }
                            _ => false,
                        };
                        if keep {
                            output.push(NodeRef::Attribute(id, index));
                        }
                    }
                }
            }
        }
    }
    output.sort_by_key(NodeRef::order_key);
    output.dedup();
    output
}

fn eval_function(
    function: Function,
    args: &[Expr],
    ctx: &EvalContext<'_>,
) -> Result<Value, RuntimeError> {
    match function {
        Function::True => Ok(Value::Bool(true)),
        Function::False => Ok(Value::Bool(false)),
        Function::Not => Ok(Value::Bool(!args[0].evaluate_boolean(ctx)?)),
        Function::Count => Ok(Value::Num(args[0].evaluate_nodes(ctx)?.len() as f64)),
        Function::Concat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(&arg.evaluate_string(ctx)?);
            }
            Ok(Value::Str(out))
        }
        Function::NormalizeSpace => {
            let raw = match args.first() {
                Some(arg) => arg.evaluate_string(ctx)?,
                None => ctx.doc.string_value(ctx.node),
            };
            Ok(Value::Str(
                raw.split_whitespace().collect::<Vec<_>>().join(" "),
            ))
        }
        Function::Name => {
            let node = match args.first() {
                Some(arg) => match arg.evaluate_nodes(ctx)?.first().copied() {
                    Some(node) => node,
                    None => return Ok(Value::Str(String::new())),
                },
                None => ctx.node,
            };
            Ok(Value::Str(node_name(ctx.doc, node)))
        }
    }
}

fn node_name(doc: &XmlDocument, node: NodeRef) -> String {
    match node {
        NodeRef::Attribute(element, index) => doc.attributes(element)[index].name.to_string(),
        NodeRef::Node(id) => match doc.kind(id) {
            NodeKind::Element { name, .. } => name.to_string(),
            NodeKind::ProcessingInstruction { target, .. } => target.clone(),
            _ => String::new(),
        },
    }
}

/// XPath `=` / `!=` with existential node-set semantics. Note `!=` against a
/// node-set is not the negation of `=`.
fn compare(doc: &XmlDocument, left: &Value, right: &Value, equal: bool) -> bool {
    use Value::*;
    match (left, right) {
        (NodeSet(a), NodeSet(b)) => a.iter().any(|na| {
            let sa = doc.string_value(*na);
            b.iter()
                .any(|nb| (doc.string_value(*nb) == sa) == equal)
        }),
        (NodeSet(nodes), Str(s)) | (Str(s), NodeSet(nodes)) => nodes
            .iter()
            .any(|node| (doc.string_value(*node) == *s) == equal),
        (NodeSet(nodes), Num(n)) | (Num(n), NodeSet(nodes)) => nodes
            .iter()
            .any(|node| (parse_number(&doc.string_value(*node)) == *n) == equal),
        (NodeSet(nodes), Bool(b)) | (Bool(b), NodeSet(nodes)) => (!nodes.is_empty() == *b) == equal,
        (Bool(_), _) | (_, Bool(_)) => (left.boolean() == right.boolean()) == equal,
        (Num(_), _) | (_, Num(_)) => (left.number(doc) == right.number(doc)) == equal,
        (Str(a), Str(b)) => (a == b) == equal,
    }
}

// ============================================================
// Parsing
// ============================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    At,
    Dot,
    DotDot,
    Star,
    Pipe,
    LParen,
    RParen,
    Comma,
    Eq,
    Neq,
    Name(String),
    Variable(String),
    Literal(String),
    Number(f64),
}

/// Resolves a namespace prefix to a URI within the stylesheet context.
pub type PrefixResolver<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Parse a select/test expression.
pub fn parse_expression(
    source: &str,
    resolve_prefix: PrefixResolver<'_>,
) -> Result<Expr, CompileError> {
    let mut parser = Parser::new(source, resolve_prefix, false)?;
    let expr = parser.parse_or()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse a template match pattern.
pub fn parse_pattern(
    source: &str,
    resolve_prefix: PrefixResolver<'_>,
) -> Result<Pattern, CompileError> {
    let mut parser = Parser::new(source, resolve_prefix, true)?;
    let pattern = parser.parse_pattern()?;
    parser.expect_end()?;
    Ok(pattern)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    resolve_prefix: PrefixResolver<'a>,
    /// Errors become BadPattern instead of BadExpression
    pattern_mode: bool,
}

impl<'a> Parser<'a> {
    fn new(
        source: &'a str,
        resolve_prefix: PrefixResolver<'a>,
        pattern_mode: bool,
    ) -> Result<Self, CompileError> {
        let mut parser = Parser {
            source,
            tokens: Vec::new(),
            pos: 0,
            resolve_prefix,
            pattern_mode,
        };
        parser.tokens = parser.tokenize()?;
        Ok(parser)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        if self.pattern_mode {
            CompileError::BadPattern {
                pattern: self.source.to_string(),
                message: message.into(),
            }
        } else {
            CompileError::BadExpression {
                expression: self.source.to_string(),
                message: message.into(),
            }
        }
    }

    fn tokenize(&self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        let chars: Vec<char> = self.source.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                ' ' | '\t' | '\n' | '\r' => i += 1,
                '/' => {
                    tokens.push(Token::Slash);
                    i += 1;
                }
                '@' => {
                    tokens.push(Token::At);
                    i += 1;
                }
                '*' => {
                    tokens.push(Token::Star);
                    i += 1;
                }
                '|' => {
                    tokens.push(Token::Pipe);
                    i += 1;
                }
                '(' => {
                    tokens.push(Token::LParen);
                    i += 1;
                }
                ')' => {
                    tokens.push(Token::RParen);
                    i += 1;
                }
                ',' => {
                    tokens.push(Token::Comma);
                    i += 1;
                }
                '=' => {
                    tokens.push(Token::Eq);
                    i += 1;
                }
                '!' => {
                    if chars.get(i + 1) == Some(&'=') {
                        tokens.push(Token::Neq);
                        i += 2;
                    } else {
                        return Err(self.error("'!' must be followed by '='"));
                    }
                }
                '.' => {
                    if chars.get(i + 1) == Some(&'.') {
                        tokens.push(Token::DotDot);
                        i += 2;
                    } else if chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                        let (number, next) = lex_number(&chars, i);
                        tokens.push(Token::Number(number));
                        i = next;
                    } else {
                        tokens.push(Token::Dot);
                        i += 1;
                    }
                }
                '\'' | '"' => {
                    let quote = c;
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end] != quote {
                        end += 1;
                    }
                    if end == chars.len() {
                        return Err(self.error("unterminated string literal"));
                    }
                    tokens.push(Token::Literal(chars[start..end].iter().collect()));
                    i = end + 1;
                }
                '$' => {
                    let start = i + 1;
                    let end = scan_name(&chars, start);
                    if end == start {
                        return Err(self.error("'$' must be followed by a variable name"));
                    }
                    tokens.push(Token::Variable(chars[start..end].iter().collect()));
                    i = end;
                }
                c if c.is_ascii_digit() => {
                    let (number, next) = lex_number(&chars, i);
                    tokens.push(Token::Number(number));
                    i = next;
                }
                c if is_name_start(c) => {
                    let mut end = scan_name(&chars, i);
                    // qualified name
                    if chars.get(end) == Some(&':')
                        && chars.get(end + 1).is_some_and(|&c| is_name_start(c))
                    {
                        end = scan_name(&chars, end + 1);
                    }
                    tokens.push(Token::Name(chars[i..end].iter().collect()));
                    i = end;
                }
                other => {
                    return Err(self.error(format!("unexpected character '{}'", other)));
                }
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), CompileError> {
        if self.pos == self.tokens.len() {
            Ok(())
        } else {
            Err(self.error("trailing content after expression"))
        }
    }

    // ---- expressions ----

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.eat_operator("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_equality()?;
        while self.eat_operator("and") {
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// `and`/`or` are only operators in operator position; a path step named
    /// `or` has already been consumed by the time we look here.
    fn eat_operator(&mut self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword) && {
            self.pos += 1;
            true
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_union()?;
        loop {
            if self.eat(&Token::Eq) {
                let right = self.parse_union()?;
                left = Expr::Equals(Box::new(left), Box::new(right));
            } else if self.eat(&Token::Neq) {
                let right = self.parse_union()?;
                left = Expr::NotEquals(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_union(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_primary()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_primary()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        match self.peek().cloned() {
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Variable(name)) => {
                self.pos += 1;
                Ok(Expr::Variable(name))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(self.error("expected ')'"));
                }
                Ok(inner)
            }
            Some(Token::Name(name)) if self.tokens.get(self.pos + 1) == Some(&Token::LParen) => {
                if is_node_test_name(&name) {
                    self.parse_location_path().map(Expr::Path)
                } else {
                    self.parse_function_call(&name)
                }
            }
            Some(Token::Slash | Token::At | Token::Dot | Token::DotDot | Token::Star)
            | Some(Token::Name(_)) => self.parse_location_path().map(Expr::Path),
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_function_call(&mut self, name: &str) -> Result<Expr, CompileError> {
        self.pos += 1; // name
        self.pos += 1; // (
        let function = match name {
            "not" => Function::Not,
            "count" => Function::Count,
            "concat" => Function::Concat,
            "normalize-space" => Function::NormalizeSpace,
            "name" => Function::Name,
            "true" => Function::True,
            "false" => Function::False,
            other => return Err(self.error(format!("unknown function '{}()'", other))),
        };
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                return Err(self.error("expected ',' or ')' in argument list"));
            }
        }
        let arity_ok = match function {
            Function::True | Function::False => args.is_empty(),
            Function::Not | Function::Count => args.len() == 1,
            Function::Concat => args.len() >= 2,
            Function::NormalizeSpace | Function::Name => args.len() <= 1,
        };
        if !arity_ok {
            return Err(self.error(format!(
                "wrong number of arguments for '{}()'",
                name
            )));
        }
        Ok(Expr::Call(function, args))
    }

    fn parse_location_path(&mut self) -> Result<LocationPath, CompileError> {
        let absolute = self.eat(&Token::Slash);
        let mut steps = Vec::new();
        if absolute && !self.step_ahead() {
            // bare `/` selects the document root
            return Ok(LocationPath { absolute, steps });
        }
        steps.push(self.parse_step()?);
        while self.eat(&Token::Slash) {
            steps.push(self.parse_step()?);
        }
        Ok(LocationPath { absolute, steps })
    }

    fn step_ahead(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::At | Token::Dot | Token::DotDot | Token::Star | Token::Name(_))
        )
    }

    fn parse_step(&mut self) -> Result<Step, CompileError> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfNode,
                test: NodeTest::AnyNode,
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::AnyNode,
            });
        }
        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else {
            Axis::Child
        };
        let test = self.parse_node_test()?;
        Ok(Step { axis, test })
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, CompileError> {
        match self.next() {
            Some(Token::Star) => Ok(NodeTest::AnyName),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    let test = match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::AnyNode,
                        "comment" => NodeTest::Comment,
                        "processing-instruction" => NodeTest::ProcessingInstruction,
                        other => {
                            return Err(
                                self.error(format!("'{}()' is not a node test", other))
                            )
                        }
                    };
                    self.pos += 1;
                    if !self.eat(&Token::RParen) {
                        return Err(self.error("node tests take no arguments"));
                    }
                    return Ok(test);
                }
                let (namespace, local) = match name.split_once(':') {
                    Some((prefix, local)) => {
                        let Some(uri) = (self.resolve_prefix)(prefix) else {
                            return Err(self.error(format!(
                                "unknown namespace prefix '{}'",
                                prefix
                            )));
                        };
                        (Some(uri), local.to_string())
                    }
                    None => (None, name),
                };
                Ok(NodeTest::Name { namespace, local })
            }
            _ => Err(self.error("expected a node test")),
        }
    }

    // ---- patterns ----

    fn parse_pattern(&mut self) -> Result<Pattern, CompileError> {
        let mut alternatives = vec![self.parse_path_pattern()?];
        while self.eat(&Token::Pipe) {
            alternatives.push(self.parse_path_pattern()?);
        }
        Ok(Pattern { alternatives })
    }

    fn parse_path_pattern(&mut self) -> Result<PathPattern, CompileError> {
        let anchored = self.eat(&Token::Slash);
        if anchored && !self.step_ahead() {
            return Ok(PathPattern {
                root: true,
                anchored: true,
                steps: Vec::new(),
            });
        }
        let mut steps = vec![self.parse_step()?];
        while self.eat(&Token::Slash) {
            steps.push(self.parse_step()?);
        }
        for step in &steps {
            if matches!(step.axis, Axis::SelfNode | Axis::Parent) {
                return Err(self.error("'.' and '..' are not allowed in match patterns"));
            }
        }
        Ok(PathPattern {
            root: false,
            anchored,
            steps,
        })
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn scan_name(chars: &[char], start: usize) -> usize {
    if start >= chars.len() || !is_name_start(chars[start]) {
        return start;
    }
    let mut end = start + 1;
    while end < chars.len() && is_name_char(chars[end]) {
        end += 1;
    }
    end
}

fn lex_number(chars: &[char], start: usize) -> (f64, usize) {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() {
        match chars[end] {
            c if c.is_ascii_digit() => end += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    let text: String = chars[start..end].iter().collect();
    (text.parse().unwrap_or(f64::NAN), end)
}

fn is_node_test_name(name: &str) -> bool {
    matches!(
        name,
        "text" | "node" | "comment" | "processing-instruction"
    )
}
