//! A small XPath 1.0 evaluator over [`DomTree`].
//!
//! Supported: absolute and relative location paths, `/` and `//`, name tests and `*`,
//! the `child`, `descendant`, `descendant-or-self`, `parent`, `ancestor`,
//! `ancestor-or-self`, `self`, `following-sibling` and `preceding-sibling` axes,
//! `.` / `..`, attribute steps (`@name`, `@*`), `text()` and `node()` tests, predicates
//! (positional, boolean, `and`/`or`, comparisons), parenthesized filter expressions,
//! `|` unions, and the string/boolean functions locators tend to use.
//!
//! `text()` yields only non-blank text children; inter-element whitespace that the
//! HTML parser keeps would otherwise shadow the text a locator means.

use crate::dom::{DomTree, NodeId, DOCUMENT_ROOT};
use domtrim_core::{Error, Result};

/// Evaluate `expr` and return the selected elements in document order.
pub fn evaluate(tree: &DomTree, expr: &str) -> Result<Vec<NodeId>> {
    let tokens = lex(expr)?;
    if tokens.is_empty() {
        return Err(Error::InvalidXpath("empty expression".to_string()));
    }
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let ast = p.parse_or()?;
    if let Some(t) = p.peek() {
        return Err(Error::InvalidXpath(format!("unexpected token {t:?}")));
    }
    let ev = Evaluator { tree };
    let ctx = Ctx {
        item: Item::Node(DOCUMENT_ROOT),
        pos: 1,
        size: 1,
    };
    match ev.eval(&ast, &ctx)? {
        Value::Nodes(items) => {
            let mut out: Vec<NodeId> = items
                .into_iter()
                .filter_map(|i| match i {
                    Item::Node(id) if id != DOCUMENT_ROOT => Some(id),
                    _ => None,
                })
                .collect();
            out.sort_unstable();
            out.dedup();
            Ok(out)
        }
        _ => Err(Error::UnsupportedXpath(
            "expression does not select elements".to_string(),
        )),
    }
}

// ---- lexer ----

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    Axis,
    Op(CmpOp),
    Name(String),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn lex(s: &str) -> Result<Vec<Tok>> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                out.push(Tok::DoubleSlash);
                i += 2;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '[' => {
                out.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                out.push(Tok::RBracket);
                i += 1;
            }
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '@' => {
                out.push(Tok::At);
                i += 1;
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            '|' => {
                out.push(Tok::Pipe);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            ':' if next == Some(':') => {
                out.push(Tok::Axis);
                i += 2;
            }
            '=' => {
                out.push(Tok::Op(CmpOp::Eq));
                i += 1;
            }
            '!' if next == Some('=') => {
                out.push(Tok::Op(CmpOp::Ne));
                i += 2;
            }
            '<' | '>' => {
                let eq = next == Some('=');
                let op = match (c, eq) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    ('>', false) => CmpOp::Gt,
                    _ => CmpOp::Ge,
                };
                out.push(Tok::Op(op));
                i += if eq { 2 } else { 1 };
            }
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| Error::InvalidXpath("unterminated string literal".into()))?;
                out.push(Tok::Literal(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' if next == Some('.') => {
                out.push(Tok::DotDot);
                i += 2;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                out.push(Tok::Dot);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidXpath(format!("bad number {text:?}")))?;
                out.push(Tok::Number(n));
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                out.push(Tok::Name(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::InvalidXpath(format!("unexpected character {other:?}")));
            }
        }
    }
    Ok(out)
}

// ---- syntax ----

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "self" => Self::SelfAxis,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "attribute" => Self::Attribute,
            other => return Err(Error::UnsupportedXpath(format!("axis {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    Text,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Union(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
}

/// Bound on parenthesis/predicate/argument nesting plus operator chain length.
/// The parser and evaluator both recurse once per level.
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, off: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + off)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: Tok) -> Result<()> {
        match self.bump() {
            Some(t) if t == want => Ok(()),
            other => Err(Error::InvalidXpath(format!(
                "expected {want:?}, found {other:?}"
            ))),
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(Error::InvalidXpath(
                "expression nested too deeply".to_string(),
            ));
        }
        Ok(())
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == kw)
    }

    // Every nested expression and every chained operator deepens the AST by one.
    fn parse_or(&mut self) -> Result<Expr> {
        let saved = self.depth;
        self.descend()?;
        let mut lhs = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        self.depth = saved;
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let saved = self.depth;
        let mut lhs = self.parse_cmp()?;
        while self.at_keyword("and") {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_cmp()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        self.depth = saved;
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let saved = self.depth;
        let mut lhs = self.parse_union()?;
        while let Some(Tok::Op(op)) = self.peek().cloned() {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_union()?;
            lhs = Expr::Cmp(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = saved;
        Ok(lhs)
    }

    fn parse_union(&mut self) -> Result<Expr> {
        let saved = self.depth;
        let mut lhs = self.parse_path_expr()?;
        while self.peek() == Some(&Tok::Pipe) {
            self.pos += 1;
            self.descend()?;
            let rhs = self.parse_path_expr()?;
            lhs = Expr::Union(Box::new(lhs), Box::new(rhs));
        }
        self.depth = saved;
        Ok(lhs)
    }

    fn parse_path_expr(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Tok::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Tok::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Tok::LParen) => {
                self.pos += 1;
                let base = self.parse_or()?;
                self.expect(Tok::RParen)?;
                let predicates = self.parse_predicates()?;
                let steps = self.parse_continuation()?;
                Ok(Expr::Filter {
                    base: Box::new(base),
                    predicates,
                    steps,
                })
            }
            Some(Tok::Name(name))
                if self.peek_at(1) == Some(&Tok::LParen) && name != "text" && name != "node" =>
            {
                self.pos += 2;
                let mut args = Vec::new();
                if self.peek() != Some(&Tok::RParen) {
                    args.push(self.parse_or()?);
                    while self.peek() == Some(&Tok::Comma) {
                        self.pos += 1;
                        args.push(self.parse_or()?);
                    }
                }
                self.expect(Tok::RParen)?;
                Ok(Expr::Call(name, args))
            }
            _ => self.parse_location_path(),
        }
    }

    /// Steps following a filter expression, e.g. `(//div)[1]/span`.
    fn parse_continuation(&mut self) -> Result<Vec<Step>> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Slash) => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some(Tok::DoubleSlash) => {
                    self.pos += 1;
                    steps.push(descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_location_path(&mut self) -> Result<Expr> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Tok::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    return Ok(Expr::Path {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Tok::DoubleSlash) => {
                self.pos += 1;
                steps.push(descendant_or_self());
                true
            }
            _ => false,
        };
        steps.push(self.parse_step()?);
        steps.extend(self.parse_continuation()?);
        Ok(Expr::Path { absolute, steps })
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Name(_) | Tok::Star | Tok::At | Tok::Dot | Tok::DotDot)
        )
    }

    fn parse_step(&mut self) -> Result<Step> {
        match self.peek().cloned() {
            Some(Tok::Dot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: self.parse_predicates()?,
                });
            }
            Some(Tok::DotDot) => {
                self.pos += 1;
                return Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: self.parse_predicates()?,
                });
            }
            _ => {}
        }

        let axis = if self.peek() == Some(&Tok::At) {
            self.pos += 1;
            Axis::Attribute
        } else if let (Some(Tok::Name(name)), Some(Tok::Axis)) = (self.peek(), self.peek_at(1)) {
            let axis = Axis::from_name(name)?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = match self.bump() {
            Some(Tok::Star) => NodeTest::Any,
            Some(Tok::Name(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    self.pos += 1;
                    self.expect(Tok::RParen)?;
                    match name.as_str() {
                        "text" => NodeTest::Text,
                        "node" => NodeTest::Node,
                        other => {
                            return Err(Error::UnsupportedXpath(format!("node test {other}()")))
                        }
                    }
                } else {
                    NodeTest::Name(name.to_ascii_lowercase())
                }
            }
            other => {
                return Err(Error::InvalidXpath(format!(
                    "expected node test, found {other:?}"
                )))
            }
        };

        Ok(Step {
            axis,
            test,
            predicates: self.parse_predicates()?,
        })
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>> {
        let mut out = Vec::new();
        while self.peek() == Some(&Tok::LBracket) {
            self.pos += 1;
            out.push(self.parse_or()?);
            self.expect(Tok::RBracket)?;
        }
        Ok(out)
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}

// ---- evaluation ----

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Node(NodeId),
    /// Attribute value or text node content.
    Leaf(String),
}

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

struct Ctx {
    item: Item,
    pos: usize,
    size: usize,
}

struct Evaluator<'a> {
    tree: &'a DomTree,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr, ctx: &Ctx) -> Result<Value> {
        match expr {
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    vec![Item::Node(DOCUMENT_ROOT)]
                } else {
                    vec![ctx.item.clone()]
                };
                Ok(Value::Nodes(self.walk(start, steps)?))
            }
            Expr::Filter {
                base,
                predicates,
                steps,
            } => {
                let Value::Nodes(mut items) = self.eval(base, ctx)? else {
                    return Err(Error::UnsupportedXpath(
                        "predicates on a non node-set".to_string(),
                    ));
                };
                sort_nodes(&mut items);
                for pred in predicates {
                    items = self.filter(items, pred)?;
                }
                Ok(Value::Nodes(self.walk(items, steps)?))
            }
            Expr::Union(a, b) => {
                let (Value::Nodes(mut x), Value::Nodes(y)) = (self.eval(a, ctx)?, self.eval(b, ctx)?)
                else {
                    return Err(Error::InvalidXpath("union of non node-sets".to_string()));
                };
                x.extend(y);
                sort_nodes(&mut x);
                Ok(Value::Nodes(x))
            }
            Expr::Or(a, b) => Ok(Value::Bool(
                self.boolean(&self.eval(a, ctx)?) || self.boolean(&self.eval(b, ctx)?),
            )),
            Expr::And(a, b) => Ok(Value::Bool(
                self.boolean(&self.eval(a, ctx)?) && self.boolean(&self.eval(b, ctx)?),
            )),
            Expr::Cmp(op, a, b) => {
                let l = self.eval(a, ctx)?;
                let r = self.eval(b, ctx)?;
                Ok(Value::Bool(self.compare(*op, &l, &r)))
            }
            Expr::Call(name, args) => self.call(name, args, ctx),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Ctx) -> Result<Value> {
        let arity = |min: usize, max: usize| -> Result<()> {
            if args.len() < min || args.len() > max {
                return Err(Error::InvalidXpath(format!(
                    "{name}() takes {min}..={max} arguments, got {}",
                    args.len()
                )));
            }
            Ok(())
        };
        let str_arg = |i: usize| -> Result<String> {
            match args.get(i) {
                Some(e) => Ok(self.string(&self.eval(e, ctx)?)),
                None => Ok(self.item_string(&ctx.item)),
            }
        };
        match name {
            "contains" => {
                arity(2, 2)?;
                Ok(Value::Bool(str_arg(0)?.contains(&str_arg(1)?)))
            }
            "starts-with" => {
                arity(2, 2)?;
                Ok(Value::Bool(str_arg(0)?.starts_with(&str_arg(1)?)))
            }
            "ends-with" => {
                arity(2, 2)?;
                Ok(Value::Bool(str_arg(0)?.ends_with(&str_arg(1)?)))
            }
            "normalize-space" => {
                arity(0, 1)?;
                Ok(Value::Str(crate::dom::norm_ws(&str_arg(0)?)))
            }
            "string" => {
                arity(0, 1)?;
                Ok(Value::Str(str_arg(0)?))
            }
            "string-length" => {
                arity(0, 1)?;
                Ok(Value::Num(str_arg(0)?.chars().count() as f64))
            }
            "concat" => {
                if args.len() < 2 {
                    return Err(Error::InvalidXpath("concat() needs 2+ arguments".into()));
                }
                let mut s = String::new();
                for i in 0..args.len() {
                    s.push_str(&str_arg(i)?);
                }
                Ok(Value::Str(s))
            }
            "translate" => {
                arity(3, 3)?;
                let src = str_arg(0)?;
                let from: Vec<char> = str_arg(1)?.chars().collect();
                let to: Vec<char> = str_arg(2)?.chars().collect();
                let out = src
                    .chars()
                    .filter_map(|c| match from.iter().position(|f| *f == c) {
                        Some(i) => to.get(i).copied(),
                        None => Some(c),
                    })
                    .collect();
                Ok(Value::Str(out))
            }
            "lower-case" => {
                arity(1, 1)?;
                Ok(Value::Str(str_arg(0)?.to_lowercase()))
            }
            "not" => {
                arity(1, 1)?;
                Ok(Value::Bool(!self.boolean(&self.eval(&args[0], ctx)?)))
            }
            "true" => {
                arity(0, 0)?;
                Ok(Value::Bool(true))
            }
            "false" => {
                arity(0, 0)?;
                Ok(Value::Bool(false))
            }
            "position" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.pos as f64))
            }
            "last" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.size as f64))
            }
            "count" => {
                arity(1, 1)?;
                match self.eval(&args[0], ctx)? {
                    Value::Nodes(items) => Ok(Value::Num(items.len() as f64)),
                    _ => Err(Error::InvalidXpath("count() needs a node-set".into())),
                }
            }
            other => Err(Error::UnsupportedXpath(format!("function {other}()"))),
        }
    }

    fn walk(&self, mut items: Vec<Item>, steps: &[Step]) -> Result<Vec<Item>> {
        let slots = self.tree.element_count() + 1;
        for step in steps {
            let contexts: Vec<NodeId> = items
                .iter()
                .filter_map(|i| match i {
                    Item::Node(id) => Some(*id),
                    Item::Leaf(_) => None,
                })
                .collect();
            let mut seen = vec![false; slots];
            let mut next = Vec::new();
            let element_step = step.axis != Axis::Attribute && step.test != NodeTest::Text;
            if element_step && step.predicates.is_empty() {
                next.extend(
                    self.axis_union(&contexts, step.axis, &mut seen)
                        .into_iter()
                        .filter(|id| self.passes(*id, &step.test))
                        .map(Item::Node),
                );
            } else {
                for ctx_node in contexts {
                    let mut selected = self.axis(ctx_node, step);
                    for pred in &step.predicates {
                        selected = self.filter(selected, pred)?;
                    }
                    for item in selected {
                        match item {
                            Item::Node(id) => {
                                if let Some(s) = seen.get_mut(id) {
                                    if !*s {
                                        *s = true;
                                        next.push(item);
                                    }
                                }
                            }
                            leaf => next.push(leaf),
                        }
                    }
                }
            }
            if element_step {
                sort_nodes(&mut next);
            }
            items = next;
        }
        Ok(items)
    }

    /// Every node on `axis` from any of `contexts`, each at most once.
    ///
    /// Without predicates a node's position relative to its context is irrelevant, so
    /// walks stop at the first node an earlier context already covered.
    fn axis_union(&self, contexts: &[NodeId], axis: Axis, visited: &mut [bool]) -> Vec<NodeId> {
        let t = self.tree;
        let slots = visited.len();
        let mut out = Vec::new();
        let mut mark = |id: NodeId, out: &mut Vec<NodeId>| -> bool {
            match visited.get_mut(id) {
                Some(v) if !*v => {
                    *v = true;
                    out.push(id);
                    true
                }
                _ => false,
            }
        };
        match axis {
            Axis::Child => {
                for &c in contexts {
                    for child in t.element_children(c) {
                        mark(child, &mut out);
                    }
                }
            }
            Axis::Descendant | Axis::DescendantOrSelf => {
                for &c in contexts {
                    if axis == Axis::DescendantOrSelf && !mark(c, &mut out) {
                        continue;
                    }
                    let mut stack: Vec<NodeId> = t.element_children(c);
                    while let Some(n) = stack.pop() {
                        // A covered node had its whole subtree walked already.
                        if mark(n, &mut out) {
                            stack.extend(t.element_children(n));
                        }
                    }
                }
            }
            Axis::Parent => {
                for &c in contexts {
                    if let Some(p) = t.get(c).and_then(|n| n.parent) {
                        mark(p, &mut out);
                    }
                }
            }
            Axis::Ancestor | Axis::AncestorOrSelf => {
                for &c in contexts {
                    if axis == Axis::AncestorOrSelf && !mark(c, &mut out) {
                        continue;
                    }
                    let mut up = t.get(c).and_then(|n| n.parent);
                    while let Some(p) = up {
                        if !mark(p, &mut out) {
                            break;
                        }
                        up = t.get(p).and_then(|n| n.parent);
                    }
                }
            }
            Axis::SelfAxis => {
                for &c in contexts {
                    mark(c, &mut out);
                }
            }
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                // One scan per parent: everything after its first context child, or
                // before its last one.
                let mut is_ctx = vec![false; slots];
                for &c in contexts {
                    if let Some(x) = is_ctx.get_mut(c) {
                        *x = true;
                    }
                }
                let mut parent_done = vec![false; slots];
                for &c in contexts {
                    let Some(p) = t.get(c).and_then(|n| n.parent) else {
                        continue;
                    };
                    match parent_done.get_mut(p) {
                        Some(done) if !*done => *done = true,
                        _ => continue,
                    }
                    let siblings = t.element_children(p);
                    let hit = |s: &NodeId| is_ctx.get(*s).copied().unwrap_or(false);
                    if axis == Axis::FollowingSibling {
                        if let Some(first) = siblings.iter().position(hit) {
                            for &s in &siblings[first + 1..] {
                                mark(s, &mut out);
                            }
                        }
                    } else if let Some(last) = siblings.iter().rposition(hit) {
                        for &s in &siblings[..last] {
                            mark(s, &mut out);
                        }
                    }
                }
            }
            Axis::Attribute => {}
        }
        out
    }

    fn passes(&self, id: NodeId, test: &NodeTest) -> bool {
        match test {
            NodeTest::Node => true,
            NodeTest::Any => id != DOCUMENT_ROOT,
            NodeTest::Name(name) => id != DOCUMENT_ROOT && self.tree.tag(id) == name.as_str(),
            NodeTest::Text => false,
        }
    }

    fn filter(&self, items: Vec<Item>, pred: &Expr) -> Result<Vec<Item>> {
        let size = items.len();
        let mut out = Vec::with_capacity(size);
        for (i, item) in items.into_iter().enumerate() {
            let ctx = Ctx {
                item,
                pos: i + 1,
                size,
            };
            let keep = match self.eval(pred, &ctx)? {
                Value::Num(n) => n == ctx.pos as f64,
                v => self.boolean(&v),
            };
            if keep {
                out.push(ctx.item);
            }
        }
        Ok(out)
    }

    /// Nodes on `step.axis` from `node` that pass the node test, in proximity order.
    fn axis(&self, node: NodeId, step: &Step) -> Vec<Item> {
        let t = self.tree;
        if step.axis == Axis::Attribute {
            let Some(n) = t.get(node) else {
                return Vec::new();
            };
            return n
                .attrs
                .iter()
                .filter(|(k, _)| match &step.test {
                    NodeTest::Any | NodeTest::Node => true,
                    NodeTest::Name(name) => k == name,
                    NodeTest::Text => false,
                })
                .map(|(_, v)| Item::Leaf(v.clone()))
                .collect();
        }
        if step.test == NodeTest::Text {
            if step.axis != Axis::Child {
                return Vec::new();
            }
            return t
                .get(node)
                .map(|n| {
                    n.text_children()
                        .filter(|s| !s.trim().is_empty())
                        .map(|s| Item::Leaf(s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
        }

        let raw_parent = t.get(node).and_then(|n| n.parent);
        let candidates: Vec<NodeId> = match step.axis {
            Axis::Child => t.element_children(node),
            Axis::Descendant => t.descendants(node),
            Axis::DescendantOrSelf => {
                let mut v = vec![node];
                v.extend(t.descendants(node));
                v
            }
            Axis::Parent => raw_parent.into_iter().collect(),
            Axis::Ancestor | Axis::AncestorOrSelf => {
                let mut v = Vec::new();
                if step.axis == Axis::AncestorOrSelf {
                    v.push(node);
                }
                v.extend(t.ancestors(node));
                if node != DOCUMENT_ROOT {
                    v.push(DOCUMENT_ROOT);
                }
                v
            }
            Axis::SelfAxis => vec![node],
            Axis::FollowingSibling => t.following_siblings(node).collect(),
            Axis::PrecedingSibling => t.preceding_siblings(node).collect(),
            Axis::Attribute => Vec::new(),
        };

        candidates
            .into_iter()
            .filter(|id| self.passes(*id, &step.test))
            .map(Item::Node)
            .collect()
    }

    fn item_string(&self, item: &Item) -> String {
        match item {
            Item::Node(id) => self.tree.text_content(*id),
            Item::Leaf(s) => s.clone(),
        }
    }

    fn string(&self, v: &Value) -> String {
        match v {
            Value::Nodes(items) => items.first().map(|i| self.item_string(i)).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self, v: &Value) -> f64 {
        match v {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => self.string(other).trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn boolean(&self, v: &Value) -> bool {
        match v {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn compare(&self, op: CmpOp, l: &Value, r: &Value) -> bool {
        match (l, r) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let xs = Value::Str(self.item_string(x));
                b.iter()
                    .any(|y| self.compare_atomic(op, &xs, &Value::Str(self.item_string(y))))
            }),
            (Value::Nodes(a), other) => match other {
                Value::Bool(_) => self.compare_atomic(op, &Value::Bool(!a.is_empty()), other),
                _ => a
                    .iter()
                    .any(|x| self.compare_atomic(op, &Value::Str(self.item_string(x)), other)),
            },
            (other, Value::Nodes(b)) => match other {
                Value::Bool(_) => self.compare_atomic(op, other, &Value::Bool(!b.is_empty())),
                _ => b
                    .iter()
                    .any(|y| self.compare_atomic(op, other, &Value::Str(self.item_string(y)))),
            },
            _ => self.compare_atomic(op, l, r),
        }
    }

    fn compare_atomic(&self, op: CmpOp, l: &Value, r: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let eq = match (l, r) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => self.boolean(l) == self.boolean(r),
                    (Value::Num(_), _) | (_, Value::Num(_)) => self.number(l) == self.number(r),
                    _ => self.string(l) == self.string(r),
                };
                if op == CmpOp::Eq {
                    eq
                } else {
                    !eq
                }
            }
            _ => {
                let (a, b) = (self.number(l), self.number(r));
                match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    _ => a >= b,
                }
            }
        }
    }
}

/// Document order, duplicates removed. Leaves keep their relative order after nodes.
fn sort_nodes(items: &mut Vec<Item>) {
    let mut nodes: Vec<NodeId> = Vec::new();
    let mut leaves = Vec::new();
    for item in items.drain(..) {
        match item {
            Item::Node(id) => nodes.push(id),
            leaf => leaves.push(leaf),
        }
    }
    nodes.sort_unstable();
    nodes.dedup();
    items.extend(nodes.into_iter().map(Item::Node));
    items.extend(leaves);
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
