//! Arena document tree with explicit integer node ids.
//!
//! HTML is parsed with `scraper` (html5ever) and copied into a [`DomTree`] whose
//! element ids are assigned in document pre-order at construction time. Id order is
//! therefore document order, which the XPath evaluator and the pruner rely on.
//!
//! The parsed `scraper::Html` is kept next to the arena so CSS selectors can be
//! evaluated with `scraper`'s matcher; elements are paired with arena ids by walking
//! both trees in the same pre-order.

use domtrim_core::{Error, Result};
use std::collections::HashMap;

pub type NodeId = usize;

/// Id of the synthetic document node that owns the root element.
pub const DOCUMENT_ROOT: NodeId = 0;

const DOCUMENT_TAG: &str = "#document";

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Elements dropped before discovery: they carry no interactable context.
const NOISE_SELECTOR: &str = "script, style, noscript, template, link, meta, [hidden], \
     [aria-hidden=\"true\"], [style*=\"display:none\"], [style*=\"display: none\"], \
     [style*=\"visibility:hidden\"], [style*=\"visibility: hidden\"]";

pub(crate) fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `s` cut to `max` characters, with `...` appended when anything was cut.
pub(crate) fn preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &s[..cut]),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Child {
    Element(NodeId),
    Text(String),
}

fn child_element(c: &Child) -> Option<NodeId> {
    match c {
        Child::Element(id) => Some(*id),
        Child::Text(_) => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomNode {
    pub tag: String,
    /// Source order; names are lowercased.
    pub attrs: Vec<(String, String)>,
    /// Non-owning back reference. `None` only for [`DOCUMENT_ROOT`].
    pub parent: Option<NodeId>,
    pub children: Vec<Child>,
}

impl DomNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|s| !s.is_empty())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }

    pub fn element_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(child_element)
    }

    pub fn text_children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|c| match c {
            Child::Text(t) => Some(t.as_str()),
            Child::Element(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomTree {
    nodes: Vec<DomNode>,
}

impl Default for DomTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomTree {
    /// A tree holding only the document node.
    pub fn new() -> Self {
        Self {
            nodes: vec![DomNode {
                tag: DOCUMENT_TAG.to_string(),
                attrs: Vec::new(),
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Number of elements (the document node is not counted).
    pub fn element_count(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn get(&self, id: NodeId) -> Option<&DomNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id != DOCUMENT_ROOT && id < self.nodes.len()
    }

    pub fn tag(&self, id: NodeId) -> &str {
        self.nodes.get(id).map(|n| n.tag.as_str()).unwrap_or("")
    }

    /// All element ids in document order.
    pub fn elements(&self) -> impl Iterator<Item = NodeId> {
        1..self.nodes.len()
    }

    /// Append a new element as the last child of `parent`.
    ///
    /// Appending depth-first keeps ids in document order.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: Vec<(String, String)>,
    ) -> Result<NodeId> {
        if parent >= self.nodes.len() {
            return Err(Error::UnknownNode(parent));
        }
        let id = self.nodes.len();
        self.nodes.push(DomNode {
            tag: tag.to_ascii_lowercase(),
            attrs,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(Child::Element(id));
        Ok(id)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<()> {
        let node = self
            .nodes
            .get_mut(parent)
            .ok_or(Error::UnknownNode(parent))?;
        if text.is_empty() {
            return Ok(());
        }
        // Adjacent text segments merge, as they would in a re-parse.
        if let Some(Child::Text(prev)) = node.children.last_mut() {
            prev.push_str(text);
        } else {
            node.children.push(Child::Text(text.to_string()));
        }
        Ok(())
    }

    /// Parent element, `None` for the root element and the document node.
    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .get(id)
            .and_then(|n| n.parent)
            .filter(|p| *p != DOCUMENT_ROOT)
    }

    /// Element ancestors, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.parent_element(id),
        }
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| n.element_children().collect())
            .unwrap_or_default()
    }

    /// Element siblings of `id` (excluding itself) split into (preceding, following),
    /// both in document order.
    pub fn element_siblings(&self, id: NodeId) -> (Vec<NodeId>, Vec<NodeId>) {
        let (before, after) = self.sibling_split(id);
        (
            before.iter().filter_map(child_element).collect(),
            after.iter().filter_map(child_element).collect(),
        )
    }

    /// Element siblings after `id`, nearest first.
    pub fn following_siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.sibling_split(id).1.iter().filter_map(child_element)
    }

    /// Element siblings before `id`, nearest first.
    pub fn preceding_siblings(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.sibling_split(id).0.iter().rev().filter_map(child_element)
    }

    fn sibling_split(&self, id: NodeId) -> (&[Child], &[Child]) {
        let Some(siblings) = self
            .nodes
            .get(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.nodes.get(p))
            .map(|p| p.children.as_slice())
        else {
            return (&[], &[]);
        };
        match siblings
            .iter()
            .position(|c| matches!(c, Child::Element(e) if *e == id))
        {
            Some(i) => (&siblings[..i], &siblings[i + 1..]),
            None => (&[], &[]),
        }
    }

    /// Element descendants in document order (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.element_children(id).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.element_children(n).into_iter().rev());
        }
        out
    }

    /// Whitespace-normalized text of the node's direct text children only.
    pub fn own_text(&self, id: NodeId) -> String {
        match self.nodes.get(id) {
            Some(n) => norm_ws(&n.text_children().collect::<Vec<_>>().join(" ")),
            None => String::new(),
        }
    }

    /// Raw concatenation of all descendant text (XPath string-value).
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack: Vec<&Child> = match self.nodes.get(id) {
            Some(n) => n.children.iter().rev().collect(),
            None => return out,
        };
        while let Some(c) = stack.pop() {
            match c {
                Child::Text(t) => out.push_str(t),
                Child::Element(e) => {
                    if let Some(n) = self.nodes.get(*e) {
                        stack.extend(n.children.iter().rev());
                    }
                }
            }
        }
        out
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.nodes[DOCUMENT_ROOT].element_children().next()
    }

    pub fn first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.elements().find(|id| self.nodes[*id].tag.eq_ignore_ascii_case(tag))
    }

    /// First element carrying `id="…"`, like `getElementById`.
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        if id.is_empty() {
            return None;
        }
        self.elements().find(|n| self.nodes[*n].id() == Some(id))
    }

    pub fn to_html(&self) -> String {
        enum Step<'a> {
            Node(NodeId),
            Text(&'a str, bool),
            Close(&'a str),
        }

        let mut out = String::new();
        let mut stack: Vec<Step<'_>> = Vec::new();
        push_children(&mut stack, &self.nodes[DOCUMENT_ROOT], false);

        fn push_children<'a>(stack: &mut Vec<Step<'a>>, node: &'a DomNode, raw: bool) {
            for c in node.children.iter().rev() {
                match c {
                    Child::Element(id) => stack.push(Step::Node(*id)),
                    Child::Text(t) => stack.push(Step::Text(t, raw)),
                }
            }
        }

        while let Some(step) = stack.pop() {
            match step {
                Step::Text(t, raw) => {
                    if raw {
                        out.push_str(t);
                    } else {
                        escape_into(&mut out, t, false);
                    }
                }
                Step::Close(tag) => {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
                Step::Node(id) => {
                    let node = &self.nodes[id];
                    out.push('<');
                    out.push_str(&node.tag);
                    for (k, v) in &node.attrs {
                        out.push(' ');
                        out.push_str(k);
                        out.push_str("=\"");
                        escape_into(&mut out, v, true);
                        out.push('"');
                    }
                    out.push('>');
                    if VOID_ELEMENTS.contains(&node.tag.as_str()) {
                        continue;
                    }
                    stack.push(Step::Close(&node.tag));
                    let raw = RAW_TEXT_ELEMENTS.contains(&node.tag.as_str());
                    push_children(&mut stack, node, raw);
                }
            }
        }
        out
    }
}

pub struct Ancestors<'a> {
    tree: &'a DomTree,
    next: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let cur = self.next?;
        self.next = self.tree.parent_element(cur);
        Some(cur)
    }
}

pub(crate) fn escape_into(out: &mut String, s: &str, attr: bool) {
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attr => out.push_str("&lt;"),
            '>' if !attr => out.push_str("&gt;"),
            '"' if attr => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// A parsed request document: the arena plus the `scraper` parse it was built from.
///
/// Not `Send`: build, query and drop it within one synchronous call.
pub struct Document {
    tree: DomTree,
    source: html_scraper::Html,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("elements", &self.tree.element_count())
            .finish()
    }
}

impl Document {
    pub fn parse(html: &str) -> Self {
        let source = html_scraper::Html::parse_document(html);
        let tree = build_tree(&source);
        Self { tree, source }
    }

    /// Parse and drop noise (scripts, styles, metadata, hidden elements, comments)
    /// before the arena is built.
    pub fn parse_cleaned(html: &str) -> Self {
        let mut source = html_scraper::Html::parse_document(html);
        let removed = remove_noise(&mut source);
        tracing::debug!(removed, "removed noise nodes");
        let tree = build_tree(&source);
        Self { tree, source }
    }

    pub fn tree(&self) -> &DomTree {
        &self.tree
    }

    pub fn into_tree(self) -> DomTree {
        self.tree
    }

    /// Evaluate a CSS selector; matches are returned in document order.
    pub fn select_css(&self, selector: &str) -> Result<Vec<NodeId>> {
        let sel = html_scraper::Selector::parse(selector)
            .map_err(|e| Error::InvalidSelector(e.to_string()))?;
        // Arena ids follow the same element pre-order, offset by the document node.
        let out = self
            .source
            .tree
            .root()
            .descendants()
            .filter_map(html_scraper::ElementRef::wrap)
            .enumerate()
            .filter(|(_, el)| sel.matches(el))
            .map(|(i, _)| i + 1)
            .collect();
        Ok(out)
    }

    /// Evaluate an XPath expression (supported subset, see [`crate::xpath`]).
    pub fn select_xpath(&self, expr: &str) -> Result<Vec<NodeId>> {
        crate::xpath::evaluate(&self.tree, expr)
    }
}

fn remove_noise(doc: &mut html_scraper::Html) -> usize {
    let mut doomed = Vec::new();
    if let Ok(sel) = html_scraper::Selector::parse(NOISE_SELECTOR) {
        doomed.extend(doc.select(&sel).map(|el| el.id()));
    }
    doomed.extend(
        doc.tree
            .root()
            .descendants()
            .filter(|n| n.value().is_comment())
            .map(|n| n.id()),
    );
    let n = doomed.len();
    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    n
}

fn build_tree(doc: &html_scraper::Html) -> DomTree {
    let mut tree = DomTree::new();
    let root = doc.tree.root();
    let mut index = HashMap::new();
    index.insert(root.id(), DOCUMENT_ROOT);

    for node in root.descendants().skip(1) {
        let parent = node
            .parent()
            .and_then(|p| index.get(&p.id()).copied())
            .unwrap_or(DOCUMENT_ROOT);
        match node.value() {
            html_scraper::Node::Element(el) => {
                let attrs = el
                    .attrs()
                    .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                    .collect();
                // Parents are always registered before their children in pre-order.
                if let Ok(id) = tree.append_element(parent, el.name(), attrs) {
                    index.insert(node.id(), id);
                }
            }
            html_scraper::Node::Text(t) => {
                if parent != DOCUMENT_ROOT {
                    let _ = tree.append_text(parent, &t.text);
                }
            }
            _ => {}
        }
    }
    tree
}
