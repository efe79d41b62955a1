//! Interactive query surface over one request's document.
//!
//! A [`QueryContext`] is created per request, borrowed by each query and dropped or
//! [`QueryContext::clear`]ed when the request ends. There is no shared or global
//! document.

use crate::dom::{escape_into, norm_ws, preview, Document, DomTree, NodeId};
use domtrim_core::{Error, Result};
use serde::{Deserialize, Serialize};

pub const SELECTOR_LIMIT: usize = 10;
pub const TEXT_LIMIT: usize = 20;
pub const ATTRIBUTE_LIMIT: usize = 20;
pub const INTERACTIVE_LIMIT: usize = 50;

pub const INTERACTIVE_TAGS: [&str; 5] = ["input", "button", "a", "select", "textarea"];

const TEXT_PREVIEW_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum DomQuery {
    Id { id: String },
    Css { selector: String },
    Xpath { expr: String },
    Text { text: String },
    Attribute { name: String, value: Option<String> },
    Interactive,
}

impl DomQuery {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Id { .. } => "id",
            Self::Css { .. } => "css",
            Self::Xpath { .. } => "xpath",
            Self::Text { .. } => "text",
            Self::Attribute { .. } => "attribute",
            Self::Interactive => "interactive",
        }
    }

    pub fn limit(&self) -> usize {
        match self {
            Self::Id { .. } => 1,
            Self::Css { .. } | Self::Xpath { .. } => SELECTOR_LIMIT,
            Self::Text { .. } => TEXT_LIMIT,
            Self::Attribute { .. } => ATTRIBUTE_LIMIT,
            Self::Interactive => INTERACTIVE_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub node: NodeId,
    pub tag: String,
    pub id: String,
    pub class: String,
    pub name: String,
    pub data_testid: String,
    /// Normalized text content, cut to 50 characters.
    pub text: String,
}

impl ElementSummary {
    pub fn of(tree: &DomTree, node: NodeId) -> Option<Self> {
        let n = tree.get(node)?;
        let text = preview(&norm_ws(&tree.text_content(node)), TEXT_PREVIEW_CHARS);
        let attr = |k: &str| n.attr(k).unwrap_or("").to_string();
        Some(Self {
            node,
            tag: n.tag.clone(),
            id: attr("id"),
            class: attr("class"),
            name: attr("name"),
            data_testid: attr("data-testid"),
            text,
        })
    }

    /// One-line pseudo-markup carrying the attributes locators usually target.
    pub fn to_markup(&self) -> String {
        let mut out = format!("<{}", self.tag);
        for (k, v) in [
            ("id", &self.id),
            ("class", &self.class),
            ("name", &self.name),
            ("data-testid", &self.data_testid),
        ] {
            out.push_str(&format!(" {k}=\""));
            escape_into(&mut out, v, true);
            out.push('"');
        }
        out.push('>');
        escape_into(&mut out, &self.text, false);
        out.push_str(&format!("</{}>", self.tag));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub kind: String,
    /// Matches before the per-query limit was applied.
    pub total: usize,
    pub elements: Vec<ElementSummary>,
}

impl QueryResult {
    fn new(tree: &DomTree, kind: &str, nodes: Vec<NodeId>, limit: usize) -> Self {
        let total = nodes.len();
        let elements = nodes
            .into_iter()
            .take(limit)
            .filter_map(|n| ElementSummary::of(tree, n))
            .collect();
        Self {
            kind: kind.to_string(),
            total,
            elements,
        }
    }

    pub fn truncated(&self) -> usize {
        self.total.saturating_sub(self.elements.len())
    }

    /// Plain-text listing suitable for handing to a model.
    pub fn render(&self) -> String {
        if self.kind == "id" {
            return match self.elements.first() {
                Some(e) => e.to_markup(),
                None => "Not found".to_string(),
            };
        }
        if self.elements.is_empty() {
            return "No elements found".to_string();
        }
        let mut out = format!("Found {} elements:\n", self.elements.len());
        let lines: Vec<String> = self.elements.iter().map(ElementSummary::to_markup).collect();
        out.push_str(&lines.join("\n"));
        if self.truncated() > 0 {
            out.push_str(&format!("\n... and {} more elements", self.truncated()));
        }
        out
    }
}

/// Request-scoped handle on "the current document".
#[derive(Debug, Default)]
pub struct QueryContext {
    doc: Option<Document>,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context over the raw (uncleaned) markup.
    pub fn from_html(html: &str) -> Self {
        Self {
            doc: Some(Document::parse(html)),
        }
    }

    pub fn set_document(&mut self, doc: Document) {
        self.doc = Some(doc);
    }

    pub fn clear(&mut self) {
        self.doc = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.doc.is_some()
    }

    pub fn document(&self) -> Result<&Document> {
        self.doc.as_ref().ok_or(Error::NoDocument)
    }

    pub fn run(&self, query: &DomQuery) -> Result<QueryResult> {
        let doc = self.document()?;
        let tree = doc.tree();
        let nodes = match query {
            DomQuery::Id { id } => tree.find_by_id(id.trim()).into_iter().collect(),
            DomQuery::Css { selector } => doc.select_css(selector)?,
            DomQuery::Xpath { expr } => doc.select_xpath(expr)?,
            DomQuery::Text { text } => own_text_matches(tree, text),
            DomQuery::Attribute { name, value } => attribute_matches(tree, name, value.as_deref())?,
            DomQuery::Interactive => tree
                .elements()
                .filter(|n| INTERACTIVE_TAGS.contains(&tree.tag(*n)))
                .collect(),
        };
        tracing::debug!(kind = query.kind(), total = nodes.len(), "dom query");
        Ok(QueryResult::new(tree, query.kind(), nodes, query.limit()))
    }

    pub fn find_by_id(&self, id: &str) -> Result<QueryResult> {
        self.run(&DomQuery::Id { id: id.to_string() })
    }

    pub fn find_by_css(&self, selector: &str) -> Result<QueryResult> {
        self.run(&DomQuery::Css {
            selector: selector.to_string(),
        })
    }

    pub fn find_by_xpath(&self, expr: &str) -> Result<QueryResult> {
        self.run(&DomQuery::Xpath {
            expr: expr.to_string(),
        })
    }

    pub fn find_by_text(&self, text: &str) -> Result<QueryResult> {
        self.run(&DomQuery::Text {
            text: text.to_string(),
        })
    }

    pub fn find_by_attribute(&self, name: &str, value: Option<&str>) -> Result<QueryResult> {
        self.run(&DomQuery::Attribute {
            name: name.to_string(),
            value: value.map(str::to_string),
        })
    }

    pub fn interactive_elements(&self) -> Result<QueryResult> {
        self.run(&DomQuery::Interactive)
    }
}

/// Case-insensitive containment against each element's own text.
fn own_text_matches(tree: &DomTree, text: &str) -> Vec<NodeId> {
    let needle = norm_ws(text).to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    tree.elements()
        .filter(|n| tree.own_text(*n).to_lowercase().contains(&needle))
        .collect()
}

fn attribute_matches(tree: &DomTree, name: &str, value: Option<&str>) -> Result<Vec<NodeId>> {
    let name = name.trim();
    if name.is_empty() || name.contains(|c: char| c.is_whitespace() || "[]='\"".contains(c)) {
        return Err(Error::InvalidSelector(format!("bad attribute name {name:?}")));
    }
    let value = value.filter(|v| !v.is_empty());
    Ok(tree
        .elements()
        .filter(|n| match tree.get(*n).and_then(|e| e.attr(name)) {
            Some(v) => value.map_or(true, |want| v == want),
            None => false,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <form id="login" class="card">
          <input id="user" name="username" data-testid="user-input">
          <input id="pass" name="password" type="password">
          <button type="submit" data-testid="submit">Sign In</button>
          <a href="/forgot">Forgot your password? Click here to reset it via email today</a>
        </form>
        <select name="lang"><option>en</option></select>
        <textarea name="notes"></textarea>
        </body></html>"#;

    #[test]
    fn find_by_id_renders_single_element() {
        let ctx = QueryContext::from_html(PAGE);
        let r = ctx.find_by_id("user").expect("query");
        assert_eq!(
            r.render(),
            r#"<input id="user" class="" name="username" data-testid="user-input"></input>"#
        );
        assert_eq!(ctx.find_by_id("nope").expect("query").render(), "Not found");
    }

    #[test]
    fn css_and_xpath_queries_list_matches() {
        let ctx = QueryContext::from_html(PAGE);
        let r = ctx.find_by_css("form input").expect("css");
        assert_eq!(r.total, 2);
        assert!(r.render().starts_with("Found 2 elements:\n<input id=\"user\""));

        let r = ctx.find_by_xpath("//button[@data-testid='submit']").expect("xpath");
        assert_eq!(r.elements[0].text, "Sign In");

        assert!(matches!(
            ctx.find_by_css("input[["),
            Err(Error::InvalidSelector(_))
        ));
        assert!(ctx.find_by_xpath("//input[").is_err());
    }

    #[test]
    fn text_search_is_case_insensitive_on_own_text() {
        let ctx = QueryContext::from_html(PAGE);
        let r = ctx.find_by_text("sign in").expect("text");
        assert_eq!(r.total, 1);
        assert_eq!(r.elements[0].tag, "button");
        // the form only contains the text through its descendants
        assert!(r.elements.iter().all(|e| e.tag != "form"));
        assert_eq!(ctx.find_by_text("zzz").expect("text").render(), "No elements found");
    }

    #[test]
    fn long_text_is_previewed() {
        let ctx = QueryContext::from_html(PAGE);
        let r = ctx.find_by_text("forgot").expect("text");
        assert!(r.elements[0].text.ends_with("..."));
        assert_eq!(r.elements[0].text.chars().count(), 53);
    }

    #[test]
    fn markup_escapes_attribute_values_and_text() {
        let ctx = QueryContext::from_html(
            r#"<body><p id="q" class='a"b' data-testid="x&amp;y">1 &lt; 2</p></body>"#,
        );
        let r = ctx.find_by_id("q").expect("query");
        assert_eq!(
            r.render(),
            r#"<p id="q" class="a&quot;b" name="" data-testid="x&amp;y">1 &lt; 2</p>"#
        );
    }

    #[test]
    fn attribute_search_with_and_without_value() {
        let ctx = QueryContext::from_html(PAGE);
        assert_eq!(ctx.find_by_attribute("data-testid", None).expect("attr").total, 2);
        assert_eq!(
            ctx.find_by_attribute("type", Some("password"))
                .expect("attr")
                .elements[0]
                .id,
            "pass"
        );
        assert!(ctx.find_by_attribute("", None).is_err());
        assert!(ctx.find_by_attribute("a]b", None).is_err());
    }

    #[test]
    fn interactive_elements_are_capped() {
        let ctx = QueryContext::from_html(PAGE);
        let r = ctx.interactive_elements().expect("interactive");
        let tags: Vec<&str> = r.elements.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["input", "input", "button", "a", "select", "textarea"]);

        let mut html = String::from("<body>");
        for i in 0..60 {
            html.push_str(&format!("<button id=b{i}>b</button>"));
        }
        let ctx = QueryContext::from_html(&html);
        let r = ctx.interactive_elements().expect("interactive");
        assert_eq!(r.total, 60);
        assert_eq!(r.elements.len(), INTERACTIVE_LIMIT);
        assert!(r.render().ends_with("\n... and 10 more elements"));
    }

    #[test]
    fn cleared_context_has_no_document() {
        let mut ctx = QueryContext::from_html(PAGE);
        assert!(ctx.is_loaded());
        ctx.clear();
        assert!(!ctx.is_loaded());
        assert_eq!(ctx.find_by_id("user"), Err(Error::NoDocument));
    }

    #[test]
    fn queries_deserialize_from_tagged_json() {
        let q: DomQuery =
            serde_json::from_str(r#"{"by":"attribute","name":"role","value":null}"#).expect("json");
        assert_eq!(
            q,
            DomQuery::Attribute {
                name: "role".into(),
                value: None
            }
        );
        let q: DomQuery = serde_json::from_str(r#"{"by":"interactive"}"#).expect("json");
        assert_eq!(q.limit(), INTERACTIVE_LIMIT);
    }
}
