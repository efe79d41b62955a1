//! Context-preserving tree pruning.

use crate::discovery::ScoredCandidate;
use crate::dom::{Child, DomTree, NodeId, DOCUMENT_ROOT};
use domtrim_core::{Error, ReduceConfig, Result};

pub const NO_MATCH_MESSAGE: &str = "No matching elements found for the given locator.";

const ANCHOR_TAGS: [&str; 2] = ["html", "body"];

pub trait TreePruner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Build a new tree holding only the context around `candidates`.
    fn prune(
        &self,
        tree: &DomTree,
        candidates: &[ScoredCandidate],
        cfg: &ReduceConfig,
    ) -> Result<DomTree>;
}

/// Nodes kept by one pruning run, keyed by arena id.
#[derive(Debug, Clone)]
pub struct PreservationSet {
    marks: Vec<bool>,
    len: usize,
}

impl PreservationSet {
    fn new(tree: &DomTree) -> Self {
        Self {
            marks: vec![false; tree.element_count() + 1],
            len: 0,
        }
    }

    fn insert(&mut self, id: NodeId) {
        if let Some(m) = self.marks.get_mut(id) {
            if !*m {
                *m = true;
                self.len += 1;
            }
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.marks.get(id).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The candidate, a bounded ancestor chain plus the `html`/`body` anchors, a sibling
/// window and a bounded descendant subtree, for every candidate.
pub fn preservation_set(
    tree: &DomTree,
    candidates: &[ScoredCandidate],
    cfg: &ReduceConfig,
) -> Result<PreservationSet> {
    let mut keep = PreservationSet::new(tree);
    for c in candidates {
        let node = c.node;
        if !tree.contains(node) {
            return Err(Error::UnknownNode(node));
        }
        keep.insert(node);

        for (depth, anc) in tree.ancestors(node).enumerate() {
            if depth < cfg.max_parent_depth || ANCHOR_TAGS.contains(&tree.tag(anc)) {
                keep.insert(anc);
            }
        }

        let (before, after) = tree.element_siblings(node);
        for s in before.iter().rev().take(cfg.max_sibling_count) {
            keep.insert(*s);
        }
        for s in after.iter().take(cfg.max_sibling_count) {
            keep.insert(*s);
        }

        add_children(tree, node, cfg, &mut keep);
    }
    Ok(keep)
}

fn add_children(tree: &DomTree, node: NodeId, cfg: &ReduceConfig, keep: &mut PreservationSet) {
    let mut stack = vec![(node, 0usize)];
    while let Some((n, depth)) = stack.pop() {
        if depth >= cfg.max_child_depth {
            continue;
        }
        for child in tree
            .element_children(n)
            .into_iter()
            .take(cfg.max_children_preserved)
        {
            keep.insert(child);
            stack.push((child, depth + 1));
        }
    }
}

/// `html > body > p` carrying an informational message.
pub fn placeholder_tree() -> Result<DomTree> {
    let mut out = DomTree::new();
    let html = out.append_element(DOCUMENT_ROOT, "html", Vec::new())?;
    let body = out.append_element(html, "body", Vec::new())?;
    let p = out.append_element(body, "p", Vec::new())?;
    out.append_text(p, NO_MATCH_MESSAGE)?;
    Ok(out)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextPruner;

impl TreePruner for ContextPruner {
    fn name(&self) -> &'static str {
        "context"
    }

    fn prune(
        &self,
        tree: &DomTree,
        candidates: &[ScoredCandidate],
        cfg: &ReduceConfig,
    ) -> Result<DomTree> {
        if candidates.is_empty() {
            tracing::debug!("no candidates; returning placeholder tree");
            return placeholder_tree();
        }
        let keep = preservation_set(tree, candidates, cfg)?;
        tracing::debug!(
            candidates = candidates.len(),
            preserved = keep.len(),
            "built preservation set"
        );
        rebuild(tree, &keep)
    }
}

fn rebuild(src: &DomTree, keep: &PreservationSet) -> Result<DomTree> {
    let src_html = src.first_by_tag("html").ok_or(Error::EmptyDocument)?;
    let mut out = DomTree::new();
    let html = out.append_element(DOCUMENT_ROOT, "html", Vec::new())?;

    let children = src.element_children(src_html);
    let head = children.iter().copied().find(|c| src.tag(*c) == "head");
    let body = children.iter().copied().find(|c| src.tag(*c) == "body");

    if let Some(head) = head.filter(|h| keep.contains(*h)) {
        let new_head = out.append_element(html, "head", Vec::new())?;
        if let Some(title) = src
            .descendants(head)
            .into_iter()
            .find(|d| src.tag(*d) == "title")
        {
            deep_copy(src, title, &mut out, new_head)?;
        }
    }
    if let Some(body) = body {
        let new_body = out.append_element(html, "body", Vec::new())?;
        copy_preserved(src, body, keep.contains(body), keep, &mut out, new_body)?;
    }
    Ok(out)
}

/// Shallow-clone preserved descendants of `from` under `to`, in document order.
///
/// Text is copied only for preserved sources; preserved nodes below an unpreserved
/// element attach to `to`, their nearest preserved ancestor. Walks with an explicit
/// stack so nesting depth is bounded by memory, not the call stack.
fn copy_preserved(
    src: &DomTree,
    from: NodeId,
    from_kept: bool,
    keep: &PreservationSet,
    out: &mut DomTree,
    to: NodeId,
) -> Result<()> {
    // (child, whether its source parent was kept, output parent)
    let mut stack: Vec<(&Child, bool, NodeId)> = Vec::new();
    push_children(src, from, from_kept, to, &mut stack)?;
    while let Some((child, parent_kept, target)) = stack.pop() {
        match child {
            Child::Text(t) => {
                if parent_kept {
                    out.append_text(target, t)?;
                }
            }
            Child::Element(id) => {
                if keep.contains(*id) {
                    let el = src.get(*id).ok_or(Error::UnknownNode(*id))?;
                    let clone = out.append_element(target, &el.tag, el.attrs.clone())?;
                    push_children(src, *id, true, clone, &mut stack)?;
                } else {
                    push_children(src, *id, false, target, &mut stack)?;
                }
            }
        }
    }
    Ok(())
}

fn push_children<'a>(
    src: &'a DomTree,
    node: NodeId,
    kept: bool,
    target: NodeId,
    stack: &mut Vec<(&'a Child, bool, NodeId)>,
) -> Result<()> {
    let n = src.get(node).ok_or(Error::UnknownNode(node))?;
    stack.extend(n.children.iter().rev().map(|c| (c, kept, target)));
    Ok(())
}

fn deep_copy(src: &DomTree, from: NodeId, out: &mut DomTree, to: NodeId) -> Result<()> {
    let el = src.get(from).ok_or(Error::UnknownNode(from))?;
    let clone = out.append_element(to, &el.tag, el.attrs.clone())?;
    let mut stack: Vec<(&Child, bool, NodeId)> = Vec::new();
    push_children(src, from, true, clone, &mut stack)?;
    while let Some((child, _, target)) = stack.pop() {
        match child {
            Child::Text(t) => out.append_text(target, t)?,
            Child::Element(id) => {
                let el = src.get(*id).ok_or(Error::UnknownNode(*id))?;
                let clone = out.append_element(target, &el.tag, el.attrs.clone())?;
                push_children(src, *id, true, clone, &mut stack)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;

    const SAMPLE: &str = r#"<html><head><title>Shop</title><meta charset="utf-8"></head><body><nav><a href="/">Home</a></nav><div id="header"><input id="searchBox" name="q"/></div><footer>bye</footer></body></html>"#;

    fn cand(node: NodeId) -> ScoredCandidate {
        ScoredCandidate {
            node,
            score: 100,
            reason: "test".into(),
        }
    }

    fn count_tag(t: &DomTree, tag: &str) -> usize {
        t.elements().filter(|id| t.tag(*id) == tag).count()
    }

    #[test]
    fn keeps_candidate_parent_and_skeleton() {
        let doc = Document::parse(SAMPLE);
        let t = doc.tree();
        let input = t.find_by_id("searchBox").expect("input");
        let out = ContextPruner
            .prune(t, &[cand(input)], &ReduceConfig::default())
            .expect("prune");
        let html = out.to_html();
        assert!(html.starts_with("<html>"));
        assert!(html.contains(r#"<div id="header"><input id="searchBox" name="q"></div>"#));
        // head is an ancestor-free branch: not preserved, so not emitted
        assert!(!html.contains("<head>"));
        assert_eq!(count_tag(&out, "html"), 1);
        assert_eq!(count_tag(&out, "body"), 1);
    }

    #[test]
    fn siblings_window_is_bounded() {
        let cfg = ReduceConfig::default();
        let html = "<html><body><ul><li>1</li><li>2</li><li>3</li><li id=m>4</li><li>5</li><li>6</li><li>7</li><li>8</li></ul></body></html>";
        let doc = Document::parse(html);
        let t = doc.tree();
        let m = t.find_by_id("m").expect("m");
        let out = ContextPruner.prune(t, &[cand(m)], &cfg).expect("prune");
        let texts: Vec<String> = out
            .elements()
            .filter(|id| out.tag(*id) == "li")
            .map(|id| out.own_text(id))
            .collect();
        assert_eq!(texts, vec!["2", "3", "4", "5", "6"]);
    }

    #[test]
    fn children_are_capped_per_level() {
        let cfg = ReduceConfig {
            max_children_preserved: 2,
            max_child_depth: 1,
            max_sibling_count: 0,
            ..Default::default()
        };
        let html = "<html><body><div id=c><p>a<b>deep</b></p><p>b</p><p>c</p></div></body></html>";
        let doc = Document::parse(html);
        let t = doc.tree();
        let c = t.find_by_id("c").expect("c");
        let out = ContextPruner.prune(t, &[cand(c)], &cfg).expect("prune");
        assert_eq!(
            out.to_html(),
            r#"<html><body><div id="c"><p>a</p><p>b</p></div></body></html>"#
        );
    }

    #[test]
    fn deep_candidates_keep_anchors() {
        let mut html = String::from("<html><body>");
        for i in 0..10 {
            html.push_str(&format!("<div class=\"l{i}\">"));
        }
        html.push_str("<span id=deep>x</span>");
        for _ in 0..10 {
            html.push_str("</div>");
        }
        html.push_str("</body></html>");
        let doc = Document::parse(&html);
        let t = doc.tree();
        let deep = t.find_by_id("deep").expect("deep");
        let out = ContextPruner
            .prune(t, &[cand(deep)], &ReduceConfig::default())
            .expect("prune");
        assert_eq!(count_tag(&out, "html"), 1);
        assert_eq!(count_tag(&out, "body"), 1);
        // three ancestors plus the candidate
        assert_eq!(count_tag(&out, "div"), 3);
        let span = out.first_by_tag("span").expect("span");
        let chain: Vec<&str> = out.ancestors(span).map(|a| out.tag(a)).collect();
        assert_eq!(chain, vec!["div", "div", "div", "body", "html"]);
        let html_out = out.to_html();
        assert!(html_out.contains(r#"<div class="l7"><div class="l8"><div class="l9"><span id="deep">x</span>"#));
    }

    #[test]
    fn head_keeps_only_title_when_preserved() {
        let doc = Document::parse(SAMPLE);
        let t = doc.tree();
        let title = t.first_by_tag("title").expect("title");
        let out = ContextPruner
            .prune(t, &[cand(title)], &ReduceConfig::default())
            .expect("prune");
        let html = out.to_html();
        assert!(html.contains("<head><title>Shop</title></head>"));
        assert!(!html.contains("meta"));
        assert_eq!(count_tag(&out, "body"), 1);
    }

    #[test]
    fn unpreserved_parents_are_skipped_not_lost() {
        let cfg = ReduceConfig {
            max_parent_depth: 0,
            max_sibling_count: 0,
            max_child_depth: 0,
            ..Default::default()
        };
        let doc = Document::parse(SAMPLE);
        let t = doc.tree();
        let input = t.find_by_id("searchBox").expect("input");
        let out = ContextPruner.prune(t, &[cand(input)], &cfg).expect("prune");
        assert_eq!(
            out.to_html(),
            r#"<html><body><input id="searchBox" name="q"></body></html>"#
        );
    }

    #[test]
    fn multiple_candidates_preserve_document_order() {
        let doc = Document::parse(SAMPLE);
        let t = doc.tree();
        let a = t.first_by_tag("a").expect("a");
        let input = t.find_by_id("searchBox").expect("input");
        let cfg = ReduceConfig {
            max_sibling_count: 0,
            ..Default::default()
        };
        let out = ContextPruner
            .prune(t, &[cand(input), cand(a)], &cfg)
            .expect("prune");
        let html = out.to_html();
        let nav = html.find("<nav>").expect("nav");
        let div = html.find("<div").expect("div");
        assert!(nav < div);
        assert!(!html.contains("footer"));
    }

    #[test]
    fn empty_candidates_yield_placeholder() {
        let doc = Document::parse(SAMPLE);
        let out = ContextPruner
            .prune(doc.tree(), &[], &ReduceConfig::default())
            .expect("prune");
        assert_eq!(
            out.to_html(),
            format!("<html><body><p>{NO_MATCH_MESSAGE}</p></body></html>")
        );
    }

    #[test]
    fn unknown_candidate_is_an_error() {
        let doc = Document::parse(SAMPLE);
        let err = ContextPruner
            .prune(doc.tree(), &[cand(9_999)], &ReduceConfig::default())
            .expect_err("unknown node");
        assert_eq!(err, Error::UnknownNode(9_999));
    }

    #[test]
    fn deeply_nested_input_prunes_without_recursion() {
        let depth = 60_000;
        let mut html = String::from("<html><body>");
        html.push_str(&"<b>".repeat(depth));
        html.push_str(r#"<i id="t">deep</i>"#);
        html.push_str(&"</b>".repeat(depth));
        html.push_str("</body></html>");

        let doc = Document::parse_cleaned(&html);
        let t = doc.tree();
        let target = t.find_by_id("t").expect("target");
        let out = ContextPruner
            .prune(t, &[cand(target)], &ReduceConfig::default())
            .expect("prune");
        assert_eq!(count_tag(&out, "html"), 1);
        assert_eq!(count_tag(&out, "body"), 1);
        // target plus its three nearest ancestors survive the hoist
        assert_eq!(count_tag(&out, "b"), 3);
        assert!(out.to_html().contains(r#"<i id="t">deep</i>"#));
    }

    #[test]
    fn preserved_head_keeps_only_title() {
        let doc = Document::parse(
            r#"<html><head><title>Shop</title><link rel="icon" href="/i.png"></head><body><p id="x">x</p></body></html>"#,
        );
        let t = doc.tree();
        let head = t.first_by_tag("head").expect("head");
        let x = t.find_by_id("x").expect("x");
        let mut keep = preservation_set(t, &[cand(x)], &ReduceConfig::default()).expect("set");
        keep.insert(head);
        let html = rebuild(t, &keep).expect("rebuild").to_html();
        assert!(html.starts_with("<html><head><title>Shop</title></head><body>"));
        assert!(!html.contains("icon"));
    }
}
