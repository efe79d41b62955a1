//! Tiered candidate discovery.
//!
//! Direct execution of the locator runs first; a small number of direct hits
//! short-circuits everything else. Otherwise four tiers (identity, semantic attributes,
//! structure, text) each contribute scored candidates, which are merged per node,
//! stably sorted by score and capped.

use crate::dom::{preview, Document, DomTree, NodeId};
use domtrim_core::{LocatorHints, LocatorKind, ReduceConfig, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SUMMARY_TEXT_CHARS: usize = 80;

/// Attributes whose values are matched by substring in tier 2.
pub const SEMANTIC_ATTRIBUTES: [&str; 5] = ["aria-label", "placeholder", "name", "title", "alt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub node: NodeId,
    pub score: i64,
    pub reason: String,
}

impl ScoredCandidate {
    fn new(node: NodeId, score: i64, reason: impl Into<String>) -> Self {
        Self {
            node,
            score,
            reason: reason.into(),
        }
    }
}

/// Serializable view of a candidate for diagnostics and tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub node: NodeId,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub classes: Vec<String>,
    pub score: i64,
    pub reason: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub text: String,
}

pub fn summarize(tree: &DomTree, candidates: &[ScoredCandidate]) -> Vec<CandidateSummary> {
    candidates
        .iter()
        .filter_map(|c| {
            let n = tree.get(c.node)?;
            let text = preview(&tree.own_text(c.node), SUMMARY_TEXT_CHARS);
            Some(CandidateSummary {
                node: c.node,
                tag: n.tag.clone(),
                id: n.id().map(str::to_string),
                classes: n.classes().map(str::to_string).collect(),
                score: c.score,
                reason: c.reason.clone(),
                text,
            })
        })
        .collect()
}

pub trait CandidateFinder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ranked candidates, at most `cfg.max_candidates`, highest score first.
    fn find_candidates(
        &self,
        doc: &Document,
        hints: &LocatorHints,
        cfg: &ReduceConfig,
    ) -> Result<Vec<ScoredCandidate>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TieredCandidateFinder;

impl CandidateFinder for TieredCandidateFinder {
    fn name(&self) -> &'static str {
        "tiered"
    }

    fn find_candidates(
        &self,
        doc: &Document,
        hints: &LocatorHints,
        cfg: &ReduceConfig,
    ) -> Result<Vec<ScoredCandidate>> {
        let tree = doc.tree();
        let mut all = direct_matches(doc, hints, cfg);
        if !all.is_empty() && all.len() <= cfg.direct_match_confidence_limit {
            tracing::debug!(n = all.len(), "returning direct matches");
            all.truncate(cfg.max_candidates);
            return Ok(all);
        }

        let t1 = tier_one(tree, hints, cfg);
        let t2 = tier_two(tree, hints, cfg);
        let t3 = tier_three(tree, hints, cfg);
        let t4 = match hints.text.as_deref() {
            Some(text) if !text.is_empty() => tier_four(tree, text, cfg),
            _ => Vec::new(),
        };
        tracing::debug!(
            direct = all.len(),
            tier1 = t1.len(),
            tier2 = t2.len(),
            tier3 = t3.len(),
            tier4 = t4.len(),
            "tier results"
        );
        all.extend(t1);
        all.extend(t2);
        all.extend(t3);
        all.extend(t4);

        let mut out = dedup_and_sort(all);
        out.truncate(cfg.max_candidates);
        Ok(out)
    }
}

fn direct_matches(doc: &Document, hints: &LocatorHints, cfg: &ReduceConfig) -> Vec<ScoredCandidate> {
    let (result, reason) = match hints.kind {
        LocatorKind::Xpath => (doc.select_xpath(&hints.raw_locator), "direct xpath match"),
        LocatorKind::CssSelector => (doc.select_css(&hints.raw_locator), "direct css match"),
        LocatorKind::Unknown => return Vec::new(),
    };
    match result {
        Ok(nodes) => nodes
            .into_iter()
            .map(|n| ScoredCandidate::new(n, cfg.tier_one_score, reason))
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "direct locator execution failed");
            Vec::new()
        }
    }
}

fn attr_matches_exactly(tree: &DomTree, node: NodeId, name: &str, value: &str) -> bool {
    match tree.get(node).and_then(|n| n.attr(name)) {
        Some(v) => value.is_empty() || v == value,
        None => false,
    }
}

fn tier_one(tree: &DomTree, hints: &LocatorHints, cfg: &ReduceConfig) -> Vec<ScoredCandidate> {
    let mut out = Vec::new();
    for id in &hints.ids {
        if let Some(n) = tree.find_by_id(id) {
            out.push(ScoredCandidate::new(n, cfg.tier_one_score, format!("id match: {id}")));
        }
    }
    for (name, value) in &hints.attributes {
        let mut hits = tree
            .elements()
            .filter(|n| attr_matches_exactly(tree, *n, name, value));
        // Ambiguous attributes are not trusted.
        if let (Some(only), None) = (hits.next(), hits.next()) {
            out.push(ScoredCandidate::new(
                only,
                cfg.tier_one_score,
                format!("unique attribute: {name}"),
            ));
        }
    }
    out
}

fn tier_two(tree: &DomTree, hints: &LocatorHints, cfg: &ReduceConfig) -> Vec<ScoredCandidate> {
    let mut out = Vec::new();
    for (name, value) in &hints.attributes {
        if value.is_empty() || !SEMANTIC_ATTRIBUTES.contains(&name.as_str()) {
            continue;
        }
        for n in tree.elements() {
            let hit = tree
                .get(n)
                .and_then(|node| node.attr(name))
                .is_some_and(|v| v.contains(value.as_str()));
            if hit {
                out.push(ScoredCandidate::new(
                    n,
                    cfg.tier_two_score,
                    format!("semantic attribute: {name}"),
                ));
            }
        }
    }
    out
}

fn structural_score(tree: &DomTree, node: NodeId, hints: &LocatorHints, cfg: &ReduceConfig) -> i64 {
    let Some(n) = tree.get(node) else {
        return cfg.tier_three_score.min(cfg.tier_three_cap());
    };
    let mut score = cfg.tier_three_score;
    for (name, value) in &hints.attributes {
        if n.attr(name) == Some(value.as_str()) {
            score = score.saturating_add(cfg.attribute_match_boost);
        }
    }
    if n.id().is_some_and(|id| hints.ids.iter().any(|h| h == id)) {
        score = score.saturating_add(cfg.id_match_boost);
    }
    for class in &hints.classes {
        if n.has_class(class) {
            score = score.saturating_add(cfg.class_match_boost);
        }
    }
    score.min(cfg.tier_three_cap())
}

fn tier_three(tree: &DomTree, hints: &LocatorHints, cfg: &ReduceConfig) -> Vec<ScoredCandidate> {
    let mut out = Vec::new();
    let push_where = |out: &mut Vec<ScoredCandidate>, reason: String, pred: &dyn Fn(NodeId) -> bool| {
        for n in tree.elements().filter(|n| pred(*n)) {
            out.push(ScoredCandidate::new(
                n,
                structural_score(tree, n, hints, cfg),
                reason.clone(),
            ));
        }
    };

    for tag in &hints.tag_names {
        for class in &hints.classes {
            push_where(&mut out, format!("tag+class: {tag}.{class}"), &|n: NodeId| {
                tree.tag(n) == tag.as_str() && tree.get(n).is_some_and(|e| e.has_class(class))
            });
        }
    }
    if out.is_empty() {
        for class in &hints.classes {
            push_where(&mut out, format!("class: {class}"), &|n: NodeId| {
                tree.get(n).is_some_and(|e| e.has_class(class))
            });
        }
    }
    if out.is_empty() {
        for tag in &hints.tag_names {
            push_where(&mut out, format!("tag: {tag}"), &|n: NodeId| tree.tag(n) == tag.as_str());
        }
    }
    out
}

/// Own-text similarity score, or `None` when the texts are unrelated.
pub fn text_similarity(target: &str, text: &str, cfg: &ReduceConfig) -> Option<i64> {
    if target.is_empty() || text.is_empty() {
        return None;
    }
    if target == text {
        return Some(cfg.tier_four_score.saturating_add(cfg.exact_match_bonus));
    }
    if target.contains(text) || text.contains(target) {
        return Some(cfg.contains_match_score);
    }
    let (t, x) = (target.to_lowercase(), text.to_lowercase());
    if t.contains(&x) || x.contains(&t) {
        return Some(cfg.tier_four_score.saturating_sub(cfg.case_insensitive_match_penalty));
    }
    None
}

fn tier_four(tree: &DomTree, target: &str, cfg: &ReduceConfig) -> Vec<ScoredCandidate> {
    let target = crate::dom::norm_ws(target);
    tree.elements()
        .filter_map(|n| {
            let own = tree.own_text(n);
            text_similarity(&target, &own, cfg)
                .map(|score| ScoredCandidate::new(n, score, "text similarity"))
        })
        .collect()
}

/// Keep the highest score per node at its first-discovered position, then stable-sort.
fn dedup_and_sort(all: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
    let mut merged: Vec<ScoredCandidate> = Vec::with_capacity(all.len());
    let mut index: HashMap<NodeId, usize> = HashMap::new();
    for c in all {
        match index.get(&c.node) {
            Some(&i) => {
                if merged[i].score < c.score {
                    merged[i] = c;
                }
            }
            None => {
                index.insert(c.node, merged.len());
                merged.push(c);
            }
        }
    }
    merged.sort_by(|a, b| b.score.cmp(&a.score));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hints::PatternHintExtractor;
    use domtrim_core::HintExtractor;
    use proptest::prelude::*;

    const SAMPLE: &str = r#"<html><body><div id="header"><input id="searchBox" name="q"/></div></body></html>"#;

    const FORM: &str = r#"<html><body>
        <form class="login">
          <input class="field" name="user" placeholder="Your user name">
          <input class="field" name="pass" type="password" placeholder="Password">
          <button class="btn primary" type="submit">Sign in</button>
          <a class="btn" href="/forgot">Forgot password?</a>
        </form>
        <p>sign in help</p>
        </body></html>"#;

    fn find(html: &str, locator: &str, cfg: &ReduceConfig) -> (Document, Vec<ScoredCandidate>) {
        let doc = Document::parse_cleaned(html);
        let hints = PatternHintExtractor.parse(locator);
        let out = TieredCandidateFinder
            .find_candidates(&doc, &hints, cfg)
            .expect("discovery");
        (doc, out)
    }

    #[test]
    fn direct_css_match_short_circuits() {
        let (doc, out) = find(SAMPLE, "#searchBox", &ReduceConfig::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 100);
        assert_eq!(out[0].reason, "direct css match");
        assert_eq!(doc.tree().tag(out[0].node), "input");
    }

    #[test]
    fn wrong_xpath_id_finds_nothing() {
        let (_, out) = find(SAMPLE, "//*[@id='wrongSearchBox']", &ReduceConfig::default());
        assert!(out.is_empty());
    }

    #[test]
    fn tier_one_id_lookup_after_malformed_direct_query() {
        // Unbalanced bracket: the direct query fails, the id hint still resolves.
        let (doc, out) = find(SAMPLE, "//input[@id='searchBox'", &ReduceConfig::default());
        assert_eq!(out[0].score, 100);
        assert_eq!(out[0].reason, "id match: searchBox");
        assert_eq!(doc.tree().tag(out[0].node), "input");
    }

    #[test]
    fn ambiguous_attributes_are_not_tier_one() {
        let cfg = ReduceConfig::default();
        let doc = Document::parse_cleaned(FORM);
        let mut hints = LocatorHints::unknown("x");
        hints.attributes.insert("type".into(), "password".into());
        let out = tier_one(doc.tree(), &hints, &cfg);
        assert_eq!(out.len(), 1);

        hints.attributes.clear();
        hints.attributes.insert("class".into(), "field".into());
        assert!(tier_one(doc.tree(), &hints, &cfg).is_empty());
    }

    #[test]
    fn semantic_attributes_match_by_substring() {
        let cfg = ReduceConfig::default();
        let doc = Document::parse_cleaned(FORM);
        let mut hints = LocatorHints::unknown("x");
        hints.attributes.insert("placeholder".into(), "user".into());
        hints.attributes.insert("type".into(), "submit".into());
        let out = tier_two(doc.tree(), &hints, &cfg);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 75);
        assert_eq!(doc.tree().get(out[0].node).and_then(|n| n.attr("name")), Some("user"));
    }

    #[test]
    fn structural_tier_boosts_and_caps() {
        let cfg = ReduceConfig::default();
        let (doc, out) = find(FORM, "button.btn.primary.missing", &cfg);
        let t = doc.tree();
        // Direct query finds nothing, tag+class pairs do.
        assert_eq!(t.tag(out[0].node), "button");
        assert_eq!(out[0].score, 50 + 5 + 5);
        assert!(out.iter().all(|c| t.tag(c.node) == "button"));

        let cfg = ReduceConfig {
            class_match_boost: 40,
            ..Default::default()
        };
        let (_, out) = find(FORM, "button.btn.primary.missing", &cfg);
        assert_eq!(out[0].score, 99);
    }

    #[test]
    fn extreme_boosts_saturate_instead_of_overflowing() {
        let cfg = ReduceConfig {
            class_match_boost: i64::MAX,
            exact_match_bonus: i64::MAX,
            case_insensitive_match_penalty: i64::MAX,
            ..Default::default()
        };
        let (_, out) = find(FORM, "button.btn.primary.missing", &cfg);
        assert_eq!(out[0].score, cfg.tier_three_cap());
        assert!(out.iter().all(|c| c.score < cfg.tier_one_score));
        assert_eq!(text_similarity("Sign in", "Sign in", &cfg), Some(i64::MAX));
        assert_eq!(
            text_similarity("Sign in", "sign in help", &cfg),
            Some(cfg.tier_four_score.saturating_sub(i64::MAX))
        );
    }

    #[test]
    fn structural_tier_falls_back_to_class_then_tag() {
        let cfg = ReduceConfig::default();
        let (doc, out) = find(FORM, "section.btn.nothing", &cfg);
        let tags: Vec<&str> = out.iter().map(|c| doc.tree().tag(c.node)).collect();
        assert_eq!(tags, vec!["button", "a"]);

        let (doc, out) = find(FORM, "//section/a[@rel='x']", &cfg);
        assert_eq!(out.len(), 1);
        assert_eq!(doc.tree().tag(out[0].node), "a");
        assert!(out[0].reason.starts_with("tag: "));
    }

    #[test]
    fn text_similarity_scores() {
        let cfg = ReduceConfig::default();
        assert_eq!(text_similarity("Sign in", "Sign in", &cfg), Some(35));
        assert_eq!(text_similarity("Sign in", "Sign in now", &cfg), Some(25));
        assert_eq!(text_similarity("Sign in", "Sign", &cfg), Some(25));
        assert_eq!(text_similarity("Sign in", "sign in help", &cfg), Some(20));
        assert_eq!(text_similarity("Sign in", "Register", &cfg), None);
        assert_eq!(text_similarity("Sign in", "", &cfg), None);
    }

    #[test]
    fn text_tier_ranks_exact_over_case_insensitive() {
        let (doc, out) = find(FORM, "//span[text()='Sign in']", &ReduceConfig::default());
        let t = doc.tree();
        assert_eq!(t.tag(out[0].node), "button");
        assert_eq!(out[0].score, 35);
        assert!(out
            .iter()
            .any(|c| t.tag(c.node) == "p" && c.score == 20));
    }

    #[test]
    fn many_direct_matches_fall_through_to_tiers() {
        let cfg = ReduceConfig {
            direct_match_confidence_limit: 1,
            ..Default::default()
        };
        let (_, out) = find(FORM, "input.field", &cfg);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|c| c.reason == "direct css match"));
    }

    #[test]
    fn dedup_keeps_best_score_at_first_position() {
        let merged = dedup_and_sort(vec![
            ScoredCandidate::new(1, 50, "a"),
            ScoredCandidate::new(2, 60, "b"),
            ScoredCandidate::new(1, 60, "c"),
            ScoredCandidate::new(3, 60, "d"),
            ScoredCandidate::new(2, 10, "e"),
        ]);
        let order: Vec<(NodeId, &str)> = merged.iter().map(|c| (c.node, c.reason.as_str())).collect();
        assert_eq!(order, vec![(1, "c"), (2, "b"), (3, "d")]);
    }

    #[test]
    fn summaries_describe_nodes() {
        let (doc, out) = find(SAMPLE, "#searchBox", &ReduceConfig::default());
        let s = summarize(doc.tree(), &out);
        assert_eq!(s[0].tag, "input");
        assert_eq!(s[0].id.as_deref(), Some("searchBox"));
        assert_eq!(s[0].score, 100);
    }

    #[test]
    fn long_summary_text_is_previewed() {
        let html = format!(r#"<html><body><p id="long">{}</p></body></html>"#, "word ".repeat(40));
        let (doc, out) = find(&html, "#long", &ReduceConfig::default());
        let s = summarize(doc.tree(), &out);
        assert!(s[0].text.ends_with("..."));
        assert_eq!(s[0].text.chars().count(), SUMMARY_TEXT_CHARS + 3);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn results_are_capped_sorted_and_tier_three_is_below_tier_one(
            n in 1usize..40,
            max_candidates in 1usize..8,
            class_boost in 0i64..200,
            class_pick in 0usize..3,
        ) {
            let classes = ["a", "b", "c"];
            let mut html = String::from("<html><body>");
            for i in 0..n {
                html.push_str(&format!(
                    r#"<div class="{} {}"><span>item {i}</span></div>"#,
                    classes[i % 3],
                    classes[(i + 1) % 3]
                ));
            }
            html.push_str("</body></html>");
            let cfg = ReduceConfig {
                max_candidates,
                class_match_boost: class_boost,
                ..Default::default()
            };
            let locator = format!("section.{}.{}", classes[class_pick], classes[(class_pick + 1) % 3]);
            let (_, out) = find(&html, &locator, &cfg);
            prop_assert!(out.len() <= max_candidates);
            prop_assert!(out.windows(2).all(|w| w[0].score >= w[1].score));
            prop_assert!(out.iter().all(|c| c.score < cfg.tier_one_score));
        }
    }
}
