//! Regex-driven locator classification and hint extraction.
//!
//! This is a heuristic reader, not a selector grammar: it picks out ids, classes, tags,
//! attribute pairs and literal text wherever they appear in the locator.

use domtrim_core::{HintExtractor, LocatorHints, LocatorKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

struct Patterns {
    positional: Regex,
    css_attr_expr: Regex,
    bare_tag_start: Regex,
    quoted: Regex,

    xpath_id: Regex,
    xpath_class: Regex,
    xpath_attr: Regex,
    xpath_text: Regex,
    xpath_tag: Regex,

    css_id: Regex,
    css_class: Regex,
    css_attr: Regex,
    css_tag: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            positional: Regex::new(r"\[\d+\]")?,
            css_attr_expr: Regex::new(r"\[[^\]]*=[^\]]*\]")?,
            bare_tag_start: Regex::new(r"^[a-zA-Z][a-zA-Z0-9]*")?,
            quoted: Regex::new(r#"'[^']*'|"[^"]*""#)?,

            xpath_id: Regex::new(r#"@id\s*=\s*['"]([^'"]+)['"]"#)?,
            xpath_class: Regex::new(r#"@class\s*=\s*['"]([^'"]+)['"]"#)?,
            xpath_attr: Regex::new(r#"@([a-zA-Z][a-zA-Z0-9_:-]*)\s*=\s*['"]([^'"]+)['"]"#)?,
            xpath_text: Regex::new(
                r#"text\(\)\s*=\s*['"]([^'"]+)['"]|contains\s*\(\s*text\(\)\s*,\s*['"]([^'"]+)['"]\s*\)"#,
            )?,
            // An optional `axis::` prefix is skipped so `parent::form` yields `form`.
            xpath_tag: Regex::new(r"/{1,2}(?:[a-zA-Z-]+::)?([a-zA-Z][a-zA-Z0-9]*)")?,

            css_id: Regex::new(r"#([a-zA-Z][a-zA-Z0-9_-]*)")?,
            css_class: Regex::new(r"\.([a-zA-Z][a-zA-Z0-9_-]*)")?,
            css_attr: Regex::new(
                r#"\[([a-zA-Z][a-zA-Z0-9_:-]*)\s*[~|^$*]?=\s*['"]([^'"]+)['"]\s*\]|\[([a-zA-Z][a-zA-Z0-9_:-]*)\]"#,
            )?,
            css_tag: Regex::new(r"^([a-zA-Z][a-zA-Z0-9]*)|[>\s+~]\s*([a-zA-Z][a-zA-Z0-9]*)")?,
        })
    }
}

static PATTERNS: LazyLock<Result<Patterns, regex::Error>> = LazyLock::new(Patterns::compile);

/// The default [`HintExtractor`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternHintExtractor;

impl HintExtractor for PatternHintExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn parse(&self, locator: &str) -> LocatorHints {
        let trimmed = locator.trim();
        if trimmed.is_empty() {
            tracing::debug!("empty locator");
            return LocatorHints::unknown(locator);
        }
        let p = match PATTERNS.as_ref() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "hint patterns failed to compile");
                return LocatorHints::unknown(locator);
            }
        };
        let hints = match classify(p, trimmed) {
            LocatorKind::Xpath => parse_xpath(p, trimmed),
            LocatorKind::CssSelector => parse_css(p, trimmed),
            LocatorKind::Unknown => LocatorHints::unknown(trimmed),
        };
        tracing::debug!(
            kind = hints.kind.as_str(),
            ids = hints.ids.len(),
            classes = hints.classes.len(),
            tags = hints.tag_names.len(),
            attrs = hints.attributes.len(),
            text = hints.text.is_some(),
            "parsed locator"
        );
        hints
    }
}

fn classify(p: &Patterns, locator: &str) -> LocatorKind {
    if locator.starts_with('/')
        || locator.contains("[@")
        || locator.contains("contains(")
        || locator.contains("text()")
        || p.positional.is_match(locator)
    {
        return LocatorKind::Xpath;
    }
    if locator.starts_with('#')
        || locator.starts_with('.')
        || locator.contains(['>', '+', '~'])
        || p.css_attr_expr.is_match(locator)
        || p.bare_tag_start.is_match(locator)
    {
        return LocatorKind::CssSelector;
    }
    LocatorKind::Unknown
}

fn push_unique(out: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !out.iter().any(|v| v == value) {
        out.push(value.to_string());
    }
}

/// Quoted literals blanked out so tag scanning does not read words inside values.
fn without_literals(p: &Patterns, locator: &str) -> String {
    p.quoted.replace_all(locator, "''").into_owned()
}

fn parse_xpath(p: &Patterns, xpath: &str) -> LocatorHints {
    let mut hints = LocatorHints::unknown(xpath);
    hints.kind = LocatorKind::Xpath;

    for cap in p.xpath_id.captures_iter(xpath) {
        push_unique(&mut hints.ids, &cap[1]);
    }
    for cap in p.xpath_class.captures_iter(xpath) {
        for class in cap[1].split_whitespace() {
            push_unique(&mut hints.classes, class);
        }
    }
    for cap in p.xpath_attr.captures_iter(xpath) {
        let name = cap[1].to_ascii_lowercase();
        if name != "id" && name != "class" {
            hints.attributes.insert(name, cap[2].to_string());
        }
    }
    hints.text = p.xpath_text.captures(xpath).and_then(|cap| {
        cap.get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_str().to_string())
    });

    let bare = without_literals(p, xpath);
    for cap in p.xpath_tag.captures_iter(&bare) {
        let Some(m) = cap.get(1) else { continue };
        // node tests such as `text()` / `node()` are not tags
        if bare[m.end()..].trim_start().starts_with('(') {
            continue;
        }
        push_unique(&mut hints.tag_names, &m.as_str().to_ascii_lowercase());
    }
    hints
}

fn parse_css(p: &Patterns, css: &str) -> LocatorHints {
    let mut hints = LocatorHints::unknown(css);
    hints.kind = LocatorKind::CssSelector;

    let bare = without_literals(p, css);
    for cap in p.css_id.captures_iter(&bare) {
        push_unique(&mut hints.ids, &cap[1]);
    }
    for cap in p.css_class.captures_iter(&bare) {
        push_unique(&mut hints.classes, &cap[1]);
    }

    let mut attributes = BTreeMap::new();
    for cap in p.css_attr.captures_iter(css) {
        let (name, value) = match (cap.get(1), cap.get(2), cap.get(3)) {
            (Some(n), Some(v), _) => (n.as_str(), v.as_str()),
            (_, _, Some(n)) => (n.as_str(), ""),
            _ => continue,
        };
        match name.to_ascii_lowercase().as_str() {
            "id" => push_unique(&mut hints.ids, value),
            "class" => {
                for class in value.split_whitespace() {
                    push_unique(&mut hints.classes, class);
                }
            }
            other => {
                attributes.insert(other.to_string(), value.to_string());
            }
        }
    }
    hints.attributes = attributes;

    for cap in p.css_tag.captures_iter(&bare) {
        if let Some(m) = cap.get(1).or_else(|| cap.get(2)) {
            push_unique(&mut hints.tag_names, &m.as_str().to_ascii_lowercase());
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(s: &str) -> LocatorHints {
        PatternHintExtractor.parse(s)
    }

    #[test]
    fn classifies_locators() {
        assert_eq!(parse("//div").kind, LocatorKind::Xpath);
        assert_eq!(parse("/html/body").kind, LocatorKind::Xpath);
        assert_eq!(parse("(//a)[2]").kind, LocatorKind::Xpath);
        assert_eq!(parse("*[@id='x']").kind, LocatorKind::Xpath);
        assert_eq!(parse("#searchBox").kind, LocatorKind::CssSelector);
        assert_eq!(parse(".btn.primary").kind, LocatorKind::CssSelector);
        assert_eq!(parse("form > input").kind, LocatorKind::CssSelector);
        assert_eq!(parse("[name='q']").kind, LocatorKind::CssSelector);
        assert_eq!(parse("button").kind, LocatorKind::CssSelector);
        assert_eq!(parse("   ").kind, LocatorKind::Unknown);
        assert_eq!(parse("$$$").kind, LocatorKind::Unknown);
        assert!(parse("$$$").is_empty());
    }

    #[test]
    fn xpath_extraction() {
        let h = parse(r#"//form[@class="login main"]//input[@id='user' and @name="username"]"#);
        assert_eq!(h.ids, vec!["user"]);
        assert_eq!(h.classes, vec!["login", "main"]);
        assert_eq!(h.tag_names, vec!["form", "input"]);
        assert_eq!(h.attributes.get("name").map(String::as_str), Some("username"));
        assert!(!h.attributes.contains_key("id"));
        assert!(!h.attributes.contains_key("class"));
        assert_eq!(h.text, None);
    }

    #[test]
    fn xpath_text_takes_first_occurrence() {
        let h = parse("//button[text()='Sign in'] | //a[contains(text(), 'Log in')]");
        assert_eq!(h.text.as_deref(), Some("Sign in"));
        assert_eq!(h.tag_names, vec!["button", "a"]);

        let h = parse("//a[contains(text(),'Log in')]");
        assert_eq!(h.text.as_deref(), Some("Log in"));
    }

    #[test]
    fn xpath_tags_skip_wildcards_axes_and_node_tests() {
        let h = parse("//*[@id='x']/parent::FORM/child::node()/text()");
        assert_eq!(h.tag_names, vec!["form"]);
        let h = parse("//a[@title='one/two']");
        assert_eq!(h.tag_names, vec!["a"]);
    }

    #[test]
    fn css_extraction() {
        let h = parse(r#"form#login.card.dark > input[name='user'][required] + Button.go"#);
        assert_eq!(h.kind, LocatorKind::CssSelector);
        assert_eq!(h.ids, vec!["login"]);
        assert_eq!(h.classes, vec!["card", "dark", "go"]);
        assert_eq!(h.tag_names, vec!["form", "input", "button"]);
        assert_eq!(h.attributes.get("name").map(String::as_str), Some("user"));
        assert_eq!(h.attributes.get("required").map(String::as_str), Some(""));
        assert_eq!(h.text, None);
    }

    #[test]
    fn css_attribute_values_do_not_leak_into_other_hints() {
        let h = parse(r#"a[href='https://x.example/#top']"#);
        assert!(h.ids.is_empty());
        assert!(h.classes.is_empty());
        assert_eq!(h.tag_names, vec!["a"]);
        assert_eq!(
            h.attributes.get("href").map(String::as_str),
            Some("https://x.example/#top")
        );
    }

    #[test]
    fn css_id_and_class_attributes_route_to_ids_and_classes() {
        let h = parse(r#"[id="main"][class='a b']"#);
        assert_eq!(h.ids, vec!["main"]);
        assert_eq!(h.classes, vec!["a", "b"]);
        assert!(h.attributes.is_empty());
    }

    #[test]
    fn raw_locator_is_kept() {
        let h = parse("  #q ");
        assert_eq!(h.raw_locator, "#q");
        assert_eq!(h.ids, vec!["q"]);
    }

    proptest! {
        #[test]
        fn hints_never_contain_empty_strings(s in ".{0,60}") {
            let h = parse(&s);
            prop_assert!(h.ids.iter().all(|v| !v.is_empty()));
            prop_assert!(h.classes.iter().all(|v| !v.is_empty()));
            prop_assert!(h.tag_names.iter().all(|v| !v.is_empty() && v != "*"));
            prop_assert!(h.attributes.keys().all(|k| !k.is_empty() && k != "id" && k != "class"));
            if h.kind == LocatorKind::Unknown {
                prop_assert!(h.is_empty());
            }
        }

        #[test]
        fn selector_shaped_input_is_classified(
            tag in "[a-z]{1,6}",
            id in "[a-z][a-z0-9_-]{0,8}",
        ) {
            let css = parse(&format!("{tag}#{id}"));
            prop_assert_eq!(css.kind, LocatorKind::CssSelector);
            prop_assert_eq!(css.ids, vec![id.clone()]);
            let xp = parse(&format!("//{tag}[@id='{id}']"));
            prop_assert_eq!(xp.kind, LocatorKind::Xpath);
            prop_assert_eq!(xp.ids, vec![id]);
            prop_assert_eq!(xp.tag_names, vec![tag]);
        }
    }
}
