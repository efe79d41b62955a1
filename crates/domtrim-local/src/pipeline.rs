//! Orchestration: early exit, hints, discovery, pruning, minification, fallback.

use crate::discovery::{summarize, CandidateFinder, CandidateSummary, TieredCandidateFinder};
use crate::dom::{escape_html, Document};
use crate::hints::PatternHintExtractor;
use crate::minify::HtmlMinifier;
use crate::prune::{ContextPruner, TreePruner};
use domtrim_core::{HintExtractor, LocatorHints, Minify, ReduceConfig, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;

pub const TRUNCATION_MARKER: &str = "\n<!-- Truncated -->";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReducePath {
    /// Input returned unchanged or only minified.
    Passthrough,
    Pruned,
    NoMatch,
    /// Noise stripped and truncated without locator guidance.
    Fallback,
}

impl ReducePath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passthrough => "passthrough",
            Self::Pruned => "pruned",
            Self::NoMatch => "no_match",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReduceOutcome {
    pub html: String,
    pub path: ReducePath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<LocatorHints>,
    pub candidates: Vec<CandidateSummary>,
    pub input_bytes: usize,
    pub output_bytes: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub warnings: Vec<&'static str>,
    pub timings_ms: BTreeMap<&'static str, u64>,
}

impl ReduceOutcome {
    fn start(html: &str) -> Self {
        Self {
            html: String::new(),
            path: ReducePath::Passthrough,
            hints: None,
            candidates: Vec::new(),
            input_bytes: html.len(),
            output_bytes: 0,
            input_tokens: approx_tokens(html),
            output_tokens: 0,
            warnings: Vec::new(),
            timings_ms: BTreeMap::new(),
        }
    }

    fn finish(mut self, path: ReducePath, html: String) -> Self {
        self.output_bytes = html.len();
        self.output_tokens = approx_tokens(&html);
        self.path = path;
        self.html = html;
        self
    }

    /// Percentage of input bytes removed (0 when nothing was removed).
    pub fn reduction_pct(&self) -> f64 {
        if self.input_bytes == 0 || self.output_bytes >= self.input_bytes {
            return 0.0;
        }
        (self.input_bytes - self.output_bytes) as f64 * 100.0 / self.input_bytes as f64
    }
}

/// Whitespace-delimited word count; a rough stand-in for model tokens.
pub fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cut `html` to at most `max` bytes, preferring the last tag start past 80% of `max`,
/// and append [`TRUNCATION_MARKER`].
pub fn truncate_safely(html: &str, max: usize) -> String {
    if html.len() <= max {
        return html.to_string();
    }
    let mut cut = max;
    while !html.is_char_boundary(cut) {
        cut -= 1;
    }
    let cut = match html[..cut].rfind('<') {
        Some(tag) if tag * 5 > max * 4 => tag,
        _ => cut,
    };
    format!("{}{TRUNCATION_MARKER}", &html[..cut])
}

/// Stand-alone page explaining that `locator` matched nothing.
pub fn no_match_response(locator: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>No Match</title></head><body>\
         <p>No matching elements found for locator: <code>{}</code></p>\
         <p>The locator may be incorrect or the element may not exist in the page.</p>\
         </body></html>",
        escape_html(locator)
    )
}

fn ms_since(t: Instant) -> u64 {
    t.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

pub struct ReductionPipeline {
    cfg: ReduceConfig,
    extractor: Box<dyn HintExtractor>,
    finder: Box<dyn CandidateFinder>,
    pruner: Box<dyn TreePruner>,
    minifier: Box<dyn Minify>,
}

impl std::fmt::Debug for ReductionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionPipeline")
            .field("extractor", &self.extractor.name())
            .field("finder", &self.finder.name())
            .field("pruner", &self.pruner.name())
            .finish()
    }
}

impl Default for ReductionPipeline {
    fn default() -> Self {
        Self::new(ReduceConfig::default())
    }
}

impl ReductionPipeline {
    pub fn new(cfg: ReduceConfig) -> Self {
        Self {
            cfg,
            extractor: Box::new(PatternHintExtractor),
            finder: Box::new(TieredCandidateFinder),
            pruner: Box::new(ContextPruner),
            minifier: Box::new(HtmlMinifier),
        }
    }

    pub fn with_hint_extractor(mut self, extractor: Box<dyn HintExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_candidate_finder(mut self, finder: Box<dyn CandidateFinder>) -> Self {
        self.finder = finder;
        self
    }

    pub fn with_pruner(mut self, pruner: Box<dyn TreePruner>) -> Self {
        self.pruner = pruner;
        self
    }

    pub fn with_minifier(mut self, minifier: Box<dyn Minify>) -> Self {
        self.minifier = minifier;
        self
    }

    pub fn config(&self) -> &ReduceConfig {
        &self.cfg
    }

    pub fn hint_extractor(&self) -> &dyn HintExtractor {
        self.extractor.as_ref()
    }

    pub fn candidate_finder(&self) -> &dyn CandidateFinder {
        self.finder.as_ref()
    }

    /// Whether `html` is large enough for discovery and pruning to run.
    pub fn needs_reduction(&self, html: &str) -> bool {
        !html.trim().is_empty() && html.len() > self.cfg.early_return_size
    }

    /// Reduce `html` around `locator`. Always returns markup.
    pub fn reduce(&self, html: &str, locator: Option<&str>) -> ReduceOutcome {
        let _span = tracing::debug_span!("reduce", input_bytes = html.len()).entered();
        let started = Instant::now();
        let mut out = ReduceOutcome::start(html);

        if html.trim().is_empty() {
            tracing::warn!("empty html input");
            out.warnings.push("empty_input");
            return out.finish(ReducePath::Passthrough, html.to_string());
        }

        if !self.needs_reduction(html) {
            let t = Instant::now();
            let minified = self.minifier.minify(html);
            out.timings_ms.insert("minify", ms_since(t));
            tracing::debug!(bytes = html.len(), "below early-return threshold");
            return out.finish(ReducePath::Passthrough, minified);
        }

        let locator = locator.map(str::trim).filter(|l| !l.is_empty());
        let Some(locator) = locator else {
            tracing::warn!("no locator; using fallback");
            out.warnings.push("missing_locator");
            let t = Instant::now();
            let html = self.fallback(html);
            out.timings_ms.insert("fallback", ms_since(t));
            return out.finish(ReducePath::Fallback, html);
        };

        let result = self.run_stages(html, locator, &mut out);
        let out = match result {
            Ok((path, reduced)) => out.finish(path, reduced),
            Err(e) => {
                tracing::warn!(error = %e, "reduction failed; using fallback");
                out.warnings.push("pipeline_failed");
                let t = Instant::now();
                let html = self.fallback(html);
                out.timings_ms.insert("fallback", ms_since(t));
                out.finish(ReducePath::Fallback, html)
            }
        };
        tracing::debug!(
            path = out.path.as_str(),
            input_bytes = out.input_bytes,
            output_bytes = out.output_bytes,
            elapsed_ms = ms_since(started),
            "reduce complete"
        );
        out
    }

    fn run_stages(
        &self,
        html: &str,
        locator: &str,
        out: &mut ReduceOutcome,
    ) -> Result<(ReducePath, String)> {
        let t = Instant::now();
        let hints = self.extractor.parse(locator);
        out.timings_ms.insert("hints", ms_since(t));

        let t = Instant::now();
        let doc = Document::parse_cleaned(html);
        out.timings_ms.insert("parse", ms_since(t));

        let t = Instant::now();
        let found = self.finder.find_candidates(&doc, &hints, &self.cfg);
        out.timings_ms.insert("discover", ms_since(t));
        out.hints = Some(hints);
        let candidates = found?;
        out.candidates = summarize(doc.tree(), &candidates);
        tracing::debug!(n = candidates.len(), "candidates");

        if candidates.is_empty() {
            return Ok((ReducePath::NoMatch, no_match_response(locator)));
        }

        let t = Instant::now();
        let pruned = self.pruner.prune(doc.tree(), &candidates, &self.cfg)?;
        out.timings_ms.insert("prune", ms_since(t));

        let t = Instant::now();
        let reduced = self.minifier.minify(&pruned.to_html());
        out.timings_ms.insert("minify", ms_since(t));
        Ok((ReducePath::Pruned, reduced))
    }

    /// Strip noise, minify, then truncate to `max_output_size` at a tag boundary.
    pub fn fallback(&self, html: &str) -> String {
        let cleaned = Document::parse_cleaned(html).tree().to_html();
        let minified = self.minifier.minify(&cleaned);
        truncate_safely(&minified, self.cfg.max_output_size)
    }
}
