//! JSON payload builders shared by the CLI subcommands and the MCP tools.
//!
//! Payloads carry `ok` plus tool-specific fields; callers add the envelope fields
//! (`schema_version`, `kind`, `elapsed_ms`).

use domtrim_core::{HintExtractor, ReduceConfig};
use domtrim_local::{
    discovery::summarize, CandidateFinder, Document, DomQuery, PatternHintExtractor, QueryContext,
    ReduceOutcome, ReductionPipeline, TieredCandidateFinder,
};

pub(crate) const SCHEMA_VERSION: u64 = 1;

/// Largest markup accepted in a single request.
pub(crate) const MAX_INPUT_BYTES: usize = 20_000_000;

pub(crate) fn outcome_json(o: &ReduceOutcome, include_html: bool) -> serde_json::Value {
    let mut v = serde_json::json!({
        "ok": true,
        "path": o.path.as_str(),
        "hints": o.hints,
        "candidates": o.candidates,
        "stats": {
            "input_bytes": o.input_bytes,
            "output_bytes": o.output_bytes,
            "input_tokens": o.input_tokens,
            "output_tokens": o.output_tokens,
            "reduction_pct": (o.reduction_pct() * 10.0).round() / 10.0,
        },
        "warnings": o.warnings,
        "timings_ms": o.timings_ms,
    });
    if include_html {
        v["html"] = serde_json::json!(o.html);
    }
    v
}

pub(crate) fn reduce(
    html: &str,
    locator: Option<&str>,
    cfg: &ReduceConfig,
    include_html: bool,
) -> serde_json::Value {
    let outcome = ReductionPipeline::new(cfg.clone()).reduce(html, locator);
    outcome_json(&outcome, include_html)
}

pub(crate) fn hints(locator: &str) -> serde_json::Value {
    let h = PatternHintExtractor.parse(locator);
    serde_json::json!({
        "ok": true,
        "hints": h,
        "empty": h.is_empty(),
    })
}

/// Ranked candidates for `locator` without pruning.
pub(crate) fn candidates(
    html: &str,
    locator: &str,
    cfg: &ReduceConfig,
) -> domtrim_core::Result<serde_json::Value> {
    let h = PatternHintExtractor.parse(locator);
    let doc = Document::parse_cleaned(html);
    let found = TieredCandidateFinder.find_candidates(&doc, &h, cfg)?;
    let summaries = summarize(doc.tree(), &found);
    Ok(serde_json::json!({
        "ok": true,
        "hints": h,
        "count": summaries.len(),
        "candidates": summaries,
    }))
}

/// Run `query` against `html`, or against the reduced page when `pruned_for` is set.
pub(crate) fn query(
    html: &str,
    query: &DomQuery,
    pruned_for: Option<&str>,
    cfg: &ReduceConfig,
) -> domtrim_core::Result<serde_json::Value> {
    let mut ctx = QueryContext::new();
    match pruned_for.map(str::trim).filter(|l| !l.is_empty()) {
        Some(locator) => {
            let outcome = ReductionPipeline::new(cfg.clone()).reduce(html, Some(locator));
            ctx.set_document(Document::parse(&outcome.html));
        }
        None => ctx.set_document(Document::parse(html)),
    }
    let result = ctx.run(query);
    ctx.clear();
    let result = result?;
    Ok(serde_json::json!({
        "ok": true,
        "query": query,
        "total": result.total,
        "truncated": result.truncated(),
        "elements": result.elements,
        "text": result.render(),
    }))
}
