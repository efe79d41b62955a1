//! Local (in-process) implementation of the domtrim reduction engine.
//!
//! - [`hints`]: locator classification and hint extraction
//! - [`dom`]: arena document built from a `scraper` parse, CSS selection, serialization
//! - [`xpath`]: XPath subset evaluator over the arena
//! - [`discovery`]: tiered, scored candidate discovery
//! - [`prune`]: context-preserving tree reconstruction
//! - [`pipeline`]: orchestration with early exit and fallback
//! - [`query`]: per-request interactive query surface

pub mod discovery;
pub mod dom;
pub mod hints;
pub mod minify;
pub mod pipeline;
pub mod prune;
pub mod query;
pub mod xpath;

pub use discovery::{CandidateFinder, CandidateSummary, ScoredCandidate, TieredCandidateFinder};
pub use dom::{Document, DomTree, NodeId};
pub use hints::PatternHintExtractor;
pub use minify::HtmlMinifier;
pub use pipeline::{ReduceOutcome, ReducePath, ReductionPipeline};
pub use prune::{ContextPruner, TreePruner};
pub use query::{DomQuery, QueryContext, QueryResult};

/// Reduce `html` around `locator` with the default strategies.
pub fn reduce(
    html: &str,
    locator: Option<&str>,
    cfg: &domtrim_core::ReduceConfig,
) -> ReduceOutcome {
    ReductionPipeline::new(cfg.clone()).reduce(html, locator)
}
