//! Public facade crate for `domtrim`.
//!
//! Shrinks a large HTML page down to the context around a (possibly broken) element
//! locator. Backend-agnostic types and traits come from `domtrim-core`; with the default
//! `local` feature the in-process engine from `domtrim-local` is re-exported too.
//!
//! ```
//! # #[cfg(feature = "local")] {
//! let cfg = domtrim::ReduceConfig { early_return_size: 0, ..Default::default() };
//! let out = domtrim::reduce(r#"<div id="a"><p id="b">hi</p></div>"#, Some("#b"), &cfg);
//! assert_eq!(out.path, domtrim::ReducePath::Pruned);
//! # }
//! ```

pub use domtrim_core::*;

#[cfg(feature = "local")]
pub use domtrim_local::{
    reduce, CandidateFinder, ContextPruner, Document, DomQuery, HtmlMinifier,
    PatternHintExtractor, QueryContext, QueryResult, ReduceOutcome, ReducePath,
    ReductionPipeline, TieredCandidateFinder, TreePruner,
};

/// Full access to the engine modules (`dom`, `xpath`, `discovery`, ...).
#[cfg(feature = "local")]
pub mod engine {
    pub use domtrim_local::*;
}

#[cfg(all(test, feature = "local"))]
mod tests {
    use super::*;

    #[test]
    fn facade_exposes_a_working_pipeline() {
        let hints = PatternHintExtractor.parse("//button[text()='Go']");
        assert_eq!(hints.kind, LocatorKind::Xpath);
        let pipeline = ReductionPipeline::default();
        assert_eq!(pipeline.config(), &ReduceConfig::default());
        let out = pipeline.reduce("<p>tiny</p>", Some("p"));
        assert_eq!(out.path, ReducePath::Passthrough);
    }
}
