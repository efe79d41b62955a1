use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid css selector: {0}")]
    InvalidSelector(String),
    #[error("invalid xpath: {0}")]
    InvalidXpath(String),
    #[error("unsupported xpath: {0}")]
    UnsupportedXpath(String),
    #[error("unknown node: {0}")]
    UnknownNode(usize),
    #[error("empty document")]
    EmptyDocument,
    #[error("no document loaded")]
    NoDocument,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LocatorKind {
    Xpath,
    CssSelector,
    Unknown,
}

impl LocatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xpath => "xpath",
            Self::CssSelector => "css_selector",
            Self::Unknown => "unknown",
        }
    }
}

/// Semantic summary of what a locator was trying to reach.
///
/// Built once per request by a [`HintExtractor`] and never mutated afterwards.
/// Collections are ordered by first occurrence in the locator and contain no
/// empty strings or duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocatorHints {
    pub kind: LocatorKind,
    pub raw_locator: String,
    pub ids: Vec<String>,
    pub classes: Vec<String>,
    pub tag_names: Vec<String>,
    /// Attribute name -> value. `id` and `class` never appear here.
    /// An empty value means "attribute present" (CSS `[name]`).
    pub attributes: BTreeMap<String, String>,
    pub text: Option<String>,
}

impl LocatorHints {
    pub fn unknown(raw_locator: impl Into<String>) -> Self {
        Self {
            kind: LocatorKind::Unknown,
            raw_locator: raw_locator.into(),
            ids: Vec::new(),
            classes: Vec::new(),
            tag_names: Vec::new(),
            attributes: BTreeMap::new(),
            text: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
            && self.classes.is_empty()
            && self.tag_names.is_empty()
            && self.attributes.is_empty()
            && self.text.is_none()
    }
}

/// Turns a raw locator string into [`LocatorHints`].
///
/// Implementations must never fail: malformed input yields `LocatorKind::Unknown`.
pub trait HintExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, locator: &str) -> LocatorHints;
}

/// Final size reduction applied to markup leaving the pipeline.
pub trait Minify: Send + Sync {
    fn minify(&self, html: &str) -> String;
}

/// Every tunable of the reduction engine.
///
/// Defaults match the documented values; each field can be overridden with a
/// `DOMTRIM_<FIELD>` environment variable (see [`ReduceConfig::from_env`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReduceConfig {
    /// Hard cap (bytes) applied by the fallback path.
    pub max_output_size: usize,
    /// Inputs at or below this size (bytes) skip discovery and pruning.
    pub early_return_size: usize,

    pub max_candidates: usize,
    /// Direct locator execution returning `1..=limit` matches short-circuits the tiers.
    pub direct_match_confidence_limit: usize,
    pub tier_one_score: i64,
    pub tier_two_score: i64,
    pub tier_three_score: i64,
    pub tier_four_score: i64,

    pub max_parent_depth: usize,
    pub max_sibling_count: usize,
    pub max_child_depth: usize,
    pub max_children_preserved: usize,

    pub attribute_match_boost: i64,
    pub id_match_boost: i64,
    pub class_match_boost: i64,

    pub exact_match_bonus: i64,
    pub contains_match_score: i64,
    pub case_insensitive_match_penalty: i64,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            max_output_size: 51_200,
            early_return_size: 51_200,
            max_candidates: 5,
            direct_match_confidence_limit: 3,
            tier_one_score: 100,
            tier_two_score: 75,
            tier_three_score: 50,
            tier_four_score: 25,
            max_parent_depth: 3,
            max_sibling_count: 2,
            max_child_depth: 2,
            max_children_preserved: 5,
            attribute_match_boost: 10,
            id_match_boost: 20,
            class_match_boost: 5,
            exact_match_bonus: 10,
            contains_match_score: 25,
            case_insensitive_match_penalty: 5,
        }
    }
}

/// Environment variable names, in field order. Exposed so front-ends can list the knobs.
pub const CONFIG_ENV_KEYS: [&str; 18] = [
    "DOMTRIM_MAX_OUTPUT_SIZE",
    "DOMTRIM_EARLY_RETURN_SIZE",
    "DOMTRIM_MAX_CANDIDATES",
    "DOMTRIM_DIRECT_MATCH_CONFIDENCE_LIMIT",
    "DOMTRIM_TIER_ONE_SCORE",
    "DOMTRIM_TIER_TWO_SCORE",
    "DOMTRIM_TIER_THREE_SCORE",
    "DOMTRIM_TIER_FOUR_SCORE",
    "DOMTRIM_MAX_PARENT_DEPTH",
    "DOMTRIM_MAX_SIBLING_COUNT",
    "DOMTRIM_MAX_CHILD_DEPTH",
    "DOMTRIM_MAX_CHILDREN_PRESERVED",
    "DOMTRIM_ATTRIBUTE_MATCH_BOOST",
    "DOMTRIM_ID_MATCH_BOOST",
    "DOMTRIM_CLASS_MATCH_BOOST",
    "DOMTRIM_EXACT_MATCH_BONUS",
    "DOMTRIM_CONTAINS_MATCH_SCORE",
    "DOMTRIM_CASE_INSENSITIVE_MATCH_PENALTY",
];

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_usize(key: &str, default: usize) -> usize {
    env(key)
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env(key)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(default)
}

impl ReduceConfig {
    /// Defaults overridden by any `DOMTRIM_*` variables present in the environment.
    /// Unparseable values are ignored (the default is kept).
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        Self {
            max_output_size: env_usize("DOMTRIM_MAX_OUTPUT_SIZE", self.max_output_size),
            early_return_size: env_usize("DOMTRIM_EARLY_RETURN_SIZE", self.early_return_size),
            max_candidates: env_usize("DOMTRIM_MAX_CANDIDATES", self.max_candidates),
            direct_match_confidence_limit: env_usize(
                "DOMTRIM_DIRECT_MATCH_CONFIDENCE_LIMIT",
                self.direct_match_confidence_limit,
            ),
            tier_one_score: env_i64("DOMTRIM_TIER_ONE_SCORE", self.tier_one_score),
            tier_two_score: env_i64("DOMTRIM_TIER_TWO_SCORE", self.tier_two_score),
            tier_three_score: env_i64("DOMTRIM_TIER_THREE_SCORE", self.tier_three_score),
            tier_four_score: env_i64("DOMTRIM_TIER_FOUR_SCORE", self.tier_four_score),
            max_parent_depth: env_usize("DOMTRIM_MAX_PARENT_DEPTH", self.max_parent_depth),
            max_sibling_count: env_usize("DOMTRIM_MAX_SIBLING_COUNT", self.max_sibling_count),
            max_child_depth: env_usize("DOMTRIM_MAX_CHILD_DEPTH", self.max_child_depth),
            max_children_preserved: env_usize(
                "DOMTRIM_MAX_CHILDREN_PRESERVED",
                self.max_children_preserved,
            ),
            attribute_match_boost: env_i64(
                "DOMTRIM_ATTRIBUTE_MATCH_BOOST",
                self.attribute_match_boost,
            ),
            id_match_boost: env_i64("DOMTRIM_ID_MATCH_BOOST", self.id_match_boost),
            class_match_boost: env_i64("DOMTRIM_CLASS_MATCH_BOOST", self.class_match_boost),
            exact_match_bonus: env_i64("DOMTRIM_EXACT_MATCH_BONUS", self.exact_match_bonus),
            contains_match_score: env_i64(
                "DOMTRIM_CONTAINS_MATCH_SCORE",
                self.contains_match_score,
            ),
            case_insensitive_match_penalty: env_i64(
                "DOMTRIM_CASE_INSENSITIVE_MATCH_PENALTY",
                self.case_insensitive_match_penalty,
            ),
        }
    }

    /// Reject combinations that would make the engine's ordering guarantees meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.max_candidates == 0 {
            return Err(Error::InvalidConfig(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        if self.max_output_size == 0 {
            return Err(Error::InvalidConfig(
                "max_output_size must be at least 1".to_string(),
            ));
        }
        if self.tier_one_score <= self.tier_three_score {
            return Err(Error::InvalidConfig(format!(
                "tier_one_score ({}) must exceed tier_three_score ({})",
                self.tier_one_score, self.tier_three_score
            )));
        }
        Ok(())
    }

    /// Highest score a structural (tier-3) match may reach.
    pub fn tier_three_cap(&self) -> i64 {
        self.tier_one_score.saturating_sub(1)
    }
}
