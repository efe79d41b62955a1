use crate::report::{self, MAX_INPUT_BYTES};
use domtrim_core::ReduceConfig;
use domtrim_local::DomQuery;
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;

pub(crate) use crate::report::SCHEMA_VERSION;

mod envelope;
use envelope::{add_envelope_fields, error_obj, warning_hints_from, ErrorCode};

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers plus a text copy for clients that only
    // read `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

fn invalid_params(kind: &str, message: &str, hint: &str, t0: std::time::Instant) -> CallToolResult {
    let mut payload = serde_json::json!({
        "ok": false,
        "error": error_obj(ErrorCode::InvalidParams, message, hint)
    });
    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
    tool_result(payload)
}

fn engine_error(kind: &str, e: &domtrim_core::Error, t0: std::time::Instant) -> CallToolResult {
    let code = ErrorCode::for_engine_error(e);
    let hint = match code {
        ErrorCode::InvalidSelector => {
            "Check the selector syntax; XPath supports child/descendant/parent/ancestor/sibling axes, predicates and common string functions."
        }
        ErrorCode::InvalidParams => "Check the request arguments.",
        ErrorCode::UnexpectedError => "Retry with RUST_LOG=domtrim_local=debug and report the failing stage.",
    };
    let mut payload = serde_json::json!({
        "ok": false,
        "error": error_obj(code, e, hint)
    });
    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
    tool_result(payload)
}

/// Per-call overrides layered over the server's `ReduceConfig`.
#[derive(Debug, Deserialize, JsonSchema, Default)]
struct ConfigOverrides {
    /// Hard cap (bytes) for fallback output.
    #[serde(default)]
    max_output_size: Option<usize>,
    /// Inputs at or below this many bytes are only minified.
    #[serde(default)]
    early_return_size: Option<usize>,
    /// Maximum number of ranked candidates kept.
    #[serde(default)]
    max_candidates: Option<usize>,
}

impl ConfigOverrides {
    fn apply(&self, base: &ReduceConfig) -> domtrim_core::Result<ReduceConfig> {
        let mut cfg = base.clone();
        if let Some(v) = self.max_output_size {
            cfg.max_output_size = v;
        }
        if let Some(v) = self.early_return_size {
            cfg.early_return_size = v;
        }
        if let Some(v) = self.max_candidates {
            cfg.max_candidates = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct ReduceHtmlArgs {
    /// Raw page markup.
    html: String,
    /// CSS selector or XPath expression for the element of interest.
    #[serde(default)]
    locator: Option<String>,
    /// Page URL; echoed back in `request` only.
    #[serde(default)]
    url: Option<String>,
    /// Include the reduced markup in the response (default true).
    #[serde(default)]
    include_html: Option<bool>,
    #[serde(default, flatten)]
    config: ConfigOverrides,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct ParseLocatorArgs {
    /// CSS selector or XPath expression.
    locator: String,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct FindCandidatesArgs {
    html: String,
    locator: String,
    #[serde(default, flatten)]
    config: ConfigOverrides,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct DomQueryArgs {
    html: String,
    /// One of: id, css, xpath, text, attribute, interactive.
    by: String,
    /// Query value: the id, selector, expression, text, or attribute name.
    #[serde(default)]
    value: Option<String>,
    /// Attribute value to match (only for `by=attribute`; omit to match presence).
    #[serde(default)]
    attribute_value: Option<String>,
    /// Query the page reduced around this locator instead of the raw page.
    #[serde(default)]
    pruned_for: Option<String>,
}

impl DomQueryArgs {
    fn to_query(&self) -> Result<DomQuery, String> {
        let value = self
            .value
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let need = |what: &str| value.clone().ok_or_else(|| format!("by={what} requires value"));
        match self.by.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(DomQuery::Id { id: need("id")? }),
            "css" => Ok(DomQuery::Css {
                selector: need("css")?,
            }),
            "xpath" => Ok(DomQuery::Xpath {
                expr: need("xpath")?,
            }),
            "text" => Ok(DomQuery::Text {
                text: need("text")?,
            }),
            "attribute" | "attr" => Ok(DomQuery::Attribute {
                name: need("attribute")?,
                value: self.attribute_value.clone(),
            }),
            "interactive" => Ok(DomQuery::Interactive),
            other => Err(format!("unknown query kind: {other:?}")),
        }
    }
}

#[derive(Clone)]
pub(crate) struct DomtrimMcp {
    tool_router: RmcpToolRouter<Self>,
    cfg: ReduceConfig,
}

#[tool_router]
impl DomtrimMcp {
    pub(crate) fn new(cfg: ReduceConfig) -> Result<Self, McpError> {
        cfg.validate()
            .map_err(|e| McpError::invalid_params(e.to_string(), None))?;
        Ok(Self {
            tool_router: Self::tool_router(),
            cfg,
        })
    }

    #[tool(description = "Report domtrim version and effective reduction config")]
    async fn domtrim_meta(&self) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let mut payload = serde_json::json!({
            "ok": true,
            "name": "domtrim",
            "version": env!("CARGO_PKG_VERSION"),
            "config": self.cfg,
            "env_keys": domtrim_core::CONFIG_ENV_KEYS,
            "tools": ["domtrim_meta", "reduce_html", "parse_locator", "find_candidates", "dom_query"],
        });
        add_envelope_fields(&mut payload, "domtrim_meta", t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(
        description = "Reduce page markup to the region around a CSS/XPath locator (with ancestors, siblings and children kept for context)"
    )]
    async fn reduce_html(
        &self,
        params: Parameters<Option<ReduceHtmlArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "reduce_html";
        let args = params.0.unwrap_or_default();
        if args.html.len() > MAX_INPUT_BYTES {
            return Ok(invalid_params(
                kind,
                "html exceeds the maximum input size",
                "Send a smaller document (under 20 MB).",
                t0,
            ));
        }
        let cfg = match args.config.apply(&self.cfg) {
            Ok(c) => c,
            Err(e) => return Ok(engine_error(kind, &e, t0)),
        };
        let include_html = args.include_html.unwrap_or(true);
        let mut payload = report::reduce(&args.html, args.locator.as_deref(), &cfg, include_html);
        let codes: Vec<&'static str> = payload["warnings"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|w| w.as_str())
                    .filter_map(|w| {
                        ["empty_input", "missing_locator", "pipeline_failed"]
                            .into_iter()
                            .find(|k| *k == w)
                    })
                    .collect()
            })
            .unwrap_or_default();
        payload["warning_hints"] = warning_hints_from(&codes);
        payload["request"] = serde_json::json!({
            "locator": args.locator,
            "url": args.url,
            "include_html": include_html,
        });
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(description = "Classify a locator (css/xpath/unknown) and extract its id/class/tag/attribute/text hints")]
    async fn parse_locator(
        &self,
        params: Parameters<Option<ParseLocatorArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "parse_locator";
        let args = params.0.unwrap_or_default();
        if args.locator.trim().is_empty() {
            return Ok(invalid_params(
                kind,
                "locator must be non-empty",
                "Provide a CSS selector or XPath expression.",
                t0,
            ));
        }
        let mut payload = report::hints(&args.locator);
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(description = "Rank the elements a locator most likely meant (direct match, then id/attribute/tag/text tiers)")]
    async fn find_candidates(
        &self,
        params: Parameters<Option<FindCandidatesArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "find_candidates";
        let args = params.0.unwrap_or_default();
        if args.locator.trim().is_empty() || args.html.trim().is_empty() {
            return Ok(invalid_params(
                kind,
                "html and locator must be non-empty",
                "Provide the page markup and a CSS selector or XPath expression.",
                t0,
            ));
        }
        let cfg = match args.config.apply(&self.cfg) {
            Ok(c) => c,
            Err(e) => return Ok(engine_error(kind, &e, t0)),
        };
        let mut payload = match report::candidates(&args.html, &args.locator, &cfg) {
            Ok(v) => v,
            Err(e) => return Ok(engine_error(kind, &e, t0)),
        };
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }

    #[tool(description = "Query page markup by id, css, xpath, text, attribute, or list interactive elements")]
    async fn dom_query(
        &self,
        params: Parameters<Option<DomQueryArgs>>,
    ) -> Result<CallToolResult, McpError> {
        let t0 = std::time::Instant::now();
        let kind = "dom_query";
        let args = params.0.unwrap_or_default();
        if args.html.trim().is_empty() {
            return Ok(invalid_params(
                kind,
                "html must be non-empty",
                "Provide the page markup to query.",
                t0,
            ));
        }
        let query = match args.to_query() {
            Ok(q) => q,
            Err(msg) => {
                return Ok(invalid_params(
                    kind,
                    &msg,
                    "Set by to one of id|css|xpath|text|attribute|interactive and pass value.",
                    t0,
                ))
            }
        };
        let mut payload =
            match report::query(&args.html, &query, args.pruned_for.as_deref(), &self.cfg) {
                Ok(v) => v,
                Err(e) => return Ok(engine_error(kind, &e, t0)),
            };
        add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
        Ok(tool_result(payload))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for DomtrimMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "domtrim reduces large HTML pages to the region around a CSS/XPath locator. \
                 Use reduce_html to shrink a page before reasoning about it, find_candidates to \
                 see what a broken locator most likely meant, and dom_query to inspect elements."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio(cfg: ReduceConfig) -> Result<(), McpError> {
    let svc = DomtrimMcp::new(cfg)?;
    tracing::debug!("serving mcp over stdio");
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(r: &CallToolResult) -> serde_json::Value {
        r.structured_content.clone().expect("structured content")
    }

    fn server() -> DomtrimMcp {
        DomtrimMcp::new(ReduceConfig::default()).expect("server")
    }

    #[test]
    fn query_args_require_value() {
        let args = DomQueryArgs {
            html: "<p>x</p>".into(),
            by: "css".into(),
            ..Default::default()
        };
        assert!(args.to_query().is_err());

        let args = DomQueryArgs {
            by: "interactive".into(),
            ..Default::default()
        };
        assert_eq!(args.to_query(), Ok(DomQuery::Interactive));
    }

    #[test]
    fn overrides_are_validated() {
        let o = ConfigOverrides {
            max_candidates: Some(0),
            ..Default::default()
        };
        assert!(o.apply(&ReduceConfig::default()).is_err());
    }

    #[tokio::test]
    async fn reduce_html_envelope() {
        let r = server()
            .reduce_html(Parameters(Some(ReduceHtmlArgs {
                html: "<div id=\"a\">hi</div>".into(),
                locator: Some("#a".into()),
                ..Default::default()
            })))
            .await
            .expect("tool");
        let v = payload(&r);
        assert_eq!(v["ok"], true);
        assert_eq!(v["kind"], "reduce_html");
        assert_eq!(v["schema_version"].as_u64(), Some(SCHEMA_VERSION));
        assert_eq!(v["request"]["locator"], "#a");
    }

    #[tokio::test]
    async fn dom_query_reports_bad_selector() {
        let r = server()
            .dom_query(Parameters(Some(DomQueryArgs {
                html: "<p>x</p>".into(),
                by: "xpath".into(),
                value: Some("//p[".into()),
                ..Default::default()
            })))
            .await
            .expect("tool");
        let v = payload(&r);
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"]["code"], "invalid_selector");
    }

    #[tokio::test]
    async fn parse_locator_rejects_blank() {
        let r = server()
            .parse_locator(Parameters(Some(ParseLocatorArgs {
                locator: "  ".into(),
            })))
            .await
            .expect("tool");
        assert_eq!(payload(&r)["error"]["code"], "invalid_params");
    }
}
