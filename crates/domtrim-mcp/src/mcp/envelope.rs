use serde::Serialize;

pub(crate) fn warning_hint(code: &'static str) -> Option<&'static str> {
    match code {
        "empty_input" => Some("The markup was empty or whitespace-only, so it was returned unchanged."),
        "missing_locator" => Some(
            "No locator was given, so the page was cleaned and size-capped instead of pruned. Pass locator=\"...\" (CSS or XPath) to keep only the relevant region.",
        ),
        "pipeline_failed" => Some(
            "Candidate discovery or pruning failed internally, so the page was cleaned and size-capped instead. Run with RUST_LOG=domtrim_local=debug to see the failing stage.",
        ),
        _ => None,
    }
}

pub(crate) fn warning_hints_from(codes: &[&'static str]) -> serde_json::Value {
    let mut m = serde_json::Map::new();
    for c in codes {
        if let Some(h) = warning_hint(c) {
            m.insert((*c).to_string(), serde_json::json!(h));
        }
    }
    serde_json::Value::Object(m)
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum ErrorCode {
    InvalidParams,
    InvalidSelector,
    UnexpectedError,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::InvalidSelector => "invalid_selector",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    /// Every failure here is deterministic for a given input.
    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::InvalidParams | Self::InvalidSelector | Self::UnexpectedError => false,
        }
    }

    pub(crate) fn for_engine_error(e: &domtrim_core::Error) -> Self {
        use domtrim_core::Error;
        match e {
            Error::InvalidSelector(_) | Error::InvalidXpath(_) | Error::UnsupportedXpath(_) => {
                Self::InvalidSelector
            }
            Error::InvalidConfig(_) | Error::NoDocument => Self::InvalidParams,
            Error::UnknownNode(_) | Error::EmptyDocument => Self::UnexpectedError,
        }
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(super::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    if payload.get("request").is_none() {
        payload["request"] = serde_json::Value::Null;
    }
}

pub(crate) fn error_obj(
    code: ErrorCode,
    message: impl ToString,
    hint: impl ToString,
) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: String,
        retryable: bool,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: message.to_string(),
        hint: hint.to_string(),
        retryable: code.retryable(),
    };
    match serde_json::to_value(e) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": hint.to_string(),
            "retryable": code.retryable()
        }),
    }
}
