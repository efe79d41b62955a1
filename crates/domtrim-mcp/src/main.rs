use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use domtrim_core::ReduceConfig;
use domtrim_local::DomQuery;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(feature = "stdio")]
mod mcp;
mod report;

#[derive(Parser, Debug)]
#[command(name = "domtrim")]
#[command(about = "Selector-guided HTML reduction (CLI + MCP stdio server)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server.
    #[cfg(feature = "stdio")]
    McpStdio(ConfigArgs),
    /// Reduce an HTML file around a locator.
    Reduce(ReduceCmd),
    /// Show the hints extracted from a locator (json).
    Hints(HintsCmd),
    /// Rank the elements a locator most likely meant (json).
    Candidates(CandidatesCmd),
    /// Query elements in an HTML file.
    Query(QueryCmd),
    /// Print version info.
    Version(VersionCmd),
}

/// Reduction knobs; anything unset falls back to `DOMTRIM_*` env, then defaults.
#[derive(clap::Args, Debug, Default)]
struct ConfigArgs {
    /// Hard cap (bytes) for fallback output.
    #[arg(long)]
    max_output_size: Option<usize>,
    /// Inputs at or below this many bytes are only minified.
    #[arg(long)]
    early_return_size: Option<usize>,
    /// Maximum number of ranked candidates.
    #[arg(long)]
    max_candidates: Option<usize>,
    /// Direct locator matches up to this count skip the heuristic tiers.
    #[arg(long)]
    direct_match_limit: Option<usize>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<ReduceConfig> {
        let mut cfg = ReduceConfig::from_env();
        if let Some(v) = self.max_output_size {
            cfg.max_output_size = v;
        }
        if let Some(v) = self.early_return_size {
            cfg.early_return_size = v;
        }
        if let Some(v) = self.max_candidates {
            cfg.max_candidates = v;
        }
        if let Some(v) = self.direct_match_limit {
            cfg.direct_match_confidence_limit = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[derive(clap::Args, Debug)]
struct ReduceCmd {
    /// HTML input file.
    #[arg(long)]
    html_file: std::path::PathBuf,
    /// CSS selector or XPath expression.
    #[arg(long)]
    locator: Option<String>,
    /// Page URL (echoed in the json output only).
    #[arg(long)]
    url: Option<String>,
    /// Output format: json|html
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(clap::Args, Debug)]
struct HintsCmd {
    #[arg(long)]
    locator: String,
}

#[derive(clap::Args, Debug)]
struct CandidatesCmd {
    #[arg(long)]
    html_file: std::path::PathBuf,
    #[arg(long)]
    locator: String,
    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(clap::Args, Debug)]
#[command(group(
    clap::ArgGroup::new("by")
        .required(true)
        .args(["id", "css", "xpath", "text", "attr", "interactive"]),
))]
struct QueryCmd {
    #[arg(long)]
    html_file: std::path::PathBuf,
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    css: Option<String>,
    #[arg(long)]
    xpath: Option<String>,
    /// Case-insensitive match against each element's own text.
    #[arg(long)]
    text: Option<String>,
    /// Attribute name; combine with --value to match a specific value.
    #[arg(long)]
    attr: Option<String>,
    #[arg(long, requires = "attr")]
    value: Option<String>,
    /// List input/button/a/select/textarea elements.
    #[arg(long)]
    interactive: bool,
    /// Query the page reduced around this locator instead of the raw file.
    #[arg(long)]
    pruned_for: Option<String>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
    #[command(flatten)]
    config: ConfigArgs,
}

impl QueryCmd {
    fn to_query(&self) -> Result<DomQuery> {
        let q = if let Some(id) = &self.id {
            DomQuery::Id { id: id.clone() }
        } else if let Some(selector) = &self.css {
            DomQuery::Css {
                selector: selector.clone(),
            }
        } else if let Some(expr) = &self.xpath {
            DomQuery::Xpath { expr: expr.clone() }
        } else if let Some(text) = &self.text {
            DomQuery::Text { text: text.clone() }
        } else if let Some(name) = &self.attr {
            DomQuery::Attribute {
                name: name.clone(),
                value: self.value.clone(),
            }
        } else if self.interactive {
            DomQuery::Interactive
        } else {
            anyhow::bail!("one of --id, --css, --xpath, --text, --attr, --interactive is required");
        };
        Ok(q)
    }
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn read_html(path: &std::path::Path) -> Result<String> {
    let meta = std::fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if meta.len() as usize > report::MAX_INPUT_BYTES {
        anyhow::bail!(
            "{} is {} bytes; the limit is {}",
            path.display(),
            meta.len(),
            report::MAX_INPUT_BYTES
        );
    }
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn add_envelope(payload: &mut serde_json::Value, kind: &str, t0: std::time::Instant) {
    payload["schema_version"] = serde_json::json!(report::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(t0.elapsed().as_millis());
}

/// Optional env-file loader (opt-in via `DOMTRIM_ENV_FILE`). Never overrides explicit env.
fn load_env_file() {
    let Ok(p) = std::env::var("DOMTRIM_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn init_tracing() {
    // stdout belongs to the json output and the MCP channel.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio(config) => {
            let cfg = config.resolve()?;
            mcp::serve_stdio(cfg)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::Reduce(args) => {
            let t0 = std::time::Instant::now();
            let cfg = args.config.resolve()?;
            let html = read_html(&args.html_file)?;
            let outcome = domtrim_local::reduce(&html, args.locator.as_deref(), &cfg);
            match args.output.to_ascii_lowercase().as_str() {
                "html" => println!("{}", outcome.html),
                _ => {
                    let mut v = report::outcome_json(&outcome, true);
                    v["request"] = serde_json::json!({
                        "html_file": args.html_file,
                        "locator": args.locator,
                        "url": args.url,
                    });
                    add_envelope(&mut v, "reduce", t0);
                    println!("{}", v);
                }
            }
        }
        Commands::Hints(args) => {
            let t0 = std::time::Instant::now();
            let mut v = report::hints(&args.locator);
            add_envelope(&mut v, "hints", t0);
            println!("{}", v);
        }
        Commands::Candidates(args) => {
            let t0 = std::time::Instant::now();
            let cfg = args.config.resolve()?;
            let html = read_html(&args.html_file)?;
            let mut v = report::candidates(&html, &args.locator, &cfg)?;
            add_envelope(&mut v, "candidates", t0);
            println!("{}", v);
        }
        Commands::Query(args) => {
            let t0 = std::time::Instant::now();
            let cfg = args.config.resolve()?;
            let html = read_html(&args.html_file)?;
            let query = args.to_query()?;
            let mut v = report::query(&html, &query, args.pruned_for.as_deref(), &cfg)?;
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("{}", v["text"].as_str().unwrap_or_default()),
                _ => {
                    add_envelope(&mut v, "query", t0);
                    println!("{}", v);
                }
            }
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": report::SCHEMA_VERSION,
                "kind": "version",
                "ok": true,
                "name": "domtrim",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("domtrim {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
    }

    Ok(())
}
