use anyhow::{Context, Result};
use citation_scout::config::{find_config_file, get_config, load_config, Config};
use citation_scout::models::{
    ExtractionRequest, ExtractionResult, ScholarResult, SearchOptions, SourceKind,
};
use citation_scout::sources::{ResultOrigin, SearchOutcome};
use citation_scout::{MetadataExtractor, ScholarClient};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Citation Scout - resilient scholarly search and reference metadata lookup
#[derive(Parser, Debug)]
#[command(name = "citation-scout")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Search scholarly literature and resolve citation metadata", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error log output
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(long, short, value_enum, global = true, default_value_t = OutputFormat::Auto)]
    output: OutputFormat,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for results
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    /// Plain text on a terminal, JSON otherwise
    Auto,
    /// JSON format (machine-readable)
    Json,
    /// Plain text format
    Plain,
}

impl OutputFormat {
    fn is_json(self) -> bool {
        match self {
            OutputFormat::Auto => !std::io::stdout().is_terminal(),
            OutputFormat::Json => true,
            OutputFormat::Plain => false,
        }
    }
}

/// Citation source type
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    Url,
    Doi,
}

impl From<KindArg> for SourceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Url => SourceKind::Url,
            KindArg::Doi => SourceKind::Doi,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Search for works by query string
    #[command(alias = "s")]
    Search {
        /// Search query string
        query: String,

        /// Maximum number of results
        #[arg(long, short, default_value_t = 10)]
        max_results: usize,

        /// Earliest publication year
        #[arg(long)]
        year_from: Option<i32>,

        /// Latest publication year
        #[arg(long)]
        year_to: Option<i32>,

        /// Interface language hint
        #[arg(long)]
        language: Option<String>,

        /// Skip the response cache lookup
        #[arg(long)]
        no_cache: bool,
    },

    /// Resolve citation sources (DOIs or URLs) into reference metadata
    #[command(alias = "x")]
    Extract {
        /// DOIs or URLs; several are resolved as a batch
        #[arg(required = true)]
        sources: Vec<String>,

        /// Treat every source as this type instead of detecting it
        #[arg(long = "type", value_enum)]
        kind: Option<KindArg>,

        /// Conversation identifier attached to the requests
        #[arg(long)]
        conversation_id: Option<String>,
    },

    /// Check the format of a citation source without fetching it
    Validate {
        source: String,

        #[arg(long = "type", value_enum)]
        kind: Option<KindArg>,
    },

    /// Check whether the DOI resolver answers for a DOI
    CheckDoi { doi: String },

    /// Show rate limiter, breaker and cache status
    Status,

    /// Probe the search surface
    TestConnection,

    /// Print the effective configuration as TOML
    #[command(name = "config")]
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter = if cli.quiet { "error" } else { log_level };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("citation_scout={}", env_filter)),
        ))
        .with(
            cli.log_json
                .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!cli.log_json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    let config = resolve_config(cli.config.as_ref())?;
    let json = cli.output.is_json();

    match cli.command {
        Commands::Search {
            query,
            max_results,
            year_from,
            year_to,
            language,
            no_cache,
        } => {
            let client = ScholarClient::new(&config).context("failed to create search client")?;
            let mut options = SearchOptions::new()
                .max_results(max_results)
                .years(year_from, year_to)
                .bypass_cache(no_cache)
                .force_immediate(true);
            if let Some(language) = language {
                options = options.language(language);
            }

            let outcome = client.search_with_outcome(&query, &options).await;
            if json {
                print_json(&outcome)?;
            } else {
                print_outcome(&outcome);
            }
        }

        Commands::Extract {
            sources,
            kind,
            conversation_id,
        } => {
            let extractor =
                MetadataExtractor::new(&config).context("failed to create metadata extractor")?;
            let requests: Vec<ExtractionRequest> = sources
                .into_iter()
                .map(|source| {
                    let mut request = ExtractionRequest::new(source);
                    request.kind = kind.map(SourceKind::from);
                    request.conversation_id = conversation_id.clone();
                    request
                })
                .collect();

            let results = extractor.extract_multiple_metadata(&requests).await;
            if json {
                print_json(&results)?;
            } else {
                results.iter().for_each(print_extraction);
            }

            if results.iter().any(|r| !r.success) {
                std::process::exit(1);
            }
        }

        Commands::Validate { source, kind } => {
            let extractor =
                MetadataExtractor::new(&config).context("failed to create metadata extractor")?;
            let validation = extractor.validate_source(&source, kind.map(SourceKind::from));
            if json {
                print_json(&validation)?;
            } else if validation.is_valid {
                println!(
                    "valid {}",
                    validation.detected_type.map(|k| k.to_string()).unwrap_or_default()
                );
            } else {
                println!("invalid: {}", validation.error.as_deref().unwrap_or("unknown"));
            }

            if !validation.is_valid {
                std::process::exit(1);
            }
        }

        Commands::CheckDoi { doi } => {
            let extractor =
                MetadataExtractor::new(&config).context("failed to create metadata extractor")?;
            let accessible = extractor.check_doi_accessibility(&doi).await;
            if json {
                print_json(&serde_json::json!({ "doi": doi, "accessible": accessible }))?;
            } else {
                println!("{} {}", doi, if accessible { "is accessible" } else { "is not accessible" });
            }
        }

        Commands::Status => {
            let client = ScholarClient::new(&config).context("failed to create search client")?;
            let status = client.get_client_status();
            if json {
                print_json(&status)?;
            } else {
                let limits = &status.rate_limit_status;
                let service = &status.service_status;
                println!("Service available: {}", service.available);
                println!("Circuit: {:?}", service.circuit_state);
                println!(
                    "Requests: {} in the last minute ({} left), {} in the last hour ({} left)",
                    limits.requests_in_last_minute,
                    limits.remaining_minute,
                    limits.requests_in_last_hour,
                    limits.remaining_hour
                );
                println!(
                    "Fallback: {} ({})",
                    if service.fallback_enabled { "enabled" } else { "disabled" },
                    service.fallback_sources.join(", ")
                );
                println!("Cache: {}/{} entries", service.cache.size, service.cache.max_size);
            }
        }

        Commands::TestConnection => {
            let client = ScholarClient::new(&config).context("failed to create search client")?;
            let probe = client.test_connection().await;
            if json {
                print_json(&probe)?;
            } else if probe.success {
                println!("OK ({}ms)", probe.response_time);
            } else {
                println!(
                    "FAILED ({}ms): {}",
                    probe.response_time,
                    probe.error.as_deref().unwrap_or("unknown error")
                );
            }

            if !probe.success {
                std::process::exit(1);
            }
        }

        Commands::ShowConfig => {
            print!("{}", config.to_toml().context("failed to render configuration")?);
        }
    }

    Ok(())
}

/// Load configuration from file if specified or found in default locations
fn resolve_config(path: Option<&PathBuf>) -> Result<Config> {
    if let Some(path) = path {
        return load_config(path).with_context(|| format!("failed to load {}", path.display()));
    }
    match find_config_file() {
        Some(path) => {
            tracing::info!("Using config file: {}", path.display());
            load_config(&path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => get_config().context("failed to read environment overrides"),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_outcome(outcome: &SearchOutcome) {
    match &outcome.origin {
        ResultOrigin::Placeholder => {
            println!("All sources failed; showing a provisional placeholder.")
        }
        ResultOrigin::Fallback(source) => println!("Results from fallback source: {}", source),
        ResultOrigin::Cache => println!("Results from cache"),
        _ => {}
    }
    if let Some(error) = &outcome.error {
        println!("Note: {}", error);
    }
    if outcome.results.is_empty() {
        println!("No results.");
    }
    for (i, result) in outcome.results.iter().enumerate() {
        print_result(i + 1, result);
    }
}

fn print_result(index: usize, result: &ScholarResult) {
    println!("{}. {}", index, result.title);
    if !result.authors.is_empty() {
        println!("   {}", result.authors.join(", "));
    }
    let venue: Vec<String> = [
        result.journal.clone(),
        result.year.map(|y| y.to_string()),
        result.doi.as_ref().map(|d| format!("doi:{}", d)),
    ]
    .into_iter()
    .flatten()
    .collect();
    if !venue.is_empty() {
        println!("   {}", venue.join(" | "));
    }
    println!(
        "   confidence {:.2}, relevance {:.2}{}",
        result.confidence,
        result.relevance_score,
        if result.is_provisional() { " (provisional)" } else { "" }
    );
}

fn print_extraction(result: &ExtractionResult) {
    match (&result.metadata, &result.error) {
        (Some(metadata), _) => {
            println!("{} [{}ms]", result.source, result.extraction_time);
            println!("   title: {}", metadata.title.as_deref().unwrap_or("-"));
            let authors: Vec<String> = metadata.authors.iter().map(|a| a.full_name()).collect();
            if !authors.is_empty() {
                println!("   authors: {}", authors.join(", "));
            }
            if let Some(date) = metadata.publication_date {
                println!("   date: {}", date);
            }
            if let Some(journal) = &metadata.journal {
                println!("   journal: {}", journal);
            }
            if let Some(doi) = &metadata.doi {
                println!("   doi: {}", doi);
            }
            println!(
                "   type: {:?}, confidence {:.2}",
                metadata.reference_type, metadata.confidence
            );
        }
        (None, error) => println!(
            "{} failed: {}",
            result.source,
            error.as_deref().unwrap_or("unknown error")
        ),
    }
}
