use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lookup_master::config::{default_config_path, load_or_default, save_config};
use lookup_master::{
    AggregateError, Aggregator, Config, PolicyOverride, Query, QueryKind,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lookup Master - resilient lookups across chemistry and literature sources
#[derive(Parser, Debug)]
#[command(name = "lookup-master")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Look up compounds and papers across several providers with fallback", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (can be used multiple times for more verbosity: -v, -vv, -vvv)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress everything but errors on stderr
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look up one key and print the merged record as JSON
    #[command(alias = "l")]
    Lookup {
        /// Search key
        key: String,

        /// Kind of key: name, formula, smiles, abstract_text, identifier
        #[arg(long, short, default_value = "name")]
        kind: QueryKind,

        /// Global deadline in milliseconds (default from configuration)
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Try these sources first, comma separated
        #[arg(long, value_delimiter = ',', conflicts_with = "only")]
        prefer: Vec<String>,

        /// Use only these sources, comma separated
        #[arg(long, value_delimiter = ',')]
        only: Vec<String>,

        /// Adapter option as key=value (e.g. max_synonyms=5)
        #[arg(long = "option", short = 'o', value_parser = parse_key_val)]
        options: Vec<(String, String)>,
    },

    /// List configured sources as JSON
    Sources,

    /// Write the default configuration as TOML
    InitConfig {
        /// Destination (default: platform config directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty option name in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn init_tracing(cli: &Cli, config_level: &str) {
    let level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => config_level,
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("lookup_master={}", level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, config_path) = load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    init_tracing(&cli, &config.logging.level);
    if let Some(path) = &config_path {
        tracing::info!("Using config file: {}", path.display());
    }

    match cli.command {
        Commands::Lookup {
            key,
            kind,
            deadline_ms,
            prefer,
            only,
            options,
        } => {
            let aggregator =
                Aggregator::from_config(&config).context("failed to set up sources")?;

            let query = options
                .into_iter()
                .fold(Query::new(key, kind), |query, (name, value)| {
                    query.with_option(name, value)
                });
            let deadline = deadline_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| aggregator.policy().deadline());
            let adjust = if !only.is_empty() {
                PolicyOverride::Only(only)
            } else if !prefer.is_empty() {
                PolicyOverride::Prefer(prefer)
            } else {
                PolicyOverride::None
            };

            match aggregator.lookup_with(query, deadline, &adjust).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Err(err) => {
                    print_failure(&err)?;
                    std::process::exit(1);
                }
            }
        }

        Commands::Sources => {
            let aggregator =
                Aggregator::from_config(&config).context("failed to set up sources")?;
            let registry = aggregator.registry();

            let sources: Vec<serde_json::Value> = registry
                .names()
                .into_iter()
                .filter_map(|name| registry.get(name))
                .map(|source| {
                    let adapter = &source.adapter;
                    let limiter = &source.limiter;
                    serde_json::json!({
                        "name": adapter.name(),
                        "capabilities": adapter
                            .capabilities()
                            .kinds()
                            .iter()
                            .map(QueryKind::as_str)
                            .collect::<Vec<_>>(),
                        "priority": adapter.priority(),
                        "confidence": adapter.confidence(),
                        "rate_limit": {
                            "capacity": limiter.capacity(),
                            "refill_per_second": limiter.refill_per_second(),
                            "mode": limiter.mode(),
                        },
                    })
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&sources)?);
        }

        Commands::InitConfig { path, force } => {
            let path = path
                .or_else(default_config_path)
                .context("could not determine a configuration directory; pass --path")?;

            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }

            save_config(&Config::default(), &path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!("Wrote default configuration to {}", path.display());
            }
        }
    }

    Ok(())
}

/// Print a failed lookup as JSON: which sources were tried and why each failed
fn print_failure(err: &AggregateError) -> Result<()> {
    let mut body = serde_json::to_value(err)?;
    if let Some(map) = body.as_object_mut() {
        map.insert("message".to_string(), serde_json::Value::String(err.to_string()));
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    tracing::error!("{}", err);
    Ok(())
}
