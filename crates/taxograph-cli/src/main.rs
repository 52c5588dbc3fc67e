//! Taxograph CLI
//!
//! - `run`: classify material records and mount them into the taxonomy
//! - `menu`: print the candidate menu offered at a node (useful to tune
//!   per-layer edge directions)
//! - `ping`: check graph store connectivity

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taxograph_engine::{BatchEvent, BatchRunner, DecisionStrategy, EngineConfig, Navigator, NodeId};
use taxograph_oracle::{DecisionOracle, OpenAICompatClient};
use taxograph_store::{GraphSnapshot, GraphStore, MemoryGraph, Neo4jHttpStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod records;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "taxograph")]
#[command(author, version, about = "Taxograph: mount material records into a taxonomy graph")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Configuration file (default: ./taxograph.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Use an in-memory graph loaded from a JSON snapshot instead of Neo4j
    #[arg(long, global = true)]
    graph_snapshot: Option<PathBuf>,
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify records and mount them
    Run {
        /// JSON file with one record or an array of records
        #[arg(long)]
        records: Option<PathBuf>,
        /// Only process the record at this position
        #[arg(long)]
        index: Option<usize>,
        /// Directory for the result file
        #[arg(long)]
        out: Option<PathBuf>,
        /// Decision strategy (single-shot | execute-and-confirm)
        #[arg(long)]
        strategy: Option<DecisionStrategy>,
    },

    /// Print the candidate menu of a node
    Menu {
        /// Node element id (default: the taxonomy root)
        node: Option<String>,
        /// Display name of the node
        #[arg(long)]
        name: Option<String>,
        /// Navigation depth used to pick edge directions
        #[arg(long, default_value_t = 0)]
        depth: usize,
    },

    /// Check graph store connectivity
    Ping,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.global)?;

    let mut config = CliConfig::load(cli.global.config.as_deref())?;
    if let Some(snapshot) = &cli.global.graph_snapshot {
        config.graph.snapshot = Some(snapshot.clone());
    }

    match cli.command {
        Commands::Run {
            records,
            index,
            out,
            strategy,
        } => {
            if let Some(strategy) = strategy {
                config.engine.navigation.strategy = strategy;
            }
            cmd_run(config, records, index, out).await
        }
        Commands::Menu { node, name, depth } => cmd_menu(config, node, name, depth).await,
        Commands::Ping => cmd_ping(config).await,
    }
}

fn init_tracing(args: &GlobalArgs) -> Result<()> {
    let filter = if args.verbose { "debug" } else { "info" };
    let file_layer = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Open the configured graph store. Snapshot keys may stand in for node
/// ids in `taxonomy.root_id`.
fn open_store(config: &mut CliConfig) -> Result<Arc<dyn GraphStore>> {
    match &config.graph.snapshot {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read graph snapshot {}", path.display()))?;
            let snapshot: GraphSnapshot = serde_json::from_str(&raw)
                .with_context(|| format!("invalid graph snapshot {}", path.display()))?;
            let (graph, keys) = MemoryGraph::from_snapshot(&snapshot)?;
            resolve_root(&mut config.engine, |key| keys.get(key).cloned());
            tracing::info!(
                nodes = graph.node_count(),
                edges = graph.edge_count(),
                "loaded graph snapshot"
            );
            Ok(Arc::new(graph))
        }
        None => Ok(Arc::new(Neo4jHttpStore::new(config.graph.neo4j())?)),
    }
}

fn resolve_root(engine: &mut EngineConfig, lookup: impl Fn(&str) -> Option<NodeId>) {
    if let Some(id) = lookup(engine.taxonomy.root_id.as_str()) {
        engine.taxonomy.root_id = id;
    }
}

fn open_oracle() -> Result<Arc<dyn DecisionOracle>> {
    let client = OpenAICompatClient::from_env()?;
    tracing::info!(
        provider = ?client.config().provider,
        model = %client.config().model,
        "decision oracle configured"
    );
    Ok(Arc::new(client))
}

async fn cmd_run(
    mut config: CliConfig,
    records: Option<PathBuf>,
    index: Option<usize>,
    out: Option<PathBuf>,
) -> Result<()> {
    let records_path = records
        .or_else(|| config.records.path.clone())
        .ok_or_else(|| anyhow!("no records file: pass --records or set [records].path"))?;
    let records = records::load_records(&records_path, index)?;

    // Credentials are checked before anything touches the graph.
    let oracle = open_oracle()?;
    let store = open_store(&mut config)?;

    eprintln!(
        "{} {} record(s) from {}",
        "Processing".green().bold(),
        records.len(),
        records_path.display()
    );

    let navigator = Navigator::new(store, oracle, config.engine.clone());
    let mut runner = BatchRunner::new(navigator);
    runner.on_event(Box::new(print_event));

    let report = runner.run(&records).await?;

    let results_dir = out.unwrap_or_else(|| config.records.results_dir.clone());
    let written = records::write_report(&results_dir, &config.records.result_prefix, &report)?;
    eprintln!(
        "{} {}",
        "wrote".green().bold(),
        written.display().to_string().bold()
    );
    Ok(())
}

fn print_event(event: BatchEvent) {
    match event {
        BatchEvent::Started { total } => {
            eprintln!("{} {} record(s)", "Starting".cyan().bold(), total);
        }
        BatchEvent::RecordStarted { index, title } => {
            eprintln!(
                "{} #{} {}",
                "→".cyan(),
                index,
                title.unwrap_or_default().dimmed()
            );
        }
        BatchEvent::RecordMounted { index, path, node } => {
            eprintln!("  {} #{} {} ({})", "ok".green().bold(), index, path, node.dimmed());
        }
        BatchEvent::RecordFailed { index, reason, error } => {
            eprintln!("  {} #{} [{}] {}", "failed".red().bold(), index, reason, error);
        }
        BatchEvent::Finished { success, failed } => {
            eprintln!(
                "{} {} succeeded, {} failed",
                "Done.".bold(),
                success.to_string().green(),
                failed.to_string().red()
            );
        }
    }
}

async fn cmd_menu(
    mut config: CliConfig,
    node: Option<String>,
    name: Option<String>,
    depth: usize,
) -> Result<()> {
    let store = open_store(&mut config)?;
    let taxonomy = &config.engine.taxonomy;
    let node_id = node.map(NodeId::new).unwrap_or_else(|| taxonomy.root_id.clone());
    let name = name.unwrap_or_else(|| {
        if node_id == taxonomy.root_id {
            taxonomy.root_name.clone()
        } else {
            node_id.to_string()
        }
    });

    let directions = taxonomy.directions_at(depth);
    let navigator = Navigator::new(store, Arc::new(NoOracle), config.engine.clone());
    let menu = navigator.menu_at(&node_id, &name, depth).await;

    println!(
        "{} {} (children: {:?}, examples: {:?})",
        "Menu of".green().bold(),
        name.bold(),
        directions.children,
        directions.examples
    );
    if menu.is_empty() {
        println!("  {}", "(no candidates)".yellow());
    }
    for (label, entry) in menu.iter() {
        println!("- {} {}", label.bold(), entry.element_id.to_string().dimmed());
        if !entry.examples.is_empty() {
            println!("    examples: {}", entry.examples.join(", "));
        }
    }
    Ok(())
}

async fn cmd_ping(mut config: CliConfig) -> Result<()> {
    let store = open_store(&mut config)?;
    store.ping().await.context("graph store unreachable")?;
    println!("{}", "ok".green().bold());
    Ok(())
}

/// Oracle for commands that never ask for decisions.
struct NoOracle;

#[async_trait::async_trait]
impl DecisionOracle for NoOracle {
    async fn complete(
        &self,
        _request: &taxograph_oracle::CompletionRequest,
    ) -> Result<taxograph_oracle::CompletionResponse, taxograph_oracle::OracleError> {
        Err(taxograph_oracle::OracleError::Api(
            "no decision oracle in this command".to_string(),
        ))
    }

    fn model_info(&self) -> taxograph_oracle::ModelInfo {
        taxograph_oracle::ModelInfo {
            name: "none".to_string(),
            supports_tools: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "taxograph",
            "run",
            "--records",
            "data.json",
            "--index",
            "3",
            "--strategy",
            "single-shot",
            "--graph-snapshot",
            "graph.json",
        ])
        .unwrap();
        assert_eq!(cli.global.graph_snapshot.as_deref(), Some(Path::new("graph.json")));
        match cli.command {
            Commands::Run {
                index, strategy, ..
            } => {
                assert_eq!(index, Some(3));
                assert_eq!(strategy, Some(DecisionStrategy::SingleShot));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_resolve_root_from_snapshot_key() {
        let mut engine = EngineConfig::default();
        engine.taxonomy.root_id = NodeId::new("root");
        resolve_root(&mut engine, |key| (key == "root").then(|| NodeId::new("mem:0")));
        assert_eq!(engine.taxonomy.root_id.as_str(), "mem:0");

        resolve_root(&mut engine, |_| None);
        assert_eq!(engine.taxonomy.root_id.as_str(), "mem:0");
    }

    #[tokio::test]
    async fn test_menu_over_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("graph.json");
        std::fs::write(
            &snapshot,
            r#"{"nodes": [
                {"key": "root", "labels": ["Category"], "name": "Material"},
                {"key": "metal", "labels": ["Category"], "name": "Metal"}
            ],
            "edges": [{"from": "root", "to": "metal"}]}"#,
        )
        .unwrap();

        let mut config = CliConfig::default();
        config.graph.snapshot = Some(snapshot);
        config.engine.taxonomy.root_id = NodeId::new("root");
        let store = open_store(&mut config).unwrap();
        assert_eq!(config.engine.taxonomy.root_id.as_str(), "mem:0");
        store.ping().await.unwrap();

        cmd_menu(config, None, None, 0).await.unwrap();
    }
}
