use anyhow::{Context, Result};
use clap::Parser;
use kgrag::graph::GraphDocument;
use kgrag::store::SqliteGraphStore;
use kgrag::Config;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "load")]
#[command(about = "Load extracted nodes and edges into the kgrag graph database")]
struct Args {
    /// Graph JSON file: {"nodes": [...], "edges": [...]}
    #[arg(short, long)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.store.log_level.as_str()),
    )
    .init();
    log::info!("Database path: {}", config.db_path().display());

    let json = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let doc = GraphDocument::from_json(&json)
        .with_context(|| format!("Invalid graph file {}", args.file.display()))?;

    let dimensions = config.embeddings.dimensions;
    let mismatched = doc
        .nodes
        .iter()
        .filter(|n| n.embedding().is_some_and(|e| e.len() != dimensions))
        .count();
    if mismatched > 0 {
        log::warn!(
            "{} node(s) have embeddings that are not {}-dimensional; they will score 0",
            mismatched,
            dimensions
        );
    }

    let store = SqliteGraphStore::open(config.db_path(), config.migrations_dir()).await?;

    let start = Instant::now();
    let node_count = doc.nodes.len();
    let edge_count = doc.edges.len();
    let written_nodes = store.add_nodes(doc.nodes).await?;
    let written_edges = store.add_edges(doc.edges).await?;
    log::info!(
        "Loaded {}/{} node(s) and {}/{} new edge(s) in {:?}",
        written_nodes,
        node_count,
        written_edges,
        edge_count,
        start.elapsed()
    );

    let (nodes, edges) = store.counts().await?;
    println!("Graph now holds {} node(s), {} edge(s)", nodes, edges);

    Ok(())
}
