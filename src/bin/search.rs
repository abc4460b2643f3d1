use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use kgrag::cache::EmbeddingCache;
use kgrag::embeddings::OpenAIEmbedder;
use kgrag::graph::render::{format_relationships, render_dot};
use kgrag::graph::{Direction, MetadataFilter, NodeId, SubGraph};
use kgrag::retriever::{depth_from_signed, Query, SearchMode};
use kgrag::store::SqliteGraphStore;
use kgrag::{Config, Retriever};
use std::sync::Arc;
use std::time::Instant;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Similarity,
    Traversal,
    Mmr,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Text,
    Dot,
    Json,
}

/// Retrieve a sub-graph for a query. Unset options fall back to [retrieval] in config.toml.
#[derive(Parser, Debug)]
#[command(name = "search")]
struct Args {
    /// Free-text query (embedded with the configured model)
    query: Option<String>,

    /// Start from an entity instead of text, as TYPE:NAME
    #[arg(long, value_parser = parse_node_id, conflicts_with = "query")]
    seed: Option<NodeId>,

    #[arg(long, value_enum, default_value = "mmr")]
    mode: Mode,

    #[arg(short, long)]
    k: Option<usize>,

    #[arg(long)]
    fetch_k: Option<usize>,

    #[arg(long, allow_negative_numbers = true)]
    depth: Option<i64>,

    #[arg(long)]
    lambda: Option<f32>,

    #[arg(long)]
    adjacent_k: Option<usize>,

    #[arg(long)]
    score_threshold: Option<f32>,

    /// outgoing, incoming or both
    #[arg(long)]
    direction: Option<Direction>,

    /// Only follow edges with this label (repeatable)
    #[arg(long = "label")]
    labels: Vec<String>,

    /// Extra MMR root as TYPE:NAME (repeatable)
    #[arg(long = "root", value_parser = parse_node_id)]
    roots: Vec<NodeId>,

    /// Metadata filter as KEY=VALUE; VALUE is parsed as JSON, else taken as a string (repeatable)
    #[arg(long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, serde_json::Value)>,

    #[arg(long, value_enum, default_value = "text")]
    format: Format,
}

fn parse_node_id(s: &str) -> std::result::Result<NodeId, String> {
    match s.split_once(':') {
        Some((node_type, name)) if !node_type.is_empty() && !name.is_empty() => {
            Ok(NodeId::new(name, node_type))
        }
        _ => Err(format!("expected TYPE:NAME, got '{}'", s)),
    }
}

fn parse_filter(s: &str) -> std::result::Result<(String, serde_json::Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let value = serde_json::from_str(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn print_graph(graph: &SubGraph, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(graph)?),
        Format::Dot => print!("{}", render_dot(graph)),
        Format::Text => {
            if graph.is_empty() {
                println!("No results found.");
                return Ok(());
            }
            for (i, n) in graph.nodes.iter().enumerate() {
                let relevance = n
                    .relevance
                    .map(|r| format!("{:.3}", r))
                    .unwrap_or_else(|| "-".to_string());
                println!("{}. {} (relevance {}, depth {})", i + 1, n.node.id(), relevance, n.depth);
                if let Some(content_id) = n.node.content_id() {
                    println!("   content: {}", content_id);
                }
            }
            if !graph.edges.is_empty() {
                println!();
                print!("{}", format_relationships(graph));
            }
            for w in &graph.warnings {
                println!("warning: expansion of {} failed: {}", w.node, w.reason);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.store.log_level.as_str()),
    )
    .init();

    let query = match (&args.query, &args.seed) {
        (Some(text), None) if !text.trim().is_empty() => Query::Text(text.clone()),
        (None, Some(seed)) => Query::Seed(seed.clone()),
        _ => anyhow::bail!(
            "Usage: search <query> | --seed TYPE:NAME [--mode similarity|traversal|mmr]\nExample: search \"who did Marie Curie marry\" --depth 1"
        ),
    };

    let defaults = &config.retrieval;
    let k = args.k.unwrap_or(defaults.k);
    let depth = depth_from_signed(args.depth.unwrap_or(defaults.depth))?;
    let mode = match args.mode {
        Mode::Similarity => SearchMode::Similarity { k },
        Mode::Traversal => SearchMode::Traversal { k, depth },
        Mode::Mmr => {
            let mut params = defaults.mmr_params()?;
            params.k = k;
            params.depth = depth;
            params.fetch_k = args.fetch_k.unwrap_or(params.fetch_k);
            params.lambda = args.lambda.unwrap_or(params.lambda);
            params.adjacent_k = args.adjacent_k.or(params.adjacent_k);
            params.score_threshold = args.score_threshold.or(params.score_threshold);
            SearchMode::MmrTraversal {
                params,
                roots: args.roots.clone(),
            }
        }
    };

    let mut options = defaults.traversal_options();
    if let Some(direction) = args.direction {
        options.direction = direction;
    }
    if !args.labels.is_empty() {
        options.edge_labels = Some(args.labels.clone());
    }
    options.filter = args
        .filters
        .iter()
        .cloned()
        .fold(MetadataFilter::new(), |f, (key, value)| f.with(key, value));

    let store = SqliteGraphStore::open(config.db_path(), config.migrations_dir()).await?;

    let cache = Arc::new(EmbeddingCache::new(config.embeddings.cache_capacity));
    let embedder = OpenAIEmbedder::new(config.api_key()?, config.embeddings.model.clone())?
        .with_dimensions(config.embeddings.dimensions)
        .with_max_retries(config.embeddings.max_retries)
        .with_cache(cache);

    let retriever = Retriever::new(Arc::new(store), options).with_embedder(Arc::new(embedder));

    let start = Instant::now();
    let graph = retriever
        .retrieve(query, &mode)
        .await
        .with_context(|| format!("{} search failed", mode.name()))?;
    log::info!("Retrieved {} node(s) in {:?}", graph.len(), start.elapsed());

    print_graph(&graph, args.format)
}
