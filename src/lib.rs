pub mod cache;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod retriever;
pub mod search;
pub mod store;
pub mod traversal;

pub use config::Config;
pub use error::{KgragError, Result};
pub use graph::{Direction, Edge, Metadata, MetadataFilter, Node, NodeId, SubGraph};
pub use retriever::{Query, Retriever, SearchMode};
pub use store::GraphStore;
pub use traversal::{MmrTraversalParams, TraversalOptions};
