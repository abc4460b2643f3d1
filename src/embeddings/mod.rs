pub mod openai;

pub use openai::OpenAIEmbedder;

use async_trait::async_trait;

use crate::Result;

/// Turns query text into a fixed-dimension vector.
///
/// The retrieval core calls this once per text query and does not retry;
/// any retry policy belongs to the implementation.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
