/// Compute cosine similarity between two vectors
///
/// # Returns
///
/// Cosine similarity in [-1.0, 1.0]. Returns 0.0 if either vector has zero
/// magnitude or the dimensions differ (a node embedded by a different model
/// is treated as unrelated rather than aborting the query).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        log::debug!(
            "Cosine similarity on mismatched dimensions ({} vs {}), scoring 0.0",
            a.len(),
            b.len()
        );
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Similarity of a node embedding to the query; `None` when the node has none.
pub fn relevance(query: &[f32], embedding: Option<&[f32]>) -> Option<f32> {
    embedding.map(|e| cosine_similarity(query, e))
}

/// Encode an embedding as a BLOB (little-endian f32 array)
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Parse embedding BLOB to Vec<f32>; `None` if the length is not a multiple of 4
pub fn decode_embedding(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }

    blob.chunks(4)
        .map(|bytes| {
            let arr: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(arr))
        })
        .collect()
}
