//! Scoring primitives: cosine similarity, embedding BLOB codec and the MMR
//! selector used by MMR traversal.

pub mod mmr;
pub mod similarity;

pub use mmr::{Admission, MmrSelector, Selection};
pub use similarity::cosine_similarity;
