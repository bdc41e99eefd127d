//! Corpus chunks and the read-only chunk index
//!
//! Chunks arrive from an external loading/splitting pipeline with their
//! embedding vectors already computed. Once indexed they are immutable
//! for the process lifetime.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Stable chunk identifier derived from source name and text body
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(String);

impl ChunkId {
    /// Derive an identifier from a chunk's source and body.
    ///
    /// The same (source, text) pair always hashes to the same id, so
    /// re-ingestion of an unchanged corpus is idempotent.
    pub fn derive(source: &str, text: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(source.as_bytes());
        hasher.update(b"\x00");
        hasher.update(text.as_bytes());
        let hash = hasher.finalize();
        Self(format!("{}_{}", source, &hash.to_hex().as_str()[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable unit of retrievable text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable identifier (source + content hash)
    pub id: ChunkId,
    /// Text body
    pub text: String,
    /// Origin document name
    pub source: String,
    /// Position index within the origin document
    pub position: usize,
    /// Fixed-length vector representation
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(source: impl Into<String>, position: usize, text: impl Into<String>) -> Self {
        let source = source.into();
        let text = text.into();
        let id = ChunkId::derive(&source, &text);
        Self {
            id,
            text,
            source,
            position,
            embedding: Vec::new(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Read-only chunk store preserving ingestion order
///
/// Ingestion order is the tie-break for score-equal retrieval results,
/// so the ordinal of each chunk is tracked alongside the id lookup.
pub struct CorpusIndex {
    chunks: Vec<Chunk>,
    ordinals: AHashMap<ChunkId, usize>,
}

impl CorpusIndex {
    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        let ordinals = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self { chunks, ordinals }
    }

    pub fn get(&self, id: &ChunkId) -> Option<&Chunk> {
        self.ordinals.get(id).map(|&i| &self.chunks[i])
    }

    /// Ingestion ordinal of a chunk, used for stable tie-breaking
    pub fn ordinal(&self, id: &ChunkId) -> Option<usize> {
        self.ordinals.get(id).copied()
    }

    /// Chunks in ingestion order
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
