use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::tokenizer::CodeTokenizer;

/// Per-field weights applied to BM25F term contributions.
///
/// `title` is intentionally absent: for documents it duplicates `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldWeights {
    pub name: f32,
    pub qualified_name: f32,
    pub signature: f32,
    pub docstring: f32,
    pub content: f32,
    pub filename: f32,
    pub file_path: f32,
    pub k1: f32,
    pub b: f32,
    pub avg_dl: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            name: 15.0,
            qualified_name: 12.0,
            signature: 10.0,
            docstring: 8.0,
            content: 6.0,
            filename: 4.0,
            file_path: 2.0,
            k1: 1.2,
            b: 0.75,
            avg_dl: 100.0,
        }
    }
}

/// A field-weighted view of one indexable entity.
#[derive(Debug, Clone, Default)]
pub struct FieldedDocument {
    pub name: String,
    pub qualified_name: String,
    pub signature: String,
    pub docstring: String,
    pub content: String,
    pub filename: String,
    pub file_path: String,
}

/// Sparse vector keyed by stable 64-bit token hashes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u64>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Inner product against another sparse vector (both index-sorted).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut score = 0.0f32;
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    score += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        score
    }
}

/// Stable sparse index for a token: the first 8 hex digits of SHA-256,
/// read as an unsigned integer. Collisions are accepted; at repository
/// scale they couple scores for <0.1% of term pairs.
pub fn stable_hash(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    // First 8 hex digits == first 4 bytes, big-endian.
    u64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]))
}

/// BM25F encoder: field-weighted term-frequency saturation, shared hash
/// space with the query encoder so no vocabulary needs to be persisted.
#[derive(Clone)]
pub struct Bm25fEncoder {
    weights: FieldWeights,
    tokenizer: CodeTokenizer,
}

impl Bm25fEncoder {
    pub fn new(weights: FieldWeights, tokenizer: CodeTokenizer) -> Self {
        Self { weights, tokenizer }
    }

    pub fn with_defaults() -> Self {
        Self::new(FieldWeights::default(), CodeTokenizer::new())
    }

    pub fn tokenizer(&self) -> &CodeTokenizer {
        &self.tokenizer
    }

    /// Encode a document into its sparse vector.
    ///
    /// Each field is tokenized independently; a term's contribution in a
    /// field is `w_f * tf*(k1+1) / (tf + k1*(1 - b + b*|F|/avg_dl))`,
    /// summed across fields. Output indices are sorted so that vectors are
    /// byte-identical across runs.
    pub fn encode(&self, document: &FieldedDocument) -> SparseVector {
        let w = &self.weights;
        let fields: [(&str, f32); 7] = [
            (&document.name, w.name),
            (&document.qualified_name, w.qualified_name),
            (&document.signature, w.signature),
            (&document.docstring, w.docstring),
            (&document.content, w.content),
            (&document.filename, w.filename),
            (&document.file_path, w.file_path),
        ];

        let mut scores: BTreeMap<u64, f32> = BTreeMap::new();

        for (text, weight) in fields {
            if text.is_empty() || weight <= 0.0 {
                continue;
            }
            let tokens = self.tokenizer.tokenize(text);
            if tokens.is_empty() {
                continue;
            }
            let field_len = tokens.len() as f32;

            let mut tf_map: BTreeMap<&str, f32> = BTreeMap::new();
            for token in tokens.iter() {
                *tf_map.entry(token.as_str()).or_insert(0.0) += 1.0;
            }

            let norm = w.k1 * (1.0 - w.b + w.b * field_len / w.avg_dl);
            for (token, tf) in tf_map {
                let saturated = tf * (w.k1 + 1.0) / (tf + norm);
                *scores.entry(stable_hash(token)).or_insert(0.0) += weight * saturated;
            }
        }

        let (indices, values): (Vec<u64>, Vec<f32>) = scores.into_iter().unzip();
        SparseVector { indices, values }
    }

    /// Encode a query: one unit weight per distinct token. IDF-like
    /// discrimination comes from the store's inner product against the
    /// field-weighted document vectors and from RRF rank bucketing.
    pub fn encode_query(&self, query: &str) -> SparseVector {
        let tokens = self.tokenizer.tokenize(query);
        let mut indices: Vec<u64> = tokens.iter().map(|t| stable_hash(t)).collect();
        indices.sort_unstable();
        indices.dedup();
        let values = vec![1.0; indices.len()];
        SparseVector { indices, values }
    }
}
