use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;

use crate::encoder::stable_hash;
use crate::error::CoreError;
use crate::tokenizer::CodeTokenizer;

/// Instruction conditioning for asymmetric query/passage encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionType {
    Nl2CodeQuery,
    Nl2CodePassage,
    Code2CodeQuery,
    Code2CodePassage,
    QaQuery,
    QaPassage,
    DocumentPassage,
}

impl InstructionType {
    pub fn prompt(&self) -> &'static str {
        match self {
            InstructionType::Nl2CodeQuery => {
                "Find the most relevant code snippet given the following query:"
            }
            InstructionType::Nl2CodePassage => "Candidate code snippet:",
            InstructionType::Code2CodeQuery => {
                "Find an equivalent code snippet given the following code snippet:"
            }
            InstructionType::Code2CodePassage => "Candidate code snippet:",
            InstructionType::QaQuery => "Answer the following technical question:",
            InstructionType::QaPassage => "Candidate answer:",
            InstructionType::DocumentPassage => "Candidate document:",
        }
    }
}

/// Batch text-to-vector contract.
///
/// Implementations may reorder internally for throughput, but the output
/// must line up with the input order.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, texts: &[String], instruction: InstructionType) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    fn batch_size(&self) -> usize {
        64
    }

    fn close(&self) {}

    fn embed_one(&self, text: &str, instruction: InstructionType) -> Result<Vec<f32>> {
        let vectors = self.embed(&[text.to_string()], instruction)?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("provider returned no embedding"))
    }
}

/// Sort texts by length before batching (long-first keeps provider batches
/// dense), then restore the caller's order. This is the wrapper the
/// indexing pipeline uses for every provider.
pub fn embed_length_sorted(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    instruction: InstructionType,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut order: Vec<usize> = (0..texts.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(texts[i].len()));

    let sorted: Vec<String> = order.iter().map(|&i| texts[i].clone()).collect();
    let batch = provider.batch_size().max(1);

    let mut sorted_vectors: Vec<Vec<f32>> = Vec::with_capacity(sorted.len());
    for chunk in sorted.chunks(batch) {
        let mut vectors = provider.embed(chunk, instruction)?;
        if vectors.len() != chunk.len() {
            return Err(CoreError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                chunk.len()
            ))
            .into());
        }
        sorted_vectors.append(&mut vectors);
    }

    let mut result: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
    for (slot, vector) in order.into_iter().zip(sorted_vectors) {
        result[slot] = vector;
    }
    Ok(result)
}

/// Deterministic feature-hashing embedder: each token lands in a signed
/// bucket derived from its stable hash, and the vector is L2-normalized.
/// Ships as the offline default and as the test double; model-backed
/// providers stay behind the same trait.
pub struct HashingEmbedder {
    dimension: usize,
    tokenizer: CodeTokenizer,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
            tokenizer: CodeTokenizer::new(),
        }
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, texts: &[String], _instruction: InstructionType) -> Result<Vec<Vec<f32>>> {
        let vectors = texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for token in self.tokenizer.tokenize(text).iter() {
                    let hash = stable_hash(token);
                    let bucket = (hash as usize) % self.dimension;
                    let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
                    vector[bucket] += sign;
                }
                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect();
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        256
    }
}

/// Closed provider registry: implementations are registered here at
/// composition time, not discovered at runtime.
pub fn provider_from_name(name: &str, dimension: usize) -> Result<Arc<dyn EmbeddingProvider>> {
    match name {
        "hash" => Ok(Arc::new(HashingEmbedder::new(dimension))),
        other => Err(CoreError::Unsupported(format!(
            "embedding provider '{other}' is not built into this binary"
        ))
        .into()),
    }
}
