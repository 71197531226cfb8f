use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tracing::warn;

use crate::config::{EmbeddingConfig, IndexingConfig};
use crate::embedding::{embed_length_sorted, EmbeddingProvider, InstructionType};
use crate::error::CoreError;

/// Run one embedding batch on a worker thread, bounded by the configured
/// per-call timeout.
pub fn embed_with_timeout(
    provider: Arc<dyn EmbeddingProvider>,
    texts: Vec<String>,
    instruction: InstructionType,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    let item_count = texts.len();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = embed_length_sorted(provider.as_ref(), &texts, instruction);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CoreError::Timeout {
            operation: format!("embedding batch of {item_count}"),
            seconds: timeout.as_secs(),
        }
        .into()),
        Err(err) => Err(CoreError::Embedding(format!("embedding worker died: {err}")).into()),
    }
}

/// Exponential backoff with jitter: base * 2^attempt, capped, plus up to
/// 25% random slack so concurrent retries spread out.
pub fn backoff_delay(attempt: usize, base: Duration, cap: Duration) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(10) as u32);
    let capped = exp.min(cap);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis().max(1) as u64 / 4);
    capped + Duration::from_millis(jitter_ms)
}

/// Embed with retries. After `max_retries` failed attempts the error is
/// surfaced and the caller records the unit as failed.
pub fn embed_with_retry(
    provider: Arc<dyn EmbeddingProvider>,
    texts: &[String],
    instruction: InstructionType,
    embedding: &EmbeddingConfig,
    indexing: &IndexingConfig,
) -> Result<Vec<Vec<f32>>> {
    let timeout = Duration::from_secs(embedding.timeout_secs);
    let base = Duration::from_secs(indexing.retry_base_secs);
    let cap = Duration::from_secs(indexing.retry_cap_secs);
    let attempts = indexing.max_retries.max(1);

    let mut last_error = None;
    for attempt in 0..attempts {
        match embed_with_timeout(Arc::clone(&provider), texts.to_vec(), instruction, timeout) {
            Ok(vectors) => return Ok(vectors),
            Err(err) => {
                if attempt + 1 < attempts {
                    let delay = backoff_delay(attempt, base, cap);
                    warn!(
                        "attempt" = attempt + 1,
                        "backoff_ms" = delay.as_millis(),
                        "error" = %err,
                        "msg" = "retrying embedding batch"
                    );
                    thread::sleep(delay);
                }
                last_error = Some(err);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| CoreError::Embedding("embedding failed with no attempts".into()).into()))
}
