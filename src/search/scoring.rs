use std::collections::{HashMap, HashSet};

use crate::config::{SearchConfig, TypeBoosting};
use crate::search::{ResultKind, SearchResult};
use crate::tokenizer::CodeTokenizer;

/// Name-match boost: exact token-set equality beats a name that is a
/// subset of the query.
pub fn name_boost(query_tokens: &HashSet<String>, name_tokens: &HashSet<String>) -> f32 {
    if query_tokens.is_empty() || name_tokens.is_empty() {
        return 0.0;
    }
    if query_tokens == name_tokens {
        0.25
    } else if name_tokens.is_subset(query_tokens) {
        0.15
    } else {
        0.0
    }
}

/// Stage 4: `final = base * (1 + type_boost + name_boost) * score_weight`.
/// Monotone in the fused score for fixed boosts and weight.
pub fn apply_boosting(
    results: &mut [SearchResult],
    query: &str,
    tokenizer: &CodeTokenizer,
    boosting: &TypeBoosting,
) {
    let query_tokens = tokenizer.token_set(query);

    for result in results.iter_mut() {
        let base = result.scoring.final_score;
        let type_boost = boosting.boost_for(&result.type_label);
        let name_tokens = tokenizer.token_set(&result.name);
        let name_boost = name_boost(&query_tokens, &name_tokens);
        let weight = result.scoring.score_weight.clamp(0.1, 1.2);

        result.scoring.type_boost = type_boost;
        result.scoring.name_boost = name_boost;
        result.scoring.final_score = base * (1.0 + type_boost + name_boost) * weight;
    }
}

pub fn sort_by_score(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Stage 5: cap hits per file past the preserved head; document chunks
/// additionally collapse to one chunk per parent document.
pub fn diversity_filter(results: Vec<SearchResult>, config: &SearchConfig) -> Vec<SearchResult> {
    if results.is_empty() {
        return results;
    }

    let preserve_n = config.diversity_preserve_top_n.min(results.len());
    let mut kept: Vec<SearchResult> = Vec::with_capacity(results.len());
    let mut file_counts: HashMap<String, usize> = HashMap::new();
    let mut docs_seen: HashSet<String> = HashSet::new();

    let mut iter = results.into_iter();
    for _ in 0..preserve_n {
        if let Some(result) = iter.next() {
            match result.result_type {
                ResultKind::Code => {
                    *file_counts.entry(result.relative_path.clone()).or_insert(0) += 1;
                }
                ResultKind::Document => {
                    let doc_key = result
                        .parent_id
                        .clone()
                        .unwrap_or_else(|| result.relative_path.clone());
                    docs_seen.insert(doc_key);
                }
            }
            kept.push(result);
        }
    }

    for result in iter {
        match result.result_type {
            ResultKind::Code => {
                let count = file_counts.entry(result.relative_path.clone()).or_insert(0);
                if *count < config.max_chunks_per_file {
                    *count += 1;
                    kept.push(result);
                }
            }
            ResultKind::Document => {
                let doc_key = result
                    .parent_id
                    .clone()
                    .unwrap_or_else(|| result.relative_path.clone());
                if docs_seen.insert(doc_key) {
                    kept.push(result);
                }
            }
        }
    }

    kept
}
