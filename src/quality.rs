/// Pre-computed score weight for a code fragment, in `[0.1, 1.2]`.
///
/// The token-count curve penalizes trivial fragments and rewards
/// content-rich ones without unbounded growth:
/// - under 10 tokens: 0.1 at 0 rising to 0.6 at 10
/// - 10..20 tokens: 0.5 rising to 1.0
/// - 20 tokens and up: 1.0 rising to 1.2, saturating at 200 tokens
///
/// Extraction always assigns a qualified name, so its 10% bonus is part
/// of the baseline; a docstring earns a further 15%. The final clamp
/// keeps every fragment inside the band.
pub fn calculate_score_weight(token_count: usize, has_docstring: bool) -> f32 {
    let n = token_count as f32;
    let base = if token_count >= 20 {
        1.0 + 0.2 * ((n - 20.0) / 180.0).min(1.0)
    } else if token_count >= 10 {
        0.5 + (n - 10.0) / 20.0
    } else {
        0.1 + 0.05 * n
    };

    let mut bonus = 1.10;
    if has_docstring {
        bonus += 0.15;
    }

    (base * bonus).clamp(0.1, 1.2)
}
