use std::cmp::Ordering;

use crate::domain::knowledge::KnowledgePassage;

/// Cosine of the angle between two vectors, in `[-1, 1]`.
///
/// Returns `0.0` when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0) as f32
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredPassage {
    pub passage: KnowledgePassage,
    pub score: f32,
}

/// Scores every embedded passage against `query` and keeps the best `limit`, most similar
/// first. Passages without an embedding are skipped. Ties keep their input order.
pub fn rank_passages(
    query: &[f32],
    passages: Vec<KnowledgePassage>,
    limit: usize,
) -> Vec<ScoredPassage> {
    let mut scored: Vec<ScoredPassage> = passages
        .into_iter()
        .filter_map(|passage| {
            let score = cosine_similarity(query, passage.embedding.as_deref()?);
            Some(ScoredPassage { passage, score })
        })
        .collect();

    scored.sort_by(|left, right| right.score.partial_cmp(&left.score).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}
