//! Maximal-marginal-relevance (MMR) selection.
//!
//! Given a query vector and a candidate set (normally the `fetch_k` nearest
//! neighbours), MMR picks `k` candidates one at a time, each maximizing
//!
//! ```text
//! λ · sim(query, c) − (1 − λ) · max_{s ∈ selected} sim(c, s)
//! ```
//!
//! so later picks trade relevance for diversity. `λ = 1` degenerates to plain
//! similarity ranking, `λ = 0` to pure diversity after the first pick.
//! Ties resolve to the earlier candidate, which keeps selection deterministic.

use crate::embedding::cosine_similarity;

/// Retrieval tuning for one MMR search.
#[derive(Debug, Clone, Copy)]
pub struct MmrParams {
    /// Results to return.
    pub k: usize,
    /// Nearest neighbours to consider before re-selection.
    pub fetch_k: usize,
    /// Relevance weight in `[0, 1]`.
    pub lambda: f32,
}

impl MmrParams {
    pub fn from_config(config: &crate::config::RetrievalConfig) -> Self {
        Self {
            k: config.k,
            fetch_k: config.fetch_k.max(config.k),
            lambda: config.mmr_lambda,
        }
    }
}

/// Indices into `candidates`, in selection order. Returns at most
/// `min(k, candidates.len())` entries.
pub fn maximal_marginal_relevance(
    query: &[f32],
    candidates: &[Vec<f32>],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    let limit = k.min(candidates.len());
    if limit == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(limit);
    // Highest similarity to any selected candidate, per candidate.
    let mut redundancy = vec![f32::NEG_INFINITY; candidates.len()];

    let first = argmax(relevance.iter().copied());
    selected.push(first);
    update_redundancy(&mut redundancy, candidates, first);

    while selected.len() < limit {
        let mut best: Option<(usize, f32)> = None;
        for (i, &rel) in relevance.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let score = lambda * rel - (1.0 - lambda) * redundancy[i];
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, _)) => {
                selected.push(i);
                update_redundancy(&mut redundancy, candidates, i);
            }
            None => break,
        }
    }

    selected
}

fn update_redundancy(redundancy: &mut [f32], candidates: &[Vec<f32>], picked: usize) {
    for (i, c) in candidates.iter().enumerate() {
        let sim = cosine_similarity(c, &candidates[picked]);
        if sim > redundancy[i] {
            redundancy[i] = sim;
        }
    }
}

fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best_idx = 0;
    let mut best = f32::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    best_idx
}
