//! Rank-and-threshold asset selection.

use std::cmp::Ordering;

/// Pick the assets ranked within the top `top_n` by score that also score
/// strictly above `threshold`.
///
/// Ranking is descending. Equal scores keep their column order, so when a tie
/// straddles the `top_n` boundary the asset appearing first wins. NaN scores
/// rank last and are never selected. The result is in column order.
pub fn select_assets(scores: &[f64], threshold: f64, top_n: usize) -> Vec<usize> {
    let ranked = rank_descending(scores);
    let mut selected: Vec<usize> = ranked
        .into_iter()
        .take(top_n)
        .filter(|&i| scores[i] > threshold)
        .collect();
    selected.sort_unstable();
    selected
}

/// Column indices ordered from highest to lowest score (stable on ties).
pub fn rank_descending(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| compare_desc(scores[a], scores[b]));
    order
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}
