//! Composition similarity ranking
//!
//! Cosine similarity over element-fraction vectors. The key space is the
//! union of both maps with missing elements read as zero; fractions are
//! non-negative, so scores land in [0, 1] (clamped against rounding).

use std::collections::BTreeMap;

/// A candidate with its similarity to the record.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub candidate: T,
    pub score: f64,
}

/// Cosine similarity of two composition maps. Zero vectors score 0.
pub fn cosine(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>) -> f64 {
    let dot: f64 = a
        .iter()
        .filter_map(|(k, x)| b.get(k).map(|y| x * y))
        .sum();
    let norm_a = a.values().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Score every candidate and sort non-increasing. Ties keep input order.
pub fn rank<T, F>(record: &BTreeMap<String, f64>, candidates: Vec<T>, composition: F) -> Vec<Ranked<T>>
where
    F: Fn(&T) -> BTreeMap<String, f64>,
{
    let mut ranked: Vec<Ranked<T>> = candidates
        .into_iter()
        .map(|candidate| {
            let score = cosine(record, &composition(&candidate));
            Ranked { candidate, score }
        })
        .collect();
    // sort_by is stable
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked
}

/// The first `min(k, len)` entries of a ranking.
pub fn shortlist<T>(mut ranked: Vec<Ranked<T>>, k: usize) -> Vec<Ranked<T>> {
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn comp(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_identical_composition_scores_one() {
        let record = comp(&[("Fe", 0.5), ("Cr", 0.5)]);
        assert_relative_eq!(cosine(&record, &record.clone()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_disjoint_composition_scores_zero() {
        let record = comp(&[("Fe", 0.5), ("Cr", 0.5)]);
        assert_eq!(cosine(&record, &comp(&[("Al", 1.0)])), 0.0);
    }

    #[test]
    fn test_empty_composition_scores_zero() {
        let record = comp(&[("Fe", 1.0)]);
        assert_eq!(cosine(&record, &BTreeMap::new()), 0.0);
        assert_eq!(cosine(&BTreeMap::new(), &BTreeMap::new()), 0.0);
    }

    #[test]
    fn test_partial_overlap() {
        let a = comp(&[("Fe", 1.0), ("Ni", 1.0)]);
        let b = comp(&[("Fe", 1.0)]);
        assert_relative_eq!(cosine(&a, &b), 1.0 / 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_rank_orders_and_keeps_ties_stable() {
        let record = comp(&[("Fe", 1.0)]);
        let candidates = vec![
            ("none", comp(&[("Al", 1.0)])),
            ("tie-a", comp(&[("Fe", 1.0), ("Ni", 1.0)])),
            ("best", comp(&[("Fe", 2.0)])),
            ("tie-b", comp(&[("Fe", 1.0), ("Co", 1.0)])),
        ];
        let ranked = rank(&record, candidates, |(_, c)| c.clone());
        let order: Vec<&str> = ranked.iter().map(|r| r.candidate.0).collect();
        assert_eq!(order, vec!["best", "tie-a", "tie-b", "none"]);

        let top = shortlist(ranked, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].candidate.0, "best");
    }

    #[test]
    fn test_shortlist_shorter_than_k() {
        let ranked = rank(&comp(&[("Fe", 1.0)]), vec![comp(&[("Fe", 1.0)])], |c| c.clone());
        assert_eq!(shortlist(ranked, 5).len(), 1);
    }
}
