use proptest::prelude::*;
use std::collections::BTreeMap;
use taxograph_engine::similarity::{cosine, rank, shortlist};

fn composition_strategy() -> impl Strategy<Value = BTreeMap<String, f64>> {
    proptest::collection::btree_map(
        prop_oneof![
            Just("Fe".to_string()),
            Just("Cr".to_string()),
            Just("Ni".to_string()),
            Just("Co".to_string()),
            Just("Al".to_string()),
        ],
        0.0f64..1.0,
        0..=5,
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn cosine_is_bounded_and_symmetric(a in composition_strategy(), b in composition_strategy()) {
        let ab = cosine(&a, &b);
        let ba = cosine(&b, &a);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn shortlist_is_sorted_and_bounded(
        record in composition_strategy(),
        candidates in proptest::collection::vec(composition_strategy(), 0..30),
        k in 1usize..8,
    ) {
        let n = candidates.len();
        let top = shortlist(rank(&record, candidates, |c| c.clone()), k);
        prop_assert_eq!(top.len(), k.min(n));
        for pair in top.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ranking_is_a_permutation(
        record in composition_strategy(),
        candidates in proptest::collection::vec(composition_strategy(), 0..20),
    ) {
        let indexed: Vec<(usize, BTreeMap<String, f64>)> =
            candidates.into_iter().enumerate().collect();
        let n = indexed.len();
        let mut seen: Vec<usize> = rank(&record, indexed, |(_, c)| c.clone())
            .into_iter()
            .map(|r| r.candidate.0)
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }
}
