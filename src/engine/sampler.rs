use ahash::AHashSet;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{IdRange, SamplingStrategy};

pub fn session_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Draws at most `sample_size` distinct IDs from `range`.
///
/// A sample covering the whole range enumerates it in order. Otherwise the
/// draw is without replacement; `SequentialHead` takes the first half of the
/// sample as `lo, lo+1, ..` so low IDs (the ones most likely to exist) are
/// always covered.
pub fn sample_ids(range: IdRange, sample_size: usize, strategy: SamplingStrategy, rng: &mut impl Rng) -> Vec<u64> {
    if range.is_empty() || sample_size == 0 {
        return Vec::new();
    }
    let total = range.len();
    if sample_size as u64 >= total {
        return (range.lo..=range.hi).collect();
    }
    // sample_size < total, so total fits in usize here.
    let total = total as usize;

    let head = match strategy {
        SamplingStrategy::SequentialHead => sample_size / 2,
        SamplingStrategy::Uniform => 0,
    };
    let mut ids: Vec<u64> = (0..head as u64).map(|i| range.lo + i).collect();

    let rest = total - head;
    ids.extend(
        rand::seq::index::sample(rng, rest, sample_size - head)
            .into_iter()
            .map(|i| range.lo + (head + i) as u64),
    );
    ids
}

/// Public-link token guesses: `share<N>` patterns first, then random
/// 15-character alphanumeric strings, `count` distinct values in total.
pub fn token_candidates(count: usize, rng: &mut impl Rng) -> Vec<String> {
    let patterned = (count / 4).min(900);
    let mut seen = AHashSet::with_capacity(count);
    let mut out = Vec::with_capacity(count);

    for n in 100..100 + patterned {
        let token = format!("share{n}");
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    while out.len() < count {
        let token: String = (0..15).map(|_| char::from(rng.sample(Alphanumeric))).collect();
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn small_range_is_enumerated() {
        let mut rng = session_rng(Some(1));
        let ids = sample_ids(IdRange::new(5, 9), 50, SamplingStrategy::Uniform, &mut rng);
        assert_eq!(ids, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn sample_has_no_duplicates_and_stays_in_range() {
        for strategy in [SamplingStrategy::Uniform, SamplingStrategy::SequentialHead] {
            let mut rng = session_rng(None);
            let ids = sample_ids(IdRange::new(1, 1000), 50, strategy, &mut rng);
            assert_eq!(ids.len(), 50);
            let unique: BTreeSet<_> = ids.iter().copied().collect();
            assert_eq!(unique.len(), 50);
            assert!(ids.iter().all(|id| (1..=1000).contains(id)));
        }
    }

    #[test]
    fn sequential_head_covers_lowest_ids() {
        let mut rng = session_rng(Some(7));
        let ids = sample_ids(IdRange::new(1, 1000), 50, SamplingStrategy::SequentialHead, &mut rng);
        assert_eq!(&ids[..25], &(1..=25).collect::<Vec<u64>>()[..]);
    }

    #[test]
    fn seeded_samples_repeat() {
        let a = sample_ids(IdRange::new(1, 500), 20, SamplingStrategy::Uniform, &mut session_rng(Some(42)));
        let b = sample_ids(IdRange::new(1, 500), 20, SamplingStrategy::Uniform, &mut session_rng(Some(42)));
        assert_eq!(a, b);
    }

    #[test]
    fn tokens_are_distinct_and_well_formed() {
        let tokens = token_candidates(200, &mut session_rng(Some(3)));
        assert_eq!(tokens.len(), 200);
        assert_eq!(tokens[0], "share100");
        let unique: BTreeSet<_> = tokens.iter().collect();
        assert_eq!(unique.len(), 200);
        assert!(tokens[50..].iter().all(|t| t.len() == 15 && t.chars().all(|c| c.is_ascii_alphanumeric())));
    }
}
