// src/placement/mod.rs
//
// Chooses a version when the client has none or requested one that isn't
// available.
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};

/// If `weights` is empty, return the lexicographic max of `available`
/// (never treated as semver). Otherwise build a multiset repeating each
/// available version `weights[v]` times and return a uniform random pick;
/// weight entries for versions that aren't currently available are
/// ignored.
pub fn place(available: &HashSet<String>, weights: &HashMap<String, u64>) -> Option<String> {
    if weights.is_empty() {
        return available.iter().max().cloned();
    }

    let mut choices: Vec<&String> = Vec::new();
    for version in available {
        let count = weights.get(version).copied().unwrap_or(0);
        for _ in 0..count {
            choices.push(version);
        }
    }

    choices.choose(&mut rand::thread_rng()).map(|v| (*v).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_available_returns_none() {
        let available = HashSet::new();
        let weights = HashMap::new();
        assert_eq!(place(&available, &weights), None);
    }

    #[test]
    fn no_weights_picks_lexicographic_max() {
        let available: HashSet<String> = ["1", "2", "10"].iter().map(|s| s.to_string()).collect();
        let weights = HashMap::new();
        // lexicographic, not numeric: "2" > "10"
        assert_eq!(place(&available, &weights).as_deref(), Some("2"));
    }

    #[test]
    fn weights_ignore_unavailable_versions() {
        let available: HashSet<String> = ["1".to_string()].into_iter().collect();
        let mut weights = HashMap::new();
        weights.insert("1".to_string(), 1u64);
        weights.insert("99".to_string(), 1000u64);
        assert_eq!(place(&available, &weights).as_deref(), Some("1"));
    }

    #[test]
    fn all_weight_on_unavailable_versions_returns_none() {
        let available: HashSet<String> = ["1".to_string()].into_iter().collect();
        let mut weights = HashMap::new();
        weights.insert("1".to_string(), 0u64);
        assert_eq!(place(&available, &weights), None);
    }

    #[test]
    fn weighted_distribution_matches_weights_long_run() {
        let available: HashSet<String> = ["1".to_string(), "2".to_string()].into_iter().collect();
        let mut weights = HashMap::new();
        weights.insert("1".to_string(), 1u64);
        weights.insert("2".to_string(), 9u64);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..10_000 {
            let v = place(&available, &weights).unwrap();
            *counts.entry(v).or_insert(0) += 1;
        }

        let ratio = *counts.get("2").unwrap() as f64 / *counts.get("1").unwrap() as f64;
        // expect ~9x, allow generous slack for randomness
        assert!(ratio > 6.0 && ratio < 13.0, "ratio was {ratio}");
    }
}
