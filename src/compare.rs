//! Comparing two clusterings of the same event.
//!
//! Every input is labelled by the jet that contains it; two jet collections
//! are then compared as partitions of the inputs with the Adjusted Rand
//! Index.
//!
//! | ARI | Meaning |
//! |-----|---------|
//! | 1 | Identical partitions |
//! | ~0 | No better than chance |
//! | < 0 | Worse than chance |
//!
//! ```rust
//! use jetree::compare::ari;
//!
//! let a = [0, 0, 1, 1];
//! let b = [1, 1, 0, 0];
//! assert!((ari(&a, &b) - 1.0).abs() < 1e-12);
//! ```
//!
//! # References
//!
//! - Hubert & Arabie (1985). "Comparing partitions"

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::hierarchy::MergeTree;

/// Label each input `0..n_inputs` by the index of the tree holding it.
///
/// # Errors
///
/// `InvalidParameter` when a leaf lies outside `0..n_inputs`, appears in
/// two trees, or an input is held by no tree.
pub fn leaf_labels(trees: &[MergeTree], n_inputs: usize) -> Result<Vec<usize>> {
    let mut labels: Vec<Option<usize>> = vec![None; n_inputs];
    for (label, tree) in trees.iter().enumerate() {
        for leaf in tree.leaf_ids() {
            let slot = labels.get_mut(leaf).ok_or_else(|| Error::InvalidParameter {
                name: "n_inputs",
                message: format!("leaf {leaf} is not below {n_inputs}"),
            })?;
            if slot.replace(label).is_some() {
                return Err(Error::InvalidParameter {
                    name: "trees",
                    message: format!("input {leaf} is a leaf of two jets"),
                });
            }
        }
    }
    labels
        .into_iter()
        .enumerate()
        .map(|(input, label)| {
            label.ok_or_else(|| Error::InvalidParameter {
                name: "trees",
                message: format!("input {input} is missing from the clustering"),
            })
        })
        .collect()
}

/// Adjusted Rand Index between the input partitions of two jet collections.
pub fn rand_score(first: &[MergeTree], second: &[MergeTree], n_inputs: usize) -> Result<f64> {
    let a = leaf_labels(first, n_inputs)?;
    let b = leaf_labels(second, n_inputs)?;
    Ok(ari(&a, &b))
}

/// Adjusted Rand Index between two labellings.
///
/// ```text
/// ARI = (Σ C(n_ij,2) - E) / (½(Σ C(a_i,2) + Σ C(b_j,2)) - E)
/// E   = Σ C(a_i,2) Σ C(b_j,2) / C(n,2)
/// ```
///
/// Labellings of different lengths, or empty ones, score 0. Fewer than two
/// items, or two partitions with no pair structure, score 1.
pub fn ari(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let (joint, n) = contingency_table(pred, truth);
    let comb_n = comb2(n) as f64;
    if comb_n == 0.0 {
        return 1.0;
    }

    let mut row_sums = HashMap::new();
    let mut col_sums = HashMap::new();
    for (&(p, t), &count) in &joint {
        *row_sums.entry(p).or_insert(0usize) += count;
        *col_sums.entry(t).or_insert(0usize) += count;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c) as f64).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a) as f64).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b) as f64).sum();

    let expected = sum_comb_a * sum_comb_b / comb_n;
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return 1.0;
    }
    (sum_comb_ij - expected) / denom
}

fn contingency_table(pred: &[usize], truth: &[usize]) -> (HashMap<(usize, usize), usize>, usize) {
    let mut table = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth.iter()) {
        *table.entry((p, t)).or_insert(0) += 1;
    }
    (table, pred.len())
}

fn comb2(n: usize) -> usize {
    if n < 2 {
        0
    } else {
        n * (n - 1) / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::cluster;
    use crate::config::{JetConfig, SpectralConfig};
    use crate::kinematics::Kinematics;

    fn particle(pt: f64, rapidity: f64, phi: f64) -> Kinematics {
        Kinematics::from_collider(pt, rapidity, phi, pt * rapidity.cosh())
    }

    fn two_sprays() -> Vec<Kinematics> {
        vec![
            particle(20.0, 0.0, 0.0),
            particle(5.0, 0.1, 0.05),
            particle(3.0, -0.1, -0.1),
            particle(18.0, 1.0, 3.0),
            particle(4.0, 1.1, 2.9),
        ]
    }

    #[test]
    fn test_ari_perfect_up_to_relabelling() {
        assert!((ari(&[0, 0, 1, 1, 2, 2], &[2, 2, 0, 0, 1, 1]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ari_singletons_against_one_cluster() {
        assert!(ari(&[0, 1, 2, 3], &[0, 0, 0, 0]).abs() < 1e-12);
    }

    #[test]
    fn test_ari_degenerate_inputs() {
        assert_eq!(ari(&[0], &[3]), 1.0);
        assert_eq!(ari(&[], &[]), 0.0);
        assert_eq!(ari(&[0, 1], &[0]), 0.0);
    }

    #[test]
    fn test_same_clustering_scores_one() {
        let inputs = two_sprays();
        let trees = cluster(JetConfig::sequential(0.4, -1.0), &inputs).unwrap();
        let score = rand_score(&trees, &trees, inputs.len()).unwrap();
        assert!((score - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_separated_sprays_agree_across_algorithms() {
        let inputs = two_sprays();
        let antikt = cluster(JetConfig::sequential(0.4, -1.0), &inputs).unwrap();
        let kt = cluster(JetConfig::sequential(0.4, 1.0), &inputs).unwrap();
        assert_eq!(leaf_labels(&antikt, 5).unwrap(), vec![0, 0, 0, 1, 1]);
        assert!((rand_score(&antikt, &kt, 5).unwrap() - 1.0).abs() < 1e-12);

        let spectral = cluster(JetConfig::spectral(0.4, SpectralConfig::default()), &inputs).unwrap();
        assert!(leaf_labels(&spectral, 5).is_ok());
    }

    #[test]
    fn test_missing_input_rejected() {
        let inputs = two_sprays();
        let trees = cluster(JetConfig::sequential(0.4, 0.0), &inputs).unwrap();
        assert!(matches!(
            rand_score(&trees, &trees, 6),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            rand_score(&trees, &trees, 4),
            Err(Error::InvalidParameter { .. })
        ));
    }
}
