//! Spectral embedding of the active set.
//!
//! The active nodes (plus an explicit beam node when the stopping condition
//! asks for one) are turned into a weighted graph, the graph Laplacian is
//! diagonalised, and the clustering distances are squared Euclidean
//! distances between rows of the non-trivial eigenvectors.
//!
//! # Algorithm
//!
//! ```text
//! 1. d²(i, j)  physical distances, beam row/column = beam distance
//! 2. A = f(d²), A_ii = 0, optional kNN / radius mask
//! 3. D = diag(row sums of A)
//! 4. L = D - A                          (unnormalized)
//!    L = D^-1/2 (D - A) D^-1/2           (symmetric; zero degree → 0)
//! 5. L = U Λ Uᵀ, eigenvalues ascending
//! 6. embedding = U[:, 1..=k]            (trivial first vector dropped)
//! 7. distance(i, j) = |u_i - u_j|²  (× min(pT^2p) in eigenspace mode)
//! ```
//!
//! Diagonal entries are `ΔR²` in standard mode and `+∞` with a beam node,
//! where a node finalises by pairing with the beam instead.
//!
//! # Updates after a merge
//!
//! - [`UpdatePolicy::Mean`](crate::config::UpdatePolicy::Mean) averages the two merged rows.
//! - [`UpdatePolicy::RowRecompute`](crate::config::UpdatePolicy::RowRecompute)
//!   builds the merged node's Laplacian row from physical distances and
//!   projects it onto the kept eigenvectors: `u_c = Σ_k L_jk u_kc`.
//! - [`UpdatePolicy::FullRebuild`](crate::config::UpdatePolicy::FullRebuild)
//!   reruns the whole build (handled by the engine).
//!
//! All per-node state is stored by matrix slot, so removing a row never
//! moves coordinates.

use core::cmp::Ordering;
use core::fmt;

use faer::{Mat, Side};

use super::matrix::DistanceMatrix;
use crate::config::{AffinityCutoff, LaplacianKind, SpectralConfig, StoppingCondition};
use crate::kinematics::Kinematics;
use crate::metric::{pair_distance2, DistanceMetric, ExponentPosition};

/// Why an event could not be embedded.
///
/// Not an error: every active node becomes a singleton root and the batch
/// carries on.
#[derive(Debug, Clone, PartialEq)]
pub enum Degeneracy {
    /// Every affinity entry was zero.
    ZeroAffinity,
    /// The Laplacian could not be diagonalised.
    EigenDecomposition(String),
}

impl fmt::Display for Degeneracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degeneracy::ZeroAffinity => write!(f, "all affinities are zero"),
            Degeneracy::EigenDecomposition(msg) => write!(f, "eigendecomposition failed: {msg}"),
        }
    }
}

/// Embedding and the distance matrix derived from it.
#[derive(Debug, Clone)]
pub(crate) struct SpectralState {
    pub(crate) matrix: DistanceMatrix,
    dims: usize,
    /// Slot-major coordinates, `dims` per slot.
    coords: Vec<f64>,
    eigenvalues: Vec<f64>,
    /// `deg^-1/2` per slot, 0 for non-positive degree.
    inv_sqrt_degree: Vec<f64>,
    /// Eigenspace pT weight per slot; `+∞` for the beam so pair minima pick the node.
    weights: Vec<f64>,
    diagonal: f64,
    beam: bool,
}

/// Physical squared distance between active position `i` and `j` (`n` = beam).
fn physical_distance2(metric: &DistanceMetric, points: &[Kinematics], i: usize, j: usize) -> f64 {
    let n = points.len();
    match (i == n, j == n) {
        (true, true) => 0.0,
        (true, false) => metric.beam_distance2(&points[j]),
        (false, true) => metric.beam_distance2(&points[i]),
        (false, false) => pair_distance2(metric, &points[i], &points[j]),
    }
}

/// Indices of the `k` smallest entries of `row`, skipping `skip`.
fn nearest(row: &[f64], skip: usize, k: usize) -> Vec<usize> {
    let mut others: Vec<usize> = (0..row.len()).filter(|&j| j != skip).collect();
    others.sort_by(|&a, &b| row[a].total_cmp(&row[b]).then(a.cmp(&b)));
    others.truncate(k);
    others
}

/// Dense `m × m` affinity (row-major) from dense squared distances.
fn affinity_matrix(config: &SpectralConfig, distance2: &[f64], m: usize) -> Vec<f64> {
    let mut affinity = vec![0.0; m * m];
    for i in 0..m {
        for j in 0..m {
            if i != j {
                affinity[i * m + j] = config.affinity_type.apply(distance2[i * m + j]);
            }
        }
    }
    match config.affinity_cutoff {
        AffinityCutoff::None => {}
        AffinityCutoff::Distance(r) => {
            let r2 = r * r;
            for (a, &d2) in affinity.iter_mut().zip(distance2) {
                if d2 > r2 {
                    *a = 0.0;
                }
            }
        }
        AffinityCutoff::Knn(k) => {
            let mut keep = vec![false; m * m];
            for i in 0..m {
                for j in nearest(&distance2[i * m..(i + 1) * m], i, k) {
                    keep[i * m + j] = true;
                    keep[j * m + i] = true;
                }
            }
            for (a, kept) in affinity.iter_mut().zip(keep) {
                if !kept {
                    *a = 0.0;
                }
            }
        }
    }
    affinity
}

fn inv_sqrt(degree: f64) -> f64 {
    if degree > 0.0 {
        degree.powf(-0.5)
    } else {
        0.0
    }
}

impl SpectralState {
    /// Embed `points` from scratch.
    pub(crate) fn build(
        metric: &DistanceMetric,
        config: &SpectralConfig,
        points: &[Kinematics],
    ) -> Result<Self, Degeneracy> {
        let n = points.len();
        let beam = config.stopping_condition == StoppingCondition::BeamParticle;
        let m = n + usize::from(beam);
        let diagonal = if beam {
            f64::INFINITY
        } else {
            metric.delta_r2()
        };
        let weights = Self::weights(metric, points, beam);

        if m < 2 {
            // A lone node has no graph; it can only stop.
            return Ok(Self {
                matrix: DistanceMatrix::from_lower(m, |_, _| diagonal),
                dims: 0,
                coords: Vec::new(),
                eigenvalues: Vec::new(),
                inv_sqrt_degree: vec![0.0; m],
                weights,
                diagonal,
                beam,
            });
        }

        let mut distance2 = vec![0.0; m * m];
        for i in 0..m {
            for j in 0..i {
                let d2 = physical_distance2(metric, points, i, j);
                distance2[i * m + j] = d2;
                distance2[j * m + i] = d2;
            }
        }
        let affinity = affinity_matrix(config, &distance2, m);
        if affinity.iter().all(|&a| a == 0.0) {
            return Err(Degeneracy::ZeroAffinity);
        }

        let degree: Vec<f64> = affinity.chunks(m).map(|row| row.iter().sum()).collect();
        let inv_sqrt_degree: Vec<f64> = degree.iter().map(|&d| inv_sqrt(d)).collect();
        let mut laplacian = Mat::<f64>::zeros(m, m);
        for i in 0..m {
            for j in 0..m {
                let mut value = -affinity[i * m + j];
                if i == j {
                    value += degree[i];
                }
                if config.laplacian == LaplacianKind::Symmetric {
                    value *= inv_sqrt_degree[i] * inv_sqrt_degree[j];
                }
                if !value.is_finite() {
                    return Err(Degeneracy::EigenDecomposition(format!(
                        "non-finite laplacian entry at ({i}, {j})"
                    )));
                }
                laplacian[(i, j)] = value;
            }
        }

        let eigen = laplacian
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| Degeneracy::EigenDecomposition(format!("{e:?}")))?;
        let values = eigen.S().column_vector();
        let vectors = eigen.U();

        let dims = config.num_eigenvectors.resolve(m - 1);
        let eigenvalues: Vec<f64> = (1..=dims).map(|c| values[c]).collect();
        let mut coords = vec![0.0; m * dims];
        for i in 0..m {
            for c in 0..dims {
                coords[i * dims + c] = vectors[(i, c + 1)];
            }
        }
        if eigenvalues.iter().chain(&coords).any(|v| !v.is_finite()) {
            return Err(Degeneracy::EigenDecomposition(
                "non-finite eigenpairs".to_string(),
            ));
        }

        let mut state = Self {
            matrix: DistanceMatrix::zeros(m),
            dims,
            coords,
            eigenvalues,
            inv_sqrt_degree,
            weights,
            diagonal,
            beam,
        };
        let matrix = DistanceMatrix::from_lower(m, |i, j| {
            if i == j {
                diagonal
            } else {
                state.embedding_distance(i, j)
            }
        });
        state.matrix = matrix;
        Ok(state)
    }

    fn weights(metric: &DistanceMetric, points: &[Kinematics], beam: bool) -> Vec<f64> {
        let eigenspace = metric.position() == ExponentPosition::Eigenspace;
        let mut weights: Vec<f64> = points
            .iter()
            .map(|p| if eigenspace { metric.pt_factor(p.pt) } else { 1.0 })
            .collect();
        if beam {
            weights.push(if eigenspace { f64::INFINITY } else { 1.0 });
        }
        weights
    }

    /// Kept eigenvalues, ascending.
    pub(crate) fn eigenvalues(&self) -> &[f64] {
        &self.eigenvalues
    }

    /// True when an explicit beam node occupies the last matrix index.
    pub(crate) fn has_beam(&self) -> bool {
        self.beam
    }

    /// Active index of the beam node, if any.
    pub(crate) fn beam_index(&self) -> Option<usize> {
        self.beam.then(|| self.matrix.len() - 1)
    }

    fn coord(&self, slot: usize) -> &[f64] {
        &self.coords[slot * self.dims..(slot + 1) * self.dims]
    }

    /// Distance between two slots in the embedding.
    fn embedding_distance(&self, a: usize, b: usize) -> f64 {
        let d2: f64 = self
            .coord(a)
            .iter()
            .zip(self.coord(b))
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        let weight = match self.weights[a].partial_cmp(&self.weights[b]) {
            Some(Ordering::Greater) => self.weights[b],
            _ => self.weights[a],
        };
        d2 * weight
    }

    /// Recompute row `j` of the distance matrix from the current coordinates.
    fn refresh_row(&mut self, j: usize) {
        let sj = self.matrix.slot(j);
        for k in 0..self.matrix.len() {
            let value = if k == j {
                self.diagonal
            } else {
                self.embedding_distance(sj, self.matrix.slot(k))
            };
            self.matrix.set(j, k, value);
        }
    }

    fn set_weight(&mut self, j: usize, metric: &DistanceMetric, merged: &Kinematics) {
        if metric.position() == ExponentPosition::Eigenspace {
            let slot = self.matrix.slot(j);
            self.weights[slot] = metric.pt_factor(merged.pt);
        }
    }

    /// Merge active `i` into `j` (`i > j`) by averaging their coordinates.
    pub(crate) fn merge_mean(
        &mut self,
        i: usize,
        j: usize,
        metric: &DistanceMetric,
        merged: &Kinematics,
    ) {
        let (si, sj) = (self.matrix.slot(i), self.matrix.slot(j));
        for c in 0..self.dims {
            let mean = 0.5 * (self.coords[si * self.dims + c] + self.coords[sj * self.dims + c]);
            self.coords[sj * self.dims + c] = mean;
        }
        self.matrix.remove(i);
        self.set_weight(j, metric, merged);
        self.refresh_row(j);
    }

    /// Merge active `i` into `j` (`i > j`) and project the merged node's Laplacian row.
    ///
    /// `points` are the active kinematics after the merge, so `points[j]`
    /// is the merged node and `points.len()` is the beam index when present.
    pub(crate) fn merge_recompute(
        &mut self,
        i: usize,
        j: usize,
        metric: &DistanceMetric,
        config: &SpectralConfig,
        points: &[Kinematics],
    ) {
        self.matrix.remove(i);
        let m = self.matrix.len();

        let distance2: Vec<f64> = (0..m)
            .map(|k| {
                if k == j {
                    0.0
                } else {
                    physical_distance2(metric, points, j, k)
                }
            })
            .collect();
        let mut affinity: Vec<f64> = distance2
            .iter()
            .enumerate()
            .map(|(k, &d2)| {
                if k == j {
                    0.0
                } else {
                    config.affinity_type.apply(d2)
                }
            })
            .collect();
        match config.affinity_cutoff {
            AffinityCutoff::None => {}
            AffinityCutoff::Distance(r) => {
                let r2 = r * r;
                for (a, &d2) in affinity.iter_mut().zip(&distance2) {
                    if d2 > r2 {
                        *a = 0.0;
                    }
                }
            }
            AffinityCutoff::Knn(k) => {
                let kept = nearest(&distance2, j, k);
                for (idx, a) in affinity.iter_mut().enumerate() {
                    if !kept.contains(&idx) {
                        *a = 0.0;
                    }
                }
            }
        }

        let degree: f64 = affinity.iter().sum();
        let sj = self.matrix.slot(j);
        let mut row: Vec<f64> = affinity.iter().map(|a| -a).collect();
        row[j] = degree;
        if config.laplacian == LaplacianKind::Symmetric {
            let inv_new = inv_sqrt(degree);
            self.inv_sqrt_degree[sj] = inv_new;
            for (k, value) in row.iter_mut().enumerate() {
                *value *= self.inv_sqrt_degree[self.matrix.slot(k)] * inv_new;
            }
        }

        let mut projected = vec![0.0; self.dims];
        for (k, &weight) in row.iter().enumerate() {
            if weight == 0.0 {
                continue;
            }
            for (c, p) in projected.iter_mut().enumerate() {
                *p += self.coord(self.matrix.slot(k))[c] * weight;
            }
        }
        let dims = self.dims;
        self.coords[sj * dims..(sj + 1) * dims].copy_from_slice(&projected);

        self.set_weight(j, metric, &points[j]);
        self.refresh_row(j);
    }

    /// Drop active index `i` without touching other rows.
    pub(crate) fn remove(&mut self, i: usize) {
        self.matrix.remove(i);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AffinityType, NumEigenvectors};
    use crate::metric::Invariant;

    fn particle(pt: f64, rapidity: f64, phi: f64) -> Kinematics {
        Kinematics::from_collider(pt, rapidity, phi, pt * rapidity.cosh())
    }

    fn metric(delta_r: f64) -> DistanceMetric {
        DistanceMetric::new(Invariant::Angular, 0.0, ExponentPosition::Input, delta_r)
    }

    fn event() -> Vec<Kinematics> {
        vec![
            particle(10.0, 0.0, 0.0),
            particle(8.0, 0.1, 0.1),
            particle(5.0, 2.0, 2.5),
            particle(4.0, 2.1, 2.4),
        ]
    }

    #[test]
    fn test_build_standard_mode() {
        let config = SpectralConfig::default();
        let state = SpectralState::build(&metric(0.8), &config, &event()).unwrap();
        assert_eq!(state.matrix.len(), 4);
        assert_eq!(state.eigenvalues().len(), 3);
        assert!(state.eigenvalues().windows(2).all(|w| w[0] <= w[1] + 1e-12));
        assert!((state.matrix.get(2, 2) - 0.64).abs() < 1e-12);
        for i in 0..4 {
            for j in 0..i {
                assert_eq!(state.matrix.get(i, j), state.matrix.get(j, i));
                assert!(state.matrix.get(i, j) >= 0.0);
            }
        }
    }

    #[test]
    fn test_fiedler_embedding_separates_pairs() {
        let config = SpectralConfig::default().with_num_eigenvectors(NumEigenvectors::Bounded(1));
        let state = SpectralState::build(&metric(0.8), &config, &event()).unwrap();
        assert_eq!(state.eigenvalues().len(), 1);
        assert!(state.matrix.get(1, 0) < state.matrix.get(2, 0));
        assert!(state.matrix.get(3, 2) < state.matrix.get(3, 1));
    }

    #[test]
    fn test_beam_mode_adds_infinite_diagonal() {
        let config =
            SpectralConfig::default().with_stopping_condition(StoppingCondition::BeamParticle);
        let state = SpectralState::build(&metric(0.8), &config, &event()).unwrap();
        assert_eq!(state.matrix.len(), 5);
        assert_eq!(state.beam_index(), Some(4));
        assert!(state.matrix.get(0, 0).is_infinite());
        assert!(state.matrix.argmin(false).is_some());
    }

    #[test]
    fn test_zero_affinity_is_degenerate() {
        let config =
            SpectralConfig::default().with_affinity_cutoff(AffinityCutoff::Distance(1e-6));
        let err = SpectralState::build(&metric(0.8), &config, &event()).unwrap_err();
        assert_eq!(err, Degeneracy::ZeroAffinity);
    }

    #[test]
    fn test_single_point_needs_no_graph() {
        let state =
            SpectralState::build(&metric(0.4), &SpectralConfig::default(), &event()[..1]).unwrap();
        assert_eq!(state.matrix.len(), 1);
        assert!((state.matrix.get(0, 0) - 0.16).abs() < 1e-12);
        assert!(state.eigenvalues().is_empty());
    }

    #[test]
    fn test_knn_mask_is_symmetric() {
        let config = SpectralConfig {
            affinity_cutoff: AffinityCutoff::Knn(1),
            affinity_type: AffinityType::ExponentSquared,
            ..SpectralConfig::default()
        };
        let d2 = vec![
            0.0, 1.0, 4.0, //
            1.0, 0.0, 2.0, //
            4.0, 2.0, 0.0,
        ];
        let a = affinity_matrix(&config, &d2, 3);
        // 0↔1 mutual nearest, 2's nearest is 1
        assert!(a[1] > 0.0 && a[3] > 0.0);
        assert!(a[5] > 0.0 && a[7] > 0.0);
        assert_eq!(a[2], 0.0);
        assert_eq!(a[6], 0.0);
    }

    #[test]
    fn test_mean_update_keeps_alignment() {
        let config = SpectralConfig::default();
        let m = metric(0.8);
        let points = event();
        let mut state = SpectralState::build(&m, &config, &points).unwrap();
        let merged = points[0].combine(&points[1], false);
        state.merge_mean(1, 0, &m, &merged);
        assert_eq!(state.matrix.len(), 3);
        assert!((state.matrix.get(0, 0) - 0.64).abs() < 1e-12);
        assert_eq!(state.matrix.get(0, 2), state.matrix.get(2, 0));
    }

    fn dot_rows(coords: &[f64], dims: usize, row: &[f64], c: usize) -> f64 {
        row.iter().enumerate().map(|(k, l)| l * coords[k * dims + c]).sum()
    }

    #[test]
    fn test_recompute_projects_laplacian_row() {
        let config = SpectralConfig::default();
        let m = metric(0.4);
        let points = event();
        let mut state = SpectralState::build(&m, &config, &points).unwrap();
        let (old, dims) = (state.coords.clone(), state.dims);
        let merged = points[2].combine(&points[3], false);
        let after = vec![points[0], points[1], merged];
        state.merge_recompute(3, 2, &m, &config, &after);

        let a: Vec<f64> = (0..2)
            .map(|k| config.affinity_type.apply(pair_distance2(&m, &after[2], &after[k])))
            .collect();
        let row = [-a[0], -a[1], a[0] + a[1]];
        for c in 0..dims {
            let expected = dot_rows(&old, dims, &row, c);
            assert!((state.coords[2 * dims + c] - expected).abs() < 1e-12);
        }
        // untouched rows keep their coordinates
        assert_eq!(state.coords[..2 * dims], old[..2 * dims]);
        assert!((state.matrix.get(2, 0) - state.embedding_distance(2, 0)).abs() < 1e-15);
        assert!((state.matrix.get(2, 2) - 0.16).abs() < 1e-12);
    }

    #[test]
    fn test_recompute_knn_keeps_only_nearest() {
        let config = SpectralConfig::default().with_affinity_cutoff(AffinityCutoff::Knn(1));
        let m = metric(0.4);
        let points = event();
        let mut state = SpectralState::build(&m, &config, &points).unwrap();
        let (old, dims) = (state.coords.clone(), state.dims);
        let merged = points[2].combine(&points[3], false);
        let after = vec![points[0], points[1], merged];
        state.merge_recompute(3, 2, &m, &config, &after);

        let d0 = pair_distance2(&m, &after[2], &after[0]);
        let d1 = pair_distance2(&m, &after[2], &after[1]);
        assert!(d1 < d0);
        let a1 = config.affinity_type.apply(d1);
        let row = [0.0, -a1, a1];
        for c in 0..dims {
            let expected = dot_rows(&old, dims, &row, c);
            assert!((state.coords[2 * dims + c] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_recompute_update_symmetric_laplacian() {
        let config = SpectralConfig::default().with_laplacian(LaplacianKind::Symmetric);
        let m = metric(0.8);
        let points = event();
        let mut state = SpectralState::build(&m, &config, &points).unwrap();
        let (old, dims) = (state.coords.clone(), state.dims);
        let scale = state.inv_sqrt_degree.clone();
        let merged = points[2].combine(&points[3], false);
        let after = vec![points[0], points[1], merged];
        state.merge_recompute(3, 2, &m, &config, &after);
        assert_eq!(state.matrix.len(), 3);

        let a: Vec<f64> = (0..2)
            .map(|k| config.affinity_type.apply(pair_distance2(&m, &after[2], &after[k])))
            .collect();
        let inv_new = (a[0] + a[1]).powf(-0.5);
        assert!((state.inv_sqrt_degree[2] - inv_new).abs() < 1e-12);
        let row = [-a[0] * scale[0] * inv_new, -a[1] * scale[1] * inv_new, 1.0];
        for c in 0..dims {
            let expected = dot_rows(&old, dims, &row, c);
            assert!((state.coords[2 * dims + c] - expected).abs() < 1e-12);
        }
        for k in 0..3 {
            assert!(state.matrix.get(2, k).is_finite());
        }
    }

    #[test]
    fn test_eigenspace_weights_embedding_distances() {
        let config =
            SpectralConfig::default().with_stopping_condition(StoppingCondition::BeamParticle);
        let m = DistanceMetric::new(Invariant::Angular, -1.0, ExponentPosition::Eigenspace, 0.8);
        let points = event();
        let mut state = SpectralState::build(&m, &config, &points).unwrap();
        assert!(state.weights[4].is_infinite());

        let raw = |state: &SpectralState, a: usize, b: usize| -> f64 {
            state
                .coord(a)
                .iter()
                .zip(state.coord(b))
                .map(|(x, y)| (x - y) * (x - y))
                .sum()
        };
        let factor = |pt: f64| pt.powi(-2);
        for i in 0..4 {
            for j in 0..i {
                let expected = raw(&state, i, j) * factor(points[i].pt).min(factor(points[j].pt));
                assert!((state.matrix.get(i, j) - expected).abs() < 1e-12);
            }
            let beam = state.matrix.get(i, 4);
            assert!(beam.is_finite());
            assert!((beam - raw(&state, i, 4) * factor(points[i].pt)).abs() < 1e-12);
        }

        let merged = points[0].combine(&points[1], false);
        let after = vec![merged, points[2], points[3]];
        state.merge_recompute(1, 0, &m, &config, &after);
        let slot = state.matrix.slot(0);
        assert!((state.weights[slot] - factor(merged.pt)).abs() < 1e-15);
        assert!(state.matrix.get(0, 3).is_finite());
    }
}
