//! The merge loop shared by both algorithm families.
//!
//! ```text
//! build tables ─┬─> argmin ─┬─ diagonal / beam pair ──> finalise root
//!               │           └─ off-diagonal ──────────> merge, update row
//!               └──────────── repeat until no node is active
//! ```
//!
//! Nodes live in an arena (`Vec<Node>`) indexed by id. `active` holds the
//! ids of unresolved nodes in matrix order; a merge keeps the lower matrix
//! index for the new node and removes the higher one.
//!
//! ```rust
//! use jetree::cluster::ClusteringEngine;
//! use jetree::config::JetConfig;
//! use jetree::kinematics::Kinematics;
//!
//! let inputs = vec![
//!     Kinematics::from_collider(10.0, 0.0, 0.0, 10.0),
//!     Kinematics::from_collider(8.0, 0.05, 0.05, 8.01),
//!     Kinematics::from_collider(1.0, 5.0, 3.0, 74.2),
//! ];
//! let mut engine = ClusteringEngine::new(JetConfig::sequential(0.4, 0.0), &inputs)?;
//! engine.run()?;
//! let jets = engine.split()?;
//! assert_eq!(jets.len(), 2);
//! # Ok::<(), jetree::Error>(())
//! ```

use core::mem;

use super::matrix::DistanceMatrix;
use super::node::Node;
use super::spectral::{Degeneracy, SpectralState};
use crate::config::{Algorithm, JetConfig, SpectralConfig, UpdatePolicy};
use crate::error::{Error, Result};
use crate::hierarchy::merge_tree::{split_roots, MergeTree};
use crate::kinematics::Kinematics;
use crate::metric::{pair_distance2, DistanceMetric};

/// What one call to [`ClusteringEngine::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Two active nodes were joined into `parent`.
    Merged {
        /// Id of the new node.
        parent: usize,
        /// Ids of the joined nodes, lower matrix index first.
        children: (usize, usize),
    },
    /// An active node became a root.
    Finalized(usize),
    /// The embedding failed; every remaining node became a root.
    Degenerate(Degeneracy),
    /// Nothing left to do.
    Finished,
}

#[derive(Debug, Clone)]
enum Tables {
    Sequential(DistanceMatrix),
    Spectral(SpectralState),
    Exhausted,
}

/// Clusters one event.
#[derive(Debug, Clone)]
pub struct ClusteringEngine {
    config: JetConfig,
    metric: DistanceMetric,
    nodes: Vec<Node>,
    active: Vec<usize>,
    roots: Vec<usize>,
    tables: Tables,
    degeneracy: Option<Degeneracy>,
    eigenvalues: Vec<Vec<f64>>,
}

impl ClusteringEngine {
    /// Create the leaves and build the initial tables.
    ///
    /// An empty input is accepted and is immediately finished. A spectral
    /// build that degenerates resolves every input to a root here.
    pub fn new(config: JetConfig, inputs: &[Kinematics]) -> Result<Self> {
        config.validate()?;
        let metric = DistanceMetric::from_config(&config);
        let nodes: Vec<Node> = inputs
            .iter()
            .enumerate()
            .map(|(id, k)| Node::leaf(id, *k))
            .collect();
        let mut engine = Self {
            config,
            metric,
            active: (0..nodes.len()).collect(),
            nodes,
            roots: Vec::new(),
            tables: Tables::Exhausted,
            degeneracy: None,
            eigenvalues: Vec::new(),
        };
        tracing::debug!(
            n_inputs = inputs.len(),
            algorithm = ?engine.config.algorithm,
            delta_r = engine.config.delta_r,
            "building clustering tables"
        );
        if engine.active.is_empty() {
            return Ok(engine);
        }
        match engine.config.algorithm {
            Algorithm::Sequential => {
                engine.tables = Tables::Sequential(engine.sequential_matrix());
            }
            Algorithm::Spectral(spectral) => {
                let _ = engine.rebuild_spectral(&spectral);
            }
        }
        Ok(engine)
    }

    /// Configuration this engine runs with.
    pub fn config(&self) -> &JetConfig {
        &self.config
    }

    /// Every node created so far, indexed by id.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Ids of finalised roots, in finalisation order.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    /// Number of unresolved nodes.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// True once every node is resolved.
    pub fn is_finished(&self) -> bool {
        self.active.is_empty()
    }

    /// Why the event degenerated, if it did.
    pub fn degeneracy(&self) -> Option<&Degeneracy> {
        self.degeneracy.as_ref()
    }

    /// Kept eigenvalues of every spectral build, in build order.
    pub fn eigenvalues(&self) -> &[Vec<f64>] {
        &self.eigenvalues
    }

    /// Run the merge loop to completion.
    pub fn run(&mut self) -> Result<()> {
        while !self.is_finished() {
            let _ = self.step()?;
        }
        Ok(())
    }

    /// Partition the finished node set into merge trees, roots in ascending id order.
    pub fn split(&self) -> Result<Vec<MergeTree>> {
        if !self.is_finished() {
            return Err(Error::InvariantViolation(format!(
                "split requested with {} active nodes",
                self.active.len()
            )));
        }
        split_roots(&self.nodes)
    }

    /// Perform one finalisation or merge.
    pub fn step(&mut self) -> Result<Step> {
        if self.is_finished() {
            return Ok(Step::Finished);
        }
        match mem::replace(&mut self.tables, Tables::Exhausted) {
            Tables::Sequential(mut matrix) => {
                let step = self.sequential_step(&mut matrix)?;
                self.tables = Tables::Sequential(matrix);
                Ok(step)
            }
            Tables::Spectral(mut state) => {
                let spectral = match self.config.algorithm {
                    Algorithm::Spectral(s) => s,
                    Algorithm::Sequential => {
                        return Err(Error::InvariantViolation(
                            "spectral tables under a sequential configuration".to_string(),
                        ))
                    }
                };
                let step = self.spectral_step(&mut state, &spectral)?;
                if matches!(self.tables, Tables::Exhausted) && !matches!(step, Step::Degenerate(_)) {
                    self.tables = Tables::Spectral(state);
                }
                Ok(step)
            }
            Tables::Exhausted => Err(Error::InvariantViolation(format!(
                "no distance matrix while {} nodes are active",
                self.active.len()
            ))),
        }
    }

    fn sequential_beam(&self, k: &Kinematics) -> f64 {
        if k.pt == 0.0 {
            0.0
        } else {
            self.metric.beam_distance2(k)
        }
    }

    fn sequential_matrix(&self) -> DistanceMatrix {
        DistanceMatrix::from_lower(self.active.len(), |i, j| {
            let a = &self.nodes[self.active[i]].kinematics;
            if i == j {
                self.sequential_beam(a)
            } else {
                pair_distance2(&self.metric, a, &self.nodes[self.active[j]].kinematics)
            }
        })
    }

    fn sequential_step(&mut self, matrix: &mut DistanceMatrix) -> Result<Step> {
        self.check_alignment(matrix.len(), 0)?;
        let min = matrix.argmin(true).ok_or_else(|| self.no_minimum())?;
        if min.is_diagonal() {
            let root = self.finalize(min.row);
            matrix.remove(min.row);
            return Ok(Step::Finalized(root));
        }
        let (parent, children) = self.merge(min.row, min.col, min.value);
        matrix.remove(min.row);
        let merged = self.nodes[parent].kinematics;
        for k in 0..matrix.len() {
            let value = if k == min.col {
                self.sequential_beam(&merged)
            } else {
                pair_distance2(&self.metric, &merged, &self.nodes[self.active[k]].kinematics)
            };
            matrix.set(min.col, k, value);
        }
        Ok(Step::Merged { parent, children })
    }

    fn spectral_step(&mut self, state: &mut SpectralState, spectral: &SpectralConfig) -> Result<Step> {
        self.check_alignment(state.matrix.len(), usize::from(state.has_beam()))?;
        let min = state
            .matrix
            .argmin(!state.has_beam())
            .ok_or_else(|| self.no_minimum())?;
        if state.beam_index() == Some(min.row) {
            let root = self.finalize(min.col);
            state.remove(min.col);
            return Ok(Step::Finalized(root));
        }
        if min.is_diagonal() {
            let root = self.finalize(min.row);
            state.remove(min.row);
            return Ok(Step::Finalized(root));
        }

        let (parent, children) = self.merge(min.row, min.col, min.value);
        match spectral.update_policy {
            UpdatePolicy::Mean => {
                let merged = self.nodes[parent].kinematics;
                state.merge_mean(min.row, min.col, &self.metric, &merged);
            }
            UpdatePolicy::RowRecompute => {
                let points = self.active_kinematics();
                state.merge_recompute(min.row, min.col, &self.metric, spectral, &points);
            }
            UpdatePolicy::FullRebuild => {
                if let Some(degeneracy) = self.rebuild_spectral(spectral) {
                    return Ok(Step::Degenerate(degeneracy));
                }
                // the fresh tables are already installed
                return Ok(Step::Merged { parent, children });
            }
        }
        Ok(Step::Merged { parent, children })
    }

    /// Build spectral tables over the active set, resolving a degenerate event on failure.
    fn rebuild_spectral(&mut self, spectral: &SpectralConfig) -> Option<Degeneracy> {
        let points = self.active_kinematics();
        match SpectralState::build(&self.metric, spectral, &points) {
            Ok(state) => {
                self.eigenvalues.push(state.eigenvalues().to_vec());
                self.tables = Tables::Spectral(state);
                None
            }
            Err(degeneracy) => {
                self.resolve_degenerate(spectral, degeneracy.clone());
                Some(degeneracy)
            }
        }
    }

    fn resolve_degenerate(&mut self, spectral: &SpectralConfig, degeneracy: Degeneracy) {
        tracing::warn!(
            reason = %degeneracy,
            n_active = self.active.len(),
            delta_r = self.config.delta_r,
            exponent_multiplier = self.config.exponent_multiplier,
            exponent_position = %self.config.exponent_position,
            invariant = %self.config.invariant,
            affinity_type = %spectral.affinity_type,
            affinity_cutoff = %spectral.affinity_cutoff,
            laplacian = %spectral.laplacian,
            stopping_condition = %spectral.stopping_condition,
            num_eigenvectors = %spectral.num_eigenvectors,
            "degenerate event, every active node becomes a root"
        );
        let remaining = mem::take(&mut self.active);
        self.roots.extend(remaining);
        self.tables = Tables::Exhausted;
        self.degeneracy = Some(degeneracy);
    }

    fn active_kinematics(&self) -> Vec<Kinematics> {
        self.active
            .iter()
            .map(|&id| self.nodes[id].kinematics)
            .collect()
    }

    fn check_alignment(&self, matrix_len: usize, extra: usize) -> Result<()> {
        if matrix_len != self.active.len() + extra {
            return Err(Error::InvariantViolation(format!(
                "matrix has {matrix_len} rows for {} active nodes",
                self.active.len()
            )));
        }
        Ok(())
    }

    fn no_minimum(&self) -> Error {
        Error::InvariantViolation(format!(
            "no selectable matrix entry while {} nodes are active",
            self.active.len()
        ))
    }

    fn finalize(&mut self, index: usize) -> usize {
        let id = self.active.remove(index);
        self.roots.push(id);
        tracing::trace!(id, "finalised root");
        id
    }

    /// Join active `row` and `col` (`row > col`); the new node takes position `col`.
    fn merge(&mut self, row: usize, col: usize, distance2: f64) -> (usize, (usize, usize)) {
        let id = self.nodes.len();
        let (a, b) = (self.active[col], self.active[row]);
        let node = Node::merged(
            id,
            &self.nodes[a],
            &self.nodes[b],
            distance2,
            self.config.from_pseudorapidity,
        );
        self.nodes[a].parent = Some(id);
        self.nodes[b].parent = Some(id);
        self.nodes.push(node);
        self.active[col] = id;
        let _ = self.active.remove(row);
        tracing::trace!(id, child1 = a, child2 = b, distance2, "merged");
        (id, (a, b))
    }
}

/// Cluster one event and split the result into merge trees.
pub fn cluster(config: JetConfig, inputs: &[Kinematics]) -> Result<Vec<MergeTree>> {
    let mut engine = ClusteringEngine::new(config, inputs)?;
    engine.run()?;
    engine.split()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AffinityCutoff, LaplacianKind, StoppingCondition};

    fn particle(pt: f64, rapidity: f64, phi: f64) -> Kinematics {
        Kinematics::from_collider(pt, rapidity, phi, pt * rapidity.cosh())
    }

    fn three_particles() -> Vec<Kinematics> {
        vec![
            particle(10.0, 0.0, 0.0),
            particle(8.0, 0.05, 0.05),
            particle(1.0, 5.0, 3.0),
        ]
    }

    fn spread_event() -> Vec<Kinematics> {
        vec![
            particle(20.0, 0.0, 0.0),
            particle(6.0, 0.1, -0.1),
            particle(3.0, -0.2, 0.15),
            particle(15.0, 1.5, 2.5),
            particle(2.0, 1.4, 2.6),
            particle(1.0, -1.8, -2.0),
        ]
    }

    fn assert_complete(engine: &ClusteringEngine, n_inputs: usize) {
        assert_eq!(engine.active_count(), 0);
        let trees = engine.split().unwrap();
        let mut leaves: Vec<usize> = trees.iter().flat_map(|t| t.leaf_ids()).collect();
        leaves.sort_unstable();
        assert_eq!(leaves, (0..n_inputs).collect::<Vec<_>>());
    }

    #[test]
    fn test_cambridge_aachen_scenario() {
        let mut engine =
            ClusteringEngine::new(JetConfig::sequential(0.4, 0.0), &three_particles()).unwrap();
        assert_eq!(
            engine.step().unwrap(),
            Step::Merged {
                parent: 3,
                children: (0, 1)
            }
        );
        engine.run().unwrap();
        assert_eq!(engine.roots().len(), 2);
        assert!(engine.roots().contains(&2));
        assert!(engine.roots().contains(&3));
        let merged = &engine.nodes()[3];
        assert_eq!(merged.rank, 1);
        assert!((merged.join_distance - 0.005f64.sqrt()).abs() < 1e-9);
        assert_complete(&engine, 3);
    }

    #[test]
    fn test_first_child_holds_the_lower_active_index() {
        let inputs = vec![
            particle(10.0, 0.0, 0.0),
            particle(5.0, 0.5, 0.0),
            particle(8.0, 0.05, 0.0),
        ];
        let mut engine = ClusteringEngine::new(JetConfig::sequential(1.0, 0.0), &inputs).unwrap();
        assert_eq!(
            engine.step().unwrap(),
            Step::Merged {
                parent: 3,
                children: (0, 2)
            }
        );
        // node 3 took over position 0, so it comes first despite its larger id
        assert_eq!(
            engine.step().unwrap(),
            Step::Merged {
                parent: 4,
                children: (3, 1)
            }
        );
        assert_eq!(engine.nodes()[4].children, Some((3, 1)));
    }

    #[test]
    fn test_single_input_is_one_root() {
        let input = vec![particle(5.0, 0.3, 1.0)];
        for config in [
            JetConfig::sequential(0.4, -1.0),
            JetConfig::spectral(0.4, SpectralConfig::default()),
            JetConfig::spectral(
                0.4,
                SpectralConfig::default().with_stopping_condition(StoppingCondition::BeamParticle),
            ),
        ] {
            let mut engine = ClusteringEngine::new(config, &input).unwrap();
            engine.run().unwrap();
            assert_eq!(engine.roots(), &[0]);
            assert_eq!(engine.nodes().len(), 1);
            assert_eq!(engine.nodes()[0].kinematics, input[0]);
        }
    }

    #[test]
    fn test_empty_input_is_finished() {
        let mut engine = ClusteringEngine::new(JetConfig::default(), &[]).unwrap();
        assert!(engine.is_finished());
        assert_eq!(engine.step().unwrap(), Step::Finished);
        assert!(engine.split().unwrap().is_empty());
    }

    #[test]
    fn test_zero_affinity_spectral_event() {
        let config = JetConfig::spectral(
            0.4,
            SpectralConfig::default().with_affinity_cutoff(AffinityCutoff::Distance(1e-9)),
        );
        let engine = ClusteringEngine::new(config, &spread_event()).unwrap();
        assert!(engine.is_finished());
        assert_eq!(engine.degeneracy(), Some(&Degeneracy::ZeroAffinity));
        assert_eq!(engine.roots().len(), 6);
        assert_eq!(engine.nodes().len(), 6);
        assert!(engine.eigenvalues().is_empty());
    }

    #[test]
    fn test_radius_limits() {
        let mut wide = ClusteringEngine::new(JetConfig::sequential(1e3, 0.0), &spread_event()).unwrap();
        wide.run().unwrap();
        assert_eq!(wide.roots().len(), 1);
        assert_complete(&wide, 6);

        let mut narrow =
            ClusteringEngine::new(JetConfig::sequential(1e-6, 0.0), &spread_event()).unwrap();
        narrow.run().unwrap();
        assert_eq!(narrow.roots().len(), 6);
        assert_eq!(narrow.nodes().len(), 6);
    }

    #[test]
    fn test_zero_pt_input_merges_first() {
        let inputs = vec![particle(10.0, 0.0, 0.0), particle(0.0, 2.0, 2.0)];
        let mut engine = ClusteringEngine::new(JetConfig::sequential(0.4, -1.0), &inputs).unwrap();
        assert!(matches!(engine.step().unwrap(), Step::Merged { parent: 2, .. }));
        assert_eq!(engine.nodes()[2].join_distance, 0.0);
        engine.run().unwrap();
        assert_eq!(engine.roots(), &[2]);
    }

    #[test]
    fn test_antikt_grows_around_hard_particle() {
        let inputs = vec![
            particle(1.0, 0.25, 0.0),
            particle(50.0, 0.0, 0.0),
            particle(1.0, 0.0, 0.3),
        ];
        let mut engine = ClusteringEngine::new(JetConfig::sequential(0.4, -1.0), &inputs).unwrap();
        engine.run().unwrap();
        let trees = engine.split().unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].root().rank, 2);
    }

    #[test]
    fn test_spectral_policies_complete() {
        for policy in [
            UpdatePolicy::Mean,
            UpdatePolicy::RowRecompute,
            UpdatePolicy::FullRebuild,
        ] {
            for stopping in [StoppingCondition::Standard, StoppingCondition::BeamParticle] {
                for laplacian in [LaplacianKind::Unnormalized, LaplacianKind::Symmetric] {
                    let config = JetConfig::spectral(
                        0.8,
                        SpectralConfig::default()
                            .with_update_policy(policy)
                            .with_stopping_condition(stopping)
                            .with_laplacian(laplacian),
                    );
                    let mut engine = ClusteringEngine::new(config, &spread_event()).unwrap();
                    engine.run().unwrap();
                    assert_complete(&engine, 6);
                    assert!(!engine.eigenvalues().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_full_rebuild_records_every_build() {
        let config = JetConfig::spectral(
            10.0,
            SpectralConfig::default().with_update_policy(UpdatePolicy::FullRebuild),
        );
        let mut engine = ClusteringEngine::new(config, &spread_event()).unwrap();
        engine.run().unwrap();
        let merges = engine.nodes().len() - 6;
        assert_eq!(engine.eigenvalues().len(), merges + 1);
    }

    #[test]
    fn test_split_requires_finished_engine() {
        let engine =
            ClusteringEngine::new(JetConfig::sequential(0.4, 0.0), &three_particles()).unwrap();
        assert!(matches!(engine.split(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let err = ClusteringEngine::new(JetConfig::sequential(-1.0, 0.0), &three_particles());
        assert!(matches!(err, Err(Error::InvalidParameter { .. })));
    }
}
