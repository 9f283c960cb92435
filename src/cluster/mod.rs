//! Sequential recombination and spectral clustering of one event.
//!
//! Both algorithm families share one engine and one merge loop; they differ
//! only in how the distance matrix is filled and refreshed.
//!
//! ## Sequential recombination
//!
//! Generalised-kt: the matrix holds pairwise metric distances with the beam
//! distance on the diagonal.
//!
//! ```text
//! d_ij = min(pT_i^2p, pT_j^2p) ΔR_ij²        d_iB = pT_i^2p R²
//! ```
//!
//! | p  | Algorithm |
//! |----|-----------|
//! | -1 | anti-kt |
//! | 0  | Cambridge-Aachen |
//! | 1  | kt |
//!
//! ## Spectral embedding
//!
//! Particles become vertices of an affinity graph; distances are measured
//! between rows of the Laplacian's non-trivial eigenvectors. After a merge
//! the embedding is refreshed by one of three [`UpdatePolicy`] choices.
//!
//! | Policy | Cost per merge | Effect |
//! |--------|----------------|--------|
//! | Mean | O(n k) | Merged point at the midpoint |
//! | RowRecompute | O(n k) | New Laplacian row projected onto the basis |
//! | FullRebuild | O(n³) | Fresh eigendecomposition |
//!
//! [`UpdatePolicy`]: crate::config::UpdatePolicy

mod engine;
mod matrix;
mod node;
mod spectral;

pub use engine::{cluster, ClusteringEngine, Step};
pub use matrix::{DistanceMatrix, MatrixMin};
pub use node::{FloatField, IntField, Node};
pub use spectral::Degeneracy;
