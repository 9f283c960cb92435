//! # jetree
//!
//! Jet clustering into merge trees: sequential recombination (generalised-kt)
//! and spectral embedding variants share one engine, and every finished event
//! is a forest whose roots are the jets.
//!
//! ```rust
//! use jetree::{cluster, JetConfig, Kinematics};
//!
//! let inputs = [
//!     Kinematics::from_collider(10.0, 0.0, 0.0, 10.0),
//!     Kinematics::from_collider(8.0, 0.05, 0.05, 8.0 * 0.05f64.cosh()),
//!     Kinematics::from_collider(1.0, 5.0, 3.0, 5.0f64.cosh()),
//! ];
//! let jets = cluster(JetConfig::sequential(0.4, 0.0), &inputs)?;
//! assert_eq!(jets.len(), 2);
//! # Ok::<(), jetree::Error>(())
//! ```
//!
//! **Default build** is single threaded. The `parallel` feature spreads
//! [`batch::cluster_events`] over rayon's pool.

#![warn(missing_docs)]

pub mod batch;
pub mod cluster;
pub mod compare;
pub mod config;
/// Error types used across `jetree`.
pub mod error;
pub mod external;
pub mod hierarchy;
pub mod hyperparams;
pub mod input;
pub mod kinematics;
pub mod metric;

pub use batch::{cluster_events, BatchOutput, BatchSummary, EventJets};
pub use cluster::{cluster, ClusteringEngine, Degeneracy, Node, Step};
pub use compare::{ari, rand_score};
pub use config::{Algorithm, JetConfig, SpectralConfig, UpdatePolicy};
pub use error::{Error, Result};
pub use external::{ExternalAlgorithm, ExternalEngine};
pub use hierarchy::{split_roots, JetColumns, MergeTree};
pub use hyperparams::HyperparameterRegistry;
pub use input::{InputSelector, ParticleRecord};
pub use kinematics::Kinematics;
pub use metric::DistanceMetric;
