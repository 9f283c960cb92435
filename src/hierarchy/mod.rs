//! Finished merge trees.
//!
//! Once an engine has no active nodes, its node arena is a forest: every
//! root seeds one jet.
//!
//! ```text
//!            7 (rank 2)
//!           / \
//!   (rank 1) 5  \          6 (rank 1)
//!         / \    \        / \
//!        0   1    2      3   4   (leaves, rank 0)
//! ```
//!
//! [`split_roots`] cuts the forest into [`MergeTree`]s, and
//! [`validate_nodes`] checks the structural invariants (reciprocal links,
//! two children or none, consistent ranks, single reachability).

pub mod merge_tree;
pub mod validate;

pub use merge_tree::{split_roots, Column, JetColumns, MergeTree};
pub use validate::{
    health_report, validate_nodes, HealthCheck, HealthReport, Severity, ValidationIssue,
    ValidationReport,
};
