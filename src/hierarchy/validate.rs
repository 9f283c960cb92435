//! Structural validation for merge-tree node sets.
//!
//! Checks the invariants a finished clustering must satisfy:
//! - ids are unique
//! - a node has no children or two distinct children
//! - parent and child links are reciprocal
//! - rank is 0 for leaves and `max(child ranks) + 1` otherwise
//! - every node is reachable from exactly one root, with no cycles
//!
//! # Example
//!
//! ```rust
//! use jetree::cluster::cluster;
//! use jetree::config::JetConfig;
//! use jetree::hierarchy::HealthCheck;
//! use jetree::kinematics::Kinematics;
//!
//! let inputs = vec![
//!     Kinematics::from_collider(5.0, 0.0, 0.0, 5.0),
//!     Kinematics::from_collider(4.0, 0.1, 0.1, 4.02),
//! ];
//! for tree in cluster(JetConfig::sequential(0.4, 1.0), &inputs)? {
//!     let report = tree.health_check();
//!     assert!(report.is_healthy(), "{report}");
//! }
//! # Ok::<(), jetree::Error>(())
//! ```

use std::collections::{HashMap, HashSet};

use crate::cluster::Node;

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational, not a problem.
    Info,
    /// Something unusual but not necessarily wrong.
    Warning,
    /// A problem that should be fixed.
    Error,
    /// A critical issue that may cause failures.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Node id involved, if any.
    pub node_id: Option<usize>,
    /// Additional context.
    pub context: Option<String>,
}

impl ValidationIssue {
    /// Create a new validation issue.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            node_id: None,
            context: None,
        }
    }

    /// Attach the node id.
    pub fn with_node(mut self, id: usize) -> Self {
        self.node_id = Some(id);
        self
    }

    /// Attach context.
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if let Some(id) = self.node_id {
            write!(f, " (node {})", id)?;
        }
        if let Some(ctx) = &self.context {
            write!(f, " - {}", ctx)?;
        }
        Ok(())
    }
}

/// Issues found by a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// All issues found.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Add an issue.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Add a warning-level issue.
    pub fn warn(&mut self, message: impl Into<String>) {
        self.add(ValidationIssue::new(Severity::Warning, message));
    }

    /// Add a critical-level issue.
    pub fn critical(&mut self, message: impl Into<String>) {
        self.add(ValidationIssue::new(Severity::Critical, message));
    }

    fn node_error(&mut self, id: usize, message: &str, context: Option<String>) {
        let mut issue = ValidationIssue::new(Severity::Error, message).with_node(id);
        issue.context = context;
        self.add(issue);
    }

    /// True when there are no errors or critical issues.
    pub fn is_healthy(&self) -> bool {
        !self.issues.iter().any(|i| i.severity >= Severity::Error)
    }

    /// True when there are no issues at all.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues at `min_severity` or above.
    pub fn issues_at_level(&self, min_severity: Severity) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity >= min_severity)
            .collect()
    }

    /// Count issues by severity.
    pub fn counts(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for issue in &self.issues {
            *counts.entry(issue.severity).or_default() += 1;
        }
        counts
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_clean() {
            return write!(f, "Validation passed: no issues found");
        }

        let counts = self.counts();
        write!(f, "Validation report: ")?;

        let parts: Vec<String> = [
            (Severity::Critical, "critical"),
            (Severity::Error, "errors"),
            (Severity::Warning, "warnings"),
            (Severity::Info, "info"),
        ]
        .iter()
        .filter_map(|(sev, name)| counts.get(sev).map(|c| format!("{} {}", c, name)))
        .collect();

        writeln!(f, "{}", parts.join(", "))?;

        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }

        Ok(())
    }
}

/// Validation plus shape statistics.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Validation issues.
    pub validation: ValidationReport,
    /// Total number of nodes.
    pub node_count: usize,
    /// Number of leaves.
    pub leaf_count: usize,
    /// Number of roots.
    pub root_count: usize,
    /// Largest rank present.
    pub max_rank: usize,
}

impl HealthReport {
    /// No errors or critical issues.
    pub fn is_healthy(&self) -> bool {
        self.validation.is_healthy()
    }
}

impl std::fmt::Display for HealthReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Merge Tree Health Report")?;
        writeln!(f, "========================")?;
        writeln!(f, "Nodes: {} ({} leaves)", self.node_count, self.leaf_count)?;
        writeln!(f, "Roots: {}", self.root_count)?;
        writeln!(f, "Max rank: {}", self.max_rank)?;
        writeln!(f)?;
        write!(f, "{}", self.validation)
    }
}

/// Types whose node sets can be health-checked.
pub trait HealthCheck {
    /// Run the checks.
    fn health_check(&self) -> HealthReport;

    /// Quick check: returns true if healthy.
    fn is_healthy(&self) -> bool {
        self.health_check().is_healthy()
    }
}

/// Build a health report for an arbitrary node set.
pub fn health_report(nodes: &[Node]) -> HealthReport {
    let validation = validate_nodes(nodes);
    HealthReport {
        validation,
        node_count: nodes.len(),
        leaf_count: nodes.iter().filter(|n| n.is_leaf()).count(),
        root_count: nodes
            .iter()
            .filter(|n| is_root(n, |id| nodes.iter().any(|m| m.id == id)))
            .count(),
        max_rank: nodes.iter().map(|n| n.rank).max().unwrap_or(0),
    }
}

/// A node is a root when it has no parent, its parent is unknown, or it is its own parent.
pub(crate) fn is_root(node: &Node, exists: impl Fn(usize) -> bool) -> bool {
    match node.parent {
        None => true,
        Some(p) => p == node.id || !exists(p),
    }
}

/// Check parent/child reciprocity, child arity, ranks, reachability and cycles.
pub fn validate_nodes(nodes: &[Node]) -> ValidationReport {
    let mut report = ValidationReport::new();

    let mut by_id: HashMap<usize, &Node> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.id, node).is_some() {
            report.add(ValidationIssue::new(Severity::Critical, "duplicate node id").with_node(node.id));
        }
    }

    for node in nodes {
        if let Some((a, b)) = node.children {
            if a == b {
                report.node_error(node.id, "child1 and child2 are the same", None);
            }
            let mut child_ranks = Vec::with_capacity(2);
            for child_id in [a, b] {
                match by_id.get(&child_id) {
                    None => report.node_error(
                        node.id,
                        "child id does not exist",
                        Some(format!("missing child id {child_id}")),
                    ),
                    Some(child) => {
                        child_ranks.push(child.rank);
                        if child.parent != Some(node.id) {
                            report.node_error(
                                node.id,
                                "child doesn't acknowledge parent",
                                Some(format!("child {child_id} has parent {:?}", child.parent)),
                            );
                        }
                    }
                }
            }
            if child_ranks.len() == 2 {
                let expected = child_ranks.iter().copied().max().unwrap_or(0) + 1;
                if node.rank != expected {
                    report.node_error(
                        node.id,
                        "rank is not max(child ranks) + 1",
                        Some(format!("rank {}, expected {expected}", node.rank)),
                    );
                }
            }
        } else if node.rank != 0 {
            report.node_error(node.id, "leaf with non-zero rank", Some(format!("rank {}", node.rank)));
        }

        if let Some(parent_id) = node.parent {
            if parent_id == node.id {
                report.node_error(node.id, "node is its own parent", None);
            } else if let Some(parent) = by_id.get(&parent_id) {
                let acknowledged = parent
                    .children
                    .map_or(false, |(a, b)| a == node.id || b == node.id);
                if !acknowledged {
                    report.node_error(
                        node.id,
                        "parent doesn't acknowledge child",
                        Some(format!("parent: {parent_id}")),
                    );
                }
            }
        }
    }

    let roots: Vec<usize> = nodes
        .iter()
        .filter(|n| is_root(n, |id| by_id.contains_key(&id)))
        .map(|n| n.id)
        .collect();
    if roots.is_empty() && !nodes.is_empty() {
        report.critical("No root node found - tree has cycles");
    }

    let children_of = |id: usize| -> Vec<usize> {
        by_id
            .get(&id)
            .and_then(|n| n.children)
            .map(|(a, b)| vec![a, b])
            .unwrap_or_default()
    };

    let mut reachable = HashSet::new();
    let mut stack = roots.clone();
    while let Some(id) = stack.pop() {
        if reachable.insert(id) {
            stack.extend(children_of(id).into_iter().filter(|c| by_id.contains_key(c)));
        }
    }
    let mut orphans: Vec<usize> = by_id
        .keys()
        .filter(|id| !reachable.contains(*id))
        .copied()
        .collect();
    if !orphans.is_empty() {
        orphans.sort_unstable();
        report.add(
            ValidationIssue::new(
                Severity::Error,
                format!("{} orphaned nodes not reachable from a root", orphans.len()),
            )
            .with_context(format!("first few: {:?}", &orphans[..orphans.len().min(5)])),
        );
    }

    fn detect_cycle(
        node: usize,
        children_of: &dyn Fn(usize) -> Vec<usize>,
        visited: &mut HashSet<usize>,
        in_stack: &mut HashSet<usize>,
    ) -> bool {
        if in_stack.contains(&node) {
            return true;
        }
        if visited.contains(&node) {
            return false;
        }

        let _ = visited.insert(node);
        let _ = in_stack.insert(node);

        for child in children_of(node) {
            if detect_cycle(child, children_of, visited, in_stack) {
                return true;
            }
        }

        let _ = in_stack.remove(&node);
        false
    }

    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();
    for &root in &roots {
        if detect_cycle(root, &children_of, &mut visited, &mut in_stack) {
            report.critical("Cycle detected in tree structure");
            break;
        }
    }

    report
}

#[cfg(test)]
#[allow(clippy::unwrap_used, unused_results)]
mod tests {
    use super::*;
    use crate::cluster::cluster;
    use crate::config::JetConfig;
    use crate::kinematics::Kinematics;
    use proptest::prelude::*;

    fn leaf(id: usize) -> Node {
        Node::leaf(id, Kinematics::from_momentum(1.0, 0.0, 0.0, 1.0))
    }

    fn pair() -> Vec<Node> {
        let mut a = leaf(0);
        let mut b = leaf(1);
        let parent = Node::merged(2, &a, &b, 0.1, false);
        a.parent = Some(2);
        b.parent = Some(2);
        vec![a, b, parent]
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_validation_issue_display() {
        let issue = ValidationIssue::new(Severity::Error, "Something wrong")
            .with_node(42)
            .with_context("additional info");

        let s = format!("{}", issue);
        assert!(s.contains("ERROR"));
        assert!(s.contains("Something wrong"));
        assert!(s.contains("42"));
        assert!(s.contains("additional info"));
    }

    #[test]
    fn test_valid_pair() {
        let report = validate_nodes(&pair());
        assert!(report.is_clean(), "{report}");
    }

    #[test]
    fn test_unacknowledged_child() {
        let mut nodes = pair();
        nodes[1].parent = None;
        let report = validate_nodes(&nodes);
        assert!(!report.is_healthy());
        assert!(report
            .issues
            .iter()
            .any(|i| i.message.contains("doesn't acknowledge parent")));
    }

    #[test]
    fn test_same_children_and_bad_rank() {
        let mut nodes = pair();
        nodes[2].children = Some((0, 0));
        nodes[2].rank = 4;
        let report = validate_nodes(&nodes);
        assert!(report.issues.iter().any(|i| i.message.contains("same")));
        assert!(report.issues.iter().any(|i| i.message.contains("rank")));
    }

    #[test]
    fn test_cycle_is_orphaned() {
        let mut a = leaf(0);
        let mut b = leaf(1);
        a.children = Some((1, 1));
        a.rank = 1;
        a.parent = Some(1);
        b.children = Some((0, 0));
        b.rank = 1;
        b.parent = Some(0);
        let report = validate_nodes(&[a, b]);
        assert!(!report.is_healthy());
        assert!(report
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical));
    }

    #[test]
    fn test_duplicate_ids_are_critical() {
        let report = validate_nodes(&[leaf(0), leaf(0)]);
        assert_eq!(report.issues_at_level(Severity::Critical).len(), 1);
    }

    #[test]
    fn test_health_report_counts() {
        let report = health_report(&pair());
        assert_eq!(report.node_count, 3);
        assert_eq!(report.leaf_count, 2);
        assert_eq!(report.root_count, 1);
        assert_eq!(report.max_rank, 1);
        assert!(report.is_healthy());
    }

    proptest! {
        #[test]
        fn clustered_trees_are_healthy(
            particles in proptest::collection::vec(
                (0.5f64..50.0, -2.5f64..2.5, -3.1f64..3.1),
                1..20,
            ),
            p in -1i32..=1,
        ) {
            let inputs: Vec<Kinematics> = particles
                .iter()
                .map(|&(pt, y, phi)| Kinematics::from_collider(pt, y, phi, pt * y.cosh()))
                .collect();
            let trees = cluster(JetConfig::sequential(0.5, f64::from(p)), &inputs).unwrap();
            for tree in &trees {
                let report = tree.health_check();
                prop_assert!(report.is_healthy(), "{}", report);
            }
        }
    }
}
