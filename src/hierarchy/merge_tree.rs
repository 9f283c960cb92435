//! Merge trees: one finished jet per root.
//!
//! [`split_roots`] partitions a finished node set by root. Each
//! [`MergeTree`] stores its nodes in depth-first pre-order (root, first
//! child's subtree, second child's subtree) while keeping the global ids,
//! so its local position is simply the index into [`MergeTree::nodes`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::validate::{health_report, is_root, HealthCheck, HealthReport};
use crate::cluster::{FloatField, IntField, Node};
use crate::config::{Algorithm, JetConfig};
use crate::error::{Error, Result};
use crate::metric::{pair_distance2, DistanceMetric};

/// All nodes reachable from one root.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeTree {
    nodes: Vec<Node>,
    index: HashMap<usize, usize>,
}

/// Split a node set into one tree per root, roots in ascending id order.
///
/// Roots are nodes with no parent, a parent outside the set, or themselves
/// as parent. Duplicate ids, dangling child links, nodes reached twice, and
/// nodes reached from no root are all invariant violations.
pub fn split_roots(nodes: &[Node]) -> Result<Vec<MergeTree>> {
    let mut by_id: HashMap<usize, usize> = HashMap::with_capacity(nodes.len());
    for (pos, node) in nodes.iter().enumerate() {
        if by_id.insert(node.id, pos).is_some() {
            return Err(Error::InvariantViolation(format!(
                "duplicate node id {}",
                node.id
            )));
        }
    }

    let mut roots: Vec<usize> = nodes
        .iter()
        .filter(|n| is_root(n, |id| by_id.contains_key(&id)))
        .map(|n| n.id)
        .collect();
    roots.sort_unstable();

    let mut seen = vec![false; nodes.len()];
    let mut trees = Vec::with_capacity(roots.len());
    for root in roots {
        let mut members = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let pos = *by_id.get(&id).ok_or_else(|| {
                Error::InvariantViolation(format!("child id {id} does not exist"))
            })?;
            if seen[pos] {
                return Err(Error::InvariantViolation(format!(
                    "node {id} is reachable more than once"
                )));
            }
            seen[pos] = true;
            let node = nodes[pos];
            if let Some((a, b)) = node.children {
                stack.push(b);
                stack.push(a);
            }
            members.push(node);
        }
        trees.push(MergeTree::from_preorder(members));
    }

    let unreached = seen.iter().filter(|s| !**s).count();
    if unreached > 0 {
        return Err(Error::InvariantViolation(format!(
            "{unreached} nodes are not reachable from any root"
        )));
    }
    Ok(trees)
}

impl MergeTree {
    fn from_preorder(nodes: Vec<Node>) -> Self {
        let index = nodes.iter().enumerate().map(|(pos, n)| (n.id, pos)).collect();
        Self { nodes, index }
    }

    /// The root node.
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Id of the root node.
    pub fn root_id(&self) -> usize {
        self.nodes[0].id
    }

    /// Nodes in depth-first pre-order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node by global id.
    pub fn get(&self, id: usize) -> Option<&Node> {
        self.index.get(&id).map(|&pos| &self.nodes[pos])
    }

    /// Local position of a global id.
    pub fn position(&self, id: usize) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Leaf nodes in pre-order.
    pub fn leaves(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Ids of the leaves in pre-order.
    pub fn leaf_ids(&self) -> Vec<usize> {
        self.leaves().map(|n| n.id).collect()
    }

    /// `id` and everything below it, in pre-order.
    pub fn descendants(&self, id: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            out.push(current);
            if let Some((a, b)) = node.children {
                stack.push(b);
                stack.push(a);
            }
        }
        out
    }

    /// Summed `[px, py, pz, E]` of the leaves.
    pub fn leaf_four_momentum(&self) -> [f64; 4] {
        self.leaves().fold([0.0; 4], |mut acc, n| {
            for (a, v) in acc.iter_mut().zip(n.kinematics.four_vector()) {
                *a += v;
            }
            acc
        })
    }

    /// Re-split this tree; yields a single identical tree.
    pub fn split(&self) -> Result<Vec<MergeTree>> {
        split_roots(&self.nodes)
    }

    /// Rebuild the tree from its leaves by replaying every merge in creation order.
    ///
    /// Kinematics and ranks are recomputed from the children under `config`,
    /// and so are join distances when the configuration is sequential (spectral
    /// joins are embedding distances and are carried over). Any recomputed
    /// value that disagrees with the recorded one is an `InvariantViolation`.
    pub fn replay(&self, config: &JetConfig) -> Result<MergeTree> {
        let metric = DistanceMetric::from_config(config);
        let sequential = matches!(config.algorithm, Algorithm::Sequential);
        let mut order: Vec<&Node> = self.nodes.iter().collect();
        order.sort_by_key(|n| n.id);

        let mut rebuilt: HashMap<usize, Node> = HashMap::with_capacity(order.len());
        for node in order {
            let fresh = match node.children {
                None => Node::leaf(node.id, node.kinematics),
                Some((a, b)) => {
                    let (Some(left), Some(right)) = (rebuilt.get(&a), rebuilt.get(&b)) else {
                        return Err(Error::InvariantViolation(format!(
                            "node {} merges children not created before it",
                            node.id
                        )));
                    };
                    let distance2 = if sequential {
                        pair_distance2(&metric, &left.kinematics, &right.kinematics)
                    } else {
                        0.0
                    };
                    let mut merged =
                        Node::merged(node.id, left, right, distance2, config.from_pseudorapidity);
                    if !sequential {
                        merged.join_distance = node.join_distance;
                    }
                    check_replayed(node, &merged)?;
                    merged
                }
            };
            if let Some((a, b)) = fresh.children {
                for child in [a, b] {
                    if let Some(c) = rebuilt.get_mut(&child) {
                        c.parent = Some(fresh.id);
                    }
                }
            }
            let _ = rebuilt.insert(fresh.id, fresh);
        }
        if let Some(root) = rebuilt.get_mut(&self.root_id()) {
            root.parent = self.root().parent;
        }

        let nodes: Vec<Node> = self
            .nodes
            .iter()
            .filter_map(|n| rebuilt.get(&n.id).copied())
            .collect();
        let mut trees = split_roots(&nodes)?;
        match trees.len() {
            1 => Ok(trees.remove(0)),
            n => Err(Error::InvariantViolation(format!(
                "replay produced {n} trees"
            ))),
        }
    }

    /// Column export for this tree.
    pub fn columns(&self, jet_name: &str, from_pseudorapidity: bool) -> JetColumns {
        JetColumns::from_nodes(jet_name, from_pseudorapidity, &self.nodes)
    }
}

/// Relative tolerance for replayed floats.
const REPLAY_TOLERANCE: f64 = 1e-9;

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= REPLAY_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// Compare a replayed merge against the recorded node.
fn check_replayed(recorded: &Node, replayed: &Node) -> Result<()> {
    let mismatch = |field: &str, want: String, got: String| -> Result<()> {
        Err(Error::InvariantViolation(format!(
            "node {}: recorded {field} {want}, replay gives {got}",
            recorded.id
        )))
    };
    if recorded.rank != replayed.rank {
        return mismatch("rank", recorded.rank.to_string(), replayed.rank.to_string());
    }
    let want = recorded.kinematics.four_vector();
    let got = replayed.kinematics.four_vector();
    if want.iter().zip(&got).any(|(a, b)| !close(*a, *b)) {
        return mismatch("four-momentum", format!("{want:?}"), format!("{got:?}"));
    }
    if !close(recorded.join_distance, replayed.join_distance) {
        return mismatch(
            "join distance",
            recorded.join_distance.to_string(),
            replayed.join_distance.to_string(),
        );
    }
    Ok(())
}

impl HealthCheck for MergeTree {
    fn health_check(&self) -> HealthReport {
        health_report(&self.nodes)
    }
}

/// One named column of a [`JetColumns`] table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Integer column, `-1` for absent links.
    Int(Vec<i64>),
    /// Float column.
    Float(Vec<f64>),
}

/// Row-aligned integer and float tables for one jet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JetColumns {
    /// Collection name used as the column prefix.
    pub jet_name: String,
    /// Whether the rapidity column holds pseudorapidity.
    pub from_pseudorapidity: bool,
    /// Rows of [`IntField::ALL`].
    pub ints: Vec<[i64; 5]>,
    /// Rows of [`FloatField::ALL`].
    pub floats: Vec<[f64; 8]>,
}

impl JetColumns {
    /// Tabulate `nodes` in the given order.
    pub fn from_nodes(jet_name: &str, from_pseudorapidity: bool, nodes: &[Node]) -> Self {
        Self {
            jet_name: jet_name.to_string(),
            from_pseudorapidity,
            ints: nodes
                .iter()
                .map(|n| IntField::ALL.map(|f| n.int(f)))
                .collect(),
            floats: nodes
                .iter()
                .map(|n| FloatField::ALL.map(|f| n.float(f)))
                .collect(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.ints.len()
    }

    /// True with no rows.
    pub fn is_empty(&self) -> bool {
        self.ints.is_empty()
    }

    /// One integer column.
    pub fn int_column(&self, field: IntField) -> Vec<i64> {
        let col = IntField::ALL.iter().position(|f| *f == field).unwrap_or(0);
        self.ints.iter().map(|row| row[col]).collect()
    }

    /// One float column.
    pub fn float_column(&self, field: FloatField) -> Vec<f64> {
        let col = FloatField::ALL.iter().position(|f| *f == field).unwrap_or(0);
        self.floats.iter().map(|row| row[col]).collect()
    }

    /// Full integer and float column names.
    pub fn column_names(&self) -> (Vec<String>, Vec<String>) {
        (
            IntField::ALL
                .iter()
                .map(|f| f.column_name(&self.jet_name))
                .collect(),
            FloatField::ALL
                .iter()
                .map(|f| f.column_name(&self.jet_name, self.from_pseudorapidity))
                .collect(),
        )
    }

    /// Look a column up by its full or suffix-only name.
    pub fn column_by_name(&self, name: &str) -> Option<Column> {
        if let Some(field) = IntField::from_column_name(name) {
            return Some(Column::Int(self.int_column(field)));
        }
        FloatField::from_column_name(name).map(|f| Column::Float(self.float_column(f)))
    }

    /// JSON object keyed by full column name.
    pub fn to_json(&self) -> Value {
        let (int_names, float_names) = self.column_names();
        let mut map = Map::new();
        for (name, field) in int_names.into_iter().zip(IntField::ALL) {
            let _ = map.insert(name, Value::from(self.int_column(field)));
        }
        for (name, field) in float_names.into_iter().zip(FloatField::ALL) {
            let _ = map.insert(name, Value::from(self.float_column(field)));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusteringEngine;
    use crate::config::JetConfig;
    use crate::kinematics::Kinematics;

    fn particle(pt: f64, rapidity: f64, phi: f64) -> Kinematics {
        Kinematics::from_collider(pt, rapidity, phi, pt * rapidity.cosh())
    }

    fn finished_engine() -> ClusteringEngine {
        let inputs = vec![
            particle(10.0, 0.0, 0.0),
            particle(8.0, 0.05, 0.05),
            particle(1.0, 5.0, 3.0),
            particle(3.0, 0.1, -0.1),
            particle(2.0, 4.9, 3.05),
        ];
        let mut engine = ClusteringEngine::new(JetConfig::sequential(0.4, 1.0), &inputs).unwrap();
        engine.run().unwrap();
        engine
    }

    #[test]
    fn test_split_orders_roots_and_preorder() {
        let trees = finished_engine().split().unwrap();
        assert_eq!(trees.len(), 2);
        assert!(trees[0].root_id() < trees[1].root_id());
        for tree in &trees {
            let root = tree.root();
            assert_eq!(tree.position(root.id), Some(0));
            if let Some((a, _)) = root.children {
                assert_eq!(tree.position(a), Some(1));
            }
            assert_eq!(tree.descendants(tree.root_id()).len(), tree.len());
        }
    }

    #[test]
    fn test_split_is_idempotent() {
        let engine = finished_engine();
        let first = engine.split().unwrap();
        assert_eq!(first, engine.split().unwrap());
        for tree in &first {
            assert_eq!(tree.split().unwrap(), vec![tree.clone()]);
        }
    }

    #[test]
    fn test_leaf_momentum_matches_root() {
        for tree in finished_engine().split().unwrap() {
            let sum = tree.leaf_four_momentum();
            let root = tree.root().kinematics.four_vector();
            for (a, b) in sum.iter().zip(root) {
                assert!((a - b).abs() <= 1e-9 * (1.0 + b.abs()));
            }
        }
    }

    fn kt() -> JetConfig {
        JetConfig::sequential(0.4, 1.0)
    }

    fn largest_tree() -> MergeTree {
        let trees = finished_engine().split().unwrap();
        trees.into_iter().max_by_key(MergeTree::len).unwrap()
    }

    #[test]
    fn test_replay_reproduces_structure() {
        for tree in finished_engine().split().unwrap() {
            let replayed = tree.replay(&kt()).unwrap();
            let original = tree.columns("J", false);
            let again = replayed.columns("J", false);
            assert_eq!(original.ints, again.ints);
            for (a, b) in original.floats.iter().zip(&again.floats) {
                for (x, y) in a.iter().zip(b) {
                    assert!((x - y).abs() <= 1e-9 * (1.0 + y.abs()));
                }
            }
        }
    }

    #[test]
    fn test_replay_detects_altered_join_distance() {
        let mut tree = largest_tree();
        assert!(tree.len() > 1);
        tree.nodes[0].join_distance *= 1.5;
        let err = tree.replay(&kt()).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(ref m) if m.contains("join distance")));
    }

    #[test]
    fn test_replay_detects_altered_kinematics() {
        let mut tree = largest_tree();
        tree.nodes[0].kinematics.px += 1.0;
        let err = tree.replay(&kt()).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(ref m) if m.contains("four-momentum")));
    }

    #[test]
    fn test_replay_detects_altered_rank() {
        let mut tree = largest_tree();
        tree.nodes[0].rank += 1;
        assert!(matches!(tree.replay(&kt()), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_replay_under_another_metric_fails() {
        let tree = largest_tree();
        assert!(tree.replay(&kt()).is_ok());
        assert!(tree.replay(&JetConfig::sequential(0.4, -1.0)).is_err());
    }

    #[test]
    fn test_replay_keeps_spectral_join_distances() {
        let inputs = vec![
            particle(10.0, 0.0, 0.0),
            particle(8.0, 0.1, 0.1),
            particle(5.0, 2.0, 2.5),
            particle(4.0, 2.1, 2.4),
        ];
        let config = JetConfig::spectral(0.8, crate::config::SpectralConfig::default());
        let mut engine = ClusteringEngine::new(config, &inputs).unwrap();
        engine.run().unwrap();
        for tree in engine.split().unwrap() {
            let replayed = tree.replay(&config).unwrap();
            for (a, b) in tree.nodes().iter().zip(replayed.nodes()) {
                assert_eq!(a.join_distance, b.join_distance);
            }
        }
    }

    #[test]
    fn test_split_rejects_dangling_child() {
        let mut node = Node::leaf(0, particle(1.0, 0.0, 0.0));
        node.children = Some((5, 6));
        node.rank = 1;
        assert!(matches!(
            split_roots(&[node]),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_split_rejects_duplicates_and_unreachable() {
        let a = Node::leaf(0, particle(1.0, 0.0, 0.0));
        assert!(split_roots(&[a, a]).is_err());

        let mut x = Node::leaf(1, particle(1.0, 0.0, 0.0));
        let mut y = Node::leaf(2, particle(1.0, 0.0, 0.0));
        x.parent = Some(2);
        y.parent = Some(1);
        assert!(split_roots(&[x, y]).is_err());
    }

    #[test]
    fn test_self_parent_is_root() {
        let mut a = Node::leaf(3, particle(1.0, 0.0, 0.0));
        a.parent = Some(3);
        let trees = split_roots(&[a]).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].root_id(), 3);
    }

    #[test]
    fn test_columns_and_lookup() {
        let trees = finished_engine().split().unwrap();
        let cols = trees[0].columns("Kt", true);
        assert_eq!(cols.len(), trees[0].len());
        let (ints, floats) = cols.column_names();
        assert_eq!(ints[0], "Kt_InputIdx");
        assert_eq!(floats[1], "Kt_PseudoRapidity");
        match cols.column_by_name("Kt_Parent") {
            Some(Column::Int(parents)) => assert_eq!(parents[0], -1),
            other => panic!("unexpected {other:?}"),
        }
        let json = cols.to_json();
        assert!(json.get("Kt_JoinDistance").is_some());
    }
}
