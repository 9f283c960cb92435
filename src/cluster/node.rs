//! Merge-tree node record and its named columns.

use serde::{Deserialize, Serialize};

use crate::kinematics::Kinematics;

/// One entry in the node arena: an original input or a merged cluster.
///
/// Ids are issued in creation order; originals take `0..n`, every merge
/// takes the next free id. A node has either no children or exactly two.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique id (also the node's handle in the arena).
    pub id: usize,
    /// Id of the merge this node took part in, `None` while unmerged.
    pub parent: Option<usize>,
    /// The two merged nodes, `None` for leaves.
    ///
    /// The first child held the lower active index when they were joined
    /// (the position the merged node takes over); the second is the node
    /// that left the active set.
    pub children: Option<(usize, usize)>,
    /// 0 for leaves, `max(child ranks) + 1` otherwise.
    pub rank: usize,
    /// Four-momentum and derived angles.
    pub kinematics: Kinematics,
    /// `sqrt` of the distance at which the children were joined, 0 for leaves.
    pub join_distance: f64,
}

impl Node {
    /// An original input.
    pub fn leaf(id: usize, kinematics: Kinematics) -> Self {
        Self {
            id,
            parent: None,
            children: None,
            rank: 0,
            kinematics,
            join_distance: 0.0,
        }
    }

    /// A cluster formed by joining `a` and `b` at squared distance `distance2`.
    pub fn merged(
        id: usize,
        a: &Node,
        b: &Node,
        distance2: f64,
        from_pseudorapidity: bool,
    ) -> Self {
        Self {
            id,
            parent: None,
            children: Some((a.id, b.id)),
            rank: a.rank.max(b.rank) + 1,
            kinematics: a.kinematics.combine(&b.kinematics, from_pseudorapidity),
            join_distance: distance2.sqrt(),
        }
    }

    /// True for original inputs.
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Integer column value, `-1` standing in for an absent link.
    pub fn int(&self, field: IntField) -> i64 {
        let link = |id: Option<usize>| id.map_or(-1, |v| v as i64);
        match field {
            IntField::InputIdx => self.id as i64,
            IntField::Parent => link(self.parent),
            IntField::Child1 => link(self.children.map(|c| c.0)),
            IntField::Child2 => link(self.children.map(|c| c.1)),
            IntField::Rank => self.rank as i64,
        }
    }

    /// Float column value.
    pub fn float(&self, field: FloatField) -> f64 {
        let k = &self.kinematics;
        match field {
            FloatField::Pt => k.pt,
            FloatField::Rapidity => k.rapidity,
            FloatField::Phi => k.phi,
            FloatField::Energy => k.energy,
            FloatField::Px => k.px,
            FloatField::Py => k.py,
            FloatField::Pz => k.pz,
            FloatField::JoinDistance => self.join_distance,
        }
    }
}

/// Integer columns of a jet collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntField {
    /// Node id.
    InputIdx,
    /// Parent id.
    Parent,
    /// First child id.
    Child1,
    /// Second child id.
    Child2,
    /// Rank.
    Rank,
}

impl IntField {
    /// All columns in storage order.
    pub const ALL: [IntField; 5] = [
        IntField::InputIdx,
        IntField::Parent,
        IntField::Child1,
        IntField::Child2,
        IntField::Rank,
    ];

    /// Column suffix.
    pub fn name(self) -> &'static str {
        match self {
            IntField::InputIdx => "InputIdx",
            IntField::Parent => "Parent",
            IntField::Child1 => "Child1",
            IntField::Child2 => "Child2",
            IntField::Rank => "Rank",
        }
    }

    /// Full column name, `<jet_name>_<suffix>`.
    pub fn column_name(self, jet_name: &str) -> String {
        format!("{jet_name}_{}", self.name())
    }

    /// Resolve a column name (with or without a jet prefix).
    pub fn from_column_name(column: &str) -> Option<Self> {
        let suffix = column.rsplit('_').next().unwrap_or(column);
        IntField::ALL.into_iter().find(|f| f.name() == suffix)
    }
}

/// Float columns of a jet collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatField {
    /// Transverse momentum.
    Pt,
    /// Rapidity, or pseudorapidity for collections built from it.
    Rapidity,
    /// Azimuth.
    Phi,
    /// Energy.
    Energy,
    /// x momentum.
    Px,
    /// y momentum.
    Py,
    /// z momentum.
    Pz,
    /// Join distance.
    JoinDistance,
}

impl FloatField {
    /// All columns in storage order.
    pub const ALL: [FloatField; 8] = [
        FloatField::Pt,
        FloatField::Rapidity,
        FloatField::Phi,
        FloatField::Energy,
        FloatField::Px,
        FloatField::Py,
        FloatField::Pz,
        FloatField::JoinDistance,
    ];

    /// Column suffix; the rapidity column is renamed for pseudorapidity collections.
    pub fn name(self, from_pseudorapidity: bool) -> &'static str {
        match self {
            FloatField::Pt => "PT",
            FloatField::Rapidity if from_pseudorapidity => "PseudoRapidity",
            FloatField::Rapidity => "Rapidity",
            FloatField::Phi => "Phi",
            FloatField::Energy => "Energy",
            FloatField::Px => "Px",
            FloatField::Py => "Py",
            FloatField::Pz => "Pz",
            FloatField::JoinDistance => "JoinDistance",
        }
    }

    /// Full column name, `<jet_name>_<suffix>`.
    pub fn column_name(self, jet_name: &str, from_pseudorapidity: bool) -> String {
        format!("{jet_name}_{}", self.name(from_pseudorapidity))
    }

    /// Resolve a column name (with or without a jet prefix).
    pub fn from_column_name(column: &str) -> Option<Self> {
        let suffix = column.rsplit('_').next().unwrap_or(column);
        if suffix == "PseudoRapidity" {
            return Some(FloatField::Rapidity);
        }
        FloatField::ALL
            .into_iter()
            .find(|f| f.name(false) == suffix)
    }
}
