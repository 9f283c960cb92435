//! Jet collection configuration.
//!
//! One [`JetConfig`] describes one named jet collection. The recorded form
//! ([`JetConfig::parameter_record`]) uses the canonical key names
//! (`DeltaR`, `ExponentOfPTMultiplier`, ...) so the hyperparameter registry
//! and external storage agree on spelling.
//!
//! ```rust
//! use jetree::config::{AffinityType, JetConfig, SpectralConfig, UpdatePolicy};
//!
//! let sequential = JetConfig::sequential(0.4, -1.0); // anti-kt, R = 0.4
//! let spectral = JetConfig::spectral(
//!     0.8,
//!     SpectralConfig::default()
//!         .with_affinity_type(AffinityType::ExponentSquared)
//!         .with_update_policy(UpdatePolicy::Mean),
//! );
//! assert!(sequential.validate().is_ok());
//! assert!(spectral.validate().is_ok());
//! ```

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::metric::{ExponentPosition, Invariant};

/// Lower-case and strip separators so `four-vector_invariant`, `FourVectorInvariant`
/// and `four vector invariant` compare equal.
pub(crate) fn normalise_option(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Edge weight as a function of squared physical distance `d²`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AffinityType {
    /// `exp(-d)`
    Exponent,
    /// `exp(-d²)`
    ExponentSquared,
    /// `-d`
    Linear,
    /// `d^-1`, written `(d²)^-0.5`
    Inverse,
}

impl AffinityType {
    /// Affinity for one squared distance.
    #[inline]
    pub fn apply(self, distance2: f64) -> f64 {
        match self {
            AffinityType::Exponent => (-distance2.sqrt()).exp(),
            AffinityType::ExponentSquared => (-distance2).exp(),
            AffinityType::Linear => -distance2.sqrt(),
            AffinityType::Inverse => distance2.powf(-0.5),
        }
    }
}

impl fmt::Display for AffinityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AffinityType::Exponent => "exponent",
            AffinityType::ExponentSquared => "exponent-squared",
            AffinityType::Linear => "linear",
            AffinityType::Inverse => "inverse",
        };
        f.write_str(s)
    }
}

impl FromStr for AffinityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "exponent" => Ok(AffinityType::Exponent),
            "exponentsquared" | "exponent2" => Ok(AffinityType::ExponentSquared),
            "linear" => Ok(AffinityType::Linear),
            "inverse" => Ok(AffinityType::Inverse),
            _ => Err(Error::UnknownOption {
                key: "AffinityType",
                value: s.to_string(),
            }),
        }
    }
}

/// Sparsification applied to the affinity matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AffinityCutoff {
    /// Keep every edge.
    None,
    /// Keep an edge when either end point is among the other's `k` nearest neighbours.
    Knn(usize),
    /// Drop edges longer than `r` (physical distance, not squared).
    Distance(f64),
}

impl fmt::Display for AffinityCutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffinityCutoff::None => f.write_str("none"),
            AffinityCutoff::Knn(k) => write!(f, "knn:{k}"),
            AffinityCutoff::Distance(r) => write!(f, "distance:{r}"),
        }
    }
}

impl FromStr for AffinityCutoff {
    type Err = Error;

    /// Accepts `none`, `knn:k`, `distance:r`, and the tuple form `(knn, k)`.
    fn from_str(s: &str) -> Result<Self> {
        let unknown = || Error::UnknownOption {
            key: "AffinityCutoff",
            value: s.to_string(),
        };
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let mut parts = trimmed
            .split(|c| matches!(c, ',' | ':' | '='))
            .map(str::trim)
            .filter(|p| !p.is_empty());
        let kind = parts.next().map(normalise_option).unwrap_or_default();
        let param = parts.next();
        if parts.next().is_some() {
            return Err(unknown());
        }
        match (kind.as_str(), param) {
            ("none", None) => Ok(AffinityCutoff::None),
            ("knn", Some(k)) => k.parse().map(AffinityCutoff::Knn).map_err(|_| unknown()),
            ("distance", Some(r)) => r
                .parse()
                .map(AffinityCutoff::Distance)
                .map_err(|_| unknown()),
            _ => Err(unknown()),
        }
    }
}

/// Graph Laplacian flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaplacianKind {
    /// `L = D - A`
    Unnormalized,
    /// `L = D^-1/2 (D - A) D^-1/2`
    Symmetric,
}

impl fmt::Display for LaplacianKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaplacianKind::Unnormalized => f.write_str("unnormalized"),
            LaplacianKind::Symmetric => f.write_str("symmetric"),
        }
    }
}

impl FromStr for LaplacianKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "unnormalized" | "unnormalised" => Ok(LaplacianKind::Unnormalized),
            "symmetric" => Ok(LaplacianKind::Symmetric),
            _ => Err(Error::UnknownOption {
                key: "Laplacian",
                value: s.to_string(),
            }),
        }
    }
}

/// How a spectral node stops clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoppingCondition {
    /// A diagonal hit (`ΔR²`) finalises the node.
    Standard,
    /// An extra beam node is embedded; merging into it finalises the other side.
    BeamParticle,
}

impl fmt::Display for StoppingCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoppingCondition::Standard => f.write_str("standard"),
            StoppingCondition::BeamParticle => f.write_str("beam-particle"),
        }
    }
}

impl FromStr for StoppingCondition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "standard" => Ok(StoppingCondition::Standard),
            "beamparticle" => Ok(StoppingCondition::BeamParticle),
            _ => Err(Error::UnknownOption {
                key: "StoppingCondition",
                value: s.to_string(),
            }),
        }
    }
}

/// Number of non-trivial eigenvectors kept for the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NumEigenvectors {
    /// At most `k`.
    Bounded(usize),
    /// Every non-trivial eigenvector.
    Unbounded,
}

impl NumEigenvectors {
    /// How many to keep when `available` non-trivial ones exist.
    pub fn resolve(self, available: usize) -> usize {
        match self {
            NumEigenvectors::Bounded(k) => k.min(available),
            NumEigenvectors::Unbounded => available,
        }
    }
}

impl fmt::Display for NumEigenvectors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumEigenvectors::Bounded(k) => write!(f, "{k}"),
            NumEigenvectors::Unbounded => f.write_str("unbounded"),
        }
    }
}

impl FromStr for NumEigenvectors {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "unbounded" | "inf" | "infinity" | "all" => Ok(NumEigenvectors::Unbounded),
            other => other
                .parse()
                .map(NumEigenvectors::Bounded)
                .map_err(|_| Error::UnknownOption {
                    key: "NumEigenvectors",
                    value: s.to_string(),
                }),
        }
    }
}

/// How the spectral engine refreshes its embedding after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    /// Merged coordinate is the mean of the two merged rows.
    Mean,
    /// Rebuild the merged node's Laplacian row and project it onto the existing basis.
    #[default]
    RowRecompute,
    /// Rerun the whole build after each merge.
    FullRebuild,
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Mean => f.write_str("mean"),
            UpdatePolicy::RowRecompute => f.write_str("row-recompute"),
            UpdatePolicy::FullRebuild => f.write_str("full-rebuild"),
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "mean" => Ok(UpdatePolicy::Mean),
            "rowrecompute" | "recompute" => Ok(UpdatePolicy::RowRecompute),
            "fullrebuild" | "full" => Ok(UpdatePolicy::FullRebuild),
            _ => Err(Error::UnknownOption {
                key: "UpdatePolicy",
                value: s.to_string(),
            }),
        }
    }
}

/// Settings that only the spectral engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// Eigenvectors kept after discarding the trivial one.
    pub num_eigenvectors: NumEigenvectors,
    /// Affinity function.
    pub affinity_type: AffinityType,
    /// Optional affinity sparsification.
    pub affinity_cutoff: AffinityCutoff,
    /// Laplacian flavour.
    pub laplacian: LaplacianKind,
    /// Stopping condition.
    pub stopping_condition: StoppingCondition,
    /// Post-merge update.
    pub update_policy: UpdatePolicy,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            num_eigenvectors: NumEigenvectors::Unbounded,
            affinity_type: AffinityType::Exponent,
            affinity_cutoff: AffinityCutoff::None,
            laplacian: LaplacianKind::Unnormalized,
            stopping_condition: StoppingCondition::Standard,
            update_policy: UpdatePolicy::RowRecompute,
        }
    }
}

impl SpectralConfig {
    /// Set the number of eigenvectors.
    pub fn with_num_eigenvectors(mut self, n: NumEigenvectors) -> Self {
        self.num_eigenvectors = n;
        self
    }

    /// Set the affinity function.
    pub fn with_affinity_type(mut self, affinity: AffinityType) -> Self {
        self.affinity_type = affinity;
        self
    }

    /// Set the affinity cutoff.
    pub fn with_affinity_cutoff(mut self, cutoff: AffinityCutoff) -> Self {
        self.affinity_cutoff = cutoff;
        self
    }

    /// Set the Laplacian flavour.
    pub fn with_laplacian(mut self, laplacian: LaplacianKind) -> Self {
        self.laplacian = laplacian;
        self
    }

    /// Set the stopping condition.
    pub fn with_stopping_condition(mut self, stopping: StoppingCondition) -> Self {
        self.stopping_condition = stopping;
        self
    }

    /// Set the post-merge update policy.
    pub fn with_update_policy(mut self, policy: UpdatePolicy) -> Self {
        self.update_policy = policy;
        self
    }
}

/// Engine family.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Metric-based matrix with beam distances on the diagonal.
    Sequential,
    /// Affinity graph → Laplacian → eigen-embedding.
    Spectral(SpectralConfig),
}

/// Full configuration of one jet collection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JetConfig {
    /// Jet radius `ΔR`.
    pub delta_r: f64,
    /// `p` in `pT^2p`.
    pub exponent_multiplier: f64,
    /// Where `pT^2p` is applied.
    pub exponent_position: ExponentPosition,
    /// Pairwise invariant.
    pub invariant: Invariant,
    /// Inputs carry pseudorapidity rather than rapidity.
    pub from_pseudorapidity: bool,
    /// Engine family and its settings.
    pub algorithm: Algorithm,
}

impl Default for JetConfig {
    fn default() -> Self {
        Self::sequential(0.4, -1.0)
    }
}

impl JetConfig {
    /// Sequential recombination (`p = -1/0/1` gives anti-kt/Cambridge-Aachen/kt).
    pub fn sequential(delta_r: f64, exponent_multiplier: f64) -> Self {
        Self {
            delta_r,
            exponent_multiplier,
            exponent_position: ExponentPosition::Input,
            invariant: Invariant::Angular,
            from_pseudorapidity: false,
            algorithm: Algorithm::Sequential,
        }
    }

    /// Spectral embedding with `p = 0`.
    pub fn spectral(delta_r: f64, spectral: SpectralConfig) -> Self {
        Self {
            delta_r,
            exponent_multiplier: 0.0,
            exponent_position: ExponentPosition::Input,
            invariant: Invariant::Angular,
            from_pseudorapidity: false,
            algorithm: Algorithm::Spectral(spectral),
        }
    }

    /// Set the jet radius.
    pub fn with_delta_r(mut self, delta_r: f64) -> Self {
        self.delta_r = delta_r;
        self
    }

    /// Set the pT exponent multiplier.
    pub fn with_exponent_multiplier(mut self, p: f64) -> Self {
        self.exponent_multiplier = p;
        self
    }

    /// Set where the pT exponent is applied.
    pub fn with_exponent_position(mut self, position: ExponentPosition) -> Self {
        self.exponent_position = position;
        self
    }

    /// Set the pairwise invariant.
    pub fn with_invariant(mut self, invariant: Invariant) -> Self {
        self.invariant = invariant;
        self
    }

    /// Treat the rapidity column as pseudorapidity.
    pub fn with_pseudorapidity(mut self, from_pseudorapidity: bool) -> Self {
        self.from_pseudorapidity = from_pseudorapidity;
        self
    }

    /// Spectral settings, if this is a spectral configuration.
    pub fn spectral_config(&self) -> Option<&SpectralConfig> {
        match &self.algorithm {
            Algorithm::Spectral(s) => Some(s),
            Algorithm::Sequential => None,
        }
    }

    /// Check numeric ranges and option combinations.
    pub fn validate(&self) -> Result<()> {
        if !(self.delta_r.is_finite() && self.delta_r > 0.0) {
            return Err(Error::InvalidParameter {
                name: "DeltaR",
                message: format!("must be positive and finite, got {}", self.delta_r),
            });
        }
        if !self.exponent_multiplier.is_finite() {
            return Err(Error::InvalidParameter {
                name: "ExponentOfPTMultiplier",
                message: format!("must be finite, got {}", self.exponent_multiplier),
            });
        }
        match &self.algorithm {
            Algorithm::Sequential => {
                if self.exponent_position == ExponentPosition::Eigenspace {
                    return Err(Error::InvalidParameter {
                        name: "ExponentOfPTPosition",
                        message: "sequential recombination has no eigenspace".to_string(),
                    });
                }
            }
            Algorithm::Spectral(s) => {
                if s.num_eigenvectors == NumEigenvectors::Bounded(0) {
                    return Err(Error::InvalidParameter {
                        name: "NumEigenvectors",
                        message: "must keep at least one eigenvector".to_string(),
                    });
                }
                match s.affinity_cutoff {
                    AffinityCutoff::Knn(0) => {
                        return Err(Error::InvalidParameter {
                            name: "AffinityCutoff",
                            message: "knn cutoff needs k >= 1".to_string(),
                        });
                    }
                    AffinityCutoff::Distance(r) if r.is_nan() || r <= 0.0 => {
                        return Err(Error::InvalidParameter {
                            name: "AffinityCutoff",
                            message: format!("distance cutoff must be positive, got {r}"),
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Canonical parameter map, as recorded against a jet collection name.
    pub fn parameter_record(&self) -> BTreeMap<String, Value> {
        let mut record = BTreeMap::new();
        let mut put = |key: &str, value: Value| {
            let _ = record.insert(key.to_string(), value);
        };
        put("DeltaR", Value::from(self.delta_r));
        put("ExponentOfPTMultiplier", Value::from(self.exponent_multiplier));
        put("Invariant", Value::from(self.invariant.to_string()));
        put("FromPseudorapidity", Value::from(self.from_pseudorapidity));
        match &self.algorithm {
            Algorithm::Sequential => {
                put("Algorithm", Value::from("sequential"));
            }
            Algorithm::Spectral(s) => {
                put("Algorithm", Value::from("spectral"));
                put(
                    "ExponentOfPTPosition",
                    Value::from(self.exponent_position.to_string()),
                );
                let eig = match s.num_eigenvectors {
                    NumEigenvectors::Bounded(k) => Value::from(k),
                    NumEigenvectors::Unbounded => Value::from("unbounded"),
                };
                put("NumEigenvectors", eig);
                put("AffinityType", Value::from(s.affinity_type.to_string()));
                put("AffinityCutoff", Value::from(s.affinity_cutoff.to_string()));
                put("Laplacian", Value::from(s.laplacian.to_string()));
                put(
                    "StoppingCondition",
                    Value::from(s.stopping_condition.to_string()),
                );
                put("UpdatePolicy", Value::from(s.update_policy.to_string()));
            }
        }
        record
    }

    /// Build a configuration from `key = value` string pairs using the canonical key names.
    ///
    /// Unknown keys and unknown option values are configuration errors. A
    /// spectral configuration is produced when any spectral-only key is
    /// present or `Algorithm = spectral`.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = JetConfig::default();
        let mut spectral: Option<SpectralConfig> = None;
        let parse_f64 = |name: &'static str, v: &str| -> Result<f64> {
            v.trim().parse().map_err(|_| Error::InvalidParameter {
                name,
                message: format!("expected a number, got '{v}'"),
            })
        };
        for (key, value) in pairs {
            match normalise_option(key).as_str() {
                "deltar" => config.delta_r = parse_f64("DeltaR", value)?,
                "exponentofptmultiplier" | "exponentmultiplier" | "ptexponentmultiplier" => {
                    config.exponent_multiplier = parse_f64("ExponentOfPTMultiplier", value)?
                }
                "exponentofptposition" | "ptexponentposition" => {
                    config.exponent_position = value.parse()?
                }
                "invariant" | "invarient" => config.invariant = value.parse()?,
                "frompseudorapidity" => {
                    config.from_pseudorapidity =
                        value.trim().parse().map_err(|_| Error::InvalidParameter {
                            name: "FromPseudorapidity",
                            message: format!("expected true/false, got '{value}'"),
                        })?
                }
                "algorithm" => match normalise_option(value).as_str() {
                    "sequential" => {}
                    "spectral" => {
                        let _ = spectral.get_or_insert_with(SpectralConfig::default);
                    }
                    _ => {
                        return Err(Error::UnknownOption {
                            key: "Algorithm",
                            value: value.to_string(),
                        })
                    }
                },
                "numeigenvectors" => {
                    spectral.get_or_insert_with(SpectralConfig::default).num_eigenvectors =
                        value.parse()?
                }
                "affinitytype" => {
                    spectral.get_or_insert_with(SpectralConfig::default).affinity_type =
                        value.parse()?
                }
                "affinitycutoff" => {
                    spectral.get_or_insert_with(SpectralConfig::default).affinity_cutoff =
                        value.parse()?
                }
                "laplacian" | "laplacien" => {
                    spectral.get_or_insert_with(SpectralConfig::default).laplacian =
                        value.parse()?
                }
                "stoppingcondition" => {
                    spectral.get_or_insert_with(SpectralConfig::default).stopping_condition =
                        value.parse()?
                }
                "updatepolicy" => {
                    spectral.get_or_insert_with(SpectralConfig::default).update_policy =
                        value.parse()?
                }
                _ => {
                    return Err(Error::UnknownOption {
                        key: "configuration key",
                        value: key.to_string(),
                    })
                }
            }
        }
        if let Some(s) = spectral {
            config.algorithm = Algorithm::Spectral(s);
        }
        config.validate()?;
        Ok(config)
    }
}
