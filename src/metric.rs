//! Particle–particle and particle–beam distances.
//!
//! All distances are **squared**. The generalised-kt family is selected by
//! the pT exponent multiplier `p`:
//!
//! | p  | Algorithm |
//! |----|-----------|
//! | -1 | anti-kt |
//! | 0  | Cambridge-Aachen |
//! | 1  | kt |
//!
//! # Invariants
//!
//! ```text
//! angular   ΔR² = Δy² + Δφ²                       × min(pT₁^2p, pT₂^2p)
//! normed    1 - (p₁·p₂) / (E₁E₂)                   × min(pT₁^2p, pT₂^2p)
//! invariant E₁E₂ - p₁·p₂                           × min(pT₁^2p, pT₂^2p)
//! Luclus    ΔR² × pT₁^2p pT₂^2p / (pT₁ + pT₂)^2p
//! ```
//!
//! The pT factor is only applied when the exponent position is
//! [`ExponentPosition::Input`]; with [`ExponentPosition::Eigenspace`] the
//! spectral engine applies it after embedding instead.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{normalise_option, JetConfig};
use crate::error::{Error, Result};
use crate::kinematics::{delta_phi, Kinematics};

/// Guard for a vanishing energy product in the normed invariant.
const SMALL_ENERGY_PRODUCT: f64 = 1e-10;

/// Which invariant the pairwise distance is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Invariant {
    /// Rapidity–azimuth separation.
    Angular,
    /// Energy-normalised three-vector dot product.
    Normed,
    /// `E₁E₂ - p₁·p₂`.
    FourVectorInvariant,
    /// Angular separation with Luclus-style pT weighting.
    Luclus,
}

/// Where the pT exponent is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExponentPosition {
    /// Scale physical distances before anything else.
    Input,
    /// Scale distances between embedded points (spectral only).
    Eigenspace,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Invariant::Angular => "angular",
            Invariant::Normed => "normed",
            Invariant::FourVectorInvariant => "four-vector-invariant",
            Invariant::Luclus => "Luclus",
        };
        f.write_str(s)
    }
}

impl FromStr for Invariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "angular" => Ok(Invariant::Angular),
            "normed" => Ok(Invariant::Normed),
            "fourvectorinvariant" | "invariant" | "invarient" => Ok(Invariant::FourVectorInvariant),
            "luclus" => Ok(Invariant::Luclus),
            _ => Err(Error::UnknownOption {
                key: "Invariant",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ExponentPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExponentPosition::Input => f.write_str("input"),
            ExponentPosition::Eigenspace => f.write_str("eigenspace"),
        }
    }
}

impl FromStr for ExponentPosition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match normalise_option(s).as_str() {
            "input" => Ok(ExponentPosition::Input),
            "eigenspace" => Ok(ExponentPosition::Eigenspace),
            _ => Err(Error::UnknownOption {
                key: "ExponentOfPTPosition",
                value: s.to_string(),
            }),
        }
    }
}

/// Squared distance policy built from a jet configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceMetric {
    invariant: Invariant,
    position: ExponentPosition,
    /// `2p`, the power applied to pT.
    exponent: f64,
    delta_r2: f64,
}

impl DistanceMetric {
    /// Create a metric.
    pub fn new(
        invariant: Invariant,
        exponent_multiplier: f64,
        position: ExponentPosition,
        delta_r: f64,
    ) -> Self {
        Self {
            invariant,
            position,
            exponent: 2.0 * exponent_multiplier,
            delta_r2: delta_r * delta_r,
        }
    }

    /// Metric described by a jet configuration.
    pub fn from_config(config: &JetConfig) -> Self {
        Self::new(
            config.invariant,
            config.exponent_multiplier,
            config.exponent_position,
            config.delta_r,
        )
    }

    /// The configured invariant.
    pub fn invariant(&self) -> Invariant {
        self.invariant
    }

    /// Where the pT exponent is applied.
    pub fn position(&self) -> ExponentPosition {
        self.position
    }

    /// `ΔR²`, the stopping threshold in angular units.
    pub fn delta_r2(&self) -> f64 {
        self.delta_r2
    }

    /// `pT^2p`.
    #[inline]
    pub fn pt_factor(&self, pt: f64) -> f64 {
        pt.powf(self.exponent)
    }

    fn applies_at_input(&self) -> bool {
        self.position == ExponentPosition::Input
    }

    /// Squared distance between two records.
    pub fn distance2(&self, a: &Kinematics, b: &Kinematics) -> f64 {
        match self.invariant {
            Invariant::Angular => {
                let d2 = angular_distance2(a, b);
                self.min_scaled(d2, a, b)
            }
            Invariant::Normed => {
                let mut energies = a.energy * b.energy;
                if energies == 0.0 {
                    energies = SMALL_ENERGY_PRODUCT;
                }
                let d2 = 1.0 - a.dot3(b) / energies;
                self.min_scaled(d2, a, b)
            }
            Invariant::FourVectorInvariant => {
                let d2 = a.energy * b.energy - a.dot3(b);
                self.min_scaled(d2, a, b)
            }
            Invariant::Luclus => {
                let d2 = angular_distance2(a, b);
                if self.applies_at_input() {
                    d2 * self.pt_factor(a.pt) * self.pt_factor(b.pt)
                        * (a.pt + b.pt).powf(-self.exponent)
                } else {
                    d2
                }
            }
        }
    }

    /// Squared distance between a record and the beam.
    pub fn beam_distance2(&self, a: &Kinematics) -> f64 {
        if self.applies_at_input() && self.invariant != Invariant::Luclus {
            self.delta_r2 * self.pt_factor(a.pt)
        } else {
            self.delta_r2
        }
    }

    fn min_scaled(&self, d2: f64, a: &Kinematics, b: &Kinematics) -> f64 {
        if self.applies_at_input() {
            d2 * self.pt_factor(a.pt).min(self.pt_factor(b.pt))
        } else {
            d2
        }
    }
}

/// `Δy² + Δφ²` with the azimuthal difference wrapped.
pub fn angular_distance2(a: &Kinematics, b: &Kinematics) -> f64 {
    let dy = a.rapidity - b.rapidity;
    let dphi = delta_phi(a.phi, b.phi);
    dy * dy + dphi * dphi
}

/// Pair distance used to fill engine matrices.
///
/// Soft radiation (zero pT on either side) is placed at zero distance.
#[inline]
pub(crate) fn pair_distance2(metric: &DistanceMetric, a: &Kinematics, b: &Kinematics) -> f64 {
    if a.pt == 0.0 || b.pt == 0.0 {
        0.0
    } else {
        metric.distance2(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(pt: f64, rapidity: f64, phi: f64) -> Kinematics {
        Kinematics::from_collider(pt, rapidity, phi, pt * rapidity.cosh())
    }

    #[test]
    fn test_angular_wraps_phi() {
        let m = DistanceMetric::new(Invariant::Angular, 0.0, ExponentPosition::Input, 0.4);
        let a = particle(1.0, 0.0, 3.1);
        let b = particle(1.0, 0.0, -3.1);
        let expected = (2.0 * core::f64::consts::PI - 6.2).powi(2);
        assert!((m.distance2(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_antikt_uses_min_scaling() {
        let m = DistanceMetric::new(Invariant::Angular, -1.0, ExponentPosition::Input, 0.4);
        let a = particle(10.0, 0.0, 0.0);
        let b = particle(2.0, 0.3, 0.4);
        let expected = (0.09 + 0.16) * 10f64.powi(-2);
        assert!((m.distance2(&a, &b) - expected).abs() < 1e-9);
        assert!((m.beam_distance2(&b) - 0.16 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_eigenspace_position_skips_scaling() {
        let m = DistanceMetric::new(Invariant::Angular, 1.0, ExponentPosition::Eigenspace, 0.5);
        let a = particle(10.0, 0.0, 0.0);
        let b = particle(2.0, 0.3, 0.4);
        assert!((m.distance2(&a, &b) - 0.25).abs() < 1e-9);
        assert!((m.beam_distance2(&a) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_luclus_weighting_and_plain_beam() {
        let m = DistanceMetric::new(Invariant::Luclus, 1.0, ExponentPosition::Input, 0.7);
        let a = particle(3.0, 0.0, 0.0);
        let b = particle(1.0, 0.0, 0.5);
        let expected = 0.25 * 9.0 * 1.0 / 16.0;
        assert!((m.distance2(&a, &b) - expected).abs() < 1e-9);
        assert!((m.beam_distance2(&a) - 0.49).abs() < 1e-12);
    }

    #[test]
    fn test_normed_guards_zero_energy() {
        let m = DistanceMetric::new(Invariant::Normed, 0.0, ExponentPosition::Input, 0.4);
        let a = Kinematics::default();
        let b = Kinematics::from_momentum(1.0, 0.0, 0.0, 1.0);
        assert_eq!(m.distance2(&a, &b), 1.0);
    }

    #[test]
    fn test_four_vector_invariant() {
        let m = DistanceMetric::new(
            Invariant::FourVectorInvariant,
            0.0,
            ExponentPosition::Input,
            0.4,
        );
        let a = Kinematics::from_momentum(1.0, 0.0, 0.0, 2.0);
        let b = Kinematics::from_momentum(0.0, 1.0, 0.0, 3.0);
        assert!((m.distance2(&a, &b) - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_invariant_is_configuration_error() {
        let err = "manhattan".parse::<Invariant>().unwrap_err();
        assert!(matches!(err, Error::UnknownOption { key: "Invariant", .. }));
        assert_eq!("Luclus".parse::<Invariant>().unwrap(), Invariant::Luclus);
        assert_eq!(
            "invarient".parse::<Invariant>().unwrap(),
            Invariant::FourVectorInvariant
        );
    }

    #[test]
    fn test_zero_pt_pairs_are_at_zero_distance() {
        let m = DistanceMetric::new(Invariant::Angular, -1.0, ExponentPosition::Input, 0.4);
        let soft = particle(0.0, 1.0, 1.0);
        let hard = particle(5.0, 0.0, 0.0);
        assert_eq!(pair_distance2(&m, &soft, &hard), 0.0);
    }
}
