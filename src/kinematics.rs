//! Four-momentum records.
//!
//! Every node in a merge tree carries the same seven kinematic quantities.
//! The Cartesian components (`px`, `py`, `pz`, `energy`) are the source of
//! truth when nodes are combined; `pt`, `phi` and `rapidity` are re-derived
//! from the summed four-vector rather than combined trigonometrically.
//!
//! ```text
//! pt       = sqrt(px² + py²)
//! phi      = atan2(py, px)                     in (-π, π]
//! rapidity = ½ ln((E + pz) / (E - pz))
//! eta      = asinh(pz / pt)                    (pseudorapidity)
//! ```
//!
//! # Tachyonic sums
//!
//! Summing measured momenta can produce `E² < |p|²`. The combined record is
//! kept exactly as summed (no mass correction); [`Kinematics::is_tachyonic`]
//! lets callers detect it.

use core::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Kinematics of one particle or cluster.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    /// Transverse momentum.
    pub pt: f64,
    /// Rapidity (or pseudorapidity when the collection is built from it).
    pub rapidity: f64,
    /// Azimuthal angle.
    pub phi: f64,
    /// Energy.
    pub energy: f64,
    /// Momentum along x.
    pub px: f64,
    /// Momentum along y.
    pub py: f64,
    /// Momentum along z (beam axis).
    pub pz: f64,
}

impl Kinematics {
    /// Build from Cartesian components, deriving `pt`, `phi` and rapidity.
    pub fn from_momentum(px: f64, py: f64, pz: f64, energy: f64) -> Self {
        let (pt, phi) = pt_phi(px, py);
        Self {
            pt,
            rapidity: rapidity(pz, energy),
            phi,
            energy,
            px,
            py,
            pz,
        }
    }

    /// Build from Cartesian components, storing pseudorapidity in the rapidity slot.
    pub fn from_momentum_pseudorapidity(px: f64, py: f64, pz: f64, energy: f64) -> Self {
        let (pt, phi) = pt_phi(px, py);
        Self {
            pt,
            rapidity: pseudorapidity(pt, pz),
            phi,
            energy,
            px,
            py,
            pz,
        }
    }

    /// Build from collider coordinates (`pt`, rapidity, `phi`) and energy.
    ///
    /// `pz` is taken from the rapidity definition, `pz = mT sinh(y)` with
    /// `mT = E / cosh(y)`.
    pub fn from_collider(pt: f64, rapidity: f64, phi: f64, energy: f64) -> Self {
        let phi = wrap_phi(phi);
        Self {
            pt,
            rapidity,
            phi,
            energy,
            px: pt * phi.cos(),
            py: pt * phi.sin(),
            pz: energy * rapidity.tanh(),
        }
    }

    /// Sum two records as four-vectors.
    ///
    /// `from_pseudorapidity` selects which longitudinal variable is derived
    /// for the result.
    pub fn combine(&self, other: &Self, from_pseudorapidity: bool) -> Self {
        let px = self.px + other.px;
        let py = self.py + other.py;
        let pz = self.pz + other.pz;
        let energy = self.energy + other.energy;
        if from_pseudorapidity {
            Self::from_momentum_pseudorapidity(px, py, pz, energy)
        } else {
            Self::from_momentum(px, py, pz, energy)
        }
    }

    /// Four-vector as `[px, py, pz, E]`.
    pub fn four_vector(&self) -> [f64; 4] {
        [self.px, self.py, self.pz, self.energy]
    }

    /// Three-momentum dot product.
    pub fn dot3(&self, other: &Self) -> f64 {
        self.px * other.px + self.py * other.py + self.pz * other.pz
    }

    /// Invariant mass squared, `E² - |p|²`.
    pub fn mass2(&self) -> f64 {
        self.energy * self.energy - self.dot3(self)
    }

    /// True when `E² < |p|²`.
    pub fn is_tachyonic(&self) -> bool {
        self.mass2() < 0.0
    }
}

/// Transverse momentum and azimuth from the transverse components.
pub fn pt_phi(px: f64, py: f64) -> (f64, f64) {
    (px.hypot(py), py.atan2(px))
}

/// Wrap an angle into `(-π, π]`.
pub fn wrap_phi(phi: f64) -> f64 {
    let wrapped = phi.rem_euclid(2.0 * PI);
    if wrapped > PI {
        wrapped - 2.0 * PI
    } else {
        wrapped
    }
}

/// Signed azimuthal separation, wrapped into `(-π, π]`.
pub fn delta_phi(a: f64, b: f64) -> f64 {
    wrap_phi(a - b)
}

/// Rapidity from longitudinal momentum and energy.
///
/// Returns `±inf` for records on the light cone along the beam, and 0 for an
/// all-zero record.
pub fn rapidity(pz: f64, energy: f64) -> f64 {
    let plus = energy + pz;
    let minus = energy - pz;
    if plus <= 0.0 && minus <= 0.0 {
        return 0.0;
    }
    if minus <= 0.0 {
        return f64::INFINITY;
    }
    if plus <= 0.0 {
        return f64::NEG_INFINITY;
    }
    0.5 * (plus / minus).ln()
}

/// Pseudorapidity from transverse and longitudinal momentum.
pub fn pseudorapidity(pt: f64, pz: f64) -> f64 {
    if pt == 0.0 {
        return if pz > 0.0 {
            f64::INFINITY
        } else if pz < 0.0 {
            f64::NEG_INFINITY
        } else {
            0.0
        };
    }
    (pz / pt).asinh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_phi_range() {
        assert!((wrap_phi(2.5 * PI) - 0.5 * PI).abs() < 1e-12);
        assert!((wrap_phi(-PI) - PI).abs() < 1e-12);
        assert!((wrap_phi(0.5) - 0.5).abs() < 1e-12);
        assert!((delta_phi(3.0, -3.0) - (6.0 - 2.0 * PI)).abs() < 1e-12);
    }

    #[test]
    fn test_combine_rederives_angles() {
        let a = Kinematics::from_momentum(1.0, 0.0, 0.0, 1.0);
        let b = Kinematics::from_momentum(0.0, 1.0, 0.0, 1.0);
        let c = a.combine(&b, false);
        assert!((c.pt - 2f64.sqrt()).abs() < 1e-12);
        assert!((c.phi - PI / 4.0).abs() < 1e-12);
        assert_eq!(c.rapidity, 0.0);
        assert_eq!(c.four_vector(), [1.0, 1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_rapidity_limits() {
        assert_eq!(rapidity(1.0, 1.0), f64::INFINITY);
        assert_eq!(rapidity(-1.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(rapidity(0.0, 0.0), 0.0);
        assert!((rapidity(0.5, 1.0) - 0.5 * 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_collider_round_trip() {
        let k = Kinematics::from_collider(10.0, 0.3, 1.2, 20.0);
        let back = Kinematics::from_momentum(k.px, k.py, k.pz, k.energy);
        assert!((back.pt - 10.0).abs() < 1e-9);
        assert!((back.phi - 1.2).abs() < 1e-9);
        assert!((back.rapidity - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_tachyonic_sum_is_kept() {
        let a = Kinematics::from_momentum(3.0, 0.0, 0.0, 1.0);
        let c = a.combine(&a, false);
        assert!(c.is_tachyonic());
        assert_eq!(c.energy, 2.0);
    }
}
