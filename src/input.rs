//! Jet-input selection.
//!
//! Not every reconstructed particle should be clustered. A particle is a jet
//! input when it left a track or a calorimeter tower, carries more than
//! `min_pt`, and sits inside the detector acceptance `|η| < max_abs_eta`.
//!
//! The selector keeps provenance: each chosen input remembers the index of
//! the particle it came from, so leaves of a finished tree can be traced
//! back to the event record.

use crate::error::{Error, Result};
use crate::kinematics::{pseudorapidity, Kinematics};
use serde::{Deserialize, Serialize};

/// One reconstructed particle, as read from an event.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticleRecord {
    /// Measured four-momentum.
    pub kinematics: Kinematics,
    /// The particle left a track in the tracker.
    pub has_track: bool,
    /// The particle deposited in a calorimeter tower.
    pub has_tower: bool,
}

impl ParticleRecord {
    /// Create a record.
    pub fn new(kinematics: Kinematics, has_track: bool, has_tower: bool) -> Self {
        Self {
            kinematics,
            has_track,
            has_tower,
        }
    }

    /// Seen by at least one detector system.
    pub fn is_observable(&self) -> bool {
        self.has_track || self.has_tower
    }
}

/// Inputs chosen from one event.
///
/// `source_idx[i]` is the particle index that produced `inputs[i]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JetInputs {
    /// Particle index of each input.
    pub source_idx: Vec<usize>,
    /// Kinematics handed to the engine.
    pub inputs: Vec<Kinematics>,
}

impl JetInputs {
    /// Number of selected inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True when nothing passed the filters.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Observability, transverse momentum, and acceptance filters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSelector {
    /// Strict lower bound on pT.
    pub min_pt: f64,
    /// Strict upper bound on |η|.
    pub max_abs_eta: f64,
    /// Drop particles with neither a track nor a tower.
    pub require_observable: bool,
}

impl Default for InputSelector {
    fn default() -> Self {
        Self {
            min_pt: 0.5,
            max_abs_eta: 2.5,
            require_observable: true,
        }
    }
}

impl InputSelector {
    /// Selector with the default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pT threshold.
    pub fn with_min_pt(mut self, min_pt: f64) -> Self {
        self.min_pt = min_pt;
        self
    }

    /// Set the acceptance bound on |η|.
    pub fn with_max_abs_eta(mut self, max_abs_eta: f64) -> Self {
        self.max_abs_eta = max_abs_eta;
        self
    }

    /// Toggle the observability filter.
    pub fn with_require_observable(mut self, require: bool) -> Self {
        self.require_observable = require;
        self
    }

    /// Check the thresholds are usable.
    pub fn validate(&self) -> Result<()> {
        if self.min_pt.is_nan() {
            return Err(Error::InvalidParameter {
                name: "min_pt",
                message: "must not be NaN".to_string(),
            });
        }
        if self.max_abs_eta.is_nan() || self.max_abs_eta <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "max_abs_eta",
                message: format!("must be positive, got {}", self.max_abs_eta),
            });
        }
        Ok(())
    }

    /// Whether a single particle passes every filter.
    ///
    /// Pseudorapidity is derived from pT and pz, so records that store
    /// rapidity in their `rapidity` field are still cut in η.
    pub fn accepts(&self, particle: &ParticleRecord) -> bool {
        if self.require_observable && !particle.is_observable() {
            return false;
        }
        let k = &particle.kinematics;
        k.pt > self.min_pt && pseudorapidity(k.pt, k.pz).abs() < self.max_abs_eta
    }

    /// Select the jet inputs of one event, in particle order.
    pub fn select(&self, particles: &[ParticleRecord]) -> Result<JetInputs> {
        self.validate()?;
        let mut selected = JetInputs::default();
        for (idx, particle) in particles.iter().enumerate() {
            if self.accepts(particle) {
                selected.source_idx.push(idx);
                selected.inputs.push(particle.kinematics);
            }
        }
        tracing::trace!(
            particles = particles.len(),
            selected = selected.len(),
            "selected jet inputs"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(pt: f64, eta: f64, track: bool, tower: bool) -> ParticleRecord {
        let pz = pt * eta.sinh();
        let energy = (pt * pt + pz * pz).sqrt();
        ParticleRecord::new(
            Kinematics::from_momentum_pseudorapidity(pt, 0.0, pz, energy),
            track,
            tower,
        )
    }

    #[test]
    fn test_default_thresholds() {
        let selector = InputSelector::default();
        assert_eq!(selector.min_pt, 0.5);
        assert_eq!(selector.max_abs_eta, 2.5);
        assert!(selector.require_observable);
    }

    #[test]
    fn test_select_keeps_provenance() {
        let particles = [
            particle(10.0, 0.0, true, false),
            particle(0.2, 0.0, true, true), // too soft
            particle(5.0, 3.0, false, true), // outside acceptance
            particle(5.0, -1.0, false, false), // unobserved
            particle(3.0, -2.0, false, true),
        ];
        let selected = InputSelector::default().select(&particles).unwrap();
        assert_eq!(selected.source_idx, vec![0, 4]);
        assert_eq!(selected.inputs[1], particles[4].kinematics);
    }

    #[test]
    fn test_unobserved_kept_when_not_required() {
        let particles = [particle(5.0, -1.0, false, false)];
        let selector = InputSelector::new().with_require_observable(false);
        assert_eq!(selector.select(&particles).unwrap().source_idx, vec![0]);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let selector = InputSelector::new().with_min_pt(1.0);
        assert!(!selector.accepts(&particle(1.0, 0.0, true, true)));
        assert!(selector.accepts(&particle(1.0 + 1e-9, 0.0, true, true)));
    }

    #[test]
    fn test_empty_event() {
        let selected = InputSelector::default().select(&[]).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_invalid_acceptance() {
        let selector = InputSelector::new().with_max_abs_eta(0.0);
        assert!(matches!(
            selector.select(&[]),
            Err(Error::InvalidParameter { name: "max_abs_eta", .. })
        ));
    }
}
