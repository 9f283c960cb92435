//! Clustering many events with one configuration.
//!
//! The hyperparameters of a jet collection are checked against the registry
//! once, before any event is touched: a mismatch aborts the whole batch.
//! Degenerate events never abort; they are counted in [`BatchSummary`].
//!
//! With the `parallel` feature the events are clustered on rayon's pool.
//! Each worker owns its engine, and the output keeps the input order.

use crate::cluster::{ClusteringEngine, Degeneracy};
use crate::config::JetConfig;
use crate::error::Result;
use crate::hierarchy::{JetColumns, MergeTree};
use crate::hyperparams::HyperparameterRegistry;
use crate::kinematics::Kinematics;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Finished jets of one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventJets {
    /// One table per jet, in ascending root id order.
    pub jets: Vec<JetColumns>,
    /// Root id of each jet.
    pub root_ids: Vec<usize>,
    /// Eigenvalues of every spectral build, oldest first.
    pub eigenvalues: Vec<Vec<f64>>,
    /// Set when the spectral build gave up on this event.
    pub degeneracy: Option<Degeneracy>,
}

impl EventJets {
    /// Number of jets.
    pub fn len(&self) -> usize {
        self.jets.len()
    }

    /// True when the event produced no jets.
    pub fn is_empty(&self) -> bool {
        self.jets.is_empty()
    }
}

/// Counts over one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Events processed.
    pub events: usize,
    /// Events with no jet inputs.
    pub empty: usize,
    /// Events whose spectral embedding was degenerate.
    pub degenerate: usize,
    /// Jets over all events.
    pub jets: usize,
}

/// Per-event jets plus the batch summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutput {
    /// One entry per input event, in input order.
    pub events: Vec<EventJets>,
    /// Counts over the whole batch.
    pub summary: BatchSummary,
}

/// Cluster every event of a batch under `jet_name`.
///
/// # Errors
///
/// `HyperparameterMismatch` when `jet_name` was recorded with different
/// settings, and any configuration or invariant error raised by an engine.
pub fn cluster_events(
    jet_name: &str,
    config: &JetConfig,
    events: &[Vec<Kinematics>],
    registry: &mut HyperparameterRegistry,
) -> Result<BatchOutput> {
    config.validate()?;
    registry.check_or_record(jet_name, config)?;
    tracing::info!(jet_name, n_events = events.len(), "clustering batch");

    #[cfg(feature = "parallel")]
    let clustered: Result<Vec<EventJets>> = events
        .par_iter()
        .map(|inputs| cluster_event(jet_name, config, inputs))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let clustered: Result<Vec<EventJets>> = events
        .iter()
        .map(|inputs| cluster_event(jet_name, config, inputs))
        .collect();

    let events_out = clustered?;
    let mut summary = BatchSummary {
        events: events_out.len(),
        ..BatchSummary::default()
    };
    for (inputs, jets) in events.iter().zip(&events_out) {
        if inputs.is_empty() {
            summary.empty += 1;
        }
        if jets.degeneracy.is_some() {
            summary.degenerate += 1;
        }
        summary.jets += jets.len();
    }

    tracing::info!(
        jet_name,
        n_events = summary.events,
        n_jets = summary.jets,
        n_degenerate = summary.degenerate,
        "batch finished"
    );
    Ok(BatchOutput {
        events: events_out,
        summary,
    })
}

/// Run one event to completion and tabulate its jets.
pub fn cluster_event(jet_name: &str, config: &JetConfig, inputs: &[Kinematics]) -> Result<EventJets> {
    let mut engine = ClusteringEngine::new(*config, inputs)?;
    engine.run()?;
    let trees = engine.split()?;
    Ok(EventJets {
        jets: trees
            .iter()
            .map(|t| t.columns(jet_name, config.from_pseudorapidity))
            .collect(),
        root_ids: trees.iter().map(MergeTree::root_id).collect(),
        eigenvalues: engine.eigenvalues().to_vec(),
        degeneracy: engine.degeneracy().cloned(),
    })
}
