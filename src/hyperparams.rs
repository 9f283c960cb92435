//! Per-collection hyperparameter bookkeeping.
//!
//! A jet collection name is bound to the parameters it was first produced
//! with. Running the same name again with different parameters is a hard
//! error; the record is never overwritten.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::JetConfig;
use crate::error::{Error, Result};

const ABS_TOLERANCE: f64 = 1e-8;
const REL_TOLERANCE: f64 = 1e-5;

/// Recorded parameters, keyed by jet collection name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HyperparameterRegistry {
    records: BTreeMap<String, BTreeMap<String, Value>>,
}

impl HyperparameterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `config` under `jet_name`, or verify it against the existing record.
    pub fn check_or_record(&mut self, jet_name: &str, config: &JetConfig) -> Result<()> {
        let current = config.parameter_record();
        match self.records.get(jet_name) {
            Some(recorded) => compare_records(jet_name, recorded, &current),
            None => {
                tracing::debug!(jet_name, "recording hyperparameters");
                let _ = self.records.insert(jet_name.to_string(), current);
                Ok(())
            }
        }
    }

    /// Parameters on record for `jet_name`.
    pub fn recorded(&self, jet_name: &str) -> Option<&BTreeMap<String, Value>> {
        self.records.get(jet_name)
    }

    /// Names with a record, in sorted order.
    pub fn jet_names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Serialise the whole registry.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse {
            line: 0,
            message: e.to_string(),
        })
    }

    /// Restore a registry written by [`HyperparameterRegistry::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Parse {
            line: e.line(),
            message: e.to_string(),
        })
    }
}

fn compare_records(
    jet_name: &str,
    recorded: &BTreeMap<String, Value>,
    current: &BTreeMap<String, Value>,
) -> Result<()> {
    let mismatch = |key: &str, recorded: Option<&Value>, current: Option<&Value>| {
        let show = |v: Option<&Value>| v.map_or_else(|| "<missing>".to_string(), Value::to_string);
        Error::HyperparameterMismatch {
            jet_name: jet_name.to_string(),
            key: key.to_string(),
            recorded: show(recorded),
            current: show(current),
        }
    };
    for (key, value) in recorded {
        match current.get(key) {
            Some(now) if values_match(value, now) => {}
            now => return Err(mismatch(key, Some(value), now)),
        }
    }
    if let Some(key) = current.keys().find(|k| !recorded.contains_key(*k)) {
        return Err(mismatch(key, None, current.get(key)));
    }
    Ok(())
}

fn values_match(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => close(x, y),
        _ => a == b,
    }
}

/// `|a - b| <= atol + rtol * |b|`, with equal infinities treated as close.
fn close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= ABS_TOLERANCE + REL_TOLERANCE * b.abs()
}
