// Aggregator - session-level summary statistics
//
// Computes, per metric, the mean of all present readings and resolves the
// session-level tier through the classifier.

use std::collections::BTreeMap;

use crate::classifier::{classify, Tier};
use crate::session::Session;

/// Summary of one metric over a whole session
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub metric_id: String,

    /// Arithmetic mean of present readings; `None` when there are none
    pub mean: Option<f64>,

    pub min: Option<f64>,
    pub max: Option<f64>,

    /// Samples with a reading for this metric
    pub present: usize,

    /// Samples where the probe was unavailable
    pub missing: usize,

    pub tier: Tier,
}

impl AggregateResult {
    /// Mean with two decimals, or "N/A"
    pub fn formatted_mean(&self) -> String {
        match self.mean {
            Some(mean) => format!("{:.2}", mean),
            None => "N/A".to_string(),
        }
    }
}

/// Aggregates every metric defined for the session
///
/// Deterministic and independent of sample order: the mean is sum over
/// count, and min/max are order-free.
pub fn aggregate(session: &Session) -> BTreeMap<String, AggregateResult> {
    session
        .metrics()
        .iter()
        .map(|definition| {
            let mut sum = 0.0;
            let mut present = 0usize;
            let mut min: Option<f64> = None;
            let mut max: Option<f64> = None;

            for value in session.samples().iter().filter_map(|s| s.value(&definition.id)) {
                sum += value;
                present += 1;
                min = Some(min.map_or(value, |m| m.min(value)));
                max = Some(max.map_or(value, |m| m.max(value)));
            }

            let mean = if present > 0 {
                Some(sum / present as f64)
            } else {
                None
            };

            let result = AggregateResult {
                metric_id: definition.id.clone(),
                mean,
                min,
                max,
                present,
                missing: session.len() - present,
                tier: classify(definition, mean),
            };

            (definition.id.clone(), result)
        })
        .collect()
}
