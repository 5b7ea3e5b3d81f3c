// Classifier - traffic-light health tiers
//
// Maps an aggregated metric value to a tier using the metric's own
// thresholds and declared direction.

use crate::config::{Direction, MetricDefinition};

/// Health level of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Green,
    Yellow,
    Red,
    /// No value to classify
    Unavailable,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Green => "Good",
            Tier::Yellow => "Fair",
            Tier::Red => "Poor",
            Tier::Unavailable => "N/A",
        }
    }

    /// Traffic-light colour as a CSS hex string
    pub fn color(&self) -> &'static str {
        match self {
            Tier::Green => "#00c800",
            Tier::Yellow => "#ffc800",
            Tier::Red => "#c80000",
            Tier::Unavailable => "#808080",
        }
    }
}

/// Classifies a value against a metric definition
///
/// Higher-is-better metrics treat thresholds as floors, lower-is-better
/// metrics as ceilings. Boundary values belong to the healthier tier.
/// A missing or NaN value is `Unavailable`.
pub fn classify(definition: &MetricDefinition, value: Option<f64>) -> Tier {
    let value = match value {
        Some(v) if !v.is_nan() => v,
        _ => return Tier::Unavailable,
    };
    let t = definition.thresholds;

    match definition.direction {
        Direction::HigherIsBetter => {
            if value >= t.green {
                Tier::Green
            } else if value >= t.yellow {
                Tier::Yellow
            } else {
                Tier::Red
            }
        }
        Direction::LowerIsBetter => {
            if value <= t.green {
                Tier::Green
            } else if value <= t.yellow {
                Tier::Yellow
            } else {
                Tier::Red
            }
        }
    }
}
