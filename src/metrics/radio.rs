// Cellular radio signal metric sources
//
// Reports RSRP, RSRQ and SINR. Readings come either from an operator
// supplied modem query command or from a synthetic generator used for dry
// runs when no modem is attached.

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use super::{run_command, MetricSource, ProbeError};
use crate::config::{RadioSettings, RSRP_ID, RSRQ_ID, SINR_ID};
use crate::session::Readings;

fn radio_metric_ids() -> Vec<String> {
    vec![RSRP_ID.to_string(), RSRQ_ID.to_string(), SINR_ID.to_string()]
}

/// Radio prober that runs an external modem query
///
/// The command must print one JSON object with numeric (or numeric string)
/// `rsrp`, `rsrq` and `sinr` fields; key case is ignored.
///
/// # Example Output
/// ```json
/// {"RSRP": -91, "RSRQ": "-11", "SINR": 13.5}
/// ```
pub struct CommandRadioProbe {
    command: Vec<String>,
    timeout: Duration,
}

impl CommandRadioProbe {
    pub fn new(settings: &RadioSettings) -> Self {
        CommandRadioProbe {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// Parses a modem JSON report into radio readings
pub fn parse_radio_output(output: &str) -> Result<Readings, ProbeError> {
    let report: Value = serde_json::from_str(output.trim())
        .map_err(|e| ProbeError::Parse(format!("invalid radio JSON: {}", e)))?;

    let fields = report
        .as_object()
        .ok_or_else(|| ProbeError::Parse("radio report is not a JSON object".to_string()))?;

    let lookup = |id: &str| -> Option<f64> {
        let value = fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(id))
            .map(|(_, value)| value)?;

        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };

    Ok(radio_metric_ids()
        .into_iter()
        .map(|id| {
            let value = lookup(&id);
            (id, value)
        })
        .collect())
}

#[async_trait]
impl MetricSource for CommandRadioProbe {
    fn name(&self) -> &str {
        "radio (command)"
    }

    fn metric_ids(&self) -> Vec<String> {
        radio_metric_ids()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self) -> Result<Readings, ProbeError> {
        let output = run_command(&self.command, false).await?;
        let readings = parse_radio_output(&output)?;

        debug!("Radio signal: {:?}", readings);

        Ok(readings)
    }
}

/// Synthetic radio readings for dry runs and tests
///
/// Values wander around a typical mid-quality LTE cell:
/// RSRP -90±5 dBm, RSRQ -12±2 dB, SINR 12 (-2..+3) dB.
/// Reports built from this source do not describe a real radio link.
pub struct SimulatedRadioProbe {
    rng: Mutex<SmallRng>,
}

impl SimulatedRadioProbe {
    pub fn new() -> Self {
        SimulatedRadioProbe {
            rng: Mutex::new(SmallRng::from_os_rng()),
        }
    }

    /// Deterministic generator for reproducible runs
    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        SimulatedRadioProbe {
            rng: Mutex::new(SmallRng::seed_from_u64(seed)),
        }
    }
}

impl Default for SimulatedRadioProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for SimulatedRadioProbe {
    fn name(&self) -> &str {
        "radio (simulated)"
    }

    fn metric_ids(&self) -> Vec<String> {
        radio_metric_ids()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn probe(&self) -> Result<Readings, ProbeError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|e| ProbeError::Panicked(format!("radio generator lock poisoned: {}", e)))?;

        let rsrp = -90 + rng.random_range(-5..=5);
        let rsrq = -12 + rng.random_range(-2..=2);
        let sinr = 12 + rng.random_range(-2..=3);

        let mut readings = Readings::new();
        readings.insert(RSRP_ID.to_string(), Some(f64::from(rsrp)));
        readings.insert(RSRQ_ID.to_string(), Some(f64::from(rsrq)));
        readings.insert(SINR_ID.to_string(), Some(f64::from(sinr)));
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_case_and_strings() {
        let readings = parse_radio_output(r#"{"RSRP": -91, "rsrq": "-11", "Sinr": 13.5, "band": 20}"#).unwrap();

        assert_eq!(readings["rsrp"], Some(-91.0));
        assert_eq!(readings["rsrq"], Some(-11.0));
        assert_eq!(readings["sinr"], Some(13.5));
        assert_eq!(readings.len(), 3);
    }

    #[test]
    fn test_parse_missing_field() {
        let readings = parse_radio_output(r#"{"rsrp": -101, "sinr": "n/a"}"#).unwrap();

        assert_eq!(readings["rsrp"], Some(-101.0));
        assert_eq!(readings["rsrq"], None);
        assert_eq!(readings["sinr"], None);
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(parse_radio_output("[1, 2, 3]").is_err());
        assert!(parse_radio_output("AT+QCSQ ERROR").is_err());
    }

    #[tokio::test]
    async fn test_simulated_ranges() {
        let probe = SimulatedRadioProbe::with_seed(7);

        for _ in 0..50 {
            let readings = probe.probe().await.unwrap();
            let rsrp = readings["rsrp"].unwrap();
            let rsrq = readings["rsrq"].unwrap();
            let sinr = readings["sinr"].unwrap();

            assert!((-95.0..=-85.0).contains(&rsrp));
            assert!((-14.0..=-10.0).contains(&rsrq));
            assert!((10.0..=15.0).contains(&sinr));
        }
    }
}
