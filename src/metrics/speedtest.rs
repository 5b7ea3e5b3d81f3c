// Speed test metric source
//
// Runs an external speed-test client and reports download and upload
// throughput in Mbps.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{run_command, MetricSource, ProbeError};
use crate::config::{SpeedtestSettings, DOWNLOAD_ID, UPLOAD_ID};
use crate::session::Readings;

/// Throughput prober backed by a speed-test CLI
///
/// # Supported Output
/// - speedtest-cli `--json`: `{"download": <bits/s>, "upload": <bits/s>, ...}`
/// - Ookla `--format=json`: `{"download": {"bandwidth": <bytes/s>}, ...}`
///
/// A field missing from the report leaves that metric unavailable; it is
/// never recorded as zero.
pub struct SpeedtestProbe {
    command: Vec<String>,
    timeout: Duration,
}

impl SpeedtestProbe {
    pub fn new(settings: &SpeedtestSettings) -> Self {
        SpeedtestProbe {
            command: settings.command.clone(),
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }
}

/// Converts one direction of a speed-test report to Mbps
fn field_mbps(report: &Value, field: &str) -> Option<f64> {
    match report.get(field)? {
        Value::Number(bits_per_sec) => bits_per_sec.as_f64().map(|b| b / 1e6),
        Value::Object(detail) => detail
            .get("bandwidth")
            .and_then(Value::as_f64)
            .map(|bytes_per_sec| bytes_per_sec * 8.0 / 1e6),
        _ => None,
    }
}

/// Parses a JSON speed-test report into (download, upload) Mbps
pub fn parse_speedtest_output(output: &str) -> Result<(Option<f64>, Option<f64>), ProbeError> {
    let output = output.trim();
    if output.is_empty() {
        return Err(ProbeError::Parse("speed test produced no output".to_string()));
    }

    let report: Value = serde_json::from_str(output)
        .map_err(|e| ProbeError::Parse(format!("invalid speed test JSON: {}", e)))?;

    Ok((field_mbps(&report, "download"), field_mbps(&report, "upload")))
}

#[async_trait]
impl MetricSource for SpeedtestProbe {
    fn name(&self) -> &str {
        "speedtest"
    }

    fn metric_ids(&self) -> Vec<String> {
        vec![DOWNLOAD_ID.to_string(), UPLOAD_ID.to_string()]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self) -> Result<Readings, ProbeError> {
        let output = run_command(&self.command, false).await?;
        let (download, upload) = parse_speedtest_output(&output)?;

        debug!("Speed test: download={:?} Mbps, upload={:?} Mbps", download, upload);

        let mut readings = Readings::new();
        readings.insert(DOWNLOAD_ID.to_string(), download);
        readings.insert(UPLOAD_ID.to_string(), upload);
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_speedtest_cli() {
        let output = r#"{"download": 93456789.5, "upload": 12000000, "ping": 18.2}"#;
        let (download, upload) = parse_speedtest_output(output).unwrap();

        assert!((download.unwrap() - 93.4567895).abs() < 1e-9);
        assert_eq!(upload, Some(12.0));
    }

    #[test]
    fn test_parse_ookla_cli() {
        let output = r#"{
            "type": "result",
            "download": { "bandwidth": 6250000, "bytes": 80000000 },
            "upload": { "bandwidth": 1250000, "bytes": 15000000 }
        }"#;
        let (download, upload) = parse_speedtest_output(output).unwrap();

        assert_eq!(download, Some(50.0));
        assert_eq!(upload, Some(10.0));
    }

    #[test]
    fn test_missing_field_is_unavailable() {
        let (download, upload) = parse_speedtest_output(r#"{"download": 0}"#).unwrap();

        assert_eq!(download, Some(0.0));
        assert_eq!(upload, None);
    }

    #[test]
    fn test_empty_or_invalid_output() {
        assert!(matches!(parse_speedtest_output("  \n"), Err(ProbeError::Parse(_))));
        assert!(matches!(
            parse_speedtest_output("Retrieving speedtest.net configuration..."),
            Err(ProbeError::Parse(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_runs_command() {
        let settings = SpeedtestSettings {
            enabled: true,
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"echo '{"download": 20000000, "upload": 5000000}'"#.to_string(),
            ],
            timeout_secs: 5,
        };
        let readings = SpeedtestProbe::new(&settings).probe().await.unwrap();

        assert_eq!(readings["download"], Some(20.0));
        assert_eq!(readings["upload"], Some(5.0));
    }
}
