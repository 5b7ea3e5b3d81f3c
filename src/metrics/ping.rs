// ICMP ping metric source
//
// Runs the system `ping` tool against one target and reports round-trip
// latency, jitter and packet loss from its summary output.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::{run_command, MetricSource, ProbeError};
use crate::config::{jitter_id, latency_id, packet_loss_id, PingSettings};
use crate::session::Readings;

/// Latency, jitter and loss prober for a single host
///
/// # What is Collected
/// - `latency:<target>` - average round-trip time (ms)
/// - `jitter:<target>` - round-trip deviation, mdev/stddev (ms)
/// - `packet_loss:<target>` - lost echo requests (%)
///
/// # Platform Support
/// - Linux (iputils, busybox) and macOS summary formats are understood
pub struct PingProbe {
    name: String,
    target: String,
    count: u32,
    timeout: Duration,
}

/// Figures parsed from a ping summary
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PingStats {
    pub avg_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub packet_loss_pct: Option<f64>,
}

impl PingProbe {
    pub fn new(target: &str, settings: &PingSettings) -> Self {
        PingProbe {
            name: format!("ping {}", target),
            target: target.to_string(),
            count: settings.count,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn command(&self) -> Vec<String> {
        vec![
            "ping".to_string(),
            "-c".to_string(),
            self.count.to_string(),
            self.target.clone(),
        ]
    }
}

/// Parses the summary lines of `ping` output
///
/// # Example Input
/// ```text
/// 3 packets transmitted, 3 received, 0% packet loss, time 2003ms
/// rtt min/avg/max/mdev = 10.123/12.345/14.567/1.234 ms
/// ```
///
/// With total loss there is no round-trip line: loss is 100 and the
/// latency figures stay `None`.
pub fn parse_ping_output(output: &str) -> Result<PingStats, ProbeError> {
    let mut stats = PingStats::default();
    let mut found_summary = false;

    for line in output.lines() {
        let line = line.trim();

        if let Some(segment) = line.split(',').find(|s| s.contains("packet loss")) {
            found_summary = true;
            stats.packet_loss_pct = segment
                .split_whitespace()
                .next()
                .map(|token| token.trim_end_matches('%'))
                .and_then(|token| token.parse::<f64>().ok());
        }

        if line.starts_with("rtt ") || line.starts_with("round-trip ") {
            found_summary = true;
            let Some((names, values)) = line.split_once('=') else {
                continue;
            };

            let names = names.split_whitespace().last().unwrap_or_default().split('/');
            let values = values
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .split('/')
                .map(|v| v.parse::<f64>().ok());

            for (name, value) in names.zip(values) {
                match name {
                    "avg" => stats.avg_ms = value,
                    "mdev" | "stddev" => stats.jitter_ms = value,
                    _ => {}
                }
            }
        }
    }

    if !found_summary {
        return Err(ProbeError::Parse("no ping summary in output".to_string()));
    }

    Ok(stats)
}

#[async_trait]
impl MetricSource for PingProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn metric_ids(&self) -> Vec<String> {
        vec![
            latency_id(&self.target),
            jitter_id(&self.target),
            packet_loss_id(&self.target),
        ]
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self) -> Result<Readings, ProbeError> {
        // ping exits non-zero when replies are lost but still prints a summary
        let output = run_command(&self.command(), true).await?;
        let stats = parse_ping_output(&output)?;

        debug!(
            "Ping {}: avg={:?}ms, jitter={:?}ms, loss={:?}%",
            self.target, stats.avg_ms, stats.jitter_ms, stats.packet_loss_pct
        );

        let mut readings = Readings::new();
        readings.insert(latency_id(&self.target), stats.avg_ms);
        readings.insert(jitter_id(&self.target), stats.jitter_ms);
        readings.insert(packet_loss_id(&self.target), stats.packet_loss_pct);
        Ok(readings)
    }
}
