// Metrics module - defines the pluggable architecture for metric sources
//
// This module provides the core trait that every probe implements, enabling
// new measurement mechanisms without modifying the sampler or the loop.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::{RadioSourceKind, SessionConfig};
use crate::session::Readings;

pub mod ping;
pub mod radio;
pub mod speedtest;

/// Reasons a probe produced no readings
///
/// Never escapes the sampler: every variant becomes unavailable readings.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("unexpected probe output: {0}")]
    Parse(String),

    #[error("probe task failed: {0}")]
    Panicked(String),
}

/// Core trait that all metric sources must implement.
///
/// A source owns one or more metric identifiers and produces a reading for
/// each per invocation. Sources are shared across concurrent probe tasks,
/// so they must be `Send + Sync`.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Human-readable name used in logs, e.g. "ping 1.1.1.1"
    fn name(&self) -> &str;

    /// Identifiers this source reports; fixed for the source's lifetime
    fn metric_ids(&self) -> Vec<String>;

    /// Upper bound the sampler allows for one invocation
    fn timeout(&self) -> Duration;

    /// Takes one measurement.
    ///
    /// Identifiers absent from the returned map, or mapped to `None`, are
    /// recorded as unavailable.
    async fn probe(&self) -> Result<Readings, ProbeError>;
}

/// Creates every source the configuration enables.
pub fn create_all_sources(config: &SessionConfig) -> Vec<Arc<dyn MetricSource>> {
    let mut sources: Vec<Arc<dyn MetricSource>> = Vec::new();

    // Throughput via an external speed-test client
    if config.speedtest.enabled {
        sources.push(Arc::new(speedtest::SpeedtestProbe::new(&config.speedtest)));
    }

    // One independent latency/jitter/loss prober per target
    for target in &config.ping.targets {
        sources.push(Arc::new(ping::PingProbe::new(target, &config.ping)));
    }

    // Radio signal quality
    match config.radio.source {
        RadioSourceKind::None => {}
        RadioSourceKind::Simulated => {
            sources.push(Arc::new(radio::SimulatedRadioProbe::new()));
        }
        RadioSourceKind::Command => {
            sources.push(Arc::new(radio::CommandRadioProbe::new(&config.radio)));
        }
    }

    sources
}

/// Runs a command to completion and returns its stdout
///
/// The child is killed if the returned future is dropped, which is what
/// happens when the sampler's timeout fires. When `allow_failure` is set a
/// non-zero exit still yields stdout, since some tools (ping) report
/// partial results that way.
pub(crate) async fn run_command(argv: &[String], allow_failure: bool) -> Result<String, ProbeError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ProbeError::Parse("empty command".to_string()))?;

    debug!("Running probe command: {}", argv.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ProbeError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    if !output.status.success() && !(allow_failure && !stdout.trim().is_empty()) {
        return Err(ProbeError::ExitStatus {
            program: program.clone(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_all_sources_follows_config() {
        let config = SessionConfig::default();
        let sources = create_all_sources(&config);

        let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["speedtest", "ping 1.1.1.1", "ping 8.8.8.8", "radio (simulated)"]);

        // Every configured metric is owned by exactly one source
        let mut owned: Vec<String> = sources.iter().flat_map(|s| s.metric_ids()).collect();
        let mut defined: Vec<String> = config.metric_definitions().into_iter().map(|d| d.id).collect();
        owned.sort();
        defined.sort();
        assert_eq!(owned, defined);
    }

    #[tokio::test]
    async fn test_run_command_missing_program() {
        let argv = vec!["netsurvey-definitely-not-installed".to_string()];
        let result = run_command(&argv, false).await;

        assert!(matches!(result, Err(ProbeError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_run_command_empty() {
        assert!(matches!(run_command(&[], false).await, Err(ProbeError::Parse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_exit_status() {
        let failing = vec!["sh".to_string(), "-c".to_string(), "echo partial; exit 1".to_string()];

        assert!(matches!(
            run_command(&failing, false).await,
            Err(ProbeError::ExitStatus { .. })
        ));
        assert_eq!(run_command(&failing, true).await.unwrap().trim(), "partial");
    }
}
