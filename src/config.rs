// Configuration module - survey settings and per-metric definitions
//
// This module is responsible for:
// 1. Loading the survey settings from a JSON file (or using the defaults)
// 2. Applying command-line overrides
// 3. Validating the settings before a session starts
// 4. Deriving the immutable list of MetricDefinitions the session measures

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Whether a larger value is healthier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    HigherIsBetter,
    LowerIsBetter,
}

/// Tier boundaries for one metric
///
/// For `HigherIsBetter` metrics these are floors (`green >= yellow`),
/// for `LowerIsBetter` metrics they are ceilings (`green <= yellow`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub green: f64,
    pub yellow: f64,
}

impl Thresholds {
    pub const fn new(green: f64, yellow: f64) -> Self {
        Thresholds { green, yellow }
    }

    fn is_ordered_for(&self, direction: Direction) -> bool {
        match direction {
            Direction::HigherIsBetter => self.green >= self.yellow,
            Direction::LowerIsBetter => self.green <= self.yellow,
        }
    }
}

/// Chart a metric is plotted on in the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricGroup {
    Throughput,
    Radio,
    VoipQuality,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 3] = [
        MetricGroup::Throughput,
        MetricGroup::Radio,
        MetricGroup::VoipQuality,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            MetricGroup::Throughput => "Throughput",
            MetricGroup::Radio => "Radio Signal",
            MetricGroup::VoipQuality => "VoIP Quality",
        }
    }
}

/// Static description of one measured metric
///
/// Definitions are built once from `SessionConfig` and stored in the
/// session header, so a persisted session can be reported on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Reading key, e.g. "latency:1.1.1.1", "download", "rsrp"
    pub id: String,
    pub label: String,
    pub unit: String,
    pub direction: Direction,
    pub thresholds: Thresholds,
    pub group: MetricGroup,
    pub description: String,
}

impl MetricDefinition {
    /// Label with unit, as shown in the traffic-light grid
    pub fn display_name(&self) -> String {
        if self.unit.is_empty() {
            self.label.clone()
        } else {
            format!("{} ({})", self.label, self.unit)
        }
    }
}

/// Identifier of the latency metric for a ping target
pub fn latency_id(target: &str) -> String {
    format!("latency:{}", target)
}

/// Identifier of the jitter metric for a ping target
pub fn jitter_id(target: &str) -> String {
    format!("jitter:{}", target)
}

/// Identifier of the packet-loss metric for a ping target
pub fn packet_loss_id(target: &str) -> String {
    format!("packet_loss:{}", target)
}

/// Longest window or interval accepted, ten years in seconds
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

pub const DOWNLOAD_ID: &str = "download";
pub const UPLOAD_ID: &str = "upload";
pub const RSRP_ID: &str = "rsrp";
pub const RSRQ_ID: &str = "rsrq";
pub const SINR_ID: &str = "sinr";

/// Complete survey configuration
///
/// # Example File
/// ```json
/// {
///   "site_name": "Warehouse North",
///   "duration_secs": 86400,
///   "interval_secs": 60,
///   "ping": { "targets": ["1.1.1.1", "8.8.8.8"], "count": 3, "timeout_secs": 10 },
///   "speedtest": { "enabled": true, "command": ["speedtest", "--json"], "timeout_secs": 30 },
///   "radio": { "source": "command", "command": ["modem-signal", "--json"], "timeout_secs": 5 },
///   "output": { "session_file": "results.jsonl", "report_file": "report.html" }
/// }
/// ```
///
/// Missing fields take their default values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Site label shown in the report title
    pub site_name: String,

    /// Total measurement window in seconds
    pub duration_secs: u64,

    /// Time between the starts of two sampling cycles, in seconds
    pub interval_secs: u64,

    pub ping: PingSettings,
    pub speedtest: SpeedtestSettings,
    pub radio: RadioSettings,
    pub thresholds: ThresholdSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PingSettings {
    /// Hosts probed independently each cycle
    pub targets: Vec<String>,

    /// Echo requests per probe
    pub count: u32,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedtestSettings {
    pub enabled: bool,

    /// Program and arguments; must print a JSON report on stdout
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

/// How radio signal readings are acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioSourceKind {
    /// No radio metrics are measured
    None,
    /// Synthetic readings around typical LTE values, for dry runs
    Simulated,
    /// An external command printing `{"rsrp": .., "rsrq": .., "sinr": ..}`
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioSettings {
    pub source: RadioSourceKind,

    /// Used when `source` is `command`
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdSettings {
    pub download: Thresholds,
    pub upload: Thresholds,
    pub latency: Thresholds,
    pub jitter: Thresholds,
    pub packet_loss: Thresholds,
    pub rsrp: Thresholds,
    pub rsrq: Thresholds,
    pub sinr: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub session_file: PathBuf,
    pub report_file: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            site_name: "Test Site".to_string(),
            duration_secs: 30,
            interval_secs: 5,
            ping: PingSettings::default(),
            speedtest: SpeedtestSettings::default(),
            radio: RadioSettings::default(),
            thresholds: ThresholdSettings::default(),
            output: OutputSettings::default(),
        }
    }
}

impl Default for PingSettings {
    fn default() -> Self {
        PingSettings {
            targets: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            count: 3,
            timeout_secs: 10,
        }
    }
}

impl Default for SpeedtestSettings {
    fn default() -> Self {
        SpeedtestSettings {
            enabled: true,
            command: vec!["speedtest".to_string(), "--json".to_string()],
            timeout_secs: 30,
        }
    }
}

impl Default for RadioSettings {
    fn default() -> Self {
        RadioSettings {
            source: RadioSourceKind::Simulated,
            command: Vec::new(),
            timeout_secs: 5,
        }
    }
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        ThresholdSettings {
            download: Thresholds::new(50.0, 20.0),
            upload: Thresholds::new(20.0, 10.0),
            latency: Thresholds::new(50.0, 100.0),
            jitter: Thresholds::new(10.0, 30.0),
            packet_loss: Thresholds::new(1.0, 3.0),
            rsrp: Thresholds::new(-85.0, -100.0),
            rsrq: Thresholds::new(-10.0, -15.0),
            sinr: Thresholds::new(15.0, 10.0),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        OutputSettings {
            session_file: PathBuf::from("results.jsonl"),
            report_file: PathBuf::from("network_survey_report.html"),
        }
    }
}

impl SessionConfig {
    /// Loads settings from a JSON file
    ///
    /// # Returns
    /// * `Ok(SessionConfig)` - Parsed settings (not yet validated)
    /// * `Err(ConfigError)` - File unreadable or not valid JSON
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading survey settings from {}", path.display());

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: SessionConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Checks the settings for values the collection loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::InvalidSettings(
                "interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.duration_secs > MAX_WINDOW_SECS || self.interval_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::InvalidSettings(format!(
                "duration_secs and interval_secs must not exceed {} (ten years)",
                MAX_WINDOW_SECS
            )));
        }

        if !self.ping.targets.is_empty() && self.ping.count == 0 {
            return Err(ConfigError::InvalidSettings(
                "ping.count must be greater than zero".to_string(),
            ));
        }

        if self.ping.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::InvalidSettings(
                "ping.targets must not contain empty host names".to_string(),
            ));
        }

        if self.speedtest.enabled && self.speedtest.command.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "speedtest.command must not be empty when the speed test is enabled".to_string(),
            ));
        }

        if self.radio.source == RadioSourceKind::Command && self.radio.command.is_empty() {
            return Err(ConfigError::InvalidSettings(
                "radio.command must not be empty when radio.source is \"command\"".to_string(),
            ));
        }

        for definition in self.metric_definitions() {
            if !definition.thresholds.is_ordered_for(definition.direction) {
                return Err(ConfigError::InvalidSettings(format!(
                    "thresholds for '{}' are out of order (green {}, yellow {})",
                    definition.id, definition.thresholds.green, definition.thresholds.yellow
                )));
            }
        }

        Ok(())
    }

    /// Builds the definitions of every metric this configuration measures
    ///
    /// Order is the report order: throughput, then per-target VoIP
    /// quality, then radio signal.
    pub fn metric_definitions(&self) -> Vec<MetricDefinition> {
        let t = &self.thresholds;
        let mut definitions = Vec::new();

        if self.speedtest.enabled {
            definitions.push(MetricDefinition {
                id: DOWNLOAD_ID.to_string(),
                label: "Download".to_string(),
                unit: "Mbps".to_string(),
                direction: Direction::HigherIsBetter,
                thresholds: t.download,
                group: MetricGroup::Throughput,
                description: "Speed at which data is received. Higher = smoother downloads & streaming.".to_string(),
            });
            definitions.push(MetricDefinition {
                id: UPLOAD_ID.to_string(),
                label: "Upload".to_string(),
                unit: "Mbps".to_string(),
                direction: Direction::HigherIsBetter,
                thresholds: t.upload,
                group: MetricGroup::Throughput,
                description: "Speed at which data is sent. Higher = faster uploads, cloud backup and VoIP upstream.".to_string(),
            });
        }

        for target in &self.ping.targets {
            definitions.push(MetricDefinition {
                id: latency_id(target),
                label: format!("Latency {}", target),
                unit: "ms".to_string(),
                direction: Direction::LowerIsBetter,
                thresholds: t.latency,
                group: MetricGroup::VoipQuality,
                description: "Time for a packet round-trip. Lower = better for VoIP & real-time apps.".to_string(),
            });
            definitions.push(MetricDefinition {
                id: jitter_id(target),
                label: format!("Jitter {}", target),
                unit: "ms".to_string(),
                direction: Direction::LowerIsBetter,
                thresholds: t.jitter,
                group: MetricGroup::VoipQuality,
                description: "Variability in latency. Lower = smoother VoIP calls.".to_string(),
            });
            definitions.push(MetricDefinition {
                id: packet_loss_id(target),
                label: format!("Packet Loss {}", target),
                unit: "%".to_string(),
                direction: Direction::LowerIsBetter,
                thresholds: t.packet_loss,
                group: MetricGroup::VoipQuality,
                description: "Percentage of lost packets. Lower = fewer dropped VoIP calls.".to_string(),
            });
        }

        if self.radio.source != RadioSourceKind::None {
            definitions.push(MetricDefinition {
                id: RSRP_ID.to_string(),
                label: "RSRP".to_string(),
                unit: "dBm".to_string(),
                direction: Direction::HigherIsBetter,
                thresholds: t.rsrp,
                group: MetricGroup::Radio,
                description: "Strength of the 4G LTE signal. Higher (less negative) = stronger connection.".to_string(),
            });
            definitions.push(MetricDefinition {
                id: RSRQ_ID.to_string(),
                label: "RSRQ".to_string(),
                unit: "dB".to_string(),
                direction: Direction::HigherIsBetter,
                thresholds: t.rsrq,
                group: MetricGroup::Radio,
                description: "Quality of the LTE signal relative to noise and interference. Higher (less negative) = more stable.".to_string(),
            });
            definitions.push(MetricDefinition {
                id: SINR_ID.to_string(),
                label: "SINR".to_string(),
                unit: "dB".to_string(),
                direction: Direction::HigherIsBetter,
                thresholds: t.sinr,
                group: MetricGroup::Radio,
                description: "Signal-to-interference-plus-noise ratio. Higher = more stable LTE performance.".to_string(),
            });
        }

        definitions
    }
}
