// Netsurvey - Network Quality Survey Tool
//
// Samples network quality at a site for a fixed window and renders a
// traffic-light report at the end of it.
//
// # Features
// - ICMP latency, jitter and packet loss per target
// - Download/upload throughput through an external speed-test client
// - Cellular radio signal (RSRP, RSRQ, SINR) from a modem query command
// - Crash-tolerant JSON Lines session file
// - HTML report with traffic-light grid, summary and trend charts
//
// # Usage
// netsurvey [--config <file>] [--site <name>] [--duration <secs>] [--interval <secs>]
//           [--target <host>]... [--session-file <path>] [--report-file <path>]
//           [--radio none|simulated] [--no-speedtest] [--overwrite]
// netsurvey --report-only <session-file> [--report-file <path>]
//
// Example:
// netsurvey --site "Warehouse North" --duration 86400 --interval 60 --target 1.1.1.1

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage:
  netsurvey [OPTIONS]
  netsurvey --report-only <session-file> [--report-file <path>]

Options:
  --config <file>          JSON settings file
  --site <name>            Site label shown in the report
  --duration <secs>        Measurement window in seconds
  --interval <secs>        Seconds between sampling cycles
  --target <host>          Ping target, repeatable; replaces configured targets
  --session-file <path>    Session store (JSON Lines)
  --report-file <path>     HTML report destination
  --radio none|simulated   Radio source override
  --no-speedtest           Skip throughput measurement
  --overwrite              Replace an existing session file
  --report-only <file>     Render a report from an existing session file
  -h, --help               Print this message";

// Module declarations
mod aggregator;
mod classifier;
mod config;
mod metrics;
mod report;
mod sampler;
mod scheduler;
mod session;
mod storage;

use aggregator::aggregate;
use config::{RadioSourceKind, SessionConfig};
use metrics::create_all_sources;
use sampler::Sampler;
use scheduler::SessionScheduler;
use session::{Session, SessionHeader};
use storage::SessionRecorder;

/// Application entry point
///
/// This function:
/// 1. Initializes logging
/// 2. Parses command-line arguments and loads the survey settings
/// 3. Creates the metric sources, sampler and session recorder
/// 4. Runs the collection loop until the window ends or Ctrl+C
/// 5. Aggregates the session and renders the report
#[tokio::main]
async fn main() -> Result<()> {
    // Logs are written to stdout/stderr and can be captured by systemd
    init_logging();

    let args = parse_arguments(env::args().skip(1).collect())?;
    if args.show_help {
        println!("{}", USAGE);
        return Ok(());
    }

    info!("=== Netsurvey Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config_path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load survey settings from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    args.apply_overrides(&mut config);

    if let Some(session_path) = &args.report_only {
        let session = SessionRecorder::load(session_path)
            .with_context(|| format!("Failed to load session from {}", session_path.display()))?;
        config.output.session_file = session_path.clone();
        return finish_session(&session, &config);
    }

    config.validate().context("Invalid survey settings")?;

    info!("Site: {}", config.site_name);
    info!(
        "Window: {}s, sampling every {}s",
        config.duration_secs, config.interval_secs
    );
    if config.radio.source == RadioSourceKind::Simulated {
        warn!("Radio metrics are SIMULATED; configure radio.source = \"command\" for real readings");
    }

    // Build the session pipeline
    let definitions = config.metric_definitions();
    let header = SessionHeader::new(
        &config.site_name,
        config.duration(),
        config.interval(),
        definitions,
    );
    let sources = create_all_sources(&config);
    info!("Created {} metric source(s)", sources.len());

    let sampler = Sampler::new(sources, header.metric_ids());
    let recorder = if args.overwrite {
        SessionRecorder::replace(&config.output.session_file, header)
    } else {
        SessionRecorder::create(&config.output.session_file, header)
    }
    .context("Failed to create session file")?;

    let scheduler = SessionScheduler::new(sampler, recorder, config.duration(), config.interval());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Stop requested, finishing the current cycle");
        let _ = shutdown_tx.send(true);
    });

    info!("=== Collection Started ===");
    info!("Press Ctrl+C to stop early");

    let outcome = scheduler.run(shutdown_rx).await;
    info!(
        "=== Collection Finished ({:?}, {} cycle(s)) ===",
        outcome.stop_reason, outcome.cycles
    );

    if outcome.unpersisted > 0 {
        error!(
            "{} sample(s) are missing from {}; the report still includes them",
            outcome.unpersisted,
            config.output.session_file.display()
        );
    }

    finish_session(&outcome.session, &config)
}

/// Aggregates a finished session and renders its report
fn finish_session(session: &Session, config: &SessionConfig) -> Result<()> {
    if session.is_empty() {
        warn!("Session has no samples; every metric will be reported as N/A");
    }

    let aggregates = aggregate(session);
    report::log_summary(session, &aggregates);

    if let Err(e) = report::write_report(session, &aggregates, &config.output.report_file) {
        error!("Report generation failed: {}", e);
        error!(
            "Session data is intact in {}; rerun with --report-only to retry",
            config.output.session_file.display()
        );
        return Err(e).context("Failed to render report");
    }

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                    _ = sigterm.recv() => info!("SIGTERM received"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Application configuration parsed from command-line arguments
#[derive(Debug, Default)]
struct AppConfig {
    /// JSON settings file; defaults are used when absent
    config_path: Option<PathBuf>,

    /// Render a report from this session file instead of collecting
    report_only: Option<PathBuf>,

    site: Option<String>,
    duration_secs: Option<u64>,
    interval_secs: Option<u64>,

    /// Replaces the configured ping targets when non-empty
    targets: Vec<String>,

    session_file: Option<PathBuf>,
    report_file: Option<PathBuf>,
    radio: Option<RadioSourceKind>,
    no_speedtest: bool,

    /// Replace an existing session file instead of refusing to start
    overwrite: bool,

    show_help: bool,
}

impl AppConfig {
    /// Applies command-line values on top of the loaded settings
    fn apply_overrides(&self, config: &mut SessionConfig) {
        if let Some(site) = &self.site {
            config.site_name = site.clone();
        }
        if let Some(duration) = self.duration_secs {
            config.duration_secs = duration;
        }
        if let Some(interval) = self.interval_secs {
            config.interval_secs = interval;
        }
        if !self.targets.is_empty() {
            config.ping.targets = self.targets.clone();
        }
        if let Some(path) = &self.session_file {
            config.output.session_file = path.clone();
        }
        if let Some(path) = &self.report_file {
            config.output.report_file = path.clone();
        }
        if let Some(radio) = self.radio {
            config.radio.source = radio;
        }
        if self.no_speedtest {
            config.speedtest.enabled = false;
        }
    }
}

/// Parses command-line arguments (program name excluded)
///
/// # Arguments
/// - --config <file> - JSON settings file (optional)
/// - --site <name> - Site label for the report
/// - --duration <secs> - Measurement window
/// - --interval <secs> - Sampling cadence
/// - --target <host> - Ping target, repeatable
/// - --session-file <path> / --report-file <path> - Output locations
/// - --radio none|simulated - Radio source override
/// - --no-speedtest - Skip throughput measurement
/// - --overwrite - Replace an existing session file
/// - -h, --help - Print usage
/// - --report-only <session-file> - Report on an existing session
///
/// # Returns
/// * `Ok(AppConfig)` - Successfully parsed arguments
/// * `Err(anyhow::Error)` - Unknown flag, missing or invalid value
fn parse_arguments(args: Vec<String>) -> Result<AppConfig> {
    let mut parsed = AppConfig::default();
    let mut iter = args.into_iter();

    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .with_context(|| format!("Missing value for argument: {}\n\n{}", flag, USAGE))
        };

        match flag.as_str() {
            "--config" => parsed.config_path = Some(PathBuf::from(value()?)),
            "--report-only" => parsed.report_only = Some(PathBuf::from(value()?)),
            "--site" => parsed.site = Some(value()?),
            "--duration" => {
                parsed.duration_secs = Some(value()?.parse().context("--duration expects whole seconds")?)
            }
            "--interval" => {
                parsed.interval_secs = Some(value()?.parse().context("--interval expects whole seconds")?)
            }
            "--target" => parsed.targets.push(value()?),
            "--session-file" => parsed.session_file = Some(PathBuf::from(value()?)),
            "--report-file" => parsed.report_file = Some(PathBuf::from(value()?)),
            "--radio" => {
                parsed.radio = Some(match value()?.as_str() {
                    "none" => RadioSourceKind::None,
                    "simulated" => RadioSourceKind::Simulated,
                    other => bail!(
                        "--radio expects 'none' or 'simulated' (got '{}'); use the config file for a command source",
                        other
                    ),
                })
            }
            "--no-speedtest" => parsed.no_speedtest = true,
            "--overwrite" => parsed.overwrite = true,
            "-h" | "--help" => parsed.show_help = true,
            other => bail!("Unknown argument: {}\n\n{}", other, USAGE),
        }
    }

    Ok(parsed)
}

/// Initializes the logging subsystem
///
/// Sets up structured logging with:
/// - Timestamp for each log entry
/// - Log level (INFO, WARN, ERROR, etc.)
/// - Target module name
/// - Colored output when running in terminal
/// - JSON output under systemd, or when NETSURVEY_LOG_FORMAT=json so
///   unattended multi-day surveys can be shipped to a log collector
///
/// # Log Levels
/// Default: INFO
/// Can be overridden with RUST_LOG environment variable
///
/// # Examples
/// ```bash
/// RUST_LOG=debug netsurvey ...  # Per-probe detail
/// RUST_LOG=warn netsurvey ...   # Only warnings and errors
/// ```
fn init_logging() {
    let json = use_json_logs(
        env::var("INVOCATION_ID").is_ok(),
        env::var("NETSURVEY_LOG_FORMAT").ok().as_deref(),
    );

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}

/// An explicit NETSURVEY_LOG_FORMAT wins; otherwise JSON under systemd
/// (which sets INVOCATION_ID for the services it starts)
fn use_json_logs(under_systemd: bool, format: Option<&str>) -> bool {
    match format.map(|f| f.trim().to_ascii_lowercase()) {
        Some(f) if f == "json" => true,
        Some(f) if f == "text" => false,
        _ => under_systemd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_arguments() {
        let parsed = parse_arguments(args(&[
            "--site",
            "Depot 7",
            "--duration",
            "600",
            "--target",
            "1.1.1.1",
            "--target",
            "9.9.9.9",
            "--radio",
            "none",
            "--no-speedtest",
        ]))
        .unwrap();

        let mut config = SessionConfig::default();
        parsed.apply_overrides(&mut config);

        assert_eq!(config.site_name, "Depot 7");
        assert_eq!(config.duration_secs, 600);
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.ping.targets, vec!["1.1.1.1", "9.9.9.9"]);
        assert_eq!(config.radio.source, RadioSourceKind::None);
        assert!(!config.speedtest.enabled);
    }

    #[test]
    fn test_log_format_selection() {
        assert!(!use_json_logs(false, None));
        assert!(use_json_logs(true, None));
        assert!(use_json_logs(false, Some("JSON")));
        assert!(!use_json_logs(true, Some("text")));
        assert!(use_json_logs(true, Some("pretty")));
    }

    #[test]
    fn test_help_and_overwrite_flags() {
        let parsed = parse_arguments(args(&["--overwrite", "-h"])).unwrap();
        assert!(parsed.overwrite);
        assert!(parsed.show_help);

        let parsed = parse_arguments(Vec::new()).unwrap();
        assert!(!parsed.overwrite);
        assert!(!parsed.show_help);
    }

    #[test]
    fn test_errors_include_usage() {
        let unknown = parse_arguments(args(&["--verbose"])).unwrap_err().to_string();
        assert!(unknown.contains("Unknown argument: --verbose"));
        assert!(unknown.contains("--report-only <file>"));

        let missing = parse_arguments(args(&["--site"])).unwrap_err().to_string();
        assert!(missing.contains("Missing value for argument: --site"));
        assert!(missing.contains("Usage:"));
    }

    #[test]
    fn test_parse_arguments_errors() {
        assert!(parse_arguments(args(&["--duration"])).is_err());
        assert!(parse_arguments(args(&["--interval", "five"])).is_err());
        assert!(parse_arguments(args(&["--radio", "lte"])).is_err());
        assert!(parse_arguments(args(&["--verbose"])).is_err());
    }

    #[test]
    fn test_no_overrides_keeps_settings() {
        let parsed = parse_arguments(Vec::new()).unwrap();
        let mut config = SessionConfig::default();
        parsed.apply_overrides(&mut config);

        assert_eq!(config.ping.targets, vec!["1.1.1.1", "8.8.8.8"]);
        assert!(parsed.report_only.is_none());
    }

    #[test]
    fn test_report_only_renders_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SessionConfig::default();
        config.output.session_file = dir.path().join("results.jsonl");
        config.output.report_file = dir.path().join("report.html");

        let header = SessionHeader::new(
            &config.site_name,
            config.duration(),
            config.interval(),
            config.metric_definitions(),
        );
        SessionRecorder::create(&config.output.session_file, header).unwrap();

        let session = SessionRecorder::load(&config.output.session_file).unwrap();
        finish_session(&session, &config).unwrap();

        assert!(config.output.report_file.exists());
        assert!(config.output.session_file.exists());
    }
}
