// Report module - renders the end-of-session survey report
//
// The reporter only consumes a finished Session and the aggregator's
// results; it never aggregates or classifies on its own.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use crate::aggregator::AggregateResult;
use crate::session::Session;

mod html;

/// Errors that can occur while rendering or writing the report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to encode chart data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Per-metric aggregates keyed by metric identifier
pub type Aggregates = BTreeMap<String, AggregateResult>;

/// Renders the HTML report and writes it to `path`
///
/// The document is written next to its destination and renamed into
/// place, so a failed render never leaves a half-written report behind.
/// The session file is not touched.
pub fn write_report(session: &Session, aggregates: &Aggregates, path: &Path) -> Result<(), ReportError> {
    let document = html::render(session, aggregates)?;

    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    fs::write(&staging, document).map_err(write_err)?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(write_err(e));
    }

    info!("HTML report written to: {}", path.display());
    Ok(())
}

/// Executive summary lines restating every average
pub fn narrative(session: &Session, aggregates: &Aggregates) -> Vec<String> {
    let mut lines = vec![format!(
        "During this test period of {} sample(s), the network performance at {} showed:",
        session.len(),
        session.header.site_name
    )];

    for definition in session.metrics() {
        let value = aggregates
            .get(&definition.id)
            .and_then(|r| r.mean)
            .map(|mean| format!("{:.2} {}", mean, definition.unit).trim_end().to_string())
            .unwrap_or_else(|| "N/A (no data)".to_string());

        lines.push(format!("Average {}: {}", definition.label, value));
    }

    lines
}

/// Logs the traffic-light summary, one line per metric
pub fn log_summary(session: &Session, aggregates: &Aggregates) {
    info!("=== Traffic Light Summary: {} ===", session.header.site_name);

    for definition in session.metrics() {
        if let Some(result) = aggregates.get(&definition.id) {
            info!(
                "  [{:<6}] {:<28} {:>10}  ({} of {} readings)",
                result.tier.label(),
                definition.display_name(),
                result.formatted_mean(),
                result.present,
                result.present + result.missing
            );
        }
    }
}
