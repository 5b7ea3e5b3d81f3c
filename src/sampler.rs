// Sampler - one measurement cycle
//
// Invokes every metric source concurrently, each in its own task and
// bounded by its own timeout, and assembles the results into a Sample.

use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::{MetricSource, ProbeError};
use crate::session::{Readings, Sample};

/// Runs one cycle over a fixed set of sources
pub struct Sampler {
    sources: Vec<Arc<dyn MetricSource>>,

    /// Every identifier a sample must contain
    metric_ids: Vec<String>,
}

impl Sampler {
    /// Creates a sampler for the session's metric identifiers
    ///
    /// Identifiers without a source are still recorded, always as
    /// unavailable.
    pub fn new(sources: Vec<Arc<dyn MetricSource>>, metric_ids: Vec<String>) -> Self {
        Sampler { sources, metric_ids }
    }

    pub fn metric_ids(&self) -> &[String] {
        &self.metric_ids
    }

    /// Collects one Sample; never fails
    ///
    /// Waits for every source to finish or time out. A source that errors,
    /// times out or panics contributes unavailable readings only.
    pub async fn collect_one(&self) -> Sample {
        let started_at = Utc::now();

        let tasks = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let timeout = source.timeout();

            let handle = tokio::spawn(async move {
                match tokio::time::timeout(timeout, source.probe()).await {
                    Ok(result) => result,
                    Err(_) => Err(ProbeError::Timeout(timeout)),
                }
            });

            async move {
                handle
                    .await
                    .unwrap_or_else(|e| Err(ProbeError::Panicked(e.to_string())))
            }
        });

        let results = join_all(tasks).await;

        let mut readings: Readings = self.metric_ids.iter().map(|id| (id.clone(), None)).collect();

        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(values) => {
                    for (id, value) in values {
                        match readings.get_mut(&id) {
                            Some(slot) => *slot = value.filter(|v| v.is_finite()),
                            None => debug!("Source '{}' reported unregistered metric '{}'", source.name(), id),
                        }
                    }
                }
                Err(e) => {
                    warn!("Probe '{}' unavailable: {}", source.name(), e);
                }
            }
        }

        let available = readings.values().filter(|v| v.is_some()).count();
        debug!("Collected sample: {}/{} readings available", available, readings.len());

        Sample::new(started_at, readings)
    }
}
