// Session data model
//
// A Session is the ordered record of every Sample collected during one
// measurement run, together with the settings it was collected under.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::MetricDefinition;

/// Metric identifier to reading; `None` means the probe was unavailable
pub type Readings = BTreeMap<String, Option<f64>>;

/// One measurement cycle's result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the cycle started, whole seconds
    pub timestamp: DateTime<Utc>,

    /// Every configured metric identifier is present, unavailable ones as `null`
    pub readings: Readings,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, readings: Readings) -> Self {
        Sample {
            timestamp: timestamp.trunc_subsecs(0),
            readings,
        }
    }

    /// Reading for a metric, `None` when missing or unavailable
    pub fn value(&self, metric_id: &str) -> Option<f64> {
        self.readings.get(metric_id).copied().flatten()
    }
}

/// Settings a session was collected under
///
/// Written as the first record of the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub site_name: String,
    pub started_at: DateTime<Utc>,
    pub duration_secs: u64,
    pub interval_secs: u64,
    pub metrics: Vec<MetricDefinition>,
}

impl SessionHeader {
    pub fn new(
        site_name: &str,
        duration: Duration,
        interval: Duration,
        metrics: Vec<MetricDefinition>,
    ) -> Self {
        SessionHeader {
            site_name: site_name.to_string(),
            started_at: Utc::now().trunc_subsecs(0),
            duration_secs: duration.as_secs(),
            interval_secs: interval.as_secs(),
            metrics,
        }
    }

    pub fn metric_ids(&self) -> Vec<String> {
        self.metrics.iter().map(|m| m.id.clone()).collect()
    }
}

/// A full measurement run
///
/// Samples are append-only and kept in insertion order, which is
/// chronological order.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub header: SessionHeader,
    samples: Vec<Sample>,
}

impl Session {
    pub fn new(header: SessionHeader) -> Self {
        Session {
            header,
            samples: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn metrics(&self) -> &[MetricDefinition] {
        &self.header.metrics
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time series for one metric, one entry per sample
    pub fn series(&self, metric_id: &str) -> Vec<(DateTime<Utc>, Option<f64>)> {
        self.samples
            .iter()
            .map(|s| (s.timestamp, s.value(metric_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn readings(pairs: &[(&str, Option<f64>)]) -> Readings {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_sample_truncates_to_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
            + chrono::Duration::milliseconds(750);
        let sample = Sample::new(ts, Readings::new());

        assert_eq!(sample.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_unavailable_serializes_as_null() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let sample = Sample::new(ts, readings(&[("download", Some(0.0)), ("rsrp", None)]));

        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(
            json,
            r#"{"timestamp":"2024-01-15T10:30:00Z","readings":{"download":0.0,"rsrp":null}}"#
        );

        // A legitimate zero stays distinct from an unavailable reading
        assert_eq!(sample.value("download"), Some(0.0));
        assert_eq!(sample.value("rsrp"), None);
        assert_eq!(sample.value("not-configured"), None);
    }

    #[test]
    fn test_series_keeps_insertion_order() {
        let header = SessionHeader::new("Test", Duration::from_secs(10), Duration::from_secs(5), Vec::new());
        let mut session = Session::new(header);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();

        session.push(Sample::new(t0, readings(&[("sinr", Some(12.0))])));
        session.push(Sample::new(t0 + chrono::Duration::seconds(5), readings(&[("sinr", None)])));

        let series = session.series("sinr");
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], (t0, Some(12.0)));
        assert_eq!(series[1].1, None);
    }
}
