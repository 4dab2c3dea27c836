//! Backend-agnostic metrics sink.
//!
//! The transport and the checker only ever talk to [`MetricsSink`]. Label
//! keys are static, values are owned because most of them (check labels,
//! status codes) are built per request.

use std::sync::Mutex;

/// A single `key=value` metric label.
pub type Label = (&'static str, String);

/// Counters, histograms and gauges keyed by name and label set.
///
/// Implementations must not block for long and must swallow their own
/// failures: emitting a sample is a side effect of a probe, never a reason
/// for it to fail.
pub trait MetricsSink: Send + Sync {
    /// Increment the counter `name{labels}` by one.
    fn increment_counter(&self, name: &'static str, labels: &[Label]);

    /// Record a duration sample, in seconds, into histogram `name{labels}`.
    fn observe_histogram(&self, name: &'static str, labels: &[Label], seconds: f64);

    /// Set gauge `name{labels}` to `value`.
    fn set_gauge(&self, name: &'static str, labels: &[Label], value: f64);
}

/// One recorded emission.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Counter {
        name: &'static str,
        labels: Vec<Label>,
    },
    Histogram {
        name: &'static str,
        labels: Vec<Label>,
        seconds: f64,
    },
    Gauge {
        name: &'static str,
        labels: Vec<Label>,
        value: f64,
    },
}

impl Sample {
    fn name(&self) -> &'static str {
        match self {
            Sample::Counter { name, .. }
            | Sample::Histogram { name, .. }
            | Sample::Gauge { name, .. } => name,
        }
    }

    fn labels(&self) -> &[Label] {
        match self {
            Sample::Counter { labels, .. }
            | Sample::Histogram { labels, .. }
            | Sample::Gauge { labels, .. } => labels,
        }
    }

    /// True if every `(key, value)` in `wanted` is present on this sample.
    pub fn has_labels(&self, wanted: &[(&str, &str)]) -> bool {
        wanted.iter().all(|(key, value)| {
            self.labels()
                .iter()
                .any(|(k, v)| k == key && v == value)
        })
    }
}

/// In-memory sink that keeps every sample in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<Sample>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, sample: Sample) {
        // A poisoned lock still holds valid samples.
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        samples.push(sample);
    }

    /// Snapshot of everything recorded so far.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of counter increments on `name` carrying all `labels`.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> usize {
        self.samples()
            .iter()
            .filter(|s| matches!(s, Sample::Counter { .. }))
            .filter(|s| s.name() == name && s.has_labels(labels))
            .count()
    }

    /// Number of histogram observations on `name` carrying all `labels`.
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> usize {
        self.samples()
            .iter()
            .filter(|s| matches!(s, Sample::Histogram { .. }))
            .filter(|s| s.name() == name && s.has_labels(labels))
            .count()
    }

    /// Last value written to gauge `name`, if any.
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.samples().iter().rev().find_map(|s| match s {
            Sample::Gauge { name: n, value, .. } if *n == name => Some(*value),
            _ => None,
        })
    }
}

impl MetricsSink for RecordingSink {
    fn increment_counter(&self, name: &'static str, labels: &[Label]) {
        self.push(Sample::Counter {
            name,
            labels: labels.to_vec(),
        });
    }

    fn observe_histogram(&self, name: &'static str, labels: &[Label], seconds: f64) {
        self.push(Sample::Histogram {
            name,
            labels: labels.to_vec(),
            seconds,
        });
    }

    fn set_gauge(&self, name: &'static str, labels: &[Label], value: f64) {
        self.push(Sample::Gauge {
            name,
            labels: labels.to_vec(),
            value,
        });
    }
}
