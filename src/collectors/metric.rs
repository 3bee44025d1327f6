//! Descriptors, samples and the sink scrapers write into.
//!
//! Scrapers never touch the Prometheus data model directly: they declare
//! [`MetricDesc`]s once, emit [`Sample`]s into a [`MetricSink`], and the
//! orchestrator folds everything it received into metric families with a
//! [`FamilyBuilder`] before handing them to the text encoder.

use anyhow::{Context, Result};
use prometheus::proto::{
    Bucket, Counter, Gauge, Histogram, LabelPair, Metric, MetricFamily, MetricType, Quantile,
    Summary, Untyped,
};
use prometheus::{Encoder, TextEncoder};
use protobuf::{EnumOrUnknown, MessageField};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Buffer size of the channel behind a [`MetricSink`].
pub const SINK_CAPACITY: usize = 1024;

/// Label values for descriptors without variable labels.
pub const NO_LABELS: [&str; 0] = [];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Gauge,
    Counter,
    Untyped,
    Histogram,
    Summary,
}

impl ValueKind {
    const fn metric_type(self) -> MetricType {
        match self {
            Self::Gauge => MetricType::GAUGE,
            Self::Counter => MetricType::COUNTER,
            Self::Untyped => MetricType::UNTYPED,
            Self::Histogram => MetricType::HISTOGRAM,
            Self::Summary => MetricType::SUMMARY,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric {name} expects {expected} label values, got {got}")]
    LabelCardinality {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("metric {name} is a {kind:?} and needs matching sample data")]
    MissingData { name: String, kind: ValueKind },

    #[error("metric sink is closed")]
    SinkClosed,
}

/// Immutable schema of one metric.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricDesc {
    fq_name: String,
    help: String,
    const_labels: Vec<(String, String)>,
    variable_labels: Vec<String>,
    kind: ValueKind,
}

impl MetricDesc {
    #[must_use]
    pub fn new(
        fq_name: impl Into<String>,
        help: impl Into<String>,
        kind: ValueKind,
        variable_labels: &[&str],
    ) -> Self {
        Self {
            fq_name: fq_name.into(),
            help: help.into(),
            const_labels: Vec::new(),
            variable_labels: variable_labels.iter().map(|l| (*l).to_string()).collect(),
            kind,
        }
    }

    #[must_use]
    pub fn with_const_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.const_labels.push((name.into(), value.into()));
        self
    }

    /// Wrap in an `Arc` so samples can share it.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[must_use]
    pub fn fq_name(&self) -> &str {
        &self.fq_name
    }

    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub fn variable_labels(&self) -> &[String] {
        &self.variable_labels
    }

    #[must_use]
    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }

    fn label_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .const_labels
            .iter()
            .map(|(k, _)| k.as_str())
            .chain(self.variable_labels.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }

    /// Same name, help, kind and label keys.
    fn same_schema(&self, other: &Self) -> bool {
        self.fq_name == other.fq_name
            && self.help == other.help
            && self.kind == other.kind
            && self.label_names() == other.label_names()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistogramData {
    pub count: u64,
    pub sum: f64,
    /// `(upper_bound, cumulative_count)` pairs, ascending.
    pub buckets: Vec<(f64, u64)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SummaryData {
    pub count: u64,
    pub sum: f64,
    /// `(quantile, value)` pairs.
    pub quantiles: Vec<(f64, f64)>,
}

/// One observation; lives only for the duration of a scrape.
#[derive(Clone, Debug)]
pub struct Sample {
    desc: Arc<MetricDesc>,
    value: f64,
    label_values: Vec<String>,
    histogram: Option<HistogramData>,
    summary: Option<SummaryData>,
}

impl Sample {
    /// Scalar sample for gauge, counter and untyped descriptors.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::LabelCardinality`] when the number of label
    /// values differs from the descriptor, and [`MetricError::MissingData`]
    /// for histogram or summary descriptors.
    pub fn new<S: AsRef<str>>(
        desc: &Arc<MetricDesc>,
        value: f64,
        label_values: &[S],
    ) -> Result<Self, MetricError> {
        if matches!(desc.kind, ValueKind::Histogram | ValueKind::Summary) {
            return Err(MetricError::MissingData {
                name: desc.fq_name.clone(),
                kind: desc.kind,
            });
        }
        Self::build(desc, value, label_values, None, None)
    }

    /// # Errors
    ///
    /// Returns [`MetricError::LabelCardinality`] or, if the descriptor is not
    /// a histogram, [`MetricError::MissingData`].
    pub fn histogram<S: AsRef<str>>(
        desc: &Arc<MetricDesc>,
        data: HistogramData,
        label_values: &[S],
    ) -> Result<Self, MetricError> {
        if desc.kind != ValueKind::Histogram {
            return Err(MetricError::MissingData {
                name: desc.fq_name.clone(),
                kind: desc.kind,
            });
        }
        Self::build(desc, data.sum, label_values, Some(data), None)
    }

    /// # Errors
    ///
    /// Returns [`MetricError::LabelCardinality`] or, if the descriptor is not
    /// a summary, [`MetricError::MissingData`].
    pub fn summary<S: AsRef<str>>(
        desc: &Arc<MetricDesc>,
        data: SummaryData,
        label_values: &[S],
    ) -> Result<Self, MetricError> {
        if desc.kind != ValueKind::Summary {
            return Err(MetricError::MissingData {
                name: desc.fq_name.clone(),
                kind: desc.kind,
            });
        }
        Self::build(desc, data.sum, label_values, None, Some(data))
    }

    fn build<S: AsRef<str>>(
        desc: &Arc<MetricDesc>,
        value: f64,
        label_values: &[S],
        histogram: Option<HistogramData>,
        summary: Option<SummaryData>,
    ) -> Result<Self, MetricError> {
        if label_values.len() != desc.variable_labels.len() {
            return Err(MetricError::LabelCardinality {
                name: desc.fq_name.clone(),
                expected: desc.variable_labels.len(),
                got: label_values.len(),
            });
        }

        Ok(Self {
            desc: Arc::clone(desc),
            value,
            label_values: label_values.iter().map(|v| v.as_ref().to_string()).collect(),
            histogram,
            summary,
        })
    }

    #[must_use]
    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    #[must_use]
    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    #[must_use]
    pub const fn histogram_data(&self) -> Option<&HistogramData> {
        self.histogram.as_ref()
    }

    /// Label value by label name, const labels included.
    #[must_use]
    pub fn label(&self, name: &str) -> Option<&str> {
        self.desc
            .variable_labels
            .iter()
            .position(|l| l == name)
            .and_then(|i| self.label_values.get(i))
            .map(String::as_str)
            .or_else(|| {
                self.desc
                    .const_labels
                    .iter()
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.as_str())
            })
    }

    fn sorted_label_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .desc
            .const_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(
                self.desc
                    .variable_labels
                    .iter()
                    .map(String::as_str)
                    .zip(self.label_values.iter().map(String::as_str)),
            )
            .collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(b.0));
        pairs
    }

    fn to_proto(&self) -> Metric {
        let mut metric = Metric::new();

        for (name, value) in self.sorted_label_pairs() {
            let mut pair = LabelPair::new();
            pair.set_name(name.to_string());
            pair.set_value(value.to_string());
            metric.label.push(pair);
        }

        match self.desc.kind {
            ValueKind::Gauge => {
                let mut gauge = Gauge::new();
                gauge.set_value(self.value);
                metric.gauge = MessageField::some(gauge);
            }
            ValueKind::Counter => {
                let mut counter = Counter::new();
                counter.set_value(self.value);
                metric.counter = MessageField::some(counter);
            }
            ValueKind::Untyped => {
                let mut untyped = Untyped::new();
                untyped.set_value(self.value);
                metric.untyped = MessageField::some(untyped);
            }
            ValueKind::Histogram => {
                let data = self.histogram.clone().unwrap_or_default();
                let mut histogram = Histogram::new();
                histogram.set_sample_count(data.count);
                histogram.set_sample_sum(data.sum);
                for (upper_bound, cumulative) in data.buckets {
                    let mut bucket = Bucket::new();
                    bucket.set_upper_bound(upper_bound);
                    bucket.set_cumulative_count(cumulative);
                    histogram.bucket.push(bucket);
                }
                metric.histogram = MessageField::some(histogram);
            }
            ValueKind::Summary => {
                let data = self.summary.clone().unwrap_or_default();
                let mut summary = Summary::new();
                summary.set_sample_count(data.count);
                summary.set_sample_sum(data.sum);
                for (q, v) in data.quantiles {
                    let mut quantile = Quantile::new();
                    quantile.set_quantile(q);
                    quantile.set_value(v);
                    summary.quantile.push(quantile);
                }
                metric.summary = MessageField::some(summary);
            }
        }

        metric
    }
}

/// Write side of the per-scrape sample channel.
///
/// Cloned into every scraper task; the orchestrator keeps the receiver.
#[derive(Clone, Debug)]
pub struct MetricSink {
    tx: mpsc::Sender<Sample>,
}

impl MetricSink {
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Sample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// # Errors
    ///
    /// Returns [`MetricError::SinkClosed`] once the receiving side is gone.
    pub async fn send(&self, sample: Sample) -> Result<(), MetricError> {
        self.tx
            .send(sample)
            .await
            .map_err(|_| MetricError::SinkClosed)
    }

    /// Build a scalar sample and send it.
    ///
    /// # Errors
    ///
    /// Propagates label cardinality errors and [`MetricError::SinkClosed`].
    pub async fn emit<S: AsRef<str>>(
        &self,
        desc: &Arc<MetricDesc>,
        value: f64,
        label_values: &[S],
    ) -> Result<(), MetricError> {
        self.send(Sample::new(desc, value, label_values)?).await
    }

    /// Send samples in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError::SinkClosed`] once the receiving side is gone.
    pub async fn send_all(&self, samples: Vec<Sample>) -> Result<(), MetricError> {
        for sample in samples {
            self.send(sample).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct FamilyEntry {
    desc: Arc<MetricDesc>,
    metrics: BTreeMap<Vec<String>, Sample>,
}

/// Groups samples into metric families, dropping anything that would make
/// the exposition invalid.
#[derive(Default)]
pub struct FamilyBuilder {
    families: BTreeMap<String, FamilyEntry>,
    dropped: usize,
}

impl FamilyBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sample. Returns `false` if it was dropped because its
    /// descriptor disagrees with an earlier one of the same name or because
    /// the same label set was already seen.
    pub fn push(&mut self, sample: Sample) -> bool {
        let name = sample.desc.fq_name.clone();

        let entry = self
            .families
            .entry(name.clone())
            .or_insert_with(|| FamilyEntry {
                desc: Arc::clone(&sample.desc),
                metrics: BTreeMap::new(),
            });

        if !entry.desc.same_schema(&sample.desc) {
            warn!(metric = %name, "dropping sample with inconsistent descriptor");
            self.dropped += 1;
            return false;
        }

        let key: Vec<String> = sample
            .sorted_label_pairs()
            .into_iter()
            .map(|(_, v)| v.to_string())
            .collect();

        if entry.metrics.contains_key(&key) {
            warn!(metric = %name, labels = ?key, "dropping duplicate sample");
            self.dropped += 1;
            return false;
        }

        entry.metrics.insert(key, sample);
        true
    }

    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.families.values().map(|f| f.metrics.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Metric families sorted by name, metrics sorted by label values.
    #[must_use]
    pub fn finish(self) -> Vec<MetricFamily> {
        self.families
            .into_iter()
            .map(|(name, entry)| {
                let mut family = MetricFamily::new();
                family.set_name(name);
                family.set_help(entry.desc.help.clone());
                family.type_ = Some(EnumOrUnknown::new(entry.desc.kind.metric_type()));
                family.metric = entry.metrics.values().map(Sample::to_proto).collect();
                family
            })
            .collect()
    }
}

/// Render families in the Prometheus text exposition format.
///
/// # Errors
///
/// Returns an error if the encoder rejects a family.
pub fn encode_text(families: &[MetricFamily]) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(families, &mut buffer)
        .context("failed to encode metric families")?;
    String::from_utf8(buffer).context("encoded metrics are not valid UTF-8")
}
