use std::sync::{Arc, Mutex};

use nightdag::metrics::{MetricsSink, Tags};

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: f64,
    pub tags: Tags,
}

impl MetricRecord {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Metrics sink that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    records: Arc<Mutex<Vec<MetricRecord>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<MetricRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<MetricRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }
}

impl MetricsSink for RecordingMetrics {
    fn report(&self, name: &str, value: f64, tags: &Tags) {
        self.records.lock().unwrap().push(MetricRecord {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
    }
}
