//! The (job x benchmark x metric) matrix reports are rendered from.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use uuid::Uuid;

use crate::bench::{parse_results, BenchmarkRecord};
use crate::error::Result;
use crate::job::JobRecord;
use crate::queue::Client;
use crate::reports::Metric;

/// One job's results, keyed by benchmark name. Repeated lines for the same
/// name (from repetition runs) are kept as samples.
#[derive(Debug)]
pub struct Column {
    pub job: JobRecord,
    results: BTreeMap<String, Vec<BenchmarkRecord>>,
}

impl Column {
    pub fn new(job: JobRecord, records: Vec<BenchmarkRecord>) -> Self {
        let mut results: BTreeMap<String, Vec<BenchmarkRecord>> = BTreeMap::new();
        for record in records {
            results.entry(record.name.clone()).or_default().push(record);
        }
        Self { job, results }
    }

    /// Per-sample values of `metric` for `name`, in input order.
    pub fn samples(&self, name: &str, metric: Metric) -> Vec<f64> {
        self.results
            .get(name)
            .map(|records| records.iter().filter_map(|r| metric.value(r)).collect())
            .unwrap_or_default()
    }

    /// Mean of the samples; `None` when the benchmark or metric is absent.
    pub fn value(&self, name: &str, metric: Metric) -> Option<f64> {
        let samples = self.samples(name, metric);
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Display header for this column: the label, or a short id.
    pub fn label(&self) -> String {
        if !self.job.parameters.label.is_empty() {
            return self.job.parameters.label.clone();
        }
        let id = self.job.id.to_string();
        id[..8].to_string()
    }
}

/// Ordered job columns; immutable after construction.
#[derive(Debug)]
pub struct DataTable {
    columns: Vec<Column>,
}

impl DataTable {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Assemble a table directly from records and results text, in order.
    pub fn from_results(inputs: Vec<(JobRecord, String)>) -> Self {
        let columns = inputs
            .into_iter()
            .map(|(job, text)| Column::new(job, parse_results(&text)))
            .collect();
        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Union of benchmark names across columns, sorted.
    pub fn benchmark_names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for column in &self.columns {
            names.extend(column.results.keys().cloned());
        }
        names.into_iter().collect()
    }

    /// Benchmark names passing `filter`, in sorted order.
    pub fn filtered_names(&self, filter: Option<&Regex>) -> Vec<String> {
        self.benchmark_names()
            .into_iter()
            .filter(|name| filter.map_or(true, |re| re.is_match(name)))
            .collect()
    }

    /// Whether any column populates `metric`; empty panels are suppressed
    /// based on this.
    pub fn has_metric(&self, metric: Metric) -> bool {
        self.columns.iter().any(|column| {
            column
                .results
                .values()
                .flatten()
                .any(|record| metric.value(record).is_some())
        })
    }

    pub fn has_speed(&self) -> bool {
        self.has_metric(Metric::Speed)
    }

    pub fn has_throughput(&self) -> bool {
        self.has_metric(Metric::Throughput)
    }
}

/// Load each job's record and results artifact and assemble a column per
/// job, in the given order.
pub async fn create_data_table(client: &Client, job_ids: &[Uuid]) -> Result<DataTable> {
    let mut columns = Vec::with_capacity(job_ids.len());
    for id in job_ids {
        let (job, _) = client.load_job(*id).await?;
        let mut buf = Vec::new();
        client.load_results_artifact(&job, &mut buf).await?;
        let text = String::from_utf8_lossy(&buf);
        columns.push(Column::new(job, parse_results(&text)));
    }
    Ok(DataTable::new(columns))
}
