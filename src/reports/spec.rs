//! Declarative report specs.
//!
//! Operators author report shapes as JSON documents instead of code:
//!
//! ```json
//! {
//!   "title": "KV store comparison",
//!   "sections": [
//!     { "kind": "jobsTable" },
//!     { "kind": "trend", "metric": "time_op", "filter": ".*KV.*" },
//!     { "kind": "table", "metric": "time_op", "sortable": true }
//!   ]
//! }
//! ```
//!
//! Unknown `kind` values fail loading with `Malformed`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchdError, Result};
use crate::reports::{Metric, ReportConfig, Section};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSpec {
    pub title: String,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SectionSpec {
    #[serde(rename = "jobsTable")]
    JobsTable,
    #[serde(rename = "trend")]
    Trend {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    #[serde(rename = "bar")]
    Bar {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    #[serde(rename = "box")]
    BoxPlot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    #[serde(rename = "delta")]
    Delta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
    },
    #[serde(rename = "table")]
    Table {
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default)]
        sortable: bool,
    },
    #[serde(rename = "deltaTable")]
    DeltaTable {
        metric: Metric,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default)]
        sortable: bool,
    },
}

impl ReportSpec {
    pub fn load(bytes: &[u8]) -> Result<ReportSpec> {
        serde_json::from_slice(bytes).map_err(|e| BenchdError::Malformed(format!("report spec: {e}")))
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<ReportSpec> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::load(&bytes)
    }

    pub fn save_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Translate the spec into section instances on `cfg`.
    pub fn configure_report(&self, cfg: &mut ReportConfig) -> Result<()> {
        cfg.title = self.title.clone();
        for section in &self.sections {
            let section = match section {
                SectionSpec::JobsTable => Section::jobs_table(),
                SectionSpec::Trend {
                    title,
                    metric,
                    filter,
                } => Section::trend_chart(opt(title), *metric, opt(filter)),
                SectionSpec::Bar {
                    title,
                    metric,
                    filter,
                } => Section::horizontal_bar_chart(opt(title), *metric, opt(filter)),
                SectionSpec::BoxPlot {
                    title,
                    metric,
                    filter,
                } => Section::horizontal_box_chart(opt(title), *metric, opt(filter)),
                SectionSpec::Delta {
                    title,
                    metric,
                    filter,
                } => Section::horizontal_delta_chart(opt(title), *metric, opt(filter)),
                SectionSpec::Table {
                    metric,
                    filter,
                    sortable,
                } => Section::results_table(*metric, opt(filter), *sortable),
                SectionSpec::DeltaTable {
                    metric,
                    filter,
                    sortable,
                } => Section::results_delta_table(*metric, opt(filter), *sortable),
            };
            cfg.add_sections([section]);
        }
        Ok(())
    }
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}
