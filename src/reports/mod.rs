//! Report engine: turns a [`DataTable`] plus a report configuration into a
//! self-contained HTML document.
//!
//! Rendering is deterministic: benchmark names are iterated in sorted
//! order, job columns in submission order, chart ids come from an
//! allocator reset per render, and float formatting is canonical, so two
//! renders of the same inputs are byte-identical.

pub mod section;
pub mod spec;
pub mod table;

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::bench::BenchmarkRecord;
use crate::error::Result;

pub use section::Section;
pub use spec::{ReportSpec, SectionSpec};
pub use table::{create_data_table, Column, DataTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TimeOp,
    Speed,
    Throughput,
    OpsPerSec,
    MsgPerSec,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::TimeOp => "time/op",
            Metric::Speed => "speed",
            Metric::Throughput => "throughput",
            Metric::OpsPerSec => "ops/s",
            Metric::MsgPerSec => "msg/s",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::TimeOp => "ns/op",
            Metric::Speed => "MB/s",
            Metric::Throughput => "ops/s",
            Metric::OpsPerSec => "ops/s",
            Metric::MsgPerSec => "msg/s",
        }
    }

    /// The record field this metric reads. `Throughput` accepts whichever
    /// of ops/s and msg/s the benchmark reported.
    pub fn value(&self, record: &BenchmarkRecord) -> Option<f64> {
        match self {
            Metric::TimeOp => Some(record.ns_per_op),
            Metric::Speed => record.mb_per_sec,
            Metric::Throughput => record.ops_per_sec.or(record.msg_per_sec),
            Metric::OpsPerSec => record.ops_per_sec,
            Metric::MsgPerSec => record.msg_per_sec,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Monotonic chart id source, fresh per render so golden comparisons of
/// repeated renders line up.
pub(crate) struct ChartIds {
    next: u32,
}

impl ChartIds {
    fn new() -> Self {
        Self { next: 0 }
    }

    pub(crate) fn next(&mut self) -> String {
        self.next += 1;
        format!("chart-{}", self.next)
    }
}

#[derive(Default)]
pub struct ReportConfig {
    pub title: String,
    pub verbose: bool,
    pub(crate) sections: Vec<Section>,
}

impl ReportConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn add_sections(&mut self, sections: impl IntoIterator<Item = Section>) {
        self.sections.extend(sections);
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }
}

const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2em auto; max-width: 960px; color: #1c1e21; }
h1 { border-bottom: 2px solid #e4e6eb; padding-bottom: 0.3em; }
h2 { margin-top: 1.6em; }
table { border-collapse: collapse; width: 100%; margin: 1em 0; }
th, td { border: 1px solid #d0d3d8; padding: 4px 8px; text-align: left; font-size: 0.9em; }
th { background: #f0f2f5; }
td.num { text-align: right; font-variant-numeric: tabular-nums; }
table.sortable th { cursor: pointer; }
code { font-size: 0.85em; }
figure { margin: 1em 0; }
figcaption { font-weight: 600; margin-bottom: 0.4em; }
.legend { font-size: 0.85em; margin-top: 0.3em; }
.legend span { margin-right: 1.2em; }
.swatch { display: inline-block; width: 10px; height: 10px; margin-right: 4px; }
.status-succeeded { color: #1a7f37; }
.status-failed { color: #cf222e; }
.status-cancelled { color: #9a6700; }
"#;

const SORT_SCRIPT: &str = r#"
function sortBy(th) {
  var table = th.closest('table');
  var idx = Array.prototype.indexOf.call(th.parentNode.children, th);
  var tbody = table.tBodies[0];
  var rows = Array.prototype.slice.call(tbody.rows);
  var dir = th.dataset.dir === 'asc' ? -1 : 1;
  th.dataset.dir = dir === 1 ? 'asc' : 'desc';
  rows.sort(function (a, b) {
    var x = a.cells[idx].textContent.trim();
    var y = b.cells[idx].textContent.trim();
    var nx = parseFloat(x), ny = parseFloat(y);
    if (!isNaN(nx) && !isNaN(ny)) return (nx - ny) * dir;
    return x.localeCompare(y) * dir;
  });
  rows.forEach(function (r) { tbody.appendChild(r); });
}
"#;

/// Render the configured report over `table` into `out`.
pub fn write_report(cfg: &ReportConfig, table: &DataTable, out: &mut (dyn Write + Send)) -> Result<()> {
    let mut ids = ChartIds::new();

    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html lang=\"en\">")?;
    writeln!(out, "<head>")?;
    writeln!(out, "<meta charset=\"utf-8\">")?;
    writeln!(out, "<title>{}</title>", section::html_escape(&cfg.title))?;
    writeln!(out, "<style>{STYLE}</style>")?;
    writeln!(out, "<script>{SORT_SCRIPT}</script>")?;
    writeln!(out, "</head>")?;
    writeln!(out, "<body>")?;
    writeln!(out, "<h1>{}</h1>", section::html_escape(&cfg.title))?;

    for section in &cfg.sections {
        section.render(table, out, &mut ids)?;
    }

    writeln!(out, "</body>")?;
    writeln!(out, "</html>")?;
    Ok(())
}
