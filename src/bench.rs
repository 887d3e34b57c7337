//! Parser for textual benchmark output.
//!
//! A benchmark line is a name token prefixed `Benchmark`, an iteration
//! count, then `<value> <unit>` pairs of which `ns/op` must be present.
//! Unknown trailing units are kept in the `extra` map rather than dropped.
//! The parser is total: anything that does not match is skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One parsed benchmark line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub name: String,
    /// Iteration count.
    pub n: u64,
    pub ns_per_op: f64,
    pub mb_per_sec: Option<f64>,
    pub ops_per_sec: Option<f64>,
    pub msg_per_sec: Option<f64>,
    pub bytes_per_op: Option<u64>,
    pub allocs_per_op: Option<u64>,
    /// Unrecognized unit -> value pairs, in unit order.
    pub extra: BTreeMap<String, f64>,
}

impl std::fmt::Display for BenchmarkRecord {
    /// Canonical benchmark line; `parse_line` inverts it field for field.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {} ns/op", self.name, self.n, self.ns_per_op)?;
        if let Some(v) = self.mb_per_sec {
            write!(f, " {v} MB/s")?;
        }
        if let Some(v) = self.ops_per_sec {
            write!(f, " {v} ops/s")?;
        }
        if let Some(v) = self.msg_per_sec {
            write!(f, " {v} msg/s")?;
        }
        if let Some(v) = self.bytes_per_op {
            write!(f, " {v} B/op")?;
        }
        if let Some(v) = self.allocs_per_op {
            write!(f, " {v} allocs/op")?;
        }
        for (unit, value) in &self.extra {
            write!(f, " {value} {unit}")?;
        }
        Ok(())
    }
}

/// Parse one line. `None` for anything that is not a benchmark line.
pub fn parse_line(line: &str) -> Option<BenchmarkRecord> {
    let mut tokens = line.split_whitespace();
    let name = tokens.next()?;
    if !name.starts_with("Benchmark") {
        return None;
    }
    let n: u64 = tokens.next()?.parse().ok()?;

    let rest: Vec<&str> = tokens.collect();
    if rest.len() < 2 || rest.len() % 2 != 0 {
        return None;
    }

    let mut record = BenchmarkRecord {
        name: name.to_string(),
        n,
        ..Default::default()
    };
    let mut ns_per_op = None;
    for pair in rest.chunks(2) {
        let value: f64 = pair[0].parse().ok()?;
        match pair[1] {
            "ns/op" => ns_per_op = Some(value),
            "MB/s" => record.mb_per_sec = Some(value),
            "ops/s" => record.ops_per_sec = Some(value),
            "msg/s" => record.msg_per_sec = Some(value),
            "B/op" => record.bytes_per_op = Some(value as u64),
            "allocs/op" => record.allocs_per_op = Some(value as u64),
            unit => {
                record.extra.insert(unit.to_string(), value);
            }
        }
    }

    record.ns_per_op = ns_per_op?;
    Some(record)
}

/// Parse a whole results artifact. Never fails; skipped candidates are
/// debug-logged for the worker log.
pub fn parse_results(text: &str) -> Vec<BenchmarkRecord> {
    let mut records = Vec::new();
    for line in text.lines() {
        match parse_line(line) {
            Some(record) => records.push(record),
            None => {
                if line.trim_start().starts_with("Benchmark") {
                    tracing::debug!(line, "skipping unparseable benchmark line");
                }
            }
        }
    }
    records
}
