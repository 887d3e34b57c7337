//! Report sections and their HTML/SVG rendering.
//!
//! Charts are drawn server-side as inline SVG so the emitted document has
//! no external references and renders identically everywhere.

use std::io::Write;

use regex::Regex;

use crate::error::{BenchdError, Result};
use crate::reports::table::DataTable;
use crate::reports::{ChartIds, Metric};

const COLORS: [&str; 8] = [
    "#4c78a8", "#f58518", "#54a24b", "#e45756", "#72b7b2", "#b279a2", "#eeca3b", "#9d755d",
];

/// A renderable unit of a report. Metric-keyed sections suppress themselves
/// when no column carries the metric; delta sections require exactly two
/// job columns.
pub enum Section {
    JobsTable,
    ResultsTable {
        metric: Metric,
        filter: String,
        sortable: bool,
    },
    ResultsDeltaTable {
        metric: Metric,
        filter: String,
        sortable: bool,
    },
    TrendChart {
        title: String,
        metric: Metric,
        filter: String,
    },
    HorizontalBarChart {
        title: String,
        metric: Metric,
        filter: String,
    },
    HorizontalBoxChart {
        title: String,
        metric: Metric,
        filter: String,
    },
    HorizontalDeltaChart {
        title: String,
        metric: Metric,
        filter: String,
    },
}

impl Section {
    pub fn jobs_table() -> Section {
        Section::JobsTable
    }

    pub fn results_table(metric: Metric, filter: &str, sortable: bool) -> Section {
        Section::ResultsTable {
            metric,
            filter: filter.to_string(),
            sortable,
        }
    }

    pub fn results_delta_table(metric: Metric, filter: &str, sortable: bool) -> Section {
        Section::ResultsDeltaTable {
            metric,
            filter: filter.to_string(),
            sortable,
        }
    }

    pub fn trend_chart(title: &str, metric: Metric, filter: &str) -> Section {
        Section::TrendChart {
            title: title.to_string(),
            metric,
            filter: filter.to_string(),
        }
    }

    pub fn horizontal_bar_chart(title: &str, metric: Metric, filter: &str) -> Section {
        Section::HorizontalBarChart {
            title: title.to_string(),
            metric,
            filter: filter.to_string(),
        }
    }

    pub fn horizontal_box_chart(title: &str, metric: Metric, filter: &str) -> Section {
        Section::HorizontalBoxChart {
            title: title.to_string(),
            metric,
            filter: filter.to_string(),
        }
    }

    pub fn horizontal_delta_chart(title: &str, metric: Metric, filter: &str) -> Section {
        Section::HorizontalDeltaChart {
            title: title.to_string(),
            metric,
            filter: filter.to_string(),
        }
    }

    pub(crate) fn render(
        &self,
        table: &DataTable,
        out: &mut (dyn Write + Send),
        ids: &mut ChartIds,
    ) -> Result<()> {
        match self {
            Section::JobsTable => render_jobs_table(table, out),
            Section::ResultsTable {
                metric,
                filter,
                sortable,
            } => render_results_table(table, out, *metric, filter, *sortable),
            Section::ResultsDeltaTable {
                metric,
                filter,
                sortable,
            } => render_results_delta_table(table, out, *metric, filter, *sortable),
            Section::TrendChart {
                title,
                metric,
                filter,
            } => render_trend_chart(table, out, ids, title, *metric, filter),
            Section::HorizontalBarChart {
                title,
                metric,
                filter,
            } => render_horizontal_bars(table, out, ids, title, *metric, filter, false),
            Section::HorizontalBoxChart {
                title,
                metric,
                filter,
            } => render_horizontal_bars(table, out, ids, title, *metric, filter, true),
            Section::HorizontalDeltaChart {
                title,
                metric,
                filter,
            } => render_horizontal_delta_chart(table, out, ids, title, *metric, filter),
        }
    }
}

pub(crate) fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Canonical value formatting: integral values print without a decimal
/// point, others with at most four decimals, trailing zeros trimmed.
pub(crate) fn fmt_value(v: f64) -> String {
    if !v.is_finite() {
        return String::new();
    }
    if v == v.trunc() && v.abs() < 1e15 {
        return format!("{}", v.trunc() as i64);
    }
    let s = format!("{v:.4}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn fmt_delta(delta: f64) -> String {
    format!("{:+.2}%", delta * 100.0)
}

fn fmt_coord(v: f64) -> String {
    format!("{v:.1}")
}

fn fmt_duration(d: chrono::Duration) -> String {
    let secs = d.num_seconds().max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m{s:02}s")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

fn compile_filter(filter: &str) -> Result<Option<Regex>> {
    if filter.is_empty() {
        return Ok(None);
    }
    Regex::new(filter)
        .map(Some)
        .map_err(|e| BenchdError::Malformed(format!("benchmark filter {filter:?}: {e}")))
}

fn require_two_columns(table: &DataTable, what: &str) -> Result<()> {
    let n = table.columns().len();
    if n != 2 {
        return Err(BenchdError::IllegalState(format!(
            "{what} requires exactly two job columns, got {n}"
        )));
    }
    Ok(())
}

fn chart_title(title: &str, metric: Metric) -> String {
    if title.is_empty() {
        format!("{} ({})", metric.label(), metric.unit())
    } else {
        title.to_string()
    }
}

fn render_jobs_table(table: &DataTable, out: &mut (dyn Write + Send)) -> Result<()> {
    writeln!(out, "<section>")?;
    writeln!(out, "<h2>Jobs</h2>")?;
    writeln!(out, "<table class=\"jobs\">")?;
    writeln!(
        out,
        "<thead><tr><th>Job</th><th>Ref</th><th>Label</th><th>Status</th><th>Duration</th></tr></thead>"
    )?;
    writeln!(out, "<tbody>")?;
    for column in table.columns() {
        let job = &column.job;
        let duration = job.duration().map(fmt_duration).unwrap_or_default();
        writeln!(
            out,
            "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td class=\"status-{}\">{}</td><td>{}</td></tr>",
            job.id,
            html_escape(&job.parameters.git_ref),
            html_escape(&job.parameters.label),
            job.status,
            job.status,
            duration,
        )?;
    }
    writeln!(out, "</tbody>")?;
    writeln!(out, "</table>")?;
    writeln!(out, "</section>")?;
    Ok(())
}

fn open_results_table(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    metric: Metric,
    sortable: bool,
    value_header: impl Fn(usize, &str) -> String,
) -> Result<()> {
    let class = if sortable { "results sortable" } else { "results" };
    writeln!(out, "<section>")?;
    writeln!(
        out,
        "<h2>{} ({})</h2>",
        html_escape(metric.label()),
        metric.unit()
    )?;
    writeln!(out, "<table class=\"{class}\">")?;
    let th = |label: &str| {
        if sortable {
            format!("<th onclick=\"sortBy(this)\">{label}</th>")
        } else {
            format!("<th>{label}</th>")
        }
    };
    let mut header = String::from("<thead><tr>");
    header.push_str(&th("Benchmark"));
    for (i, column) in table.columns().iter().enumerate() {
        header.push_str(&th(&value_header(i, &html_escape(&column.label()))));
    }
    header.push_str("</tr></thead>");
    writeln!(out, "{header}")?;
    writeln!(out, "<tbody>")?;
    Ok(())
}

fn close_table(out: &mut (dyn Write + Send)) -> Result<()> {
    writeln!(out, "</tbody>")?;
    writeln!(out, "</table>")?;
    writeln!(out, "</section>")?;
    Ok(())
}

fn render_results_table(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    metric: Metric,
    filter: &str,
    sortable: bool,
) -> Result<()> {
    let filter = compile_filter(filter)?;
    if !table.has_metric(metric) {
        return Ok(());
    }
    open_results_table(table, out, metric, sortable, |_, label| label.to_string())?;
    for name in table.filtered_names(filter.as_ref()) {
        let mut row = format!("<tr><td>{}</td>", html_escape(&name));
        for column in table.columns() {
            let cell = column.value(&name, metric).map(fmt_value).unwrap_or_default();
            row.push_str(&format!("<td class=\"num\">{cell}</td>"));
        }
        row.push_str("</tr>");
        writeln!(out, "{row}")?;
    }
    close_table(out)
}

fn render_results_delta_table(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    metric: Metric,
    filter: &str,
    sortable: bool,
) -> Result<()> {
    require_two_columns(table, "delta table")?;
    let filter = compile_filter(filter)?;
    if !table.has_metric(metric) {
        return Ok(());
    }
    open_results_table(table, out, metric, sortable, |i, label| {
        if i == 0 {
            label.to_string()
        } else {
            format!("{label} (delta)")
        }
    })?;
    let baseline = &table.columns()[0];
    let candidate = &table.columns()[1];
    for name in table.filtered_names(filter.as_ref()) {
        let base = baseline.value(&name, metric);
        let new = candidate.value(&name, metric);
        let base_cell = base.map(fmt_value).unwrap_or_default();
        let delta_cell = match (base, new) {
            (Some(b), Some(n)) if b != 0.0 => fmt_delta((n - b) / b),
            _ => String::new(),
        };
        writeln!(
            out,
            "<tr><td>{}</td><td class=\"num\">{base_cell}</td><td class=\"num\">{delta_cell}</td></tr>",
            html_escape(&name)
        )?;
    }
    close_table(out)
}

fn open_figure(
    out: &mut (dyn Write + Send),
    ids: &mut ChartIds,
    title: &str,
    width: u32,
    height: u32,
) -> Result<()> {
    let id = ids.next();
    writeln!(out, "<figure id=\"{id}\">")?;
    writeln!(out, "<figcaption>{}</figcaption>", html_escape(title))?;
    writeln!(
        out,
        "<svg width=\"{width}\" height=\"{height}\" viewBox=\"0 0 {width} {height}\" xmlns=\"http://www.w3.org/2000/svg\">"
    )?;
    Ok(())
}

fn close_figure(table: &DataTable, out: &mut (dyn Write + Send), with_legend: bool) -> Result<()> {
    writeln!(out, "</svg>")?;
    if with_legend {
        let mut legend = String::from("<div class=\"legend\">");
        for (i, column) in table.columns().iter().enumerate() {
            legend.push_str(&format!(
                "<span><span class=\"swatch\" style=\"background:{}\"></span>{}</span>",
                COLORS[i % COLORS.len()],
                html_escape(&column.label())
            ));
        }
        legend.push_str("</div>");
        writeln!(out, "{legend}")?;
    }
    writeln!(out, "</figure>")?;
    Ok(())
}

fn render_trend_chart(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    ids: &mut ChartIds,
    title: &str,
    metric: Metric,
    filter: &str,
) -> Result<()> {
    let filter = compile_filter(filter)?;
    if !table.has_metric(metric) {
        return Ok(());
    }
    let names = table.filtered_names(filter.as_ref());
    let cols = table.columns().len();

    const LEFT: f64 = 70.0;
    const TOP: f64 = 10.0;
    const PLOT_W: f64 = 700.0;
    const PLOT_H: f64 = 300.0;
    let width = 800u32;
    let height = (TOP + PLOT_H + 40.0) as u32;

    let mut max = 0.0f64;
    for name in &names {
        for column in table.columns() {
            if let Some(v) = column.value(name, metric) {
                max = max.max(v);
            }
        }
    }
    if max <= 0.0 {
        max = 1.0;
    }

    let x = |i: usize| {
        if cols <= 1 {
            LEFT + PLOT_W / 2.0
        } else {
            LEFT + (i as f64) * PLOT_W / ((cols - 1) as f64)
        }
    };
    let y = |v: f64| TOP + PLOT_H - v / max * PLOT_H;

    open_figure(out, ids, &chart_title(title, metric), width, height)?;

    // Axes and y-grid.
    writeln!(
        out,
        "<line x1=\"{l}\" y1=\"{t}\" x2=\"{l}\" y2=\"{b}\" stroke=\"#888\"/>",
        l = fmt_coord(LEFT),
        t = fmt_coord(TOP),
        b = fmt_coord(TOP + PLOT_H)
    )?;
    writeln!(
        out,
        "<line x1=\"{l}\" y1=\"{b}\" x2=\"{r}\" y2=\"{b}\" stroke=\"#888\"/>",
        l = fmt_coord(LEFT),
        r = fmt_coord(LEFT + PLOT_W),
        b = fmt_coord(TOP + PLOT_H)
    )?;
    for tick in 0..=4u32 {
        let v = max * (tick as f64) / 4.0;
        let ty = y(v);
        writeln!(
            out,
            "<text x=\"{x}\" y=\"{y}\" text-anchor=\"end\" font-size=\"11\">{label}</text>",
            x = fmt_coord(LEFT - 6.0),
            y = fmt_coord(ty + 4.0),
            label = fmt_value(v)
        )?;
    }
    for (i, column) in table.columns().iter().enumerate() {
        writeln!(
            out,
            "<text x=\"{x}\" y=\"{y}\" text-anchor=\"middle\" font-size=\"11\">{label}</text>",
            x = fmt_coord(x(i)),
            y = fmt_coord(TOP + PLOT_H + 16.0),
            label = html_escape(&column.label())
        )?;
    }

    // One line per benchmark.
    for (ni, name) in names.iter().enumerate() {
        let color = COLORS[ni % COLORS.len()];
        let mut points = Vec::new();
        for (ci, column) in table.columns().iter().enumerate() {
            if let Some(v) = column.value(name, metric) {
                points.push((x(ci), y(v)));
            }
        }
        if points.is_empty() {
            continue;
        }
        let path: Vec<String> = points
            .iter()
            .map(|(px, py)| format!("{},{}", fmt_coord(*px), fmt_coord(*py)))
            .collect();
        writeln!(
            out,
            "<polyline points=\"{}\" fill=\"none\" stroke=\"{color}\" stroke-width=\"1.5\"><title>{}</title></polyline>",
            path.join(" "),
            html_escape(name)
        )?;
        for (px, py) in &points {
            writeln!(
                out,
                "<circle cx=\"{}\" cy=\"{}\" r=\"3\" fill=\"{color}\"/>",
                fmt_coord(*px),
                fmt_coord(*py)
            )?;
        }
    }

    writeln!(out, "</svg>")?;
    // Trend legends list benchmarks, not jobs.
    let mut legend = String::from("<div class=\"legend\">");
    for (ni, name) in names.iter().enumerate() {
        legend.push_str(&format!(
            "<span><span class=\"swatch\" style=\"background:{}\"></span>{}</span>",
            COLORS[ni % COLORS.len()],
            html_escape(name)
        ));
    }
    legend.push_str("</div>");
    writeln!(out, "{legend}")?;
    writeln!(out, "</figure>")?;
    Ok(())
}

fn quartiles(samples: &mut [f64]) -> (f64, f64, f64, f64, f64) {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let min = samples[0];
    let max = samples[samples.len() - 1];
    let med = percentile(samples, 0.5);
    let q1 = percentile(samples, 0.25);
    let q3 = percentile(samples, 0.75);
    (min, q1, med, q3, max)
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[allow(clippy::too_many_arguments)]
fn render_horizontal_bars(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    ids: &mut ChartIds,
    title: &str,
    metric: Metric,
    filter: &str,
    boxes: bool,
) -> Result<()> {
    let filter = compile_filter(filter)?;
    if !table.has_metric(metric) {
        return Ok(());
    }
    let names = table.filtered_names(filter.as_ref());
    let cols = table.columns().len();

    const LABEL_W: f64 = 280.0;
    const PLOT_W: f64 = 430.0;
    const BAR_H: f64 = 14.0;
    const BAR_GAP: f64 = 3.0;
    const GROUP_GAP: f64 = 12.0;
    let group_h = cols as f64 * (BAR_H + BAR_GAP) + GROUP_GAP;
    let width = 800u32;
    let height = (names.len() as f64 * group_h + 20.0) as u32;

    let mut max = 0.0f64;
    for name in &names {
        for column in table.columns() {
            for v in column.samples(name, metric) {
                max = max.max(v);
            }
        }
    }
    if max <= 0.0 {
        max = 1.0;
    }
    let scale = |v: f64| v / max * PLOT_W;

    open_figure(out, ids, &chart_title(title, metric), width, height)?;

    for (ni, name) in names.iter().enumerate() {
        let group_top = ni as f64 * group_h;
        writeln!(
            out,
            "<text x=\"{x}\" y=\"{y}\" text-anchor=\"end\" font-size=\"11\">{label}</text>",
            x = fmt_coord(LABEL_W - 8.0),
            y = fmt_coord(group_top + group_h / 2.0),
            label = html_escape(name)
        )?;
        for (ci, column) in table.columns().iter().enumerate() {
            let row_top = group_top + ci as f64 * (BAR_H + BAR_GAP);
            let color = COLORS[ci % COLORS.len()];
            if boxes {
                let mut samples = column.samples(name, metric);
                if samples.is_empty() {
                    continue;
                }
                let (min, q1, med, q3, bmax) = quartiles(&mut samples);
                let mid = row_top + BAR_H / 2.0;
                writeln!(
                    out,
                    "<line x1=\"{x1}\" y1=\"{y}\" x2=\"{x2}\" y2=\"{y}\" stroke=\"{color}\"/>",
                    x1 = fmt_coord(LABEL_W + scale(min)),
                    x2 = fmt_coord(LABEL_W + scale(bmax)),
                    y = fmt_coord(mid)
                )?;
                let bx = LABEL_W + scale(q1);
                let bw = (scale(q3) - scale(q1)).max(1.0);
                writeln!(
                    out,
                    "<rect x=\"{x}\" y=\"{y}\" width=\"{w}\" height=\"{h}\" fill=\"{color}\" fill-opacity=\"0.5\" stroke=\"{color}\"/>",
                    x = fmt_coord(bx),
                    y = fmt_coord(row_top),
                    w = fmt_coord(bw),
                    h = fmt_coord(BAR_H)
                )?;
                writeln!(
                    out,
                    "<line x1=\"{x}\" y1=\"{y1}\" x2=\"{x}\" y2=\"{y2}\" stroke=\"{color}\" stroke-width=\"2\"/>",
                    x = fmt_coord(LABEL_W + scale(med)),
                    y1 = fmt_coord(row_top),
                    y2 = fmt_coord(row_top + BAR_H)
                )?;
                writeln!(
                    out,
                    "<text x=\"{x}\" y=\"{y}\" font-size=\"10\">{label}</text>",
                    x = fmt_coord(LABEL_W + scale(bmax) + 4.0),
                    y = fmt_coord(mid + 3.0),
                    label = fmt_value(med)
                )?;
            } else {
                let Some(v) = column.value(name, metric) else {
                    continue;
                };
                let w = scale(v).max(0.5);
                writeln!(
                    out,
                    "<rect x=\"{x}\" y=\"{y}\" width=\"{w}\" height=\"{h}\" fill=\"{color}\"/>",
                    x = fmt_coord(LABEL_W),
                    y = fmt_coord(row_top),
                    w = fmt_coord(w),
                    h = fmt_coord(BAR_H)
                )?;
                writeln!(
                    out,
                    "<text x=\"{x}\" y=\"{y}\" font-size=\"10\">{label}</text>",
                    x = fmt_coord(LABEL_W + w + 4.0),
                    y = fmt_coord(row_top + BAR_H - 3.0),
                    label = fmt_value(v)
                )?;
            }
        }
    }

    close_figure(table, out, true)
}

fn render_horizontal_delta_chart(
    table: &DataTable,
    out: &mut (dyn Write + Send),
    ids: &mut ChartIds,
    title: &str,
    metric: Metric,
    filter: &str,
) -> Result<()> {
    require_two_columns(table, "delta chart")?;
    let filter = compile_filter(filter)?;
    if !table.has_metric(metric) {
        return Ok(());
    }
    let names = table.filtered_names(filter.as_ref());
    let baseline = &table.columns()[0];
    let candidate = &table.columns()[1];

    let mut deltas = Vec::new();
    for name in &names {
        let delta = match (baseline.value(name, metric), candidate.value(name, metric)) {
            (Some(b), Some(n)) if b != 0.0 => Some((n - b) / b),
            _ => None,
        };
        deltas.push((name.clone(), delta));
    }

    const LABEL_W: f64 = 280.0;
    const PLOT_W: f64 = 430.0;
    const ROW_H: f64 = 20.0;
    const BAR_H: f64 = 12.0;
    let width = 800u32;
    let height = (deltas.len() as f64 * ROW_H + 24.0) as u32;

    let mut max_abs = 0.0f64;
    for (_, delta) in &deltas {
        if let Some(d) = delta {
            max_abs = max_abs.max(d.abs());
        }
    }
    if max_abs <= 0.0 {
        max_abs = 1.0;
    }
    let center = LABEL_W + PLOT_W / 2.0;
    let half = PLOT_W / 2.0 - 50.0;

    open_figure(
        out,
        ids,
        &chart_title(title, metric),
        width,
        height,
    )?;

    writeln!(
        out,
        "<line x1=\"{x}\" y1=\"0\" x2=\"{x}\" y2=\"{h}\" stroke=\"#888\"/>",
        x = fmt_coord(center),
        h = fmt_coord(deltas.len() as f64 * ROW_H)
    )?;

    for (ni, (name, delta)) in deltas.iter().enumerate() {
        let row_top = ni as f64 * ROW_H;
        writeln!(
            out,
            "<text x=\"{x}\" y=\"{y}\" text-anchor=\"end\" font-size=\"11\">{label}</text>",
            x = fmt_coord(LABEL_W - 8.0),
            y = fmt_coord(row_top + ROW_H / 2.0 + 3.0),
            label = html_escape(name)
        )?;
        let Some(d) = delta else {
            continue;
        };
        let extent = d.abs() / max_abs * half;
        let (bar_x, color) = if *d < 0.0 {
            (center - extent, COLORS[2])
        } else {
            (center, COLORS[3])
        };
        writeln!(
            out,
            "<rect x=\"{x}\" y=\"{y}\" width=\"{w}\" height=\"{h}\" fill=\"{color}\"/>",
            x = fmt_coord(bar_x),
            y = fmt_coord(row_top + (ROW_H - BAR_H) / 2.0),
            w = fmt_coord(extent.max(0.5)),
            h = fmt_coord(BAR_H)
        )?;
        let (tx, anchor) = if *d < 0.0 {
            (center - extent - 4.0, "end")
        } else {
            (center + extent + 4.0, "start")
        };
        writeln!(
            out,
            "<text x=\"{x}\" y=\"{y}\" text-anchor=\"{anchor}\" font-size=\"10\">{label}</text>",
            x = fmt_coord(tx),
            y = fmt_coord(row_top + ROW_H / 2.0 + 3.0),
            label = fmt_delta(*d)
        )?;
    }

    close_figure(table, out, false)
}
