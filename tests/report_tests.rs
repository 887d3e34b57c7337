use uuid::Uuid;

use benchd::broker::memory::MemoryBroker;
use benchd::error::BenchdError;
use benchd::job::{JobParameters, JobRecord};
use benchd::queue::Client;
use benchd::reports::{
    create_data_table, write_report, DataTable, Metric, ReportConfig, ReportSpec, Section,
};

const RESULTS_A: &str = "BenchmarkKVPut-8 1000 520.5 ns/op 11.9 MB/s\n\
                         BenchmarkKVGet-8 2000 250.25 ns/op 25.6 MB/s\n\
                         BenchmarkMsgPub-8 500 1000 ns/op 100000 msg/s\n";

const RESULTS_B: &str = "BenchmarkKVPut-8 1200 480.1 ns/op 13.2 MB/s\n\
                         BenchmarkKVGet-8 2100 260.75 ns/op 24.4 MB/s\n\
                         BenchmarkMsgPub-8 600 900 ns/op 110000 msg/s\n";

const RESULTS_C: &str = "BenchmarkKVPut-8 1100 500 ns/op 12.5 MB/s\n\
                         BenchmarkKVGet-8 2050 255 ns/op 25 MB/s\n";

fn job(label: &str) -> JobRecord {
    JobRecord::new(JobParameters {
        label: label.to_string(),
        ..Default::default()
    })
}

fn two_column_table() -> DataTable {
    DataTable::from_results(vec![
        (job("base"), RESULTS_A.to_string()),
        (job("new"), RESULTS_B.to_string()),
    ])
}

fn three_column_table() -> DataTable {
    DataTable::from_results(vec![
        (job("a"), RESULTS_A.to_string()),
        (job("b"), RESULTS_B.to_string()),
        (job("c"), RESULTS_C.to_string()),
    ])
}

fn render(cfg: &ReportConfig, table: &DataTable) -> String {
    let mut buf = Vec::new();
    write_report(cfg, table, &mut buf).unwrap();
    String::from_utf8(buf).unwrap()
}

#[test]
fn test_data_table_metric_flags() {
    let table = two_column_table();
    assert!(table.has_speed());
    assert!(table.has_metric(Metric::TimeOp));
    assert!(table.has_throughput());
    assert!(table.has_metric(Metric::MsgPerSec));
    assert!(!table.has_metric(Metric::OpsPerSec));
}

#[test]
fn test_data_table_names_are_sorted() {
    let table = two_column_table();
    assert_eq!(
        table.benchmark_names(),
        vec!["BenchmarkKVGet-8", "BenchmarkKVPut-8", "BenchmarkMsgPub-8"]
    );
}

#[test]
fn test_repeated_lines_average_into_one_cell() {
    let table = DataTable::from_results(vec![(
        job("reps"),
        "BenchmarkX 10 100 ns/op\nBenchmarkX 10 300 ns/op\n".to_string(),
    )]);
    let column = &table.columns()[0];
    assert_eq!(column.value("BenchmarkX", Metric::TimeOp), Some(200.0));
    assert_eq!(column.samples("BenchmarkX", Metric::TimeOp), vec![100.0, 300.0]);
}

#[test]
fn test_full_report_renders_sections_and_chart_ids() {
    let table = three_column_table();
    let mut cfg = ReportConfig::new("Trend and bars");
    cfg.add_sections([
        Section::jobs_table(),
        Section::trend_chart("", Metric::TimeOp, ".*KV.*"),
        Section::horizontal_bar_chart("", Metric::Speed, ".*KV.*"),
        Section::results_table(Metric::TimeOp, ".*KV.*", true),
    ]);

    let html = render(&cfg, &table);
    assert!(html.contains("<h1>Trend and bars</h1>"));
    assert!(html.contains("chart-1"));
    assert!(html.contains("chart-2"));
    assert!(html.contains("<svg"));
    assert!(html.contains("BenchmarkKVPut-8"));
    assert!(html.contains("520.5"));
    assert!(html.contains("sortable"));
    // The filter keeps message benchmarks out.
    assert!(!html.contains("BenchmarkMsgPub-8"));
}

#[test]
fn test_rendering_is_deterministic() {
    let table = three_column_table();
    let mut cfg = ReportConfig::new("Deterministic");
    cfg.add_sections([
        Section::jobs_table(),
        Section::trend_chart("", Metric::TimeOp, ".*KV.*"),
        Section::horizontal_bar_chart("", Metric::Speed, ".*KV.*"),
        Section::horizontal_box_chart("", Metric::TimeOp, ""),
        Section::results_table(Metric::TimeOp, ".*KV.*", true),
    ]);

    let mut first = Vec::new();
    write_report(&cfg, &table, &mut first).unwrap();
    let mut second = Vec::new();
    write_report(&cfg, &table, &mut second).unwrap();

    // Chart ids are allocated afresh per render, so repeated renders are
    // byte-identical.
    assert_eq!(first, second);
    assert!(String::from_utf8(second).unwrap().contains("chart-1"));
}

#[test]
fn test_empty_metric_panels_are_suppressed() {
    let table = DataTable::from_results(vec![(
        job("timings"),
        "BenchmarkX 10 100 ns/op\n".to_string(),
    )]);
    let mut cfg = ReportConfig::new("Speed only");
    cfg.add_sections([
        Section::horizontal_bar_chart("", Metric::Speed, ""),
        Section::results_table(Metric::Speed, "", false),
    ]);

    let html = render(&cfg, &table);
    assert!(!html.contains("<svg"));
    assert!(!html.contains("class=\"results"));
}

#[test]
fn test_delta_sections_require_two_columns() {
    let table = three_column_table();

    let mut cfg = ReportConfig::new("Bad delta");
    cfg.add_sections([Section::results_delta_table(Metric::TimeOp, "", false)]);
    let mut buf = Vec::new();
    let err = write_report(&cfg, &table, &mut buf).unwrap_err();
    assert!(matches!(err, BenchdError::IllegalState(_)));

    let mut cfg = ReportConfig::new("Bad delta chart");
    cfg.add_sections([Section::horizontal_delta_chart("", Metric::TimeOp, "")]);
    let mut buf = Vec::new();
    let err = write_report(&cfg, &table, &mut buf).unwrap_err();
    assert!(matches!(err, BenchdError::IllegalState(_)));
}

#[test]
fn test_delta_table_cells_are_relative_to_baseline() {
    let table = DataTable::from_results(vec![
        (job("base"), "BenchmarkX 10 100 ns/op\n".to_string()),
        (job("new"), "BenchmarkX 10 110 ns/op\n".to_string()),
    ]);
    let mut cfg = ReportConfig::new("Delta");
    cfg.add_sections([
        Section::results_delta_table(Metric::TimeOp, "", false),
        Section::horizontal_delta_chart("", Metric::TimeOp, ""),
    ]);

    let html = render(&cfg, &table);
    assert!(html.contains("+10.00%"));
}

#[test]
fn test_delta_table_tolerates_missing_cells() {
    let table = DataTable::from_results(vec![
        (job("base"), "BenchmarkX 10 100 ns/op\n".to_string()),
        (
            job("new"),
            "BenchmarkY 10 50 ns/op\n".to_string(),
        ),
    ]);
    let mut cfg = ReportConfig::new("Sparse delta");
    cfg.add_sections([Section::results_delta_table(Metric::TimeOp, "", false)]);

    let html = render(&cfg, &table);
    assert!(html.contains("BenchmarkX"));
    assert!(html.contains("BenchmarkY"));
    // No pair of values exists, so no delta cell is rendered.
    assert!(!html.contains("%</td>"));
}

#[test]
fn test_invalid_filter_fails_fast() {
    let table = two_column_table();
    let mut cfg = ReportConfig::new("Bad filter");
    cfg.add_sections([Section::results_table(Metric::TimeOp, "*[", false)]);

    let mut buf = Vec::new();
    let err = write_report(&cfg, &table, &mut buf).unwrap_err();
    assert!(matches!(err, BenchdError::Malformed(_)));
}

#[test]
fn test_report_spec_configures_sections() {
    let json = br#"{
        "title": "KV comparison",
        "sections": [
            { "kind": "jobsTable" },
            { "kind": "trend", "metric": "time_op", "filter": ".*KV.*" },
            { "kind": "bar", "metric": "speed", "title": "Speed" },
            { "kind": "box", "metric": "time_op" },
            { "kind": "delta", "metric": "time_op" },
            { "kind": "table", "metric": "time_op", "sortable": true },
            { "kind": "deltaTable", "metric": "speed" }
        ]
    }"#;
    let spec = ReportSpec::load(json).unwrap();
    let mut cfg = ReportConfig::default();
    spec.configure_report(&mut cfg).unwrap();
    assert_eq!(cfg.title, "KV comparison");
    assert_eq!(cfg.sections().len(), 7);
}

#[test]
fn test_report_spec_rejects_unknown_kind() {
    let err = ReportSpec::load(br#"{"title":"x","sections":[{"kind":"pie"}]}"#).unwrap_err();
    assert!(matches!(err, BenchdError::Malformed(_)));
}

#[test]
fn test_report_spec_save_load_idempotence() {
    let json = br#"{
        "title": "Round trip",
        "sections": [
            { "kind": "jobsTable" },
            { "kind": "trend", "metric": "time_op", "filter": ".*KV.*" },
            { "kind": "table", "metric": "speed", "sortable": true }
        ]
    }"#;
    let spec = ReportSpec::load(json).unwrap();

    let path = std::env::temp_dir().join(format!("benchd-spec-{}.json", Uuid::new_v4()));
    spec.save_file(&path).unwrap();
    let reloaded = ReportSpec::load_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(reloaded, spec);
}

#[tokio::test]
async fn test_create_data_table_from_client() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.as_ref(), "test", "default");

    let job_a = client
        .submit_job(JobParameters {
            label: "base".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let job_b = client
        .submit_job(JobParameters {
            label: "new".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    client
        .upload_results_artifact(&job_a, RESULTS_A.as_bytes())
        .await
        .unwrap();
    client
        .upload_results_artifact(&job_b, RESULTS_B.as_bytes())
        .await
        .unwrap();

    // Columns follow the requested id order, not submission order.
    let table = create_data_table(&client, &[job_b.id, job_a.id]).await.unwrap();
    assert_eq!(table.columns().len(), 2);
    assert_eq!(table.columns()[0].job.id, job_b.id);
    assert_eq!(table.columns()[1].job.id, job_a.id);
    assert!(table.has_speed());

    let mut cfg = ReportConfig::new("Comparative");
    cfg.add_sections([
        Section::jobs_table(),
        Section::horizontal_delta_chart("", Metric::TimeOp, ""),
        Section::results_delta_table(Metric::TimeOp, "", true),
    ]);
    let html = render(&cfg, &table);
    assert!(html.contains("base"));
    assert!(html.contains("new"));
}

#[tokio::test]
async fn test_create_data_table_missing_artifact_fails() {
    let broker = MemoryBroker::new();
    let client = Client::new(broker.as_ref(), "test", "default");

    let job = client.submit_job(JobParameters::default()).await.unwrap();
    let err = create_data_table(&client, &[job.id]).await.unwrap_err();
    assert!(matches!(err, BenchdError::NotFound(_)));

    let missing = Uuid::new_v4();
    let err = create_data_table(&client, &[missing]).await.unwrap_err();
    assert!(matches!(err, BenchdError::NotFound(_)));
}
