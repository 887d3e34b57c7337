use std::collections::BTreeMap;

use benchd::bench::{parse_line, parse_results, BenchmarkRecord};

#[test]
fn test_parse_basic_line() {
    let record = parse_line("BenchmarkKVPut-8 1000 512.5 ns/op").unwrap();
    assert_eq!(record.name, "BenchmarkKVPut-8");
    assert_eq!(record.n, 1000);
    assert_eq!(record.ns_per_op, 512.5);
    assert!(record.mb_per_sec.is_none());
    assert!(record.extra.is_empty());
}

#[test]
fn test_parse_all_known_units() {
    let record = parse_line(
        "BenchmarkKVGet-8   2000   250 ns/op   12.5 MB/s   3000 ops/s   1500 msg/s   512 B/op   3 allocs/op",
    )
    .unwrap();
    assert_eq!(record.n, 2000);
    assert_eq!(record.ns_per_op, 250.0);
    assert_eq!(record.mb_per_sec, Some(12.5));
    assert_eq!(record.ops_per_sec, Some(3000.0));
    assert_eq!(record.msg_per_sec, Some(1500.0));
    assert_eq!(record.bytes_per_op, Some(512));
    assert_eq!(record.allocs_per_op, Some(3));
}

#[test]
fn test_unknown_units_go_to_extra() {
    let record = parse_line("BenchmarkX 100 50 ns/op 42.5 widgets/op").unwrap();
    assert_eq!(record.extra.get("widgets/op"), Some(&42.5));
}

#[test]
fn test_line_without_ns_per_op_rejected() {
    assert!(parse_line("BenchmarkX 100 5 MB/s").is_none());
}

#[test]
fn test_malformed_lines_rejected() {
    // No metric pairs at all.
    assert!(parse_line("BenchmarkBroken 12").is_none());
    // Odd trailing token.
    assert!(parse_line("BenchmarkOdd 5 100").is_none());
    // Iteration count is not a number.
    assert!(parse_line("BenchmarkBad x 100 ns/op").is_none());
    // Value is not a number.
    assert!(parse_line("BenchmarkBad 5 abc ns/op").is_none());
    // Name prefix missing.
    assert!(parse_line("KVPut 1000 512 ns/op").is_none());
}

#[test]
fn test_parse_results_skips_non_benchmark_lines() {
    let text = "goos: linux\n\
                goarch: amd64\n\
                pkg: example.com/kv\n\
                BenchmarkKVPut-8 1000 512.5 ns/op 12.5 MB/s\n\
                --- some runner chatter ---\n\
                BenchmarkKVGet-8 2000 250 ns/op\n\
                PASS\n\
                ok  \texample.com/kv\t4.2s\n";
    let records = parse_results(text);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].name, "BenchmarkKVPut-8");
    assert_eq!(records[1].name, "BenchmarkKVGet-8");
}

#[test]
fn test_parse_results_never_fails_on_garbage() {
    let records = parse_results("Benchmark\n\u{0}\u{1}\nBenchmark 0\n\n");
    assert!(records.is_empty());
}

#[test]
fn test_display_parse_round_trip() {
    let mut extra = BTreeMap::new();
    extra.insert("widgets/op".to_string(), 3.5);
    let record = BenchmarkRecord {
        name: "BenchmarkKVPut-8".to_string(),
        n: 1000,
        ns_per_op: 512.5,
        mb_per_sec: Some(12.5),
        ops_per_sec: Some(2000.0),
        msg_per_sec: None,
        bytes_per_op: Some(128),
        allocs_per_op: Some(2),
        extra,
    };
    let line = record.to_string();
    let reparsed = parse_line(&line).unwrap();
    assert_eq!(reparsed, record);
}

#[test]
fn test_display_parse_round_trip_minimal() {
    let record = BenchmarkRecord {
        name: "BenchmarkX".to_string(),
        n: 1,
        ns_per_op: 1e9,
        ..Default::default()
    };
    assert_eq!(parse_line(&record.to_string()).unwrap(), record);
}
