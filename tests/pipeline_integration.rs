// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use qoreproxy::filter::{ManualClock, NullClient, NullRouter};
use qoreproxy::{
    ConnectionInfo, Delivery, FilterContext, FilterPipeline, QueryMessage, ReplyMessage,
};

fn write_definition(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let base = dir.path().display().to_string();
    let json = format!(
        r#"{{
  "filters": [
    {{ "name": "log", "module": "qlafilter", "params": {{ "filebase": "{base}/qla", "exclude": "^SET" }} }},
    {{ "name": "ccr", "module": "ccrfilter", "params": {{ "count": 1, "time": 0 }} }},
    {{ "name": "top", "module": "topfilter", "options": ["ignorecase"], "params": {{ "filebase": "{base}/top", "count": 2 }} }}
  ]
}}"#
    );
    let path = dir.path().join("filters.json");
    fs::write(&path, json).unwrap();
    path
}

#[test]
fn full_chain_logs_hints_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let pipeline = FilterPipeline::new(FilterContext::new().with_clock(Arc::new(clock.clone())));
    pipeline.load_config(&write_definition(&dir)).unwrap();
    assert_eq!(pipeline.filter_names(), vec!["log", "ccr", "top"]);

    let router = NullRouter::new();
    let client = NullClient::new();
    let mut chain = pipeline
        .open_chain(
            ConnectionInfo::new("127.0.0.1", "app"),
            Box::new(router.clone()),
            Some(Box::new(client.clone())),
        )
        .unwrap();

    let statements = [
        ("SET NAMES utf8", 100),
        ("INSERT INTO t VALUES (1)", 300),
        ("SELECT * FROM t", 200),
        ("SELECT * FROM t", 50),
    ];
    for (sql, millis) in statements {
        assert_eq!(chain.route_query(QueryMessage::sql(sql)).unwrap(), Delivery::Routed);
        clock.advance(Duration::from_millis(millis));
        chain.client_reply(ReplyMessage::new("ok")).unwrap();
    }

    let diagnostics = chain.diagnostics();
    assert!(diagnostics.contains("Filter: ccr (module ccrfilter)"));
    assert!(diagnostics.contains("No. of hints added based on count: 1"));

    chain.close().unwrap();

    assert_eq!(router.routed(), 4);
    assert_eq!(router.forced_to_master(), 1);
    assert_eq!(client.replies(), 4);

    let log = fs::read_to_string(dir.path().join("qla.0")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with(",app@127.0.0.1,INSERT INTO t VALUES (1)"));

    let report = fs::read_to_string(dir.path().join("top.0")).unwrap();
    assert!(report.starts_with("Top 2 longest running queries in session."));
    assert!(report.contains("     0.300 |  INSERT INTO t VALUES (1)\n"));
    assert!(report.contains("     0.200 |  SELECT * FROM t\n"));
    assert!(!report.contains("0.100 |"));
    assert!(report.contains("Total of 4 statements executed."));
}

#[test]
fn failed_session_only_affects_its_connection() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = FilterPipeline::new(FilterContext::new());
    pipeline.load_config(&write_definition(&dir)).unwrap();

    let first = pipeline
        .open_chain(
            ConnectionInfo::anonymous(),
            Box::new(NullRouter::new()),
            Some(Box::new(NullClient::new())),
        )
        .unwrap();

    // The next query log file cannot be created
    fs::create_dir(dir.path().join("qla.1")).unwrap();
    let err = pipeline
        .open_chain(
            ConnectionInfo::anonymous(),
            Box::new(NullRouter::new()),
            Some(Box::new(NullClient::new())),
        )
        .err()
        .unwrap();
    assert!(err.is_resource());

    let third = pipeline
        .open_chain(
            ConnectionInfo::anonymous(),
            Box::new(NullRouter::new()),
            Some(Box::new(NullClient::new())),
        )
        .unwrap();

    drop(first);
    drop(third);
    assert!(dir.path().join("qla.0").is_file());
    assert!(dir.path().join("qla.2").is_file());
    assert!(dir.path().join("top.0").is_file());
}

#[test]
fn chain_without_client_is_rejected_when_replies_are_needed() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = FilterPipeline::new(FilterContext::new());
    pipeline.load_config(&write_definition(&dir)).unwrap();

    let err = pipeline
        .open_chain(ConnectionInfo::anonymous(), Box::new(NullRouter::new()), None)
        .err()
        .unwrap();
    assert!(!err.is_config());
    assert!(!err.is_resource());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_get_distinct_files() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Arc::new(FilterPipeline::new(FilterContext::new()));
    pipeline.load_config(&write_definition(&dir)).unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let pipeline = Arc::clone(&pipeline);
        tasks.push(tokio::spawn(async move {
            let mut chain = pipeline
                .open_chain(
                    ConnectionInfo::new(format!("10.0.0.{}", i), "worker"),
                    Box::new(NullRouter::new()),
                    Some(Box::new(NullClient::new())),
                )
                .unwrap();
            chain
                .route_query(QueryMessage::sql(&format!("SELECT {}", i)))
                .unwrap();
            chain.client_reply(ReplyMessage::new("ok")).unwrap();
            chain.close().unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut seen = HashSet::new();
    for i in 0..32 {
        let log = fs::read_to_string(dir.path().join(format!("qla.{}", i))).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(seen.insert(log));
        assert!(dir.path().join(format!("top.{}", i)).is_file());
    }
}
