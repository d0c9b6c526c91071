//! Integration tests for the fan-out pipeline.
//!
//! Queries are served by in-memory closures standing in for an upstream
//! API: normalise → dispatch → merge → rank → budget, with no network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use sift::config::FanoutSettings;
use sift::{
    BatchExecutor, BatchOptions, FanoutMerger, FanoutOptions, Hit, ItemError, RecordingSink,
    ScorePolarity, SiftConfig, SiftError,
};

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, d, 12, 0, 0)
        .single()
        .expect("valid date")
}

fn task_search() -> FanoutOptions {
    FanoutOptions::new(ScorePolarity::LowerIsBetter, ["tags", "title"])
}

fn doc_search() -> FanoutOptions {
    FanoutOptions::new(ScorePolarity::HigherIsBetter, ["snippet", "title"])
}

/// Fixed corpus keyed by normalised query.
fn corpus() -> HashMap<&'static str, Vec<Hit>> {
    HashMap::from([
        (
            "groceries",
            vec![
                Hit::new("t-1", "Buy milk").with_score(0.5).updated(day(1)),
                Hit::new("t-2", "Buy eggs").with_score(0.1),
            ],
        ),
        (
            "milk",
            vec![
                Hit::new("t-1", "Buy milk").with_score(0.2).updated(day(1)),
                Hit::new("t-3", "Milk the cow").with_score(0.2).updated(day(3)),
            ],
        ),
        ("empty", Vec::new()),
    ])
}

async fn serve(corpus: &HashMap<&'static str, Vec<Hit>>, query: String) -> Result<Vec<Hit>, ItemError> {
    match corpus.get(query.as_str()) {
        Some(hits) => Ok(hits.clone()),
        None => Err(ItemError::with_code("not_found", format!("no index for {query}"))),
    }
}

fn ids(hits: &[Hit]) -> Vec<&str> {
    hits.iter().filter_map(|hit| hit.id.as_deref()).collect()
}

#[tokio::test]
async fn task_search_keeps_lowest_score_per_task() {
    let corpus = corpus();
    let report = FanoutMerger::default()
        .run(&["Groceries", "MILK "], &task_search(), |q| serve(&corpus, q))
        .await
        .expect("report");

    // t-1 appears with 0.5 and 0.2; lower is better so 0.2 survives.
    let t1 = report
        .union
        .results
        .iter()
        .find(|hit| hit.id.as_deref() == Some("t-1"))
        .expect("t-1 in union");
    assert_eq!(t1.score, Some(0.2));

    // 0.1 first, then the two 0.2 entries newest first.
    assert_eq!(ids(&report.union.results), vec!["t-2", "t-3", "t-1"]);
    assert_eq!(report.union.deduped_count, 3);
    assert_eq!(report.per_query.len(), 2);
}

#[tokio::test]
async fn doc_search_prefers_higher_scores() {
    let corpus = corpus();
    let report = FanoutMerger::default()
        .run(&["groceries", "milk"], &doc_search(), |q| serve(&corpus, q))
        .await
        .expect("report");

    let t1 = report
        .union
        .results
        .iter()
        .find(|hit| hit.id.as_deref() == Some("t-1"))
        .expect("t-1 in union");
    assert_eq!(t1.score, Some(0.5));
    assert_eq!(ids(&report.union.results), vec!["t-1", "t-3", "t-2"]);
}

#[tokio::test]
async fn equal_scores_resolved_by_newer_timestamp() {
    let report = FanoutMerger::default()
        .run(&["first", "second"], &task_search(), |q| async move {
            let at = if q == "first" { day(1) } else { day(2) };
            Ok::<_, ItemError>(vec![Hit::new("t-9", q).with_score(0.3).updated(at)])
        })
        .await
        .expect("report");

    assert_eq!(report.union.deduped_count, 1);
    assert_eq!(report.union.results[0].title, "second");
    assert_eq!(report.union.results[0].updated_at, Some(day(2)));
}

#[tokio::test]
async fn partial_failures_reported_in_query_order() {
    let corpus = corpus();
    let report = FanoutMerger::default()
        .run(
            &["unknown-b", "groceries", "unknown-a", "empty"],
            &doc_search(),
            |q| serve(&corpus, q),
        )
        .await
        .expect("report");

    let failed: Vec<&str> = report.failed.iter().map(|f| f.query.as_str()).collect();
    assert_eq!(failed, vec!["unknown-b", "unknown-a"]);
    assert!(report.failed.iter().all(|f| f.code.as_deref() == Some("not_found")));
    assert!(report.failed[0].error.contains("unknown-b"));

    let succeeded: Vec<&str> = report.per_query.keys().map(String::as_str).collect();
    assert_eq!(succeeded, vec!["groceries", "empty"]);
    assert_eq!(report.union.deduped_count, 2);
}

#[tokio::test]
async fn hits_without_ids_are_never_merged() {
    let report = FanoutMerger::default()
        .run(&["a", "b"], &doc_search(), |_q| async {
            let mut anonymous = Hit::new("", "Untitled").with_score(0.5);
            anonymous.id = None;
            Ok::<_, ItemError>(vec![anonymous.clone(), anonymous])
        })
        .await
        .expect("report");
    assert_eq!(report.union.deduped_count, 4);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_with_retries() {
    let attempts = Mutex::new(HashMap::<String, usize>::new());
    let options = doc_search().with_batch(
        BatchOptions::default()
            .retry_count(2)
            .retry_delay_ms(10),
    );
    let report = FanoutMerger::default()
        .run(&["flaky", "steady"], &options, |q| {
            let attempt = {
                let mut seen = attempts.lock().expect("attempts");
                let count = seen.entry(q.clone()).or_default();
                *count += 1;
                *count
            };
            async move {
                if q == "flaky" && attempt < 3 {
                    Err(ItemError::with_code("rate_limited", "try later"))
                } else {
                    Ok(vec![Hit::new(format!("{q}-1"), q.clone()).with_score(1.0)])
                }
            }
        })
        .await
        .expect("report");

    assert!(report.failed.is_empty());
    assert_eq!(report.per_query.len(), 2);
    assert_eq!(attempts.lock().expect("attempts")["flaky"], 3);
}

#[tokio::test(start_paused = true)]
async fn fanout_respects_concurrency_override() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let options = doc_search().with_batch(BatchOptions::default().concurrency(2));
    let queries: Vec<String> = (0..8).map(|i| format!("q{i}")).collect();

    let report = FanoutMerger::default()
        .run(&queries, &options, |q| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ItemError>(vec![Hit::new(q.clone(), q)])
            }
        })
        .await
        .expect("report");

    assert_eq!(report.per_query.len(), 8);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn report_trimmed_tags_before_titles() {
    let merger = FanoutMerger::new(SiftConfig {
        fanout: FanoutSettings {
            output_limit_bytes: 700,
            ..Default::default()
        },
        ..Default::default()
    });
    let report = merger
        .run(&["big"], &task_search(), |_q| async {
            Ok::<_, ItemError>(vec![
                Hit::new("t-1", "Quarterly planning")
                    .with_score(0.1)
                    .with_tags(["x".repeat(200), "y".repeat(120)]),
            ])
        })
        .await
        .expect("report");

    assert_eq!(report.truncated, Some(true));
    assert_eq!(report.guidance.as_deref(), Some(sift::budget::TRUNCATION_GUIDANCE));
    assert!(serde_json::to_vec(&report).expect("serialize").len() <= 700);
    assert_eq!(report.union.results[0].title, "Quarterly planning");
    assert!(report.union.results[0].tags[0].len() < 200);
}

#[tokio::test]
async fn report_json_shape() {
    let corpus = corpus();
    let report = FanoutMerger::default()
        .run(&["groceries", "missing"], &task_search(), |q| serve(&corpus, q))
        .await
        .expect("report");
    let json = serde_json::to_value(&report).expect("serialize");

    assert!(json["perQuery"]["groceries"].is_array());
    assert_eq!(json["union"]["dedupedCount"], 2);
    assert_eq!(json["failed"][0]["query"], "missing");
    assert_eq!(json["failed"][0]["code"], "not_found");
    assert!(json.get("truncated").is_none());
    assert!(json.get("guidance").is_none());
}

#[tokio::test]
async fn validation_errors_dispatch_nothing() {
    let calls = AtomicUsize::new(0);
    let none: [&str; 0] = [];
    let err = FanoutMerger::default()
        .run(&none, &doc_search(), |_q| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Vec<Hit>, ItemError>(Vec::new()) }
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SiftError::Validation(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn fanout_events_carry_label() {
    let sink = Arc::new(RecordingSink::new());
    let merger = FanoutMerger::default()
        .with_executor(BatchExecutor::new(sink.clone()).with_label("fanout"));
    let corpus = corpus();
    merger
        .run(&["groceries", "milk"], &doc_search(), |q| serve(&corpus, q))
        .await
        .expect("report");

    let names = sink.names();
    assert_eq!(names.first(), Some(&"batch.started"));
    assert_eq!(names.last(), Some(&"batch.finished"));
    assert!(sink.contexts().iter().all(|c| c.label == "fanout"));
}
