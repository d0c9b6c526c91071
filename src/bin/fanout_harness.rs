//! Fan-out harness: runs a synthetic search through the full pipeline and
//! prints the merged report as JSON.
//!
//! Usage: `sift-fanout-harness [config.toml] [query ...]`
//!
//! Queries containing `fail` return an upstream error so the failure path
//! can be seen in the report. Tracing goes to stderr; set `RUST_LOG` to
//! adjust verbosity.

use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sift::{FanoutOptions, Hit, ItemError, ScorePolarity, SiftConfig};

const DEFAULT_QUERIES: [&str; 4] = ["Groceries", "errands", "groceries ", "fail-upstream"];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sift=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("sift-fanout-harness failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> sift::Result<()> {
    let mut args = std::env::args().skip(1).peekable();
    let config = match args.next_if(|arg| arg.ends_with(".toml")) {
        Some(path) => SiftConfig::from_file(Path::new(&path))?,
        None => SiftConfig::default(),
    };
    let mut queries: Vec<String> = args.collect();
    if queries.is_empty() {
        queries = DEFAULT_QUERIES.iter().map(|q| (*q).to_owned()).collect();
    }

    let options = FanoutOptions::new(ScorePolarity::LowerIsBetter, ["snippet", "tags", "title"]);
    let report = sift::fanout(&queries, &config, &options, synthetic_search).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Deterministic stand-in for an upstream search API.
async fn synthetic_search(query: String) -> Result<Vec<Hit>, ItemError> {
    let latency = 20 + (query.len() as u64 * 7) % 80;
    tokio::time::sleep(Duration::from_millis(latency)).await;

    if query.contains("fail") {
        return Err(ItemError::with_code(
            "upstream_error",
            format!("synthetic upstream rejected '{query}'"),
        ));
    }

    let base = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    let hits = (0..3u32)
        .map(|i| {
            // Every query shares task-0 so the union has something to merge.
            let id = if i == 0 {
                "task-0".to_owned()
            } else {
                format!("{query}-{i}")
            };
            Hit::new(id, format!("{query} result {i}"))
                .with_snippet(format!("matched '{query}' at rank {i}"))
                .with_tags([query.clone()])
                .with_score(f64::from(i) / 10.0 + query.len() as f64 / 100.0)
                .updated(base + chrono::Duration::days(i64::from(i)))
        })
        .collect();
    Ok(hits)
}
