use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::BenchError;
use crate::metrics::SessionMetrics;
use crate::thresholds::{evaluate_kind, KindEvaluation, SessionEvaluation, Thresholds};

/// Column order is a contract with downstream tooling; never reorder.
pub const CSV_HEADER: [&str; 14] = [
    "query_name",
    "total_requests",
    "successful_requests",
    "failed_requests",
    "duration_sec",
    "throughput_qps",
    "error_rate",
    "latency_min_ms",
    "latency_p50_ms",
    "latency_p95_ms",
    "latency_p99_ms",
    "latency_max_ms",
    "latency_mean_ms",
    "latency_stddev_ms",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionJsonMeta {
    pub name: String,
    pub sut_url: String,
    pub database: Option<String>,
    pub pattern: String,
    pub concurrency: usize,
    pub requests: u64,
    pub seed: u64,
    pub cache_enabled: bool,
    pub synthetic_data_used: bool,
    pub interrupted: bool,
    pub started_at: String,
    pub finished_at: String,
    pub wall_seconds: f64,
    pub issued: u64,
    pub ok: u64,
    pub failed: u64,
    pub error_rate: f64,
    pub throughput_qps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureJson {
    pub http_error: u64,
    pub timeout: u64,
    pub transport: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyJson {
    pub min: Option<f64>,
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub p999: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindJson {
    pub category: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub failures: FailureJson,
    pub duration_sec: f64,
    pub throughput_qps: f64,
    pub error_rate: f64,
    pub bytes_received: u64,
    pub latency_ms: LatencyJson,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionJson {
    pub session: SessionJsonMeta,
    pub kinds: BTreeMap<String, KindJson>,
}

/// One parsed CSV row; the lossless projection used by diff tooling.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvRow {
    pub query_name: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub duration_sec: f64,
    pub throughput_qps: f64,
    pub error_rate: f64,
    pub latency_min_ms: Option<f64>,
    pub latency_p50_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
    pub latency_max_ms: Option<f64>,
    pub latency_mean_ms: Option<f64>,
    pub latency_stddev_ms: Option<f64>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

pub fn session_json(metrics: &SessionMetrics) -> SessionJson {
    let meta = &metrics.meta;
    let mut kinds = BTreeMap::new();
    for km in metrics.kinds().filter(|k| k.issued > 0) {
        let latency = km.latency();
        kinds.insert(
            km.kind.id.to_string(),
            KindJson {
                category: km.kind.category.as_str().to_string(),
                total_requests: km.issued,
                successful_requests: km.ok,
                failed_requests: km.failed(),
                failures: FailureJson {
                    http_error: km.http_errors,
                    timeout: km.timeouts,
                    transport: km.transport_errors,
                },
                duration_sec: round2(km.duration_sec()),
                throughput_qps: round2(km.throughput_qps()),
                error_rate: round4(km.error_rate()),
                bytes_received: km.bytes,
                latency_ms: LatencyJson {
                    min: latency.map(|l| round2(l.min_ms)),
                    mean: latency.map(|l| round2(l.mean_ms)),
                    stddev: latency.map(|l| round2(l.stddev_ms)),
                    p50: latency.map(|l| round2(l.p50_ms)),
                    p75: latency.map(|l| round2(l.p75_ms)),
                    p90: latency.map(|l| round2(l.p90_ms)),
                    p95: latency.map(|l| round2(l.p95_ms)),
                    p99: latency.map(|l| round2(l.p99_ms)),
                    p999: latency.map(|l| round2(l.p999_ms)),
                    max: latency.map(|l| round2(l.max_ms)),
                },
            },
        );
    }

    SessionJson {
        session: SessionJsonMeta {
            name: meta.name.clone(),
            sut_url: meta.sut_url.clone(),
            database: meta.database.clone(),
            pattern: meta.pattern.clone(),
            concurrency: meta.concurrency,
            requests: meta.requests,
            seed: meta.seed,
            cache_enabled: meta.cache_enabled,
            synthetic_data_used: meta.synthetic_data_used,
            interrupted: meta.interrupted,
            started_at: meta.started_at.clone(),
            finished_at: meta.finished_at.clone(),
            wall_seconds: round2(meta.wall_seconds),
            issued: metrics.issued(),
            ok: metrics.ok(),
            failed: metrics.failed(),
            error_rate: round4(metrics.error_rate()),
            throughput_qps: round2(metrics.total_qps()),
        },
        kinds,
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_default()
}

pub fn session_csv(metrics: &SessionMetrics) -> Result<String, BenchError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| BenchError::Internal(e.into()))?;
    for km in metrics.kinds().filter(|k| k.issued > 0) {
        let latency = km.latency();
        writer
            .write_record([
                km.kind.id.to_string(),
                km.issued.to_string(),
                km.ok.to_string(),
                km.failed().to_string(),
                format!("{:.2}", km.duration_sec()),
                format!("{:.2}", km.throughput_qps()),
                format!("{:.4}", km.error_rate()),
                fmt_opt(latency.map(|l| l.min_ms)),
                fmt_opt(latency.map(|l| l.p50_ms)),
                fmt_opt(latency.map(|l| l.p95_ms)),
                fmt_opt(latency.map(|l| l.p99_ms)),
                fmt_opt(latency.map(|l| l.max_ms)),
                fmt_opt(latency.map(|l| l.mean_ms)),
                fmt_opt(latency.map(|l| l.stddev_ms)),
            ])
            .map_err(|e| BenchError::Internal(e.into()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| BenchError::Internal(anyhow::anyhow!("csv flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| BenchError::Internal(e.into()))
}

pub fn parse_csv(raw: &str) -> Result<Vec<CsvRow>, BenchError> {
    let mut reader = csv::Reader::from_reader(raw.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.map_err(|e| BenchError::Internal(e.into()))?);
    }
    Ok(rows)
}

/// Re-derives per-kind verdicts from CSV rows alone; the CSV projection
/// carries everything the evaluator needs.
pub fn evaluate_rows(
    rows: &[CsvRow],
    catalog: &Catalog,
    thresholds: &Thresholds,
) -> BTreeMap<String, KindEvaluation> {
    let mut out = BTreeMap::new();
    for row in rows {
        let Some(kind) = catalog.get(&row.query_name) else { continue };
        out.insert(
            row.query_name.clone(),
            evaluate_kind(
                kind.category,
                row.total_requests,
                row.latency_p50_ms,
                row.latency_p95_ms,
                row.latency_p99_ms,
                row.error_rate,
                thresholds.for_category(kind.category),
                false,
            ),
        );
    }
    out
}

pub fn artifact_paths(prefix: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let json = PathBuf::from(format!("{}.json", prefix.display()));
    let csv = PathBuf::from(format!("{}.csv", prefix.display()));
    let eval = PathBuf::from(format!("{}-evaluation.json", prefix.display()));
    (json, csv, eval)
}

/// Writes `<prefix>.json`, `<prefix>.csv` and `<prefix>-evaluation.json`.
pub async fn write_artifacts(
    prefix: &Path,
    metrics: &SessionMetrics,
    evaluation: &SessionEvaluation,
) -> Result<(), BenchError> {
    if let Some(parent) = prefix.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let (json_path, csv_path, eval_path) = artifact_paths(prefix);

    let json = serde_json::to_string_pretty(&session_json(metrics))
        .map_err(|e| BenchError::Internal(e.into()))?;
    tokio::fs::write(&json_path, json).await?;

    tokio::fs::write(&csv_path, session_csv(metrics)?).await?;

    let eval = serde_json::to_string_pretty(evaluation).map_err(|e| BenchError::Internal(e.into()))?;
    tokio::fs::write(&eval_path, eval).await?;

    tracing::info!(
        "artifacts written: {}, {}, {}",
        json_path.display(),
        csv_path.display(),
        eval_path.display()
    );
    Ok(())
}

/// Per-kind table plus the aggregate verdict, on stdout.
pub fn print_console_summary(metrics: &SessionMetrics, evaluation: &SessionEvaluation) {
    let meta = &metrics.meta;
    println!();
    println!(
        "session {} against {} (pattern {}, concurrency {}, {} requests{})",
        meta.name,
        meta.sut_url,
        meta.pattern,
        meta.concurrency,
        meta.requests,
        if meta.interrupted { ", interrupted" } else { "" }
    );
    println!(
        "{:<18} {:>9} {:>9} {:>8} {:>10} {:>9} {:>9} {:>9} {:>9}  {}",
        "query", "requests", "ok", "failed", "qps", "p50(ms)", "p95(ms)", "p99(ms)", "max(ms)", "verdict"
    );
    for km in metrics.kinds().filter(|k| k.issued > 0) {
        let latency = km.latency();
        let verdict = evaluation
            .kinds
            .get(km.kind.id)
            .map(|e| e.verdict.as_str())
            .unwrap_or("-");
        let cell = |v: Option<f64>| v.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".into());
        println!(
            "{:<18} {:>9} {:>9} {:>8} {:>10.2} {:>9} {:>9} {:>9} {:>9}  {}",
            km.kind.id,
            km.issued,
            km.ok,
            km.failed(),
            km.throughput_qps(),
            cell(latency.map(|l| l.p50_ms)),
            cell(latency.map(|l| l.p95_ms)),
            cell(latency.map(|l| l.p99_ms)),
            cell(latency.map(|l| l.max_ms)),
            verdict
        );
    }
    println!(
        "aggregate: {} issued, {} ok, {} failed, error rate {:.2}%, verdict {}",
        metrics.issued(),
        metrics.ok(),
        metrics.failed(),
        metrics.error_rate() * 100.0,
        evaluation.verdict.as_str()
    );
}
