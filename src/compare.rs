use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::catalog::{Catalog, Category, TopCategory};
use crate::config::{CompareConfig, TestType};
use crate::dataset::DatasetSelector;
use crate::error::BenchError;
use crate::executor::{build_client, preflight, run_session, SessionSpec};
use crate::metrics::SessionMetrics;
use crate::report::{print_console_summary, write_artifacts};
use crate::thresholds::{evaluate_session, Thresholds, Verdict};
use crate::workload::{MixPattern, WorkloadGenerator};

const WARMUP_REQUESTS: u64 = 5_000;
const WARMUP_PATTERN: &str = "lookup-95";

/// Points awarded for the highest concurrency level a database still
/// clears without failing.
pub fn scalability_points(level: Option<usize>) -> f64 {
    match level {
        Some(l) if l >= 100 => 15.0,
        Some(l) if l >= 50 => 12.0,
        Some(l) if l >= 20 => 9.0,
        Some(_) => 6.0,
        None => 0.0,
    }
}

/// One measured cell of the {database, pattern, concurrency} matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub database: String,
    pub pattern: String,
    pub concurrency: usize,
    pub verdict: Verdict,
    pub representative_kind: String,
    pub representative_p99_ms: Option<f64>,
    pub total_qps: f64,
    pub error_rate: f64,
    pub interrupted: bool,
    pub artifact_prefix: String,
}

/// Externally assessed curation and operational scalars, each in [0, 10].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct ExternalScores {
    #[serde(default)]
    pub self_service: f64,
    #[serde(default)]
    pub visualisation: f64,
    #[serde(default)]
    pub resource_efficiency: f64,
    #[serde(default)]
    pub stability: f64,
    #[serde(default)]
    pub config_complexity: f64,
    #[serde(default)]
    pub ecosystem: f64,
}

pub type ScoreFile = BTreeMap<String, ExternalScores>;

pub fn load_scores(path: Option<&Path>) -> Result<ScoreFile, BenchError> {
    let Some(path) = path else {
        return Ok(ScoreFile::new());
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                "scores file {} unreadable ({e}); curation/operational dimensions score zero",
                path.display()
            );
            return Ok(ScoreFile::new());
        }
    };
    serde_json::from_str(&raw)
        .map_err(|e| BenchError::Usage(format!("malformed scores file {}: {e}", path.display())))
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossoverEntry {
    pub pattern: String,
    pub winner: String,
    pub winner_p99_ms: f64,
    pub runner_up: Option<String>,
    pub runner_up_p99_ms: Option<f64>,
    pub margin: Option<f64>,
}

/// Per-pattern winner by representative-kind p99, with the relative margin
/// over the runner-up.
pub fn crossover(rows: &[ComparisonRow]) -> Vec<CrossoverEntry> {
    let mut patterns: Vec<&str> = Vec::new();
    for row in rows {
        if !patterns.contains(&row.pattern.as_str()) {
            patterns.push(&row.pattern);
        }
    }

    let mut entries = Vec::new();
    for pattern in patterns {
        let mut ranked: Vec<(&ComparisonRow, f64)> = rows
            .iter()
            .filter(|r| r.pattern == pattern)
            .filter_map(|r| r.representative_p99_ms.map(|p| (r, p)))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        let Some(&(winner, winner_p99)) = ranked.first() else { continue };
        let runner_up = ranked.get(1);
        entries.push(CrossoverEntry {
            pattern: pattern.to_string(),
            winner: winner.database.clone(),
            winner_p99_ms: winner_p99,
            runner_up: runner_up.map(|(r, _)| r.database.clone()),
            runner_up_p99_ms: runner_up.map(|&(_, p)| p),
            margin: runner_up.map(|&(_, p)| if p > 0.0 { (p - winner_p99) / p } else { 0.0 }),
        });
    }
    entries
}

pub fn win_rates(entries: &[CrossoverEntry], databases: &[String]) -> BTreeMap<String, f64> {
    let mut rates = BTreeMap::new();
    for db in databases {
        let wins = entries.iter().filter(|e| &e.winner == db).count();
        let rate = match entries.len() {
            0 => 0.0,
            n => wins as f64 / n as f64,
        };
        rates.insert(db.clone(), rate);
    }
    rates
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionScore {
    pub database: String,
    pub p99_points: f64,
    pub throughput_points: f64,
    pub scalability_points: f64,
    pub performance_points: f64,
    pub curation_points: f64,
    pub operational_points: f64,
    pub total: f64,
    pub best_verdict: Verdict,
    pub requires_mitigation: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub scores: Vec<DecisionScore>,
    pub winner: String,
    pub tie_break: Option<String>,
    pub win_rates: BTreeMap<String, f64>,
}

fn clamp10(v: f64) -> f64 {
    v.clamp(0.0, 10.0)
}

/// Weighted scoring out of 100: performance 60 (p99 30, throughput 15,
/// scalability 15), curation 20, operational 20.
pub fn score(
    databases: &[String],
    workload_rows: &[ComparisonRow],
    concurrency_rows: &[ComparisonRow],
    external: &ScoreFile,
) -> Option<Decision> {
    if databases.is_empty() {
        return None;
    }

    let patterns: Vec<&str> = {
        let mut p = Vec::new();
        for row in workload_rows {
            if !p.contains(&row.pattern.as_str()) {
                p.push(&row.pattern);
            }
        }
        p
    };

    let p99_of = |db: &str, pattern: &str| -> Option<f64> {
        workload_rows
            .iter()
            .find(|r| r.database == db && r.pattern == pattern)
            .and_then(|r| r.representative_p99_ms)
    };

    let avg_qps = |db: &str| -> f64 {
        let rows: Vec<&ComparisonRow> =
            workload_rows.iter().filter(|r| r.database == db).collect();
        match rows.len() {
            0 => 0.0,
            n => rows.iter().map(|r| r.total_qps).sum::<f64>() / n as f64,
        }
    };

    let max_qps = databases
        .iter()
        .map(|db| avg_qps(db))
        .fold(0.0f64, f64::max);

    let all_rows = |db: &str| -> Vec<&ComparisonRow> {
        workload_rows
            .iter()
            .chain(concurrency_rows.iter())
            .filter(|r| r.database == db)
            .collect()
    };

    let mut scores = Vec::new();
    for db in databases {
        // p99 component: 30 x min_p99/this_p99, averaged over patterns.
        let mut components = Vec::new();
        for pattern in &patterns {
            let Some(this) = p99_of(db, pattern) else { continue };
            let best = databases
                .iter()
                .filter_map(|d| p99_of(d, pattern))
                .fold(f64::INFINITY, f64::min);
            if this > 0.0 && best.is_finite() {
                components.push(30.0 * best / this);
            }
        }
        let p99_points = match components.len() {
            0 => 0.0,
            n => components.iter().sum::<f64>() / n as f64,
        };

        let throughput_points = match max_qps > 0.0 {
            true => 15.0 * avg_qps(db) / max_qps,
            false => 0.0,
        };

        let best_passing_level = concurrency_rows
            .iter()
            .chain(workload_rows.iter())
            .filter(|r| r.database == *db && r.verdict != Verdict::Fail)
            .map(|r| r.concurrency)
            .max();
        let scalability = scalability_points(best_passing_level);

        let ext = external.get(db).copied().unwrap_or_default();
        let curation_points = clamp10(ext.self_service) + clamp10(ext.visualisation);
        let operational_points = (clamp10(ext.resource_efficiency)
            + clamp10(ext.stability)
            + clamp10(ext.config_complexity)
            + clamp10(ext.ecosystem))
            / 2.0;

        let best_verdict = all_rows(db)
            .iter()
            .map(|r| r.verdict)
            .min()
            .unwrap_or(Verdict::Fail);
        let performance_points = p99_points + throughput_points + scalability;

        scores.push(DecisionScore {
            database: db.clone(),
            p99_points,
            throughput_points,
            scalability_points: scalability,
            performance_points,
            curation_points,
            operational_points,
            total: performance_points + curation_points + operational_points,
            best_verdict,
            requires_mitigation: best_verdict == Verdict::Fail,
        });
    }

    scores.sort_by(|a, b| b.total.total_cmp(&a.total));
    let top_total = scores[0].total;

    // Databases within five points contest the win; break ties by verdict
    // priority, then curation, then operational subtotal.
    let mut contenders: Vec<&DecisionScore> =
        scores.iter().filter(|s| top_total - s.total < 5.0).collect();
    let tie_break = (contenders.len() > 1).then(|| {
        contenders.sort_by(|a, b| {
            a.best_verdict
                .cmp(&b.best_verdict)
                .then(b.curation_points.total_cmp(&a.curation_points))
                .then(b.operational_points.total_cmp(&a.operational_points))
                .then(b.total.total_cmp(&a.total))
        });
        format!(
            "scores within 5 points; tie broken by verdict, curation, operational in favour of {}",
            contenders[0].database
        )
    });
    let winner = contenders
        .first()
        .map(|s| s.database.clone())
        .unwrap_or_else(|| scores[0].database.clone());

    Some(Decision {
        winner,
        tie_break,
        scores,
        win_rates: BTreeMap::new(),
    })
}

/// The kind whose p99 stands in for a pattern: the representative of its
/// dominant top-level category.
pub fn representative_kind(catalog: &Catalog, pattern: &MixPattern) -> &'static str {
    let category = match pattern.dominant() {
        TopCategory::Lookup => Category::IdentifierLookup,
        TopCategory::Analytics => Category::TwoHop,
        TopCategory::Write => Category::PropertyWrite,
    };
    catalog.representative(category).id
}

fn comparison_row(
    catalog: &Catalog,
    thresholds: &Thresholds,
    pattern: &MixPattern,
    database: &str,
    metrics: &SessionMetrics,
    artifact_prefix: &str,
) -> ComparisonRow {
    let rep = representative_kind(catalog, pattern);
    let p99 = metrics
        .kind(rep)
        .and_then(|k| k.latency())
        .map(|l| (l.p99_ms * 100.0).round() / 100.0);
    let evaluation = evaluate_session(metrics, thresholds);
    ComparisonRow {
        database: database.to_string(),
        pattern: pattern.name.clone(),
        concurrency: metrics.meta.concurrency,
        verdict: evaluation.verdict,
        representative_kind: rep.to_string(),
        representative_p99_ms: p99,
        total_qps: (metrics.total_qps() * 100.0).round() / 100.0,
        error_rate: metrics.error_rate(),
        interrupted: metrics.meta.interrupted,
        artifact_prefix: artifact_prefix.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct SummaryFile<'a> {
    generated_at: String,
    test_type: &'static str,
    sut_url: &'a str,
    requests: u64,
    rows: &'a [ComparisonRow],
}

fn render_markdown(
    entries: &[CrossoverEntry],
    rates: &BTreeMap<String, f64>,
    decision: Option<&Decision>,
) -> String {
    let mut md = String::new();
    md.push_str("# Crossover Analysis\n\n");
    md.push_str(&format!("Generated {}\n\n", Utc::now().to_rfc3339()));

    md.push_str("## Pattern winners\n\n");
    md.push_str("| Pattern | Winner | p99 (ms) | Runner-up | Runner-up p99 (ms) | Margin |\n");
    md.push_str("|---|---|---|---|---|---|\n");
    for e in entries {
        md.push_str(&format!(
            "| {} | {} | {:.2} | {} | {} | {} |\n",
            e.pattern,
            e.winner,
            e.winner_p99_ms,
            e.runner_up.as_deref().unwrap_or("-"),
            e.runner_up_p99_ms.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into()),
            e.margin.map(|m| format!("{:.1}%", m * 100.0)).unwrap_or_else(|| "-".into()),
        ));
    }

    md.push_str("\n## Win rate\n\n| Database | Win rate |\n|---|---|\n");
    for (db, rate) in rates {
        md.push_str(&format!("| {} | {:.0}% |\n", db, rate * 100.0));
    }

    if let Some(decision) = decision {
        md.push_str("\n## Weighted scores\n\n");
        md.push_str(
            "| Database | p99 (30) | Throughput (15) | Scalability (15) | Curation (20) | Operational (20) | Total | Verdict |\n",
        );
        md.push_str("|---|---|---|---|---|---|---|---|\n");
        for s in &decision.scores {
            md.push_str(&format!(
                "| {} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {:.1} | {}{} |\n",
                s.database,
                s.p99_points,
                s.throughput_points,
                s.scalability_points,
                s.curation_points,
                s.operational_points,
                s.total,
                s.best_verdict.as_str(),
                if s.requires_mitigation { " (requires mitigation)" } else { "" },
            ));
        }
        md.push_str(&format!("\n**Winner: {}**\n", decision.winner));
        if let Some(note) = &decision.tie_break {
            md.push_str(&format!("\n{note}\n"));
        }
    }
    md
}

/// Runs the full comparison matrix in process: for every cell, a discarded
/// warm-up session followed by a measured one, then crossover analysis and
/// weighted scoring over the results.
pub async fn run_compare(
    cfg: &CompareConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Verdict, BenchError> {
    if cfg.databases.is_empty() {
        return Err(BenchError::Usage("--databases must name at least one target".into()));
    }
    if cfg.workloads.is_empty() {
        return Err(BenchError::Usage("--workloads must name at least one pattern".into()));
    }
    if cfg.concurrency_levels.is_empty() {
        return Err(BenchError::Usage("--concurrency must name at least one level".into()));
    }

    let catalog = Catalog::standard();
    let thresholds = Thresholds::baseline();
    let client = build_client(cfg.timeout)?;
    preflight(&client, &cfg.base_url).await?;
    let selector = DatasetSelector::load(cfg.dataset.as_deref())?;
    let external = load_scores(cfg.scores.as_deref())?;

    let mut patterns = Vec::with_capacity(cfg.workloads.len());
    for w in &cfg.workloads {
        patterns.push(MixPattern::parse(w)?);
    }
    let warmup_pattern = MixPattern::parse(WARMUP_PATTERN)?;

    let mut workload_rows: Vec<ComparisonRow> = Vec::new();
    let mut concurrency_rows: Vec<ComparisonRow> = Vec::new();
    let mut worst = Verdict::Pass;
    let mut interrupted = false;

    let mut cells: Vec<(usize, MixPattern, usize, bool)> = Vec::new();
    if matches!(cfg.test_type, TestType::Workload | TestType::Both) {
        let level = cfg.concurrency_levels[0];
        for (db_idx, _) in cfg.databases.iter().enumerate() {
            for pattern in &patterns {
                cells.push((db_idx, pattern.clone(), level, true));
            }
        }
    }
    if matches!(cfg.test_type, TestType::Concurrency | TestType::Both) {
        for (db_idx, _) in cfg.databases.iter().enumerate() {
            for &level in &cfg.concurrency_levels {
                cells.push((db_idx, patterns[0].clone(), level, false));
            }
        }
    }

    for (db_idx, pattern, level, is_workload) in cells {
        if *shutdown.borrow() {
            interrupted = true;
            break;
        }
        let db = &cfg.databases[db_idx];
        let prefix_name = format!(
            "{}-{}-c{}",
            db.name,
            pattern.name.replace('/', "-"),
            level
        );
        tracing::info!(
            "measuring database={} pattern={} concurrency={}",
            db.name,
            pattern.name,
            level
        );

        let spec = SessionSpec {
            name: prefix_name.clone(),
            base_url: cfg.base_url.clone(),
            database: Some(db.name.clone()),
            db_prefix: Some(db.prefix.clone()),
            pattern: pattern.name.clone(),
            requests: cfg.requests,
            concurrency: level,
            seed: cfg.seed,
            cache_enabled: false,
        };

        if cfg.warmup {
            let warm_spec = SessionSpec {
                name: format!("{prefix_name}-warmup"),
                pattern: warmup_pattern.name.clone(),
                requests: WARMUP_REQUESTS,
                ..spec.clone()
            };
            let generator = WorkloadGenerator::new(
                catalog,
                &warmup_pattern,
                selector.clone(),
                WARMUP_REQUESTS,
                cfg.seed,
            )?;
            let warm = run_session(&client, &warm_spec, generator, shutdown.clone()).await?;
            if warm.meta.interrupted {
                interrupted = true;
                break;
            }
        }

        let generator =
            WorkloadGenerator::new(catalog, &pattern, selector.clone(), cfg.requests, cfg.seed)?;
        let metrics = run_session(&client, &spec, generator, shutdown.clone()).await?;
        let evaluation = evaluate_session(&metrics, &thresholds);
        print_console_summary(&metrics, &evaluation);

        let artifact_prefix = cfg.output_dir.join(&prefix_name);
        write_artifacts(&artifact_prefix, &metrics, &evaluation).await?;

        let row = comparison_row(
            &catalog,
            &thresholds,
            &pattern,
            &db.name,
            &metrics,
            &artifact_prefix.display().to_string(),
        );
        worst = worst.max(row.verdict);
        if metrics.meta.interrupted {
            interrupted = true;
        }
        match is_workload {
            true => workload_rows.push(row),
            false => concurrency_rows.push(row),
        }
        if interrupted {
            break;
        }
    }

    let names: Vec<String> = cfg.databases.iter().map(|d| d.name.clone()).collect();
    let entries = crossover(&workload_rows);
    let rates = win_rates(&entries, &names);
    let mut decision = score(&names, &workload_rows, &concurrency_rows, &external);
    if let Some(d) = decision.as_mut() {
        d.win_rates = rates.clone();
    }

    tokio::fs::create_dir_all(&cfg.output_dir).await?;
    if !workload_rows.is_empty() {
        let summary = SummaryFile {
            generated_at: Utc::now().to_rfc3339(),
            test_type: "workload",
            sut_url: &cfg.base_url,
            requests: cfg.requests,
            rows: &workload_rows,
        };
        tokio::fs::write(
            cfg.output_dir.join("workload_summary.json"),
            serde_json::to_string_pretty(&summary).map_err(|e| BenchError::Internal(e.into()))?,
        )
        .await?;
    }
    if !concurrency_rows.is_empty() {
        let summary = SummaryFile {
            generated_at: Utc::now().to_rfc3339(),
            test_type: "concurrency",
            sut_url: &cfg.base_url,
            requests: cfg.requests,
            rows: &concurrency_rows,
        };
        tokio::fs::write(
            cfg.output_dir.join("concurrency_summary.json"),
            serde_json::to_string_pretty(&summary).map_err(|e| BenchError::Internal(e.into()))?,
        )
        .await?;
    }
    tokio::fs::write(
        cfg.output_dir.join("CROSSOVER_ANALYSIS.md"),
        render_markdown(&entries, &rates, decision.as_ref()),
    )
    .await?;

    if let Some(decision) = &decision {
        tracing::info!(
            "comparison winner: {}{}",
            decision.winner,
            decision.tie_break.as_deref().map(|t| format!(" ({t})")).unwrap_or_default()
        );
    }

    if interrupted {
        return Err(BenchError::Interrupted);
    }
    Ok(worst)
}
