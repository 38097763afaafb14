use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::catalog::{Catalog, HttpMethod};
use crate::config::RunConfig;
use crate::dataset::DatasetSelector;
use crate::error::BenchError;
use crate::metrics::{collector_channel, Observation, Outcome, SessionMeta, SessionMetrics};
use crate::workload::{MixPattern, RequestPlan, WorkloadGenerator};

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const PROGRESS_EVERY: u64 = 500;
const MAILBOX_FACTOR: usize = 4;

/// Identity and limits of one session, resolved before issuance starts.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: String,
    pub base_url: String,
    pub database: Option<String>,
    pub db_prefix: Option<String>,
    pub pattern: String,
    pub requests: u64,
    pub concurrency: usize,
    pub seed: u64,
    pub cache_enabled: bool,
}

pub fn build_client(timeout: Duration) -> Result<Client, BenchError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BenchError::Invariant(format!("http client construction failed: {e}")))
}

/// Readiness probe against `GET /health` before any load is issued.
pub async fn preflight(client: &Client, base_url: &str) -> Result<(), BenchError> {
    let url = format!("{}/health", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(BenchError::Preflight {
            url: base_url.to_string(),
            reason: format!(
                "health endpoint returned {}; is the SUT fully started and its database loaded?",
                resp.status()
            ),
        }),
        Err(e) => Err(BenchError::Preflight {
            url: base_url.to_string(),
            reason: format!("{e}; check the URL and that the SUT is listening"),
        }),
    }
}

/// Resolves only once the flag is raised; pends forever if the signal task
/// goes away without raising it.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn classify(e: &reqwest::Error) -> Outcome {
    if e.is_timeout() {
        Outcome::Timeout
    } else {
        Outcome::Transport { message: e.to_string() }
    }
}

async fn execute_plan(
    client: &Client,
    base: &str,
    prefix: Option<&str>,
    plan: &RequestPlan,
    session_start: Instant,
) -> Observation {
    let url = format!("{base}{}", plan.kind.path(&plan.value, prefix));
    let start = Instant::now();
    let start_ns = start.duration_since(session_start).as_nanos() as u64;

    let request = match plan.kind.method {
        HttpMethod::Get => client.get(&url),
        HttpMethod::Post => client.post(&url).json(plan.body.as_ref().unwrap_or(&serde_json::Value::Null)),
    };

    let outcome = match request.send().await {
        Ok(resp) => {
            let status = resp.status();
            // Drain the body so the latency covers the full response.
            let body = resp.bytes().await;
            if status.is_success() {
                match body {
                    Ok(bytes) => Outcome::Ok {
                        status: status.as_u16(),
                        bytes: bytes.len() as u64,
                    },
                    Err(e) => classify(&e),
                }
            } else {
                Outcome::HttpError { status: status.as_u16() }
            }
        }
        Err(e) => classify(&e),
    };

    Observation {
        kind: plan.kind,
        start_ns,
        latency_ns: start.elapsed().as_nanos() as u64,
        outcome,
    }
}

fn flatten_worker(res: Result<Result<(), BenchError>, JoinError>) -> Result<(), BenchError> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(BenchError::Invariant(format!("worker task failed: {e}"))),
    }
}

/// Drives one request sequence against the SUT with at most
/// `spec.concurrency` requests in flight. Failed requests are classified and
/// counted, never retried. On interruption, issuance stops at once,
/// in-flight requests get a short grace period, and whatever has been
/// observed is snapshotted with `interrupted = true`.
pub async fn run_session(
    client: &Client,
    spec: &SessionSpec,
    generator: WorkloadGenerator,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionMetrics, BenchError> {
    let catalog = generator.catalog();
    let synthetic_data_used = generator.selector().synthetic_data_used();
    let workers = spec.concurrency.max(1);

    let started_at = Utc::now();
    let session_start = Instant::now();

    let (obs_tx, collector) = collector_channel(catalog, workers * MAILBOX_FACTOR)?;
    let collector_handle = tokio::spawn(collector.run());

    // Plans are produced lazily: the bounded channel keeps at most one
    // concurrency window of unissued plans materialised.
    let (plan_tx, plan_rx) = mpsc::channel::<RequestPlan>(workers);
    let plan_rx = Arc::new(Mutex::new(plan_rx));
    let mut producer_shutdown = shutdown.clone();
    let producer = tokio::spawn(async move {
        let mut generator = generator;
        while let Some(plan) = generator.next() {
            tokio::select! {
                res = plan_tx.send(plan) => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = shutdown_signalled(&mut producer_shutdown) => break,
            }
        }
    });

    let completed = Arc::new(AtomicU64::new(0));
    let mut tasks: JoinSet<Result<(), BenchError>> = JoinSet::new();
    for _ in 0..workers {
        let client = client.clone();
        let plan_rx = plan_rx.clone();
        let obs_tx = obs_tx.clone();
        let shutdown = shutdown.clone();
        let completed = completed.clone();
        let base = spec.base_url.trim_end_matches('/').to_string();
        let prefix = spec.db_prefix.clone();
        let session_name = spec.name.clone();
        let budget = spec.requests;
        tasks.spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let plan = { plan_rx.lock().await.recv().await };
                let Some(plan) = plan else { break };

                let obs = execute_plan(&client, &base, prefix.as_deref(), &plan, session_start).await;
                obs_tx.try_send(obs).map_err(|e| match e {
                    mpsc::error::TrySendError::Full(_) => {
                        BenchError::Invariant("observation mailbox overflow".into())
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        BenchError::Invariant("observation mailbox closed while issuing".into())
                    }
                })?;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % PROGRESS_EVERY == 0 {
                    let rps = done as f64 / session_start.elapsed().as_secs_f64().max(0.001);
                    tracing::info!(
                        "session={} completed {}/{} requests, {:.2} req/s",
                        session_name,
                        done,
                        budget,
                        rps
                    );
                }
            }
            Ok(())
        });
    }
    // Workers hold the only live clones; without this drop the producer
    // would never observe channel closure.
    drop(plan_rx);

    let mut interrupted = false;
    let mut shutdown_watch = shutdown.clone();
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(res) => flatten_worker(res)?,
                None => break,
            },
            _ = shutdown_signalled(&mut shutdown_watch), if !interrupted => {
                interrupted = true;
                tracing::warn!(
                    "interrupt received, stopping issuance and draining in-flight requests (\u{2264}{}s)",
                    GRACE_PERIOD.as_secs()
                );
                let deadline = Instant::now() + GRACE_PERIOD;
                loop {
                    match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                        Ok(Some(res)) => flatten_worker(res)?,
                        Ok(None) => break,
                        Err(_) => {
                            tasks.abort_all();
                            while let Some(res) = tasks.join_next().await {
                                flatten_worker(res)?;
                            }
                            break;
                        }
                    }
                }
                break;
            }
        }
    }

    producer.abort();
    let _ = producer.await;

    drop(obs_tx);
    let kinds = collector_handle
        .await
        .map_err(|e| BenchError::Invariant(format!("collector task failed: {e}")))??;

    let wall_seconds = session_start.elapsed().as_secs_f64();
    let meta = SessionMeta {
        name: spec.name.clone(),
        sut_url: spec.base_url.clone(),
        database: spec.database.clone(),
        pattern: spec.pattern.clone(),
        concurrency: spec.concurrency,
        requests: spec.requests,
        seed: spec.seed,
        cache_enabled: spec.cache_enabled,
        synthetic_data_used,
        interrupted: interrupted || *shutdown.borrow(),
        started_at: started_at.to_rfc3339(),
        finished_at: Utc::now().to_rfc3339(),
        wall_seconds,
    };

    let metrics = SessionMetrics::new(meta, kinds);
    tracing::info!(
        "session={} finished: {} issued, {} ok, {} failed in {:.2}s",
        spec.name,
        metrics.issued(),
        metrics.ok(),
        metrics.failed(),
        wall_seconds
    );
    Ok(metrics)
}

/// Full single-run flow: preflight, optional warm-up (discarded), then the
/// measured session.
pub async fn run_benchmark(
    cfg: &RunConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<SessionMetrics, BenchError> {
    let catalog = Catalog::standard();
    let pattern = MixPattern::parse(&cfg.pattern)?;
    let client = build_client(cfg.timeout)?;
    preflight(&client, &cfg.base_url).await?;

    let selector = DatasetSelector::load(cfg.dataset.as_deref())?;
    let name = cfg.name.clone().unwrap_or_else(|| pattern.name.clone());

    let spec = SessionSpec {
        name,
        base_url: cfg.base_url.clone(),
        database: cfg.db_prefix.clone(),
        db_prefix: cfg.db_prefix.clone(),
        pattern: pattern.name.clone(),
        requests: cfg.requests,
        concurrency: cfg.concurrency,
        seed: cfg.seed,
        cache_enabled: cfg.cache_enabled,
    };

    if cfg.warmup > 0 && !*shutdown.borrow() {
        tracing::info!("warming up with {} requests of {}", cfg.warmup, pattern.name);
        let warm_spec = SessionSpec {
            name: format!("{}-warmup", spec.name),
            requests: cfg.warmup,
            ..spec.clone()
        };
        let generator =
            WorkloadGenerator::new(catalog, &pattern, selector.clone(), cfg.warmup, cfg.seed)?;
        let warm = run_session(&client, &warm_spec, generator, shutdown.clone()).await?;
        if warm.meta.interrupted {
            tracing::warn!("interrupted during warm-up, skipping the measured session");
            return Ok(warm);
        }
    }

    let generator = WorkloadGenerator::new(catalog, &pattern, selector, cfg.requests, cfg.seed)?;
    run_session(&client, &spec, generator, shutdown).await
}
