use std::collections::BTreeMap;

use hdrhistogram::Histogram;
use tokio::sync::mpsc;

use crate::catalog::{Catalog, QueryKind};
use crate::error::BenchError;

/// Tracked latency range: 1 µs to 60 s at three significant digits.
const HIST_LOW_NS: u64 = 1_000;
const HIST_HIGH_NS: u64 = 60_000_000_000;
const HIST_SIGFIG: u8 = 3;

const NS_PER_MS: f64 = 1_000_000.0;
const NS_PER_SEC: f64 = 1_000_000_000.0;

/// Classified result of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok { status: u16, bytes: u64 },
    HttpError { status: u16 },
    Timeout,
    Transport { message: String },
}

/// One issued request, timed on monotonic clocks. `start_ns` is the offset
/// from the session start instant.
#[derive(Debug, Clone)]
pub struct Observation {
    pub kind: &'static QueryKind,
    pub start_ns: u64,
    pub latency_ns: u64,
    pub outcome: Outcome,
}

/// Latency summary in milliseconds, present only when at least one request
/// succeeded. Failed requests never contribute to the distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p999_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug)]
pub struct KindMetrics {
    pub kind: &'static QueryKind,
    hist: Histogram<u64>,
    pub issued: u64,
    pub ok: u64,
    pub http_errors: u64,
    pub timeouts: u64,
    pub transport_errors: u64,
    pub bytes: u64,
    pub first_ns: Option<u64>,
    pub last_ns: Option<u64>,
}

impl KindMetrics {
    fn new(kind: &'static QueryKind) -> Result<Self, BenchError> {
        let hist = Histogram::new_with_bounds(HIST_LOW_NS, HIST_HIGH_NS, HIST_SIGFIG)
            .map_err(|e| BenchError::Invariant(format!("histogram construction failed: {e}")))?;
        Ok(Self {
            kind,
            hist,
            issued: 0,
            ok: 0,
            http_errors: 0,
            timeouts: 0,
            transport_errors: 0,
            bytes: 0,
            first_ns: None,
            last_ns: None,
        })
    }

    fn record(&mut self, obs: &Observation) -> Result<(), BenchError> {
        self.issued += 1;
        let end_ns = obs.start_ns.saturating_add(obs.latency_ns);
        self.first_ns = Some(self.first_ns.map_or(obs.start_ns, |f| f.min(obs.start_ns)));
        self.last_ns = Some(self.last_ns.map_or(end_ns, |l| l.max(end_ns)));

        match &obs.outcome {
            Outcome::Ok { bytes, .. } => {
                self.ok += 1;
                self.bytes += bytes;
                self.hist
                    .record(obs.latency_ns.max(1))
                    .map_err(|e| BenchError::Invariant(format!("latency out of histogram range: {e}")))?;
            }
            Outcome::HttpError { .. } => self.http_errors += 1,
            Outcome::Timeout => self.timeouts += 1,
            Outcome::Transport { .. } => self.transport_errors += 1,
        }
        Ok(())
    }

    pub fn failed(&self) -> u64 {
        self.http_errors + self.timeouts + self.transport_errors
    }

    pub fn error_rate(&self) -> f64 {
        match self.issued {
            0 => 0.0,
            issued => self.failed() as f64 / issued as f64,
        }
    }

    /// Observed wall span for this kind, in seconds.
    pub fn duration_sec(&self) -> f64 {
        match (self.first_ns, self.last_ns) {
            (Some(first), Some(last)) => (last.saturating_sub(first)) as f64 / NS_PER_SEC,
            _ => 0.0,
        }
    }

    pub fn throughput_qps(&self) -> f64 {
        match self.ok {
            0 => 0.0,
            ok => ok as f64 / self.duration_sec().max(0.001),
        }
    }

    pub fn latency(&self) -> Option<LatencySummary> {
        if self.hist.is_empty() {
            return None;
        }
        let q = |quantile: f64| self.hist.value_at_quantile(quantile) as f64 / NS_PER_MS;
        Some(LatencySummary {
            min_ms: self.hist.min() as f64 / NS_PER_MS,
            mean_ms: self.hist.mean() / NS_PER_MS,
            stddev_ms: self.hist.stdev() / NS_PER_MS,
            p50_ms: q(0.50),
            p75_ms: q(0.75),
            p90_ms: q(0.90),
            p95_ms: q(0.95),
            p99_ms: q(0.99),
            p999_ms: q(0.999),
            max_ms: self.hist.max() as f64 / NS_PER_MS,
        })
    }
}

/// Session identity and bookkeeping carried into every artifact.
#[derive(Debug, Clone)]
pub struct SessionMeta {
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
}

/// Immutable snapshot of one benchmark run.
#[derive(Debug)]
pub struct SessionMetrics {
    pub meta: SessionMeta,
    kinds: BTreeMap<&'static str, KindMetrics>,
}

impl SessionMetrics {
    pub fn new(meta: SessionMeta, kinds: BTreeMap<&'static str, KindMetrics>) -> Self {
        Self { meta, kinds }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &KindMetrics> {
        self.kinds.values()
    }

    pub fn kind(&self, id: &str) -> Option<&KindMetrics> {
        self.kinds.get(id)
    }

    pub fn issued(&self) -> u64 {
        self.kinds.values().map(|k| k.issued).sum()
    }

    pub fn ok(&self) -> u64 {
        self.kinds.values().map(|k| k.ok).sum()
    }

    pub fn failed(&self) -> u64 {
        self.kinds.values().map(|k| k.failed()).sum()
    }

    pub fn error_rate(&self) -> f64 {
        match self.issued() {
            0 => 0.0,
            issued => self.failed() as f64 / issued as f64,
        }
    }

    pub fn total_qps(&self) -> f64 {
        match self.ok() {
            0 => 0.0,
            ok => ok as f64 / self.meta.wall_seconds.max(0.001),
        }
    }
}

/// Single-writer folder for observations. Executor workers push into a
/// bounded mailbox; this task owns every histogram, so no percentile is ever
/// read mid-update.
pub struct Collector {
    rx: mpsc::Receiver<Observation>,
    kinds: BTreeMap<&'static str, KindMetrics>,
}

pub fn collector_channel(
    catalog: Catalog,
    capacity: usize,
) -> Result<(mpsc::Sender<Observation>, Collector), BenchError> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let mut kinds = BTreeMap::new();
    for kind in catalog.kinds() {
        kinds.insert(kind.id, KindMetrics::new(kind)?);
    }
    Ok((tx, Collector { rx, kinds }))
}

impl Collector {
    pub async fn run(mut self) -> Result<BTreeMap<&'static str, KindMetrics>, BenchError> {
        while let Some(obs) = self.rx.recv().await {
            let metrics = self
                .kinds
                .get_mut(obs.kind.id)
                .ok_or_else(|| BenchError::Invariant(format!("observation for unknown kind {}", obs.kind.id)))?;
            metrics.record(&obs)?;
        }
        Ok(self.kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn kind(id: &str) -> &'static QueryKind {
        Catalog::standard().get(id).unwrap()
    }

    fn ok_obs(id: &str, start_ns: u64, latency_ns: u64) -> Observation {
        Observation {
            kind: kind(id),
            start_ns,
            latency_ns,
            outcome: Outcome::Ok { status: 200, bytes: 128 },
        }
    }

    #[test]
    fn counters_are_conserved() {
        let mut m = KindMetrics::new(kind("mode_s")).unwrap();
        m.record(&ok_obs("mode_s", 0, 1_000_000)).unwrap();
        m.record(&Observation {
            kind: kind("mode_s"),
            start_ns: 1_000,
            latency_ns: 2_000_000,
            outcome: Outcome::HttpError { status: 500 },
        })
        .unwrap();
        m.record(&Observation {
            kind: kind("mode_s"),
            start_ns: 2_000,
            latency_ns: 30_000_000_000,
            outcome: Outcome::Timeout,
        })
        .unwrap();

        assert_eq!(m.issued, 3);
        assert_eq!(m.ok + m.failed(), m.issued);
        assert_eq!(m.failed(), 2);
        assert!((m.error_rate() - 2.0 / 3.0).abs() < 1e-9);
        // Failures are excluded from the latency distribution.
        assert_eq!(m.latency().unwrap().max_ms, m.latency().unwrap().min_ms);
    }

    #[test]
    fn percentiles_are_monotonic() {
        let mut m = KindMetrics::new(kind("country_two_hop")).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        for i in 0..5_000u64 {
            let latency = rng.gen_range(50_000..500_000_000u64);
            m.record(&ok_obs("country_two_hop", i * 1_000, latency)).unwrap();
        }
        let l = m.latency().unwrap();
        assert!(l.min_ms <= l.p50_ms);
        assert!(l.p50_ms <= l.p75_ms);
        assert!(l.p75_ms <= l.p90_ms);
        assert!(l.p90_ms <= l.p95_ms);
        assert!(l.p95_ms <= l.p99_ms);
        assert!(l.p99_ms <= l.p999_ms);
        assert!(l.p999_ms <= l.max_ms);
    }

    #[test]
    fn empty_distribution_reports_none() {
        let m = KindMetrics::new(kind("mmsi")).unwrap();
        assert!(m.latency().is_none());
        assert_eq!(m.throughput_qps(), 0.0);
        assert_eq!(m.error_rate(), 0.0);
    }

    #[test]
    fn all_failures_leave_distribution_empty() {
        let mut m = KindMetrics::new(kind("mmsi")).unwrap();
        for i in 0..10u64 {
            m.record(&Observation {
                kind: kind("mmsi"),
                start_ns: i,
                latency_ns: 1_000_000,
                outcome: Outcome::HttpError { status: 500 },
            })
            .unwrap();
        }
        assert_eq!(m.ok, 0);
        assert!(m.latency().is_none());
        assert_eq!(m.error_rate(), 1.0);
    }

    #[test]
    fn throughput_uses_first_to_last_span() {
        let mut m = KindMetrics::new(kind("mode_s")).unwrap();
        // 100 requests spread over exactly two seconds.
        for i in 0..100u64 {
            m.record(&ok_obs("mode_s", i * 20_000_000, 10_000_000)).unwrap();
        }
        let qps = m.throughput_qps();
        assert!((qps - 50.0).abs() < 1.0, "qps {qps}");
    }

    #[tokio::test]
    async fn collector_folds_and_snapshots() {
        let (tx, collector) = collector_channel(Catalog::standard(), 64).unwrap();
        let handle = tokio::spawn(collector.run());
        for i in 0..10u64 {
            tx.send(ok_obs("mode_s", i * 1_000, 2_000_000)).await.unwrap();
        }
        tx.send(Observation {
            kind: kind("mmsi"),
            start_ns: 0,
            latency_ns: 1_000_000,
            outcome: Outcome::Transport { message: "connection reset".into() },
        })
        .await
        .unwrap();
        drop(tx);

        let kinds = handle.await.unwrap().unwrap();
        assert_eq!(kinds["mode_s"].ok, 10);
        assert_eq!(kinds["mmsi"].transport_errors, 1);
        // Every catalogue kind exists in the snapshot even when untouched.
        assert!(kinds.contains_key("network_reach"));
        assert_eq!(kinds["network_reach"].issued, 0);
    }
}
