use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;

use crate::error::BenchError;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TestType {
    Workload,
    Concurrency,
    Both,
}

/// Fully resolved configuration for a single benchmark run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub pattern: String,
    pub requests: u64,
    pub concurrency: usize,
    pub warmup: u64,
    pub timeout: Duration,
    pub cache_enabled: bool,
    pub output: Option<PathBuf>,
    pub db_prefix: Option<String>,
    pub dataset: Option<PathBuf>,
    pub seed: u64,
    pub name: Option<String>,
}

/// One database target in a comparison: a display name plus the path
/// segment the SUT uses to route to it.
#[derive(Debug, Clone)]
pub struct DatabaseTarget {
    pub name: String,
    pub prefix: String,
}

impl DatabaseTarget {
    /// Accepts `name` or `name=prefix`.
    pub fn parse(raw: &str) -> Result<Self, BenchError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BenchError::Usage("empty database name in --databases".into()));
        }
        match raw.split_once('=') {
            Some((name, prefix)) if !name.is_empty() && !prefix.is_empty() => Ok(Self {
                name: name.to_string(),
                prefix: prefix.to_string(),
            }),
            Some(_) => Err(BenchError::Usage(format!(
                "malformed database entry {raw:?}, expected name or name=prefix"
            ))),
            None => Ok(Self {
                name: raw.to_string(),
                prefix: raw.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompareConfig {
    pub base_url: String,
    pub databases: Vec<DatabaseTarget>,
    pub workloads: Vec<String>,
    pub concurrency_levels: Vec<usize>,
    pub test_type: TestType,
    pub requests: u64,
    pub warmup: bool,
    pub timeout: Duration,
    pub output_dir: PathBuf,
    pub scores: Option<PathBuf>,
    pub dataset: Option<PathBuf>,
    pub seed: u64,
}
