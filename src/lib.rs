//! Benchmark harness for the knowledge-base database bake-off: workload
//! generation, concurrent HTTP load driving, HDR latency metrics, threshold
//! evaluation, and multi-run comparison.

pub mod catalog;
pub mod compare;
pub mod config;
pub mod dataset;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod report;
pub mod thresholds;
pub mod workload;
