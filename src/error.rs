use thiserror::Error;

/// Session-scoped failures. Per-request failures are not errors; they are
/// recorded as classified observations and never unwind the executor.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid mix pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    Usage(String),

    #[error("SUT health check failed for {url}: {reason}")]
    Preflight { url: String, reason: String },

    #[error("benchmark interrupted")]
    Interrupted,

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub const EXIT_PASS: u8 = 0;
pub const EXIT_CONDITIONAL_PASS: u8 = 1;
pub const EXIT_FAIL: u8 = 2;
pub const EXIT_INTERRUPTED: u8 = 3;
pub const EXIT_USAGE: u8 = 64;
pub const EXIT_INTERNAL: u8 = 70;

impl BenchError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidPattern(_) | Self::Usage(_) | Self::Preflight { .. } => EXIT_USAGE,
            Self::Interrupted => EXIT_INTERRUPTED,
            Self::Invariant(_) | Self::Io(_) | Self::Internal(_) => EXIT_INTERNAL,
        }
    }
}
