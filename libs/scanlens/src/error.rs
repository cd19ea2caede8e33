use thiserror::Error;

/// Failure taxonomy for the scan pipeline. `Input` is the caller's fault;
/// everything else is reported as a server-side failure.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("credentials not configured: {0}")]
    Configuration(String),
    #[error("model client unavailable: {0}")]
    ClientUnavailable(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("model call failed: {0}")]
    Upstream(String),
}

impl ScanError {
    /// Whether the cached client handle should be dropped so the next
    /// request rebuilds it.
    pub fn invalidates_client(&self) -> bool {
        matches!(self, ScanError::Upstream(_))
    }
}
