use crate::utils::IsTransient;

// ============================================================================
// Upstream Fetch Errors
// ============================================================================

/// Upstream statuses that signal temporary overload and are worth retrying.
pub const RETRYABLE_STATUSES: [u16; 2] = [503, 529];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed transactions payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl FetchError {
    /// HTTP status reported by the upstream, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::UnexpectedStatus(status) => Some(*status),
            FetchError::Transport(_) | FetchError::Decode(_) => None,
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> String {
        match self {
            FetchError::UnexpectedStatus(status) => status.to_string(),
            FetchError::Transport(_) => "transport_error".to_string(),
            FetchError::Decode(_) => "decode_error".to_string(),
        }
    }
}

impl IsTransient for FetchError {
    fn is_transient(&self) -> bool {
        // Transport errors are deliberately left out: only an explicit
        // overload status triggers another attempt.
        matches!(self, FetchError::UnexpectedStatus(status) if RETRYABLE_STATUSES.contains(status))
    }
}
