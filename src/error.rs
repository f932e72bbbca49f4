use thiserror::Error;

/// Harness-level failures. Fatal variants abort the run before or during
/// group communication; `DeviceUnavailable` is the one recoverable kind
/// (the caller degrades to host-only execution).
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("bootstrap failed: {reason}")]
    Bootstrap { reason: String },

    #[error("local device {ordinal} not available ({visible} visible)")]
    DeviceUnavailable { ordinal: usize, visible: usize },

    #[error("timed iteration count must be at least 1")]
    InvalidIterationCount,

    #[error("invalid message size: {size_mb} MB")]
    InvalidSize { size_mb: usize },

    #[error("group operation issued after teardown")]
    UseAfterTeardown,

    #[error("a process group is already live in this process")]
    GroupAlreadyLive,

    /// The lockstep pre-check saw a peer issue a collective that does not
    /// match the coordinator's. A peer that never issues a call at all
    /// still hangs; only mismatched calls are detectable.
    #[error("collective divergence: {detail}")]
    Divergence { detail: String },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl HarnessError {
    pub fn invalid_peer(peer: usize) -> Self {
        Self::Transport(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid peer rank: {peer}"),
        ))
    }
}
