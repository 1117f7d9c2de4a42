use std::time::Duration;

use tessera_voxel::AtlasError;
use thiserror::Error;

/// Why a worker round trip failed.
///
/// Cancellation is not represented here: aborted tasks settle as
/// [`Settled::Unset`](crate::scheduler::Settled::Unset).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch rejected: {0}")]
    Network(String),

    #[error("worker round trip timed out after {0:?}")]
    Timeout(Duration),

    #[error("corrupt tile data: {0}")]
    Decode(String),

    #[error("worker thread crashed")]
    WorkerCrashed,
}

impl FetchError {
    /// Network-class failures: rejected fetches and lost workers.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::WorkerCrashed)
    }
}

impl From<AtlasError> for FetchError {
    fn from(e: AtlasError) -> Self {
        Self::Decode(e.to_string())
    }
}
