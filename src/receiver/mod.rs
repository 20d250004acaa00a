use crate::{block::Batch, pipeline::resilience::SourceMode};
use std::path::PathBuf;
use thiserror::Error;

pub mod filesystem;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("block source unavailable: {0}")]
    Unavailable(String),
    #[error("malformed block file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("block source i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Connectivity problems are retried; anything else is fatal
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Io(_) => true,
            Self::Malformed { .. } => false,
        }
    }
}

/// Delivers batches of blocks in height order.
///
/// `Ok(None)` means the source has nothing at or above `from_height` yet.
#[async_trait::async_trait]
pub trait BlockSource {
    async fn fetch(
        &mut self,
        mode: SourceMode,
        from_height: u32,
    ) -> Result<Option<Batch>, SourceError>;
}
