use super::{BlockSource, SourceError};
use crate::{
    block::{height_from_file_name, is_valid_block_file, Batch, Block},
    constants::{BULK_BATCH_SIZE, DIRECT_BATCH_SIZE},
    pipeline::resilience::SourceMode,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Reads JSON block files named `<height>-<hash>.json` from a directory.
///
/// Bulk mode returns large batches, direct mode a handful of blocks, so the
/// same directory can stand in for both an archive and a live node.
#[derive(Debug, Clone)]
pub struct FilesystemBlockSource {
    blocks_dir: PathBuf,
    bulk_batch_size: usize,
    direct_batch_size: usize,
}

impl FilesystemBlockSource {
    #[instrument]
    pub fn new(blocks_dir: &Path) -> anyhow::Result<Self> {
        if !blocks_dir.is_dir() {
            anyhow::bail!("{} is not a directory", blocks_dir.display());
        }
        info!("Reading blocks from {}", blocks_dir.display());

        Ok(Self {
            blocks_dir: blocks_dir.to_path_buf(),
            bulk_batch_size: BULK_BATCH_SIZE as usize,
            direct_batch_size: DIRECT_BATCH_SIZE as usize,
        })
    }

    pub fn with_batch_sizes(mut self, bulk: usize, direct: usize) -> Self {
        self.bulk_batch_size = bulk.max(1);
        self.direct_batch_size = direct.max(1);
        self
    }

    fn batch_size(&self, mode: SourceMode) -> usize {
        match mode {
            SourceMode::Bulk => self.bulk_batch_size,
            SourceMode::Direct => self.direct_batch_size,
        }
    }

    /// Block files at or above `from_height` with the height their name
    /// carries, lowest height first
    fn block_paths(
        &self,
        from_height: u32,
        limit: usize,
    ) -> Result<Vec<(u32, PathBuf)>, SourceError> {
        if !self.blocks_dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "{} is not a directory",
                self.blocks_dir.display()
            )));
        }

        let pattern = format!("{}/*.json", self.blocks_dir.display());
        let mut paths: Vec<(u32, PathBuf)> = glob::glob(&pattern)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?
            .filter_map(Result::ok)
            .filter(|path| is_valid_block_file(path))
            .filter_map(|path| {
                let height = path.file_name().and_then(height_from_file_name)?;
                (height >= from_height).then_some((height, path))
            })
            .collect();

        paths.sort();
        paths.truncate(limit);
        Ok(paths)
    }
}

#[async_trait]
impl BlockSource for FilesystemBlockSource {
    async fn fetch(
        &mut self,
        mode: SourceMode,
        from_height: u32,
    ) -> Result<Option<Batch>, SourceError> {
        let paths = self.block_paths(from_height, self.batch_size(mode))?;
        if paths.is_empty() {
            return Ok(None);
        }

        let mut blocks = Vec::with_capacity(paths.len());
        for (height, path) in paths {
            let bytes = tokio::fs::read(&path).await?;
            let block: Block =
                serde_json::from_slice(&bytes).map_err(|e| SourceError::Malformed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            if block.height != height {
                let reason =
                    format!("file name says block {height}, content says {}", block.height);
                return Err(SourceError::Malformed { path, reason });
            }
            blocks.push(block);
        }

        let batch = Batch::new(blocks);
        debug!(
            "Fetched {} blocks ({:?} mode) starting at {}",
            batch.blocks.len(),
            mode,
            from_height
        );
        Ok(Some(batch))
    }
}
