use crate::event::RawEvent;
use serde_derive::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockHash(pub String);

/// One block's worth of staking events, in intra-block order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub height: u32,
    pub hash: BlockHash,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

/// Contiguous run of blocks delivered by a block source, in block order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub blocks: Vec<Block>,
}

impl Batch {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|block| block.height);
        Self { blocks }
    }

    pub fn first_height(&self) -> Option<u32> {
        self.blocks.first().map(|block| block.height)
    }

    pub fn last_height(&self) -> Option<u32> {
        self.blocks.last().map(|block| block.height)
    }

    /// Number of heights spanned by the batch, inclusive
    pub fn block_range(&self) -> u32 {
        match (self.first_height(), self.last_height()) {
            (Some(first), Some(last)) => last - first + 1,
            _ => 0,
        }
    }

    /// Drop every block above `end_height`
    pub fn truncate_after(&mut self, end_height: u32) {
        self.blocks.retain(|block| block.height <= end_height);
    }
}

impl std::fmt::Display for BlockHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BlockHash {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Extract the block height from a file name like `1234-0xabc.json`
pub fn height_from_file_name(file_name: &OsStr) -> Option<u32> {
    file_name
        .to_str()?
        .split(['-', '.'])
        .find_map(|part| part.parse::<u32>().ok())
}

pub fn is_valid_block_file(path: &Path) -> bool {
    path.extension().and_then(OsStr::to_str) == Some("json")
        && path.file_name().and_then(height_from_file_name).is_some()
}
