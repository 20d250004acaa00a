use crate::{block::BlockHash, staking::store::StakeChanges};
use serde_derive::{Deserialize, Serialize};

/// Last block whose events have been committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCursor {
    pub height: u32,
    pub hash: BlockHash,
}

/// Store of the processor's position in the block stream
pub trait CursorStore {
    fn get_cursor(&self) -> anyhow::Result<Option<BlockCursor>>;

    fn set_cursor(&self, cursor: &BlockCursor) -> anyhow::Result<()>;

    /// Write a batch's entity changes and advance the cursor in one atomic
    /// write: either both land or neither does
    fn commit_batch(&self, changes: &StakeChanges, cursor: &BlockCursor) -> anyhow::Result<()>;
}
