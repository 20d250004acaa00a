mod pipeline;
mod resilience;
mod snapshot;

pub mod helpers {
    use serde_json::Value;
    use staking_indexer::{
        block::{Block, BlockHash},
        event::{ActionKind, RawEvent, StakingAction},
        ledger::Amount,
        pipeline::store::{BlockCursor, CursorStore},
        staking::{
            store::{StakeChanges, StakingStore},
            Collator, Staker, TotalStake,
        },
    };
    use std::{
        cell::{Cell, RefCell},
        collections::BTreeMap,
        path::Path,
    };

    /// Sets up a new temp dir, deleted when it goes out of scope
    pub fn setup_new_db_dir(prefix: &str) -> anyhow::Result<tempfile::TempDir> {
        let store_dir = tempfile::TempDir::with_prefix(prefix)?;
        if store_dir.path().exists() {
            std::fs::remove_dir_all(store_dir.path())?;
        }
        Ok(store_dir)
    }

    /// 20-byte account as its canonical `0x` form
    pub fn h160(byte: u8) -> String {
        format!("0x{}", hex::encode([byte; 20]))
    }

    pub fn action(kind: ActionKind, actor: &str, amount: u64) -> StakingAction {
        StakingAction {
            kind,
            actor: actor.to_string(),
            counterparty: None,
            amount: Amount::from(amount),
        }
    }

    pub fn event(name: &str, args: Value) -> RawEvent {
        RawEvent {
            name: format!("ParachainStaking.{name}"),
            args,
        }
    }

    pub fn block(height: u32, events: Vec<RawEvent>) -> Block {
        Block {
            height,
            hash: BlockHash(format!("0x{height:08x}")),
            events,
        }
    }

    pub fn write_block(dir: &Path, block: &Block) -> anyhow::Result<()> {
        let path = dir.join(format!("{}-{}.json", block.height, block.hash));
        std::fs::write(path, serde_json::to_vec(block)?)?;
        Ok(())
    }

    /// In-memory store for tests that do not need rocksdb
    #[derive(Debug, Default)]
    pub struct MemoryStore {
        pub stakers: RefCell<BTreeMap<String, Staker>>,
        pub collators: RefCell<BTreeMap<String, Collator>>,
        pub total: RefCell<Option<TotalStake>>,
        pub cursor: RefCell<Option<BlockCursor>>,
        /// Number of upcoming batch commits to refuse
        pub failing_commits: Cell<u32>,
    }

    impl StakingStore for MemoryStore {
        fn get_staker(&self, id: &str) -> anyhow::Result<Option<Staker>> {
            Ok(self.stakers.borrow().get(id).cloned())
        }

        fn get_collator(&self, id: &str) -> anyhow::Result<Option<Collator>> {
            Ok(self.collators.borrow().get(id).cloned())
        }

        fn get_total_stake(&self) -> anyhow::Result<Option<TotalStake>> {
            Ok(self.total.borrow().clone())
        }

        fn find_stakers(&self) -> anyhow::Result<Vec<Staker>> {
            Ok(self.stakers.borrow().values().cloned().collect())
        }

        fn find_collators(&self) -> anyhow::Result<Vec<Collator>> {
            Ok(self.collators.borrow().values().cloned().collect())
        }

        fn upsert_stakers(&self, stakers: &[Staker]) -> anyhow::Result<()> {
            let mut map = self.stakers.borrow_mut();
            for staker in stakers {
                map.insert(staker.id.clone(), staker.clone());
            }
            Ok(())
        }

        fn upsert_collators(&self, collators: &[Collator]) -> anyhow::Result<()> {
            let mut map = self.collators.borrow_mut();
            for collator in collators {
                map.insert(collator.id.clone(), collator.clone());
            }
            Ok(())
        }

        fn upsert_total_stake(&self, total: &TotalStake) -> anyhow::Result<()> {
            *self.total.borrow_mut() = Some(total.clone());
            Ok(())
        }
    }

    impl CursorStore for MemoryStore {
        fn get_cursor(&self) -> anyhow::Result<Option<BlockCursor>> {
            Ok(self.cursor.borrow().clone())
        }

        fn set_cursor(&self, cursor: &BlockCursor) -> anyhow::Result<()> {
            *self.cursor.borrow_mut() = Some(cursor.clone());
            Ok(())
        }

        fn commit_batch(&self, changes: &StakeChanges, cursor: &BlockCursor) -> anyhow::Result<()> {
            if self.failing_commits.get() > 0 {
                self.failing_commits.set(self.failing_commits.get() - 1);
                anyhow::bail!("commit refused at block {}", cursor.height);
            }
            self.write_changes(changes)?;
            self.set_cursor(cursor)
        }
    }
}
