use crate::{
    constants::{PROCESSOR_CURSOR_KEY, TOTAL_STAKE_ID},
    pipeline::store::{BlockCursor, CursorStore},
    staking::{
        store::{StakeChanges, StakingStore},
        Collator, Staker, TotalStake,
    },
};
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::trace;

const COLUMN_FAMILIES: [&str; 4] = ["stakers", "collators", "totals", "status"];

#[derive(Debug)]
pub struct IndexerStore {
    pub database: DB,
}

impl IndexerStore {
    /// Open a secondary, read-only view of a database another process owns
    pub fn new_read_only(path: &Path, secondary: &Path) -> anyhow::Result<Self> {
        let database_opts = rocksdb::Options::default();
        let database =
            DB::open_cf_as_secondary(&database_opts, path, secondary, COLUMN_FAMILIES)?;
        database.try_catch_up_with_primary()?;
        Ok(Self { database })
    }

    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let mut cf_opts = rocksdb::Options::default();
        cf_opts.set_max_write_buffer_number(16);
        let column_families = COLUMN_FAMILIES
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, cf_opts.clone()));

        let mut database_opts = rocksdb::Options::default();
        database_opts.create_missing_column_families(true);
        database_opts.create_if_missing(true);
        let database = DB::open_cf_descriptors(&database_opts, path, column_families)?;
        Ok(Self { database })
    }

    fn stakers_cf(&self) -> &rocksdb::ColumnFamily {
        self.database
            .cf_handle("stakers")
            .expect("stakers column family exists")
    }

    fn collators_cf(&self) -> &rocksdb::ColumnFamily {
        self.database
            .cf_handle("collators")
            .expect("collators column family exists")
    }

    fn totals_cf(&self) -> &rocksdb::ColumnFamily {
        self.database
            .cf_handle("totals")
            .expect("totals column family exists")
    }

    fn status_cf(&self) -> &rocksdb::ColumnFamily {
        self.database
            .cf_handle("status")
            .expect("status column family exists")
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        cf: &rocksdb::ColumnFamily,
        key: &[u8],
    ) -> anyhow::Result<Option<T>> {
        match self.database.get_pinned_cf(cf, key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        }
    }

    fn find_json<T: DeserializeOwned>(&self, cf: &rocksdb::ColumnFamily) -> anyhow::Result<Vec<T>> {
        let mut values = vec![];
        for entry in self.database.iterator_cf(cf, IteratorMode::Start) {
            let (_, bytes) = entry?;
            values.push(serde_json::from_slice(&bytes)?);
        }
        Ok(values)
    }

    fn put_json<T: Serialize>(
        batch: &mut WriteBatch,
        cf: &rocksdb::ColumnFamily,
        key: &[u8],
        value: &T,
    ) -> anyhow::Result<()> {
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }

    /// Add every entity of `changes` to `batch`, one column family per kind
    fn stage_changes(&self, batch: &mut WriteBatch, changes: &StakeChanges) -> anyhow::Result<()> {
        for staker in &changes.stakers {
            Self::put_json(batch, self.stakers_cf(), staker.id.as_bytes(), staker)?;
        }
        for collator in &changes.collators {
            Self::put_json(batch, self.collators_cf(), collator.id.as_bytes(), collator)?;
        }
        if let Some(total) = &changes.total {
            Self::put_json(batch, self.totals_cf(), TOTAL_STAKE_ID.as_bytes(), total)?;
        }
        Ok(())
    }
}

impl StakingStore for IndexerStore {
    fn get_staker(&self, id: &str) -> anyhow::Result<Option<Staker>> {
        trace!("Getting staker {id}");
        self.get_json(self.stakers_cf(), id.as_bytes())
    }

    fn get_collator(&self, id: &str) -> anyhow::Result<Option<Collator>> {
        trace!("Getting collator {id}");
        self.get_json(self.collators_cf(), id.as_bytes())
    }

    fn get_total_stake(&self) -> anyhow::Result<Option<TotalStake>> {
        trace!("Getting global stake totals");
        self.get_json(self.totals_cf(), TOTAL_STAKE_ID.as_bytes())
    }

    fn find_stakers(&self) -> anyhow::Result<Vec<Staker>> {
        trace!("Finding all stakers");
        self.find_json(self.stakers_cf())
    }

    fn find_collators(&self) -> anyhow::Result<Vec<Collator>> {
        trace!("Finding all collators");
        self.find_json(self.collators_cf())
    }

    fn upsert_stakers(&self, stakers: &[Staker]) -> anyhow::Result<()> {
        trace!("Upserting {} stakers", stakers.len());
        let mut batch = WriteBatch::default();
        for staker in stakers {
            Self::put_json(&mut batch, self.stakers_cf(), staker.id.as_bytes(), staker)?;
        }
        self.database.write(batch)?;
        Ok(())
    }

    fn upsert_collators(&self, collators: &[Collator]) -> anyhow::Result<()> {
        trace!("Upserting {} collators", collators.len());
        let mut batch = WriteBatch::default();
        for collator in collators {
            Self::put_json(&mut batch, self.collators_cf(), collator.id.as_bytes(), collator)?;
        }
        self.database.write(batch)?;
        Ok(())
    }

    fn upsert_total_stake(&self, total: &TotalStake) -> anyhow::Result<()> {
        trace!("Upserting global stake totals at block {}", total.last_updated_block);
        let value = serde_json::to_vec(total)?;
        self.database
            .put_cf(self.totals_cf(), TOTAL_STAKE_ID.as_bytes(), value)?;
        Ok(())
    }

    fn write_changes(&self, changes: &StakeChanges) -> anyhow::Result<()> {
        trace!(
            "Writing {} stakers, {} collators",
            changes.stakers.len(),
            changes.collators.len()
        );
        let mut batch = WriteBatch::default();
        self.stage_changes(&mut batch, changes)?;
        self.database.write(batch)?;
        Ok(())
    }
}

impl CursorStore for IndexerStore {
    fn get_cursor(&self) -> anyhow::Result<Option<BlockCursor>> {
        trace!("Getting processor cursor");
        self.get_json(self.status_cf(), PROCESSOR_CURSOR_KEY)
    }

    fn set_cursor(&self, cursor: &BlockCursor) -> anyhow::Result<()> {
        trace!("Setting processor cursor to {}", cursor.height);
        let value = serde_json::to_vec(cursor)?;
        self.database
            .put_cf(self.status_cf(), PROCESSOR_CURSOR_KEY, value)?;
        Ok(())
    }

    fn commit_batch(&self, changes: &StakeChanges, cursor: &BlockCursor) -> anyhow::Result<()> {
        trace!(
            "Committing {} stakers, {} collators through block {}",
            changes.stakers.len(),
            changes.collators.len(),
            cursor.height
        );
        let mut batch = WriteBatch::default();
        self.stage_changes(&mut batch, changes)?;
        Self::put_json(&mut batch, self.status_cf(), PROCESSOR_CURSOR_KEY, cursor)?;
        self.database.write(batch)?;
        Ok(())
    }
}
