use super::{Collator, Staker, TotalStake};

/// Entities touched by one batch, written together
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StakeChanges {
    pub stakers: Vec<Staker>,
    pub collators: Vec<Collator>,
    pub total: Option<TotalStake>,
}

/// Store of stake aggregates
pub trait StakingStore {
    /// Get a delegator's aggregate by canonical address
    fn get_staker(&self, id: &str) -> anyhow::Result<Option<Staker>>;

    /// Get a collator's aggregate by canonical address
    fn get_collator(&self, id: &str) -> anyhow::Result<Option<Collator>>;

    /// Get the global singleton
    fn get_total_stake(&self) -> anyhow::Result<Option<TotalStake>>;

    /// Every stored delegator aggregate
    fn find_stakers(&self) -> anyhow::Result<Vec<Staker>>;

    /// Every stored collator aggregate
    fn find_collators(&self) -> anyhow::Result<Vec<Collator>>;

    /// Insert or replace delegator aggregates in one write
    fn upsert_stakers(&self, stakers: &[Staker]) -> anyhow::Result<()>;

    /// Insert or replace collator aggregates in one write
    fn upsert_collators(&self, collators: &[Collator]) -> anyhow::Result<()>;

    /// Insert or replace the global singleton
    fn upsert_total_stake(&self, total: &TotalStake) -> anyhow::Result<()>;

    /// One upsert per non-empty entity kind
    fn write_changes(&self, changes: &StakeChanges) -> anyhow::Result<()> {
        if !changes.stakers.is_empty() {
            self.upsert_stakers(&changes.stakers)?;
        }
        if !changes.collators.is_empty() {
            self.upsert_collators(&changes.collators)?;
        }
        if let Some(total) = &changes.total {
            self.upsert_total_stake(total)?;
        }
        Ok(())
    }
}
