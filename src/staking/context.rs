use super::{cache::EntityCache, store::StakingStore};
use crate::ledger::Amount;
use tracing::info;

/// Process-wide engine state, owned by the pipeline driver.
///
/// The scheduled-unbond pool is seeded once, on first use, from the cache
/// and the store. After that it is only moved by the rules, or reset after a
/// snapshot reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexerContext {
    scheduled_pool: Amount,
    pool_initialized: bool,
    total_supply: Amount,
}

impl IndexerContext {
    pub fn new(total_supply: Amount) -> Self {
        Self {
            scheduled_pool: Amount::zero(),
            pool_initialized: false,
            total_supply,
        }
    }

    pub fn total_supply(&self) -> &Amount {
        &self.total_supply
    }

    pub fn set_total_supply(&mut self, total_supply: Amount) {
        self.total_supply = total_supply;
    }

    pub fn scheduled_pool(&self) -> &Amount {
        &self.scheduled_pool
    }

    pub fn is_pool_initialized(&self) -> bool {
        self.pool_initialized
    }

    /// Seed the pool the first time it is needed
    pub fn ensure_scheduled_pool<S>(&mut self, cache: &EntityCache<S>) -> anyhow::Result<()>
    where
        S: StakingStore + ?Sized,
    {
        if !self.pool_initialized {
            self.scheduled_pool = cache.seed_scheduled_pool()?;
            self.pool_initialized = true;
            info!("Seeded scheduled unbond pool: {}", self.scheduled_pool);
        }
        Ok(())
    }

    pub fn add_scheduled(&mut self, amount: &Amount) {
        self.scheduled_pool += amount;
    }

    /// Floors at zero
    pub fn release_scheduled(&mut self, amount: &Amount) {
        self.scheduled_pool -= amount;
    }

    pub fn reset_scheduled_pool(&mut self, pool: Amount) {
        self.scheduled_pool = pool;
        self.pool_initialized = true;
    }
}
