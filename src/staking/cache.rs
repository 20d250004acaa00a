//! Per-batch read-through, write-back cache over the stake aggregates.
//!
//! Each entity is loaded from the store at most once per batch. Unknown
//! entities start zero-valued and stamped with the block that created them.
//! [`EntityCache::flush`] consumes the cache and writes every touched entity
//! with one upsert per entity kind. [`EntityCache::into_changes`] hands the
//! same entities to a caller that commits them with other state.

use super::{
    store::{StakeChanges, StakingStore},
    Collator, StakePosition, Staker, TotalStake,
};
use crate::{event::Subject, ledger::Amount};
use std::collections::{hash_map::Entry, HashMap};
use tracing::{debug, trace};

pub struct EntityCache<'a, S: StakingStore + ?Sized> {
    store: &'a S,
    default_supply: Amount,
    stakers: HashMap<String, Staker>,
    collators: HashMap<String, Collator>,
    total: Option<TotalStake>,
}

/// Number of rows written by a flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub stakers: usize,
    pub collators: usize,
    pub total: bool,
}

impl<'a, S: StakingStore + ?Sized> EntityCache<'a, S> {
    /// `default_supply` is used when the global singleton does not exist yet
    pub fn new(store: &'a S, default_supply: Amount) -> Self {
        Self {
            store,
            default_supply,
            stakers: HashMap::new(),
            collators: HashMap::new(),
            total: None,
        }
    }

    pub fn get_staker(&mut self, id: &str, block: u32) -> anyhow::Result<&mut Staker> {
        let store = self.store;
        cached_entry(&mut self.stakers, id, || {
            Ok(store
                .get_staker(id)?
                .unwrap_or_else(|| Staker::new(id, block)))
        })
    }

    pub fn get_collator(&mut self, id: &str, block: u32) -> anyhow::Result<&mut Collator> {
        let store = self.store;
        cached_entry(&mut self.collators, id, || {
            Ok(store
                .get_collator(id)?
                .unwrap_or_else(|| Collator::new(id, block)))
        })
    }

    pub fn get_total_stake(&mut self, block: u32) -> anyhow::Result<&mut TotalStake> {
        cached_total(&mut self.total, self.store, &self.default_supply, block)
    }

    /// The subject's entity together with the global singleton, both cached
    pub fn position_with_totals(
        &mut self,
        subject: Subject,
        id: &str,
        block: u32,
    ) -> anyhow::Result<(&mut dyn StakePosition, &mut TotalStake)> {
        let store = self.store;
        let total = cached_total(&mut self.total, store, &self.default_supply, block)?;
        let position: &mut dyn StakePosition = match subject {
            Subject::Staker => cached_entry(&mut self.stakers, id, || {
                Ok(store
                    .get_staker(id)?
                    .unwrap_or_else(|| Staker::new(id, block)))
            })?,
            Subject::Collator => cached_entry(&mut self.collators, id, || {
                Ok(store
                    .get_collator(id)?
                    .unwrap_or_else(|| Collator::new(id, block)))
            })?,
        };
        Ok((position, total))
    }

    /// Sum of scheduled unbonds over cached entities plus every persisted
    /// entity that is not cached
    pub fn seed_scheduled_pool(&self) -> anyhow::Result<Amount> {
        let cached: Amount = self
            .stakers
            .values()
            .map(|staker| &staker.scheduled_unbonds)
            .chain(self.collators.values().map(|c| &c.scheduled_unbonds))
            .sum();

        let stored_stakers = self.store.find_stakers()?;
        let stored_collators = self.store.find_collators()?;
        let persisted: Amount = stored_stakers
            .iter()
            .filter(|staker| !self.stakers.contains_key(&staker.id))
            .map(|staker| &staker.scheduled_unbonds)
            .chain(
                stored_collators
                    .iter()
                    .filter(|collator| !self.collators.contains_key(&collator.id))
                    .map(|collator| &collator.scheduled_unbonds),
            )
            .sum();

        Ok(cached + persisted)
    }

    /// Touched entities, without writing them
    pub fn into_changes(self) -> StakeChanges {
        StakeChanges {
            stakers: self.stakers.into_values().collect(),
            collators: self.collators.into_values().collect(),
            total: self.total,
        }
    }

    /// Write every touched entity back to the store
    pub fn flush(self) -> anyhow::Result<FlushSummary> {
        let store = self.store;
        let changes = self.into_changes();
        store.write_changes(&changes)?;

        let summary = FlushSummary::from(&changes);
        debug!(
            "Flushed {} stakers, {} collators",
            summary.stakers, summary.collators
        );
        Ok(summary)
    }
}

impl From<&StakeChanges> for FlushSummary {
    fn from(changes: &StakeChanges) -> Self {
        Self {
            stakers: changes.stakers.len(),
            collators: changes.collators.len(),
            total: changes.total.is_some(),
        }
    }
}

fn cached_entry<'c, T>(
    map: &'c mut HashMap<String, T>,
    id: &str,
    load: impl FnOnce() -> anyhow::Result<T>,
) -> anyhow::Result<&'c mut T> {
    match map.entry(id.to_string()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => {
            trace!("Loading {id} into cache");
            Ok(entry.insert(load()?))
        }
    }
}

fn cached_total<'c, S: StakingStore + ?Sized>(
    slot: &'c mut Option<TotalStake>,
    store: &S,
    default_supply: &Amount,
    block: u32,
) -> anyhow::Result<&'c mut TotalStake> {
    let total = match slot.take() {
        Some(total) => total,
        None => store
            .get_total_stake()?
            .unwrap_or_else(|| TotalStake::new(default_supply.clone(), block)),
    };
    Ok(slot.insert(total))
}
