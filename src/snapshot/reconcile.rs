//! Merge a chain snapshot into the event-derived aggregates.
//!
//! Rows that already exist keep their balances and lifetime counters; only
//! `scheduled_unbonds` is corrected. Missing rows are inserted from the
//! snapshot. The global singleton is rebuilt from snapshot sums.

use super::ChainSnapshot;
use crate::{
    ledger::{AddressEncoder, Amount, RawAccount},
    staking::{store::StakingStore, Collator, Staker, TotalStake},
};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub block: u32,
    pub stakers_inserted: usize,
    pub stakers_updated: usize,
    pub collators_inserted: usize,
    pub collators_updated: usize,
    pub total_staked: Amount,
    pub total_bonded: Amount,
    pub scheduled_total: Amount,
    pub total_supply: Amount,
    pub selected_candidates: usize,
    pub selected_backing: Amount,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.stakers_inserted == 0
            && self.stakers_updated == 0
            && self.collators_inserted == 0
            && self.collators_updated == 0
    }
}

/// Committed stake split into its active and scheduled parts
#[derive(Debug, Default)]
struct Position {
    committed: Amount,
    scheduled: Amount,
}

impl Position {
    fn active(&self) -> Amount {
        &self.committed - &self.scheduled
    }

    /// Scheduled never exceeds committed stake
    fn scheduled(&self) -> Amount {
        if self.scheduled > self.committed {
            self.committed.clone()
        } else {
            self.scheduled.clone()
        }
    }
}

#[instrument(skip_all, fields(block = snapshot.block.number))]
pub fn reconcile<S>(
    store: &S,
    encoder: &AddressEncoder,
    snapshot: &ChainSnapshot,
    fallback_supply: &Amount,
) -> anyhow::Result<ReconcileSummary>
where
    S: StakingStore + ?Sized,
{
    let block = snapshot.block.number;
    let normalize = |account: &str| match encoder.normalize(RawAccount::Encoded(account)) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Skipping snapshot account {account:?}: {e}");
            None
        }
    };

    let mut delegators: BTreeMap<String, Position> = BTreeMap::new();
    for state in &snapshot.delegator_states {
        if let Some(id) = normalize(&state.delegator) {
            let position = delegators.entry(id).or_default();
            for bond in &state.delegations {
                position.committed += &bond.amount;
            }
        }
    }

    let mut collators: BTreeMap<String, Position> = BTreeMap::new();
    for info in &snapshot.candidate_infos {
        if let Some(id) = normalize(&info.candidate) {
            collators.entry(id).or_default().committed += &info.bond;
        }
    }

    for request in &snapshot.delegation_requests {
        let position = normalize(&request.delegator).and_then(|id| delegators.get_mut(&id));
        match position {
            Some(position) => position.scheduled += request.action.amount(),
            None => debug!("Ignoring request for unknown delegator {}", request.delegator),
        }
    }

    for request in &snapshot.bond_less_requests {
        let position = normalize(&request.candidate).and_then(|id| collators.get_mut(&id));
        match position {
            Some(position) => position.scheduled += &request.amount,
            None => debug!("Ignoring request for unknown candidate {}", request.candidate),
        }
    }

    let mut summary = ReconcileSummary {
        block,
        ..Default::default()
    };
    let mut total = store
        .get_total_stake()?
        .unwrap_or_else(|| TotalStake::new(Amount::zero(), block));
    let (mut delegator_stake, mut collator_bond, mut scheduled_total) =
        (Amount::zero(), Amount::zero(), Amount::zero());
    let (mut active_stakers, mut active_collators) = (0u32, 0u32);

    let mut staker_writes = vec![];
    for (id, position) in &delegators {
        if position.committed.is_zero() {
            continue;
        }

        let (active, scheduled) = (position.active(), position.scheduled());
        match store.get_staker(id)? {
            Some(mut staker) => {
                if staker.scheduled_unbonds != scheduled {
                    staker.scheduled_unbonds = scheduled.clone();
                    staker_writes.push(staker);
                    summary.stakers_updated += 1;
                }
            }
            None => {
                staker_writes.push(Staker {
                    id: id.clone(),
                    staked_amount: active.clone(),
                    scheduled_unbonds: scheduled.clone(),
                    total_delegated: active.clone(),
                    total_undelegated: Amount::zero(),
                    last_updated_block: block,
                });
                summary.stakers_inserted += 1;
            }
        }

        if active.is_positive() {
            active_stakers += 1;
        }
        delegator_stake += &active;
        scheduled_total += &scheduled;
    }

    let mut collator_writes = vec![];
    for (id, position) in &collators {
        if position.committed.is_zero() {
            continue;
        }

        let (active, scheduled) = (position.active(), position.scheduled());
        match store.get_collator(id)? {
            Some(mut collator) => {
                if collator.scheduled_unbonds != scheduled {
                    collator.scheduled_unbonds = scheduled.clone();
                    collator_writes.push(collator);
                    summary.collators_updated += 1;
                }
            }
            None => {
                collator_writes.push(Collator {
                    id: id.clone(),
                    self_bond: active.clone(),
                    scheduled_unbonds: scheduled.clone(),
                    total_bonded: active.clone(),
                    total_unbonded: Amount::zero(),
                    last_updated_block: block,
                });
                summary.collators_inserted += 1;
            }
        }

        if active.is_positive() {
            active_collators += 1;
        }
        collator_bond += &active;
        scheduled_total += &scheduled;
    }

    if !staker_writes.is_empty() {
        store.upsert_stakers(&staker_writes)?;
    }
    if !collator_writes.is_empty() {
        store.upsert_collators(&collator_writes)?;
    }

    if total.total_supply.is_zero() {
        total.total_supply = snapshot
            .total_issuance
            .clone()
            .filter(Amount::is_positive)
            .unwrap_or_else(|| fallback_supply.clone());
    }

    let before = total.clone();
    total.total_delegator_stake = delegator_stake;
    total.total_collator_bond = collator_bond;
    total.active_staker_count = active_stakers;
    total.active_collator_count = active_collators;
    total.recompute(&scheduled_total);
    if total != before {
        total.last_updated_block = block;
        store.upsert_total_stake(&total)?;
    }

    summary.total_staked = total.total_staked.clone();
    summary.total_bonded = total.total_bonded.clone();
    summary.scheduled_total = scheduled_total;
    summary.total_supply = total.total_supply.clone();
    if let Some(selected) = &snapshot.selected_candidates {
        summary.selected_candidates = selected.len();
        summary.selected_backing = snapshot.top_delegations.iter().map(|top| &top.total).sum();
    }

    info!(
        "Reconciled block {}: {} stakers inserted, {} updated; {} collators inserted, {} updated; staked {} ({}%), bonded {} ({}%)",
        block,
        summary.stakers_inserted,
        summary.stakers_updated,
        summary.collators_inserted,
        summary.collators_updated,
        total.total_staked,
        total.staked_percentage,
        total.total_bonded,
        total.bonded_percentage,
    );
    Ok(summary)
}
