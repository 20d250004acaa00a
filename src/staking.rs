//! Stake aggregates: per-delegator, per-collator and global

pub mod cache;
pub mod context;
pub mod rules;
pub mod store;

use crate::{
    constants::{PERCENTAGE_DECIMALS, PERCENTAGE_SCALE, TOTAL_STAKE_ID},
    event::Subject,
    ledger::Amount,
};
use num::ToPrimitive;
use rust_decimal::Decimal;
use serde_derive::{Deserialize, Serialize};
use store::StakingStore;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    pub id: String,
    pub staked_amount: Amount,
    #[serde(default)]
    pub scheduled_unbonds: Amount,
    pub total_delegated: Amount,
    pub total_undelegated: Amount,
    pub last_updated_block: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collator {
    pub id: String,
    pub self_bond: Amount,
    #[serde(default)]
    pub scheduled_unbonds: Amount,
    pub total_bonded: Amount,
    pub total_unbonded: Amount,
    pub last_updated_block: u32,
}

/// Global singleton, stored under [TOTAL_STAKE_ID]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalStake {
    pub id: String,
    pub total_staked: Amount,
    pub total_bonded: Amount,
    pub total_delegator_stake: Amount,
    pub total_collator_bond: Amount,
    pub total_supply: Amount,
    pub staked_percentage: Decimal,
    pub bonded_percentage: Decimal,
    pub active_staker_count: u32,
    pub active_collator_count: u32,
    pub last_updated_block: u32,
}

/// Whether an active balance switched between zero and positive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Activated,
    Deactivated,
    Unchanged,
}

impl Transition {
    pub fn between(old: &Amount, new: &Amount) -> Self {
        match (old.is_positive(), new.is_positive()) {
            (false, true) => Self::Activated,
            (true, false) => Self::Deactivated,
            _ => Self::Unchanged,
        }
    }
}

/// Balances shared by delegators and collators.
///
/// The active balance counts toward rewards; the scheduled balance has been
/// requested for withdrawal but is still bonded. Lifetime counters only grow.
pub trait StakePosition {
    fn active(&self) -> &Amount;
    fn active_mut(&mut self) -> &mut Amount;
    fn scheduled(&self) -> &Amount;
    fn scheduled_mut(&mut self) -> &mut Amount;
    fn record_increase(&mut self, amount: &Amount);
    fn record_decrease(&mut self, amount: &Amount);
    fn touch(&mut self, block: u32);
}

impl Staker {
    pub fn new(id: &str, block: u32) -> Self {
        Self {
            id: id.to_string(),
            staked_amount: Amount::zero(),
            scheduled_unbonds: Amount::zero(),
            total_delegated: Amount::zero(),
            total_undelegated: Amount::zero(),
            last_updated_block: block,
        }
    }
}

impl StakePosition for Staker {
    fn active(&self) -> &Amount {
        &self.staked_amount
    }

    fn active_mut(&mut self) -> &mut Amount {
        &mut self.staked_amount
    }

    fn scheduled(&self) -> &Amount {
        &self.scheduled_unbonds
    }

    fn scheduled_mut(&mut self) -> &mut Amount {
        &mut self.scheduled_unbonds
    }

    fn record_increase(&mut self, amount: &Amount) {
        self.total_delegated += amount;
    }

    fn record_decrease(&mut self, amount: &Amount) {
        self.total_undelegated += amount;
    }

    fn touch(&mut self, block: u32) {
        self.last_updated_block = block;
    }
}

impl Collator {
    pub fn new(id: &str, block: u32) -> Self {
        Self {
            id: id.to_string(),
            self_bond: Amount::zero(),
            scheduled_unbonds: Amount::zero(),
            total_bonded: Amount::zero(),
            total_unbonded: Amount::zero(),
            last_updated_block: block,
        }
    }
}

impl StakePosition for Collator {
    fn active(&self) -> &Amount {
        &self.self_bond
    }

    fn active_mut(&mut self) -> &mut Amount {
        &mut self.self_bond
    }

    fn scheduled(&self) -> &Amount {
        &self.scheduled_unbonds
    }

    fn scheduled_mut(&mut self) -> &mut Amount {
        &mut self.scheduled_unbonds
    }

    fn record_increase(&mut self, amount: &Amount) {
        self.total_bonded += amount;
    }

    fn record_decrease(&mut self, amount: &Amount) {
        self.total_unbonded += amount;
    }

    fn touch(&mut self, block: u32) {
        self.last_updated_block = block;
    }
}

impl TotalStake {
    pub fn new(total_supply: Amount, block: u32) -> Self {
        Self {
            id: TOTAL_STAKE_ID.to_string(),
            total_staked: Amount::zero(),
            total_bonded: Amount::zero(),
            total_delegator_stake: Amount::zero(),
            total_collator_bond: Amount::zero(),
            total_supply,
            staked_percentage: Decimal::ZERO,
            bonded_percentage: Decimal::ZERO,
            active_staker_count: 0,
            active_collator_count: 0,
            last_updated_block: block,
        }
    }

    /// Move the subject's active sum from `old` to `new` and adjust its
    /// active count on a zero crossing
    pub fn shift_active(&mut self, subject: Subject, old: &Amount, new: &Amount) -> Transition {
        let (sum, count) = match subject {
            Subject::Staker => (&mut self.total_delegator_stake, &mut self.active_staker_count),
            Subject::Collator => (&mut self.total_collator_bond, &mut self.active_collator_count),
        };

        if new > old {
            *sum += &(new - old);
        } else {
            *sum -= &(old - new);
        }

        let transition = Transition::between(old, new);
        match transition {
            Transition::Activated => *count += 1,
            Transition::Deactivated => *count = count.saturating_sub(1),
            Transition::Unchanged => (),
        }
        transition
    }

    /// Recompute derived totals from the active sums and the global
    /// scheduled-unbond pool
    pub fn recompute(&mut self, scheduled_pool: &Amount) {
        self.total_staked = &self.total_delegator_stake + &self.total_collator_bond;
        self.total_bonded = &self.total_staked + scheduled_pool;
        self.staked_percentage = percentage(&self.total_staked, &self.total_supply);
        self.bonded_percentage = percentage(&self.total_bonded, &self.total_supply);
    }

    /// Pending scheduled unbonds implied by the stored totals
    pub fn scheduled_unbonds(&self) -> Amount {
        &self.total_bonded - &self.total_staked
    }
}

/// `100 * part / total` with two decimal places, computed as
/// `part * 10_000 / total` basis points to stay in integer arithmetic
pub fn percentage(part: &Amount, total: &Amount) -> Decimal {
    if total.is_zero() {
        return Decimal::ZERO;
    }

    let basis_points = (&part.0 * PERCENTAGE_SCALE) / &total.0;
    basis_points
        .to_i64()
        .map(|bp| Decimal::new(bp, PERCENTAGE_DECIMALS))
        .unwrap_or(Decimal::MAX)
}

/// Install the configured total supply on the global singleton.
///
/// The supply is an external constant: a non-zero stored value wins over
/// configuration.
pub fn initialize_total_supply<S>(
    store: &S,
    configured: &Amount,
    block: u32,
) -> anyhow::Result<Amount>
where
    S: StakingStore + ?Sized,
{
    match store.get_total_stake()? {
        Some(total) if total.total_supply.is_positive() => Ok(total.total_supply),
        Some(mut total) => {
            if configured.is_positive() {
                info!("Setting total supply to {configured}");
                total.total_supply = configured.clone();
                let pool = total.scheduled_unbonds();
                total.recompute(&pool);
                store.upsert_total_stake(&total)?;
            }
            Ok(configured.clone())
        }
        None => {
            if configured.is_positive() {
                info!("Initializing global stake totals with supply {configured}");
                store.upsert_total_stake(&TotalStake::new(configured.clone(), block))?;
            }
            Ok(configured.clone())
        }
    }
}
