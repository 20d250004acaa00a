//! State transitions for canonical staking actions.
//!
//! Every rule clamps at zero instead of failing: events can arrive in an
//! order the chain never produced (missed blocks, a mid-stream restart), and
//! the next snapshot reconciliation corrects what clamping loses.

use super::{
    cache::EntityCache, context::IndexerContext, store::StakingStore, StakePosition, Transition,
};
use crate::{
    event::{Effect, StakingAction},
    ledger::Amount,
};
use tracing::trace;

/// Apply one action to the cached entities and the global totals
pub fn apply_action<S>(
    cache: &mut EntityCache<S>,
    ctx: &mut IndexerContext,
    action: &StakingAction,
    block: u32,
) -> anyhow::Result<Transition>
where
    S: StakingStore + ?Sized,
{
    ctx.ensure_scheduled_pool(cache)?;

    let subject = action.kind.subject();
    let amount = &action.amount;
    let (position, total) = cache.position_with_totals(subject, &action.actor, block)?;
    let old_active = position.active().clone();

    match action.kind.effect() {
        Effect::Increase => {
            *position.active_mut() += amount;
            position.record_increase(amount);
        }
        Effect::Decrease => decrease(position, amount),
        Effect::ConsumeSchedule => {
            if position.scheduled() >= amount {
                *position.scheduled_mut() -= amount;
                position.record_decrease(amount);
                ctx.release_scheduled(amount);
            } else {
                trace!(
                    "{:?} for {} exceeds its scheduled unbonds, treating as unscheduled",
                    action.kind,
                    action.actor
                );
                decrease(position, amount);
            }
        }
        Effect::ScheduleUnbond => {
            *position.scheduled_mut() += amount;
            *position.active_mut() -= amount;
            ctx.add_scheduled(amount);
        }
        Effect::CancelSchedule => {
            let old_scheduled = position.scheduled().clone();
            *position.scheduled_mut() -= amount;
            *position.active_mut() += amount;
            // the pool only gives back what this entity actually had scheduled
            ctx.release_scheduled(&(&old_scheduled - position.scheduled()));
        }
    }
    position.touch(block);

    let transition = total.shift_active(subject, &old_active, position.active());
    total.recompute(ctx.scheduled_pool());
    total.last_updated_block = block;
    Ok(transition)
}

fn decrease(position: &mut dyn StakePosition, amount: &Amount) {
    *position.active_mut() -= amount;
    position.record_decrease(amount);
}
