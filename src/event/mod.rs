//! Canonicalization of raw staking events into typed actions

pub mod fields;

use crate::ledger::{AddressEncoder, AddressError, Amount, AmountParseError};
use fields::{account_from_value, amount_from_value, layout_for, ArgView, EventLayout};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// An event as delivered by the block source: a name and an opaque field bag
/// that is either a positional array or a named record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    DelegationOpen,
    DelegationIncrease,
    DelegationDecrease,
    DelegationRevoke,
    DelegationRevokeScheduled,
    DelegationDecreaseScheduled,
    DelegationRevokeCancelled,
    DelegationKicked,
    DelegatorLeft,
    DelegatorLeftOneCandidate,
    Compounded,
    CollatorJoin,
    CollatorBondMore,
    CollatorBondLess,
    CollatorBondLessScheduled,
    CollatorBondLessCancelled,
    CollatorLeft,
}

/// Which entity an action mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    Staker,
    Collator,
}

/// How an action moves stake between the active and scheduled balances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Effect {
    Increase,
    Decrease,
    /// Decrease that first consumes a pending scheduled unbond
    ConsumeSchedule,
    ScheduleUnbond,
    CancelSchedule,
}

impl ActionKind {
    pub const ALL: &'static [ActionKind] = &[
        ActionKind::DelegationOpen,
        ActionKind::DelegationIncrease,
        ActionKind::DelegationDecrease,
        ActionKind::DelegationRevoke,
        ActionKind::DelegationRevokeScheduled,
        ActionKind::DelegationDecreaseScheduled,
        ActionKind::DelegationRevokeCancelled,
        ActionKind::DelegationKicked,
        ActionKind::DelegatorLeft,
        ActionKind::DelegatorLeftOneCandidate,
        ActionKind::Compounded,
        ActionKind::CollatorJoin,
        ActionKind::CollatorBondMore,
        ActionKind::CollatorBondLess,
        ActionKind::CollatorBondLessScheduled,
        ActionKind::CollatorBondLessCancelled,
        ActionKind::CollatorLeft,
    ];

    pub fn subject(&self) -> Subject {
        use ActionKind::*;
        match self {
            CollatorJoin
            | CollatorBondMore
            | CollatorBondLess
            | CollatorBondLessScheduled
            | CollatorBondLessCancelled
            | CollatorLeft => Subject::Collator,
            _ => Subject::Staker,
        }
    }

    pub fn effect(&self) -> Effect {
        use ActionKind::*;
        match self {
            DelegationOpen | DelegationIncrease | Compounded | CollatorJoin | CollatorBondMore => {
                Effect::Increase
            }
            DelegationRevoke | DelegationDecrease | CollatorBondLess => Effect::ConsumeSchedule,
            DelegationKicked | DelegatorLeft | DelegatorLeftOneCandidate | CollatorLeft => {
                Effect::Decrease
            }
            DelegationRevokeScheduled | DelegationDecreaseScheduled | CollatorBondLessScheduled => {
                Effect::ScheduleUnbond
            }
            DelegationRevokeCancelled | CollatorBondLessCancelled => Effect::CancelSchedule,
        }
    }
}

/// Strongly typed staking action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingAction {
    pub kind: ActionKind,
    pub actor: String,
    pub counterparty: Option<String>,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("{event} is missing required field {field}")]
    MissingField { event: String, field: &'static str },
    #[error("{event} has a malformed {field}: {source}")]
    MalformedAmount {
        event: String,
        field: &'static str,
        #[source]
        source: AmountParseError,
    },
    #[error("{event} has an invalid {field} address: {source}")]
    InvalidAddress {
        event: String,
        field: &'static str,
        #[source]
        source: AddressError,
    },
}

impl EventError {
    pub fn is_invalid_address(&self) -> bool {
        matches!(self, Self::InvalidAddress { .. })
    }
}

/// Outcome of canonicalizing one raw event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Action(StakingAction),
    /// Not a staking event this engine tracks
    Ignored,
    /// A tracked event whose payload could not be read; dropped by the caller
    Rejected(EventError),
}

#[derive(Debug, Clone, Copy)]
pub struct EventCanonicalizer {
    encoder: AddressEncoder,
}

impl EventCanonicalizer {
    pub fn new(encoder: AddressEncoder) -> Self {
        Self { encoder }
    }

    pub fn encoder(&self) -> &AddressEncoder {
        &self.encoder
    }

    pub fn canonicalize(&self, event: &RawEvent) -> Decoded {
        match layout_for(&event.name) {
            None => Decoded::Ignored,
            Some(layout) => match self.extract(event, layout) {
                Ok(action) => Decoded::Action(action),
                Err(e) => Decoded::Rejected(e),
            },
        }
    }

    fn extract(&self, event: &RawEvent, layout: &EventLayout) -> Result<StakingAction, EventError> {
        let args = ArgView::new(&event.args);

        let actor_value = args
            .lookup(&layout.actor)
            .ok_or_else(|| EventError::MissingField {
                event: event.name.clone(),
                field: layout.actor.label,
            })?;
        let actor = account_from_value(&self.encoder, actor_value).map_err(|source| {
            EventError::InvalidAddress {
                event: event.name.clone(),
                field: layout.actor.label,
                source,
            }
        })?;

        let amount_value = args
            .lookup(&layout.amount)
            .ok_or_else(|| EventError::MissingField {
                event: event.name.clone(),
                field: layout.amount.label,
            })?;
        let amount = amount_from_value(amount_value).map_err(|source| EventError::MalformedAmount {
            event: event.name.clone(),
            field: layout.amount.label,
            source,
        })?;

        let counterparty = layout.counterparty.and_then(|spec| {
            let value = args.lookup(&spec)?;
            match account_from_value(&self.encoder, value) {
                Ok(counterparty) => Some(counterparty),
                Err(e) => {
                    debug!("Ignoring unreadable {} on {}: {e}", spec.label, event.name);
                    None
                }
            }
        });

        Ok(StakingAction {
            kind: layout.kind,
            actor,
            counterparty,
            amount,
        })
    }
}
