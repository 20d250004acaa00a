//! Field extraction over schema-versioned event payloads.
//!
//! The same logical event has been emitted as a positional tuple in early
//! runtimes and as a named struct in later ones. Each canonical field is
//! described by a [`FieldSpec`]: the named keys to try, in order, followed by
//! a positional fallback.

use super::ActionKind;
use crate::{
    constants::PALLET_PREFIX,
    ledger::{AddressEncoder, AddressError, Amount, AmountParseError},
};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Canonical name used in diagnostics
    pub label: &'static str,
    /// Named keys tried first; dotted keys address nested records
    pub names: &'static [&'static str],
    /// Positional fallback
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLayout {
    pub kind: ActionKind,
    pub actor: FieldSpec,
    pub counterparty: Option<FieldSpec>,
    pub amount: FieldSpec,
}

const fn field(
    label: &'static str,
    names: &'static [&'static str],
    position: Option<usize>,
) -> FieldSpec {
    FieldSpec {
        label,
        names,
        position,
    }
}

const DELEGATOR_0: FieldSpec = field("delegator", &["delegator"], Some(0));
const CANDIDATE_0: FieldSpec = field("candidate", &["candidate"], Some(0));
const CANDIDATE_1: FieldSpec = field("candidate", &["candidate"], Some(1));
const CANDIDATE_NAMED: FieldSpec = field("candidate", &["candidate", "collator"], None);
const AMOUNT_1: FieldSpec = field("amount", &["amount"], Some(1));
const AMOUNT_2: FieldSpec = field("amount", &["amount"], Some(2));
const UNSTAKED_1: FieldSpec = field("amount", &["unstakedAmount", "amount"], Some(1));
const UNSTAKED_2: FieldSpec = field("amount", &["unstakedAmount", "amount"], Some(2));

const fn delegator_layout(kind: ActionKind, amount: FieldSpec) -> EventLayout {
    EventLayout {
        kind,
        actor: DELEGATOR_0,
        counterparty: Some(CANDIDATE_1),
        amount,
    }
}

const fn collator_layout(kind: ActionKind, actor: FieldSpec, amount: FieldSpec) -> EventLayout {
    EventLayout {
        kind,
        actor,
        counterparty: None,
        amount,
    }
}

/// Recognized event names (without pallet prefix) and how to read them
const LAYOUTS: &[(&[&str], EventLayout)] = &[
    (
        &["Delegation"],
        EventLayout {
            kind: ActionKind::DelegationOpen,
            actor: DELEGATOR_0,
            counterparty: Some(field("candidate", &["candidate"], Some(2))),
            amount: field("amount", &["amount", "lockedAmount"], Some(1)),
        },
    ),
    (
        &["DelegationIncreased"],
        delegator_layout(ActionKind::DelegationIncrease, AMOUNT_2),
    ),
    (
        &["DelegationDecreased"],
        delegator_layout(ActionKind::DelegationDecrease, AMOUNT_2),
    ),
    (
        &["DelegationRevoked"],
        delegator_layout(ActionKind::DelegationRevoke, UNSTAKED_2),
    ),
    (
        &["DelegationKicked"],
        delegator_layout(ActionKind::DelegationKicked, UNSTAKED_2),
    ),
    (
        &["DelegatorLeftCandidate"],
        delegator_layout(ActionKind::DelegatorLeftOneCandidate, UNSTAKED_2),
    ),
    (
        &["DelegatorLeft"],
        EventLayout {
            kind: ActionKind::DelegatorLeft,
            actor: DELEGATOR_0,
            counterparty: None,
            amount: UNSTAKED_1,
        },
    ),
    (
        &["Compounded"],
        EventLayout {
            kind: ActionKind::Compounded,
            actor: field("delegator", &["delegator"], Some(1)),
            counterparty: Some(CANDIDATE_0),
            amount: AMOUNT_2,
        },
    ),
    (
        &["DelegationRevocationScheduled"],
        EventLayout {
            kind: ActionKind::DelegationRevokeScheduled,
            actor: DELEGATOR_0,
            counterparty: Some(CANDIDATE_NAMED),
            amount: AMOUNT_1,
        },
    ),
    (
        &["DelegationDecreaseScheduled"],
        EventLayout {
            kind: ActionKind::DelegationDecreaseScheduled,
            actor: DELEGATOR_0,
            counterparty: Some(CANDIDATE_NAMED),
            amount: field("amount", &["amount", "amountToDecrease"], Some(1)),
        },
    ),
    (
        &["CancelledDelegationRequest"],
        EventLayout {
            kind: ActionKind::DelegationRevokeCancelled,
            actor: DELEGATOR_0,
            counterparty: Some(CANDIDATE_NAMED),
            amount: field("amount", &["amount", "cancelledRequest.amount"], Some(1)),
        },
    ),
    (
        &["JoinedCollatorCandidates"],
        collator_layout(
            ActionKind::CollatorJoin,
            field("account", &["account"], Some(0)),
            field("amount", &["amountLocked", "amount"], Some(1)),
        ),
    ),
    (
        &["CandidateBondedMore"],
        collator_layout(ActionKind::CollatorBondMore, CANDIDATE_0, AMOUNT_1),
    ),
    (
        &["CandidateBondedLess"],
        collator_layout(ActionKind::CollatorBondLess, CANDIDATE_0, AMOUNT_1),
    ),
    (
        &["CandidateBondLessRequested", "CandidateBondLessScheduled"],
        collator_layout(
            ActionKind::CollatorBondLessScheduled,
            CANDIDATE_0,
            field("amount", &["amountToDecrease", "amount"], Some(1)),
        ),
    ),
    (
        &["CancelledCandidateBondLess"],
        collator_layout(ActionKind::CollatorBondLessCancelled, CANDIDATE_0, AMOUNT_1),
    ),
    (
        &["CandidateLeft"],
        collator_layout(
            ActionKind::CollatorLeft,
            field("candidate", &["exCandidate", "candidate"], Some(0)),
            field("amount", &["unlockedAmount", "amount"], Some(1)),
        ),
    ),
];

/// Look up the layout for an event name, with or without the pallet prefix
pub fn layout_for(name: &str) -> Option<&'static EventLayout> {
    let name = name.strip_prefix(PALLET_PREFIX).unwrap_or(name);
    LAYOUTS
        .iter()
        .find(|(names, _)| names.iter().any(|known| *known == name))
        .map(|(_, layout)| layout)
}

/// Read-only key/positional view over an event's argument bag
#[derive(Debug, Clone, Copy)]
pub struct ArgView<'a>(&'a Value);

impl<'a> ArgView<'a> {
    pub fn new(args: &'a Value) -> Self {
        Self(args)
    }

    /// First present, non-null value for the spec
    pub fn lookup(&self, spec: &FieldSpec) -> Option<&'a Value> {
        spec.names
            .iter()
            .find_map(|name| self.named(name))
            .or_else(|| spec.position.and_then(|pos| self.positional(pos)))
    }

    fn named(&self, path: &str) -> Option<&'a Value> {
        path.split('.')
            .try_fold(self.0, |value, key| value.as_object()?.get(key))
            .filter(|value| !value.is_null())
    }

    fn positional(&self, position: usize) -> Option<&'a Value> {
        let value = match self.0 {
            Value::Array(items) => items.get(position),
            Value::Object(fields) => fields.get(&position.to_string()),
            _ => None,
        };
        value.filter(|value| !value.is_null())
    }
}

/// Decode an account from a hex/encoded string or a JSON byte array
pub fn account_from_value(encoder: &AddressEncoder, value: &Value) -> Result<String, AddressError> {
    match value {
        Value::String(encoded) => encoder.encode_str(encoded),
        Value::Array(items) => {
            let bytes = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|byte| u8::try_from(byte).ok())
                        .ok_or(AddressError::InvalidByte)
                })
                .collect::<Result<Vec<u8>, _>>()?;
            encoder.encode_bytes(&bytes)
        }
        Value::Null => Err(AddressError::Empty),
        other => Err(AddressError::Unsupported(other.to_string())),
    }
}

/// Decode an amount from a JSON integer, decimal string, or hex string
pub fn amount_from_value(value: &Value) -> Result<Amount, AmountParseError> {
    Amount::try_from(value)
}
