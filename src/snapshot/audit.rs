//! Cross-check the stored aggregates against a chain snapshot without
//! writing anything.
//!
//! Both sides are compared on committed stake: the chain's delegation sum or
//! candidate bond, against `active + scheduled_unbonds` of the stored row.

use super::ChainSnapshot;
use crate::{
    ledger::{AddressEncoder, Amount, RawAccount},
    staking::store::StakingStore,
};
use num::BigInt;
use serde_derive::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

/// Chain and indexer amounts with their signed difference, `chain - indexer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Comparison {
    pub chain: Amount,
    pub indexer: Amount,
    pub difference: String,
}

impl Comparison {
    pub fn new(chain: Amount, indexer: Amount) -> Self {
        let difference = BigInt::from(chain.0.clone()) - BigInt::from(indexer.0.clone());
        Self {
            chain,
            indexer,
            difference: difference.to_string(),
        }
    }

    pub fn matches(&self) -> bool {
        self.chain == self.indexer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountAmount {
    pub account: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDifference {
    pub account: String,
    #[serde(flatten)]
    pub amounts: Comparison,
}

/// Differences between one side of the snapshot and the stored rows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SideAudit {
    pub chain_accounts: usize,
    pub indexer_accounts: usize,
    pub missing_in_indexer: Vec<AccountAmount>,
    pub only_in_indexer: Vec<String>,
    pub amount_differences: Vec<AccountDifference>,
    pub total: Comparison,
}

impl SideAudit {
    fn compare(chain: BTreeMap<String, Amount>, indexer: BTreeMap<String, Amount>) -> Self {
        let chain_total: Amount = chain.values().sum();
        let indexer_total: Amount = indexer.values().sum();
        let mut audit = SideAudit {
            chain_accounts: chain.len(),
            indexer_accounts: indexer.len(),
            total: Comparison::new(chain_total, indexer_total),
            ..Default::default()
        };

        for (account, amount) in &chain {
            match indexer.get(account) {
                None => audit.missing_in_indexer.push(AccountAmount {
                    account: account.clone(),
                    amount: amount.clone(),
                }),
                Some(stored) if stored != amount => {
                    audit.amount_differences.push(AccountDifference {
                        account: account.clone(),
                        amounts: Comparison::new(amount.clone(), stored.clone()),
                    })
                }
                Some(_) => (),
            }
        }
        audit.only_in_indexer = indexer
            .into_keys()
            .filter(|account| !chain.contains_key(account))
            .collect();
        audit
    }

    pub fn is_clean(&self) -> bool {
        self.missing_in_indexer.is_empty()
            && self.only_in_indexer.is_empty()
            && self.amount_differences.is_empty()
            && self.total.matches()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub block: u32,
    pub stakers: SideAudit,
    pub collators: SideAudit,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.stakers.is_clean() && self.collators.is_clean()
    }
}

/// Compare a snapshot with the store. Accounts with zero committed stake on
/// either side are left out.
#[instrument(skip_all, fields(block = snapshot.block.number))]
pub fn audit<S>(
    store: &S,
    encoder: &AddressEncoder,
    snapshot: &ChainSnapshot,
) -> anyhow::Result<AuditReport>
where
    S: StakingStore + ?Sized,
{
    let normalize = |account: &str| match encoder.normalize(RawAccount::Encoded(account)) {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Skipping snapshot account {account:?}: {e}");
            None
        }
    };

    let mut chain_stakers: BTreeMap<String, Amount> = BTreeMap::new();
    for state in &snapshot.delegator_states {
        if let Some(id) = normalize(&state.delegator) {
            let committed = chain_stakers.entry(id).or_default();
            for bond in &state.delegations {
                *committed += &bond.amount;
            }
        }
    }
    let mut chain_collators: BTreeMap<String, Amount> = BTreeMap::new();
    for info in &snapshot.candidate_infos {
        if let Some(id) = normalize(&info.candidate) {
            *chain_collators.entry(id).or_default() += &info.bond;
        }
    }
    chain_stakers.retain(|_, amount| amount.is_positive());
    chain_collators.retain(|_, amount| amount.is_positive());

    let indexer_stakers: BTreeMap<String, Amount> = store
        .find_stakers()?
        .into_iter()
        .map(|staker| (staker.id, &staker.staked_amount + &staker.scheduled_unbonds))
        .filter(|(_, committed)| committed.is_positive())
        .collect();
    let indexer_collators: BTreeMap<String, Amount> = store
        .find_collators()?
        .into_iter()
        .map(|collator| (collator.id, &collator.self_bond + &collator.scheduled_unbonds))
        .filter(|(_, committed)| committed.is_positive())
        .collect();

    let report = AuditReport {
        block: snapshot.block.number,
        stakers: SideAudit::compare(chain_stakers, indexer_stakers),
        collators: SideAudit::compare(chain_collators, indexer_collators),
    };
    info!(
        "Audited block {}: stakers {} missing, {} extra, {} differ (total diff {}); collators {} missing, {} extra, {} differ (total diff {})",
        report.block,
        report.stakers.missing_in_indexer.len(),
        report.stakers.only_in_indexer.len(),
        report.stakers.amount_differences.len(),
        report.stakers.total.difference,
        report.collators.missing_in_indexer.len(),
        report.collators.only_in_indexer.len(),
        report.collators.amount_differences.len(),
        report.collators.total.difference,
    );
    Ok(report)
}
