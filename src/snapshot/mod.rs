//! Point-in-time chain staking state and its reconciliation into the store

pub mod audit;
pub mod json;
pub mod reconcile;
pub mod retry;

use crate::{block::BlockHash, ledger::Amount};
use async_trait::async_trait;
use retry::{retry_with_backoff, FetchPolicies, RetryPolicy};
use serde_derive::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain connection failed: {0}")]
    Connection(String),
    #[error("chain query timed out: {0}")]
    Timeout(String),
    #[error("chain does not support {0}")]
    Unsupported(&'static str),
    #[error("could not decode chain response: {0}")]
    Decode(String),
    #[error("unknown block {0}")]
    UnknownBlock(u32),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u32,
    pub hash: BlockHash,
}

/// Stake bonded by a delegator to one candidate, or by a delegator in a
/// candidate's top set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub owner: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatorState {
    pub delegator: String,
    #[serde(default)]
    pub delegations: Vec<Bond>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInfo {
    pub candidate: String,
    pub bond: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    Revoke(Amount),
    Decrease(Amount),
}

impl RequestAction {
    pub fn amount(&self) -> &Amount {
        match self {
            Self::Revoke(amount) | Self::Decrease(amount) => amount,
        }
    }
}

/// Pending delegation unbond
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub delegator: String,
    pub collator: String,
    pub action: RequestAction,
}

/// Pending collator bond-less request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondLessRequest {
    pub candidate: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopDelegations {
    pub candidate: String,
    pub total: Amount,
    #[serde(default)]
    pub delegations: Vec<Bond>,
}

/// Full staking state at one block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub block: BlockRef,
    #[serde(default)]
    pub delegator_states: Vec<DelegatorState>,
    #[serde(default)]
    pub candidate_infos: Vec<CandidateInfo>,
    #[serde(default)]
    pub delegation_requests: Vec<DelegationRequest>,
    #[serde(default)]
    pub bond_less_requests: Vec<BondLessRequest>,
    /// Only fetched for head-anchored snapshots
    #[serde(default)]
    pub selected_candidates: Option<Vec<String>>,
    #[serde(default)]
    pub top_delegations: Vec<TopDelegations>,
    #[serde(default)]
    pub total_issuance: Option<Amount>,
}

impl ChainSnapshot {
    pub fn empty(block: BlockRef) -> Self {
        Self {
            block,
            delegator_states: vec![],
            candidate_infos: vec![],
            delegation_requests: vec![],
            bond_less_requests: vec![],
            selected_candidates: None,
            top_delegations: vec![],
            total_issuance: None,
        }
    }
}

/// Chain query surface, every query anchored to a block
#[async_trait]
pub trait ChainStateSource: Send + Sync {
    async fn best_block(&self) -> Result<BlockRef, ChainError>;

    async fn block_at(&self, number: u32) -> Result<BlockRef, ChainError>;

    async fn delegator_states(&self, at: &BlockRef) -> Result<Vec<DelegatorState>, ChainError>;

    async fn candidate_infos(&self, at: &BlockRef) -> Result<Vec<CandidateInfo>, ChainError>;

    async fn delegation_requests(&self, at: &BlockRef)
        -> Result<Vec<DelegationRequest>, ChainError>;

    async fn candidate_bond_less_requests(
        &self,
        at: &BlockRef,
    ) -> Result<Vec<BondLessRequest>, ChainError>;

    async fn selected_candidates(&self, at: &BlockRef) -> Result<Vec<String>, ChainError>;

    async fn top_delegations(
        &self,
        at: &BlockRef,
        candidate: &str,
    ) -> Result<TopDelegations, ChainError>;

    async fn total_issuance(&self, _at: &BlockRef) -> Result<Option<Amount>, ChainError> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotAnchor {
    Head,
    Block(u32),
}

/// Fetch a snapshot. Optional parts are skipped when their bounded retries
/// run out or the chain does not support them.
#[instrument(skip(source, policies))]
pub async fn fetch_snapshot<C>(
    source: &C,
    anchor: SnapshotAnchor,
    policies: &FetchPolicies,
) -> Result<ChainSnapshot, ChainError>
where
    C: ChainStateSource + ?Sized,
{
    let required = &policies.required;
    let block = match anchor {
        SnapshotAnchor::Head => {
            retry_with_backoff(required, "chain head", || source.best_block()).await?
        }
        SnapshotAnchor::Block(number) => {
            retry_with_backoff(required, "block hash", || source.block_at(number)).await?
        }
    };
    info!("Fetching staking state at block {} ({})", block.number, block.hash);

    let mut snapshot = ChainSnapshot::empty(block.clone());
    snapshot.delegator_states =
        retry_with_backoff(required, "delegator states", || source.delegator_states(&block)).await?;
    snapshot.candidate_infos =
        retry_with_backoff(required, "candidate infos", || source.candidate_infos(&block)).await?;
    snapshot.delegation_requests = retry_with_backoff(required, "delegation requests", || {
        source.delegation_requests(&block)
    })
    .await?;
    info!(
        "Fetched {} delegators, {} candidates, {} delegation requests",
        snapshot.delegator_states.len(),
        snapshot.candidate_infos.len(),
        snapshot.delegation_requests.len()
    );

    snapshot.bond_less_requests = optional(&policies.optional, "candidate bond less requests", || {
        source.candidate_bond_less_requests(&block)
    })
    .await?
    .unwrap_or_default();

    if anchor == SnapshotAnchor::Head {
        if let Some(selected) = optional(&policies.optional, "selected candidates", || {
            source.selected_candidates(&block)
        })
        .await?
        {
            for candidate in &selected {
                if let Some(top) = optional(&policies.optional, "top delegations", || {
                    source.top_delegations(&block, candidate)
                })
                .await?
                {
                    snapshot.top_delegations.push(top);
                }
            }
            snapshot.selected_candidates = Some(selected);
        }
    }

    snapshot.total_issuance = optional(&policies.optional, "total issuance", || {
        source.total_issuance(&block)
    })
    .await?
    .flatten();

    Ok(snapshot)
}

async fn optional<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    op: F,
) -> Result<Option<T>, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    match retry_with_backoff(policy, what, op).await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() || matches!(e, ChainError::Unsupported(_)) => {
            warn!("Continuing without {what}: {e}");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
