use super::{
    BlockRef, BondLessRequest, CandidateInfo, ChainError, ChainSnapshot, ChainStateSource,
    DelegationRequest, DelegatorState, TopDelegations,
};
use crate::ledger::Amount;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Chain query surface backed by a staking-state dump taken at one block
#[derive(Debug, Clone)]
pub struct JsonSnapshotSource {
    snapshot: ChainSnapshot,
}

impl JsonSnapshotSource {
    pub fn new(snapshot: ChainSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read(path)?;
        let snapshot: ChainSnapshot = serde_json::from_slice(&contents)?;
        info!(
            "Loaded chain snapshot at block {} from {}",
            snapshot.block.number,
            path.display()
        );
        Ok(Self::new(snapshot))
    }

    fn check(&self, at: &BlockRef) -> Result<(), ChainError> {
        if *at == self.snapshot.block {
            Ok(())
        } else {
            Err(ChainError::UnknownBlock(at.number))
        }
    }
}

#[async_trait]
impl ChainStateSource for JsonSnapshotSource {
    async fn best_block(&self) -> Result<BlockRef, ChainError> {
        Ok(self.snapshot.block.clone())
    }

    async fn block_at(&self, number: u32) -> Result<BlockRef, ChainError> {
        if number == self.snapshot.block.number {
            Ok(self.snapshot.block.clone())
        } else {
            Err(ChainError::UnknownBlock(number))
        }
    }

    async fn delegator_states(&self, at: &BlockRef) -> Result<Vec<DelegatorState>, ChainError> {
        self.check(at)?;
        Ok(self.snapshot.delegator_states.clone())
    }

    async fn candidate_infos(&self, at: &BlockRef) -> Result<Vec<CandidateInfo>, ChainError> {
        self.check(at)?;
        Ok(self.snapshot.candidate_infos.clone())
    }

    async fn delegation_requests(
        &self,
        at: &BlockRef,
    ) -> Result<Vec<DelegationRequest>, ChainError> {
        self.check(at)?;
        Ok(self.snapshot.delegation_requests.clone())
    }

    async fn candidate_bond_less_requests(
        &self,
        at: &BlockRef,
    ) -> Result<Vec<BondLessRequest>, ChainError> {
        self.check(at)?;
        Ok(self.snapshot.bond_less_requests.clone())
    }

    async fn selected_candidates(&self, at: &BlockRef) -> Result<Vec<String>, ChainError> {
        self.check(at)?;
        self.snapshot
            .selected_candidates
            .clone()
            .ok_or(ChainError::Unsupported("selected candidates"))
    }

    async fn top_delegations(
        &self,
        at: &BlockRef,
        candidate: &str,
    ) -> Result<TopDelegations, ChainError> {
        self.check(at)?;
        Ok(self
            .snapshot
            .top_delegations
            .iter()
            .find(|top| top.candidate == candidate)
            .cloned()
            .unwrap_or_else(|| TopDelegations {
                candidate: candidate.to_string(),
                total: Amount::zero(),
                delegations: vec![],
            }))
    }

    async fn total_issuance(&self, at: &BlockRef) -> Result<Option<Amount>, ChainError> {
        self.check(at)?;
        Ok(self.snapshot.total_issuance.clone())
    }
}
