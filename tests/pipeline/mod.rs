use crate::helpers::{block, event, h160, setup_new_db_dir, write_block, MemoryStore};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use staking_indexer::{
    block::{Batch, Block},
    event::EventCanonicalizer,
    ledger::{AddressEncoder, Amount},
    pipeline::{
        process_batch,
        resilience::{ResilienceConfig, ResilienceController, SourceMode},
        store::CursorStore,
        Pipeline, PipelineConfig,
    },
    receiver::{filesystem::FilesystemBlockSource, BlockSource, SourceError},
    snapshot::{
        json::JsonSnapshotSource, BlockRef, Bond, ChainSnapshot, DelegationRequest,
        DelegatorState, RequestAction,
    },
    staking::{context::IndexerContext, store::StakingStore},
    store::IndexerStore,
};
use std::sync::Arc;

fn canonicalizer() -> EventCanonicalizer {
    EventCanonicalizer::new(AddressEncoder::new(1284).unwrap())
}

fn staking_blocks() -> Vec<Block> {
    let (alice, bob, collator) = (h160(1), h160(2), h160(3));
    vec![
        block(
            1,
            vec![
                event("JoinedCollatorCandidates", json!([collator, "5000", "5000"])),
                event(
                    "Delegation",
                    json!({
                        "delegator": alice,
                        "lockedAmount": 1000,
                        "candidate": collator,
                        "delegatorPosition": { "__kind": "AddedToTop" },
                    }),
                ),
            ],
        ),
        block(
            2,
            vec![
                event("Delegation", json!([bob, 300, collator, {}])),
                event("Rewarded", json!([alice, 10])),
                event("DelegationIncreased", json!([bob, collator, "oops", true])),
            ],
        ),
        block(
            3,
            vec![event(
                "DelegationRevocationScheduled",
                json!({ "delegator": alice, "candidate": collator, "amount": "1000" }),
            )],
        ),
        block(
            4,
            vec![event("CancelledDelegationRequest", json!([alice, 400]))],
        ),
    ]
}

#[test]
fn batch_drops_bad_events_and_continues() -> anyhow::Result<()> {
    let store = MemoryStore::default();
    let mut ctx = IndexerContext::new(Amount::from(100_000u64));
    let batch = Batch::new(staking_blocks().into_iter().take(2).collect());

    let summary = process_batch(&store, &mut ctx, &canonicalizer(), &batch)?;
    assert_eq!(summary.blocks, 2);
    assert_eq!(summary.applied, 3);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.rejected, 1);
    assert_eq!(summary.activated, 3);
    assert_eq!(summary.stakers_written, 2);
    assert_eq!(summary.collators_written, 1);

    let total = store.get_total_stake()?.unwrap();
    assert_eq!(total.total_staked, Amount::from(6_300u64));
    assert_eq!(total.active_staker_count, 2);
    assert_eq!(total.active_collator_count, 1);
    assert_eq!(total.last_updated_block, 2);
    Ok(())
}

#[tokio::test]
async fn indexes_block_files_and_resumes() -> anyhow::Result<()> {
    let store_dir = setup_new_db_dir("pipeline-store")?;
    let blocks_dir = tempfile::TempDir::new()?;
    for block in staking_blocks() {
        write_block(blocks_dir.path(), &block)?;
    }

    let store = Arc::new(IndexerStore::new(store_dir.path())?);
    let config = PipelineConfig {
        end_block: Some(3),
        ..Default::default()
    };
    let source = FilesystemBlockSource::new(blocks_dir.path())?.with_batch_sizes(2, 1);
    let mut pipeline = Pipeline::new(
        store.clone(),
        source,
        canonicalizer(),
        IndexerContext::new(Amount::from(100_000u64)),
        ResilienceController::default(),
        config.clone(),
    )?;

    let summary = pipeline.run().await?;
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.blocks, 3);
    assert_eq!(summary.last_height, Some(3));
    assert_eq!(store.get_cursor()?.map(|cursor| cursor.height), Some(3));

    let alice = store.get_staker(&h160(1))?.unwrap();
    assert_eq!(alice.staked_amount, Amount::zero());
    assert_eq!(alice.scheduled_unbonds, Amount::from(1_000u64));
    assert_eq!(store.get_total_stake()?.unwrap().active_staker_count, 1);

    // the next run picks up after the cursor
    let source = FilesystemBlockSource::new(blocks_dir.path())?;
    let mut pipeline = Pipeline::new(
        store.clone(),
        source,
        canonicalizer(),
        IndexerContext::new(Amount::from(100_000u64)),
        ResilienceController::default(),
        PipelineConfig::default(),
    )?;
    assert_eq!(pipeline.next_height(), 4);

    let summary = pipeline.run().await?;
    assert_eq!(summary.blocks, 1);
    assert_eq!(summary.last_height, Some(4));
    assert_eq!(pipeline.context().scheduled_pool(), &Amount::from(600u64));

    let alice = store.get_staker(&h160(1))?.unwrap();
    assert_eq!(alice.staked_amount, Amount::from(400u64));
    assert_eq!(alice.scheduled_unbonds, Amount::from(600u64));
    assert_eq!(store.get_total_stake()?.unwrap().active_staker_count, 2);
    Ok(())
}

#[tokio::test]
async fn failed_commit_leaves_nothing_behind() -> anyhow::Result<()> {
    let blocks_dir = tempfile::TempDir::new()?;
    for block in staking_blocks().into_iter().take(2) {
        write_block(blocks_dir.path(), &block)?;
    }
    let store = Arc::new(MemoryStore::default());
    store.failing_commits.set(1);
    let config = PipelineConfig {
        end_block: Some(2),
        ..Default::default()
    };

    let mut pipeline = Pipeline::new(
        store.clone(),
        FilesystemBlockSource::new(blocks_dir.path())?,
        canonicalizer(),
        IndexerContext::new(Amount::from(100_000u64)),
        ResilienceController::default(),
        config.clone(),
    )?;
    assert!(pipeline.run().await.is_err());
    assert_eq!(store.get_cursor()?, None);
    assert!(store.find_stakers()?.is_empty());
    assert!(store.find_collators()?.is_empty());
    assert_eq!(store.get_total_stake()?, None);

    // a restart replays the same blocks exactly once
    let mut pipeline = Pipeline::new(
        store.clone(),
        FilesystemBlockSource::new(blocks_dir.path())?,
        canonicalizer(),
        IndexerContext::new(Amount::from(100_000u64)),
        ResilienceController::default(),
        config,
    )?;
    assert_eq!(pipeline.next_height(), 0);
    let summary = pipeline.run().await?;
    assert_eq!(summary.last_height, Some(2));
    assert_eq!(store.get_cursor()?.map(|cursor| cursor.height), Some(2));

    let total = store.get_total_stake()?.unwrap();
    assert_eq!(total.total_staked, Amount::from(6_300u64));
    assert_eq!(total.active_staker_count, 2);
    Ok(())
}

/// Fails while in bulk mode, serves blocks in direct mode
struct FlakyArchive {
    blocks: Vec<Block>,
    bulk_failures: u32,
}

#[async_trait]
impl BlockSource for FlakyArchive {
    async fn fetch(
        &mut self,
        mode: SourceMode,
        from_height: u32,
    ) -> Result<Option<Batch>, SourceError> {
        if mode == SourceMode::Bulk {
            self.bulk_failures += 1;
            return Err(SourceError::Unavailable("archive offline".into()));
        }

        let blocks: Vec<Block> = self
            .blocks
            .iter()
            .filter(|block| block.height >= from_height)
            .take(1)
            .cloned()
            .collect();
        Ok((!blocks.is_empty()).then(|| Batch::new(blocks)))
    }
}

#[tokio::test]
async fn live_stream_reconciles_at_head() -> anyhow::Result<()> {
    let (alice, collator) = (h160(1), h160(3));
    let store = Arc::new(MemoryStore::default());
    let source = FlakyArchive {
        blocks: staking_blocks().into_iter().take(2).collect(),
        bulk_failures: 0,
    };

    let mut head = ChainSnapshot::empty(BlockRef {
        number: 2,
        hash: "0x00000002".into(),
    });
    head.delegator_states = vec![DelegatorState {
        delegator: alice.clone(),
        delegations: vec![Bond {
            owner: collator.clone(),
            amount: Amount::from(1_000u64),
        }],
    }];
    head.delegation_requests = vec![DelegationRequest {
        delegator: alice.clone(),
        collator: collator.clone(),
        action: RequestAction::Revoke(Amount::from(250u64)),
    }];

    let config = ResilienceConfig {
        retry_delay_millis: 0,
        ..Default::default()
    };
    let mut pipeline = Pipeline::new(
        store.clone(),
        source,
        canonicalizer(),
        IndexerContext::new(Amount::from(100_000u64)),
        ResilienceController::new(config),
        PipelineConfig::default(),
    )?
    .with_chain(Arc::new(JsonSnapshotSource::new(head)));

    let summary = pipeline.run().await?;
    assert_eq!(summary.blocks, 2);
    assert_eq!(pipeline.controller().mode(), SourceMode::Direct);
    assert!(pipeline.controller().is_reconciled());
    assert_eq!(pipeline.context().scheduled_pool(), &Amount::from(250u64));

    let alice = store.get_staker(&alice)?.unwrap();
    assert_eq!(alice.staked_amount, Amount::from(1_000u64));
    assert_eq!(alice.scheduled_unbonds, Amount::from(250u64));
    Ok(())
}
