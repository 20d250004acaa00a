pub mod resilience;
pub mod store;

use crate::{
    block::Batch,
    constants::BLOCK_REPORTING_FREQ_NUM,
    event::{Decoded, EventCanonicalizer},
    receiver::BlockSource,
    snapshot::{
        fetch_snapshot, reconcile::reconcile, retry::FetchPolicies, ChainStateSource,
        SnapshotAnchor,
    },
    staking::{
        cache::EntityCache,
        context::IndexerContext,
        rules::apply_action,
        store::{StakeChanges, StakingStore},
        Transition,
    },
};
use resilience::{BatchDirective, ErrorDecision, ResilienceController};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use store::{BlockCursor, CursorStore};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub blocks: usize,
    pub applied: usize,
    pub ignored: usize,
    pub rejected: usize,
    pub activated: usize,
    pub deactivated: usize,
    pub stakers_written: usize,
    pub collators_written: usize,
}

/// Apply every event of a batch, in block then intra-block order, through
/// one cache, and hand back the rows it touched without writing them.
///
/// Events that cannot be canonicalized are dropped with a warning. Store
/// failures abort the batch before anything is written.
pub fn apply_batch<S>(
    store: &S,
    ctx: &mut IndexerContext,
    canonicalizer: &EventCanonicalizer,
    batch: &Batch,
) -> anyhow::Result<(BatchSummary, StakeChanges)>
where
    S: StakingStore + ?Sized,
{
    let mut summary = BatchSummary {
        blocks: batch.blocks.len(),
        ..Default::default()
    };
    let mut cache = EntityCache::new(store, ctx.total_supply().clone());

    for block in &batch.blocks {
        for event in &block.events {
            match canonicalizer.canonicalize(event) {
                Decoded::Action(action) => {
                    match apply_action(&mut cache, ctx, &action, block.height)? {
                        Transition::Activated => summary.activated += 1,
                        Transition::Deactivated => summary.deactivated += 1,
                        Transition::Unchanged => (),
                    }
                    summary.applied += 1;
                }
                Decoded::Ignored => summary.ignored += 1,
                Decoded::Rejected(e) => {
                    warn!("Dropping {} in block {}: {e}", event.name, block.height);
                    summary.rejected += 1;
                }
            }
        }
    }

    let changes = cache.into_changes();
    summary.stakers_written = changes.stakers.len();
    summary.collators_written = changes.collators.len();
    Ok((summary, changes))
}

/// [apply_batch] followed by a single write of the touched rows
pub fn process_batch<S>(
    store: &S,
    ctx: &mut IndexerContext,
    canonicalizer: &EventCanonicalizer,
    batch: &Batch,
) -> anyhow::Result<BatchSummary>
where
    S: StakingStore + ?Sized,
{
    let (summary, changes) = apply_batch(store, ctx, canonicalizer, batch)?;
    store.write_changes(&changes)?;
    Ok(summary)
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub start_block: u32,
    pub end_block: Option<u32>,
    /// Keep polling once the source is exhausted
    pub follow: bool,
    pub poll_interval: Duration,
    pub fetch_policies: FetchPolicies,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            start_block: 0,
            end_block: None,
            follow: false,
            poll_interval: Duration::from_secs(6),
            fetch_policies: FetchPolicies::default(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub batches: usize,
    pub blocks: usize,
    pub applied: usize,
    pub rejected: usize,
    pub last_height: Option<u32>,
}

/// Drives the block source through the engine. The only mutator of the
/// engine context and the resilience controller.
pub struct Pipeline<S, B> {
    store: Arc<S>,
    source: B,
    canonicalizer: EventCanonicalizer,
    ctx: IndexerContext,
    controller: ResilienceController,
    chain: Option<Arc<dyn ChainStateSource>>,
    config: PipelineConfig,
    next_height: u32,
}

impl<S, B> Pipeline<S, B>
where
    S: StakingStore + CursorStore,
    B: BlockSource,
{
    /// Resumes after the stored cursor, or at the configured start block
    pub fn new(
        store: Arc<S>,
        source: B,
        canonicalizer: EventCanonicalizer,
        ctx: IndexerContext,
        controller: ResilienceController,
        config: PipelineConfig,
    ) -> anyhow::Result<Self> {
        let next_height = match store.get_cursor()? {
            Some(cursor) => {
                info!("Resuming after block {} ({})", cursor.height, cursor.hash);
                config.start_block.max(cursor.height + 1)
            }
            None => config.start_block,
        };

        Ok(Self {
            store,
            source,
            canonicalizer,
            ctx,
            controller,
            chain: None,
            config,
            next_height,
        })
    }

    pub fn with_chain(mut self, chain: Arc<dyn ChainStateSource>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn context(&self) -> &IndexerContext {
        &self.ctx
    }

    pub fn controller(&self) -> &ResilienceController {
        &self.controller
    }

    pub fn next_height(&self) -> u32 {
        self.next_height
    }

    #[instrument(skip(self))]
    pub async fn run(&mut self) -> anyhow::Result<PipelineSummary> {
        let mut summary = PipelineSummary::default();
        let mut last_report = self.next_height;
        info!(
            "Indexing from block {} in {:?} mode",
            self.next_height,
            self.controller.mode()
        );

        loop {
            if self.config.end_block.is_some_and(|end| self.next_height > end) {
                info!("Reached end block");
                break;
            }

            let mode = self.controller.mode();
            let mut batch = match self.source.fetch(mode, self.next_height).await {
                Ok(Some(batch)) => batch,
                Ok(None) if self.config.follow => {
                    debug!("No blocks at or above {}, waiting", self.next_height);
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
                Ok(None) => {
                    info!("Block source exhausted at {}", self.next_height);
                    break;
                }
                Err(e) => match self.controller.on_source_error(&e, Instant::now()) {
                    ErrorDecision::RetryAfter(delay) => {
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    ErrorDecision::SwitchToDirect => continue,
                    ErrorDecision::Fatal => return Err(e.into()),
                },
            };

            let block_range = batch.block_range();
            if self.controller.on_batch(block_range, Instant::now())
                == BatchDirective::RestartWithBulk
            {
                continue;
            }

            if let Some(end) = self.config.end_block {
                batch.truncate_after(end);
            }
            let Some(last) = batch.blocks.last().map(|block| BlockCursor {
                height: block.height,
                hash: block.hash.clone(),
            }) else {
                break;
            };

            let (processed, changes) =
                apply_batch(self.store.as_ref(), &mut self.ctx, &self.canonicalizer, &batch)?;
            // rows and cursor land together or not at all
            self.store.commit_batch(&changes, &last)?;
            self.controller.on_batch_success();
            self.next_height = last.height + 1;

            summary.batches += 1;
            summary.blocks += processed.blocks;
            summary.applied += processed.applied;
            summary.rejected += processed.rejected;
            summary.last_height = Some(last.height);
            debug!(
                "Processed blocks {:?}..={}: {} actions, {} dropped",
                batch.first_height(),
                last.height,
                processed.applied,
                processed.rejected
            );

            if last.height.saturating_sub(last_report) >= BLOCK_REPORTING_FREQ_NUM {
                info!(
                    "Indexed up to block {}: {} actions applied, {} events dropped",
                    last.height, summary.applied, summary.rejected
                );
                last_report = last.height;
            }

            self.maybe_reconcile(block_range).await;
        }

        Ok(summary)
    }

    /// Reconcile against chain head once the stream is live. Failures are
    /// logged and retried on a later batch.
    async fn maybe_reconcile(&mut self, block_range: u32) {
        let Some(chain) = self.chain.clone() else {
            return;
        };
        if !self.controller.should_reconcile(block_range, Instant::now()) {
            return;
        }

        info!("Caught up with the chain, reconciling at head");
        let snapshot = match fetch_snapshot(
            chain.as_ref(),
            SnapshotAnchor::Head,
            &self.config.fetch_policies,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Head reconciliation failed: {e}");
                return;
            }
        };

        match reconcile(
            self.store.as_ref(),
            self.canonicalizer.encoder(),
            &snapshot,
            self.ctx.total_supply(),
        ) {
            Ok(reconciled) => {
                self.ctx.reset_scheduled_pool(reconciled.scheduled_total);
                self.ctx.set_total_supply(reconciled.total_supply);
                self.controller.mark_reconciled();
            }
            Err(e) => warn!("Head reconciliation failed: {e}"),
        }
    }
}
