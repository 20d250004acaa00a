use crate::helpers::{h160, setup_new_db_dir, MemoryStore};
use pretty_assertions::assert_eq;
use staking_indexer::{
    block::BlockHash,
    ledger::{AddressEncoder, Amount},
    snapshot::{
        audit::{audit, AccountAmount, Comparison},
        fetch_snapshot,
        json::JsonSnapshotSource,
        reconcile::reconcile,
        retry::FetchPolicies,
        BlockRef, Bond, BondLessRequest, CandidateInfo, ChainError, ChainSnapshot,
        DelegationRequest, DelegatorState, RequestAction, SnapshotAnchor, TopDelegations,
    },
    staking::{store::StakingStore, Staker, TotalStake},
    store::IndexerStore,
};

fn encoder() -> AddressEncoder {
    AddressEncoder::new(1284).unwrap()
}

fn block_ref(number: u32) -> BlockRef {
    BlockRef {
        number,
        hash: BlockHash(format!("0x{number:08x}")),
    }
}

fn delegator_state(delegator: &str, amounts: &[(&str, u64)]) -> DelegatorState {
    DelegatorState {
        delegator: delegator.to_string(),
        delegations: amounts
            .iter()
            .map(|(owner, amount)| Bond {
                owner: owner.to_string(),
                amount: Amount::from(*amount),
            })
            .collect(),
    }
}

#[test]
fn missing_rows_are_inserted_once() -> anyhow::Result<()> {
    let store_dir = setup_new_db_dir("reconcile-insert")?;
    let store = IndexerStore::new(store_dir.path())?;
    let (delegator, collator) = (h160(1), h160(2));

    let mut snapshot = ChainSnapshot::empty(block_ref(100));
    snapshot.delegator_states = vec![delegator_state(&delegator, &[(collator.as_str(), 800)])];
    snapshot.candidate_infos = vec![CandidateInfo {
        candidate: collator.clone(),
        bond: Amount::from(2_000u64),
    }];

    let first = reconcile(&store, &encoder(), &snapshot, &Amount::from(10_000u64))?;
    assert_eq!(first.stakers_inserted, 1);
    assert_eq!(first.collators_inserted, 1);
    assert_eq!(
        store.get_staker(&delegator)?,
        Some(Staker {
            id: delegator.clone(),
            staked_amount: Amount::from(800u64),
            scheduled_unbonds: Amount::zero(),
            total_delegated: Amount::from(800u64),
            total_undelegated: Amount::zero(),
            last_updated_block: 100,
        })
    );

    let stakers = store.find_stakers()?;
    let collators = store.find_collators()?;
    let total = store.get_total_stake()?;

    let second = reconcile(&store, &encoder(), &snapshot, &Amount::from(10_000u64))?;
    assert!(second.is_noop());
    assert_eq!(store.find_stakers()?, stakers);
    assert_eq!(store.find_collators()?, collators);
    assert_eq!(store.get_total_stake()?, total);
    Ok(())
}

#[test]
fn existing_rows_only_get_scheduled_unbonds() -> anyhow::Result<()> {
    let store_dir = setup_new_db_dir("reconcile-update")?;
    let store = IndexerStore::new(store_dir.path())?;
    let (delegator, collator) = (h160(3), h160(4));

    let existing = Staker {
        id: delegator.clone(),
        staked_amount: Amount::from(500u64),
        scheduled_unbonds: Amount::zero(),
        total_delegated: Amount::from(900u64),
        total_undelegated: Amount::from(400u64),
        last_updated_block: 7,
    };
    store.upsert_stakers(&[existing.clone()])?;

    let mut snapshot = ChainSnapshot::empty(block_ref(200));
    snapshot.delegator_states = vec![delegator_state(
        &delegator,
        &[(collator.as_str(), 300), (h160(5).as_str(), 200)],
    )];
    snapshot.delegation_requests = vec![
        DelegationRequest {
            delegator: delegator.clone(),
            collator: collator.clone(),
            action: RequestAction::Decrease(Amount::from(150u64)),
        },
        DelegationRequest {
            delegator: h160(99),
            collator: collator.clone(),
            action: RequestAction::Revoke(Amount::from(1_000u64)),
        },
    ];

    let summary = reconcile(&store, &encoder(), &snapshot, &Amount::zero())?;
    assert_eq!(summary.stakers_updated, 1);
    assert_eq!(summary.stakers_inserted, 0);
    assert_eq!(summary.scheduled_total, Amount::from(150u64));
    assert!(store.get_staker(&h160(99))?.is_none());

    let updated = store.get_staker(&delegator)?.unwrap();
    assert_eq!(
        updated,
        Staker {
            scheduled_unbonds: Amount::from(150u64),
            ..existing
        }
    );

    let total = store.get_total_stake()?.unwrap();
    assert_eq!(total.total_delegator_stake, Amount::from(350u64));
    assert_eq!(total.total_bonded, Amount::from(500u64));
    assert_eq!(total.active_staker_count, 1);
    Ok(())
}

#[test]
fn total_supply_falls_back_to_issuance() -> anyhow::Result<()> {
    let store_dir = setup_new_db_dir("reconcile-supply")?;
    let store = IndexerStore::new(store_dir.path())?;

    let mut snapshot = ChainSnapshot::empty(block_ref(1));
    snapshot.delegator_states = vec![delegator_state(&h160(6), &[(h160(7).as_str(), 250)])];
    snapshot.total_issuance = Some(Amount::from(1_000u64));

    let summary = reconcile(&store, &encoder(), &snapshot, &Amount::from(5u64))?;
    assert_eq!(summary.total_supply, Amount::from(1_000u64));

    // a stored supply wins over later issuance figures
    snapshot.total_issuance = Some(Amount::from(2_000u64));
    let summary = reconcile(&store, &encoder(), &snapshot, &Amount::from(5u64))?;
    assert_eq!(summary.total_supply, Amount::from(1_000u64));
    assert_eq!(
        store.get_total_stake()?.map(|total| total.staked_percentage),
        Some(rust_decimal_macros::dec!(25))
    );
    Ok(())
}

#[test]
fn collator_bond_less_requests_are_scheduled() -> anyhow::Result<()> {
    let store_dir = setup_new_db_dir("reconcile-collator")?;
    let store = IndexerStore::new(store_dir.path())?;
    let collator = h160(8);

    let mut snapshot = ChainSnapshot::empty(block_ref(50));
    snapshot.candidate_infos = vec![CandidateInfo {
        candidate: collator.clone(),
        bond: Amount::from(1_000u64),
    }];
    snapshot.bond_less_requests = vec![BondLessRequest {
        candidate: collator.clone(),
        amount: Amount::from(400u64),
    }];

    reconcile(&store, &encoder(), &snapshot, &Amount::zero())?;
    let stored = store.get_collator(&collator)?.unwrap();
    assert_eq!(stored.self_bond, Amount::from(600u64));
    assert_eq!(stored.scheduled_unbonds, Amount::from(400u64));

    let total: TotalStake = store.get_total_stake()?.unwrap();
    assert_eq!(total.total_collator_bond, Amount::from(600u64));
    assert_eq!(total.total_bonded, Amount::from(1_000u64));
    Ok(())
}

#[tokio::test]
async fn head_snapshot_includes_selected_set() -> anyhow::Result<()> {
    let collator = h160(10);
    let mut dump = ChainSnapshot::empty(block_ref(300));
    dump.selected_candidates = Some(vec![collator.clone()]);
    dump.top_delegations = vec![TopDelegations {
        candidate: collator.clone(),
        total: Amount::from(9_000u64),
        delegations: vec![],
    }];

    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, serde_json::to_vec(&dump)?)?;
    let source = JsonSnapshotSource::from_file(&path)?;

    let head = fetch_snapshot(&source, SnapshotAnchor::Head, &FetchPolicies::default()).await?;
    assert_eq!(head.selected_candidates, Some(vec![collator.clone()]));
    assert_eq!(head.top_delegations.len(), 1);

    let anchored =
        fetch_snapshot(&source, SnapshotAnchor::Block(300), &FetchPolicies::default()).await?;
    assert_eq!(anchored.selected_candidates, None);
    assert!(anchored.top_delegations.is_empty());

    let store_dir = setup_new_db_dir("reconcile-head")?;
    let store = IndexerStore::new(store_dir.path())?;
    let summary = reconcile(&store, &encoder(), &head, &Amount::zero())?;
    assert_eq!(summary.selected_candidates, 1);
    assert_eq!(summary.selected_backing, Amount::from(9_000u64));

    match fetch_snapshot(&source, SnapshotAnchor::Block(301), &FetchPolicies::default()).await {
        Err(e) => assert_eq!(e, ChainError::UnknownBlock(301)),
        Ok(snapshot) => panic!("expected unknown block, got {snapshot:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn snapshot_files_keep_large_integer_amounts() -> anyhow::Result<()> {
    let (delegator, collator) = (h160(11), h160(12));
    let raw = format!(
        r#"{{
  "block": {{ "number": 400, "hash": "0x00000190" }},
  "delegator_states": [{{
    "delegator": "{delegator}",
    "delegations": [{{ "owner": "{collator}", "amount": 1000000000000000000000 }}]
  }}],
  "delegation_requests": [{{
    "delegator": "{delegator}",
    "collator": "{collator}",
    "action": {{ "revoke": 250000000000000000000 }}
  }}]
}}"#
    );
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, raw)?;

    let source = JsonSnapshotSource::from_file(&path)?;
    let snapshot =
        fetch_snapshot(&source, SnapshotAnchor::Block(400), &FetchPolicies::default()).await?;

    let store_dir = setup_new_db_dir("reconcile-large")?;
    let store = IndexerStore::new(store_dir.path())?;
    reconcile(&store, &encoder(), &snapshot, &Amount::zero())?;

    let staker = store.get_staker(&delegator)?.unwrap();
    assert_eq!(staker.staked_amount, "750000000000000000000".parse::<Amount>()?);
    assert_eq!(staker.scheduled_unbonds, "250000000000000000000".parse::<Amount>()?);
    Ok(())
}

fn stored_staker(id: &str, staked: u64, scheduled: u64) -> Staker {
    let mut staker = Staker::new(id, 1);
    staker.staked_amount = Amount::from(staked);
    staker.scheduled_unbonds = Amount::from(scheduled);
    staker
}

#[test]
fn audit_reports_drift_without_writing() -> anyhow::Result<()> {
    let store = MemoryStore::default();
    let (matched, drifted, extra) = (h160(20), h160(21), h160(22));
    let (missing, dormant) = (h160(23), h160(24));
    let collator = h160(30);
    store.upsert_stakers(&[
        stored_staker(&matched, 600, 400),
        stored_staker(&drifted, 500, 0),
        stored_staker(&extra, 10, 0),
        stored_staker(&dormant, 0, 0),
    ])?;

    let mut snapshot = ChainSnapshot::empty(block_ref(500));
    snapshot.delegator_states = vec![
        delegator_state(&matched, &[(collator.as_str(), 1_000)]),
        delegator_state(&drifted, &[(collator.as_str(), 450)]),
        delegator_state(&missing, &[(collator.as_str(), 300)]),
    ];
    snapshot.candidate_infos = vec![CandidateInfo {
        candidate: collator.clone(),
        bond: Amount::from(2_000u64),
    }];

    let report = audit(&store, &encoder(), &snapshot)?;
    assert!(!report.is_clean());
    assert_eq!(report.block, 500);
    assert_eq!(report.stakers.chain_accounts, 3);
    assert_eq!(report.stakers.indexer_accounts, 3);
    assert_eq!(
        report.stakers.missing_in_indexer,
        vec![AccountAmount {
            account: missing.clone(),
            amount: Amount::from(300u64),
        }]
    );
    assert_eq!(report.stakers.only_in_indexer, vec![extra.clone()]);
    assert_eq!(report.stakers.amount_differences.len(), 1);
    assert_eq!(report.stakers.amount_differences[0].account, drifted);
    assert_eq!(report.stakers.amount_differences[0].amounts.difference, "-50");
    assert_eq!(
        report.stakers.total,
        Comparison::new(Amount::from(1_750u64), Amount::from(1_510u64))
    );
    assert_eq!(report.collators.missing_in_indexer.len(), 1);
    assert_eq!(report.collators.total.difference, "2000");

    // auditing never writes
    assert!(store.get_staker(&missing)?.is_none());
    assert!(store.find_collators()?.is_empty());
    Ok(())
}

#[test]
fn audit_is_clean_after_reconcile() -> anyhow::Result<()> {
    let store = MemoryStore::default();
    let (delegator, collator) = (h160(40), h160(41));

    let mut snapshot = ChainSnapshot::empty(block_ref(600));
    snapshot.delegator_states = vec![delegator_state(&delegator, &[(collator.as_str(), 900)])];
    snapshot.candidate_infos = vec![CandidateInfo {
        candidate: collator.clone(),
        bond: Amount::from(5_000u64),
    }];
    snapshot.delegation_requests = vec![DelegationRequest {
        delegator: delegator.clone(),
        collator: collator.clone(),
        action: RequestAction::Revoke(Amount::from(900u64)),
    }];

    reconcile(&store, &encoder(), &snapshot, &Amount::zero())?;
    let report = audit(&store, &encoder(), &snapshot)?;
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.stakers.total.chain, Amount::from(900u64));
    Ok(())
}
