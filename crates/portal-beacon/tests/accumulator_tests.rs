use std::collections::BTreeMap;

use portal_beacon::{BeaconAccumulator, BeaconError};
use portal_metadata::{
    mint_claim, BeaconInstruction, CustodianDeposit, ExchangeRateEntry, ExchangeRates, InstStatus, MetaType,
    Metadata, RedeemRequest, RequestPorting, RequestUnlockCollateral, ShardAction, UserRequestPToken,
};
use portal_state::{
    Hash, MemoryStatusStore, PaymentAddress, PortalParams, PortalState, PortingStatus, RedeemStatus, StatusKey,
    StatusKind, StatusStore, TokenId, PORTAL_BTC_ID,
};

fn btc() -> TokenId {
    TokenId::from(PORTAL_BTC_ID)
}

fn params() -> PortalParams {
    PortalParams { timeout_waiting_porting_blocks: 5, ..PortalParams::default() }
}

fn action(meta: Metadata, tag: &str, shard_id: u8) -> (u8, ShardAction) {
    (shard_id, ShardAction::build(&meta, Hash::compute(tag.as_bytes()), shard_id, 1).unwrap())
}

fn by_shard(list: Vec<(u8, ShardAction)>) -> BTreeMap<u8, Vec<ShardAction>> {
    let mut out: BTreeMap<u8, Vec<ShardAction>> = BTreeMap::new();
    for (shard, a) in list {
        out.entry(shard).or_default().push(a);
    }
    out
}

struct Chain {
    accumulator: BeaconAccumulator,
    state: PortalState,
    store: MemoryStatusStore,
    height: u64,
}

impl Chain {
    fn new(params: PortalParams) -> Self {
        Chain {
            accumulator: BeaconAccumulator::new(params),
            state: PortalState::genesis(),
            store: MemoryStatusStore::new(),
            height: 0,
        }
    }

    fn step(&mut self, list: Vec<(u8, ShardAction)>) -> Vec<BeaconInstruction> {
        self.height += 1;
        let outcome = self
            .accumulator
            .produce(self.height, &self.state, &self.store, &by_shard(list))
            .unwrap();
        let (state, instructions) = outcome.commit(&mut self.store);
        self.state = state;
        instructions
    }

    fn advance_to(&mut self, height: u64) {
        self.height = height - 1;
    }

    /// rate(btc) * 150 == rate(prv) * 100: porting capacity equals free collateral.
    fn seed(&mut self) {
        let p = self.accumulator.params().clone();
        let rates = ExchangeRates::new(
            p.feeder_address.clone(),
            vec![
                ExchangeRateEntry { token_id: btc(), rate: 2 },
                ExchangeRateEntry { token_id: p.prv_token_id.clone(), rate: 3 },
            ],
        );
        let insts = self.step(vec![
            action(Metadata::ExchangeRates(rates), "rates", 0),
            action(
                Metadata::CustodianDeposit(CustodianDeposit::new(PaymentAddress::new("c1"), btc(), "remote-c1", 1000)),
                "dep-c1",
                1,
            ),
            action(
                Metadata::CustodianDeposit(CustodianDeposit::new(PaymentAddress::new("c2"), btc(), "remote-c2", 500)),
                "dep-c2",
                2,
            ),
        ]);
        assert!(insts.iter().all(|i| i.status == InstStatus::Accepted));
    }
}

fn porting(id: &str, amount: u64) -> Metadata {
    Metadata::RequestPorting(RequestPorting::new(id, PaymentAddress::new("porter"), btc(), amount, 100))
}

fn redeem(id: &str, amount: u64) -> Metadata {
    Metadata::RedeemRequest(RedeemRequest::new(id, btc(), amount, PaymentAddress::new("user"), "user-remote", 10))
}

fn unlock(custodian: &str, amount: u64, external_tx: &str) -> Metadata {
    Metadata::RequestUnlockCollateral(RequestUnlockCollateral::new(
        "r1",
        btc(),
        PaymentAddress::new(custodian),
        amount,
        "proof",
        external_tx,
    ))
}

/// Seeded chain where p1 issued 1200 btc: c1 holds 1000, c2 holds 200.
fn issued_chain() -> Chain {
    let mut chain = Chain::new(params());
    chain.seed();
    chain.step(vec![action(porting("p1", 1200), "port-1", 3)]);
    let ptoken = UserRequestPToken::new("p1", btc(), PaymentAddress::new("porter"), 1200, "proof", "btc-tx-0");
    chain.step(vec![action(Metadata::UserRequestPToken(ptoken), "ptoken-1", 3)]);
    chain
}

#[test_log::test]
fn test_porting_1200_locks_collateral_across_two_custodians() {
    let mut chain = Chain::new(params());
    chain.seed();
    let insts = chain.step(vec![action(porting("p1", 1200), "port-1", 3)]);
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert_eq!(insts[0].shard_id, 3);

    let c1 = chain.state.custodian_token(&PaymentAddress::new("c1"), &btc()).unwrap();
    let c2 = chain.state.custodian_token(&PaymentAddress::new("c2"), &btc()).unwrap();
    assert_eq!((c1.locked_collateral, c1.free_collateral), (1000, 0));
    assert_eq!((c2.locked_collateral, c2.free_collateral), (200, 300));
    let porting = &chain.state.waiting_porting["p1"];
    assert_eq!(porting.matched_amount(), 1200);
    let record = chain.store.get(&StatusKey::new(StatusKind::PortingRequest, "p1")).unwrap();
    assert_eq!(record.status, PortingStatus::Waiting.as_byte());
}

#[test_log::test]
fn test_ptoken_issue_rewards_custodians_at_end_of_height() {
    let mut chain = Chain::new(params());
    chain.seed();
    chain.step(vec![action(porting("p1", 1200), "port-1", 3)]);
    let ptoken = UserRequestPToken::new("p1", btc(), PaymentAddress::new("porter"), 1200, "proof", "btc-tx-0");
    let insts = chain.step(vec![action(Metadata::UserRequestPToken(ptoken), "ptoken-1", 3)]);

    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].meta_type, MetaType::UserRequestPToken);
    assert_eq!(insts[1].meta_type, MetaType::PortalReward);
    let claim = mint_claim(&insts[0], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!(claim.amount, 1200);
    assert_eq!(claim.receiver, PaymentAddress::new("porter"));

    let c1 = chain.state.custodian_token(&PaymentAddress::new("c1"), &btc()).unwrap();
    let c2 = chain.state.custodian_token(&PaymentAddress::new("c2"), &btc()).unwrap();
    assert_eq!(c1.holding_public_token_amount, 1000);
    assert_eq!(c1.reward_amount + c2.reward_amount, 100);
    assert!(chain.state.waiting_porting.is_empty());
}

#[test_log::test]
fn test_reused_porting_id_is_rejected_and_keeps_first_record() {
    let mut chain = Chain::new(params());
    chain.seed();
    chain.step(vec![action(porting("p1", 300), "port-1", 3)]);
    let insts = chain.step(vec![action(porting("p1", 100), "port-again", 4)]);
    assert_eq!(insts[0].status, InstStatus::Rejected);

    let claim = mint_claim(&insts[0], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!(claim.response_type, MetaType::PortingResponse);
    assert_eq!(claim.amount, 100);
    let record = chain.store.get(&StatusKey::new(StatusKind::PortingRequest, "p1")).unwrap();
    assert_eq!(record.status, PortingStatus::Waiting.as_byte());
    assert_eq!(chain.state.waiting_porting["p1"].amount, 300);
}

#[test_log::test]
fn test_waiting_porting_expires_with_fee_refund() {
    let mut chain = Chain::new(params());
    chain.seed();
    chain.step(vec![action(porting("p1", 300), "port-1", 3)]);
    let accepted_at = chain.height;

    chain.advance_to(accepted_at + 4);
    assert!(chain.step(Vec::new()).is_empty());

    let insts = chain.step(Vec::new());
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].meta_type, MetaType::ExpiredWaitingPortingReq);
    assert_eq!(insts[0].status, InstStatus::Expired);
    assert_eq!(insts[0].shard_id, 3);
    let claim = mint_claim(&insts[0], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!((claim.amount, claim.req_tx_id), (100, Hash::compute(b"port-1")));

    let c1 = chain.state.custodian_token(&PaymentAddress::new("c1"), &btc()).unwrap();
    assert_eq!(c1.locked_collateral, 0);
    let record = chain.store.get(&StatusKey::new(StatusKind::PortingRequest, "p1")).unwrap();
    assert_eq!(record.status, PortingStatus::Expired.as_byte());
}

#[test_log::test]
fn test_ratio_below_threshold_liquidates_into_pool() {
    let p = params();
    let mut chain = Chain::new(p.clone());
    let c3 = PaymentAddress::new("c3");
    let mut rates = BTreeMap::new();
    rates.insert(btc(), 50_000);
    rates.insert(p.prv_token_id.clone(), 1);
    chain.state.exchange_rates.replace(rates);
    chain.state.upsert_custodian(&c3).deposit(&btc(), "remote-c3", 40_000).unwrap();
    {
        let t = chain.state.custodian_token_mut(&c3, &btc()).unwrap();
        t.lock(40_000).unwrap();
        t.add_holding(1).unwrap();
    }

    let insts = chain.step(Vec::new());
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].meta_type, MetaType::LiquidateTpExchangeRates);
    assert_eq!(insts[0].status, InstStatus::Liquidated);
    let content: portal_metadata::content::LiquidationByRatesContent = insts[0].decode_content().unwrap();
    assert_eq!(content.decision.ratio_percent, 80);
    assert_eq!(content.decision.liquidated_pub_token_amount, 1);
    assert_eq!(content.decision.liquidated_collateral_amount, 40_000);

    let t = chain.state.custodian_token(&c3, &btc()).unwrap();
    assert_eq!((t.total_collateral, t.holding_public_token_amount), (0, 0));
    let pool = chain.state.liquidation_pool.entry(&btc()).unwrap();
    assert_eq!((pool.liquidated_collateral_amount, pool.liquidated_pub_token_amount), (40_000, 1));
}

#[test_log::test]
fn test_produce_is_deterministic_and_replay_matches() {
    let mut chain = Chain::new(params());
    chain.seed();
    let list = vec![
        action(porting("p2", 400), "port-2", 5),
        action(porting("p1", 1200), "port-1", 1),
        action(porting("p3", 200), "port-3", 1),
    ];
    let actions = by_shard(list);
    let height = chain.height + 1;
    let a = chain.accumulator.produce(height, &chain.state, &chain.store, &actions).unwrap();
    let b = chain.accumulator.produce(height, &chain.state, &chain.store, &actions).unwrap();
    assert_eq!(a, b);

    // shard 1 goes first: p1 takes 1200 of 1500, p3 takes 200, p2 no longer fits
    let statuses: Vec<InstStatus> = a.instructions.iter().map(|i| i.status).collect();
    assert_eq!(statuses, vec![InstStatus::Accepted, InstStatus::Accepted, InstStatus::Rejected]);

    let replayed = chain.accumulator.replay(height, &chain.state, &chain.store, &a.instructions).unwrap();
    assert_eq!(replayed.state_root, a.state_root);
    assert_eq!(replayed.batch, a.batch);

    let verified = chain
        .accumulator
        .verify(height, &chain.state, &chain.store, &actions, &a.instructions)
        .unwrap();
    assert_eq!(verified.state, a.state);
}

#[test_log::test]
fn test_verify_rejects_tampered_instructions() {
    let mut chain = Chain::new(params());
    chain.seed();
    let actions = by_shard(vec![action(porting("p1", 300), "port-1", 3)]);
    let height = chain.height + 1;
    let honest = chain.accumulator.produce(height, &chain.state, &chain.store, &actions).unwrap();

    let mut forged = honest.instructions.clone();
    forged[0].status = InstStatus::Rejected;
    let err = chain
        .accumulator
        .verify(height, &chain.state, &chain.store, &actions, &forged)
        .unwrap_err();
    assert!(matches!(err, BeaconError::ReplayMismatch { index: 0, .. }));

    let err = chain
        .accumulator
        .verify(height, &chain.state, &chain.store, &actions, &[])
        .unwrap_err();
    assert!(matches!(err, BeaconError::ReplayMismatch { found: None, .. }));
}

#[test_log::test]
fn test_replay_of_inconsistent_instruction_halts_height() {
    let chain = Chain::new(params());
    let content = portal_metadata::content::RequestPTokenContent {
        unique_porting_id: "missing".into(),
        token_id: btc(),
        incognito_address: PaymentAddress::new("porter"),
        porting_amount: 5,
        external_tx_id: "btc-tx".into(),
        tx_req_id: Hash::compute(b"x"),
        shard_id: 0,
    };
    let inst = BeaconInstruction::new(MetaType::UserRequestPToken, 0, InstStatus::Accepted, &content).unwrap();
    let err = chain.accumulator.replay(1, &chain.state, &chain.store, &[inst]).unwrap_err();
    assert!(matches!(err, BeaconError::ConsensusInternal(_)));
}

#[test_log::test]
fn test_undecodable_action_is_skipped() {
    let mut chain = Chain::new(params());
    chain.seed();
    let garbage = ShardAction { meta_type: MetaType::RequestPorting, content: "not base64 %%".into() };
    let insts = chain.step(vec![(2, garbage), action(porting("p1", 300), "port-1", 2)]);
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].status, InstStatus::Accepted);
}

#[test_log::test]
fn test_unmatched_redeem_is_refunded_after_pick_more_fails() {
    let p = params();
    let mut chain = Chain::new(p.clone());
    let c1 = PaymentAddress::new("c1");
    let mut rates = BTreeMap::new();
    rates.insert(btc(), 1);
    rates.insert(p.prv_token_id.clone(), 1);
    chain.state.exchange_rates.replace(rates);
    chain.state.upsert_custodian(&c1).deposit(&btc(), "remote-c1", 2000).unwrap();
    {
        let t = chain.state.custodian_token_mut(&c1, &btc()).unwrap();
        t.lock(900).unwrap();
        t.add_holding(600).unwrap();
    }

    let redeem = RedeemRequest::new("r1", btc(), 800, PaymentAddress::new("user"), "user-remote", 10);
    let insts = chain.step(vec![action(Metadata::RedeemRequest(redeem), "redeem-1", 2)]);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert_eq!(chain.state.waiting_redeem["r1"].remaining_amount(), 200);
    assert_eq!(chain.state.custodian_token(&c1, &btc()).unwrap().holding_public_token_amount, 0);

    let opened_at = chain.height;
    chain.advance_to(opened_at + p.timeout_waiting_redeem_blocks);
    let insts = chain.step(Vec::new());
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].meta_type, MetaType::PickMoreCustodianForRedeem);
    assert_eq!(insts[0].status, InstStatus::Rejected);
    let claim = mint_claim(&insts[0], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!((claim.amount, claim.shard_id), (800, 2));

    assert!(chain.state.waiting_redeem.is_empty());
    assert_eq!(chain.state.custodian_token(&c1, &btc()).unwrap().holding_public_token_amount, 600);
    let record = chain.store.get(&StatusKey::new(StatusKind::RedeemRequest, "r1")).unwrap();
    assert_eq!(record.status, RedeemStatus::Refunded.as_byte());
}

#[test_log::test]
fn test_same_height_duplicate_porting_id_is_rejected() {
    let mut chain = Chain::new(params());
    chain.seed();
    let insts = chain.step(vec![action(porting("p1", 300), "port-1", 1), action(porting("p1", 100), "port-dup", 2)]);
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert_eq!(insts[1].status, InstStatus::Rejected);

    let claim = mint_claim(&insts[1], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!((claim.amount, claim.req_tx_id), (100, Hash::compute(b"port-dup")));
    assert_eq!(chain.state.waiting_porting.len(), 1);
    assert_eq!(chain.state.waiting_porting["p1"].amount, 300);
    let locked: u64 = ["c1", "c2"]
        .iter()
        .map(|c| chain.state.custodian_token(&PaymentAddress::new(*c), &btc()).unwrap().locked_collateral)
        .sum();
    assert_eq!(locked, 300);
    let record = chain.store.get(&StatusKey::new(StatusKind::PortingRequest, "p1")).unwrap();
    assert_eq!(record.status, PortingStatus::Waiting.as_byte());
}

#[test_log::test]
fn test_same_height_duplicate_redeem_id_is_rejected() {
    let mut chain = issued_chain();
    let insts = chain.step(vec![action(redeem("r1", 300), "redeem-1", 1), action(redeem("r1", 500), "redeem-dup", 2)]);
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert_eq!(insts[1].status, InstStatus::Rejected);

    // the duplicate burns are returned, the first redeem is untouched
    let claim = mint_claim(&insts[1], chain.accumulator.params()).unwrap().unwrap();
    assert_eq!((claim.amount, claim.req_tx_id), (500, Hash::compute(b"redeem-dup")));
    let kept = chain.state.redeem("r1").unwrap();
    assert_eq!((kept.amount, kept.tx_req_id), (300, Hash::compute(b"redeem-1")));
    let held: u64 = ["c1", "c2"]
        .iter()
        .map(|c| chain.state.custodian_token(&PaymentAddress::new(*c), &btc()).unwrap().holding_public_token_amount)
        .sum();
    assert_eq!(held, 900);
}

#[test_log::test]
fn test_one_external_tx_unlocks_one_share() {
    let mut chain = issued_chain();
    chain.step(vec![action(redeem("r1", 1200), "redeem-1", 1)]);
    assert_eq!(chain.state.matched_redeem["r1"].custodians.len(), 2);

    let insts = chain.step(vec![
        action(unlock("c1", 1000, "btc-tx-1"), "unlock-c1", 1),
        action(unlock("c2", 200, "btc-tx-1"), "unlock-c2", 2),
    ]);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert_eq!(insts[1].meta_type, MetaType::RequestUnlockCollateral);
    assert_eq!(insts[1].status, InstStatus::Rejected);
    let c2 = chain.state.custodian_token(&PaymentAddress::new("c2"), &btc()).unwrap();
    assert_eq!(c2.locked_collateral, 200);

    // a later height still sees the spent transaction
    let insts = chain.step(vec![action(unlock("c2", 200, "btc-tx-1"), "unlock-c2-again", 2)]);
    assert_eq!(insts[0].status, InstStatus::Rejected);

    let insts = chain.step(vec![action(unlock("c2", 200, "btc-tx-2"), "unlock-c2-paid", 2)]);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    assert!(chain.state.matched_redeem.is_empty());
    let record = chain.store.get(&StatusKey::new(StatusKind::RedeemRequest, "r1")).unwrap();
    assert_eq!(record.status, RedeemStatus::Completed.as_byte());
}

#[test_log::test]
fn test_liquidation_refunds_only_unpaid_redeem_share() {
    let mut chain = issued_chain();
    let p = chain.accumulator.params().clone();
    chain.step(vec![action(redeem("r1", 1200), "redeem-1", 1)]);
    chain.step(vec![action(unlock("c2", 200, "btc-tx-2"), "unlock-c2", 2)]);

    // btc 2 -> 3 drops c1 from 150% to 100%
    let rates = ExchangeRates::new(
        p.feeder_address.clone(),
        vec![
            ExchangeRateEntry { token_id: btc(), rate: 3 },
            ExchangeRateEntry { token_id: p.prv_token_id.clone(), rate: 3 },
        ],
    );
    chain.step(vec![action(Metadata::ExchangeRates(rates), "rates-up", 0)]);
    let insts = chain.step(Vec::new());

    let refunds: Vec<&BeaconInstruction> = insts
        .iter()
        .filter(|i| i.meta_type == MetaType::RedeemRequest && i.status == InstStatus::Refund)
        .collect();
    assert_eq!(refunds.len(), 1);
    let claim = mint_claim(refunds[0], &p).unwrap().unwrap();
    assert_eq!((claim.amount, claim.receiver), (1000, PaymentAddress::new("user")));
    let minted: u64 = insts
        .iter()
        .filter_map(|i| mint_claim(i, &p).ok().flatten())
        .filter(|c| c.token_id == btc())
        .map(|c| c.amount)
        .sum();
    assert_eq!(minted, 1000);

    let last = insts.last().unwrap();
    assert_eq!(last.meta_type, MetaType::LiquidateTpExchangeRates);
    let content: portal_metadata::content::LiquidationByRatesContent = last.decode_content().unwrap();
    assert_eq!(content.decision.liquidated_pub_token_amount, 1000);
    assert_eq!(content.decision.liquidated_collateral_amount, 1000);

    assert!(chain.state.matched_redeem.is_empty());
    let record = chain.store.get(&StatusKey::new(StatusKind::RedeemRequest, "r1")).unwrap();
    assert_eq!(record.status, RedeemStatus::Refunded.as_byte());
    let pool = chain.state.liquidation_pool.entry(&btc()).unwrap();
    assert_eq!((pool.liquidated_collateral_amount, pool.liquidated_pub_token_amount), (1000, 1000));
}

#[test_log::test]
fn test_extreme_rate_liquidation_keeps_the_beacon_running() {
    let p = params();
    let mut chain = Chain::new(p.clone());
    let c3 = PaymentAddress::new("c3");
    let mut rates = BTreeMap::new();
    rates.insert(btc(), 100_000_000_000_000_000);
    rates.insert(p.prv_token_id.clone(), 3);
    chain.state.exchange_rates.replace(rates);
    chain.state.upsert_custodian(&c3).deposit(&btc(), "remote-c3", 5_000).unwrap();
    {
        let t = chain.state.custodian_token_mut(&c3, &btc()).unwrap();
        t.lock(5_000).unwrap();
        t.add_holding(1000).unwrap();
    }

    let insts = chain.step(Vec::new());
    assert_eq!(insts.len(), 1);
    let content: portal_metadata::content::LiquidationByRatesContent = insts[0].decode_content().unwrap();
    assert_eq!(content.decision.liquidated_collateral_amount, 5_000);
    assert_eq!(content.decision.returned_collateral, 0);

    assert!(chain.step(Vec::new()).is_empty());
}
