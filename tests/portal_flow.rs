// End-to-end Portal flow
//
// Shard blocks are validated into actions, the beacon turns them into
// instructions, and minting transactions are checked against those instructions.

use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;

use portal_custody::metadata::{
    sign_hash, BurnData, CustodianDeposit, ExchangeRateEntry, ExchangeRates, MintedCoin, PortalTx,
    RelayedReceiptVerifier, RequestPorting, ResponseMeta, SignatureVerifiable, SnapshotView, Transaction, TxType,
    TX_VERSION,
};
use portal_custody::state::{Hash, PaymentAddress, TokenId, PORTAL_ETH_ID, PRV_TOKEN_ID};
use portal_custody::{
    build_block_actions, verify_block, BeaconAccumulator, BeaconInstruction, InstStatus, MemoryStatusStore, Metadata,
    MetadataError, MetaType, PortalParams, PortalState, ShardAction,
};

const CUSTODIAN_REMOTE: &str = "0x52908400098527886E0F7030069857D2E4169EE7";

fn key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

fn address(k: &SigningKey) -> PaymentAddress {
    PaymentAddress::from_public_key(&k.verifying_key().to_bytes())
}

fn eth() -> TokenId {
    TokenId::from(PORTAL_ETH_ID)
}

fn prv() -> TokenId {
    TokenId::from(PRV_TOKEN_ID)
}

fn tx(signer: &SigningKey, burn: BurnData, meta: Metadata) -> PortalTx {
    PortalTx {
        hash: Hash::compute(&serde_json::to_vec(&meta).unwrap()),
        tx_type: TxType::Normal,
        version: TX_VERSION,
        sig_pub_key: signer.verifying_key().to_bytes(),
        sender_shard_id: 0,
        burn,
        mint: None,
        metadata: Some(meta),
    }
}

fn prv_burn(amount: u64) -> BurnData {
    BurnData { prv_amount: amount, token: None }
}

struct Network {
    params: PortalParams,
    beacon: BeaconAccumulator,
    state: PortalState,
    store: MemoryStatusStore,
    height: u64,
}

impl Network {
    fn new(params: PortalParams) -> Self {
        Network {
            beacon: BeaconAccumulator::new(params.clone()),
            params,
            state: PortalState::genesis(),
            store: MemoryStatusStore::new(),
            height: 0,
        }
    }

    /// Validate a shard-0 block against the committed beacon view.
    fn shard_block(&self, txs: &[&PortalTx]) -> Vec<ShardAction> {
        let mut view = SnapshotView::new(self.params.clone(), Box::new(RelayedReceiptVerifier { max_headers: 10 }))
            .with_state(self.state.clone())
            .at_heights(0, self.height + 1, self.height);
        view.store = self.store.clone();
        let txs: Vec<&dyn Transaction> = txs.iter().map(|t| *t as &dyn Transaction).collect();
        let block = build_block_actions(&txs, &view, &view, &view);
        assert!(block.rejected.is_empty(), "unexpected rejections: {:?}", block.rejected);
        block.actions
    }

    fn beacon_block(&mut self, actions: Vec<ShardAction>) -> Vec<BeaconInstruction> {
        self.height += 1;
        let mut by_shard = BTreeMap::new();
        if !actions.is_empty() {
            by_shard.insert(0u8, actions);
        }
        let outcome = self.beacon.produce(self.height, &self.state, &self.store, &by_shard).unwrap();

        let replayed = self.beacon.replay(self.height, &self.state, &self.store, &outcome.instructions).unwrap();
        assert_eq!(replayed.state_root, outcome.state_root);

        let (state, instructions) = outcome.commit(&mut self.store);
        self.state = state;
        instructions
    }
}

fn refund_tx(req_tx_id: Hash, porter: &PaymentAddress, amount: u64) -> PortalTx {
    let response = ResponseMeta::new(
        MetaType::PortingResponse,
        InstStatus::Expired,
        req_tx_id,
        porter.clone(),
        amount,
        prv(),
    );
    PortalTx {
        hash: Hash::compute(&[req_tx_id.0.as_slice(), b"refund"].concat()),
        tx_type: TxType::Mint,
        version: TX_VERSION,
        sig_pub_key: [0u8; 32],
        sender_shard_id: 0,
        burn: BurnData::default(),
        mint: Some(MintedCoin { receiver: porter.clone(), amount, token_id: prv() }),
        metadata: Some(Metadata::Response(response)),
    }
}

#[test_log::test]
fn test_unpaid_porting_expires_and_refund_mints_once() {
    let feeder = key(9);
    let custodian = key(1);
    let porter = key(3);
    let params = PortalParams {
        feeder_address: address(&feeder),
        timeout_waiting_porting_blocks: 3,
        ..PortalParams::default()
    };
    let mut net = Network::new(params);

    // height 1: rates and collateral
    let mut rates = ExchangeRates::new(
        address(&feeder),
        vec![
            ExchangeRateEntry { token_id: eth(), rate: 200 },
            ExchangeRateEntry { token_id: prv(), rate: 1 },
        ],
    );
    rates.header.sig = sign_hash(&feeder, &rates.hash_without_sig());
    let rates_tx = tx(&feeder, BurnData::default(), Metadata::ExchangeRates(rates));
    let deposit_tx = tx(
        &custodian,
        prv_burn(5000),
        Metadata::CustodianDeposit(CustodianDeposit::new(address(&custodian), eth(), CUSTODIAN_REMOTE, 5000)),
    );
    let actions = net.shard_block(&[&rates_tx, &deposit_tx]);
    let insts = net.beacon_block(actions);
    assert_eq!(insts.len(), 2);
    assert!(insts.iter().all(|i| i.status == InstStatus::Accepted));

    // height 2: 10 eth -> 2000 prv, 150% locked
    let porting_tx = tx(
        &porter,
        prv_burn(100),
        Metadata::RequestPorting(RequestPorting::new("p1", address(&porter), eth(), 10, 100)),
    );
    let actions = net.shard_block(&[&porting_tx]);
    let insts = net.beacon_block(actions);
    assert_eq!(insts[0].status, InstStatus::Accepted);
    let held = net.state.custodian_token(&address(&custodian), &eth()).unwrap();
    assert_eq!((held.locked_collateral, held.free_collateral), (3000, 2000));

    // the same id cannot be registered again on the shard
    let again = tx(
        &porter,
        prv_burn(101),
        Metadata::RequestPorting(RequestPorting::new("p1", address(&porter), eth(), 10, 101)),
    );
    let mut view = SnapshotView::new(net.params.clone(), Box::new(RelayedReceiptVerifier { max_headers: 10 }))
        .with_state(net.state.clone());
    view.store = net.store.clone();
    let block = build_block_actions(&[&again as &dyn Transaction], &view, &view, &view);
    assert!(block.actions.is_empty());
    assert!(matches!(block.rejected[0].error, MetadataError::Duplicate(_)));

    // heights 3..5: nobody pays, the porting times out at 2 + 3
    assert!(net.beacon_block(Vec::new()).is_empty());
    assert!(net.beacon_block(Vec::new()).is_empty());
    let insts = net.beacon_block(Vec::new());
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].meta_type, MetaType::ExpiredWaitingPortingReq);
    let held = net.state.custodian_token(&address(&custodian), &eth()).unwrap();
    assert_eq!((held.locked_collateral, held.free_collateral), (0, 5000));

    let mut arena = portal_custody::metadata::InstructionArena::new(insts);
    let refund = refund_tx(porting_tx.hash(), &address(&porter), 100);
    verify_block(&[&refund], &mut arena, &net.params, 0).unwrap();
    assert!(arena.is_used(0));

    let twice = refund_tx(porting_tx.hash(), &address(&porter), 100);
    let err = verify_block(&[&twice], &mut arena, &net.params, 0).unwrap_err();
    assert!(matches!(err, MetadataError::NoMatchingInstruction(_)));
}
