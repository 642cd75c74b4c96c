// Validation pipeline integration tests
//
// Drives request metadata through self, sanity and chain-state checks against
// a committed snapshot, the way a shard block producer does.

use std::collections::BTreeMap;

use ed25519_dalek::SigningKey;
use mockall::mock;
use proptest::prelude::*;

use portal_metadata::{
    build_block_actions, external_tx_key, parse_metadata, porting_memo, redeem_memo, sign_hash, validate_metadata,
    BurnData, BurnedToken, CustodianDeposit, ErrorKind, ExchangeRateEntry, ExchangeRates, ExternalOutput,
    ExternalTransfer, FeeCheck, Metadata, MetadataError, MetadataValidator, MetaType, PortalTx, ProofEnvelope,
    ProofVerifier, RedeemRequest, RequestPorting, RequestUnlockCollateral, SignatureVerifiable, SnapshotView,
    Transaction, TxType, UserRequestPToken, TX_VERSION,
};
use portal_state::{
    ExternalChain, Hash, MatchingPortingCustodianDetail, MatchingRedeemCustodianDetail, PaymentAddress,
    PortalParams, PortingRequest, PortingStatus, RedeemRequest as RedeemRecord, RedeemStatus, StatusKey,
    StatusKind, StatusRecord, StatusStore, TokenId, PORTAL_ETH_ID, PRV_TOKEN_ID,
};

mock! {
    Verifier {}
    impl ProofVerifier for Verifier {
        fn verify(&self, chain: ExternalChain, proof: &str) -> Result<ExternalTransfer, MetadataError>;
    }
}

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

fn tx(signer: &SigningKey, tx_type: TxType, burn: BurnData, meta: Metadata) -> PortalTx {
    PortalTx {
        hash: Hash::compute(&serde_json::to_vec(&meta).unwrap()),
        tx_type,
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

fn snapshot(verifier: Box<dyn ProofVerifier>) -> SnapshotView {
    let mut view = SnapshotView::new(PortalParams::default(), verifier);
    let mut rates = BTreeMap::new();
    rates.insert(eth(), 2000);
    rates.insert(prv(), 1);
    view.state.exchange_rates.replace(rates);
    view
}

fn check(view: &SnapshotView, tx: &PortalTx) -> Result<FeeCheck, MetadataError> {
    let meta = tx.metadata().expect("test tx carries metadata");
    validate_metadata(meta, tx, view, view, view)
}

fn proof() -> String {
    ProofEnvelope { block_headers: vec!["h1".into()], tx_proof: "p".into(), receipt: None }
        .encode()
        .unwrap()
}

#[test]
fn test_custodian_deposit_burn_and_signer() {
    let view = snapshot(Box::new(MockVerifier::new()));
    let custodian = key(1);
    let meta = Metadata::CustodianDeposit(CustodianDeposit::new(address(&custodian), eth(), CUSTODIAN_REMOTE, 5000));

    let ok = tx(&custodian, TxType::Normal, prv_burn(5000), meta.clone());
    assert_eq!(check(&view, &ok).unwrap(), FeeCheck::Continue);

    let short = tx(&custodian, TxType::Normal, prv_burn(4999), meta.clone());
    assert_eq!(check(&view, &short).unwrap_err().kind(), ErrorKind::Structural);

    let stranger = tx(&key(2), TxType::Normal, prv_burn(5000), meta);
    assert_eq!(check(&view, &stranger).unwrap_err().kind(), ErrorKind::Authorization);
}

#[test]
fn test_bad_remote_address_is_structural() {
    let view = snapshot(Box::new(MockVerifier::new()));
    let custodian = key(1);
    let meta = Metadata::CustodianDeposit(CustodianDeposit::new(address(&custodian), eth(), "0x1234", 5000));
    let t = tx(&custodian, TxType::Normal, prv_burn(5000), meta);
    assert!(matches!(check(&view, &t), Err(MetadataError::InvalidField { field: "remote address", .. })));
}

#[test]
fn test_porting_fee_follows_exchange_rates() {
    let view = snapshot(Box::new(MockVerifier::new()));
    let porter = key(3);
    // 1000 eth units -> 2_000_000 prv -> 1 bps = 200
    let enough = RequestPorting::new("p1", address(&porter), eth(), 1000, 200);
    let t = tx(&porter, TxType::Normal, prv_burn(200), Metadata::RequestPorting(enough));
    assert!(check(&view, &t).is_ok());

    let low = RequestPorting::new("p2", address(&porter), eth(), 1000, 199);
    let t = tx(&porter, TxType::Normal, prv_burn(199), Metadata::RequestPorting(low));
    let err = check(&view, &t).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    assert!(!err.is_permanent());
}

#[test]
fn test_processed_porting_id_is_duplicate() {
    let mut view = snapshot(Box::new(MockVerifier::new()));
    view.store.put(
        StatusKey::new(StatusKind::PortingRequest, "p1"),
        StatusRecord::new(PortingStatus::Matched.as_byte(), 3, serde_json::Value::Null),
    );
    let porter = key(3);
    let meta = Metadata::RequestPorting(RequestPorting::new("p1", address(&porter), eth(), 1000, 200));
    let t = tx(&porter, TxType::Normal, prv_burn(200), meta);
    assert!(matches!(check(&view, &t), Err(MetadataError::Duplicate(id)) if id == "p1"));
}

fn waiting_porting(porter: &PaymentAddress, custodian: &PaymentAddress) -> PortingRequest {
    PortingRequest {
        unique_register_id: "p1".into(),
        tx_req_id: Hash::compute(b"porting"),
        token_id: eth(),
        porter_address: porter.clone(),
        amount: 1000,
        porting_fee: 200,
        custodians: vec![MatchingPortingCustodianDetail {
            custodian_address: custodian.clone(),
            remote_address: CUSTODIAN_REMOTE.into(),
            amount: 1000,
            locked_collateral: 3_000_000,
        }],
        beacon_height: 1,
        shard_id: 0,
        status: PortingStatus::Waiting,
    }
}

#[test]
fn test_ptoken_request_checks_memo_and_payouts() {
    let porter = key(3);
    let custodian = address(&key(1));

    let mut verifier = MockVerifier::new();
    verifier
        .expect_verify()
        .withf(|chain, _| *chain == ExternalChain::Ethereum)
        .times(1)
        .returning(|_, _| {
            Ok(ExternalTransfer {
                chain_tx_id: "0xabc".into(),
                memo: porting_memo("p1"),
                outputs: vec![ExternalOutput { address: CUSTODIAN_REMOTE.into(), amount: 1000 }],
            })
        });
    let mut view = snapshot(Box::new(verifier));
    view.state
        .waiting_porting
        .insert("p1".into(), waiting_porting(&address(&porter), &custodian));

    let meta = Metadata::UserRequestPToken(UserRequestPToken::new("p1", eth(), address(&porter), 1000, proof(), "0xabc"));
    let t = tx(&porter, TxType::Normal, BurnData::default(), meta);
    assert!(check(&view, &t).is_ok());
}

#[test]
fn test_ptoken_request_underpaid_custodian_is_proof_error() {
    let porter = key(3);
    let custodian = address(&key(1));

    let mut verifier = MockVerifier::new();
    verifier.expect_verify().returning(|_, _| {
        Ok(ExternalTransfer {
            chain_tx_id: "0xabc".into(),
            memo: porting_memo("p1"),
            outputs: vec![ExternalOutput { address: CUSTODIAN_REMOTE.into(), amount: 999 }],
        })
    });
    let mut view = snapshot(Box::new(verifier));
    view.state
        .waiting_porting
        .insert("p1".into(), waiting_porting(&address(&porter), &custodian));

    let meta = Metadata::UserRequestPToken(UserRequestPToken::new("p1", eth(), address(&porter), 1000, proof(), "0xabc"));
    let t = tx(&porter, TxType::Normal, BurnData::default(), meta);
    assert_eq!(check(&view, &t).unwrap_err().kind(), ErrorKind::Proof);
}

#[test]
fn test_ptoken_request_with_spent_external_tx_is_duplicate() {
    let porter = key(3);
    let custodian = address(&key(1));

    let mut verifier = MockVerifier::new();
    verifier.expect_verify().returning(|_, _| {
        Ok(ExternalTransfer {
            chain_tx_id: "0xabc".into(),
            memo: porting_memo("p1"),
            outputs: vec![ExternalOutput { address: CUSTODIAN_REMOTE.into(), amount: 1000 }],
        })
    });
    let mut view = snapshot(Box::new(verifier));
    view.state
        .waiting_porting
        .insert("p1".into(), waiting_porting(&address(&porter), &custodian));
    view.store.put(
        StatusKey::new(StatusKind::ExternalTx, external_tx_key(&eth(), "0xabc")),
        StatusRecord::new(1, 2, serde_json::Value::Null),
    );

    let meta = Metadata::UserRequestPToken(UserRequestPToken::new("p1", eth(), address(&porter), 1000, proof(), "0xabc"));
    let t = tx(&porter, TxType::Normal, BurnData::default(), meta);
    assert!(matches!(check(&view, &t), Err(MetadataError::Duplicate(_))));

    // the request must name the transaction its proof covers
    let meta = Metadata::UserRequestPToken(UserRequestPToken::new("p1", eth(), address(&porter), 1000, proof(), "0xdef"));
    let t = tx(&porter, TxType::Normal, BurnData::default(), meta);
    assert_eq!(check(&view, &t).unwrap_err().kind(), ErrorKind::Proof);
}

const REDEEMER_REMOTE: &str = "0x000000000000000000000000000000000000dEaD";

/// Redeem r1 of 1000 split evenly between two custodians.
fn matched_redeem(c1: &PaymentAddress, c2: &PaymentAddress) -> RedeemRecord {
    let share = |custodian: &PaymentAddress| MatchingRedeemCustodianDetail {
        custodian_address: custodian.clone(),
        remote_address: CUSTODIAN_REMOTE.into(),
        amount: 500,
    };
    RedeemRecord {
        unique_redeem_id: "r1".into(),
        tx_req_id: Hash::compute(b"redeem"),
        token_id: eth(),
        redeemer_address: address(&key(5)),
        redeemer_remote_address: REDEEMER_REMOTE.into(),
        amount: 1000,
        redeem_fee: 200,
        custodians: vec![share(c1), share(c2)],
        beacon_height: 1,
        shard_id: 0,
        status: RedeemStatus::Matched,
    }
}

#[test]
fn test_one_external_payment_unlocks_one_share() {
    let (k1, k2) = (key(1), key(2));
    let (c1, c2) = (address(&k1), address(&k2));

    let memo = redeem_memo("r1", &c1);
    let mut verifier = MockVerifier::new();
    verifier.expect_verify().returning(move |_, _| {
        Ok(ExternalTransfer {
            chain_tx_id: "btc-tx-1".into(),
            memo: memo.clone(),
            outputs: vec![ExternalOutput { address: REDEEMER_REMOTE.into(), amount: 500 }],
        })
    });
    let mut view = snapshot(Box::new(verifier));
    view.state.matched_redeem.insert("r1".into(), matched_redeem(&c1, &c2));

    let unlock = |signer: &SigningKey, custodian: &PaymentAddress| {
        let meta = RequestUnlockCollateral::new("r1", eth(), custodian.clone(), 500, proof(), "btc-tx-1");
        tx(signer, TxType::Normal, BurnData::default(), Metadata::RequestUnlockCollateral(meta))
    };
    assert!(check(&view, &unlock(&k1, &c1)).is_ok());

    // c1's payment carries c1's memo, so it cannot settle c2's equal share
    let err = check(&view, &unlock(&k2, &c2)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Proof);

    // once accepted, the same transaction cannot unlock again
    view.store.put(
        StatusKey::new(StatusKind::ExternalTx, external_tx_key(&eth(), "btc-tx-1")),
        StatusRecord::new(1, 2, serde_json::Value::Null),
    );
    assert!(matches!(check(&view, &unlock(&k1, &c1)), Err(MetadataError::Duplicate(_))));
}

#[test]
fn test_exchange_rates_need_feeder_signature() {
    let feeder = key(9);
    let mut view = snapshot(Box::new(MockVerifier::new()));
    view.params.feeder_address = address(&feeder);

    let mut rates = ExchangeRates::new(
        address(&feeder),
        vec![
            ExchangeRateEntry { token_id: eth(), rate: 2100 },
            ExchangeRateEntry { token_id: prv(), rate: 1 },
        ],
    );
    let unsigned = tx(&feeder, TxType::Normal, BurnData::default(), Metadata::ExchangeRates(rates.clone()));
    assert_eq!(check(&view, &unsigned).unwrap_err().kind(), ErrorKind::Authorization);

    rates.header.sig = sign_hash(&feeder, &rates.hash_without_sig());
    let signed = tx(&feeder, TxType::Normal, BurnData::default(), Metadata::ExchangeRates(rates.clone()));
    assert!(check(&view, &signed).is_ok());

    let intruder = key(4);
    let mut forged = ExchangeRates::new(address(&intruder), rates.rates.clone());
    forged.header.sig = sign_hash(&intruder, &forged.hash_without_sig());
    let t = tx(&intruder, TxType::Normal, BurnData::default(), Metadata::ExchangeRates(forged));
    assert!(matches!(check(&view, &t), Err(MetadataError::Unauthorized(_))));
}

#[test]
fn test_redeem_requires_token_burn_and_fee() {
    let view = snapshot(Box::new(MockVerifier::new()));
    let redeemer = key(5);
    let meta = Metadata::RedeemRequest(RedeemRequest::new(
        "r1",
        eth(),
        1000,
        address(&redeemer),
        "0x000000000000000000000000000000000000dEaD",
        200,
    ));
    let burn = BurnData { prv_amount: 200, token: Some(BurnedToken { token_id: eth(), amount: 1000 }) };
    let ok = tx(&redeemer, TxType::CustomToken, burn, meta.clone());
    assert!(check(&view, &ok).is_ok());

    let wrong_type = tx(&redeemer, TxType::Normal, prv_burn(200), meta);
    assert!(matches!(check(&view, &wrong_type), Err(MetadataError::TxShape(_))));
}

#[test]
fn test_block_actions_skip_rejected_and_decode_back() {
    let view = snapshot(Box::new(MockVerifier::new()));
    let custodian = key(1);
    let good = tx(
        &custodian,
        TxType::Normal,
        prv_burn(5000),
        Metadata::CustodianDeposit(CustodianDeposit::new(address(&custodian), eth(), CUSTODIAN_REMOTE, 5000)),
    );
    let bad = tx(
        &key(2),
        TxType::Normal,
        prv_burn(1),
        Metadata::CustodianDeposit(CustodianDeposit::new(address(&custodian), eth(), CUSTODIAN_REMOTE, 5000)),
    );
    let out = build_block_actions(&[&good, &bad], &view, &view, &view);
    assert_eq!(out.actions.len(), 1);
    assert_eq!(out.rejected.len(), 1);
    assert!(out.rejected[0].permanent);

    let action = &out.actions[0];
    assert_eq!(action.meta_type, MetaType::CustodianDeposit);
    let envelope = action.decode().unwrap();
    assert_eq!(envelope.tx_req_id, good.hash);
    assert_eq!(&envelope.meta, good.metadata().unwrap());
}

#[test]
fn test_parse_rejects_beacon_only_and_unknown_types() {
    assert!(matches!(parse_metadata(r#"{"Type":112}"#), Err(MetadataError::NotTransactionMetadata(112))));
    assert!(matches!(parse_metadata(r#"{"Type":99}"#), Err(MetadataError::UnknownType(99))));
    assert!(matches!(parse_metadata(r#"{"Type":"100"}"#), Err(MetadataError::Malformed(_))));
}

proptest! {
    #[test]
    fn prop_hash_survives_json_roundtrip(
        id in "[a-z0-9]{1,32}",
        amount in 1u64..u64::MAX,
        fee in 1u64..1_000_000,
        seed in 1u8..=255,
    ) {
        let meta = Metadata::RedeemRequest(RedeemRequest::new(
            id,
            eth(),
            amount,
            address(&key(seed)),
            CUSTODIAN_REMOTE,
            fee,
        ));
        let back = parse_metadata(&meta.to_json().unwrap()).unwrap();
        prop_assert_eq!(back.hash(), meta.hash());
        prop_assert_eq!(back, meta);
    }
}
