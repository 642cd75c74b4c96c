// Request status records
//
// SAFETY INVARIANTS:
// 1. One record per (kind, unique id); a later write for the same key replaces the record
// 2. Writes made while processing a beacon height stay in a StoreOverlay until the height
//    commits; a failed height discards them
// 3. Reads through an overlay see pending writes before committed ones

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Record namespaces, one per request family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusKind {
    CustodianDeposit,
    PortingRequest,
    RequestPToken,
    RedeemRequest,
    MatchingRedeem,
    UnlockCollateral,
    CustodianWithdraw,
    ExchangeRates,
    Liquidation,
    CustodianTopup,
    WithdrawReward,
    RedeemFromLiquidationPool,
    Reward,
    /// External-chain transaction already spent on a ptoken or unlock request
    ExternalTx,
}

impl StatusKind {
    pub fn prefix(self) -> &'static str {
        match self {
            StatusKind::CustodianDeposit => "custodian-deposit",
            StatusKind::PortingRequest => "porting",
            StatusKind::RequestPToken => "request-ptoken",
            StatusKind::RedeemRequest => "redeem",
            StatusKind::MatchingRedeem => "matching-redeem",
            StatusKind::UnlockCollateral => "unlock-collateral",
            StatusKind::CustodianWithdraw => "custodian-withdraw",
            StatusKind::ExchangeRates => "exchange-rates",
            StatusKind::Liquidation => "liquidation",
            StatusKind::CustodianTopup => "custodian-topup",
            StatusKind::WithdrawReward => "withdraw-reward",
            StatusKind::RedeemFromLiquidationPool => "redeem-liquidation-pool",
            StatusKind::Reward => "reward",
            StatusKind::ExternalTx => "external-tx",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusKey {
    pub kind: StatusKind,
    pub id: String,
}

impl StatusKey {
    pub fn new(kind: StatusKind, id: impl Into<String>) -> Self {
        StatusKey { kind, id: id.into() }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind.prefix(), self.id)
    }
}

/// Persisted status of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatusRecord {
    pub status: u8,
    /// Human-readable reason for rejections and refunds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub beacon_height: u64,
    /// Full request detail (matched custodians, amounts, ...)
    pub detail: serde_json::Value,
}

impl StatusRecord {
    pub fn new(status: u8, beacon_height: u64, detail: serde_json::Value) -> Self {
        StatusRecord { status, reason: None, beacon_height, detail }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

pub trait StatusStore {
    fn get(&self, key: &StatusKey) -> Option<StatusRecord>;
    fn put(&mut self, key: StatusKey, record: StatusRecord);

    fn contains(&self, key: &StatusKey) -> bool {
        self.get(key).is_some()
    }
}

/// Writes pending for one beacon height.
pub type StatusBatch = BTreeMap<StatusKey, StatusRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStatusStore {
    records: BTreeMap<StatusKey, StatusRecord>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_batch(&mut self, batch: StatusBatch) {
        self.records.extend(batch);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StatusKey, &StatusRecord)> {
        self.records.iter()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, key: &StatusKey) -> Option<StatusRecord> {
        self.records.get(key).cloned()
    }

    fn put(&mut self, key: StatusKey, record: StatusRecord) {
        self.records.insert(key, record);
    }
}

/// Uncommitted writes layered over a committed store.
pub struct StoreOverlay<'a> {
    base: &'a dyn StatusStore,
    pending: StatusBatch,
}

impl<'a> StoreOverlay<'a> {
    pub fn new(base: &'a dyn StatusStore) -> Self {
        StoreOverlay { base, pending: BTreeMap::new() }
    }

    pub fn pending(&self) -> &StatusBatch {
        &self.pending
    }

    pub fn into_batch(self) -> StatusBatch {
        self.pending
    }
}

impl StatusStore for StoreOverlay<'_> {
    fn get(&self, key: &StatusKey) -> Option<StatusRecord> {
        self.pending.get(key).cloned().or_else(|| self.base.get(key))
    }

    fn put(&mut self, key: StatusKey, record: StatusRecord) {
        self.pending.insert(key, record);
    }
}
