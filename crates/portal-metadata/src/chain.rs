// Read-only chain views used by validators
//
// SAFETY INVARIANTS:
// 1. Validators only ever read through these traits; they never mutate beacon state
// 2. A BeaconViewRetriever exposes the last committed snapshot, never an in-flight height
// 3. Lookups are blocking; a lookup failure is a validation error

use std::collections::BTreeMap;

use portal_state::{Hash, MemoryStatusStore, PortalParams, PortalState, StatusStore};

use crate::errors::MetadataError;
use crate::proof::ProofVerifier;
use crate::transaction::PortalTx;

pub trait ChainRetriever {
    fn params(&self) -> &PortalParams;
    fn transaction_by_hash(&self, hash: &Hash) -> Result<Option<PortalTx>, MetadataError>;
    fn proof_verifier(&self) -> &dyn ProofVerifier;
}

pub trait ShardViewRetriever {
    fn shard_id(&self) -> u8;
    fn shard_height(&self) -> u64;
}

pub trait BeaconViewRetriever {
    fn beacon_height(&self) -> u64;
    fn portal_state(&self) -> &PortalState;
    fn status_store(&self) -> &dyn StatusStore;
}

/// Committed snapshot implementing every view, for replay tooling and tests.
pub struct SnapshotView {
    pub params: PortalParams,
    pub state: PortalState,
    pub store: MemoryStatusStore,
    pub transactions: BTreeMap<Hash, PortalTx>,
    pub verifier: Box<dyn ProofVerifier>,
    pub shard_id: u8,
    pub shard_height: u64,
    pub beacon_height: u64,
}

impl SnapshotView {
    pub fn new(params: PortalParams, verifier: Box<dyn ProofVerifier>) -> Self {
        SnapshotView {
            params,
            state: PortalState::genesis(),
            store: MemoryStatusStore::new(),
            transactions: BTreeMap::new(),
            verifier,
            shard_id: 0,
            shard_height: 1,
            beacon_height: 1,
        }
    }

    pub fn with_state(mut self, state: PortalState) -> Self {
        self.state = state;
        self
    }

    pub fn at_heights(mut self, shard_id: u8, shard_height: u64, beacon_height: u64) -> Self {
        self.shard_id = shard_id;
        self.shard_height = shard_height;
        self.beacon_height = beacon_height;
        self
    }

    pub fn insert_transaction(&mut self, tx: PortalTx) {
        self.transactions.insert(tx.hash, tx);
    }
}

impl ChainRetriever for SnapshotView {
    fn params(&self) -> &PortalParams {
        &self.params
    }

    fn transaction_by_hash(&self, hash: &Hash) -> Result<Option<PortalTx>, MetadataError> {
        Ok(self.transactions.get(hash).cloned())
    }

    fn proof_verifier(&self) -> &dyn ProofVerifier {
        self.verifier.as_ref()
    }
}

impl ShardViewRetriever for SnapshotView {
    fn shard_id(&self) -> u8 {
        self.shard_id
    }

    fn shard_height(&self) -> u64 {
        self.shard_height
    }
}

impl BeaconViewRetriever for SnapshotView {
    fn beacon_height(&self) -> u64 {
        self.beacon_height
    }

    fn portal_state(&self) -> &PortalState {
        &self.state
    }

    fn status_store(&self) -> &dyn StatusStore {
        &self.store
    }
}
