// Shard-side metadata pipeline
//
// SAFETY INVARIANTS:
// 1. Checks run in order: self, sanity, chain state; the first failure stops the transaction
// 2. Only transactions passing every check contribute actions
// 3. Actions keep the block's transaction order

use log::{debug, info, warn};

use crate::action::ShardAction;
use crate::chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever};
use crate::envelope::{FeeCheck, Metadata, MetadataValidator};
use crate::errors::MetadataError;
use crate::transaction::Transaction;

/// A transaction the shard refused, and whether it may ever be retried.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub tx_hash: portal_state::Hash,
    pub error: MetadataError,
    pub permanent: bool,
}

#[derive(Debug, Default)]
pub struct BlockActions {
    pub actions: Vec<ShardAction>,
    pub rejected: Vec<Rejection>,
}

/// Run the three validation stages on one transaction's metadata.
pub fn validate_metadata(
    meta: &Metadata,
    tx: &dyn Transaction,
    chain: &dyn ChainRetriever,
    shard: &dyn ShardViewRetriever,
    beacon: &dyn BeaconViewRetriever,
) -> Result<FeeCheck, MetadataError> {
    if !meta.validate_metadata_by_itself() {
        return Err(MetadataError::Malformed(format!(
            "metadata type {} failed its own checks",
            meta.meta_type()
        )));
    }
    let fee_check = meta.validate_sanity_data(chain, tx)?;
    meta.validate_tx_with_blockchain(tx, chain, shard, beacon)?;
    Ok(fee_check)
}

/// Validate a shard block's metadata transactions and collect their beacon actions.
pub fn build_block_actions(
    txs: &[&dyn Transaction],
    chain: &dyn ChainRetriever,
    shard: &dyn ShardViewRetriever,
    beacon: &dyn BeaconViewRetriever,
) -> BlockActions {
    let mut out = BlockActions::default();
    for tx in txs {
        let Some(meta) = tx.metadata() else { continue };
        let result = validate_metadata(meta, *tx, chain, shard, beacon)
            .and_then(|_| meta.build_req_actions(*tx, shard.shard_id(), shard.shard_height()));
        match result {
            Ok(actions) => {
                debug!("tx {} ({}) produced {} action(s)", tx.hash(), meta.meta_type(), actions.len());
                out.actions.extend(actions);
            }
            Err(error) => {
                let permanent = meta.is_permanent_failure(&error);
                warn!("tx {} ({}) rejected: {}", tx.hash(), meta.meta_type(), error);
                out.rejected.push(Rejection { tx_hash: tx.hash(), error, permanent });
            }
        }
    }
    if !out.actions.is_empty() {
        info!(
            "shard {} height {}: {} portal action(s), {} rejection(s)",
            shard.shard_id(),
            shard.shard_height(),
            out.actions.len(),
            out.rejected.len()
        );
    }
    out
}
