/// PORTAL CUSTODY
///
/// Collateralized cross-chain custody for a sharded chain:
/// - `state`: custodians, porting / redeem records, matching, liquidation, status store
/// - `metadata`: transaction metadata, shard-side validation, minting verification
/// - `beacon`: per-height instruction building, replay and verification

pub use portal_beacon as beacon;
pub use portal_metadata as metadata;
pub use portal_state as state;

pub use portal_beacon::{BeaconAccumulator, BeaconError, HeightOutcome};
pub use portal_metadata::{
    build_block_actions, mint_claim, parse_metadata, verify_block, BeaconInstruction, InstStatus, Metadata,
    MetadataError, MetaType, ShardAction,
};
pub use portal_state::{MemoryStatusStore, PortalParams, PortalState, StateError};
