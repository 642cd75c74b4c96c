/// PORTAL BEACON
///
/// Beacon-side accumulation of Portal shard actions:
/// - per-family instruction processors (build from actions, apply to state)
/// - automatic sweeps: porting expiry, custodian run-away, rate liquidation,
///   pick-more redeem matching, fee rewards
/// - produce / replay / verify of one beacon height over a buffered status store

pub mod errors;
pub mod context;
pub mod processors;
pub mod accumulator;

pub use errors::BeaconError;
pub use context::{split_proportionally, ProcessingContext, RequestStatus, StatusWrite};
pub use processors::{
    processor_for, CustodianProcessor, LiquidationProcessor, PortalInstructionProcessor, PortingProcessor,
    RedeemProcessor, RewardProcessor,
};
pub use accumulator::{BeaconAccumulator, HeightOutcome};
