/// PORTAL METADATA
///
/// Typed metadata carried by Portal transactions and its shard-side pipeline:
/// - the closed `Metadata` sum type and its append-only type registry
/// - self, sanity and chain-state validation for every request variant
/// - shard actions and beacon instruction wire formats
/// - minting verification against a block's beacon instructions

pub mod errors;
pub mod meta_type;
pub mod transaction;
pub mod header;
pub mod proof;
pub mod remote_address;
pub mod chain;
pub mod checks;
pub mod envelope;
pub mod action;
pub mod content;

pub mod custodian_deposit;
pub mod custodian_withdraw;
pub mod topup;
pub mod exchange_rates;
pub mod porting;
pub mod redeem;
pub mod reward;
pub mod liquidation_pool;
pub mod responses;

pub mod pipeline;
pub mod minter;

pub use errors::{ErrorKind, MetadataError};
pub use meta_type::MetaType;
pub use transaction::{BurnData, BurnedToken, MintedCoin, PortalTx, Transaction, TxType, TX_VERSION};
pub use header::{sign_hash, MetaHasher, RequestHeader, SignatureVerifiable, SignedRequestHeader};
pub use proof::{
    decode_proof, external_tx_key, porting_memo, redeem_memo, ExternalOutput, ExternalTransfer, ProofEnvelope,
    ProofVerifier, RelayedReceiptVerifier,
};
#[cfg(any(test, feature = "mock"))]
pub use proof::MockProofVerifier;
pub use remote_address::validate_remote_address;
pub use chain::{BeaconViewRetriever, ChainRetriever, ShardViewRetriever, SnapshotView};
pub use envelope::{parse_metadata, parse_metadata_value, FeeCheck, Metadata, MetadataValidator};
pub use action::{ActionEnvelope, BeaconInstruction, InstStatus, ShardAction};

pub use custodian_deposit::CustodianDeposit;
pub use custodian_withdraw::CustodianWithdraw;
pub use topup::CustodianTopup;
pub use exchange_rates::{ExchangeRateEntry, ExchangeRates};
pub use porting::{check_porting_transfer, RequestPorting, UserRequestPToken};
pub use redeem::{check_redeem_transfer, RedeemRequest, ReqMatchingRedeem, RequestUnlockCollateral};
pub use reward::RequestWithdrawReward;
pub use liquidation_pool::RedeemFromLiquidationPool;
pub use responses::ResponseMeta;

pub use pipeline::{build_block_actions, validate_metadata, BlockActions, Rejection};
pub use minter::{mint_claim, verify_block, verify_miner_created_tx, InstructionArena, MintClaim};
