// Minting verification
//
// SAFETY INVARIANTS:
// 1. Every minting transaction in a shard block is backed by exactly one beacon instruction
// 2. An instruction index is consumed at most once per block; a second consume fails closed
// 3. Instructions stay in the arena for the whole block; consumption only flips a marker
// 4. The first failing minting transaction fails the whole block

use log::{debug, warn};

use portal_state::{Hash, PaymentAddress, PortalParams, TokenId};

use crate::action::{BeaconInstruction, InstStatus};
use crate::content::{
    CustodianDepositContent, CustodianTopupContent, CustodianWithdrawContent, ExpiredPortingContent,
    LiquidateCustodianContent, PickMoreCustodianContent, PortingRequestContent, RedeemFromPoolContent,
    RedeemRequestContent, RequestPTokenContent, WithdrawRewardContent,
};
use crate::envelope::Metadata;
use crate::errors::MetadataError;
use crate::meta_type::MetaType;
use crate::responses::ResponseMeta;
use crate::transaction::{Transaction, TxType};

/// Beacon instructions of one block with their consumption markers.
#[derive(Debug, Clone)]
pub struct InstructionArena {
    instructions: Vec<BeaconInstruction>,
    used: Vec<bool>,
}

impl InstructionArena {
    pub fn new(instructions: Vec<BeaconInstruction>) -> Self {
        let used = vec![false; instructions.len()];
        InstructionArena { instructions, used }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BeaconInstruction> {
        self.instructions.get(index)
    }

    pub fn is_used(&self, index: usize) -> bool {
        self.used.get(index).copied().unwrap_or(false)
    }

    pub fn consume(&mut self, index: usize) -> Result<&BeaconInstruction, MetadataError> {
        let len = self.instructions.len();
        let marker = self
            .used
            .get_mut(index)
            .ok_or(MetadataError::InstructionOutOfRange { index, len })?;
        if *marker {
            return Err(MetadataError::InstructionConsumed(index));
        }
        *marker = true;
        Ok(&self.instructions[index])
    }

    pub fn unused_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.used.iter().enumerate().filter(|(_, u)| !**u).map(|(i, _)| i)
    }
}

/// What one instruction entitles a shard to mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintClaim {
    pub response_type: MetaType,
    pub request_status: InstStatus,
    pub req_tx_id: Hash,
    pub shard_id: u8,
    pub receiver: PaymentAddress,
    pub amount: u64,
    pub token_id: TokenId,
}

impl MintClaim {
    fn new(
        response_type: MetaType,
        inst: &BeaconInstruction,
        req_tx_id: Hash,
        shard_id: u8,
        receiver: PaymentAddress,
        amount: u64,
        token_id: TokenId,
    ) -> Option<Self> {
        if amount == 0 {
            return None;
        }
        Some(MintClaim {
            response_type,
            request_status: inst.status,
            req_tx_id,
            shard_id,
            receiver,
            amount,
            token_id,
        })
    }

    pub fn matches(&self, response: &ResponseMeta) -> bool {
        response.header.meta_type == self.response_type
            && response.request_status == self.request_status
            && response.req_tx_id == self.req_tx_id
            && response.receiver_address == self.receiver
            && response.amount == self.amount
            && response.token_id == self.token_id
    }
}

/// The mint an instruction authorizes, if any.
pub fn mint_claim(inst: &BeaconInstruction, params: &PortalParams) -> Result<Option<MintClaim>, MetadataError> {
    let prv = || params.prv_token_id.clone();
    let claim = match (inst.meta_type, inst.status) {
        (MetaType::CustodianDeposit, InstStatus::Refund) => {
            let c: CustodianDepositContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::CustodianDepositResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.incognito_address,
                c.deposit_amount,
                prv(),
            )
        }
        (MetaType::RequestPorting, InstStatus::Rejected) => {
            let c: PortingRequestContent = inst.decode_content()?;
            MintClaim::new(MetaType::PortingResponse, inst, c.tx_req_id, c.shard_id, c.porter_address, c.porting_fee, prv())
        }
        (MetaType::ExpiredWaitingPortingReq, InstStatus::Expired) => {
            let c: ExpiredPortingContent = inst.decode_content()?;
            MintClaim::new(MetaType::PortingResponse, inst, c.tx_req_id, c.shard_id, c.porter_address, c.porting_fee, prv())
        }
        (MetaType::UserRequestPToken, InstStatus::Accepted) => {
            let c: RequestPTokenContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::UserRequestPTokenResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.incognito_address,
                c.porting_amount,
                c.token_id,
            )
        }
        (MetaType::RedeemRequest, InstStatus::Rejected | InstStatus::Refund) => {
            let c: RedeemRequestContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::RedeemRequestResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.redeemer_incognito_address,
                c.redeem_amount,
                c.token_id,
            )
        }
        (MetaType::PickMoreCustodianForRedeem, InstStatus::Rejected) => {
            let c: PickMoreCustodianContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::RedeemRequestResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.redeemer_incognito_address,
                c.redeem_amount,
                c.token_id,
            )
        }
        (MetaType::CustodianWithdrawRequest, InstStatus::Accepted) => {
            let c: CustodianWithdrawContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::CustodianWithdrawResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.custodian_address,
                c.amount,
                prv(),
            )
        }
        (MetaType::LiquidateCustodian, InstStatus::Liquidated) => {
            let c: LiquidateCustodianContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::LiquidateCustodianResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.redeemer_incognito_address,
                c.liquidated_collateral_amount,
                prv(),
            )
        }
        (MetaType::RequestWithdrawReward, InstStatus::Accepted) => {
            let c: WithdrawRewardContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::RequestWithdrawRewardResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.custodian_address,
                c.reward_amount,
                prv(),
            )
        }
        (MetaType::RedeemFromLiquidationPool, InstStatus::Accepted) => {
            let c: RedeemFromPoolContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::RedeemFromLiquidationPoolResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.redeemer_incognito_address,
                c.minted_collateral_amount,
                prv(),
            )
        }
        (MetaType::RedeemFromLiquidationPool, InstStatus::Rejected) => {
            let c: RedeemFromPoolContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::RedeemFromLiquidationPoolResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.redeemer_incognito_address,
                c.redeem_amount,
                c.token_id,
            )
        }
        (MetaType::CustodianTopup, InstStatus::Rejected) => {
            let c: CustodianTopupContent = inst.decode_content()?;
            MintClaim::new(
                MetaType::CustodianTopupResponse,
                inst,
                c.tx_req_id,
                c.shard_id,
                c.incognito_address,
                c.deposit_amount,
                prv(),
            )
        }
        _ => None,
    };
    Ok(claim)
}

/// Find and consume the instruction backing one minting transaction.
///
/// Returns the consumed index.
pub fn verify_miner_created_tx(
    tx: &dyn Transaction,
    response: &ResponseMeta,
    arena: &mut InstructionArena,
    params: &PortalParams,
    shard_id: u8,
) -> Result<usize, MetadataError> {
    let coin = tx
        .minted_coin()
        .ok_or_else(|| MetadataError::TxShape("response transaction mints nothing".into()))?;
    if coin.receiver != response.receiver_address
        || coin.amount != response.amount
        || coin.token_id != response.token_id
    {
        return Err(MetadataError::BurnMismatch(format!(
            "minted {:?} does not match response metadata",
            coin
        )));
    }

    let mut found = None;
    for index in arena.unused_indices() {
        let Some(inst) = arena.get(index) else { continue };
        let Some(claim) = mint_claim(inst, params)? else { continue };
        if claim.shard_id == shard_id && claim.matches(response) {
            found = Some(index);
            break;
        }
    }
    let index = found.ok_or_else(|| MetadataError::NoMatchingInstruction(tx.hash().as_hex()))?;
    arena.consume(index)?;
    debug!(
        "mint {} backed by instruction {} ({})",
        tx.hash(),
        index,
        response.header.meta_type
    );
    Ok(index)
}

/// Verify every minting transaction of a shard block against its instructions.
pub fn verify_block(
    txs: &[&dyn Transaction],
    arena: &mut InstructionArena,
    params: &PortalParams,
    shard_id: u8,
) -> Result<(), MetadataError> {
    for tx in txs {
        if tx.tx_type() != TxType::Mint {
            continue;
        }
        let response = match tx.metadata() {
            Some(Metadata::Response(r)) => r,
            _ => {
                warn!("minting tx {} carries no response metadata", tx.hash());
                return Err(MetadataError::TxShape(format!(
                    "minting tx {} carries no response metadata",
                    tx.hash()
                )));
            }
        };
        if let Err(e) = verify_miner_created_tx(*tx, response, arena, params, shard_id) {
            warn!("block rejected at minting tx {}: {}", tx.hash(), e);
            return Err(e);
        }
    }
    Ok(())
}
