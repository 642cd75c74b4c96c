// Shard actions and beacon instructions
//
// SAFETY INVARIANTS:
// 1. Shard action wire form: [meta_type, base64(json(ActionEnvelope))]
// 2. Beacon instruction wire form: [meta_type, shard_id, status, base64(json(content))]
// 3. Every content embeds the originating TxReqID and ShardID
// 4. Instructions are immutable after emission; equality is byte equality of the wire form

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use portal_state::Hash;

use crate::envelope::{Metadata, MetadataValidator};
use crate::errors::MetadataError;
use crate::meta_type::MetaType;

/// A request accepted by a shard, travelling to the beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    #[serde(rename = "Meta")]
    pub meta: Metadata,
    #[serde(rename = "TxReqID")]
    pub tx_req_id: Hash,
    #[serde(rename = "ShardID")]
    pub shard_id: u8,
    #[serde(rename = "ShardHeight")]
    pub shard_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct ShardAction {
    pub meta_type: MetaType,
    pub content: String,
}

impl ShardAction {
    pub fn build(
        meta: &Metadata,
        tx_req_id: Hash,
        shard_id: u8,
        shard_height: u64,
    ) -> Result<Self, MetadataError> {
        let envelope = ActionEnvelope { meta: meta.clone(), tx_req_id, shard_id, shard_height };
        let json =
            serde_json::to_vec(&envelope).map_err(|e| MetadataError::Malformed(e.to_string()))?;
        Ok(ShardAction { meta_type: meta.meta_type(), content: STANDARD.encode(json) })
    }

    pub fn decode(&self) -> Result<ActionEnvelope, MetadataError> {
        let raw = STANDARD
            .decode(&self.content)
            .map_err(|e| MetadataError::Malformed(format!("action content not base64: {}", e)))?;
        let envelope: ActionEnvelope = serde_json::from_slice(&raw)
            .map_err(|e| MetadataError::Malformed(format!("action content: {}", e)))?;
        if envelope.meta.meta_type() != self.meta_type {
            return Err(MetadataError::Malformed(format!(
                "action tagged {} carries metadata {}",
                self.meta_type,
                envelope.meta.meta_type()
            )));
        }
        Ok(envelope)
    }

    pub fn to_strings(&self) -> Vec<String> {
        vec![self.meta_type.code().to_string(), self.content.clone()]
    }
}

fn parse_meta_type(s: &str) -> Result<MetaType, String> {
    let code: i32 = s.parse().map_err(|_| format!("meta type {:?} is not a number", s))?;
    MetaType::from_code(code).ok_or_else(|| format!("unknown meta type {}", code))
}

impl From<ShardAction> for Vec<String> {
    fn from(a: ShardAction) -> Self {
        vec![a.meta_type.code().to_string(), a.content]
    }
}

impl TryFrom<Vec<String>> for ShardAction {
    type Error = String;

    fn try_from(parts: Vec<String>) -> Result<Self, Self::Error> {
        let [meta_type, content]: [String; 2] = parts
            .try_into()
            .map_err(|p: Vec<String>| format!("shard action has {} parts, expected 2", p.len()))?;
        Ok(ShardAction { meta_type: parse_meta_type(&meta_type)?, content })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstStatus {
    Accepted,
    Rejected,
    Refund,
    Expired,
    Liquidated,
}

impl InstStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstStatus::Accepted => "accepted",
            InstStatus::Rejected => "rejected",
            InstStatus::Refund => "refund",
            InstStatus::Expired => "expired",
            InstStatus::Liquidated => "liquidated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(InstStatus::Accepted),
            "rejected" => Some(InstStatus::Rejected),
            "refund" => Some(InstStatus::Refund),
            "expired" => Some(InstStatus::Expired),
            "liquidated" => Some(InstStatus::Liquidated),
            _ => None,
        }
    }
}

impl fmt::Display for InstStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Beacon decision for one action (or one automatic sweep).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct BeaconInstruction {
    pub meta_type: MetaType,
    pub shard_id: u8,
    pub status: InstStatus,
    pub content: String,
}

impl BeaconInstruction {
    pub fn new<T: Serialize>(
        meta_type: MetaType,
        shard_id: u8,
        status: InstStatus,
        content: &T,
    ) -> Result<Self, MetadataError> {
        let json = serde_json::to_vec(content)
            .map_err(|e| MetadataError::MalformedInstruction(e.to_string()))?;
        Ok(BeaconInstruction { meta_type, shard_id, status, content: STANDARD.encode(json) })
    }

    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, MetadataError> {
        let raw = STANDARD.decode(&self.content).map_err(|e| {
            MetadataError::MalformedInstruction(format!("{} content not base64: {}", self.meta_type, e))
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            MetadataError::MalformedInstruction(format!("{} content: {}", self.meta_type, e))
        })
    }

    pub fn to_strings(&self) -> Vec<String> {
        Vec::from(self.clone())
    }
}

impl From<BeaconInstruction> for Vec<String> {
    fn from(i: BeaconInstruction) -> Self {
        vec![
            i.meta_type.code().to_string(),
            i.shard_id.to_string(),
            i.status.as_str().to_string(),
            i.content,
        ]
    }
}

impl TryFrom<Vec<String>> for BeaconInstruction {
    type Error = String;

    fn try_from(parts: Vec<String>) -> Result<Self, Self::Error> {
        let [meta_type, shard_id, status, content]: [String; 4] = parts
            .try_into()
            .map_err(|p: Vec<String>| format!("instruction has {} parts, expected 4", p.len()))?;
        Ok(BeaconInstruction {
            meta_type: parse_meta_type(&meta_type)?,
            shard_id: shard_id
                .parse()
                .map_err(|_| format!("shard id {:?} is not a number", shard_id))?,
            status: InstStatus::parse(&status).ok_or_else(|| format!("unknown status {:?}", status))?,
            content,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_instruction_wire_form() {
        let inst = BeaconInstruction::new(
            MetaType::RequestPorting,
            3,
            InstStatus::Rejected,
            &json!({"UniqueRegisterID": "p1", "ShardID": 3}),
        )
        .unwrap();
        let parts = inst.to_strings();
        assert_eq!(parts[0], "101");
        assert_eq!(parts[1], "3");
        assert_eq!(parts[2], "rejected");
        let json = serde_json::to_string(&inst).unwrap();
        let back: BeaconInstruction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, inst);
        let content: serde_json::Value = back.decode_content().unwrap();
        assert_eq!(content["UniqueRegisterID"], "p1");
    }

    #[test]
    fn test_malformed_instruction_parts() {
        let short: Result<BeaconInstruction, _> =
            serde_json::from_str(r#"["101","3","accepted"]"#);
        assert!(short.is_err());
        let bad_status: Result<BeaconInstruction, _> =
            serde_json::from_str(r#"["101","3","maybe","e30="]"#);
        assert!(bad_status.is_err());
        let bad_type: Result<ShardAction, _> = serde_json::from_str(r#"["1","e30="]"#);
        assert!(bad_type.is_err());
    }

    #[test]
    fn test_shard_action_decode_checks_tag() {
        let meta = Metadata::RedeemRequest(crate::redeem::RedeemRequest::new(
            "r1",
            portal_state::TokenId::from("btc"),
            10,
            portal_state::PaymentAddress::new("user"),
            "user-remote",
            1,
        ));
        let action = ShardAction::build(&meta, Hash::compute(b"req"), 2, 7).unwrap();
        assert_eq!(action.meta_type, MetaType::RedeemRequest);
        assert_eq!(action.decode().unwrap().meta, meta);

        let retagged = ShardAction { meta_type: MetaType::RequestPorting, content: action.content };
        assert!(matches!(retagged.decode(), Err(MetadataError::Malformed(_))));
    }

    #[test]
    fn test_undecodable_content_is_consensus_internal() {
        let inst = BeaconInstruction {
            meta_type: MetaType::PortalReward,
            shard_id: 0,
            status: InstStatus::Accepted,
            content: "%%%".into(),
        };
        let err = inst.decode_content::<serde_json::Value>().unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::ConsensusInternal);
    }
}
