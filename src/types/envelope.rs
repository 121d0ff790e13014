//! The `{type, data}` envelope exchanged in both directions.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Message type vocabulary
// ---------------------------------------------------------------------------

/// The fixed vocabulary of envelope `type` tags.
///
/// Tags outside the vocabulary decode into [`MessageType::Unknown`] and are
/// re-encoded unchanged, so newer servers can add types without breaking
/// older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// C→S liveness probe.
    Ping,
    /// S→C liveness reply.
    Pong,
    /// S→C initial state snapshot after authentication.
    UserData,
    /// S→C periodic price push.
    PriceUpdate,
    /// S→C targeted push after a stake mutation.
    StakingUpdate,
    /// S→C targeted push after a presale purchase.
    PresaleUpdate,
    /// S→C targeted push after an airdrop claim.
    AirdropUpdate,
    /// S→C non-fatal server-side error notice.
    Error,
    /// C→S opt-in to price pushes.
    SubscribePrice,
    /// C→S opt-in to staking pushes.
    SubscribeStaking,
    /// Any tag not listed above.
    Unknown(String),
}

impl MessageType {
    /// The wire representation of this tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::UserData => "user_data",
            Self::PriceUpdate => "price_update",
            Self::StakingUpdate => "staking_update",
            Self::PresaleUpdate => "presale_update",
            Self::AirdropUpdate => "airdrop_update",
            Self::Error => "error",
            Self::SubscribePrice => "subscribe_price",
            Self::SubscribeStaking => "subscribe_staking",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for MessageType {
    fn from(tag: &str) -> Self {
        match tag {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "user_data" => Self::UserData,
            "price_update" => Self::PriceUpdate,
            "staking_update" => Self::StakingUpdate,
            "presale_update" => Self::PresaleUpdate,
            "airdrop_update" => Self::AirdropUpdate,
            "error" => Self::Error,
            "subscribe_price" => Self::SubscribePrice,
            "subscribe_staking" => Self::SubscribeStaking,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match Self::from(tag.as_str()) {
            Self::Unknown(_) => Self::Unknown(tag),
            known => known,
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Unknown(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The unit of wire traffic: `{"type": "...", "data": ...}`.
///
/// `data` is `null` when absent and is omitted on encode in that case, so a
/// ping goes out as `{"type":"ping"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message tag.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Arbitrary payload.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Create an envelope from a tag and raw JSON payload.
    pub fn new(kind: impl Into<MessageType>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Create an envelope whose payload is a serialized `T`.
    pub fn from_payload<T: Serialize>(kind: impl Into<MessageType>, payload: &T) -> Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// `{"type":"ping"}`.
    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Null)
    }

    /// `{"type":"pong"}`.
    pub fn pong() -> Self {
        Self::new(MessageType::Pong, Value::Null)
    }

    /// `{"type":"error","data":{"message":...}}`.
    pub fn error(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(MessageType::Error, serde_json::json!({ "message": message }))
    }

    /// Decode an inbound text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ping_omits_data() {
        assert_eq!(Envelope::ping().encode().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn decodes_missing_data_as_null() {
        let env = Envelope::decode(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Pong);
        assert!(env.data.is_null());
    }

    #[test]
    fn unknown_type_survives_re_encoding() {
        let env = Envelope::decode(r#"{"type":"leaderboard_update","data":[1,2]}"#).unwrap();
        assert_eq!(env.kind, MessageType::Unknown("leaderboard_update".into()));
        let again: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(again, json!({"type": "leaderboard_update", "data": [1, 2]}));
    }

    #[test]
    fn rejects_frames_without_type() {
        assert!(Envelope::decode(r#"{"data":{}}"#).is_err());
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"type":42}"#).is_err());
    }

    #[test]
    fn error_envelope_carries_message() {
        let env = Envelope::error("stake failed");
        assert_eq!(env.data, json!({"message": "stake failed"}));
    }
}
