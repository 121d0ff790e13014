//! Typed `data` payloads for the server→client push vocabulary.
//!
//! Field names are camelCase on the wire. Every field carries a serde
//! default, so a push carrying only part of a record still decodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::identity::Identity;

/// `price_update` payload.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceUpdate {
    /// SOL price in USD.
    #[serde(default)]
    pub sol: f64,
    /// CVT price in USD.
    #[serde(default)]
    pub cvt: f64,
}

/// `staking_update` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingUpdate {
    /// Currently staked amount.
    #[serde(default)]
    pub staked_amount: f64,
    /// Unclaimed rewards.
    #[serde(default)]
    pub rewards: f64,
    /// When the latest stake was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staking_date: Option<DateTime<Utc>>,
    /// Rewards claimed to date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_claimed: Option<f64>,
}

/// A single presale purchase.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Purchase {
    /// Tokens bought.
    #[serde(default)]
    pub amount: f64,
    /// Price paid per token.
    #[serde(default)]
    pub price: f64,
    /// Purchase time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
}

/// `presale_update` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresaleUpdate {
    /// Total tokens bought.
    #[serde(default)]
    pub tokens_bought: f64,
    /// Total amount invested.
    #[serde(default)]
    pub total_invested: f64,
    /// Purchase history.
    #[serde(default)]
    pub purchases: Vec<Purchase>,
}

/// `airdrop_update` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirdropUpdate {
    /// Whether the airdrop has been claimed.
    #[serde(default)]
    pub claimed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub amount: f64,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorNotice {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

/// Wallet balances carried in the `user_data` snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub sol: f64,
    #[serde(default)]
    pub usdt: f64,
    #[serde(default)]
    pub cvt: f64,
}

/// `user_data` payload: the initial state pushed after authentication.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    /// The wallet the snapshot belongs to.
    #[serde(default)]
    pub wallet_address: Identity,
    #[serde(default)]
    pub balance: Balance,
    #[serde(default)]
    pub staking: StakingUpdate,
    #[serde(default)]
    pub presale: PresaleUpdate,
    #[serde(default)]
    pub airdrop: AirdropUpdate,
}
