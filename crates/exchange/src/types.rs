//! Wire-adjacent response types returned by the exchange client. These are
//! the engine's view of the exchange's JSON-RPC surface (spec §4.1/§6);
//! `Market`/`Runner` themselves live in `layline_core::domain`.

use chrono::{DateTime, Utc};
use layline_core::domain::{Market, Runner};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Best lay + best back + last traded per runner (`get_book`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBook {
    pub market_id: String,
    /// Re-sorted by `sort_priority` ascending; authoritative over any
    /// previously known runner set for this market.
    pub runners: Vec<Runner>,
    pub in_play: bool,
    pub status: layline_core::domain::MarketStatus,
}

impl MarketBook {
    /// Merges this book into `market`, replacing runners/status/in_play.
    #[must_use]
    pub fn apply_to(&self, mut market: Market) -> Market {
        market.runners = self.runners.clone();
        market.in_play = self.in_play;
        market.status = self.status;
        market
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerDepth {
    pub selection_id: i64,
    pub lay_levels: Vec<PriceLevel>,
    pub back_levels: Vec<PriceLevel>,
}

/// Same as `MarketBook` plus up to `depth` lay/back levels (`get_book_full`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBookFull {
    pub market_id: String,
    pub runners: Vec<RunnerDepth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderAckStatus {
    Success,
    Failure,
}

/// Response to `submit_lay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub status: OrderAckStatus,
    pub bet_id: Option<String>,
    pub size_matched: Option<Decimal>,
    pub avg_price_matched: Option<Decimal>,
    pub error_code: Option<String>,
}

/// A settled bet, as returned by `list_cleared`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearedBet {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: i64,
    pub won: bool,
    pub size_matched: Decimal,
    pub avg_price_matched: Decimal,
    pub commission: Decimal,
    pub settled_at: DateTime<Utc>,
}
