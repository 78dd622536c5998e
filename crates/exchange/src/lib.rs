//! Exchange client: typed wrapper over the venue's JSON-RPC surface, with
//! rate limiting, retry, and a session/balance cache (spec §4.1).

mod client;
mod error;
mod retry;
mod types;

pub use client::{parse_timestamp, BetfairExchangeClient, ExchangeClient};
pub use error::{ExchangeError, Result};
pub use retry::with_retry;
pub use types::{ClearedBet, MarketBook, MarketBookFull, OrderAck, OrderAckStatus, PriceLevel, RunnerDepth};
