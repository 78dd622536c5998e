//! `EngineState`: the engine singleton's owned state (spec §3 "Ownership").
//!
//! Wraps the persisted `StateDocument` with runtime-only fields that are
//! never written to disk: the error ring shown to the operator UI, the
//! universe-refresh/flush cadence clocks, the balance cache, and the
//! running/auth-failed flags that drive the Control Surface.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use layline_exchange::ClearedBet;
use layline_persistence::StateDocument;

/// Bound on the operator-facing error ring (spec §7: "bounded error ring
/// (oldest dropped at 50)").
const MAX_ERRORS: usize = 50;

/// Bound on the `recent_results` view (spec §6: "recent_results (≤200)").
pub const MAX_RECENT_RESULTS: usize = 200;

pub struct EngineState {
    pub document: StateDocument,
    pub running: bool,
    pub auth_failed: bool,
    pub errors: VecDeque<String>,
    pub last_universe_refresh: Option<DateTime<Utc>>,
    pub last_results_refresh: Option<DateTime<Utc>>,
    pub last_flush: Option<DateTime<Utc>>,
    pub balance: Option<Decimal>,
    pub balance_fetched_at: Option<DateTime<Utc>>,
    pub recent_results: VecDeque<ClearedBet>,
    /// Set whenever a significant event occurs (bet recorded, session
    /// transition, config change); cleared once the next flush happens.
    pub dirty: bool,
}

impl EngineState {
    #[must_use]
    pub fn new(document: StateDocument) -> Self {
        Self {
            document,
            running: false,
            auth_failed: false,
            errors: VecDeque::new(),
            last_universe_refresh: None,
            last_results_refresh: None,
            last_flush: None,
            balance: None,
            balance_fetched_at: None,
            recent_results: VecDeque::new(),
            dirty: true,
        }
    }

    /// Replaces the cleared-bets cache, bounding it at `MAX_RECENT_RESULTS`
    /// (most recent first).
    pub fn set_recent_results(&mut self, mut results: Vec<ClearedBet>) {
        results.sort_by(|a, b| b.settled_at.cmp(&a.settled_at));
        results.truncate(MAX_RECENT_RESULTS);
        self.recent_results = results.into();
    }

    /// Appends an error to the bounded ring and marks the state dirty.
    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "engine error");
        if self.errors.len() >= MAX_ERRORS {
            self.errors.pop_front();
        }
        self.errors.push_back(message);
    }

    #[must_use]
    pub fn credentials_present(&self) -> bool {
        let creds = &self.document.config.exchange;
        !creds.app_key.is_empty() && !creds.username.is_empty() && !creds.password.is_empty()
    }
}
