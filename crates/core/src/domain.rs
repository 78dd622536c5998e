//! Closed, versioned data definitions for markets, runners, trackers, bets
//! and sessions (spec §3). Replaces the open key/value record style of the
//! source system with product types and tagged enums.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Country;

const MAX_SNAPSHOTS: usize = 20;
const SNAPSHOT_MIN_GAP_MINUTES: i64 = 5;
const SNAPSHOT_MIN_DROP_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Suspended,
    Closed,
}

/// One runner (selection) within a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub selection_id: i64,
    pub name: String,
    pub sort_priority: u32,
    pub best_available_to_lay: Option<Decimal>,
    pub best_available_to_back: Option<Decimal>,
}

impl Runner {
    #[must_use]
    pub fn is_priced(&self) -> bool {
        self.best_available_to_lay.is_some()
    }
}

/// A horse-racing WIN market, as last fetched from the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub market_id: String,
    pub venue: String,
    pub country: Country,
    pub race_time: DateTime<Utc>,
    pub market_name: String,
    pub status: MarketStatus,
    pub in_play: bool,
    /// Ordered by `sort_priority` ascending; priority 1 is the favourite.
    pub runners: Vec<Runner>,
}

impl Market {
    #[must_use]
    pub fn minutes_to_off(&self, now: DateTime<Utc>) -> Decimal {
        let seconds = (self.race_time - now).num_seconds();
        Decimal::from(seconds) / Decimal::from(60)
    }

    #[must_use]
    pub fn favourite(&self) -> Option<&Runner> {
        self.runners.iter().find(|r| r.sort_priority == 1)
    }

    #[must_use]
    pub fn second_favourite(&self) -> Option<&Runner> {
        self.runners.iter().find(|r| r.sort_priority == 2)
    }
}

/// One immutable odds capture for a market, taken outside the processing
/// window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub minutes_to_off: Decimal,
    pub runners: Vec<Runner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    Discovered,
    Monitoring,
    InWindow,
    Processed,
    Expired,
    Skipped,
}

/// Observable effect of advancing a tracker by one tick; the scheduler acts
/// on this rather than re-deriving it from before/after state comparisons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerAction {
    Unchanged,
    PromotedToMonitoring,
    PromotedToInWindow,
    Expired,
    Skipped { reason: &'static str },
}

/// Per-market state machine (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketTracker {
    pub market_id: String,
    pub state: TrackerState,
    pub market: Market,
    pub snapshots: VecDeque<OddsSnapshot>,
    pub last_snapshot_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl MarketTracker {
    #[must_use]
    pub fn new(market: Market) -> Self {
        Self {
            market_id: market.market_id.clone(),
            state: TrackerState::Discovered,
            market,
            snapshots: VecDeque::new(),
            last_snapshot_at: None,
            reason: None,
        }
    }

    /// Replaces the last-seen book; the new runner list is authoritative.
    pub fn update_book(&mut self, market: Market) {
        self.market = market;
    }

    #[must_use]
    pub fn minutes_to_off(&self, now: DateTime<Utc>) -> Decimal {
        self.market.minutes_to_off(now)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TrackerState::Processed | TrackerState::Expired | TrackerState::Skipped
        )
    }

    /// Whether a new `OddsSnapshot` is due, per the 5-minute / 5-minutes-to-off
    /// cadence rule. Always due if no snapshot has been taken yet.
    #[must_use]
    pub fn due_for_snapshot(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.snapshots.back() else {
            return true;
        };
        let elapsed_minutes = (now - last.captured_at).num_minutes();
        if elapsed_minutes >= SNAPSHOT_MIN_GAP_MINUTES {
            return true;
        }
        let current = self.minutes_to_off(now);
        (last.minutes_to_off - current) >= Decimal::from(SNAPSHOT_MIN_DROP_MINUTES)
    }

    /// Appends a new snapshot, dropping the oldest on overflow (invariant 6:
    /// bounded at 20, strictly increasing by `captured_at`).
    pub fn record_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = OddsSnapshot {
            captured_at: now,
            minutes_to_off: self.minutes_to_off(now),
            runners: self.market.runners.clone(),
        };
        if self.snapshots.len() >= MAX_SNAPSHOTS {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        self.last_snapshot_at = Some(now);
    }

    /// Advances the state machine for one scheduler tick. Does not itself run
    /// the rule evaluator or mark PROCESSED — those are driven by the
    /// scheduler once it dispatches the IN_WINDOW cohort through C2/C5.
    pub fn tick(&mut self, now: DateTime<Utc>, window_minutes: u32) -> TrackerAction {
        if self.is_terminal() {
            return TrackerAction::Unchanged;
        }

        if self.market.in_play {
            self.state = TrackerState::Skipped;
            self.reason = Some("in_play".to_string());
            return TrackerAction::Skipped { reason: "in_play" };
        }

        let minutes_to_off = self.minutes_to_off(now);
        if minutes_to_off <= Decimal::ZERO {
            self.state = TrackerState::Expired;
            return TrackerAction::Expired;
        }

        let window = Decimal::from(window_minutes);
        match self.state {
            TrackerState::Discovered => {
                if minutes_to_off <= window {
                    self.state = TrackerState::InWindow;
                    TrackerAction::PromotedToInWindow
                } else {
                    self.state = TrackerState::Monitoring;
                    TrackerAction::PromotedToMonitoring
                }
            }
            TrackerState::Monitoring => {
                if minutes_to_off <= window {
                    self.state = TrackerState::InWindow;
                    TrackerAction::PromotedToInWindow
                } else {
                    TrackerAction::Unchanged
                }
            }
            _ => TrackerAction::Unchanged,
        }
    }

    /// Skips the tracker if the favourite's lay price breaches
    /// `max_lay_odds` at first book fetch. Returns `true` if the tracker was
    /// skipped.
    pub fn skip_if_overpriced(&mut self, max_lay_odds: Decimal) -> bool {
        if self.is_terminal() || self.state == TrackerState::InWindow {
            return false;
        }
        let Some(fav) = self.market.favourite() else {
            return false;
        };
        let breaches = match fav.best_available_to_lay {
            None => true,
            Some(p) => p > max_lay_odds,
        };
        if breaches {
            self.state = TrackerState::Skipped;
            self.reason = Some("max_odds_exceeded".to_string());
            return true;
        }
        false
    }

    /// Marks the tracker PROCESSED: terminal for the trading day, preventing
    /// re-bet on re-scan (invariant 2).
    pub fn mark_processed(&mut self) {
        self.state = TrackerState::Processed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleId {
    Rule1,
    Rule2,
    Rule3A,
    Rule3B,
}

/// One instruction to lay a selection, emitted by the rule evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetInstruction {
    pub market_id: String,
    pub selection_id: i64,
    pub runner_name: String,
    pub price: Decimal,
    pub size: Decimal,
    pub rule_id: RuleId,
}

impl BetInstruction {
    #[must_use]
    pub fn liability(&self) -> Decimal {
        self.size * (self.price - Decimal::ONE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Discipline {
    Flat,
    Jumps,
    Unknown,
}

impl Discipline {
    /// Classifies a market by name, looking for jump-racing vocabulary
    /// (hurdle/chase/NHF) versus flat-racing vocabulary (hcap/mdn/stakes).
    #[must_use]
    pub fn from_market_name(market_name: &str) -> Self {
        let lower = market_name.to_lowercase();
        const JUMPS_MARKERS: [&str; 4] = ["hurdle", "chase", "nhf", "bumper"];
        const FLAT_MARKERS: [&str; 4] = ["hcap", "mdn", "stks", "nursery"];
        if JUMPS_MARKERS.iter().any(|m| lower.contains(m)) {
            Discipline::Jumps
        } else if FLAT_MARKERS.iter().any(|m| lower.contains(m)) {
            Discipline::Flat
        } else {
            Discipline::Unknown
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeStatus {
    Success,
    Failure,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    pub status: ExchangeStatus,
    pub bet_id: Option<String>,
    pub size_matched: Option<Decimal>,
    pub avg_price_matched: Option<Decimal>,
    pub error: Option<String>,
}

impl ExchangeResponse {
    #[must_use]
    pub fn dry_run() -> Self {
        Self {
            status: ExchangeStatus::DryRun,
            bet_id: None,
            size_matched: None,
            avg_price_matched: None,
            error: None,
        }
    }
}

/// Append-only record of one bet attempt. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetRecord {
    pub id: Uuid,
    pub instruction: BetInstruction,
    pub placed_at: DateTime<Utc>,
    pub venue: String,
    pub discipline: Discipline,
    pub race_time: DateTime<Utc>,
    pub dry_run: bool,
    pub exchange_response: ExchangeResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionMode {
    Live,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Stopped,
    Crashed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub bets: u64,
    pub stake: Decimal,
    pub liability: Decimal,
    pub markets_processed: u64,
    pub spread_rejections: u64,
    pub jofs_splits: u64,
    pub per_rule_tallies: std::collections::BTreeMap<String, u64>,
}

/// One trading-day session. At most one active at a time (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub stop_time: Option<DateTime<Utc>>,
    pub mode: SessionMode,
    pub countries: std::collections::BTreeSet<Country>,
    pub status: SessionStatus,
    pub summary: SessionSummary,
    pub bets: Vec<Uuid>,
}

impl Session {
    #[must_use]
    pub fn new(
        date: NaiveDate,
        start_time: DateTime<Utc>,
        mode: SessionMode,
        countries: std::collections::BTreeSet<Country>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            date,
            start_time,
            stop_time: None,
            mode,
            countries,
            status: SessionStatus::Running,
            summary: SessionSummary::default(),
            bets: Vec::new(),
        }
    }
}

/// Per-trading-day dedup sets (spec §3). Cleared atomically on rollover and
/// on explicit reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupSets {
    pub processed_runners: HashSet<(String, DateTime<Utc>)>,
    pub processed_selections: HashSet<(i64, String)>,
}

impl DedupSets {
    #[must_use]
    pub fn contains(&self, runner_key: &(String, DateTime<Utc>), selection_key: &(i64, String)) -> bool {
        self.processed_runners.contains(runner_key) || self.processed_selections.contains(selection_key)
    }

    pub fn insert(&mut self, runner_key: (String, DateTime<Utc>), selection_key: (i64, String)) {
        self.processed_runners.insert(runner_key);
        self.processed_selections.insert(selection_key);
    }

    pub fn remove(&mut self, runner_key: &(String, DateTime<Utc>), selection_key: &(i64, String)) {
        self.processed_runners.remove(runner_key);
        self.processed_selections.remove(selection_key);
    }

    pub fn clear(&mut self) {
        self.processed_runners.clear();
        self.processed_selections.clear();
    }
}

/// One rule-evaluator run against one market, kept for the `evaluations_today`
/// ring regardless of whether it produced a bet (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub market_id: String,
    pub evaluated_at: DateTime<Utc>,
    pub rule_id: Option<RuleId>,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub instruction_count: usize,
}
