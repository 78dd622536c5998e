//! `StateSnapshot`: the read-only view consumed by the operator UI
//! (spec §6 "State snapshot consumed by UI"). Built from `EngineState` on
//! demand; never persisted itself.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use layline_core::{BetRecord, Country, EngineConfig, SessionSummary, TrackerState};
use layline_exchange::ClearedBet;

use crate::state::EngineState;

const RECENT_BETS_LIMIT: usize = 200;
const ERRORS_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Running,
    Stopped,
    AuthFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextRace {
    pub market_id: String,
    pub venue: String,
    pub market_name: String,
    pub race_time: DateTime<Utc>,
    pub minutes_to_off: Decimal,
    pub state: TrackerState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSummary {
    pub market_id: String,
    pub venue: String,
    pub market_name: String,
    pub race_time: DateTime<Utc>,
    pub state: TrackerState,
    pub minutes_to_off: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: EngineStatus,
    pub dry_run: bool,
    pub date: NaiveDate,
    pub session_id: Option<Uuid>,
    pub session_start: Option<DateTime<Utc>>,
    pub countries: BTreeSet<Country>,
    pub config: EngineConfig,
    pub balance: Option<Decimal>,
    pub balance_age_seconds: Option<i64>,
    pub summary: SessionSummary,
    pub next_race: Option<NextRace>,
    pub recent_bets: Vec<BetRecord>,
    pub recent_results: Vec<ClearedBet>,
    pub errors: Vec<String>,
    pub trackers_summary: Vec<TrackerSummary>,
}

/// Builds the UI-facing snapshot from current engine state, at `now`.
#[must_use]
pub fn build(state: &EngineState, now: DateTime<Utc>) -> StateSnapshot {
    let status = if state.auth_failed {
        EngineStatus::AuthFailed
    } else if state.running {
        EngineStatus::Running
    } else {
        EngineStatus::Stopped
    };

    let mut trackers_summary: Vec<TrackerSummary> = state
        .document
        .trackers
        .values()
        .map(|tracker| TrackerSummary {
            market_id: tracker.market_id.clone(),
            venue: tracker.market.venue.clone(),
            market_name: tracker.market.market_name.clone(),
            race_time: tracker.market.race_time,
            state: tracker.state,
            minutes_to_off: tracker.minutes_to_off(now),
        })
        .collect();
    trackers_summary.sort_by(|a, b| a.race_time.cmp(&b.race_time));

    let next_race = trackers_summary
        .iter()
        .find(|t| matches!(t.state, TrackerState::InWindow | TrackerState::Monitoring | TrackerState::Discovered))
        .map(|t| NextRace {
            market_id: t.market_id.clone(),
            venue: t.venue.clone(),
            market_name: t.market_name.clone(),
            race_time: t.race_time,
            minutes_to_off: t.minutes_to_off,
            state: t.state,
        });

    let mut recent_bets: Vec<BetRecord> = state.document.bets_today.clone();
    recent_bets.sort_by(|a, b| b.placed_at.cmp(&a.placed_at));
    recent_bets.truncate(RECENT_BETS_LIMIT);

    let recent_results: Vec<ClearedBet> = state.recent_results.iter().cloned().collect();

    let mut errors: Vec<String> = state.errors.iter().cloned().collect();
    if errors.len() > ERRORS_LIMIT {
        let excess = errors.len() - ERRORS_LIMIT;
        errors.drain(0..excess);
    }

    StateSnapshot {
        status,
        dry_run: state.document.config.engine.dry_run,
        date: state.document.date,
        session_id: state.document.session.as_ref().map(|s| s.session_id),
        session_start: state.document.session.as_ref().map(|s| s.start_time),
        countries: state.document.config.engine.countries.clone(),
        config: state.document.config.engine.clone(),
        balance: state.balance,
        balance_age_seconds: state.balance_fetched_at.map(|fetched| (now - fetched).num_seconds()),
        summary: state
            .document
            .session
            .as_ref()
            .map(|s| s.summary.clone())
            .unwrap_or_default(),
        next_race,
        recent_bets,
        recent_results,
        errors,
        trackers_summary,
    }
}
