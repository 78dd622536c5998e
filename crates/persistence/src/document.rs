//! `StateDocument`: the single JSON-serializable snapshot of engine state,
//! written to both the hot and durable tiers (spec §4.6).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, NaiveDate, Utc};
use layline_core::{BetRecord, EvaluationRecord, MarketTracker, Session, TopLevelConfig};
use serde::{Deserialize, Serialize};

/// Bound on `evaluations_today` (spec §4.6: "bounded ring, 500 entries").
pub const MAX_EVALUATIONS: usize = 500;

/// Bound on `sessions_index`: how many completed sessions are retained.
pub const MAX_SESSIONS_INDEX: usize = 90;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub config: TopLevelConfig,
    pub date: NaiveDate,
    pub session: Option<Session>,
    pub sessions_index: VecDeque<Session>,
    pub bets_today: Vec<BetRecord>,
    pub evaluations_today: VecDeque<EvaluationRecord>,
    pub trackers: HashMap<String, MarketTracker>,
    pub dedup_runners: HashSet<(String, DateTime<Utc>)>,
    pub dedup_selections: HashSet<(i64, String)>,
    pub reports_index: Vec<String>,
    pub api_keys: BTreeMap<String, String>,
    pub saved_at: DateTime<Utc>,
}

impl StateDocument {
    #[must_use]
    pub fn new(config: TopLevelConfig, date: NaiveDate, saved_at: DateTime<Utc>) -> Self {
        Self {
            config,
            date,
            session: None,
            sessions_index: VecDeque::new(),
            bets_today: Vec::new(),
            evaluations_today: VecDeque::new(),
            trackers: HashMap::new(),
            dedup_runners: HashSet::new(),
            dedup_selections: HashSet::new(),
            reports_index: Vec::new(),
            api_keys: BTreeMap::new(),
            saved_at,
        }
    }

    /// Appends an evaluation record, dropping the oldest on overflow.
    pub fn push_evaluation(&mut self, record: EvaluationRecord) {
        if self.evaluations_today.len() >= MAX_EVALUATIONS {
            self.evaluations_today.pop_front();
        }
        self.evaluations_today.push_back(record);
    }

    /// Retires the current session into the index, dropping the oldest entry
    /// on overflow, and clears the current-session slot.
    pub fn retire_session(&mut self) {
        if let Some(session) = self.session.take() {
            if self.sessions_index.len() >= MAX_SESSIONS_INDEX {
                self.sessions_index.pop_front();
            }
            self.sessions_index.push_back(session);
        }
    }

    /// Whether this document's `date` is today's local date; a document from
    /// an earlier date is stale for dedup/tracker purposes (spec §4.6
    /// "Recovery on start").
    #[must_use]
    pub fn is_for_date(&self, today: NaiveDate) -> bool {
        self.date == today
    }

    /// Clears today's bets, evaluations, dedup sets and trackers in place,
    /// keeping `session` and `sessions_index` (spec §4.7 `reset_bets`).
    pub fn reset_bets(&mut self) {
        self.bets_today.clear();
        self.evaluations_today.clear();
        self.trackers.clear();
        self.dedup_runners.clear();
        self.dedup_selections.clear();
    }
}
