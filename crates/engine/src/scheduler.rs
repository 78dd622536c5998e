//! Scheduler (C4, spec §4.4): the top-level tick. Refreshes the market
//! universe, drives each tracker at the right cadence, guards against
//! in-play markets, dispatches the IN_WINDOW cohort into the decision
//! pipeline, and serialises bet submission.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;

use layline_core::{
    evaluate, Discipline, EvaluationRecord, Market, MarketTracker, Session, SessionMode,
    SessionStatus, TrackerState,
};
use layline_exchange::{ExchangeClient, ExchangeError, MarketBook};
use layline_persistence::PersistenceGateway;

use crate::state::EngineState;
use crate::bet_pipeline;

/// Bound on concurrent book fetches within one tick (spec §4.4/§5).
const MAX_CONCURRENT_FETCHES: usize = 8;

/// Universe refresh cadence (spec §4.4 item 2: "at most once every 5 minutes").
const UNIVERSE_REFRESH_MINUTES: i64 = 5;

/// Hot/durable flush cadence absent a significant event (spec §4.4 item 7).
const FLUSH_INTERVAL_SECONDS: i64 = 150;

#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub markets_evaluated: usize,
    pub bets_submitted: usize,
    pub auth_failed: bool,
}

/// Runs one scheduler tick against `state`. Returns a small report for
/// logging/testing; the interesting effects are the mutations to `state`.
pub async fn run_tick(
    state: &mut EngineState,
    exchange: &dyn ExchangeClient,
    persistence: &PersistenceGateway,
    now: DateTime<Utc>,
) -> TickReport {
    let today = now.date_naive();
    if state.document.date != today {
        rollover(state, now, today);
    }

    maybe_refresh_universe(state, exchange, today, now).await;
    maybe_refresh_balance_and_results(state, exchange, today, now).await;

    let window = state.document.config.engine.process_window_minutes;
    let (in_window_ids, monitoring_ids, expiry_ids) = partition_cohorts(state, now, window);

    for id in expiry_ids {
        if let Some(tracker) = state.document.trackers.get_mut(&id) {
            tracker.tick(now, window);
        }
    }

    run_monitoring_cohort(state, exchange, &monitoring_ids, now, window).await;
    let markets_evaluated = in_window_ids.len();
    let bets_before = state.document.bets_today.len();
    run_in_window_cohort(state, exchange, &in_window_ids, now).await;

    maybe_flush(state, persistence, now).await;

    TickReport {
        markets_evaluated,
        bets_submitted: state.document.bets_today.len() - bets_before,
        auth_failed: state.auth_failed,
    }
}

/// Day rollover (spec §4.4 item 1): atomically clears trackers, dedup sets
/// and in-memory ring buffers, stops the previous session, and — if the
/// scheduler is running — starts a new one keyed to the new date.
fn rollover(state: &mut EngineState, now: DateTime<Utc>, today: NaiveDate) {
    if let Some(session) = state.document.session.as_mut() {
        session.status = SessionStatus::Stopped;
        session.stop_time = Some(now);
    }
    state.document.retire_session();
    state.document.trackers.clear();
    state.document.dedup_runners.clear();
    state.document.dedup_selections.clear();
    state.document.bets_today.clear();
    state.document.evaluations_today.clear();
    state.document.date = today;
    state.last_universe_refresh = None;

    if state.running {
        let mode = if state.document.config.engine.dry_run {
            SessionMode::DryRun
        } else {
            SessionMode::Live
        };
        state.document.session = Some(Session::new(
            today,
            now,
            mode,
            state.document.config.engine.countries.clone(),
        ));
    }

    state.dirty = true;
}

async fn maybe_refresh_universe(state: &mut EngineState, exchange: &dyn ExchangeClient, today: NaiveDate, now: DateTime<Utc>) {
    let due = match state.last_universe_refresh {
        None => true,
        Some(last) => (now - last).num_minutes() >= UNIVERSE_REFRESH_MINUTES,
    };
    if !due {
        return;
    }

    let countries: BTreeSet<_> = state.document.config.engine.countries.clone();
    match exchange.list_win_markets(today, &countries).await {
        Ok(markets) => {
            for market in markets {
                state
                    .document
                    .trackers
                    .entry(market.market_id.clone())
                    .or_insert_with(|| MarketTracker::new(market));
            }
            state.last_universe_refresh = Some(now);
        }
        Err(err) => {
            if matches!(err, ExchangeError::Authentication(_)) {
                state.auth_failed = true;
                state.running = false;
            }
            state.push_error(format!("universe refresh failed: {err}"));
        }
    }
}

/// Refreshes the account balance (C1 `get_balance`, internally 30s-cached so
/// this is cheap to call every tick) and the cleared-bets view (C1
/// `list_cleared`, throttled to the same cadence as the universe refresh)
/// that back the `balance`/`balance_age_seconds`/`recent_results` fields of
/// the UI-facing state snapshot (spec §6).
async fn maybe_refresh_balance_and_results(
    state: &mut EngineState,
    exchange: &dyn ExchangeClient,
    today: NaiveDate,
    now: DateTime<Utc>,
) {
    match exchange.get_balance().await {
        Ok(balance) => {
            state.balance = Some(balance);
            state.balance_fetched_at = Some(now);
        }
        Err(err) => {
            if matches!(err, ExchangeError::Authentication(_)) {
                state.auth_failed = true;
                state.running = false;
            }
            state.push_error(format!("balance refresh failed: {err}"));
        }
    }

    let due = match state.last_results_refresh {
        None => true,
        Some(last) => (now - last).num_minutes() >= UNIVERSE_REFRESH_MINUTES,
    };
    if !due {
        return;
    }

    match exchange.list_cleared(today, today).await {
        Ok(results) => {
            state.set_recent_results(results);
            state.last_results_refresh = Some(now);
        }
        Err(err) => {
            if matches!(err, ExchangeError::Authentication(_)) {
                state.auth_failed = true;
                state.running = false;
            }
            state.push_error(format!("cleared-bets refresh failed: {err}"));
        }
    }
}

/// Splits tracked markets into the three cohorts of spec §4.4 item 3, using
/// each tracker's last-known `race_time` (no network I/O needed yet).
fn partition_cohorts(state: &EngineState, now: DateTime<Utc>, window: u32) -> (Vec<String>, Vec<String>, Vec<String>) {
    let window_decimal = Decimal::from(window);
    let mut in_window = Vec::new();
    let mut monitoring = Vec::new();
    let mut expiry = Vec::new();

    for tracker in state.document.trackers.values() {
        let minutes_to_off = tracker.minutes_to_off(now);

        if minutes_to_off <= Decimal::ZERO {
            if tracker.state != TrackerState::Expired {
                expiry.push(tracker.market_id.clone());
            }
            continue;
        }

        if minutes_to_off <= window_decimal {
            if !matches!(
                tracker.state,
                TrackerState::Processed | TrackerState::Expired | TrackerState::Skipped
            ) {
                in_window.push(tracker.market_id.clone());
            }
            continue;
        }

        if matches!(tracker.state, TrackerState::Discovered | TrackerState::Monitoring) && tracker.due_for_snapshot(now) {
            monitoring.push(tracker.market_id.clone());
        }
    }

    (in_window, monitoring, expiry)
}

/// Fetches books for `ids` through a worker pool bounded at
/// `MAX_CONCURRENT_FETCHES` concurrent requests (spec §4.4/§5).
async fn fetch_books(exchange: &dyn ExchangeClient, ids: &[String]) -> Vec<(String, Result<MarketBook, ExchangeError>)> {
    stream::iter(ids.iter().cloned())
        .map(|id| async move {
            let book = exchange.get_book(&id).await;
            (id, book)
        })
        .buffer_unordered(MAX_CONCURRENT_FETCHES)
        .collect()
        .await
}

async fn run_monitoring_cohort(
    state: &mut EngineState,
    exchange: &dyn ExchangeClient,
    ids: &[String],
    now: DateTime<Utc>,
    window: u32,
) {
    if ids.is_empty() {
        return;
    }
    let books = fetch_books(exchange, ids).await;
    let max_lay_odds = state.document.config.engine.max_lay_odds;

    for (id, result) in books {
        match result {
            Ok(book) => {
                let Some(tracker) = state.document.trackers.get_mut(&id) else {
                    continue;
                };
                let merged = book.apply_to(tracker.market.clone());
                tracker.update_book(merged);
                if !tracker.skip_if_overpriced(max_lay_odds) {
                    tracker.tick(now, window);
                    if tracker.due_for_snapshot(now) {
                        tracker.record_snapshot(now);
                    }
                }
            }
            Err(err) => {
                if matches!(err, ExchangeError::Authentication(_)) {
                    state.auth_failed = true;
                    state.running = false;
                }
                state.push_error(format!("monitoring book fetch failed for {id}: {err}"));
            }
        }
    }
}

/// Fetches books for the IN_WINDOW cohort, runs the rule evaluator, submits
/// instructions serially in ascending `(race_time, market_id)` order, and
/// marks each tracker PROCESSED regardless of outcome (spec §4.4 item 4).
async fn run_in_window_cohort(state: &mut EngineState, exchange: &dyn ExchangeClient, ids: &[String], now: DateTime<Utc>) {
    if ids.is_empty() {
        return;
    }
    let books = fetch_books(exchange, ids).await;

    let mut ready: Vec<Market> = Vec::new();
    let mut auth_failed = false;
    for (id, result) in books {
        match result {
            Ok(book) => {
                if let Some(tracker) = state.document.trackers.get(&id) {
                    ready.push(book.apply_to(tracker.market.clone()));
                }
            }
            Err(err) => {
                if matches!(err, ExchangeError::Authentication(_)) {
                    auth_failed = true;
                }
                state.push_error(format!("in-window book fetch failed for {id}: {err}"));
            }
        }
    }
    if auth_failed {
        state.auth_failed = true;
        state.running = false;
    }

    // Ordering guarantee (spec §4.4/§5): ascending race_time, then market_id.
    ready.sort_by(|a, b| a.race_time.cmp(&b.race_time).then_with(|| a.market_id.cmp(&b.market_id)));

    for market in ready {
        if let Some(tracker) = state.document.trackers.get_mut(&market.market_id) {
            tracker.update_book(market.clone());
        }

        let decision = evaluate(&market, &state.document.config.engine);

        state.document.push_evaluation(EvaluationRecord {
            market_id: market.market_id.clone(),
            evaluated_at: now,
            rule_id: decision.rule_id,
            skipped: decision.skipped,
            skip_reason: decision.skip_reason.map(|r| r.as_str().to_string()),
            instruction_count: decision.instructions.len(),
        });

        if let Some(session) = state.document.session.as_mut() {
            session.summary.spread_rejections += decision.spread_rejections.len() as u64;
            if decision.jofs_split {
                session.summary.jofs_splits += 1;
            }
        }

        let discipline = Discipline::from_market_name(&market.market_name);
        // Serial submission within the market (and across markets, since
        // this loop itself is sequential): preserves dedup semantics.
        for instruction in decision.instructions {
            bet_pipeline::process_instruction(
                state,
                instruction,
                market.race_time,
                market.venue.clone(),
                discipline,
                exchange,
                now,
            )
            .await;
        }

        if let Some(tracker) = state.document.trackers.get_mut(&market.market_id) {
            tracker.mark_processed();
        }
        if let Some(session) = state.document.session.as_mut() {
            session.summary.markets_processed += 1;
        }
        state.dirty = true;
    }
}

async fn maybe_flush(state: &mut EngineState, persistence: &PersistenceGateway, now: DateTime<Utc>) {
    let due = state.dirty
        || match state.last_flush {
            None => true,
            Some(last) => (now - last).num_seconds() >= FLUSH_INTERVAL_SECONDS,
        };
    if !due {
        return;
    }
    if let Err(err) = persistence.save(&state.document).await {
        state.push_error(format!("persistence flush failed: {err}"));
    }
    state.last_flush = Some(now);
    state.dirty = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use layline_core::{
        Country, EngineConfig, ExchangeCredentials, Market, MarketStatus, PersistenceConfig,
        Runner, Session, SessionMode, TopLevelConfig,
    };
    use layline_exchange::{ClearedBet, ExchangeError, MarketBookFull, OrderAck, OrderAckStatus};
    use layline_persistence::{DurableStore, HotStore, StateDocument};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A fixed-universe mock exchange: one market whose race time is
    /// `minutes_from_now` away, with a favourite priced for RULE_1. Counts
    /// `get_book` and `submit_lay` calls so tests can assert on fetch/bet
    /// counts across repeated ticks.
    struct FixedExchange {
        market: Market,
        book_calls: AtomicUsize,
        submit_calls: AtomicUsize,
    }

    fn runner_priced(minutes_from_now: i64, now: DateTime<Utc>) -> Market {
        Market {
            market_id: "1.100".to_string(),
            venue: "Ascot".to_string(),
            country: Country::Gb,
            race_time: now + Duration::minutes(minutes_from_now),
            market_name: "16:05 R5 Hcap".to_string(),
            status: MarketStatus::Open,
            in_play: false,
            runners: vec![
                Runner {
                    selection_id: 1,
                    name: "Fast One".to_string(),
                    sort_priority: 1,
                    best_available_to_lay: Some(dec!(1.80)),
                    best_available_to_back: Some(dec!(1.79)),
                },
                Runner {
                    selection_id: 2,
                    name: "Second One".to_string(),
                    sort_priority: 2,
                    best_available_to_lay: Some(dec!(4.50)),
                    best_available_to_back: Some(dec!(4.40)),
                },
            ],
        }
    }

    #[async_trait]
    impl ExchangeClient for FixedExchange {
        async fn list_win_markets(
            &self,
            _date: chrono::NaiveDate,
            _countries: &BTreeSet<Country>,
        ) -> layline_exchange::Result<Vec<Market>> {
            Ok(vec![self.market.clone()])
        }

        async fn get_book(&self, _market_id: &str) -> layline_exchange::Result<layline_exchange::MarketBook> {
            self.book_calls.fetch_add(1, Ordering::SeqCst);
            Ok(layline_exchange::MarketBook {
                market_id: self.market.market_id.clone(),
                runners: self.market.runners.clone(),
                in_play: self.market.in_play,
                status: self.market.status,
            })
        }

        async fn get_book_full(&self, _market_id: &str, _depth: u8) -> layline_exchange::Result<MarketBookFull> {
            unimplemented!("not exercised by scheduler tests")
        }

        async fn submit_lay(
            &self,
            _market_id: &str,
            _selection_id: i64,
            size: rust_decimal::Decimal,
            price: rust_decimal::Decimal,
            _handicap: i32,
        ) -> layline_exchange::Result<OrderAck> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(OrderAck {
                status: OrderAckStatus::Success,
                bet_id: Some("bet-1".to_string()),
                size_matched: Some(size),
                avg_price_matched: Some(price),
                error_code: None,
            })
        }

        async fn list_cleared(&self, _from: chrono::NaiveDate, _to: chrono::NaiveDate) -> layline_exchange::Result<Vec<ClearedBet>> {
            Ok(Vec::new())
        }

        async fn get_balance(&self) -> layline_exchange::Result<rust_decimal::Decimal> {
            Ok(dec!(1000))
        }
    }

    struct AuthFailingExchange;

    #[async_trait]
    impl ExchangeClient for AuthFailingExchange {
        async fn list_win_markets(
            &self,
            _date: chrono::NaiveDate,
            _countries: &BTreeSet<Country>,
        ) -> layline_exchange::Result<Vec<Market>> {
            Err(ExchangeError::Authentication("session expired".to_string()))
        }

        async fn get_book(&self, _market_id: &str) -> layline_exchange::Result<layline_exchange::MarketBook> {
            unimplemented!()
        }

        async fn get_book_full(&self, _market_id: &str, _depth: u8) -> layline_exchange::Result<MarketBookFull> {
            unimplemented!()
        }

        async fn submit_lay(
            &self,
            _market_id: &str,
            _selection_id: i64,
            _size: rust_decimal::Decimal,
            _price: rust_decimal::Decimal,
            _handicap: i32,
        ) -> layline_exchange::Result<OrderAck> {
            unimplemented!()
        }

        async fn list_cleared(&self, _from: chrono::NaiveDate, _to: chrono::NaiveDate) -> layline_exchange::Result<Vec<ClearedBet>> {
            Ok(Vec::new())
        }

        async fn get_balance(&self) -> layline_exchange::Result<rust_decimal::Decimal> {
            Err(ExchangeError::Authentication("session expired".to_string()))
        }
    }

    fn gateway() -> PersistenceGateway {
        let dir = tempfile::tempdir().expect("tempdir");
        let hot = HotStore::new(dir.path().join("state.json"));
        let durable = DurableStore::local_disk(&dir.path().join("durable"), "", "state.json").expect("durable store");
        std::mem::forget(dir);
        PersistenceGateway::new(hot, durable)
    }

    fn running_state(date: NaiveDate, now: DateTime<Utc>) -> EngineState {
        let mut config = TopLevelConfig::default();
        config.engine = EngineConfig {
            dry_run: false,
            spread_control_enabled: false,
            jofs_enabled: false,
            ..EngineConfig::default()
        };
        config.persistence = PersistenceConfig::default();
        config.exchange = ExchangeCredentials {
            app_key: "key".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            base_url: "https://example.invalid".to_string(),
        };
        let mut document = StateDocument::new(config.clone(), date, now);
        document.session = Some(Session::new(date, now, SessionMode::Live, config.engine.countries.clone()));
        let mut state = EngineState::new(document);
        state.running = true;
        state
    }

    #[tokio::test]
    async fn in_window_market_is_processed_and_bet_recorded() {
        let now = Utc::now();
        let today = now.date_naive();
        let exchange = FixedExchange {
            market: runner_priced(5, now),
            book_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        };
        let mut state = running_state(today, now);
        let persistence = gateway();

        let report = run_tick(&mut state, &exchange, &persistence, now).await;

        assert_eq!(report.bets_submitted, 1);
        assert_eq!(state.document.bets_today.len(), 1);
        let tracker = state.document.trackers.get("1.100").expect("tracker discovered");
        assert_eq!(tracker.state, layline_core::TrackerState::Processed);
        assert_eq!(exchange.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_tick_against_a_processed_market_does_not_rebet() {
        let now = Utc::now();
        let today = now.date_naive();
        let exchange = FixedExchange {
            market: runner_priced(5, now),
            book_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        };
        let mut state = running_state(today, now);
        let persistence = gateway();

        run_tick(&mut state, &exchange, &persistence, now).await;
        let second = run_tick(&mut state, &exchange, &persistence, now + Duration::seconds(30)).await;

        assert_eq!(second.bets_submitted, 0);
        assert_eq!(state.document.bets_today.len(), 1);
        assert_eq!(exchange.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn monitoring_market_outside_window_takes_a_snapshot_without_betting() {
        let now = Utc::now();
        let today = now.date_naive();
        let exchange = FixedExchange {
            market: runner_priced(45, now),
            book_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        };
        let mut state = running_state(today, now);
        let persistence = gateway();

        let report = run_tick(&mut state, &exchange, &persistence, now).await;

        assert_eq!(report.bets_submitted, 0);
        assert!(state.document.bets_today.is_empty());
        let tracker = state.document.trackers.get("1.100").expect("tracker discovered");
        assert_eq!(tracker.state, layline_core::TrackerState::Monitoring);
        assert_eq!(tracker.snapshots.len(), 1);
    }

    #[tokio::test]
    async fn day_rollover_clears_trackers_and_dedup_sets() {
        let now = Utc::now();
        let today = now.date_naive();
        let exchange = FixedExchange {
            market: runner_priced(5, now),
            book_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        };
        let mut state = running_state(today, now);
        let persistence = gateway();

        run_tick(&mut state, &exchange, &persistence, now).await;
        assert_eq!(state.document.bets_today.len(), 1);
        assert!(state.document.dedup_selections.contains(&(1, "1.100".to_string())));

        // Same market id and selection re-appears on the new trading day: if
        // dedup sets survived rollover this bet would be dropped as a
        // duplicate. It isn't, because rollover clears them first.
        let tomorrow = now + Duration::days(1);
        let exchange_tomorrow = FixedExchange {
            market: runner_priced(5, tomorrow),
            book_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
        };
        run_tick(&mut state, &exchange_tomorrow, &persistence, tomorrow).await;

        assert_eq!(state.document.date, tomorrow.date_naive());
        assert_eq!(state.document.bets_today.len(), 1);
        assert_eq!(exchange_tomorrow.submit_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.document.sessions_index.len(), 1);
    }

    #[tokio::test]
    async fn authentication_failure_during_universe_refresh_stops_the_engine() {
        let now = Utc::now();
        let today = now.date_naive();
        let mut state = running_state(today, now);
        let persistence = gateway();

        let report = run_tick(&mut state, &AuthFailingExchange, &persistence, now).await;

        assert!(report.auth_failed);
        assert!(!state.running);
    }
}
