//! Bet Pipeline (C5, spec §4.5): dedup, submit, record, tally. Holds no
//! state of its own — the two dedup sets it consults live on
//! `EngineState.document`, consistent with "the engine singleton
//! exclusively owns ... dedup sets" (spec §3 Ownership).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use layline_core::{
    BetInstruction, BetRecord, Discipline, ExchangeResponse, ExchangeStatus,
};
use layline_exchange::{ExchangeClient, OrderAckStatus};

use crate::state::EngineState;

/// Runs one instruction through the dedup-then-submit-then-record pipeline.
/// Returns `None` if the instruction was dropped as a duplicate (invariant 1:
/// neither `(runner_name, race_time)` nor `(selection_id, market_id)` may
/// ever back two `BetRecord`s in the same trading day).
pub async fn process_instruction(
    state: &mut EngineState,
    instruction: BetInstruction,
    race_time: DateTime<Utc>,
    venue: String,
    discipline: Discipline,
    exchange: &dyn ExchangeClient,
    now: DateTime<Utc>,
) -> Option<BetRecord> {
    let runner_key = (instruction.runner_name.clone(), race_time);
    let selection_key = (instruction.selection_id, instruction.market_id.clone());

    if state.document.dedup_runners.contains(&runner_key) || state.document.dedup_selections.contains(&selection_key) {
        tracing::debug!(
            market_id = %instruction.market_id,
            selection_id = instruction.selection_id,
            "duplicate bet instruction dropped"
        );
        return None;
    }

    // Optimistic: claim both keys before the network round-trip so a
    // concurrent re-evaluation of the same market (there isn't one, since
    // submission is serial, but a retried tick could re-derive the same
    // instruction) can never double-submit.
    state.document.dedup_runners.insert(runner_key.clone());
    state.document.dedup_selections.insert(selection_key.clone());

    let dry_run = state.document.config.engine.dry_run;
    let exchange_response = if dry_run {
        ExchangeResponse::dry_run()
    } else {
        match exchange
            .submit_lay(
                &instruction.market_id,
                instruction.selection_id,
                instruction.size,
                instruction.price,
                0,
            )
            .await
        {
            Ok(ack) => ExchangeResponse {
                status: match ack.status {
                    OrderAckStatus::Success => ExchangeStatus::Success,
                    OrderAckStatus::Failure => ExchangeStatus::Failure,
                },
                bet_id: ack.bet_id,
                size_matched: ack.size_matched,
                avg_price_matched: ack.avg_price_matched,
                error: ack.error_code,
            },
            Err(err) => {
                if err.is_recoverable_order_failure() {
                    state.document.dedup_runners.remove(&runner_key);
                    state.document.dedup_selections.remove(&selection_key);
                }
                state.push_error(format!(
                    "bet submission failed for {} selection {}: {err}",
                    instruction.market_id, instruction.selection_id
                ));
                ExchangeResponse {
                    status: ExchangeStatus::Failure,
                    bet_id: None,
                    size_matched: None,
                    avg_price_matched: None,
                    error: Some(err.to_string()),
                }
            }
        }
    };

    let record = BetRecord {
        id: Uuid::new_v4(),
        instruction: instruction.clone(),
        placed_at: now,
        venue,
        discipline,
        race_time,
        dry_run,
        exchange_response,
    };

    state.document.bets_today.push(record.clone());
    if let Some(session) = state.document.session.as_mut() {
        session.bets.push(record.id);
        session.summary.bets += 1;
        session.summary.stake += instruction.size;
        session.summary.liability += instruction.liability();
        *session
            .summary
            .per_rule_tallies
            .entry(format!("{:?}", instruction.rule_id))
            .or_insert(0) += 1;
    }
    state.dirty = true;

    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use layline_core::{Country, EngineConfig, PersistenceConfig, RuleId, Session, SessionMode, TopLevelConfig};
    use layline_exchange::{ClearedBet, ExchangeError, MarketBook, MarketBookFull, Result};
    use layline_persistence::StateDocument;
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    struct StubExchange {
        fail_recoverable: bool,
    }

    #[async_trait]
    impl ExchangeClient for StubExchange {
        async fn list_win_markets(
            &self,
            _date: chrono::NaiveDate,
            _countries: &BTreeSet<Country>,
        ) -> Result<Vec<layline_core::Market>> {
            Ok(Vec::new())
        }

        async fn get_book(&self, _market_id: &str) -> Result<MarketBook> {
            unimplemented!("not exercised by bet_pipeline tests")
        }

        async fn get_book_full(&self, _market_id: &str, _depth: u8) -> Result<MarketBookFull> {
            unimplemented!("not exercised by bet_pipeline tests")
        }

        async fn submit_lay(
            &self,
            _market_id: &str,
            _selection_id: i64,
            _size: rust_decimal::Decimal,
            _price: rust_decimal::Decimal,
            _handicap: i32,
        ) -> Result<layline_exchange::OrderAck> {
            if self.fail_recoverable {
                Err(ExchangeError::Network("connection reset".to_string()))
            } else {
                Ok(layline_exchange::OrderAck {
                    status: OrderAckStatus::Success,
                    bet_id: Some("bet-1".to_string()),
                    size_matched: Some(dec!(3.00)),
                    avg_price_matched: Some(dec!(1.80)),
                    error_code: None,
                })
            }
        }

        async fn list_cleared(
            &self,
            _date_from: chrono::NaiveDate,
            _date_to: chrono::NaiveDate,
        ) -> Result<Vec<ClearedBet>> {
            Ok(Vec::new())
        }

        async fn get_balance(&self) -> Result<rust_decimal::Decimal> {
            Ok(dec!(1000))
        }
    }

    fn state_with_session() -> EngineState {
        let date = chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let now = Utc::now();
        let mut config = TopLevelConfig::default();
        config.engine = EngineConfig {
            dry_run: false,
            ..EngineConfig::default()
        };
        config.persistence = PersistenceConfig::default();
        let mut document = StateDocument::new(config, date, now);
        document.session = Some(Session::new(date, now, SessionMode::Live, BTreeSet::from([Country::Gb])));
        EngineState::new(document)
    }

    fn instruction() -> BetInstruction {
        BetInstruction {
            market_id: "1.23".to_string(),
            selection_id: 1,
            runner_name: "Fast One".to_string(),
            price: dec!(1.80),
            size: dec!(3.00),
            rule_id: RuleId::Rule1,
        }
    }

    #[tokio::test]
    async fn records_a_successful_bet_and_updates_summary() {
        let mut state = state_with_session();
        let exchange = StubExchange { fail_recoverable: false };
        let race_time = Utc::now();

        let record = process_instruction(
            &mut state,
            instruction(),
            race_time,
            "Ascot".to_string(),
            Discipline::Flat,
            &exchange,
            Utc::now(),
        )
        .await
        .expect("first submission is not a duplicate");

        assert_eq!(record.exchange_response.status, ExchangeStatus::Success);
        assert_eq!(state.document.bets_today.len(), 1);
        let session = state.document.session.as_ref().unwrap();
        assert_eq!(session.summary.bets, 1);
        assert_eq!(session.summary.stake, dec!(3.00));
        assert_eq!(session.summary.liability, dec!(2.40));
    }

    #[tokio::test]
    async fn second_submission_of_same_selection_is_dropped_as_duplicate() {
        let mut state = state_with_session();
        let exchange = StubExchange { fail_recoverable: false };
        let race_time = Utc::now();

        process_instruction(
            &mut state,
            instruction(),
            race_time,
            "Ascot".to_string(),
            Discipline::Flat,
            &exchange,
            Utc::now(),
        )
        .await;

        let second = process_instruction(
            &mut state,
            instruction(),
            race_time,
            "Ascot".to_string(),
            Discipline::Flat,
            &exchange,
            Utc::now(),
        )
        .await;

        assert!(second.is_none());
        assert_eq!(state.document.bets_today.len(), 1);
    }

    #[tokio::test]
    async fn recoverable_failure_releases_dedup_keys_for_retry() {
        let mut state = state_with_session();
        let exchange = StubExchange { fail_recoverable: true };
        let race_time = Utc::now();

        let record = process_instruction(
            &mut state,
            instruction(),
            race_time,
            "Ascot".to_string(),
            Discipline::Flat,
            &exchange,
            Utc::now(),
        )
        .await
        .expect("a bet record is still appended on failure");

        assert_eq!(record.exchange_response.status, ExchangeStatus::Failure);
        assert!(!state
            .document
            .dedup_selections
            .contains(&(1, "1.23".to_string())));
        assert!(!state.document.dedup_runners.contains(&("Fast One".to_string(), race_time)));
    }

    #[tokio::test]
    async fn dry_run_never_calls_the_exchange() {
        let mut state = state_with_session();
        state.document.config.engine.dry_run = true;
        let exchange = StubExchange { fail_recoverable: false };
        let race_time = Utc::now();

        let record = process_instruction(
            &mut state,
            instruction(),
            race_time,
            "Ascot".to_string(),
            Discipline::Flat,
            &exchange,
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(record.exchange_response.status, ExchangeStatus::DryRun);
        assert!(record.dry_run);
    }
}
