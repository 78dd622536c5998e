//! The rule evaluator (C2): a pure function from (Market, Config) to a
//! RuleDecision. Implements the four stake rules, the spread gate, and JOFS
//! (spec §4.2). Carries no state; the same inputs always yield the same
//! decision.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::domain::{BetInstruction, Market, MarketStatus, RuleId, Runner};
use crate::ticks::{price_tick, spread_band_threshold};

/// Exchange minimum lay stake. A computed size below this is rounded up to
/// it rather than rejected outright. The enumerated `PointValue` set starts
/// at 1, so the smallest possible base stake (1 point) already clears this;
/// it only bites after a JOFS split divides a stake across several runners.
const EXCHANGE_MIN_SIZE: Decimal = dec!(1.00);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    InPlayOrClosed,
    NoPrice,
    MaxOddsExceeded,
    BelowMinOdds,
    Spread,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::InPlayOrClosed => "in_play_or_closed",
            SkipReason::NoPrice => "no_price",
            SkipReason::MaxOddsExceeded => "max_odds_exceeded",
            SkipReason::BelowMinOdds => "below_min_odds",
            SkipReason::Spread => "spread",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerView {
    pub name: String,
    pub odds: Option<Decimal>,
}

impl From<&Runner> for RunnerView {
    fn from(runner: &Runner) -> Self {
        Self {
            name: runner.name.clone(),
            odds: runner.best_available_to_lay,
        }
    }
}

/// One instruction dropped by the spread gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadRejection {
    pub selection_id: i64,
    pub runner_name: String,
    pub lay_price: Decimal,
    pub back_price: Option<Decimal>,
    pub threshold: Option<Decimal>,
}

/// Pure output of the rule evaluator for one market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule_id: Option<RuleId>,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
    pub instructions: Vec<BetInstruction>,
    pub favourite: Option<RunnerView>,
    pub second_favourite: Option<RunnerView>,
    pub spread_rejections: Vec<SpreadRejection>,
    pub jofs_split: bool,
}

impl RuleDecision {
    fn skipped_with(favourite: Option<RunnerView>, second: Option<RunnerView>, reason: SkipReason) -> Self {
        Self {
            rule_id: None,
            skipped: true,
            skip_reason: Some(reason),
            instructions: Vec::new(),
            favourite,
            second_favourite: second,
            spread_rejections: Vec::new(),
            jofs_split: false,
        }
    }
}

fn round2(value: Decimal) -> Decimal {
    value.round_dp(2)
}

fn round_down2(value: Decimal) -> Decimal {
    (value * dec!(100)).floor() / dec!(100)
}

/// Runners priced equal to `fav_odds`, or within one exchange price-tick of
/// it (always includes the favourite itself).
fn jofs_group<'a>(market: &'a Market, fav_odds: Decimal) -> Vec<&'a Runner> {
    let tick = price_tick(fav_odds);
    market
        .runners
        .iter()
        .filter(|r| match r.best_available_to_lay {
            Some(price) => (price - fav_odds).abs() <= tick,
            None => false,
        })
        .collect()
}

/// Evaluates the rule set against a market's current book (spec §4.2).
#[must_use]
pub fn evaluate(market: &Market, config: &EngineConfig) -> RuleDecision {
    let favourite_view = market.favourite().map(RunnerView::from);
    let second_view = market.second_favourite().map(RunnerView::from);

    if market.in_play || market.status != MarketStatus::Open {
        return RuleDecision::skipped_with(favourite_view, second_view, SkipReason::InPlayOrClosed);
    }

    let Some(favourite) = market.favourite() else {
        return RuleDecision::skipped_with(favourite_view, second_view, SkipReason::NoPrice);
    };

    let fav_odds = match favourite.best_available_to_lay {
        None => return RuleDecision::skipped_with(favourite_view, second_view, SkipReason::NoPrice),
        Some(price) if price > config.max_lay_odds => {
            return RuleDecision::skipped_with(favourite_view, second_view, SkipReason::MaxOddsExceeded)
        }
        Some(price) => price,
    };

    if fav_odds < config.min_odds {
        return RuleDecision::skipped_with(favourite_view, second_view, SkipReason::BelowMinOdds);
    }

    let second = market.second_favourite();

    let (rule_id, proposal): (RuleId, Vec<(&Runner, u32)>) = if fav_odds < dec!(2.0) {
        (RuleId::Rule1, vec![(favourite, 3)])
    } else if fav_odds <= dec!(5.0) {
        (RuleId::Rule2, vec![(favourite, 2)])
    } else {
        match second.and_then(|s| s.best_available_to_lay.map(|p| (s, p))) {
            Some((sec, sec_odds)) if (sec_odds - fav_odds) < dec!(2.0) => {
                (RuleId::Rule3A, vec![(favourite, 1), (sec, 1)])
            }
            _ => (RuleId::Rule3B, vec![(favourite, 1)]),
        }
    };

    let mut instructions: Vec<BetInstruction> = proposal
        .into_iter()
        .map(|(runner, points)| {
            let price = runner
                .best_available_to_lay
                .expect("proposal only contains priced runners");
            let raw_size = config.point_value.as_decimal() * Decimal::from(points);
            let size = round2(raw_size).max(EXCHANGE_MIN_SIZE);
            BetInstruction {
                market_id: market.market_id.clone(),
                selection_id: runner.selection_id,
                runner_name: runner.name.clone(),
                price,
                size,
                rule_id,
            }
        })
        .collect();

    let mut decision = RuleDecision {
        rule_id: Some(rule_id),
        skipped: false,
        skip_reason: None,
        instructions: Vec::new(),
        favourite: favourite_view,
        second_favourite: second_view,
        spread_rejections: Vec::new(),
        jofs_split: false,
    };

    if config.spread_control_enabled {
        let mut surviving = Vec::with_capacity(instructions.len());
        for instruction in instructions {
            let back_price = market
                .runners
                .iter()
                .find(|r| r.selection_id == instruction.selection_id)
                .and_then(|r| r.best_available_to_back);
            let threshold = spread_band_threshold(instruction.price);
            let rejected = match (back_price, threshold) {
                (Some(back), Some(max_spread)) => (instruction.price - back) > max_spread,
                _ => true,
            };
            if rejected {
                decision.spread_rejections.push(SpreadRejection {
                    selection_id: instruction.selection_id,
                    runner_name: instruction.runner_name.clone(),
                    lay_price: instruction.price,
                    back_price,
                    threshold,
                });
            } else {
                surviving.push(instruction);
            }
        }
        instructions = surviving;

        if instructions.is_empty() {
            decision.skipped = true;
            decision.skip_reason = Some(SkipReason::Spread);
            decision.rule_id = None;
            return decision;
        }
    }

    if config.jofs_enabled {
        if let Some(fav_idx) = instructions.iter().position(|i| i.selection_id == favourite.selection_id) {
            let group = jofs_group(market, fav_odds);
            if group.len() >= 2 {
                let fav_instruction = instructions.remove(fav_idx);
                let each = round_down2(fav_instruction.size / Decimal::from(group.len() as i64)).max(EXCHANGE_MIN_SIZE);
                decision.jofs_split = true;
                for runner in group {
                    let price = runner.best_available_to_lay.unwrap_or(fav_odds);
                    instructions.push(BetInstruction {
                        market_id: market.market_id.clone(),
                        selection_id: runner.selection_id,
                        runner_name: runner.name.clone(),
                        price,
                        size: each,
                        rule_id,
                    });
                }
            }
        }
    }

    decision.instructions = instructions;
    decision
}
