pub mod config;
pub mod config_loader;
pub mod domain;
pub mod error;
pub mod rules;
pub mod ticks;

pub use config::{
    Country, EngineConfig, ExchangeCredentials, PersistenceConfig, PointValue, TopLevelConfig,
};
pub use config_loader::ConfigLoader;
pub use domain::{
    BetInstruction, BetRecord, DedupSets, Discipline, EvaluationRecord, ExchangeResponse,
    ExchangeStatus, Market, MarketStatus, MarketTracker, OddsSnapshot, RuleId, Runner, Session,
    SessionMode, SessionStatus, SessionSummary, TrackerAction, TrackerState,
};
pub use error::CoreError;
pub use rules::{evaluate, RuleDecision, SkipReason};
pub use ticks::{price_tick, spread_band_threshold};
