//! The engine singleton: market tracking, the rule-evaluation tick, bet
//! submission, and the operator control surface built on top of
//! `layline-core`, `layline-exchange` and `layline-persistence`.

pub mod bet_pipeline;
pub mod control;
pub mod error;
pub mod scheduler;
pub mod snapshot;
pub mod state;

pub use control::{spawn, EngineHandle};
pub use error::{ControlError, ControlResult};
pub use scheduler::{run_tick, TickReport};
pub use snapshot::{EngineStatus, NextRace, StateSnapshot, TrackerSummary};
pub use state::EngineState;
