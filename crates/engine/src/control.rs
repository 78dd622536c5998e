//! Control Surface (C7, spec §4.7): a single actor task owns the engine
//! singleton. Operators talk to it through a cloneable `EngineHandle`; every
//! call is a command-then-reply round trip over `mpsc`/`oneshot`, so the
//! actor never shares `EngineState` across threads.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use layline_core::Country;
use layline_exchange::ExchangeClient;
use layline_persistence::PersistenceGateway;

use crate::error::{ControlError, ControlResult};
use crate::scheduler;
use crate::snapshot::{self, StateSnapshot};
use crate::state::EngineState;

type Reply<T> = oneshot::Sender<ControlResult<T>>;

#[derive(Debug)]
enum ControlCommand {
    Start(Reply<()>),
    Stop(Reply<()>),
    ToggleDryRun(bool, Reply<()>),
    SetProcessWindow(u32, Reply<()>),
    SetPointValue(u32, Reply<()>),
    SetCountries(BTreeSet<Country>, Reply<()>),
    ToggleSpreadControl(bool, Reply<()>),
    ToggleJofs(bool, Reply<()>),
    ResetBets(Reply<()>),
    Snapshot(Reply<StateSnapshot>),
    Shutdown(Reply<()>),
}

/// Owns the engine singleton. Spawned as a single task by [`spawn`]; every
/// mutation to `EngineState` happens on this task, never concurrently.
struct Engine {
    state: EngineState,
    exchange: Arc<dyn ExchangeClient>,
    persistence: PersistenceGateway,
    rx: mpsc::Receiver<ControlCommand>,
}

impl Engine {
    fn new(
        state: EngineState,
        exchange: Arc<dyn ExchangeClient>,
        persistence: PersistenceGateway,
        rx: mpsc::Receiver<ControlCommand>,
    ) -> Self {
        Self {
            state,
            exchange,
            persistence,
            rx,
        }
    }

    /// Runs the actor loop: a tick fires on `poll_interval_seconds`,
    /// interleaved with control commands as they arrive (spec §4.4/§4.7 —
    /// commands take effect "before the next tick" because they're handled
    /// on the same task, never racing a tick in flight).
    async fn run(mut self) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.state.document.config.engine.poll_interval_seconds.max(1),
        ));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.state.running {
                        let report = scheduler::run_tick(
                            &mut self.state,
                            self.exchange.as_ref(),
                            &self.persistence,
                            Utc::now(),
                        )
                        .await;
                        tracing::debug!(
                            markets_evaluated = report.markets_evaluated,
                            bets_submitted = report.bets_submitted,
                            auth_failed = report.auth_failed,
                            "tick complete"
                        );
                    }
                }
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = self.persistence.save(&self.state.document).await;
        tracing::info!("engine actor shut down");
    }

    /// Handles one command. Returns `true` if the actor should stop running.
    async fn handle(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::Start(reply) => {
                let result = self.start();
                let _ = reply.send(result);
            }
            ControlCommand::Stop(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
            }
            ControlCommand::ToggleDryRun(enabled, reply) => {
                self.state.document.config.engine.dry_run = enabled;
                if let Some(session) = self.state.document.session.as_mut() {
                    session.mode = if enabled {
                        layline_core::SessionMode::DryRun
                    } else {
                        layline_core::SessionMode::Live
                    };
                }
                self.state.dirty = true;
                let _ = reply.send(Ok(()));
            }
            ControlCommand::SetProcessWindow(minutes, reply) => {
                let result = self
                    .state
                    .document
                    .config
                    .engine
                    .set_process_window(minutes)
                    .map_err(ControlError::from);
                self.state.dirty = result.is_ok();
                let _ = reply.send(result);
            }
            ControlCommand::SetPointValue(value, reply) => {
                let result = layline_core::PointValue::new(value).map_err(ControlError::from);
                match result {
                    Ok(point_value) => {
                        self.state.document.config.engine.point_value = point_value;
                        self.state.dirty = true;
                        let _ = reply.send(Ok(()));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            ControlCommand::SetCountries(countries, reply) => {
                let result = self
                    .state
                    .document
                    .config
                    .engine
                    .set_countries(countries)
                    .map_err(ControlError::from);
                if result.is_ok() {
                    // A changed universe invalidates the refresh clock so the
                    // next tick re-pulls markets under the new country set.
                    self.state.last_universe_refresh = None;
                    self.state.dirty = true;
                }
                let _ = reply.send(result);
            }
            ControlCommand::ToggleSpreadControl(enabled, reply) => {
                self.state.document.config.engine.spread_control_enabled = enabled;
                self.state.dirty = true;
                let _ = reply.send(Ok(()));
            }
            ControlCommand::ToggleJofs(enabled, reply) => {
                self.state.document.config.engine.jofs_enabled = enabled;
                self.state.dirty = true;
                let _ = reply.send(Ok(()));
            }
            ControlCommand::ResetBets(reply) => {
                self.state.document.reset_bets();
                self.state.last_universe_refresh = None;
                self.state.dirty = true;
                let _ = reply.send(Ok(()));
            }
            ControlCommand::Snapshot(reply) => {
                let snapshot = snapshot::build(&self.state, Utc::now());
                let _ = reply.send(Ok(snapshot));
            }
            ControlCommand::Shutdown(reply) => {
                self.stop();
                let _ = reply.send(Ok(()));
                return true;
            }
        }
        false
    }

    /// Starts the engine (spec §4.7 "start"): idempotent, requires
    /// credentials, opens a new session if none is active for today.
    fn start(&mut self) -> ControlResult<()> {
        if self.state.running {
            return Ok(());
        }
        if !self.state.credentials_present() {
            return Err(ControlError::NotAuthenticated);
        }

        self.state.auth_failed = false;
        self.state.running = true;

        if self.state.document.session.is_none() {
            let mode = if self.state.document.config.engine.dry_run {
                layline_core::SessionMode::DryRun
            } else {
                layline_core::SessionMode::Live
            };
            self.state.document.session = Some(layline_core::Session::new(
                self.state.document.date,
                Utc::now(),
                mode,
                self.state.document.config.engine.countries.clone(),
            ));
        } else if let Some(session) = self.state.document.session.as_mut() {
            session.status = layline_core::SessionStatus::Running;
        }

        self.state.dirty = true;
        Ok(())
    }

    /// Stops the engine (spec §4.7 "stop"): idempotent, closes the active
    /// session without discarding today's accumulated dedup/bet state.
    fn stop(&mut self) {
        if !self.state.running {
            return;
        }
        self.state.running = false;
        if let Some(session) = self.state.document.session.as_mut() {
            session.status = layline_core::SessionStatus::Stopped;
            session.stop_time = Some(Utc::now());
        }
        self.state.dirty = true;
    }
}

/// Handle to a running [`Engine`] actor. Cheap to clone; every method is a
/// command-then-reply round trip.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<ControlCommand>,
}

impl EngineHandle {
    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> ControlCommand) -> ControlResult<T> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(build(tx)).await.is_err() {
            return Err(ControlError::NotAuthenticated);
        }
        rx.await.unwrap_or(Err(ControlError::NotAuthenticated))
    }

    pub async fn start(&self) -> ControlResult<()> {
        self.call(ControlCommand::Start).await
    }

    pub async fn stop(&self) -> ControlResult<()> {
        self.call(ControlCommand::Stop).await
    }

    pub async fn toggle_dry_run(&self, enabled: bool) -> ControlResult<()> {
        self.call(|reply| ControlCommand::ToggleDryRun(enabled, reply)).await
    }

    pub async fn set_process_window(&self, minutes: u32) -> ControlResult<()> {
        self.call(|reply| ControlCommand::SetProcessWindow(minutes, reply)).await
    }

    pub async fn set_point_value(&self, value: u32) -> ControlResult<()> {
        self.call(|reply| ControlCommand::SetPointValue(value, reply)).await
    }

    pub async fn set_countries(&self, countries: BTreeSet<Country>) -> ControlResult<()> {
        self.call(|reply| ControlCommand::SetCountries(countries, reply)).await
    }

    pub async fn toggle_spread_control(&self, enabled: bool) -> ControlResult<()> {
        self.call(|reply| ControlCommand::ToggleSpreadControl(enabled, reply)).await
    }

    pub async fn toggle_jofs(&self, enabled: bool) -> ControlResult<()> {
        self.call(|reply| ControlCommand::ToggleJofs(enabled, reply)).await
    }

    pub async fn reset_bets(&self) -> ControlResult<()> {
        self.call(ControlCommand::ResetBets).await
    }

    pub async fn snapshot(&self) -> ControlResult<StateSnapshot> {
        self.call(ControlCommand::Snapshot).await
    }

    pub async fn shutdown(&self) -> ControlResult<()> {
        self.call(ControlCommand::Shutdown).await
    }
}

/// Builds the engine actor and spawns it on the current runtime, returning a
/// handle the caller can clone freely (e.g. one per CLI command plus one kept
/// by the process's shutdown handler).
#[must_use]
pub fn spawn(
    state: EngineState,
    exchange: Arc<dyn ExchangeClient>,
    persistence: PersistenceGateway,
) -> EngineHandle {
    let (tx, rx) = mpsc::channel(32);
    let engine = Engine::new(state, exchange, persistence, rx);
    tokio::spawn(engine.run());
    EngineHandle { tx }
}
