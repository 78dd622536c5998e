//! Operator binary: loads configuration, constructs the engine singleton,
//! and drains control commands from an interactive stdin session. No web
//! server, no dashboards — the `EngineHandle` built here is the entire
//! external surface (spec non-goal: UI rendering and HTTP exposure).

use std::collections::BTreeSet;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use chrono::Utc;

use layline_core::{ConfigLoader, Country, TopLevelConfig};
use layline_engine::{spawn, EngineHandle, EngineState};
use layline_exchange::{BetfairExchangeClient, ExchangeClient};
use layline_persistence::{DurableStore, HotStore, PersistenceGateway};

#[derive(Parser)]
#[command(name = "layline")]
#[command(about = "Autonomous lay-betting engine operator console", long_about = None)]
struct Cli {
    /// Optional config profile overlay, e.g. "dry_run" loads
    /// config/Config.dry_run.toml over config/Config.toml.
    #[arg(long, env = "LAYLINE_PROFILE")]
    profile: Option<String>,

    /// Start the engine immediately on launch instead of waiting for an
    /// operator `start` command.
    #[arg(long)]
    auto_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::load()?,
    };

    let handle = build_engine(config).await?;

    if cli.auto_start {
        match handle.start().await {
            Ok(()) => tracing::info!("engine started"),
            Err(err) => tracing::error!(%err, "auto-start failed"),
        }
    }

    run_console(handle).await
}

async fn build_engine(config: TopLevelConfig) -> anyhow::Result<EngineHandle> {
    let hot = HotStore::new(config.persistence.hot_state_path.clone());
    let durable = DurableStore::local_disk(
        std::path::Path::new(&config.persistence.object_store_bucket),
        &config.persistence.object_store_prefix,
        "engine_state.json",
    )?;
    let persistence = PersistenceGateway::new(hot, durable);

    let today = Utc::now().date_naive();
    let document = persistence.load_on_start(config.clone(), today, Utc::now()).await?;

    let exchange: Arc<dyn ExchangeClient> = Arc::new(BetfairExchangeClient::new(config.exchange.clone()));
    let state = EngineState::new(document);

    Ok(spawn(state, exchange, persistence))
}

/// Reads whitespace-separated commands from stdin, one per line, until EOF
/// or `quit`. Mirrors the operations of spec §4.7's Control Surface table.
async fn run_console(handle: EngineHandle) -> anyhow::Result<()> {
    print_help();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("layline> ");
        io::stdout().flush().ok();

        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };

        match command {
            "start" => report(handle.start().await),
            "stop" => report(handle.stop().await),
            "dry-run" => match parts.next().and_then(parse_bool) {
                Some(enabled) => report(handle.toggle_dry_run(enabled).await),
                None => println!("usage: dry-run <on|off>"),
            },
            "set-window" => match parts.next().and_then(|v| v.parse().ok()) {
                Some(minutes) => report(handle.set_process_window(minutes).await),
                None => println!("usage: set-window <1..60>"),
            },
            "set-point-value" => match parts.next().and_then(|v| v.parse().ok()) {
                Some(value) => report(handle.set_point_value(value).await),
                None => println!("usage: set-point-value <1|2|5|10|20|50>"),
            },
            "set-countries" => match parts.next().map(parse_countries) {
                Some(Ok(countries)) => report(handle.set_countries(countries).await),
                Some(Err(err)) => println!("error: {err}"),
                None => println!("usage: set-countries <GB,IE,ZA,FR>"),
            },
            "spread-control" => match parts.next().and_then(parse_bool) {
                Some(enabled) => report(handle.toggle_spread_control(enabled).await),
                None => println!("usage: spread-control <on|off>"),
            },
            "jofs" => match parts.next().and_then(parse_bool) {
                Some(enabled) => report(handle.toggle_jofs(enabled).await),
                None => println!("usage: jofs <on|off>"),
            },
            "reset-bets" => report(handle.reset_bets().await),
            "status" => match handle.snapshot().await {
                Ok(snapshot) => match serde_json::to_string_pretty(&snapshot) {
                    Ok(json) => println!("{json}"),
                    Err(err) => println!("error serialising snapshot: {err}"),
                },
                Err(err) => println!("error: {err}"),
            },
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("unknown command: {other} (type `help`)"),
        }
    }

    handle.shutdown().await.ok();
    Ok(())
}

fn report(result: Result<(), layline_engine::ControlError>) {
    match result {
        Ok(()) => println!("ok"),
        Err(err) => println!("error: {err}"),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_countries(value: &str) -> Result<BTreeSet<Country>, String> {
    value
        .split(',')
        .map(|code| Country::parse(code.trim()).map_err(|err| err.to_string()))
        .collect()
}

fn print_help() {
    println!(
        "commands: start | stop | dry-run <on|off> | set-window <m> | set-point-value <v> \
         | set-countries <GB,IE,...> | spread-control <on|off> | jofs <on|off> | reset-bets \
         | status | quit"
    );
}
