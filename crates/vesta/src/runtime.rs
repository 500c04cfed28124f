//! Process drivers: the interactive console and the HTTP server.
//!
//! Both run the scheduler on a fixed tick. The console owns the engine
//! outright; the server shares it behind a mutex between the ticker task and
//! the request handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::api;
use crate::api::SharedEngine;
use crate::engine::Engine;
use crate::engine::format_when;

const HELP: &str = "\
Commands are plain sentences, e.g. \"turn on the kitchen lights\".
  :state              show the active profile's devices
  :schedules          list scheduled entries
  :remove <id>        delete a scheduled entry
  :profiles           list profiles
  :use <id>           switch the active profile
  :new <name>         create a profile and switch to it
  :help               show this help
  :quit               exit";

/// What a console line asks of the loop.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Print(String),
    Quit,
}

fn scheduler_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

/// Interactive console on stdin/stdout.
pub async fn repl(mut engine: Engine, period: Duration) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = scheduler_interval(period);

    println!(
        "vesta ready, profile {}. Type :help for commands.",
        engine.active_profile().name
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for ack in engine.tick(api::local_now()) {
                    println!("{}", ack.text);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match handle_line(&mut engine, &line) {
                    Some(Reply::Print(text)) => println!("{}", text),
                    Some(Reply::Quit) => break,
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    engine.persist()?;
    Ok(())
}

fn handle_line(engine: &mut Engine, line: &str) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(meta) = line.strip_prefix(':') else {
        let ack = engine.handle_command(line, api::local_now());
        return Some(Reply::Print(ack.text));
    };

    let (name, arg) = meta
        .split_once(char::is_whitespace)
        .map(|(name, arg)| (name, arg.trim()))
        .unwrap_or((meta, ""));
    let text = match name {
        "q" | "quit" | "exit" => return Some(Reply::Quit),
        "help" => HELP.to_string(),
        "state" => serde_json::to_string_pretty(engine.state())
            .unwrap_or_else(|e| format!("Could not render state: {}", e)),
        "schedules" => list_schedules(engine),
        "remove" => match arg.parse::<u64>() {
            Ok(id) => match engine.remove_schedule(id) {
                Some(entry) => format!("Removed: {}", entry.describe()),
                None => format!("No scheduled entry {}.", id),
            },
            Err(_) => "Usage: :remove <id>".to_string(),
        },
        "profiles" => list_profiles(engine),
        "use" => match engine.set_active_profile(arg) {
            Ok(profile) => format!("Switched to {}.", profile.name),
            Err(e) => format!("Could not switch: {}.", e),
        },
        "new" if !arg.is_empty() => {
            let profile = engine.add_profile(arg);
            format!("Created {} ({}).", profile.name, profile.id)
        }
        "new" => "Usage: :new <name>".to_string(),
        other => format!("Unknown command :{}. Type :help.", other),
    };
    Some(Reply::Print(text))
}

fn list_schedules(engine: &Engine) -> String {
    let lines: Vec<String> = engine
        .user_schedules()
        .map(|e| {
            format!(
                "{:>3}  {}  {}{}",
                e.id,
                format_when(e.fires_at),
                e.describe(),
                if e.done { " (done)" } else { "" }
            )
        })
        .collect();
    if lines.is_empty() {
        "Nothing scheduled.".to_string()
    } else {
        lines.join("\n")
    }
}

fn list_profiles(engine: &Engine) -> String {
    let active = &engine.active_profile().id;
    engine
        .profiles()
        .iter()
        .map(|p| {
            let marker = if &p.id == active { "*" } else { " " };
            format!("{} {}  {}  ({})", marker, p.id, p.name, p.defaults.language)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run one command, fire anything already due, and persist.
pub fn say(engine: &mut Engine, text: &str) -> anyhow::Result<Vec<String>> {
    let now = api::local_now();
    let mut replies = vec![engine.handle_command(text, now).text];
    replies.extend(engine.tick(now).into_iter().map(|ack| ack.text));
    engine.persist()?;
    Ok(replies)
}

async fn run_ticker(engine: SharedEngine, period: Duration) {
    let mut interval = scheduler_interval(period);
    loop {
        interval.tick().await;
        let acks = engine.lock().await.tick(api::local_now());
        for ack in acks {
            info!(text = %ack.text, "scheduled entry fired");
        }
    }
}

/// Serve the HTTP API until ctrl-c.
pub async fn serve(
    engine: Engine,
    listen: String,
    port: u16,
    period: Duration,
) -> anyhow::Result<()> {
    let engine: SharedEngine = Arc::new(Mutex::new(engine));
    let ticker = tokio::spawn(run_ticker(engine.clone(), period));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let server = tokio::spawn(api::serve(engine.clone(), listen, port, shutdown_rx));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    if shutdown_tx.send(()).is_err() {
        warn!("HTTP API server already stopped");
    }
    let served = server.await?;
    ticker.abort();

    engine.lock().await.persist()?;
    info!("vesta shutdown complete");
    served
}
