//! careflow command line
//!
//! - `careflow replay <FILE>` - Push recorded stimuli through the pipeline
//! - `careflow show-config`   - Print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use careflow::bus::{Event, EventBus};
use careflow::config::AppConfig;
use careflow::coordinator::Orchestrator;
use careflow::domain::EscalationDecision;
use careflow::store::{InMemoryStateStore, StateKey, StateKind, StateStore};

#[derive(Parser, Debug)]
#[command(name = "careflow")]
#[command(author, version, about = "Hospital patient-flow coordination core")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(long, global = true, default_value = "config", env = "CAREFLOW_CONFIG_DIR")]
    pub config_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay newline-delimited JSON stimulus events and print the decisions
    Replay {
        /// Event file, one JSON event per line
        file: PathBuf,
        /// Seconds to wait for pipelines to drain after each event
        #[arg(long, default_value = "30")]
        drain_secs: u64,
        /// Print decisions as JSON lines
        #[arg(long)]
        json: bool,
        /// Also print the stored record for each key, e.g. `risk:p-1`
        #[arg(long = "state", value_name = "KIND:ID")]
        state: Vec<StateKey>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

pub fn show_config(config: &AppConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("{rendered}");
    if let Err(errors) = config.validate() {
        for e in errors {
            eprintln!("warning: {e}");
        }
    }
    Ok(())
}

/// Parse an event file. Blank lines and `#` comments are skipped.
pub fn parse_events(text: &str) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: Event =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid event", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Publish each event in file order, draining in-flight pipelines between
/// events so a patient's arrival is applied before their vitals.
pub async fn replay(
    config: &AppConfig,
    path: &Path,
    drain: Duration,
    json: bool,
    state: &[StateKey],
) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let events = parse_events(&text)?;
    info!("Replaying {} event(s) from {}", events.len(), path.display());

    let bus = Arc::new(EventBus::new(&config.bus));
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new(config.store.history_limit));
    let orchestrator = Arc::new(Orchestrator::new(config, bus.clone(), store.clone())?);
    orchestrator.start().await?;
    orchestrator.attach(&bus).await?;

    for event in events {
        let event_type = event.event_type.clone();
        let report = bus.publish(event).await;
        if report.subscribers == 0 {
            warn!("No subscriber for {}, event ignored", event_type);
        }
        if !orchestrator.wait_idle(drain).await {
            bail!("pipelines still running {}s after {}", drain.as_secs(), event_type);
        }
    }

    let decisions = collect_decisions(store.as_ref()).await?;
    if decisions.is_empty() {
        println!("No decisions produced");
    }
    for decision in &decisions {
        if json {
            println!("{}", serde_json::to_string(decision)?);
        } else {
            println!(
                "{:<12} {:<12} {:<8} {:<8} confidence {:.2}{}",
                decision.patient_id,
                decision.action,
                decision.target_unit.as_deref().unwrap_or("-"),
                decision.priority.as_str(),
                decision.confidence,
                if decision.requires_review { "  [review]" } else { "" }
            );
        }
    }

    for key in state {
        match store.get(key).await {
            Some(stored) => println!("{}", serde_json::to_string_pretty(&stored)?),
            None => warn!("No stored value for {}", key),
        }
    }

    let stats = bus.stats().await;
    info!(
        "Replay done: {} published, {} delivered, {} failed",
        stats.events_published, stats.deliveries, stats.failures
    );
    Ok(())
}

async fn collect_decisions(store: &dyn StateStore) -> Result<Vec<EscalationDecision>> {
    let mut decisions = Vec::new();
    for key in store.keys(StateKind::Decision).await {
        if let Some(stored) = store.get(&key).await {
            decisions.push(stored.value.as_decision(&key)?.clone());
        }
    }
    Ok(decisions)
}
