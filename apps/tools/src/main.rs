use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use host_integration::{DocumentStore, SessionInfo, SettingsStore};
use reach_core::{EngineConfig, HostCollaborators, ReachEngine, StatusId, SHOW_REACH_ONE_KEY};
use serde_json::json;
use shared::domain::{ActorId, EntityRef, PlacementId};
use storage::{MemoryWorld, WorldFixture};
use tracing::info;

mod config;

use config::{load_settings, Settings, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(name = "reachctl", about = "Drive reach-status reconciliation over a world fixture")]
struct Cli {
    /// TOML description of the world to load.
    #[arg(long)]
    world: PathBuf,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile every entity right away.
    Reconcile,
    /// Schedule a debounced rescan and wait for it to settle.
    Settle,
    /// Click a status on the HUD of one entity.
    Click {
        #[arg(long)]
        actor: i64,
        #[arg(long)]
        placement: Option<i64>,
        #[arg(long)]
        status: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config);
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let world = Arc::new(load_world(&cli.world, &settings)?);
    let engine = ReachEngine::new(
        HostCollaborators::from_host(world.clone()),
        EngineConfig {
            debounce_window: Duration::from_millis(settings.debounce_ms),
        },
    );
    engine.attach(world.as_ref());

    match cli.command {
        Command::Reconcile => {
            for (entity, outcome) in engine.reconcile_all().await? {
                let status = outcome.status().map(StatusId::as_str).unwrap_or("-");
                println!("{entity} {status}");
            }
        }
        Command::Settle => {
            let scheduled = engine.rescan_all().await?;
            tokio::time::sleep(engine.scheduler().window() * 2).await;
            info!(scheduled, pending = engine.scheduler().pending_len(), "reachctl: settled");
            print_statuses(&world).await?;
        }
        Command::Click {
            actor,
            placement,
            status,
        } => {
            let status = StatusId::parse(&status)
                .ok_or_else(|| anyhow!("'{status}' is not a reach status"))?;
            let entity = world
                .entity_ref(ActorId(actor), placement.map(PlacementId))
                .with_context(|| format!("no entity for actor {actor} placement {placement:?}"))?;

            engine.handle_status_click(&entity, status).await;

            print_entity(&world, &entity).await?;
            let record = engine.override_for(&entity).await?;
            println!("override {}", serde_json::to_string(&record)?);
        }
    }

    Ok(())
}

fn load_world(path: &Path, settings: &Settings) -> Result<MemoryWorld> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read world file '{}'", path.display()))?;
    let fixture: WorldFixture = toml::from_str(&raw)
        .with_context(|| format!("failed to parse world file '{}'", path.display()))?;
    let world = MemoryWorld::from_fixture(fixture).context("failed to seed world")?;

    world.register_setting(SHOW_REACH_ONE_KEY, json!(false));
    if let Some(show) = settings.show_reach_one {
        world.set(SHOW_REACH_ONE_KEY, json!(show))?;
    }
    if world.snapshot().local_user().is_none() {
        bail!("world file '{}' has no local user", path.display());
    }
    Ok(world)
}

async fn print_statuses(world: &MemoryWorld) -> Result<()> {
    for entity in world.entities().await? {
        print_entity(world, &entity).await?;
    }
    Ok(())
}

async fn print_entity(world: &MemoryWorld, entity: &EntityRef) -> Result<()> {
    let Some(snapshot) = world.entity(entity).await? else {
        println!("{entity} gone");
        return Ok(());
    };
    let statuses: Vec<&str> = snapshot
        .active_statuses()
        .filter(|status| StatusId::parse(status).is_some())
        .collect();
    let statuses = if statuses.is_empty() {
        "-".to_string()
    } else {
        statuses.join(",")
    };
    println!("{entity} {} {statuses}", snapshot.name);
    Ok(())
}
