use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use statusync::cli::{Cli, Command};
use statusync::config::BotConfig;
use statusync::engine::channel_title::{ChannelTitleSink, LogChannelTitles};
use statusync::engine::mcstatus::McStatusProbe;
use statusync::engine::presence::{LogPresenceSink, PresenceSync};
use statusync::engine::reconcile::ReconciliationLoop;
use statusync::engine::renderer::LogRenderer;
use statusync::engine::snapshot_cache::{SnapshotCache, SnapshotEvent};
use statusync::store::file::FileTargetStore;
use statusync::store::{DisplayTarget, RenderOptions, SurfaceId, TargetStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = BotConfig::load(&cli.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level)),
        )
        .init();

    match &config.loaded_from {
        Some(path) => info!(path = %path, "configuration loaded"),
        None => info!(path = %cli.config, "no config file found, using defaults"),
    }

    let store: Arc<dyn TargetStore> = Arc::new(FileTargetStore::new(config.storage.path.as_str()));
    let probe = McStatusProbe::new(config.probe.api_base.clone())
        .context("failed to build status API client")?;
    let cache = SnapshotCache::new(Arc::new(probe), config.to_cache_config());
    let sync = Arc::new(ReconciliationLoop::new(
        store.clone(),
        cache.clone(),
        Arc::new(LogRenderer),
        config.update_interval(),
    ));

    match cli.command() {
        Command::Run => run(&config, store, cache, sync).await,
        Command::List => {
            let targets = sync.tracked().await;
            if targets.is_empty() {
                println!("No display targets registered.");
            }
            for t in targets {
                println!("{}\t{}\t{}", t.id, t.server, t.last_known_name);
            }
            Ok(())
        }
        Command::Add {
            id,
            server,
            name,
            player_avatars,
        } => {
            let target = DisplayTarget {
                id: SurfaceId::new(id),
                server: server.to_address(),
                render_options: RenderOptions { player_avatars },
                last_known_name: name,
            };
            let registration = sync.register(target.clone()).await?;
            let verb = if registration.replaced { "Updated" } else { "Registered" };
            let status = if registration.snapshot.is_online() { "online" } else { "offline" };
            println!(
                "{verb} {} -> {} ({status}, {}/{} players)",
                target.id,
                server.to_address(),
                registration.snapshot.players().online,
                registration.snapshot.players().max
            );
            Ok(())
        }
        Command::Remove { id } => {
            let id = SurfaceId::new(id);
            if sync.unregister(&id).await {
                println!("Removed {id}");
            } else {
                println!("No display target registered for {id}");
            }
            Ok(())
        }
        Command::Probe { server } => {
            let snapshot = cache.get_fresh(&server.to_address()).await;
            println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            Ok(())
        }
    }
}

async fn run(
    config: &BotConfig,
    store: Arc<dyn TargetStore>,
    cache: SnapshotCache,
    sync: Arc<ReconciliationLoop>,
) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

    let _snapshots = cache.subscribe(|event: &SnapshotEvent| {
        debug!(
            server = %event.server,
            online = event.snapshot.is_online(),
            players = event.snapshot.players().online,
            "snapshot refreshed"
        );
        Ok(())
    });

    if config.sync.enabled {
        tasks.push(("reconciliation", sync.spawn(shutdown.clone())));
    }

    if config.presence.enabled {
        let presence = Arc::new(PresenceSync::new(
            store.clone(),
            cache.clone(),
            Arc::new(LogPresenceSink),
            config.default_server(),
            config.presence_interval(),
        ));
        tasks.push(("presence", presence.spawn(shutdown.clone())));
    }

    if let Some(channel) = config.player_count_surface() {
        let sink = ChannelTitleSink::new(channel, Arc::new(LogChannelTitles::default()));
        let player_count = Arc::new(PresenceSync::new(
            store,
            cache,
            Arc::new(sink),
            config.default_server(),
            config.player_count_interval(),
        ));
        tasks.push(("player count", player_count.spawn(shutdown.clone())));
    }

    if tasks.is_empty() {
        warn!("reconciliation, presence and player count sync are all disabled, nothing to do");
        return Ok(());
    }

    info!(
        store = %config.storage.path,
        interval_secs = sync.update_interval().as_secs(),
        "statusync running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, waiting for running passes to finish");
    shutdown.cancel();

    for (name, handle) in tasks {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }
    Ok(())
}
