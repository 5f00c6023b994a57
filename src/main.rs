use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use legacy_gameserver::cipher::KeySchedule;
use legacy_gameserver::config::ServerConfig;
use legacy_gameserver::data::StaticMaps;
use legacy_gameserver::error::Result;
use legacy_gameserver::repository::{MemoryStore, Repositories};
use legacy_gameserver::script::{BuiltinScripts, ScriptExecutor};
use legacy_gameserver::service::{ChannelService, LoginService, MigrationManager};
use legacy_gameserver::transport::listener::serve;
use legacy_gameserver::transport::TransportSettings;
use legacy_gameserver::utils::metrics::spawn_reporter;
use legacy_gameserver::utils::{global_metrics, logging};
use legacy_gameserver::world::{FieldManager, FieldSettings};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct Args {
    config: Option<PathBuf>,
}

fn usage_and_exit() -> ! {
    eprintln!(
        "usage: legacy-gameserver [--config <path>] [--print-config]\n\
         \n\
         Without --config, defaults are read and GAMESERVER_* environment\n\
         variables override them."
    );
    std::process::exit(2);
}

fn parse_args() -> Args {
    let mut config = None;
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let v = it.next().unwrap_or_else(|| usage_and_exit());
                config = Some(PathBuf::from(v));
            }
            "--print-config" => {
                print!("{}", ServerConfig::example_config());
                std::process::exit(0);
            }
            "-h" | "--help" => usage_and_exit(),
            _ => usage_and_exit(),
        }
    }
    Args { config }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = parse_args();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal error");
            eprintln!("legacy-gameserver: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::from_env()?,
    };
    config.validate_strict()?;
    logging::init(&config.logging)?;
    let config = Arc::new(config);

    let schedule = KeySchedule::init();

    if !config.storage.database_url.starts_with("memory:") {
        warn!(url = %config.storage.database_url, "Only the in-memory store is built in");
    }
    let store = Arc::new(match &config.storage.seed_file {
        Some(path) => MemoryStore::from_seed_file(path)?,
        None => MemoryStore::new(),
    });
    let repos = Repositories::memory(store);

    let data = Arc::new(match StaticMaps::load_dir(&config.storage.wz_path) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %config.storage.wz_path, error = %e, "Using built-in map data");
            StaticMaps::builtin()
        }
    });

    let shutdown = CancellationToken::new();
    let migrations = Arc::new(MigrationManager::new(config.timeouts.migration_ttl));
    let sweeper = migrations.spawn_sweeper(config.timeouts.migration_sweep, shutdown.child_token());
    let reporter = spawn_reporter(config.timeouts.metrics_interval, shutdown.child_token());

    let field_settings = FieldSettings {
        tick_interval: config.timeouts.field_tick,
        object_id_seed: config.world.object_id_seed,
    };
    let scripts: Arc<dyn ScriptExecutor> = Arc::new(BuiltinScripts::with_defaults());
    let settings = TransportSettings::from_config(&config);
    let grace = config.timeouts.shutdown;

    // Bind everything first so a taken port fails startup.
    let login_listener = TcpListener::bind(config.login.socket_addr()?).await?;
    let mut channel_listeners = Vec::with_capacity(config.channels.len());
    for channel in &config.channels {
        let listener = TcpListener::bind(channel.socket_addr()?).await?;
        channel_listeners.push((channel.world_id, channel.channel_id, listener));
    }

    let mut listeners = JoinSet::new();
    let login = Arc::new(LoginService::new(
        config.clone(),
        repos.accounts.clone(),
        repos.characters.clone(),
        migrations.clone(),
    ));
    listeners.spawn(serve(
        login_listener,
        login,
        schedule.clone(),
        settings.clone(),
        shutdown.clone(),
        grace,
    ));

    // Each channel owns its map instances, as if it were its own process.
    let mut channel_fields = Vec::with_capacity(channel_listeners.len());
    for (world_id, channel_id, listener) in channel_listeners {
        let fields = Arc::new(FieldManager::new(data.clone(), data.clone(), field_settings.clone()));
        channel_fields.push(fields.clone());
        let channel = Arc::new(ChannelService::new(
            config.clone(),
            world_id,
            channel_id,
            repos.clone(),
            migrations.clone(),
            fields,
            data.clone(),
            scripts.clone(),
        ));
        listeners.spawn(serve(
            listener,
            channel,
            schedule.clone(),
            settings.clone(),
            shutdown.clone(),
            grace,
        ));
    }

    info!(
        login = %config.login.address,
        channels = config.channels.len(),
        "Server started"
    );

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => info!("Received CTRL+C signal, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for CTRL+C, shutting down"),
        },
        Some(exited) = listeners.join_next() => {
            error!(result = ?exited.map(|r| r.err().map(|e| e.to_string())), "Listener exited unexpectedly, shutting down");
        }
    }

    shutdown.cancel();
    while let Some(result) = listeners.join_next().await {
        match result {
            Ok(Err(e)) => warn!(error = %e, "Listener stopped with error"),
            Err(e) => warn!(error = %e, "Listener task failed"),
            Ok(Ok(())) => {}
        }
    }

    for fields in &channel_fields {
        fields.clear();
    }
    let _ = sweeper.await;
    let _ = reporter.await;
    global_metrics().log_metrics();
    info!("Shutdown complete");
    Ok(())
}
