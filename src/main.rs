use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod storage;
mod ui;
mod voice;

use crate::audio::{
    engine::{self, Engine},
    player::Backends,
    store::SessionStore,
};
use crate::bot::{DiscordNotifier, GuildJukebox};
use crate::config::Config;
use crate::sources::YtDlpResolver;
use crate::storage::{JsonStorage, SnapshotWriter};
use crate::voice::{SongbirdOutput, SongbirdVoice};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Almacenamiento y snapshots previos
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);
    let snapshots = match storage.load_all().await {
        Ok(snapshots) => snapshots,
        Err(e) => {
            warn!("⚠️ No se pudieron cargar los snapshots, arrancando vacío: {}", e);
            Default::default()
        }
    };
    if let Ok(stats) = storage.get_storage_stats().await {
        info!("{}", stats);
    }

    let writer_shutdown = CancellationToken::new();
    let (persistence, writer_task) = SnapshotWriter::spawn(storage, writer_shutdown.clone());

    // Motor de reproducción
    let store = Arc::new(SessionStore::new(config.default_volume));
    let (engine_handle, inbox) = engine::channel(store.clone());

    let resolver = YtDlpResolver::new(config.socket_timeout()).await;
    match resolver.verify().await {
        Ok(version) => info!("✅ yt-dlp {}", version),
        Err(e) => warn!("⚠️ yt-dlp no disponible, las búsquedas fallarán: {}", e),
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = GuildJukebox::new(config.clone(), engine_handle.clone(), snapshots);

    // Construir cliente
    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird.clone())
        .await?;

    let backends = Backends {
        resolver: Arc::new(resolver),
        output: Arc::new(SongbirdOutput::new(songbird.clone())?),
        voice: Arc::new(SongbirdVoice::new(songbird, engine_handle)),
        notifier: Arc::new(DiscordNotifier::new(client.http.clone(), client.cache.clone())),
    };

    let engine_shutdown = CancellationToken::new();
    let engine = Engine::new(inbox, store, backends, persistence, config.player_settings());
    let engine_task = tokio::spawn(engine.run(engine_shutdown.clone()));

    // Manejar shutdown graceful: primero el motor, después el escritor
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");

        engine_shutdown.cancel();
        if let Err(e) = engine_task.await {
            error!("El bucle de control terminó con error: {:?}", e);
        }

        writer_shutdown.cancel();
        if let Err(e) = writer_task.await {
            error!("El escritor de snapshots terminó con error: {:?}", e);
        }

        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes: yt-dlp");
    }
}
