//! Bucle de control y el handle que usan los comandos para hablar con él.

use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    bridge::{Command, EngineEvent, Reply},
    error::EngineError,
    player::{Backends, EnqueueOutcome, PlaybackController, PlayerSettings, SkipOutcome, StopOutcome},
    session::{PersistedSnapshot, SessionView},
    store::SessionStore,
    types::{ChannelKey, GuildKey},
};
use crate::storage::SnapshotWriter;

/// Extremo receptor del canal del motor, a la espera de su controlador.
pub struct EngineInbox {
    tx: flume::Sender<EngineEvent>,
    rx: flume::Receiver<EngineEvent>,
}

/// Crea el canal del motor.
///
/// El handle existe antes que el bucle: el cliente de Discord lo necesita
/// para registrarse, y el notificador necesita al cliente.
pub fn channel(store: Arc<SessionStore>) -> (EngineHandle, EngineInbox) {
    let (tx, rx) = flume::unbounded();
    let handle = EngineHandle { tx: tx.clone(), store };
    (handle, EngineInbox { tx, rx })
}

pub struct Engine {
    controller: PlaybackController,
    events: flume::Receiver<EngineEvent>,
}

impl Engine {
    pub fn new(
        inbox: EngineInbox,
        store: Arc<SessionStore>,
        backends: Backends,
        persistence: SnapshotWriter,
        settings: PlayerSettings,
    ) -> Self {
        let controller = PlaybackController::new(store, backends, persistence, inbox.tx, settings);
        Self {
            controller,
            events: inbox.rx,
        }
    }

    /// Procesa eventos en orden de llegada hasta que se cancele `shutdown`.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("🎛️ Bucle de control iniciado");

        loop {
            tokio::select! {
                event = self.events.recv_async() => match event {
                    Ok(event) => self.controller.handle(event).await,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        self.controller.persist_all();
        info!(
            "🛑 Bucle de control detenido ({} sesiones guardadas)",
            self.controller.store().len()
        );
    }
}

/// Punto de entrada del motor para los comandos. Barato de clonar.
#[derive(Clone)]
pub struct EngineHandle {
    tx: flume::Sender<EngineEvent>,
    store: Arc<SessionStore>,
}

impl EngineHandle {
    pub async fn enqueue(
        &self,
        guild: GuildKey,
        voice_channel: ChannelKey,
        query: impl Into<String>,
        requested_by: Option<u64>,
        origin: Option<ChannelKey>,
    ) -> Result<EnqueueOutcome, EngineError> {
        let query = query.into();
        self.request(|reply| Command::Enqueue {
            guild,
            voice_channel,
            query,
            requested_by,
            origin,
            reply,
        })
        .await
    }

    pub async fn join(
        &self,
        guild: GuildKey,
        voice_channel: ChannelKey,
        origin: Option<ChannelKey>,
    ) -> Result<(), EngineError> {
        self.request(|reply| Command::Join {
            guild,
            voice_channel,
            origin,
            reply,
        })
        .await
    }

    pub async fn leave(&self, guild: GuildKey) -> Result<(), EngineError> {
        self.request(|reply| Command::Leave { guild, reply }).await
    }

    pub async fn pause(&self, guild: GuildKey) -> Result<String, EngineError> {
        self.request(|reply| Command::Pause { guild, reply }).await
    }

    pub async fn resume(&self, guild: GuildKey) -> Result<String, EngineError> {
        self.request(|reply| Command::Resume { guild, reply }).await
    }

    pub async fn skip(&self, guild: GuildKey) -> Result<SkipOutcome, EngineError> {
        self.request(|reply| Command::Skip { guild, reply }).await
    }

    pub async fn stop(&self, guild: GuildKey) -> Result<StopOutcome, EngineError> {
        self.request(|reply| Command::Stop { guild, reply }).await
    }

    pub async fn set_volume(&self, guild: GuildKey, level: i64) -> Result<u8, EngineError> {
        self.request(|reply| Command::SetVolume { guild, level, reply }).await
    }

    /// Estado tras aplicar todo lo que ya estaba en el canal.
    pub async fn status(&self, guild: GuildKey) -> Result<Option<SessionView>, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(Command::Status { guild, reply }))?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Lectura directa del store, sin pasar por el bucle.
    pub fn view(&self, guild: GuildKey) -> Option<SessionView> {
        self.store.view(guild)
    }

    pub fn connection_lost(&self, guild: GuildKey) {
        if self.send(EngineEvent::ConnectionLost { guild }).is_err() {
            debug!("Bucle cerrado, pérdida de conexión ignorada (guild {})", guild);
        }
    }

    pub fn forget(&self, guild: GuildKey) {
        if self.send(EngineEvent::Command(Command::Forget { guild })).is_err() {
            debug!("Bucle cerrado, guild {} no eliminada", guild);
        }
    }

    pub fn restore(&self, snapshots: BTreeMap<GuildKey, PersistedSnapshot>) {
        if snapshots.is_empty() {
            return;
        }
        if self.send(EngineEvent::Restore(snapshots)).is_err() {
            warn!("⚠️ Bucle cerrado, no se pudieron restaurar las sesiones");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(build(reply)))?;
        let result = rx.await.map_err(|_| EngineError::Closed)?;
        Ok(result?)
    }

    fn send(&self, event: EngineEvent) -> Result<(), EngineError> {
        self.tx.send(event).map_err(|_| EngineError::Closed)
    }
}
