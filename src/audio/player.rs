use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use super::{
    bridge::{Command, CompletionSink, EngineEvent, PlaybackOutcome},
    error::{ConnectionError, PlaybackError, ResolutionError, TrackFailure, UserInputError},
    ports::{AudioOutput, Notice, Notifier, OutputHandle, TrackResolver, VoiceConnector},
    session::{GuildPlaybackSession, PersistedSnapshot, SessionView},
    store::{SessionHandle, SessionStore},
    types::{ChannelKey, ConnectionState, GuildKey, PlayState, ResolvedMedia, Track, TrackRequest},
};
use crate::storage::SnapshotWriter;

/// Parámetros del controlador que vienen de la configuración.
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub max_consecutive_failures: u32,
    pub disconnect_on_give_up: bool,
    pub resolver_workers: usize,
    /// Tope para que la salida de audio arranque; mientras tanto el bucle espera.
    pub output_start_timeout: Duration,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            disconnect_on_give_up: false,
            resolver_workers: num_cpus::get(),
            output_start_timeout: Duration::from_secs(10),
        }
    }
}

/// Implementaciones concretas de los colaboradores externos.
#[derive(Clone)]
pub struct Backends {
    pub resolver: Arc<dyn TrackResolver>,
    pub output: Arc<dyn AudioOutput>,
    pub voice: Arc<dyn VoiceConnector>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub query: String,
    /// Posición dentro de la cola de espera (1 = siguiente).
    pub position: usize,
    pub starting: bool,
}

impl fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.starting {
            write!(f, "🎵 Preparando: **{}**", self.query)
        } else {
            write!(f, "➕ Agregado a la cola en la posición {}: **{}**", self.position, self.query)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipOutcome {
    /// `None` cuando no sonaba nada y solo se reanudó la cola.
    pub skipped: Option<String>,
    pub next: Option<String>,
}

impl fmt::Display for SkipOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.skipped {
            Some(skipped) => write!(f, "⏭️ Saltado: **{}**", skipped)?,
            None => write!(f, "▶️ Reanudando la cola")?,
        }
        match &self.next {
            Some(next) => write!(f, "\nSiguiente: {}", next),
            None => write!(f, "\nLa cola está vacía"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopOutcome {
    pub cleared: usize,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "⏹️ Reproducción detenida y cola limpiada ({} canciones eliminadas)",
            self.cleared
        )
    }
}

/// Máquina de estados de reproducción.
///
/// Vive dentro del bucle de control y es el único escritor de sesiones. El
/// trabajo lento (resolver, conexión de voz) se lanza en tareas aparte y su
/// resultado vuelve como [`EngineEvent`] etiquetado con la generación o el
/// intento de conexión vigentes al lanzarlo.
pub struct PlaybackController {
    store: Arc<SessionStore>,
    resolver: Arc<dyn TrackResolver>,
    output: Arc<dyn AudioOutput>,
    voice: Arc<dyn VoiceConnector>,
    notifier: Arc<dyn Notifier>,
    persistence: SnapshotWriter,
    events: flume::Sender<EngineEvent>,
    resolve_permits: Arc<Semaphore>,
    outputs: HashMap<GuildKey, Box<dyn OutputHandle>>,
    settings: PlayerSettings,
}

impl PlaybackController {
    pub fn new(
        store: Arc<SessionStore>,
        backends: Backends,
        persistence: SnapshotWriter,
        events: flume::Sender<EngineEvent>,
        settings: PlayerSettings,
    ) -> Self {
        let workers = settings.resolver_workers.max(1);
        Self {
            store,
            resolver: backends.resolver,
            output: backends.output,
            voice: backends.voice,
            notifier: backends.notifier,
            persistence,
            events,
            resolve_permits: Arc::new(Semaphore::new(workers)),
            outputs: HashMap::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Command(command) => self.handle_command(command),
            EngineEvent::Connected {
                guild,
                attempt,
                channel,
                auto_resume,
                result,
            } => self.on_connected(guild, attempt, channel, auto_resume, result),
            EngineEvent::Resolved {
                guild,
                generation,
                result,
            } => self.on_resolved(guild, generation, result).await,
            EngineEvent::Completed {
                guild,
                generation,
                outcome,
            } => self.on_completed(guild, generation, outcome),
            EngineEvent::ConnectionLost { guild } => self.connection_lost(guild),
            EngineEvent::Restore(snapshots) => self.restore(snapshots),
        }
    }

    fn handle_command(&mut self, command: Command) {
        // Si quien preguntó ya no espera la respuesta, el cambio se aplica igual.
        match command {
            Command::Enqueue {
                guild,
                voice_channel,
                query,
                requested_by,
                origin,
                reply,
            } => {
                let _ = reply.send(self.enqueue(guild, voice_channel, &query, requested_by, origin));
            }
            Command::Join {
                guild,
                voice_channel,
                origin,
                reply,
            } => {
                let _ = reply.send(self.join(guild, voice_channel, origin));
            }
            Command::Leave { guild, reply } => {
                let _ = reply.send(self.leave(guild));
            }
            Command::Pause { guild, reply } => {
                let _ = reply.send(self.pause(guild));
            }
            Command::Resume { guild, reply } => {
                let _ = reply.send(self.resume(guild));
            }
            Command::Skip { guild, reply } => {
                let _ = reply.send(self.skip(guild));
            }
            Command::Stop { guild, reply } => {
                let _ = reply.send(self.stop(guild));
            }
            Command::SetVolume { guild, level, reply } => {
                let _ = reply.send(self.set_volume(guild, level));
            }
            Command::Status { guild, reply } => {
                let _ = reply.send(self.status(guild));
            }
            Command::Forget { guild } => self.forget(guild),
        }
    }

    /// Agrega una petición al final de la cola y arranca lo que haga falta.
    pub fn enqueue(
        &mut self,
        guild: GuildKey,
        voice_channel: ChannelKey,
        query: &str,
        requested_by: Option<u64>,
        origin: Option<ChannelKey>,
    ) -> Result<EnqueueOutcome, UserInputError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(UserInputError::EmptyQuery);
        }

        let mut request = TrackRequest::new(query);
        if let Some(user) = requested_by {
            request = request.with_requester(user);
        }

        let handle = self.store.get_or_create(guild);
        let (outcome, connect, advance) = {
            let mut session = handle.write();
            if origin.is_some() {
                session.notify_channel = origin;
            }

            session.queue.push_back(request);
            let position = session.queue.len();
            let outcome = EnqueueOutcome {
                query: query.to_string(),
                position,
                starting: session.play_state == PlayState::Idle
                    && position == 1
                    && session.resume.is_none(),
            };

            let mut connect = None;
            let mut advance = false;
            match (session.connection, session.play_state) {
                (ConnectionState::Disconnected, _) => {
                    connect = Some(session.bump_connect_attempt());
                    session.connection = ConnectionState::Connecting;
                }
                (ConnectionState::Connected, PlayState::Idle) => {
                    session.consecutive_failures = 0;
                    advance = true;
                }
                _ => {}
            }
            (outcome, connect, advance)
        };

        info!("➕ Agregado a la cola de guild {}: {}", guild, query);

        if let Some(attempt) = connect {
            self.spawn_connect(guild, attempt, voice_channel, false);
        }
        self.persist(guild);
        if advance {
            self.advance(guild);
        }

        Ok(outcome)
    }

    /// Saca la cabeza de la cola y la manda a resolver. Solo actúa en Idle
    /// con la conexión lista.
    pub fn advance(&mut self, guild: GuildKey) {
        let Some(handle) = self.store.get(guild) else {
            return;
        };

        let (generation, query) = {
            let mut session = handle.write();
            if session.play_state != PlayState::Idle || session.connection != ConnectionState::Connected {
                return;
            }

            if let Some(resume) = session.resume.take() {
                session.queue.push_front(resume);
            }

            let Some(request) = session.queue.pop_front() else {
                debug!("📭 Cola vacía en guild {}", guild);
                return;
            };

            let generation = session.bump_generation();
            let query = request.query.clone();
            session.resolving = Some(request);
            session.play_state = PlayState::Resolving;
            (generation, query)
        };

        debug!("🔍 Resolviendo '{}' para guild {} (generación {})", query, guild, generation);
        self.persist(guild);
        self.spawn_resolution(guild, generation, query);
    }

    pub fn pause(&mut self, guild: GuildKey) -> Result<String, UserInputError> {
        let handle = self.store.get(guild).ok_or(UserInputError::NotPlaying)?;
        let title = {
            let mut session = handle.write();
            match session.play_state {
                PlayState::Playing => {
                    session.play_state = PlayState::Paused;
                    session.current.as_ref().map(|t| t.title.clone()).unwrap_or_default()
                }
                PlayState::Paused => return Err(UserInputError::AlreadyPaused),
                PlayState::Idle | PlayState::Resolving => return Err(UserInputError::NotPlaying),
            }
        };

        if let Some(output) = self.outputs.get(&guild) {
            output.pause();
        }
        info!("⏸️ Pausado en guild {}", guild);
        Ok(title)
    }

    pub fn resume(&mut self, guild: GuildKey) -> Result<String, UserInputError> {
        let handle = self.store.get(guild).ok_or(UserInputError::NotPaused)?;
        let title = {
            let mut session = handle.write();
            if session.play_state != PlayState::Paused {
                return Err(UserInputError::NotPaused);
            }
            session.play_state = PlayState::Playing;
            session.current.as_ref().map(|t| t.title.clone()).unwrap_or_default()
        };

        if let Some(output) = self.outputs.get(&guild) {
            output.resume();
        }
        info!("▶️ Reanudado en guild {}", guild);
        Ok(title)
    }

    /// Abandona lo que suena (o se está resolviendo) y pasa al siguiente.
    ///
    /// En Idle con conexión y cola pendiente (por ejemplo tras rendirse por
    /// fallos) solo vuelve a arrancar la cola.
    pub fn skip(&mut self, guild: GuildKey) -> Result<SkipOutcome, UserInputError> {
        let handle = self.store.get(guild).ok_or(UserInputError::NothingPlaying)?;
        let outcome = {
            let mut session = handle.write();
            let skipped = match session.play_state {
                PlayState::Idle => {
                    let waiting = session.resume.is_some() || !session.queue.is_empty();
                    if !waiting || session.connection != ConnectionState::Connected {
                        return Err(UserInputError::NothingPlaying);
                    }
                    None
                }
                PlayState::Resolving => session.resolving.take().map(|r| r.query),
                PlayState::Playing | PlayState::Paused => session.current.take().map(|t| t.title),
            };

            session.bump_generation();
            session.play_state = PlayState::Idle;
            session.consecutive_failures = 0;

            let next = session
                .resume
                .as_ref()
                .or_else(|| session.queue.front())
                .map(|r| r.query.clone());
            SkipOutcome { skipped, next }
        };

        self.stop_output(guild);
        match &outcome.skipped {
            Some(skipped) => info!("⏭️ Saltado en guild {}: {}", guild, skipped),
            None => info!("▶️ Cola reanudada en guild {}", guild),
        }
        self.persist(guild);
        self.advance(guild);
        Ok(outcome)
    }

    /// Detiene todo y vacía la cola. La conexión de voz sigue abierta.
    ///
    /// En Idle solo falla si tampoco hay nada esperando en la cola.
    pub fn stop(&mut self, guild: GuildKey) -> Result<StopOutcome, UserInputError> {
        let handle = self.store.get(guild).ok_or(UserInputError::NothingPlaying)?;
        let cleared = {
            let mut session = handle.write();
            let waiting = session.resume.is_some() || !session.queue.is_empty();
            if session.play_state == PlayState::Idle && !waiting {
                return Err(UserInputError::NothingPlaying);
            }

            session.bump_generation();
            let cleared = session.queue.len();
            session.queue.clear();
            session.current = None;
            session.resolving = None;
            session.resume = None;
            session.play_state = PlayState::Idle;
            cleared
        };

        self.stop_output(guild);
        info!("⏹️ Reproducción detenida en guild {}", guild);
        self.persist(guild);
        Ok(StopOutcome { cleared })
    }

    pub fn set_volume(&mut self, guild: GuildKey, level: i64) -> Result<u8, UserInputError> {
        let level = u8::try_from(level)
            .ok()
            .filter(|level| *level <= 100)
            .ok_or(UserInputError::VolumeOutOfRange(level))?;
        let volume = f32::from(level) / 100.0;

        let handle = self.store.get_or_create(guild);
        handle.write().volume = volume;

        if let Some(output) = self.outputs.get(&guild) {
            output.set_volume(volume);
        }
        info!("🔊 Volumen de guild {} ajustado a {}%", guild, level);
        self.persist(guild);
        Ok(level)
    }

    /// Conecta sin encolar nada.
    pub fn join(
        &mut self,
        guild: GuildKey,
        voice_channel: ChannelKey,
        origin: Option<ChannelKey>,
    ) -> Result<(), UserInputError> {
        let handle = self.store.get_or_create(guild);
        let attempt = {
            let mut session = handle.write();
            if session.connection != ConnectionState::Disconnected {
                return Err(UserInputError::AlreadyConnected);
            }
            if origin.is_some() {
                session.notify_channel = origin;
            }
            session.connection = ConnectionState::Connecting;
            session.bump_connect_attempt()
        };

        self.spawn_connect(guild, attempt, voice_channel, false);
        Ok(())
    }

    /// Sale del canal de voz. La cola se conserva para un `join` posterior.
    pub fn leave(&mut self, guild: GuildKey) -> Result<(), UserInputError> {
        let handle = self.store.get(guild).ok_or(UserInputError::NotConnected)?;
        if handle.read().connection == ConnectionState::Disconnected {
            return Err(UserInputError::NotConnected);
        }

        self.disconnect(guild, &handle);
        info!("👋 Desconectado del canal de voz en guild {}", guild);
        self.persist(guild);
        Ok(())
    }

    pub fn status(&self, guild: GuildKey) -> Option<SessionView> {
        self.store.view(guild)
    }

    /// La conexión de voz se cayó sin que nadie lo pidiera.
    ///
    /// Lo que sonaba vuelve a la cabeza de la cola y la sesión queda
    /// desconectada a la espera de un nuevo `join` o `play`.
    pub fn connection_lost(&mut self, guild: GuildKey) {
        let Some(handle) = self.store.get(guild) else {
            return;
        };

        let channel = {
            let mut session = handle.write();
            if session.connection != ConnectionState::Connected {
                return;
            }

            session.bump_generation();
            session.bump_connect_attempt();
            let interrupted = session
                .current
                .take()
                .map(|track| track.request)
                .or_else(|| session.resolving.take());
            if let Some(request) = interrupted {
                session.queue.push_front(request);
            }
            session.play_state = PlayState::Idle;
            session.connection = ConnectionState::Disconnected;
            session.notify_channel
        };

        self.stop_output(guild);
        warn!("🔌 Conexión de voz perdida en guild {}", guild);
        self.notifier.notify(guild, channel, Notice::ConnectionLost);
        self.persist(guild);
    }

    /// El bot salió de la guild: se descarta la sesión y su registro.
    pub fn forget(&mut self, guild: GuildKey) {
        self.stop_output(guild);
        if let Some(handle) = self.store.remove(guild) {
            handle.write().bump_generation();
            info!("🗑️ Sesión de guild {} eliminada", guild);
        }
        self.persistence.delete(guild);
    }

    /// Reconstruye sesiones desde disco y reconecta las que tenían canal.
    pub fn restore(&mut self, snapshots: BTreeMap<GuildKey, PersistedSnapshot>) {
        let total = snapshots.len();
        for (guild, snapshot) in snapshots {
            let session = GuildPlaybackSession::from_snapshot(guild, &snapshot);
            let channel = session.voice_channel;

            let Some(handle) = self.store.insert_restored(session) else {
                warn!("⚠️ Guild {} ya tiene una sesión activa, se ignora el snapshot", guild);
                continue;
            };

            if let Some(channel) = channel {
                let attempt = {
                    let mut session = handle.write();
                    session.connection = ConnectionState::Connecting;
                    session.bump_connect_attempt()
                };
                self.spawn_connect(guild, attempt, channel, true);
            }
        }
        info!("📂 {} sesiones restauradas", total);
    }

    /// Guarda todas las sesiones. Se usa al apagar.
    pub fn persist_all(&self) {
        for (guild, snapshot) in self.store.snapshot_all() {
            self.persistence.submit(guild, snapshot);
        }
    }

    fn on_connected(
        &mut self,
        guild: GuildKey,
        attempt: u64,
        channel: ChannelKey,
        auto_resume: bool,
        result: Result<(), ConnectionError>,
    ) {
        let Some(handle) = self.store.get(guild) else {
            if result.is_ok() {
                self.spawn_disconnect(guild);
            }
            return;
        };

        let notify_channel = {
            let mut session = handle.write();
            if session.connect_attempt != attempt || session.connection != ConnectionState::Connecting {
                debug!("Resultado de conexión obsoleto descartado (guild {})", guild);
                // Un `leave` llegó antes de que terminara el join: deshacerlo.
                let abandoned = session.connection == ConnectionState::Disconnected;
                drop(session);
                if result.is_ok() && abandoned {
                    self.spawn_disconnect(guild);
                }
                return;
            }

            match result {
                Ok(()) => {
                    session.connection = ConnectionState::Connected;
                    session.voice_channel = Some(channel);
                }
                Err(_) => session.connection = ConnectionState::Disconnected,
            }
            session.notify_channel
        };

        match result {
            Ok(()) => {
                info!("🔊 Conectado al canal {} en guild {}", channel, guild);
                self.persist(guild);
                self.advance(guild);
            }
            Err(e) if auto_resume => {
                warn!("⚠️ No se pudo reanudar guild {} en el canal {}: {}", guild, channel, e);
            }
            Err(e) => {
                warn!("❌ Error conectando a canal de voz en guild {}: {}", guild, e);
                self.notifier.notify(
                    guild,
                    notify_channel,
                    Notice::ConnectFailed { reason: e.to_string() },
                );
            }
        }
    }

    async fn on_resolved(
        &mut self,
        guild: GuildKey,
        generation: u64,
        result: Result<ResolvedMedia, ResolutionError>,
    ) {
        let Some(handle) = self.store.get(guild) else {
            return;
        };

        let pending = {
            let session = handle.read();
            if session.generation != generation || session.play_state != PlayState::Resolving {
                debug!("Resolución obsoleta descartada (guild {}, generación {})", guild, generation);
                return;
            }
            session.resolving.clone().map(|request| (request, session.volume))
        };
        let Some((request, volume)) = pending else {
            return;
        };

        let media = match result {
            Ok(media) => media,
            Err(e) => return self.fail_resolving(guild, &handle, e.into()),
        };

        let track = Track::from_media(request, media);
        let sink = CompletionSink::new(guild, generation, self.events.clone());

        let deadline = self.settings.output_start_timeout;
        let started = tokio::time::timeout(deadline, self.output.start(guild, &track, volume, sink))
            .await
            .unwrap_or_else(|_| Err(PlaybackError::Start(format!("la salida no arrancó en {:?}", deadline))));

        match started {
            Ok(output) => {
                let channel = {
                    let mut session = handle.write();
                    session.resolving = None;
                    session.current = Some(track.clone());
                    session.play_state = PlayState::Playing;
                    session.consecutive_failures = 0;
                    session.notify_channel
                };

                if let Some(previous) = self.outputs.insert(guild, output) {
                    previous.stop();
                }

                info!("🎵 Reproduciendo en guild {}: {}", guild, track.title);
                let resumed = track.request.restored;
                self.notifier.notify(guild, channel, Notice::NowPlaying { track, resumed });
                self.persist(guild);
            }
            Err(e) => self.fail_resolving(guild, &handle, e.into()),
        }
    }

    fn on_completed(&mut self, guild: GuildKey, generation: u64, outcome: PlaybackOutcome) {
        let Some(handle) = self.store.get(guild) else {
            return;
        };

        let finished = {
            let mut session = handle.write();
            if session.generation != generation
                || !matches!(session.play_state, PlayState::Playing | PlayState::Paused)
            {
                debug!("Fin de track obsoleto descartado (guild {}, generación {})", guild, generation);
                return;
            }
            session.play_state = PlayState::Idle;
            session.current.take()
        };
        self.outputs.remove(&guild);

        let query = finished.map(|track| track.request.query).unwrap_or_default();
        match outcome {
            PlaybackOutcome::Ended => {
                debug!("✅ Track terminado en guild {}: {}", guild, query);
                handle.write().consecutive_failures = 0;
                self.persist(guild);
                self.advance(guild);
            }
            PlaybackOutcome::Error(reason) => {
                self.register_failure(guild, query, PlaybackError::Stream(reason).into());
            }
        }
    }

    fn fail_resolving(&mut self, guild: GuildKey, handle: &SessionHandle, failure: TrackFailure) {
        let query = {
            let mut session = handle.write();
            session.play_state = PlayState::Idle;
            session.resolving.take().map(|r| r.query).unwrap_or_default()
        };
        self.register_failure(guild, query, failure);
    }

    /// Política de reintentos acotada: avisa del fallo, y pasa al siguiente
    /// hasta llegar a `max_consecutive_failures`.
    fn register_failure(&mut self, guild: GuildKey, query: String, failure: TrackFailure) {
        warn!("⚠️ Fallo con '{}' en guild {}: {}", query, guild, failure);
        let Some(handle) = self.store.get(guild) else {
            return;
        };

        let (failures, channel) = {
            let mut session = handle.write();
            session.consecutive_failures += 1;
            (session.consecutive_failures, session.notify_channel)
        };

        self.notifier.notify(
            guild,
            channel,
            Notice::TrackFailed {
                query,
                reason: failure.to_string(),
            },
        );

        if failures >= self.settings.max_consecutive_failures {
            error!(
                "❌ {} fallos consecutivos en guild {}, se detiene el avance automático",
                failures, guild
            );
            handle.write().consecutive_failures = 0;
            self.notifier.notify(guild, channel, Notice::GaveUp { failures });
            if self.settings.disconnect_on_give_up {
                self.disconnect(guild, &handle);
            }
            self.persist(guild);
            return;
        }

        self.persist(guild);
        self.advance(guild);
    }

    fn disconnect(&mut self, guild: GuildKey, handle: &SessionHandle) {
        {
            let mut session = handle.write();
            session.bump_generation();
            session.bump_connect_attempt();
            session.current = None;
            session.resolving = None;
            session.play_state = PlayState::Idle;
            session.connection = ConnectionState::Disconnected;
            session.voice_channel = None;
        }
        self.stop_output(guild);
        self.spawn_disconnect(guild);
    }

    fn spawn_disconnect(&self, guild: GuildKey) {
        let voice = self.voice.clone();
        tokio::spawn(async move { voice.disconnect(guild).await });
    }

    fn stop_output(&mut self, guild: GuildKey) {
        if let Some(output) = self.outputs.remove(&guild) {
            output.stop();
        }
    }

    fn spawn_connect(&self, guild: GuildKey, attempt: u64, channel: ChannelKey, auto_resume: bool) {
        let voice = self.voice.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = voice.connect(guild, channel).await;
            let _ = events.send(EngineEvent::Connected {
                guild,
                attempt,
                channel,
                auto_resume,
                result,
            });
        });
    }

    fn spawn_resolution(&self, guild: GuildKey, generation: u64, query: String) {
        let resolver = self.resolver.clone();
        let permits = self.resolve_permits.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(_permit) => resolver.resolve(&query).await,
                Err(_) => Err(ResolutionError::NetworkFailure("pool de resolución cerrado".to_string())),
            };
            let _ = events.send(EngineEvent::Resolved {
                guild,
                generation,
                result,
            });
        });
    }

    fn persist(&self, guild: GuildKey) {
        if let Some(handle) = self.store.get(guild) {
            let snapshot = handle.read().snapshot();
            self.persistence.submit(guild, snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            ports::MockNotifier,
            testing::{self, Fakes},
        },
        storage::WriteOp,
    };
    use mockall::predicate::always;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const GUILD: GuildKey = GuildKey(100);
    const VOICE: ChannelKey = ChannelKey(42);
    const TEXT: ChannelKey = ChannelKey(7);

    /// Deja correr las tareas lanzadas y aplica sus eventos.
    async fn settle(controller: &mut PlaybackController, rx: &flume::Receiver<EngineEvent>) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
            while let Ok(event) = rx.try_recv() {
                controller.handle(event).await;
            }
        }
    }

    fn session(controller: &PlaybackController) -> GuildPlaybackSession {
        controller.store.get(GUILD).unwrap().read().clone()
    }

    fn queue_of(controller: &PlaybackController) -> Vec<String> {
        session(controller).queue.iter().map(|r| r.query.clone()).collect()
    }

    async fn playing(query: &str) -> (PlaybackController, flume::Receiver<EngineEvent>, Fakes) {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        controller.enqueue(GUILD, VOICE, query, None, Some(TEXT)).unwrap();
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).play_state, PlayState::Playing);
        (controller, rx, fakes)
    }

    #[tokio::test]
    async fn first_enqueue_connects_and_plays() {
        let (controller, _rx, fakes) = playing("song1").await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Connected);
        assert_eq!(s.current.as_ref().unwrap().title, testing::media_for("song1").title);
        assert_eq!(s.volume, 0.5);
        assert_eq!(fakes.voice.connects(), vec![(GUILD, VOICE)]);

        let started = fakes.output.last().unwrap();
        assert_eq!(started.stream_url, "https://stream.example/song1");
        assert_eq!(started.volume(), 0.5);
        assert!(matches!(
            fakes.notices.notices().as_slice(),
            [Notice::NowPlaying { resumed: false, .. }]
        ));
    }

    #[tokio::test]
    async fn enqueue_is_fifo_and_reports_position() {
        let (mut controller, rx, fakes) = playing("song1").await;

        let second = controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        let third = controller.enqueue(GUILD, VOICE, "song3", None, None).unwrap();
        assert_eq!((second.position, second.starting), (1, false));
        assert_eq!((third.position, third.starting), (2, false));
        assert_eq!(queue_of(&controller), vec!["song2", "song3"]);

        fakes.output.last().unwrap().finish();
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
        assert_eq!(queue_of(&controller), vec!["song3"]);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_creating_state() {
        let (mut controller, _rx, _fakes) = testing::controller(PlayerSettings::default());
        assert_eq!(
            controller.enqueue(GUILD, VOICE, "   ", None, None),
            Err(UserInputError::EmptyQuery)
        );
        assert!(controller.store.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn pause_is_idempotent() {
        let (mut controller, _rx, fakes) = playing("song1").await;

        assert!(controller.pause(GUILD).is_ok());
        assert_eq!(controller.pause(GUILD), Err(UserInputError::AlreadyPaused));
        assert_eq!(session(&controller).play_state, PlayState::Paused);
        assert_eq!(fakes.output.last().unwrap().pauses(), 1);

        assert!(controller.resume(GUILD).is_ok());
        assert_eq!(controller.resume(GUILD), Err(UserInputError::NotPaused));
        assert_eq!(session(&controller).play_state, PlayState::Playing);
    }

    #[tokio::test]
    async fn stop_when_idle_reports_nothing_playing() {
        let (mut controller, _rx, _fakes) = testing::controller(PlayerSettings::default());
        assert_eq!(controller.stop(GUILD), Err(UserInputError::NothingPlaying));
        assert_eq!(controller.skip(GUILD), Err(UserInputError::NothingPlaying));
        assert_eq!(controller.pause(GUILD), Err(UserInputError::NotPlaying));
    }

    // Escenario: encolar durante la reproducción y luego saltar.
    #[tokio::test]
    async fn skip_plays_next_request() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        let first = fakes.output.last().unwrap();

        let outcome = controller.skip(GUILD).unwrap();
        assert_eq!(outcome.skipped, Some(testing::media_for("song1").title));
        assert_eq!(outcome.next.as_deref(), Some("song2"));
        assert!(first.is_stopped());

        settle(&mut controller, &rx).await;
        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Playing);
        assert_eq!(s.current.unwrap().request.query, "song2");
        assert!(s.queue.is_empty());
    }

    // Escenario: volumen inválido y válido con salida activa.
    #[tokio::test]
    async fn volume_is_validated_and_applied_live() {
        let (mut controller, _rx, fakes) = playing("song1").await;

        assert_eq!(
            controller.set_volume(GUILD, 150),
            Err(UserInputError::VolumeOutOfRange(150))
        );
        assert_eq!(
            controller.set_volume(GUILD, -1),
            Err(UserInputError::VolumeOutOfRange(-1))
        );
        assert_eq!(session(&controller).volume, 0.5);

        assert_eq!(controller.set_volume(GUILD, 30), Ok(30));
        assert_eq!(session(&controller).volume, 0.3);
        assert_eq!(fakes.output.last().unwrap().volume(), 0.3);
    }

    #[tokio::test]
    async fn stop_clears_queue_but_keeps_connection() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        controller.enqueue(GUILD, VOICE, "song3", None, None).unwrap();

        assert_eq!(controller.stop(GUILD), Ok(StopOutcome { cleared: 2 }));
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Idle);
        assert_eq!(s.connection, ConnectionState::Connected);
        assert!(s.queue.is_empty() && s.current.is_none());
        assert!(fakes.output.last().unwrap().is_stopped());
        assert!(fakes.voice.disconnects().is_empty());
    }

    #[tokio::test]
    async fn stale_resolution_after_skip_is_discarded() {
        let (mut controller, rx, fakes) = playing("song1").await;
        let gate = fakes.resolver.gate("slow");
        controller.enqueue(GUILD, VOICE, "slow", None, None).unwrap();
        controller.enqueue(GUILD, VOICE, "song3", None, None).unwrap();

        fakes.output.last().unwrap().finish();
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).play_state, PlayState::Resolving);

        let outcome = controller.skip(GUILD).unwrap();
        assert_eq!(outcome.skipped.as_deref(), Some("slow"));
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).current.unwrap().request.query, "song3");

        gate.notify_one();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.current.unwrap().request.query, "song3");
        assert_eq!(fakes.output.started().len(), 2);
    }

    #[tokio::test]
    async fn stale_completion_after_skip_is_discarded() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        controller.enqueue(GUILD, VOICE, "song3", None, None).unwrap();
        let first = fakes.output.last().unwrap();

        controller.skip(GUILD).unwrap();
        settle(&mut controller, &rx).await;

        // El adaptador avisa tarde del track cortado.
        first.finish();
        settle(&mut controller, &rx).await;

        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
        assert_eq!(queue_of(&controller), vec!["song3"]);
    }

    // Escenario: falla el primero, suena el segundo, un único aviso.
    #[tokio::test]
    async fn failed_resolution_advances_with_one_notice() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, _, notice| matches!(notice, Notice::TrackFailed { query, .. } if query == "bad"))
            .times(1)
            .return_const(());
        notifier
            .expect_notify()
            .withf(|_, _, notice| matches!(notice, Notice::NowPlaying { track, .. } if track.request.query == "song2"))
            .times(1)
            .return_const(());

        let (mut controller, rx, fakes) =
            testing::controller_with_notifier(PlayerSettings::default(), Arc::new(notifier));
        fakes.resolver.fail("bad");

        controller.enqueue(GUILD, VOICE, "bad", None, Some(TEXT)).unwrap();
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Playing);
        assert_eq!(s.current.unwrap().request.query, "song2");
        assert_eq!(s.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn gives_up_after_three_failures_and_keeps_queue() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, _, notice| matches!(notice, Notice::TrackFailed { .. }))
            .times(3)
            .return_const(());
        notifier
            .expect_notify()
            .with(always(), always(), mockall::predicate::eq(Notice::GaveUp { failures: 3 }))
            .times(1)
            .return_const(());

        let (mut controller, rx, fakes) =
            testing::controller_with_notifier(PlayerSettings::default(), Arc::new(notifier));
        for query in ["bad1", "bad2", "bad3"] {
            fakes.resolver.fail(query);
            controller.enqueue(GUILD, VOICE, query, None, None).unwrap();
        }
        controller.enqueue(GUILD, VOICE, "song4", None, None).unwrap();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Idle);
        assert_eq!(s.connection, ConnectionState::Connected);
        assert_eq!(queue_of(&controller), vec!["song4"]);
        assert!(fakes.output.started().is_empty());
        assert!(fakes.voice.disconnects().is_empty());
    }

    #[tokio::test]
    async fn give_up_can_disconnect_when_configured() {
        let settings = PlayerSettings {
            max_consecutive_failures: 1,
            disconnect_on_give_up: true,
            ..PlayerSettings::default()
        };
        let (mut controller, rx, fakes) = testing::controller(settings);
        fakes.resolver.fail("bad");
        controller.enqueue(GUILD, VOICE, "bad", None, None).unwrap();
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(s.voice_channel, None);
        assert_eq!(queue_of(&controller), vec!["song2"]);
        assert_eq!(fakes.voice.disconnects(), vec![GUILD]);
    }

    #[tokio::test]
    async fn stream_error_counts_as_failure_and_advances() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();

        fakes.output.last().unwrap().fail("decoder");
        settle(&mut controller, &rx).await;

        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
        assert!(fakes
            .notices
            .notices()
            .iter()
            .any(|n| matches!(n, Notice::TrackFailed { query, .. } if query == "song1")));
    }

    #[tokio::test]
    async fn output_refusing_to_start_is_a_failure() {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        fakes.output.refuse("song1");
        controller.enqueue(GUILD, VOICE, "song1", None, None).unwrap();
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        settle(&mut controller, &rx).await;

        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
        assert_eq!(fakes.output.started().len(), 1);
    }

    /// Tres fallos con "song4" esperando detrás.
    async fn gave_up() -> (PlaybackController, flume::Receiver<EngineEvent>, Fakes) {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        for query in ["bad1", "bad2", "bad3"] {
            fakes.resolver.fail(query);
            controller.enqueue(GUILD, VOICE, query, None, None).unwrap();
        }
        controller.enqueue(GUILD, VOICE, "song4", None, None).unwrap();
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).play_state, PlayState::Idle);
        assert_eq!(queue_of(&controller), vec!["song4"]);
        (controller, rx, fakes)
    }

    #[tokio::test]
    async fn skip_after_give_up_restarts_the_queue() {
        let (mut controller, rx, fakes) = gave_up().await;

        let outcome = controller.skip(GUILD).unwrap();
        assert_eq!(outcome.skipped, None);
        assert_eq!(outcome.next.as_deref(), Some("song4"));
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Playing);
        assert_eq!(s.current.unwrap().request.query, "song4");
        assert_eq!(fakes.output.started().len(), 1);
    }

    #[tokio::test]
    async fn stop_after_give_up_clears_the_queue() {
        let (mut controller, rx, fakes) = gave_up().await;

        assert_eq!(controller.stop(GUILD), Ok(StopOutcome { cleared: 1 }));
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert!(s.queue.is_empty());
        assert_eq!(s.connection, ConnectionState::Connected);
        assert_eq!(controller.stop(GUILD), Err(UserInputError::NothingPlaying));
        assert_eq!(controller.skip(GUILD), Err(UserInputError::NothingPlaying));
        assert!(fakes.output.started().is_empty());
    }

    #[tokio::test]
    async fn stop_while_connecting_cancels_the_pending_request() {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        controller.enqueue(GUILD, VOICE, "song1", None, None).unwrap();
        assert_eq!(session(&controller).connection, ConnectionState::Connecting);

        assert_eq!(controller.stop(GUILD), Ok(StopOutcome { cleared: 1 }));
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Connected);
        assert_eq!(s.play_state, PlayState::Idle);
        assert!(s.queue.is_empty());
        assert!(fakes.resolver.calls().is_empty());
        assert!(fakes.output.started().is_empty());
    }

    #[tokio::test]
    async fn skip_while_connecting_reports_nothing_playing() {
        let (mut controller, _rx, _fakes) = testing::controller(PlayerSettings::default());
        controller.enqueue(GUILD, VOICE, "song1", None, None).unwrap();
        assert_eq!(controller.skip(GUILD), Err(UserInputError::NothingPlaying));
        assert_eq!(queue_of(&controller), vec!["song1"]);
    }

    #[tokio::test]
    async fn output_that_never_starts_times_out_and_advances() {
        let settings = PlayerSettings {
            output_start_timeout: Duration::from_millis(20),
            ..PlayerSettings::default()
        };
        let (mut controller, rx, fakes) = testing::controller(settings);
        fakes.output.hang("song1");
        controller.enqueue(GUILD, VOICE, "song1", None, Some(TEXT)).unwrap();
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        settle(&mut controller, &rx).await;

        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
        assert!(fakes
            .notices
            .notices()
            .iter()
            .any(|n| matches!(n, Notice::TrackFailed { query, .. } if query == "song1")));
    }

    #[tokio::test]
    async fn leave_during_connect_undoes_the_late_join() {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        controller.enqueue(GUILD, VOICE, "song1", None, None).unwrap();

        controller.leave(GUILD).unwrap();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(fakes.voice.connects(), vec![(GUILD, VOICE)]);
        assert_eq!(fakes.voice.disconnects(), vec![GUILD, GUILD]);
        assert!(fakes.output.started().is_empty());
    }

    #[tokio::test]
    async fn connection_loss_requeues_interrupted_track() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();
        let output = fakes.output.last().unwrap();

        controller.connection_lost(GUILD);
        output.finish();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(s.play_state, PlayState::Idle);
        assert_eq!(s.voice_channel, Some(VOICE));
        assert_eq!(queue_of(&controller), vec!["song1", "song2"]);
        assert!(output.is_stopped());
        assert!(fakes.notices.notices().contains(&Notice::ConnectionLost));
    }

    #[tokio::test]
    async fn leave_keeps_queue_and_forgets_channel() {
        let (mut controller, rx, fakes) = playing("song1").await;
        controller.enqueue(GUILD, VOICE, "song2", None, None).unwrap();

        controller.leave(GUILD).unwrap();
        settle(&mut controller, &rx).await;
        assert_eq!(controller.leave(GUILD), Err(UserInputError::NotConnected));

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(s.voice_channel, None);
        assert_eq!(queue_of(&controller), vec!["song2"]);
        assert_eq!(fakes.voice.disconnects(), vec![GUILD]);

        controller.join(GUILD, VOICE, None).unwrap();
        assert_eq!(controller.join(GUILD, VOICE, None), Err(UserInputError::AlreadyConnected));
        settle(&mut controller, &rx).await;
        assert_eq!(session(&controller).current.unwrap().request.query, "song2");
    }

    #[tokio::test]
    async fn failed_connect_notifies_and_keeps_request() {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        fakes.voice.make_unavailable(VOICE);

        controller.enqueue(GUILD, VOICE, "song1", None, Some(TEXT)).unwrap();
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(queue_of(&controller), vec!["song1"]);
        assert!(matches!(
            fakes.notices.notices().as_slice(),
            [Notice::ConnectFailed { .. }]
        ));
    }

    // Escenario: reanudar tras reiniciar.
    #[tokio::test]
    async fn restore_reconnects_and_resumes_current_track() {
        let (mut controller, rx, mut fakes) = testing::controller(PlayerSettings::default());
        let snapshot = PersistedSnapshot {
            current_track_query: Some("song1".into()),
            queue: vec!["song2".into()],
            volume: 0.7,
            voice_channel_id: Some("42".into()),
        };

        controller.restore(BTreeMap::from([(GUILD, snapshot.clone())]));
        assert_eq!(session(&controller).snapshot(), snapshot);
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.play_state, PlayState::Playing);
        assert_eq!(s.current.as_ref().unwrap().request.query, "song1");
        assert_eq!(queue_of(&controller), vec!["song2"]);
        assert_eq!(fakes.output.last().unwrap().volume(), 0.7);
        assert!(matches!(
            fakes.notices.notices().as_slice(),
            [Notice::NowPlaying { resumed: true, .. }]
        ));

        // Lo último escrito sigue describiendo el mismo estado.
        let mut last = None;
        while let Ok(op) = fakes.writes.try_recv() {
            if let WriteOp::Save(guild, snapshot) = op {
                assert_eq!(guild, GUILD);
                last = Some(snapshot);
            }
        }
        assert_eq!(last, Some(snapshot));
    }

    #[tokio::test]
    async fn restore_failure_is_quiet() {
        let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
        fakes.voice.make_unavailable(VOICE);
        let snapshot = PersistedSnapshot {
            current_track_query: Some("song1".into()),
            queue: vec![],
            volume: 0.5,
            voice_channel_id: Some("42".into()),
        };

        controller.restore(BTreeMap::from([(GUILD, snapshot.clone())]));
        settle(&mut controller, &rx).await;

        let s = session(&controller);
        assert_eq!(s.connection, ConnectionState::Disconnected);
        assert_eq!(s.snapshot(), snapshot);
        assert!(fakes.notices.notices().is_empty());
    }

    #[tokio::test]
    async fn forget_drops_session_and_record() {
        let (mut controller, rx, mut fakes) = playing("song1").await;
        let output = fakes.output.last().unwrap();

        controller.forget(GUILD);
        output.finish();
        settle(&mut controller, &rx).await;

        assert!(controller.store.get(GUILD).is_none());
        assert!(output.is_stopped());
        let mut ops = Vec::new();
        while let Ok(op) = fakes.writes.try_recv() {
            ops.push(op);
        }
        assert!(matches!(ops.last(), Some(WriteOp::Delete(GUILD))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue(u8),
        Pause,
        Resume,
        Skip,
        Stop,
        Volume(i64),
        Finish,
        FailStream,
        ConnectionLost,
        Leave,
        Settle,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0u8..6).prop_map(Op::Enqueue),
            1 => Just(Op::Pause),
            1 => Just(Op::Resume),
            1 => Just(Op::Skip),
            1 => Just(Op::Stop),
            1 => (-20i64..130).prop_map(Op::Volume),
            2 => Just(Op::Finish),
            1 => Just(Op::FailStream),
            1 => Just(Op::ConnectionLost),
            1 => Just(Op::Leave),
            3 => Just(Op::Settle),
        ]
    }

    fn assert_consistent(controller: &PlaybackController) {
        if let Some(handle) = controller.store.get(GUILD) {
            let s = handle.read();
            if let Err(violation) = s.check_invariants() {
                panic!("invariante rota: {} en {:?}", violation, *s);
            }
        }
    }

    proptest! {
        #[test]
        fn session_invariants_hold_for_any_command_sequence(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            runtime.block_on(async move {
                let (mut controller, rx, fakes) = testing::controller(PlayerSettings::default());
                fakes.resolver.fail("track-0");

                for op in ops {
                    match op {
                        Op::Enqueue(n) => {
                            controller.enqueue(GUILD, VOICE, &format!("track-{}", n), None, None).unwrap();
                        }
                        Op::Pause => { let _ = controller.pause(GUILD); }
                        Op::Resume => { let _ = controller.resume(GUILD); }
                        Op::Skip => { let _ = controller.skip(GUILD); }
                        Op::Stop => { let _ = controller.stop(GUILD); }
                        Op::Volume(level) => {
                            let result = controller.set_volume(GUILD, level);
                            assert_eq!(result.is_ok(), (0..=100).contains(&level));
                        }
                        Op::Finish => {
                            if let Some(track) = fakes.output.last() { track.finish(); }
                        }
                        Op::FailStream => {
                            if let Some(track) = fakes.output.last() { track.fail("corte"); }
                        }
                        Op::ConnectionLost => controller.connection_lost(GUILD),
                        Op::Leave => { let _ = controller.leave(GUILD); }
                        Op::Settle => {
                            tokio::task::yield_now().await;
                            while let Ok(event) = rx.try_recv() {
                                controller.handle(event).await;
                                assert_consistent(&controller);
                            }
                        }
                    }
                    assert_consistent(&controller);
                }
            });
        }
    }
}
