//! Dobles de prueba de los colaboradores del motor.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, Notify};

use super::{
    bridge::{CompletionSink, EngineEvent, PlaybackOutcome},
    error::{ConnectionError, PlaybackError, ResolutionError},
    player::{Backends, PlaybackController, PlayerSettings},
    ports::{AudioOutput, Notice, Notifier, OutputHandle, TrackResolver, VoiceConnector},
    store::SessionStore,
    types::{ChannelKey, GuildKey, ResolvedMedia, Track},
};
use crate::storage::{SnapshotWriter, WriteOp};

pub fn media_for(query: &str) -> ResolvedMedia {
    ResolvedMedia {
        title: format!("Título de {}", query),
        page_url: format!("https://www.youtube.com/watch?v={}", query),
        thumbnail: None,
        stream_url: format!("https://stream.example/{}", query),
        duration: Some(Duration::from_secs(180)),
    }
}

#[derive(Default)]
pub struct FakeResolver {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<String>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeResolver {
    pub fn fail(&self, query: &str) {
        self.failures.lock().insert(query.to_string());
    }

    /// La resolución de `query` espera hasta que se notifique el gate.
    pub fn gate(&self, query: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(query.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedMedia, ResolutionError> {
        self.calls.lock().push(query.to_string());
        let gate = self.gates.lock().get(query).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.failures.lock().contains(query) {
            return Err(ResolutionError::NotFound);
        }
        Ok(media_for(query))
    }
}

/// Una salida iniciada por [`FakeOutput`], con su sink y sus controles.
#[derive(Clone)]
pub struct StartedTrack {
    pub guild: GuildKey,
    pub query: String,
    pub stream_url: String,
    sink: CompletionSink,
    volume: Arc<Mutex<f32>>,
    pauses: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
}

impl StartedTrack {
    pub fn finish(&self) {
        self.sink.complete(PlaybackOutcome::Ended);
    }

    pub fn fail(&self, reason: &str) {
        self.sink.complete(PlaybackOutcome::Error(reason.to_string()));
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    pub fn pauses(&self) -> usize {
        self.pauses.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeOutputHandle(StartedTrack);

impl OutputHandle for FakeOutputHandle {
    fn set_volume(&self, volume: f32) {
        *self.0.volume.lock() = volume;
    }

    fn pause(&self) {
        self.0.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {}

    fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeOutput {
    started: Mutex<Vec<StartedTrack>>,
    refused: Mutex<HashSet<String>>,
    hung: Mutex<HashSet<String>>,
}

impl FakeOutput {
    pub fn refuse(&self, query: &str) {
        self.refused.lock().insert(query.to_string());
    }

    /// `start` nunca termina para esta consulta.
    pub fn hang(&self, query: &str) {
        self.hung.lock().insert(query.to_string());
    }

    pub fn started(&self) -> Vec<StartedTrack> {
        self.started.lock().clone()
    }

    pub fn last(&self) -> Option<StartedTrack> {
        self.started.lock().last().cloned()
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn start(
        &self,
        guild: GuildKey,
        track: &Track,
        volume: f32,
        sink: CompletionSink,
    ) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        if self.refused.lock().contains(&track.request.query) {
            return Err(PlaybackError::Start("salida rechazada".to_string()));
        }
        if self.hung.lock().contains(&track.request.query) {
            return std::future::pending().await;
        }

        let started = StartedTrack {
            guild,
            query: track.request.query.clone(),
            stream_url: track.stream_url.clone(),
            sink,
            volume: Arc::new(Mutex::new(volume)),
            pauses: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
        };
        self.started.lock().push(started.clone());
        Ok(Box::new(FakeOutputHandle(started)))
    }
}

#[derive(Default)]
pub struct FakeVoice {
    unavailable: Mutex<HashSet<ChannelKey>>,
    connects: Mutex<Vec<(GuildKey, ChannelKey)>>,
    disconnects: Mutex<Vec<GuildKey>>,
}

impl FakeVoice {
    pub fn make_unavailable(&self, channel: ChannelKey) {
        self.unavailable.lock().insert(channel);
    }

    pub fn connects(&self) -> Vec<(GuildKey, ChannelKey)> {
        self.connects.lock().clone()
    }

    pub fn disconnects(&self) -> Vec<GuildKey> {
        self.disconnects.lock().clone()
    }
}

#[async_trait]
impl VoiceConnector for FakeVoice {
    async fn connect(&self, guild: GuildKey, channel: ChannelKey) -> Result<(), ConnectionError> {
        self.connects.lock().push((guild, channel));
        if self.unavailable.lock().contains(&channel) {
            return Err(ConnectionError::ChannelUnavailable);
        }
        Ok(())
    }

    async fn disconnect(&self, guild: GuildKey) {
        self.disconnects.lock().push(guild);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(GuildKey, Option<ChannelKey>, Notice)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().iter().map(|(_, _, notice)| notice.clone()).collect()
    }

    pub fn channels(&self) -> Vec<Option<ChannelKey>> {
        self.notices.lock().iter().map(|(_, channel, _)| *channel).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, guild: GuildKey, channel: Option<ChannelKey>, notice: Notice) {
        self.notices.lock().push((guild, channel, notice));
    }
}

pub struct Fakes {
    pub resolver: Arc<FakeResolver>,
    pub output: Arc<FakeOutput>,
    pub voice: Arc<FakeVoice>,
    pub notices: Arc<RecordingNotifier>,
    pub writes: mpsc::UnboundedReceiver<WriteOp>,
}

impl Fakes {
    pub fn new() -> (Self, Backends, SnapshotWriter) {
        let resolver = Arc::new(FakeResolver::default());
        let output = Arc::new(FakeOutput::default());
        let voice = Arc::new(FakeVoice::default());
        let notices = Arc::new(RecordingNotifier::default());
        let (writer, writes) = SnapshotWriter::channel();

        let backends = Backends {
            resolver: resolver.clone(),
            output: output.clone(),
            voice: voice.clone(),
            notifier: notices.clone(),
        };

        let fakes = Self {
            resolver,
            output,
            voice,
            notices,
            writes,
        };
        (fakes, backends, writer)
    }
}

pub fn controller(settings: PlayerSettings) -> (PlaybackController, flume::Receiver<EngineEvent>, Fakes) {
    let (fakes, backends, writer) = Fakes::new();
    let (tx, rx) = flume::unbounded();
    let store = Arc::new(SessionStore::new(0.5));
    (PlaybackController::new(store, backends, writer, tx, settings), rx, fakes)
}

pub fn controller_with_notifier(
    settings: PlayerSettings,
    notifier: Arc<dyn Notifier>,
) -> (PlaybackController, flume::Receiver<EngineEvent>, Fakes) {
    let (fakes, mut backends, writer) = Fakes::new();
    backends.notifier = notifier;
    let (tx, rx) = flume::unbounded();
    let store = Arc::new(SessionStore::new(0.5));
    (PlaybackController::new(store, backends, writer, tx, settings), rx, fakes)
}
