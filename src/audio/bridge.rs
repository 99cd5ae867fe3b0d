//! Puente entre contextos ajenos y el bucle de control.
//!
//! Todo lo que llega desde fuera del bucle (comandos, resultados del
//! resolver, conexiones, fin de track del adaptador) se convierte en un
//! [`EngineEvent`] y viaja por un único canal `flume`. El bucle es el único
//! que muta sesiones.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::oneshot;
use tracing::debug;

use super::{
    error::{ConnectionError, ResolutionError, UserInputError},
    player::{EnqueueOutcome, SkipOutcome, StopOutcome},
    session::{PersistedSnapshot, SessionView},
    types::{ChannelKey, GuildKey, ResolvedMedia},
};

pub type Reply<T> = oneshot::Sender<Result<T, UserInputError>>;

/// Cómo terminó un stream según el adaptador de audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Ended,
    Error(String),
}

#[derive(Debug)]
pub enum Command {
    Enqueue {
        guild: GuildKey,
        voice_channel: ChannelKey,
        query: String,
        requested_by: Option<u64>,
        origin: Option<ChannelKey>,
        reply: Reply<EnqueueOutcome>,
    },
    Join {
        guild: GuildKey,
        voice_channel: ChannelKey,
        origin: Option<ChannelKey>,
        reply: Reply<()>,
    },
    Leave {
        guild: GuildKey,
        reply: Reply<()>,
    },
    Pause {
        guild: GuildKey,
        reply: Reply<String>,
    },
    Resume {
        guild: GuildKey,
        reply: Reply<String>,
    },
    Skip {
        guild: GuildKey,
        reply: Reply<SkipOutcome>,
    },
    Stop {
        guild: GuildKey,
        reply: Reply<StopOutcome>,
    },
    SetVolume {
        guild: GuildKey,
        level: i64,
        reply: Reply<u8>,
    },
    Status {
        guild: GuildKey,
        reply: oneshot::Sender<Option<SessionView>>,
    },
    Forget {
        guild: GuildKey,
    },
}

#[derive(Debug)]
pub enum EngineEvent {
    Command(Command),
    Connected {
        guild: GuildKey,
        attempt: u64,
        channel: ChannelKey,
        /// Reconexión de arranque: los fallos no se notifican.
        auto_resume: bool,
        result: Result<(), ConnectionError>,
    },
    Resolved {
        guild: GuildKey,
        generation: u64,
        result: Result<ResolvedMedia, ResolutionError>,
    },
    Completed {
        guild: GuildKey,
        generation: u64,
        outcome: PlaybackOutcome,
    },
    ConnectionLost {
        guild: GuildKey,
    },
    Restore(BTreeMap<GuildKey, PersistedSnapshot>),
}

/// Callback de fin de track entregado al adaptador de audio.
///
/// Se puede clonar y llamar desde cualquier hilo. Solo el primer
/// `complete` produce un evento; el resto se ignora.
#[derive(Clone)]
pub struct CompletionSink {
    guild: GuildKey,
    generation: u64,
    tx: flume::Sender<EngineEvent>,
    fired: Arc<AtomicBool>,
}

impl CompletionSink {
    pub fn new(guild: GuildKey, generation: u64, tx: flume::Sender<EngineEvent>) -> Self {
        Self {
            guild,
            generation,
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn guild(&self) -> GuildKey {
        self.guild
    }

    pub fn complete(&self, outcome: PlaybackOutcome) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }

        let event = EngineEvent::Completed {
            guild: self.guild,
            generation: self.generation,
            outcome,
        };

        if self.tx.send(event).is_err() {
            debug!("Bucle de control cerrado, fin de track descartado (guild {})", self.guild);
        }
    }
}

impl std::fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionSink")
            .field("guild", &self.guild)
            .field("generation", &self.generation)
            .field("fired", &self.fired.load(Ordering::Relaxed))
            .finish()
    }
}
