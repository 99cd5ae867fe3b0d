use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::warn;

use super::types::{ChannelKey, ConnectionState, GuildKey, PlayState, Track, TrackRequest};

pub const DEFAULT_VOLUME: f32 = 0.5;

/// Fuente de generaciones. Es global para que una sesión recreada tras
/// `forget` nunca reutilice un valor de su encarnación anterior.
static GENERATIONS: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    GENERATIONS.fetch_add(1, Ordering::Relaxed)
}

/// Estado de reproducción de una guild.
///
/// Solo el controlador escribe aquí, siempre desde el bucle de control.
#[derive(Debug, Clone)]
pub struct GuildPlaybackSession {
    pub guild: GuildKey,
    pub connection: ConnectionState,
    pub queue: VecDeque<TrackRequest>,
    pub current: Option<Track>,
    /// Petición en vuelo mientras `play_state == Resolving`.
    pub resolving: Option<TrackRequest>,
    /// Track restaurado de un snapshot que aún no se ha vuelto a reproducir.
    pub resume: Option<TrackRequest>,
    pub play_state: PlayState,
    pub volume: f32,
    pub voice_channel: Option<ChannelKey>,
    pub notify_channel: Option<ChannelKey>,
    pub generation: u64,
    pub connect_attempt: u64,
    pub consecutive_failures: u32,
}

impl GuildPlaybackSession {
    pub fn new(guild: GuildKey, volume: f32) -> Self {
        Self {
            guild,
            connection: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            current: None,
            resolving: None,
            resume: None,
            play_state: PlayState::Idle,
            volume,
            voice_channel: None,
            notify_channel: None,
            generation: 0,
            connect_attempt: 0,
            consecutive_failures: 0,
        }
    }

    pub fn from_snapshot(guild: GuildKey, snapshot: &PersistedSnapshot) -> Self {
        let volume = if snapshot.volume.is_finite() {
            snapshot.volume.clamp(0.0, 1.0)
        } else {
            DEFAULT_VOLUME
        };

        let voice_channel = snapshot.voice_channel_id.as_deref().and_then(|raw| {
            raw.parse::<ChannelKey>()
                .map_err(|e| warn!("Canal de voz inválido '{}' para guild {}: {}", raw, guild, e))
                .ok()
        });

        let mut session = Self::new(guild, volume);
        session.resume = snapshot.current_track_query.clone().map(TrackRequest::restored);
        session.queue = snapshot.queue.iter().cloned().map(TrackRequest::new).collect();
        session.voice_channel = voice_channel;
        session
    }

    /// Query del track "actual" tal y como se persiste: el que suena, el que
    /// se está resolviendo o el pendiente de reanudar.
    pub fn current_query(&self) -> Option<&str> {
        self.current
            .as_ref()
            .map(|track| track.request.query.as_str())
            .or_else(|| self.resolving.as_ref().map(|r| r.query.as_str()))
            .or_else(|| self.resume.as_ref().map(|r| r.query.as_str()))
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            current_track_query: self.current_query().map(str::to_owned),
            queue: self.queue.iter().map(|r| r.query.clone()).collect(),
            volume: self.volume,
            voice_channel_id: self.voice_channel.map(|c| c.to_string()),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            guild: self.guild,
            connection: self.connection,
            play_state: self.play_state,
            current: self.current.clone(),
            resolving: self.resolving.as_ref().map(|r| r.query.clone()),
            queue: self.queue.iter().map(|r| r.query.clone()).collect(),
            volume: self.volume,
            voice_channel: self.voice_channel,
        }
    }

    /// Invalida cualquier resultado asíncrono en vuelo. Monótona por sesión.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation = next_generation();
        self.generation
    }

    /// Invalida cualquier conexión en vuelo.
    pub fn bump_connect_attempt(&mut self) -> u64 {
        self.connect_attempt = next_generation();
        self.connect_attempt
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        match self.play_state {
            PlayState::Playing | PlayState::Paused => {
                if self.current.is_none() {
                    return Err(format!("{:?} sin track actual", self.play_state));
                }
                if self.connection != ConnectionState::Connected {
                    return Err(format!("{:?} con conexión {:?}", self.play_state, self.connection));
                }
            }
            PlayState::Resolving => {
                if self.resolving.is_none() || self.current.is_some() {
                    return Err("Resolving sin petición en vuelo".to_string());
                }
            }
            PlayState::Idle => {
                if self.current.is_some() || self.resolving.is_some() {
                    return Err("Idle con track actual".to_string());
                }
            }
        }

        if !(0.0..=1.0).contains(&self.volume) {
            return Err(format!("volumen fuera de rango: {}", self.volume));
        }

        Ok(())
    }
}

/// Copia de solo lectura para `/queue` y `/nowplaying`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub guild: GuildKey,
    pub connection: ConnectionState,
    pub play_state: PlayState,
    pub current: Option<Track>,
    pub resolving: Option<String>,
    pub queue: Vec<String>,
    pub volume: f32,
    pub voice_channel: Option<ChannelKey>,
}

/// Registro persistido por guild. Nunca incluye URLs de stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSnapshot {
    pub current_track_query: Option<String>,
    pub queue: Vec<String>,
    pub volume: f32,
    pub voice_channel_id: Option<String>,
}
