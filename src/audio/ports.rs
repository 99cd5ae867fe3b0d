//! Colaboradores externos que consume el motor.
//!
//! Las implementaciones reales viven en [`crate::sources`] (resolver),
//! [`crate::voice`] (conexión y salida de audio con songbird) y
//! [`crate::bot::notifier`] (mensajes al canal de texto).

use async_trait::async_trait;

use super::{
    bridge::CompletionSink,
    error::{ConnectionError, PlaybackError, ResolutionError},
    types::{ChannelKey, GuildKey, ResolvedMedia, Track},
};

/// Convierte una búsqueda o un enlace en un stream reproducible.
///
/// Puede tardar segundos; el motor siempre lo invoca desde una tarea aparte.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, query: &str) -> Result<ResolvedMedia, ResolutionError>;
}

/// Salida de audio ligada a la conexión de voz de una guild.
///
/// `start` debe volver rápido: el stream se abre de forma perezosa. El
/// `sink` se invoca exactamente una vez desde el contexto del adaptador
/// cuando el stream termina o falla.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn start(
        &self,
        guild: GuildKey,
        track: &Track,
        volume: f32,
        sink: CompletionSink,
    ) -> Result<Box<dyn OutputHandle>, PlaybackError>;
}

/// Control de una salida activa.
pub trait OutputHandle: Send + Sync {
    fn set_volume(&self, volume: f32);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
}

#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(&self, guild: GuildKey, channel: ChannelKey) -> Result<(), ConnectionError>;
    async fn disconnect(&self, guild: GuildKey);
}

/// Avisos asíncronos para el canal que originó el comando.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying { track: Track, resumed: bool },
    TrackFailed { query: String, reason: String },
    GaveUp { failures: u32 },
    ConnectFailed { reason: String },
    ConnectionLost,
}

/// No debe bloquear: se llama desde el bucle de control.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, guild: GuildKey, channel: Option<ChannelKey>, notice: Notice);
}

