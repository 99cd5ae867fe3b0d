//! Adaptadores de songbird: conexión de voz y salida de audio.

pub mod events;

use async_trait::async_trait;
use dashmap::DashSet;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    events::CoreEvent,
    input::{HttpRequest, Input},
    tracks::{Track as SongbirdTrack, TrackHandle},
    Event, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::audio::{
    bridge::CompletionSink,
    engine::EngineHandle,
    error::{ConnectionError, PlaybackError},
    ports::{AudioOutput, OutputHandle, VoiceConnector},
    types::{ChannelKey, GuildKey, Track},
};
use events::{DriverDisconnectHandler, TrackCompletionHandler};

/// Conexiones de voz a través del manager de songbird.
pub struct SongbirdVoice {
    songbird: Arc<Songbird>,
    engine: EngineHandle,
    watched: DashSet<GuildKey>,
}

impl SongbirdVoice {
    pub fn new(songbird: Arc<Songbird>, engine: EngineHandle) -> Self {
        Self {
            songbird,
            engine,
            watched: DashSet::new(),
        }
    }
}

#[async_trait]
impl VoiceConnector for SongbirdVoice {
    async fn connect(&self, guild: GuildKey, channel: ChannelKey) -> Result<(), ConnectionError> {
        match self.songbird.join(GuildId::from(guild), ChannelId::from(channel)).await {
            Ok(call) => {
                // El Call sobrevive entre joins; el handler se registra una vez.
                if self.watched.insert(guild) {
                    call.lock().await.add_global_event(
                        Event::Core(CoreEvent::DriverDisconnect),
                        DriverDisconnectHandler {
                            guild,
                            engine: self.engine.clone(),
                        },
                    );
                }
                info!("🔊 Conectado al canal de voz {} en guild {}", channel, guild);
                Ok(())
            }
            Err(e) => {
                warn!("Error al unirse al canal {} en guild {}: {:?}", channel, guild, e);
                if let Err(e) = self.songbird.remove(GuildId::from(guild)).await {
                    debug!("Nada que limpiar tras el fallo en guild {}: {:?}", guild, e);
                }
                self.watched.remove(&guild);
                Err(ConnectionError::Join(e.to_string()))
            }
        }
    }

    async fn disconnect(&self, guild: GuildKey) {
        self.watched.remove(&guild);
        match self.songbird.remove(GuildId::from(guild)).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", guild),
            Err(e) => debug!("Guild {} ya estaba desconectada: {:?}", guild, e),
        }
    }
}

/// Salida de audio que reproduce la URL de stream en el `Call` de la guild.
pub struct SongbirdOutput {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdOutput {
    pub fn new(songbird: Arc<Songbird>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { songbird, http })
    }
}

#[async_trait]
impl AudioOutput for SongbirdOutput {
    async fn start(
        &self,
        guild: GuildKey,
        track: &Track,
        volume: f32,
        sink: CompletionSink,
    ) -> Result<Box<dyn OutputHandle>, PlaybackError> {
        let call = self
            .songbird
            .get(GuildId::from(guild))
            .ok_or_else(|| PlaybackError::Start("no hay conexión de voz".to_string()))?;

        let input = Input::from(HttpRequest::new(self.http.clone(), track.stream_url.clone()));
        let handle = {
            let mut call = call.lock().await;
            call.play(SongbirdTrack::new(input).volume(volume))
        };

        for event in [TrackEvent::End, TrackEvent::Error] {
            if let Err(e) = handle.add_event(Event::Track(event), TrackCompletionHandler { sink: sink.clone() }) {
                let _ = handle.stop();
                return Err(PlaybackError::Start(format!("{:?}", e)));
            }
        }

        Ok(Box::new(SongbirdOutputHandle(handle)))
    }
}

struct SongbirdOutputHandle(TrackHandle);

impl OutputHandle for SongbirdOutputHandle {
    fn set_volume(&self, volume: f32) {
        if let Err(e) = self.0.set_volume(volume) {
            debug!("No se pudo ajustar el volumen: {:?}", e);
        }
    }

    fn pause(&self) {
        if let Err(e) = self.0.pause() {
            debug!("No se pudo pausar: {:?}", e);
        }
    }

    fn resume(&self) {
        if let Err(e) = self.0.play() {
            debug!("No se pudo reanudar: {:?}", e);
        }
    }

    fn stop(&self) {
        if let Err(e) = self.0.stop() {
            debug!("El track ya había terminado: {:?}", e);
        }
    }
}
