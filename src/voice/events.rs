use serenity::async_trait;
use songbird::{
    tracks::PlayMode, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use tracing::{debug, warn};

use crate::audio::{
    bridge::{CompletionSink, PlaybackOutcome},
    engine::EngineHandle,
    types::GuildKey,
};

/// Handler de fin de track (`TrackEvent::End` y `TrackEvent::Error`).
///
/// Solo reenvía el resultado al bucle de control a través del sink.
pub struct TrackCompletionHandler {
    pub sink: CompletionSink,
}

#[async_trait]
impl VoiceEventHandler for TrackCompletionHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let outcome = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(PlaybackOutcome::Error(format!("{:?}", e))),
                    _ => None,
                })
                .unwrap_or(PlaybackOutcome::Ended),
            _ => PlaybackOutcome::Ended,
        };

        if let PlaybackOutcome::Error(reason) = &outcome {
            warn!("❌ Error en track para guild {}: {}", self.sink.guild(), reason);
        } else {
            debug!("🎵 Track terminó en guild {}", self.sink.guild());
        }

        self.sink.complete(outcome);
        None
    }
}

/// Handler para desconexiones del driver de voz.
pub struct DriverDisconnectHandler {
    pub guild: GuildKey,
    pub engine: EngineHandle,
}

#[async_trait]
impl VoiceEventHandler for DriverDisconnectHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        if let EventContext::DriverDisconnect(data) = ctx {
            warn!(
                "🔌 Driver de voz desconectado en guild {} ({:?})",
                self.guild, data.reason
            );
        }

        self.engine.connection_lost(self.guild);
        None
    }
}
