//! # Bot Module
//!
//! Capa de Discord: registra los comandos slash, los traduce a llamadas del
//! [`EngineHandle`] y reenvía al motor los eventos de gateway que afectan a
//! la reproducción (desconexiones de voz, guilds eliminadas).
//!
//! Nada aquí modifica sesiones directamente.

use anyhow::Result;
use parking_lot::Mutex;
use serenity::{
    all::{Context, EventHandler, Guild, GuildId, Interaction, Ready, UnavailableGuild, VoiceState},
    async_trait,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{
    audio::{engine::EngineHandle, session::PersistedSnapshot, types::GuildKey},
    config::Config,
};

pub use notifier::DiscordNotifier;

/// Handler de eventos de Discord.
pub struct GuildJukebox {
    config: Arc<Config>,
    pub engine: EngineHandle,
    /// Snapshots cargados al arrancar; se entregan al motor en el primer `ready`.
    pending_restore: Mutex<Option<BTreeMap<GuildKey, PersistedSnapshot>>>,
}

impl GuildJukebox {
    pub fn new(
        config: Arc<Config>,
        engine: EngineHandle,
        snapshots: BTreeMap<GuildKey, PersistedSnapshot>,
    ) -> Self {
        Self {
            config,
            engine,
            pending_restore: Mutex::new(Some(snapshots)),
        }
    }

    /// Registra los comandos globalmente o en la guild de desarrollo.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica el permiso 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GuildJukebox {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // Solo el primer ready restaura; las reconexiones del gateway no.
        if let Some(snapshots) = self.pending_restore.lock().take() {
            info!("🔄 Restaurando {} sesiones guardadas", snapshots.len());
            self.engine.restore(snapshots);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }

        let was_connected = old.as_ref().and_then(|state| state.channel_id).is_some();
        if let (true, Some(guild_id)) = (was_connected, new.guild_id) {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.engine.connection_lost(GuildKey::from(guild_id));
        }
    }

    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        // `unavailable` indica una caída de Discord, no una expulsión.
        if incomplete.unavailable {
            return;
        }

        info!("🗑️ Eliminado de la guild {}, descartando su sesión", incomplete.id);
        self.engine.forget(GuildKey::from(incomplete.id));
    }
}
