use serenity::{
    builder::CreateMessage,
    cache::Cache,
    http::Http,
    model::id::{ChannelId, GuildId},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    audio::{
        ports::{Notice, Notifier},
        types::{ChannelKey, GuildKey},
    },
    ui::embeds,
};

/// Publica los avisos del motor como embeds en Discord.
pub struct DiscordNotifier {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    /// Canal del último comando o, si no hay, el canal de sistema de la guild.
    fn target(&self, guild: GuildKey, channel: Option<ChannelKey>) -> Option<ChannelId> {
        channel.map(ChannelId::from).or_else(|| {
            self.cache
                .guild(GuildId::from(guild))
                .and_then(|guild| guild.system_channel_id)
        })
    }
}

impl Notifier for DiscordNotifier {
    fn notify(&self, guild: GuildKey, channel: Option<ChannelKey>, notice: Notice) {
        let Some(target) = self.target(guild, channel) else {
            debug!("Sin canal para avisos en guild {}: {:?}", guild, notice);
            return;
        };

        let http = self.http.clone();
        let message = CreateMessage::new().embed(embeds::create_notice_embed(&notice));
        tokio::spawn(async move {
            if let Err(e) = target.send_message(&*http, message).await {
                warn!("No se pudo enviar aviso a {} (guild {}): {}", target, guild, e);
            }
        });
    }
}
