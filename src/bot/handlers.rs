use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::{
        error::{EngineError, UserInputError},
        types::{ChannelKey, GuildKey},
    },
    bot::GuildJukebox,
    ui::embeds,
};

/// Maneja comandos slash
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &GuildJukebox) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(ctx, &command, "❌ Este comando solo funciona dentro de un servidor", true).await;
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    let guild = GuildKey::from(guild_id);
    let origin = Some(ChannelKey::from(command.channel_id));

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id, origin).await?,
        "join" => handle_join(ctx, &command, bot, guild_id, origin).await?,
        "leave" => {
            let result = bot.engine.leave(guild).await;
            reply(ctx, &command, result.map(|()| "👋 Desconectado del canal de voz".to_string())).await?
        }
        "pause" => {
            let result = bot.engine.pause(guild).await;
            reply(ctx, &command, result.map(|title| format!("⏸️ Pausado: **{}**", title))).await?
        }
        "resume" => {
            let result = bot.engine.resume(guild).await;
            reply(ctx, &command, result.map(|title| format!("▶️ Reanudado: **{}**", title))).await?
        }
        "skip" => {
            let result = bot.engine.skip(guild).await;
            reply(ctx, &command, result.map(|outcome| outcome.to_string())).await?
        }
        "stop" => {
            let result = bot.engine.stop(guild).await;
            reply(ctx, &command, result.map(|outcome| outcome.to_string())).await?
        }
        "volume" => handle_volume(ctx, &command, bot, guild).await?,
        "queue" => match bot.engine.status(guild).await {
            Ok(view) => respond_embed(ctx, &command, embeds::create_queue_embed(view.as_ref())).await?,
            Err(e) => reply(ctx, &command, Err(e)).await?,
        },
        "nowplaying" => {
            let embed = match bot.engine.view(guild).and_then(|view| view.current) {
                Some(track) => embeds::create_now_playing_embed(&track, false),
                None => embeds::create_error_embed("Sin reproducción", &UserInputError::NothingPlaying.to_string()),
            };
            respond_embed(ctx, &command, embed).await?
        }
        _ => respond(ctx, &command, "❌ Comando no reconocido", true).await?,
    }

    Ok(())
}

// Handlers específicos para cada comando

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildJukebox,
    guild_id: GuildId,
    origin: Option<ChannelKey>,
) -> Result<()> {
    let query = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "query")
        .and_then(|opt| opt.value.as_str())
        .unwrap_or_default();

    // Verificar que el usuario esté en un canal de voz
    let Some(voice_channel) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return reply(ctx, command, Err(UserInputError::NotInVoiceChannel.into())).await;
    };

    // Defer la respuesta ya que el motor puede tardar un instante
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let result = bot
        .engine
        .enqueue(
            GuildKey::from(guild_id),
            ChannelKey::from(voice_channel),
            query,
            Some(command.user.id.get()),
            origin,
        )
        .await;

    let edit = match result {
        Ok(outcome) => EditInteractionResponse::new().content(outcome.to_string()),
        Err(e) => EditInteractionResponse::new().content(error_text(&e)),
    };
    command.edit_response(&ctx.http, edit).await?;

    Ok(())
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildJukebox,
    guild_id: GuildId,
    origin: Option<ChannelKey>,
) -> Result<()> {
    let Some(voice_channel) = get_user_voice_channel(ctx, guild_id, command.user.id) else {
        return reply(ctx, command, Err(UserInputError::NotInVoiceChannel.into())).await;
    };

    match bot
        .engine
        .join(GuildKey::from(guild_id), ChannelKey::from(voice_channel), origin)
        .await
    {
        Ok(()) => {
            let embed = embeds::create_success_embed("Conectando", &format!("🔊 Uniéndome a <#{}>", voice_channel));
            respond_embed(ctx, command, embed).await
        }
        Err(e) => reply(ctx, command, Err(e)).await,
    }
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &GuildJukebox,
    guild: GuildKey,
) -> Result<()> {
    let level = command
        .data
        .options
        .iter()
        .find(|opt| opt.name == "level")
        .and_then(|opt| opt.value.as_i64())
        .unwrap_or(-1);

    match bot.engine.set_volume(guild, level).await {
        Ok(level) => respond_embed(ctx, command, embeds::create_volume_embed(level)).await,
        Err(e) => reply(ctx, command, Err(e)).await,
    }
}

// Funciones auxiliares

/// Responde con el resultado del motor. Los errores de usuario son efímeros.
async fn reply(ctx: &Context, command: &CommandInteraction, result: Result<String, EngineError>) -> Result<()> {
    match result {
        Ok(message) => respond(ctx, command, &message, false).await,
        Err(e) => respond(ctx, command, &error_text(&e), true).await,
    }
}

fn error_text(error: &EngineError) -> String {
    if let EngineError::Closed = error {
        warn!("⚠️ Comando recibido con el motor detenido");
    }
    format!("❌ {}", error)
}

async fn respond(ctx: &Context, command: &CommandInteraction, content: &str, ephemeral: bool) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(ephemeral),
            ),
        )
        .await?;
    Ok(())
}

async fn respond_embed(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
