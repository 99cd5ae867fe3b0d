use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{
    ports::Notice,
    session::SessionView,
    types::{ConnectionState, PlayState, Track},
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Jukebox";

/// Canciones listadas en `/queue`.
const QUEUE_PREVIEW: usize = 10;

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track, resumed: bool) -> CreateEmbed {
    let title = if resumed {
        "🔄 Reproducción Reanudada"
    } else {
        "🎵 Reproduciendo Ahora"
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN);

    embed = match track.duration {
        Some(duration) => embed.field("⏱️ Duración", format_duration(duration), true),
        None => embed.field("⏱️ Duración", "🔴 En vivo", true),
    };

    if let Some(user) = track.request.requested_by {
        embed = embed.field("👤 Solicitado por", format!("<@{}>", user), true);
    }

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    if !track.page_url.is_empty() {
        embed = embed.url(&track.page_url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed con el estado de la sesión y las próximas canciones
pub fn create_queue_embed(view: Option<&SessionView>) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now());

    let Some(view) = view.filter(|v| v.current.is_some() || v.resolving.is_some() || !v.queue.is_empty())
    else {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY);
    };

    let mut embed = embed.field(playing_label(view), current_line(view), false);

    if !view.queue.is_empty() {
        let mut description = String::new();
        for (i, query) in view.queue.iter().take(QUEUE_PREVIEW).enumerate() {
            description.push_str(&format!("**{}**. {}\n", i + 1, query));
        }
        if view.queue.len() > QUEUE_PREVIEW {
            description.push_str(&format!("… y {} más", view.queue.len() - QUEUE_PREVIEW));
        }
        embed = embed.field("Próximas canciones", description, false);
    }

    let mut info = format!(
        "**Total:** {} canciones • **Volumen:** {}%",
        view.queue.len(),
        volume_percent(view.volume)
    );
    if view.connection != ConnectionState::Connected {
        info.push_str(" • 🔌 **Sin conexión de voz**");
    }

    embed.field("Información", info, false)
}

fn playing_label(view: &SessionView) -> &'static str {
    match view.play_state {
        PlayState::Playing => "▶️ Reproduciendo",
        PlayState::Paused => "⏸️ En pausa",
        PlayState::Resolving => "🔍 Preparando",
        PlayState::Idle => "⏹️ Detenido",
    }
}

fn current_line(view: &SessionView) -> String {
    match (&view.current, &view.resolving) {
        (Some(track), _) => match track.duration {
            Some(duration) => format!("**{}** `[{}]`", track.title, format_duration(duration)),
            None => format!("**{}**", track.title),
        },
        (None, Some(query)) => format!("**{}**", query),
        (None, None) => "Nada".to_string(),
    }
}

/// Crea un embed para los avisos asíncronos del motor
pub fn create_notice_embed(notice: &Notice) -> CreateEmbed {
    match notice {
        Notice::NowPlaying { track, resumed } => create_now_playing_embed(track, *resumed),
        Notice::TrackFailed { query, reason } => create_error_embed(
            "No se pudo reproducir",
            &format!("**{}**\n{}\n\n⏭️ Pasando a la siguiente canción", query, reason),
        ),
        Notice::GaveUp { failures } => create_error_embed(
            "Reproducción detenida",
            &format!(
                "Fallaron {} canciones seguidas. La cola se conserva: usa `/play` o `/skip` para continuar",
                failures
            ),
        ),
        Notice::ConnectFailed { reason } => create_error_embed("Error al conectar", reason),
        Notice::ConnectionLost => CreateEmbed::default()
            .title("🔌 Conexión de voz perdida")
            .description("La canción actual vuelve a la cola. Usa `/join` o `/play` para continuar")
            .color(colors::WARNING_ORANGE)
            .timestamp(Timestamp::now())
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    }
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de volumen con indicador visual
pub fn create_volume_embed(level: u8) -> CreateEmbed {
    let volume = f32::from(level) / 100.0;
    let status_emoji = match level {
        0 => "🔈",
        1..=50 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Control de Volumen", status_emoji))
        .description(format!("**Volumen actual: {}%**", level))
        .field("📊 Nivel", create_volume_bar(volume), false)
        .color(colors::MUSIC_PURPLE)
        .footer(CreateEmbedFooter::new("💡 Usa /volume <0-100> para ajustar"))
        .timestamp(Timestamp::now())
}

/// Crea una barra visual de volumen
fn create_volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume.clamp(0.0, 1.0) * segments as f32).round() as usize).min(segments);
    let bar = "█".repeat(filled) + &"▒".repeat(segments - filled);
    format!("`[{}]`", bar)
}

fn volume_percent(volume: f32) -> u8 {
    (volume.clamp(0.0, 1.0) * 100.0).round() as u8
}

/// Formatea una duración en formato legible
fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
