use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Identificador normalizado de guild.
///
/// Toda frontera (serenity, nombres de archivo, estado heredado con claves
/// string o numéricas) se convierte a este tipo antes de tocar el store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildKey(pub u64);

/// Identificador normalizado de canal (voz o texto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(pub u64);

impl fmt::Display for GuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GuildKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl FromStr for ChannelKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<serenity::model::id::GuildId> for GuildKey {
    fn from(id: serenity::model::id::GuildId) -> Self {
        Self(id.get())
    }
}

impl From<GuildKey> for serenity::model::id::GuildId {
    fn from(key: GuildKey) -> Self {
        serenity::model::id::GuildId::new(key.0)
    }
}

impl From<serenity::model::id::ChannelId> for ChannelKey {
    fn from(id: serenity::model::id::ChannelId) -> Self {
        Self(id.get())
    }
}

impl From<ChannelKey> for serenity::model::id::ChannelId {
    fn from(key: ChannelKey) -> Self {
        serenity::model::id::ChannelId::new(key.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Idle,
    Resolving,
    Playing,
    Paused,
}

/// Petición de un usuario todavía sin resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    pub query: String,
    pub requested_at: DateTime<Utc>,
    pub requested_by: Option<u64>,
    /// Viene de un snapshot: se anuncia como reanudación automática.
    pub restored: bool,
}

impl TrackRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            requested_at: Utc::now(),
            requested_by: None,
            restored: false,
        }
    }

    pub fn restored(query: impl Into<String>) -> Self {
        Self {
            restored: true,
            ..Self::new(query)
        }
    }

    pub fn with_requester(mut self, user_id: u64) -> Self {
        self.requested_by = Some(user_id);
        self
    }
}

/// Metadatos devueltos por el resolver.
///
/// `stream_url` caduca: se usa una sola vez por reproducción y nunca se
/// persiste.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    pub page_url: String,
    pub thumbnail: Option<String>,
    pub stream_url: String,
    pub duration: Option<Duration>,
}

/// Track resuelto y listo para sonar.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub request: TrackRequest,
    pub title: String,
    pub page_url: String,
    pub thumbnail: Option<String>,
    pub stream_url: String,
    pub duration: Option<Duration>,
    pub resolved_at: DateTime<Utc>,
}

impl Track {
    pub fn from_media(request: TrackRequest, media: ResolvedMedia) -> Self {
        Self {
            request,
            title: media.title,
            page_url: media.page_url,
            thumbnail: media.thumbnail,
            stream_url: media.stream_url,
            duration: media.duration,
            resolved_at: Utc::now(),
        }
    }
}
