//! Resolución de búsquedas y enlaces a streams reproducibles.

pub mod ytdlp;

use url::Url;

use crate::audio::error::ResolutionError;

pub use ytdlp::YtDlpResolver;

/// Forma de una consulta de `/play`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Enlace http(s) que se pasa tal cual al extractor.
    Link(Url),
    /// Texto libre: se busca y se toma el primer resultado.
    Search(String),
}

impl QueryKind {
    pub fn classify(query: &str) -> Result<Self, ResolutionError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ResolutionError::NotFound);
        }

        if !query.contains("://") {
            return Ok(Self::Search(query.to_string()));
        }

        let url = Url::parse(query).map_err(|e| ResolutionError::Unsupported(format!("{}: {}", query, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(Self::Link(url)),
            scheme => Err(ResolutionError::Unsupported(format!("esquema '{}' no soportado", scheme))),
        }
    }

    /// Argumento para yt-dlp.
    pub fn target(&self) -> String {
        match self {
            Self::Link(url) => url.to_string(),
            Self::Search(text) => format!("ytsearch1:{}", text),
        }
    }

    pub fn is_youtube(&self) -> bool {
        match self {
            Self::Link(url) => url
                .host_str()
                .map(|host| host == "youtu.be" || host.ends_with("youtube.com"))
                .unwrap_or(false),
            Self::Search(_) => true,
        }
    }
}
