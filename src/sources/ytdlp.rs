use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{path::PathBuf, sync::LazyLock, time::Duration};
use tracing::{debug, info, warn};

use super::QueryKind;
use crate::audio::{error::ResolutionError, ports::TrackResolver, types::ResolvedMedia};

static NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(video unavailable|private video|no video results|not available|has been removed|HTTP Error 404)")
        .expect("regex válida")
});

static UNSUPPORTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(unsupported url|no suitable extractor)").expect("regex válida"));

/// Resolver basado en `yt-dlp --dump-single-json`.
pub struct YtDlpResolver {
    binary: String,
    socket_timeout: Duration,
    cookies: Option<PathBuf>,
}

impl YtDlpResolver {
    pub async fn new(socket_timeout: Duration) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            socket_timeout,
            cookies: find_cookies_file().await,
        }
    }

    /// Verifica que yt-dlp esté disponible y devuelve su versión.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("--version")
            .output()
            .await?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no disponible");
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn command(&self, target: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args([
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--quiet",
            "-f",
            "bestaudio/best",
            "--retries",
            "2",
            "--socket-timeout",
        ])
        .arg(self.socket_timeout.as_secs().max(1).to_string());

        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }

        cmd.arg(target).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TrackResolver for YtDlpResolver {
    async fn resolve(&self, query: &str) -> Result<ResolvedMedia, ResolutionError> {
        let kind = QueryKind::classify(query)?;
        if !kind.is_youtube() {
            debug!("Enlace fuera de YouTube, se delega en el extractor genérico: {}", query);
        }

        let target = kind.target();
        info!("🔍 Resolviendo con yt-dlp: {}", target);

        // La búsqueda más la extracción pueden encadenar varias conexiones.
        let deadline = self.socket_timeout * 3;
        let output = tokio::time::timeout(deadline, self.command(&target).output())
            .await
            .map_err(|_| ResolutionError::NetworkFailure(format!("yt-dlp no respondió en {:?}", deadline)))?
            .map_err(|e| ResolutionError::NetworkFailure(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("yt-dlp falló para '{}': {}", query, stderr.trim());
            return Err(classify_stderr(&stderr));
        }

        let media = parse_output(&output.stdout)?;
        info!("✅ Resuelto: {}", media.title);
        Ok(media)
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    thumbnail: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    entries: Option<Vec<YtDlpInfo>>,
}

fn parse_output(stdout: &[u8]) -> Result<ResolvedMedia, ResolutionError> {
    let mut info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| ResolutionError::NetworkFailure(format!("respuesta de yt-dlp ilegible: {}", e)))?;

    // Una búsqueda devuelve una lista con un único resultado.
    if let Some(entries) = info.entries.take() {
        info = entries.into_iter().next().ok_or(ResolutionError::NotFound)?;
    }

    let stream_url = info
        .url
        .ok_or_else(|| ResolutionError::Unsupported("sin stream de audio".to_string()))?;

    Ok(ResolvedMedia {
        title: info.title.unwrap_or_else(|| "Desconocido".to_string()),
        page_url: info.webpage_url.or(info.original_url).unwrap_or_default(),
        thumbnail: info.thumbnail,
        stream_url,
        duration: info
            .duration
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64),
    })
}

fn classify_stderr(stderr: &str) -> ResolutionError {
    if UNSUPPORTED.is_match(stderr) {
        ResolutionError::Unsupported(last_line(stderr))
    } else if NOT_FOUND.is_match(stderr) {
        ResolutionError::NotFound
    } else {
        ResolutionError::NetworkFailure(last_line(stderr))
    }
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("error desconocido")
        .to_string()
}

/// Busca archivo de cookies disponible
async fn find_cookies_file() -> Option<PathBuf> {
    let mut candidates = vec![PathBuf::from("./cookies.txt")];
    if let Ok(home) = std::env::var("HOME") {
        candidates.insert(0, PathBuf::from(home).join(".config/yt-dlp/cookies.txt"));
    }

    for path in candidates {
        if tokio::fs::metadata(&path).await.is_ok() {
            info!("🍪 Cookies encontradas en: {}", path.display());
            return Some(path);
        }
    }

    debug!("🍪 Sin archivo de cookies para yt-dlp");
    None
}
