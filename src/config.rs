use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::player::PlayerSettings;

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: Option<u64>,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Reproducción
    pub default_volume: f32,
    pub max_consecutive_failures: u32,
    pub disconnect_on_give_up: bool,

    // Resolver
    pub resolver_workers: usize,
    pub socket_timeout: u64, // En segundos

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    /// Carga la configuración desde el entorno (y `.env` si existe).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_environment(config::Environment::default().try_parsing(true))?;

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        Ok(config)
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        let defaults = Self::default();
        let config: Self = config::Config::builder()
            .set_default("default_volume", f64::from(defaults.default_volume))?
            .set_default("max_consecutive_failures", i64::from(defaults.max_consecutive_failures))?
            .set_default("disconnect_on_give_up", defaults.disconnect_on_give_up)?
            .set_default("resolver_workers", defaults.resolver_workers as i64)?
            .set_default("socket_timeout", defaults.socket_timeout as i64)?
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .add_source(environment)
            .build()?
            .try_deserialize()
            .context("Configuración inválida (¿falta DISCORD_TOKEN?)")?;

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("DEFAULT_VOLUME debe estar entre 0.0 y 1.0, recibido: {}", self.default_volume);
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_FAILURES debe ser mayor que 0");
        }

        if self.resolver_workers == 0 {
            anyhow::bail!("RESOLVER_WORKERS debe ser mayor que 0");
        }

        if self.socket_timeout == 0 {
            anyhow::bail!("SOCKET_TIMEOUT debe ser mayor que 0");
        }

        Ok(())
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            max_consecutive_failures: self.max_consecutive_failures,
            disconnect_on_give_up: self.disconnect_on_give_up,
            resolver_workers: self.resolver_workers,
            ..PlayerSettings::default()
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Playback: {}% vol, give up after {} failures (disconnect: {})\n  \
            Resolver: {} workers, {} socket timeout\n  \
            Data: {}",
            self.application_id.map_or("auto".to_string(), |id| id.to_string()),
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.max_consecutive_failures,
            self.disconnect_on_give_up,
            self.resolver_workers,
            humantime::format_duration(self.socket_timeout()),
            self.data_dir.display()
        )
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: None,
            guild_id: None,

            default_volume: 0.5,
            max_consecutive_failures: 3,
            disconnect_on_give_up: false,

            resolver_workers: num_cpus::get(),
            socket_timeout: 30,

            data_dir: "./data".into(),
        }
    }
}
