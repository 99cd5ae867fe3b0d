use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashMap},
    io::Write,
    path::PathBuf,
    sync::Arc,
};
use tokio::{fs, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{
    error::PersistenceError,
    session::{PersistedSnapshot, DEFAULT_VOLUME},
    types::GuildKey,
};

/// Nombre del archivo único que usaba la versión anterior del bot.
const LEGACY_STATE_FILE: &str = "music_state.json";

/// Almacenamiento de snapshots basado en archivos JSON, uno por guild.
pub struct JsonStorage {
    data_dir: PathBuf,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self, PersistenceError> {
        fs::create_dir_all(data_dir.join("sessions")).await?;
        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    /// Escribe el snapshot de una guild de forma atómica.
    pub async fn save(&self, guild: GuildKey, snapshot: &PersistedSnapshot) -> Result<(), PersistenceError> {
        let content = serde_json::to_vec_pretty(snapshot)?;
        let dir = self.sessions_dir();
        let path = self.snapshot_path(guild);

        tokio::task::spawn_blocking(move || -> Result<(), PersistenceError> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&content)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await
        .map_err(|e| PersistenceError::Io(std::io::Error::other(e)))??;

        debug!("💾 Snapshot guardado para guild {}", guild);
        Ok(())
    }

    pub async fn save_all(&self, snapshots: &BTreeMap<GuildKey, PersistedSnapshot>) -> Result<(), PersistenceError> {
        for (guild, snapshot) in snapshots {
            self.save(*guild, snapshot).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, guild: GuildKey) -> Result<(), PersistenceError> {
        match fs::remove_file(self.snapshot_path(guild)).await {
            Ok(()) => {
                info!("🗑️ Snapshot eliminado para guild {}", guild);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Carga todos los snapshots. Los archivos corruptos se registran y se
    /// saltan; el estado heredado solo aporta guilds que no tengan archivo
    /// propio.
    pub async fn load_all(&self) -> Result<BTreeMap<GuildKey, PersistedSnapshot>, PersistenceError> {
        let mut snapshots = BTreeMap::new();
        let mut files = fs::read_dir(self.sessions_dir()).await?;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let Some(guild) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("guild_"))
                .and_then(|id| id.parse::<GuildKey>().ok())
            else {
                continue;
            };

            match self.load_snapshot(&path).await {
                Ok(snapshot) => {
                    snapshots.insert(guild, snapshot);
                }
                Err(e) => warn!("Error cargando snapshot para guild {}: {}", guild, e),
            }
        }

        for (guild, snapshot) in self.load_legacy().await {
            snapshots.entry(guild).or_insert(snapshot);
        }

        if !snapshots.is_empty() {
            info!("📂 Cargados {} snapshots de reproducción", snapshots.len());
        }

        Ok(snapshots)
    }

    pub async fn get_storage_stats(&self) -> Result<StorageStats, PersistenceError> {
        let mut files = fs::read_dir(self.sessions_dir()).await?;
        let mut snapshot_files = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().map_or(false, |ext| ext == "json") {
                snapshot_files += 1;
                if let Ok(metadata) = entry.metadata().await {
                    total_size += metadata.len();
                }
            }
        }

        Ok(StorageStats {
            snapshot_files,
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    async fn load_snapshot(&self, path: &std::path::Path) -> Result<PersistedSnapshot, PersistenceError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn load_legacy(&self) -> BTreeMap<GuildKey, PersistedSnapshot> {
        let path = self.data_dir.join(LEGACY_STATE_FILE);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(_) => return BTreeMap::new(),
        };

        match serde_json::from_str::<LegacyState>(&content) {
            Ok(state) => {
                let imported = state.into_snapshots();
                info!("📦 Importadas {} guilds desde {}", imported.len(), LEGACY_STATE_FILE);
                imported
            }
            Err(e) => {
                warn!("Estado heredado ilegible en {}: {}", path.display(), e);
                BTreeMap::new()
            }
        }
    }

    fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    fn snapshot_path(&self, guild: GuildKey) -> PathBuf {
        self.sessions_dir().join(format!("guild_{}.json", guild))
    }
}

/// Formato de `music_state.json`: mapas por guild con claves string.
#[derive(Debug, Default, Deserialize)]
struct LegacyState {
    #[serde(default)]
    current_tracks: HashMap<String, String>,
    #[serde(default)]
    music_queues: HashMap<String, Vec<String>>,
    #[serde(default)]
    volumes: HashMap<String, f32>,
}

impl LegacyState {
    fn into_snapshots(self) -> BTreeMap<GuildKey, PersistedSnapshot> {
        let mut snapshots: BTreeMap<GuildKey, PersistedSnapshot> = BTreeMap::new();
        let keys = self
            .current_tracks
            .keys()
            .chain(self.music_queues.keys())
            .chain(self.volumes.keys());

        for raw in keys {
            let Ok(guild) = raw.parse::<GuildKey>() else {
                warn!("Clave de guild inválida en estado heredado: {}", raw);
                continue;
            };

            snapshots.entry(guild).or_insert_with(|| PersistedSnapshot {
                current_track_query: self.current_tracks.get(raw).cloned(),
                queue: self.music_queues.get(raw).cloned().unwrap_or_default(),
                volume: self.volumes.get(raw).copied().unwrap_or(DEFAULT_VOLUME),
                voice_channel_id: None,
            });
        }

        snapshots
    }
}

#[derive(Debug)]
pub struct StorageStats {
    pub snapshot_files: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage: {} snapshots, {:.2} KB en {}",
            self.snapshot_files,
            self.total_size_bytes as f64 / 1024.0,
            self.data_dir.display()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Save(GuildKey, PersistedSnapshot),
    Delete(GuildKey),
}

/// Escritor de snapshots "dispara y olvida".
///
/// Una sola tarea aplica las escrituras en orden de envío, así que dos
/// escrituras de la misma guild nunca compiten por el archivo.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl SnapshotWriter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WriteOp>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn(storage: Arc<JsonStorage>, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let (writer, mut rx) = Self::channel();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    op = rx.recv() => match op {
                        Some(op) => apply(&storage, op).await,
                        None => break,
                    },
                    _ = shutdown.cancelled() => {
                        while let Ok(op) = rx.try_recv() {
                            apply(&storage, op).await;
                        }
                        break;
                    }
                }
            }
            debug!("Escritor de snapshots detenido");
        });

        (writer, task)
    }

    pub fn submit(&self, guild: GuildKey, snapshot: PersistedSnapshot) {
        if self.tx.send(WriteOp::Save(guild, snapshot)).is_err() {
            warn!("Escritor de snapshots cerrado, guild {} no persistida", guild);
        }
    }

    pub fn delete(&self, guild: GuildKey) {
        if self.tx.send(WriteOp::Delete(guild)).is_err() {
            warn!("Escritor de snapshots cerrado, guild {} no eliminada", guild);
        }
    }
}

async fn apply(storage: &JsonStorage, op: WriteOp) {
    let result = match &op {
        WriteOp::Save(guild, snapshot) => storage.save(*guild, snapshot).await,
        WriteOp::Delete(guild) => storage.delete(*guild).await,
    };

    if let Err(e) = result {
        error!("❌ Error de persistencia ({:?}): {}", op, e);
    }
}
