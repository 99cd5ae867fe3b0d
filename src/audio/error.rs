use thiserror::Error;

/// Errores causados por la entrada del usuario. Nunca cambian el estado.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserInputError {
    #[error("El volumen debe estar entre 0 y 100 (recibido: {0})")]
    VolumeOutOfRange(i64),
    #[error("No hay nada reproduciéndose")]
    NothingPlaying,
    #[error("No hay ninguna canción sonando ahora mismo")]
    NotPlaying,
    #[error("La reproducción ya está pausada")]
    AlreadyPaused,
    #[error("No hay ninguna canción pausada")]
    NotPaused,
    #[error("La búsqueda está vacía")]
    EmptyQuery,
    #[error("No estoy conectado a un canal de voz")]
    NotConnected,
    #[error("Ya estoy conectado a un canal de voz")]
    AlreadyConnected,
    #[error("Debes estar en un canal de voz para usar este comando")]
    NotInVoiceChannel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no se encontraron resultados")]
    NotFound,
    #[error("fallo de red: {0}")]
    NetworkFailure(String),
    #[error("consulta o enlace no soportado: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("no se pudo iniciar la salida de audio: {0}")]
    Start(String),
    #[error("error durante la reproducción: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("el canal de voz no existe o no es accesible")]
    ChannelUnavailable,
    #[error("no se pudo unir al canal de voz: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
    #[error("error de serialización: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no se pudo reemplazar el snapshot: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Lo que ve la capa de comandos.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    UserInput(#[from] UserInputError),
    #[error("el motor de reproducción no está disponible")]
    Closed,
}

/// Motivo de un fallo de track, resolución o reproducción.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackFailure {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}
