//! # Audio Module
//!
//! Motor de reproducción por guild.
//!
//! Cada guild tiene una [`session::GuildPlaybackSession`] en el
//! [`store::SessionStore`]. Un único bucle de control ([`engine::Engine`])
//! es dueño del [`player::PlaybackController`] y aplica, en orden de
//! llegada, los comandos y los resultados asíncronos que entran por un solo
//! canal:
//!
//! ```text
//! comando ──► EngineHandle ──┐
//! resolver (tarea) ──────────┤
//! conexión de voz (tarea) ───┼──► canal flume ──► bucle ──► controlador ──► store
//! fin de track (songbird) ───┘                                  │
//!                                                               └──► SnapshotWriter
//! ```
//!
//! Los colaboradores externos (resolver, salida de audio, conexión de voz,
//! notificaciones) se definen como traits en [`ports`].

pub mod bridge;
pub mod engine;
pub mod error;
pub mod player;
pub mod ports;
pub mod session;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
