use dashmap::DashMap;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

use super::{
    session::{GuildPlaybackSession, PersistedSnapshot, SessionView},
    types::GuildKey,
};

pub type SessionHandle = Arc<RwLock<GuildPlaybackSession>>;

/// Mapa guild → sesión. Única estructura compartida entre contextos.
///
/// Los locks de cada sesión se toman solo en secciones síncronas cortas y
/// nunca se mantienen a través de un `.await`.
pub struct SessionStore {
    sessions: DashMap<GuildKey, SessionHandle>,
    default_volume: f32,
}

impl SessionStore {
    pub fn new(default_volume: f32) -> Self {
        Self {
            sessions: DashMap::new(),
            default_volume,
        }
    }

    /// Devuelve la sesión de la guild, creándola si no existe.
    ///
    /// La entrada de `DashMap` bloquea el shard, así que dos llamadas
    /// concurrentes para la misma guild reciben la misma instancia.
    pub fn get_or_create(&self, guild: GuildKey) -> SessionHandle {
        self.sessions
            .entry(guild)
            .or_insert_with(|| {
                debug!("🆕 Nueva sesión de reproducción para guild {}", guild);
                Arc::new(RwLock::new(GuildPlaybackSession::new(guild, self.default_volume)))
            })
            .clone()
    }

    pub fn get(&self, guild: GuildKey) -> Option<SessionHandle> {
        self.sessions.get(&guild).map(|entry| entry.clone())
    }

    pub fn remove(&self, guild: GuildKey) -> Option<SessionHandle> {
        self.sessions.remove(&guild).map(|(_, handle)| handle)
    }

    /// Inserta una sesión reconstruida en el arranque. No pisa sesiones vivas.
    pub fn insert_restored(&self, session: GuildPlaybackSession) -> Option<SessionHandle> {
        let guild = session.guild;
        match self.sessions.entry(guild) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let handle = Arc::new(RwLock::new(session));
                slot.insert(handle.clone());
                Some(handle)
            }
        }
    }

    pub fn view(&self, guild: GuildKey) -> Option<SessionView> {
        self.get(guild).map(|handle| handle.read().view())
    }

    pub fn snapshot_all(&self) -> BTreeMap<GuildKey, PersistedSnapshot> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().read().snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::TrackRequest;

    #[test]
    fn get_or_create_returns_same_instance() {
        let store = SessionStore::new(0.5);
        let a = store.get_or_create(GuildKey(1));
        let b = store.get_or_create(GuildKey(1));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn concurrent_creation_yields_one_session() {
        let store = Arc::new(SessionStore::new(0.5));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.get_or_create(GuildKey(77)))
            })
            .collect();

        let sessions: Vec<SessionHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn restored_session_does_not_replace_live_one() {
        let store = SessionStore::new(0.5);
        let live = store.get_or_create(GuildKey(3));
        live.write().queue.push_back(TrackRequest::new("vivo"));

        let restored = GuildPlaybackSession::new(GuildKey(3), 0.9);
        assert!(store.insert_restored(restored).is_none());
        assert_eq!(store.view(GuildKey(3)).unwrap().queue, vec!["vivo".to_string()]);
    }

    #[test]
    fn remove_drops_the_session() {
        let store = SessionStore::new(0.5);
        store.get_or_create(GuildKey(8));
        assert!(store.remove(GuildKey(8)).is_some());
        assert!(store.get(GuildKey(8)).is_none());
        assert!(store.remove(GuildKey(8)).is_none());
    }

    #[test]
    fn snapshot_all_covers_every_guild() {
        let store = SessionStore::new(0.5);
        store.get_or_create(GuildKey(2));
        store.get_or_create(GuildKey(1)).write().volume = 0.25;

        let all = store.snapshot_all();
        assert_eq!(all.keys().copied().collect::<Vec<_>>(), vec![GuildKey(1), GuildKey(2)]);
        assert_eq!(all[&GuildKey(1)].volume, 0.25);
    }
}
