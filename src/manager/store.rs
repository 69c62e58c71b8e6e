use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{common::types::GuildId, player::Player};

/// Guild id -> player registry. Entries are added on join and removed on
/// leave.
#[derive(Default)]
pub struct PlayerStore {
    players: DashMap<GuildId, Arc<Player>>,
}

impl PlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|entry| entry.value().clone())
    }

    /// Returns the registered player, or registers the one built by `create`.
    /// The bool is `true` when a new player was inserted.
    pub fn get_or_insert_with<F>(&self, guild_id: GuildId, create: F) -> (Arc<Player>, bool)
    where
        F: FnOnce() -> Player,
    {
        match self.players.entry(guild_id) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(Arc::new(create())).value().clone(), true),
        }
    }

    pub fn remove(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.remove(&guild_id).map(|(_, player)| player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::types::ChannelId, testing::RecordingGateway};

    fn player(guild: u64) -> Player {
        Player::new(
            GuildId(guild),
            ChannelId(1),
            None,
            Arc::new(RecordingGateway::default()),
        )
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let store = PlayerStore::new();
        let (first, inserted) = store.get_or_insert_with(GuildId(1), || player(1));
        assert!(inserted);
        let (second, inserted) = store.get_or_insert_with(GuildId(1), || player(1));
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove() {
        let store = PlayerStore::new();
        store.get_or_insert_with(GuildId(2), || player(2));
        assert!(store.remove(GuildId(2)).is_some());
        assert!(store.remove(GuildId(2)).is_none());
        assert!(store.is_empty());
    }
}
