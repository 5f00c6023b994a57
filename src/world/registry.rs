//! Concurrent entity registries.
//!
//! Every entry is wrapped in a slot carrying a membership flag. Broadcasts
//! snapshot the slots under the registry lock, release it, then deliver to
//! each slot while holding only that slot's flag lock. `remove` clears the
//! flag under the same lock, so once it returns no broadcast from this
//! registry can still reach the removed entity.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::core::packet::Packet;

pub trait Entity: Send + Sync + 'static {
    type Key: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Entities that can be sent packets.
pub trait Recipient: Entity {
    fn deliver(&self, packet: Packet) -> bool;
}

struct Slot<T> {
    entity: Arc<T>,
    live: Mutex<bool>,
}

pub struct EntityRegistry<T: Entity> {
    entries: RwLock<HashMap<T::Key, Arc<Slot<T>>>>,
}

impl<T: Entity> Default for EntityRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert, returning the entity previously stored under the same key.
    pub fn add(&self, entity: Arc<T>) -> Option<Arc<T>> {
        let slot = Arc::new(Slot {
            entity,
            live: Mutex::new(true),
        });
        let key = slot.entity.key();
        let previous = self.entries.write().insert(key, slot);
        previous.map(Self::retire)
    }

    pub fn remove(&self, key: T::Key) -> Option<Arc<T>> {
        let removed = self.entries.write().remove(&key);
        removed.map(Self::retire)
    }

    fn retire(slot: Arc<Slot<T>>) -> Arc<T> {
        *slot.live.lock() = false;
        slot.entity.clone()
    }

    pub fn get(&self, key: T::Key) -> Option<Arc<T>> {
        self.entries.read().get(&key).map(|s| s.entity.clone())
    }

    pub fn contains(&self, key: T::Key) -> bool {
        self.entries.read().contains_key(&key)
    }

    /// Point-in-time snapshot.
    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.entries
            .read()
            .values()
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove everything, returning what was registered.
    pub fn drain(&self) -> Vec<Arc<T>> {
        let drained: Vec<_> = self.entries.write().drain().map(|(_, s)| s).collect();
        drained.into_iter().map(Self::retire).collect()
    }

    fn snapshot(&self) -> Vec<Arc<Slot<T>>> {
        self.entries.read().values().cloned().collect()
    }
}

impl<T: Recipient> EntityRegistry<T> {
    /// Deliver to every member. Returns how many accepted the packet.
    pub fn broadcast(&self, packet: &Packet) -> usize {
        self.deliver_filtered(packet, |_| true)
    }

    pub fn broadcast_except(&self, packet: &Packet, excluded: T::Key) -> usize {
        self.deliver_filtered(packet, |key| key != excluded)
    }

    fn deliver_filtered<F>(&self, packet: &Packet, include: F) -> usize
    where
        F: Fn(T::Key) -> bool,
    {
        let mut delivered = 0;
        for slot in self.snapshot() {
            if !include(slot.entity.key()) {
                continue;
            }
            let live = slot.live.lock();
            if *live && slot.entity.deliver(packet.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::PacketWriter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tagged {
        id: i32,
        received: AtomicUsize,
    }

    impl Tagged {
        fn new(id: i32) -> Arc<Self> {
            Arc::new(Self {
                id,
                received: AtomicUsize::new(0),
            })
        }
    }

    impl Entity for Tagged {
        type Key = i32;
        fn key(&self) -> i32 {
            self.id
        }
    }

    impl Recipient for Tagged {
        fn deliver(&self, _packet: Packet) -> bool {
            self.received.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    #[test]
    fn add_get_remove() {
        let registry = EntityRegistry::new();
        assert!(registry.add(Tagged::new(1)).is_none());
        registry.add(Tagged::new(2));
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.get(1).unwrap().id, 1);
        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.get(1).is_none());
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn broadcast_except_skips_sender() {
        let registry = EntityRegistry::new();
        let a = Tagged::new(1);
        let b = Tagged::new(2);
        registry.add(a.clone());
        registry.add(b.clone());
        let packet = PacketWriter::new(9).build();
        assert_eq!(registry.broadcast_except(&packet, 1), 1);
        assert_eq!(a.received.load(Ordering::Relaxed), 0);
        assert_eq!(b.received.load(Ordering::Relaxed), 1);
        assert_eq!(registry.broadcast(&packet), 2);
    }

    #[test]
    fn removed_entity_gets_nothing_from_old_snapshot() {
        let registry = EntityRegistry::new();
        let a = Tagged::new(1);
        registry.add(a.clone());
        let snapshot = registry.snapshot();
        registry.remove(1);
        // Deliver through the stale snapshot the same way a broadcast would.
        for slot in snapshot {
            let live = slot.live.lock();
            if *live {
                slot.entity.deliver(PacketWriter::new(1).build());
            }
        }
        assert_eq!(a.received.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn replacing_a_key_retires_the_old_slot() {
        let registry = EntityRegistry::new();
        let old = Tagged::new(1);
        registry.add(old.clone());
        let displaced = registry.add(Tagged::new(1)).unwrap();
        assert!(Arc::ptr_eq(&displaced, &old));
        registry.broadcast(&PacketWriter::new(1).build());
        assert_eq!(old.received.load(Ordering::Relaxed), 0);
    }
}
