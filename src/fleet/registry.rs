use std::collections::HashMap;

use crate::error::{AmpError, Result};

/// Most devices a fleet can hold; participation masks are one bit each
pub const MAX_DEVICES: usize = 4;

/// Index plus the generation it was issued under.
///
/// A detached device's id never resolves again, even if its index is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub index: usize,
    pub generation: u64,
}

/// Ways to name a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Index(usize),
    Head,
    Channel(u8),
}

impl Lookup {
    /// Raw index as used by control surfaces: -1 and 0xf mean "head"
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            -1 | 0xf => Self::Head,
            index => Self::Index(index.max(0) as usize),
        }
    }
}

struct Slot<T> {
    id: DeviceId,
    channel: u8,
    sequence: u64,
    item: T,
}

/// Arena of attached devices keyed by stable index
pub struct DeviceRegistry<T> {
    slots: Vec<Option<Slot<T>>>,
    next_generation: u64,
    next_sequence: u64,
    epoch: u64,
}

impl<T> DeviceRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_DEVICES).map(|_| None).collect(),
            next_generation: 1,
            next_sequence: 0,
            epoch: 0,
        }
    }

    /// Claim the lowest free index and build the device for it
    pub fn register_with<F>(&mut self, channel: u8, build: F) -> Result<DeviceId>
    where
        F: FnOnce(DeviceId) -> T,
    {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or_else(|| AmpError::BadParameter(format!("registry full ({} devices)", MAX_DEVICES)))?;

        let id = DeviceId {
            index,
            generation: self.next_generation,
        };
        self.next_generation += 1;

        let item = build(id);
        self.slots[index] = Some(Slot {
            id,
            channel,
            sequence: self.next_sequence,
            item,
        });
        self.next_sequence += 1;
        Ok(id)
    }

    pub fn register(&mut self, channel: u8, item: T) -> Result<DeviceId> {
        self.register_with(channel, |_| item)
    }

    /// Remove a device; every id and cached lookup for it goes stale
    pub fn unregister(&mut self, index: usize) -> Option<T> {
        let slot = self.slots.get_mut(index)?.take()?;
        self.epoch += 1;
        Some(slot.item)
    }

    /// Bumped on every unregister
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn get(&self, id: DeviceId) -> Option<&T> {
        self.slot(id.index)
            .filter(|slot| slot.id.generation == id.generation)
            .map(|slot| &slot.item)
    }

    pub fn id_of(&self, lookup: Lookup) -> Option<DeviceId> {
        match lookup {
            Lookup::Index(index) => self.slot(index).map(|slot| slot.id),
            Lookup::Head => self.head(),
            Lookup::Channel(channel) => self
                .slots
                .iter()
                .flatten()
                .find(|slot| slot.channel == channel)
                .map(|slot| slot.id),
        }
    }

    pub fn lookup(&self, lookup: Lookup) -> Option<&T> {
        self.id_of(lookup).and_then(|id| self.get(id))
    }

    /// Earliest-registered device still attached
    pub fn head(&self) -> Option<DeviceId> {
        self.slots
            .iter()
            .flatten()
            .min_by_key(|slot| slot.sequence)
            .map(|slot| slot.id)
    }

    pub fn is_head(&self, index: usize) -> bool {
        self.head().map(|id| id.index == index).unwrap_or(false)
    }

    pub fn channel_of(&self, index: usize) -> Option<u8> {
        self.slot(index).map(|slot| slot.channel)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One bit per attached index
    pub fn attached_mask(&self) -> u8 {
        self.slots
            .iter()
            .flatten()
            .fold(0u8, |mask, slot| mask | (1 << slot.id.index))
    }

    /// Attached devices in index order
    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &T)> {
        self.slots.iter().flatten().map(|slot| (slot.id, &slot.item))
    }

    fn slot(&self, index: usize) -> Option<&Slot<T>> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }
}

impl<T> Default for DeviceRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller-side memo of lookups, dropped whenever the registry loses a device
pub struct LookupCache<T> {
    epoch: u64,
    entries: HashMap<Lookup, T>,
}

impl<T: Clone> LookupCache<T> {
    pub fn new() -> Self {
        Self {
            epoch: 0,
            entries: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, registry: &DeviceRegistry<T>, lookup: Lookup) -> Option<T> {
        if self.epoch != registry.epoch() {
            self.entries.clear();
            self.epoch = registry.epoch();
        }
        if let Some(hit) = self.entries.get(&lookup) {
            return Some(hit.clone());
        }
        let found = registry.lookup(lookup)?.clone();
        self.entries.insert(lookup, found.clone());
        Some(found)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Clone> Default for LookupCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
