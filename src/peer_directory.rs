//! Least-recently-used directory of registered peers.
//!
//! ESP-NOW-style radios only deliver unicast frames to destinations that
//! have been registered with the driver beforehand, and cap how many
//! destinations can be registered at once. The directory mirrors that
//! registration table: a fixed array of `MAX_PEERS` slots with an LRU
//! eviction policy, so the send path can always admit a new destination by
//! retiring the least-recently-contacted one.
//!
//! Recency is tracked with a monotonically increasing generation counter
//! rather than a wall clock. A wrapping millisecond clock can mis-rank
//! entries after wraparound; the counter cannot.

use crate::frames::MacAddress;

#[derive(Clone, Copy)]
pub(crate) struct PeerEntry {
    pub(crate) address: MacAddress,
    pub(crate) last_used: u64,
    pub(crate) active: bool,
}

const EMPTY_ENTRY: PeerEntry = PeerEntry {
    address: MacAddress::new([0; crate::ADDRESS_LENGTH]),
    last_used: 0,
    active: false,
};

pub(crate) struct PeerDirectory<const N: usize> {
    entries: [PeerEntry; N],
    active_count: usize,
    clock: u64,
}

impl<const N: usize> PeerDirectory<N> {
    pub(crate) const fn new() -> Self {
        PeerDirectory {
            entries: [EMPTY_ENTRY; N],
            active_count: 0,
            clock: 0,
        }
    }

    fn find(&self, address: MacAddress) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.active && entry.address == address)
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Membership test. A hit refreshes the entry's recency, so probing a
    /// peer counts as contacting it.
    pub(crate) fn exists(&mut self, address: MacAddress) -> bool {
        match self.find(address) {
            Some(index) => {
                self.entries[index].last_used = self.tick();
                true
            }
            None => false,
        }
    }

    #[allow(dead_code)]
    pub(crate) fn get(&self, address: MacAddress) -> Option<&PeerEntry> {
        self.find(address).map(|index| &self.entries[index])
    }

    /// Admits a new peer. Fails if the address is already present or the
    /// directory is full; making room is the caller's job, so the caller
    /// can retire the evicted address from the radio driver as well.
    pub(crate) fn add(&mut self, address: MacAddress) -> bool {
        if self.find(address).is_some() {
            return false;
        }
        if self.active_count >= N {
            return false;
        }
        let stamp = self.tick();
        for entry in self.entries.iter_mut() {
            if !entry.active {
                entry.address = address;
                entry.last_used = stamp;
                entry.active = true;
                self.active_count += 1;
                return true;
            }
        }
        false
    }

    /// Retires the active entry with the oldest `last_used`, ties broken by
    /// lowest slot index. Returns the evicted address so the caller can
    /// deregister it from the radio driver.
    pub(crate) fn evict_oldest(&mut self) -> Option<MacAddress> {
        let mut oldest: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.active {
                continue;
            }
            match oldest {
                Some(current) if self.entries[current].last_used <= entry.last_used => {}
                _ => oldest = Some(index),
            }
        }
        let index = oldest?;
        self.entries[index].active = false;
        self.active_count -= 1;
        Some(self.entries[index].address)
    }

    pub(crate) fn count(&self) -> usize {
        self.active_count
    }

    pub(crate) fn is_full(&self) -> bool {
        self.active_count >= N
    }
}
