use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Blackbox counter slots kept per device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlackboxId {
    MaxExcursion = 0,
    MaxTemperature = 1,
    OverExcursionCount = 2,
    OverTemperatureCount = 3,
    BusErrorCount = 4,
    ClockLossCount = 5,
    MaxExcursionKeep = 6,
    MaxTemperatureKeep = 7,
}

pub const BLACKBOX_SLOTS: usize = 8;

impl BlackboxId {
    pub const ALL: [BlackboxId; BLACKBOX_SLOTS] = [
        Self::MaxExcursion,
        Self::MaxTemperature,
        Self::OverExcursionCount,
        Self::OverTemperatureCount,
        Self::BusErrorCount,
        Self::ClockLossCount,
        Self::MaxExcursionKeep,
        Self::MaxTemperatureKeep,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Keep slots survive a read
    pub fn is_kept(self) -> bool {
        matches!(self, Self::MaxExcursionKeep | Self::MaxTemperatureKeep)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::MaxExcursion => "max excursion",
            Self::MaxTemperature => "max temperature",
            Self::OverExcursionCount => "over-excursion events",
            Self::OverTemperatureCount => "over-temperature events",
            Self::BusErrorCount => "bus errors",
            Self::ClockLossCount => "clock losses",
            Self::MaxExcursionKeep => "max excursion (kept)",
            Self::MaxTemperatureKeep => "max temperature (kept)",
        }
    }
}

/// Lock-free fault counters for one amplifier
pub struct DeviceCounters {
    values: [AtomicU64; BLACKBOX_SLOTS],
}

impl DeviceCounters {
    pub fn new() -> Self {
        Self {
            values: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn get(&self, id: BlackboxId) -> u64 {
        self.values[id as usize].load(Ordering::Relaxed)
    }

    pub fn record(&self, id: BlackboxId) {
        self.values[id as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bus_error(&self) {
        self.record(BlackboxId::BusErrorCount);
    }

    /// Raise the running maximum and its kept copy
    pub fn record_peak_excursion(&self, value: u64) {
        self.values[BlackboxId::MaxExcursion as usize].fetch_max(value, Ordering::Relaxed);
        self.values[BlackboxId::MaxExcursionKeep as usize].fetch_max(value, Ordering::Relaxed);
    }

    pub fn record_peak_temperature(&self, value: u64) {
        self.values[BlackboxId::MaxTemperature as usize].fetch_max(value, Ordering::Relaxed);
        self.values[BlackboxId::MaxTemperatureKeep as usize].fetch_max(value, Ordering::Relaxed);
    }

    /// Read one slot, clearing it if asked and allowed
    pub fn take(&self, id: BlackboxId, reset: bool) -> u64 {
        if reset && !id.is_kept() {
            self.values[id as usize].swap(0, Ordering::Relaxed)
        } else {
            self.get(id)
        }
    }

    /// Read every slot and clear the resettable ones
    pub fn drain(&self) -> BlackboxSnapshot {
        let mut values = [0u64; BLACKBOX_SLOTS];
        for id in BlackboxId::ALL {
            values[id as usize] = self.take(id, true);
        }
        BlackboxSnapshot { values }
    }

    pub fn snapshot(&self) -> BlackboxSnapshot {
        let mut values = [0u64; BLACKBOX_SLOTS];
        for id in BlackboxId::ALL {
            values[id as usize] = self.get(id);
        }
        BlackboxSnapshot { values }
    }
}

impl Default for DeviceCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackboxSnapshot {
    pub values: [u64; BLACKBOX_SLOTS],
}

impl BlackboxSnapshot {
    pub fn get(&self, id: BlackboxId) -> u64 {
        self.values[id as usize]
    }

    pub fn is_clean(&self) -> bool {
        self.values.iter().all(|v| *v == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_kept_slots() {
        let counters = DeviceCounters::new();
        counters.record_bus_error();
        counters.record_peak_excursion(40);
        counters.record_peak_excursion(25);

        let first = counters.drain();
        assert_eq!(first.get(BlackboxId::BusErrorCount), 1);
        assert_eq!(first.get(BlackboxId::MaxExcursion), 40);
        assert_eq!(first.get(BlackboxId::MaxExcursionKeep), 40);

        let second = counters.drain();
        assert_eq!(second.get(BlackboxId::BusErrorCount), 0);
        assert_eq!(second.get(BlackboxId::MaxExcursion), 0);
        assert_eq!(second.get(BlackboxId::MaxExcursionKeep), 40);
    }

    #[test]
    fn test_take_without_reset() {
        let counters = DeviceCounters::new();
        counters.record(BlackboxId::ClockLossCount);
        assert_eq!(counters.take(BlackboxId::ClockLossCount, false), 1);
        assert_eq!(counters.take(BlackboxId::ClockLossCount, true), 1);
        assert_eq!(counters.get(BlackboxId::ClockLossCount), 0);
    }

    #[test]
    fn test_id_from_index() {
        assert_eq!(BlackboxId::from_index(4), Some(BlackboxId::BusErrorCount));
        assert_eq!(BlackboxId::from_index(8), None);
    }
}
