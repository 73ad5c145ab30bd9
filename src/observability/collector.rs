use std::sync::Arc;

use super::{BlackboxSnapshot, DeviceCounters};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub index: usize,
    pub channel: u8,
    pub blackbox: BlackboxSnapshot,
}

/// Read-only view over the counters of every attached device
#[derive(Clone, Default)]
pub struct BlackboxCollector {
    devices: Vec<(usize, u8, Arc<DeviceCounters>)>,
}

impl BlackboxCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, index: usize, channel: u8, counters: Arc<DeviceCounters>) {
        self.devices.retain(|(i, _, _)| *i != index);
        self.devices.push((index, channel, counters));
        self.devices.sort_by_key(|(i, _, _)| *i);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Current values, without resetting anything
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices
            .iter()
            .map(|(index, channel, counters)| DeviceSnapshot {
                index: *index,
                channel: *channel,
                blackbox: counters.snapshot(),
            })
            .collect()
    }

    pub fn counters(&self, index: usize) -> Option<Arc<DeviceCounters>> {
        self.devices
            .iter()
            .find(|(i, _, _)| *i == index)
            .map(|(_, _, c)| c.clone())
    }
}
