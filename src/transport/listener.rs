use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::hal::{BusDirection, RawBusError};

/// One failed bus transfer attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusFault {
    pub address: u8,
    pub register: u8,
    pub error: RawBusError,
    pub direction: BusDirection,
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    pub attempts_remaining: u32,
}

impl BusFault {
    pub fn is_final(&self) -> bool {
        self.attempts_remaining == 0
    }
}

/// Receives every failed bus attempt, on the thread that made it
pub trait FaultListener: Send + Sync {
    fn on_bus_fault(&self, fault: &BusFault);
}

impl<F> FaultListener for F
where
    F: Fn(&BusFault) + Send + Sync,
{
    fn on_bus_fault(&self, fault: &BusFault) {
        self(fault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered fault listeners, shared by every transport of a fleet
pub struct FaultListeners {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn FaultListener>)>>,
}

impl FaultListeners {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, listener: Arc<dyn FaultListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    /// Returns false if the id was not registered
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn notify(&self, fault: &BusFault) {
        // Listeners run without the lock so they may unregister themselves
        let current: Vec<Arc<dyn FaultListener>> = self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in current {
            listener.on_bus_fault(fault);
        }
    }
}

impl Default for FaultListeners {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards faults to a channel for an out-of-band telemetry consumer
pub struct ChannelFaultListener {
    tx: Sender<BusFault>,
}

impl ChannelFaultListener {
    pub fn new() -> (Self, Receiver<BusFault>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl FaultListener for ChannelFaultListener {
    fn on_bus_fault(&self, fault: &BusFault) {
        // Consumer gone: nothing left to report to
        let _ = self.tx.try_send(fault.clone());
    }
}
