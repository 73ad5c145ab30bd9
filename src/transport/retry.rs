use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{AmpError, Result};
use crate::hal::{BusDirection, RawBusError, RegisterBus};
use crate::observability::DeviceCounters;
use crate::resilience::RetryPolicy;

use super::listener::{BusFault, FaultListeners};

/// Register access with bounded retry and fault accounting
pub struct Transport {
    address: u8,
    bus: Arc<dyn RegisterBus>,
    policy: RetryPolicy,
    listeners: Arc<FaultListeners>,
    counters: Arc<DeviceCounters>,
    blackbox: Arc<AtomicBool>,
    trace: bool,
}

impl Transport {
    pub fn new(
        address: u8,
        bus: Arc<dyn RegisterBus>,
        policy: RetryPolicy,
        listeners: Arc<FaultListeners>,
        counters: Arc<DeviceCounters>,
        blackbox: Arc<AtomicBool>,
    ) -> Self {
        Self {
            address,
            bus,
            policy,
            listeners,
            counters,
            blackbox,
            trace: false,
        }
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn read(&self, register: u8) -> Result<u16> {
        let value = self
            .run(register, BusDirection::Read, || self.bus.raw_read(register))
            .await?;
        if self.trace {
            log::trace!("[0x{:02x}] rd 0x{:02x} -> 0x{:04x}", self.address, register, value);
        }
        Ok(value)
    }

    pub async fn write(&self, register: u8, value: u16) -> Result<()> {
        if self.trace {
            log::trace!("[0x{:02x}] wr 0x{:02x} <- 0x{:04x}", self.address, register, value);
        }
        self.run(register, BusDirection::Write, || self.bus.raw_write(register, value))
            .await
    }

    /// Read-modify-write of the bits selected by `mask`
    pub async fn update_bits(&self, register: u8, mask: u16, value: u16) -> Result<()> {
        let current = self.read(register).await?;
        let next = (current & !mask) | (value & mask);
        if next == current {
            return Ok(());
        }
        self.write(register, next).await
    }

    async fn run<T, F, Fut>(&self, register: u8, direction: BusDirection, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, RawBusError>>,
    {
        let max_attempts = self.policy.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        log::debug!(
                            "[0x{:02x}] {} 0x{:02x} recovered after {} attempts",
                            self.address, direction, register, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            self.listeners.notify(&BusFault {
                address: self.address,
                register,
                error,
                direction,
                attempt,
                attempts_remaining: max_attempts.saturating_sub(attempt),
            });

            match self.policy.delay_after(attempt) {
                Some(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                None => break,
            }
        }

        log::error!(
            "[0x{:02x}] {} 0x{:02x} failed after {} attempts",
            self.address, direction, register, attempt
        );
        if self.blackbox.load(Ordering::Relaxed) {
            self.counters.record_bus_error();
        }

        Err(AmpError::Transport {
            address: self.address,
            direction,
            attempts: attempt,
        })
    }
}
