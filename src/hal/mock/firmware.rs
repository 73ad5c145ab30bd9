use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::hal::{FirmwareSource, TemperatureSource};

/// Serves a fixed container image, optionally failing the first fetches
pub struct StaticFirmware {
    image: Vec<u8>,
    failures: AtomicU32,
    latency: Duration,
    fetches: AtomicUsize,
}

impl StaticFirmware {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            failures: AtomicU32::new(0),
            latency: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing_first(self, count: u32) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FirmwareSource for StaticFirmware {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("{} not available yet", name));
        }
        Ok(self.image.clone())
    }
}

/// Temperature sensor with a fixed reading
pub struct FixedTemperature(pub Option<i16>);

#[async_trait]
impl TemperatureSource for FixedTemperature {
    async fn reference_temperature(&self) -> Option<i16> {
        self.0
    }
}
