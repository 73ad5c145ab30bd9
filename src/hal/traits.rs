use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Error code reported by the bus transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawBusError(pub i32);

impl fmt::Display for RawBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus error {}", self.0)
    }
}

impl std::error::Error for RawBusError {}

/// Register access to one amplifier, already bound to its bus address
#[async_trait]
pub trait RegisterBus: Send + Sync {
    async fn raw_read(&self, register: u8) -> std::result::Result<u16, RawBusError>;

    async fn raw_write(&self, register: u8, value: u16) -> std::result::Result<(), RawBusError>;
}

/// Supplies the raw bytes of a firmware container
#[async_trait]
pub trait FirmwareSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

/// Ambient temperature used as calibration reference
#[async_trait]
pub trait TemperatureSource: Send + Sync {
    /// Degrees C, None when the sensor is unavailable
    async fn reference_temperature(&self) -> Option<i16>;
}
