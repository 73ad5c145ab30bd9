use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::resilience::RetryPolicy;

/// Fleet-wide settings shared by every attached amplifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Container file requested from the firmware source
    pub firmware_name: String,

    /// Profile selected after a cold load, by name
    pub default_profile: Option<String>,

    pub transport_retry: RetryPolicy,
    pub firmware_retry: RetryPolicy,

    /// Delay between activation and the health check
    pub monitor_delay_ms: u64,

    /// Re-check interval of the overlay correction task
    pub overlay_interval_ms: u64,

    /// Enables bus-error and clock-loss accounting
    pub blackbox_enabled: bool,

    /// Log every register transfer at trace level
    pub trace_registers: bool,

    pub scratch_buffers: ScratchSettings,
    pub calibration: CalibrationSettings,
}

impl FleetConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read fleet config from {:?}", path))?;

        let config: FleetConfig = serde_json::from_str(&json)
            .context("Failed to deserialize fleet config")?;

        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize fleet config")?;

        fs::write(path, json)
            .context(format!("Failed to write fleet config to {:?}", path))?;

        Ok(())
    }

    /// Zero-delay retries and monitor, for simulated hardware
    pub fn immediate() -> Self {
        Self {
            transport_retry: RetryPolicy::immediate(50),
            firmware_retry: RetryPolicy::schedule(5, &[Duration::ZERO]),
            monitor_delay_ms: 0,
            overlay_interval_ms: 0,
            calibration: CalibrationSettings {
                settle_ms: 0,
                verify_interval_ms: 0,
                ..CalibrationSettings::default()
            },
            ..Self::default()
        }
    }

    pub fn monitor_delay(&self) -> Duration {
        Duration::from_millis(self.monitor_delay_ms)
    }

    pub fn overlay_interval(&self) -> Duration {
        Duration::from_millis(self.overlay_interval_ms)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            firmware_name: "amp.cnt".to_string(),
            default_profile: None,
            transport_retry: RetryPolicy::transport(),
            firmware_retry: RetryPolicy::firmware_fetch(),
            monitor_delay_ms: 1000,
            overlay_interval_ms: 100,
            blackbox_enabled: true,
            trace_registers: false,
            scratch_buffers: ScratchSettings::default(),
            calibration: CalibrationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchSettings {
    pub count: usize,
    /// Capacity of each buffer in 16-bit words
    pub words: usize,
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self { count: 4, words: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Used when no temperature source answers (degrees C)
    pub default_reference_temp: i16,

    /// Written on the next start of a device with no valid calibration
    pub fallback_value: Option<u16>,

    /// Pause between the flush mute and the stop
    pub settle_ms: u64,

    pub verify_attempts: u32,
    pub verify_interval_ms: u64,
}

impl CalibrationSettings {
    pub fn verify_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.verify_attempts, Duration::from_millis(self.verify_interval_ms))
    }
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            default_reference_temp: 25,
            fallback_value: Some(6000),
            settle_ms: 10,
            verify_attempts: 10,
            verify_interval_ms: 10,
        }
    }
}

/// Register patch kept applied while the device runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlaySetting {
    pub register: u8,
    pub value: u16,
}

/// Per-device attach data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Bus address
    pub address: u8,

    /// Logical TDM speaker channel
    pub channel: u8,

    /// DSP is driven over the host bus instead of running embedded
    pub external_dsp: bool,

    pub speaker_gain: u8,

    /// Devices with the same line share interrupt handling
    pub irq_line: Option<u32>,

    pub overlay: Option<OverlaySetting>,

    /// Leave interrupt reporting disarmed after start
    pub skip_interrupts: bool,
}

impl DeviceSettings {
    pub fn new(address: u8, channel: u8) -> Self {
        Self {
            address,
            channel,
            ..Self::default()
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: 0x34,
            channel: 0,
            external_dsp: false,
            speaker_gain: 0x0f,
            irq_line: None,
            overlay: None,
            skip_interrupts: false,
        }
    }
}
