#![allow(dead_code)]

use ampsync::firmware::{Container, Profile};
use ampsync::hal::mock::{SimulatedAmp, StaticFirmware};
use ampsync::{DeviceSettings, FleetConfig, FleetCoordinator};
use std::sync::Arc;

/// Container used across the fleet tests:
/// mixer 0 "music" (48k at 0, 44.1k at 1), mixer 1 "voice" (2), calibration (3)
pub fn container() -> Container {
    Container::new("test")
        .with_profile(Profile::new("music").with_rates(&[48000, 96000]).with_vsteps(4))
        .with_profile(Profile::new("music.44k").with_rates(&[44100]).with_vsteps(4))
        .with_profile(Profile::new("voice").with_rates(&[16000, 48000]).with_vsteps(2))
        .with_profile(Profile::new("cal").calibration())
}

/// Zero-delay retries; the background monitor stays out of the way
pub fn config() -> FleetConfig {
    let mut config = FleetConfig::immediate();
    config.monitor_delay_ms = 60_000;
    config
}

pub struct Fleet {
    pub fleet: Arc<FleetCoordinator>,
    pub firmware: Arc<StaticFirmware>,
    pub amps: Vec<Arc<SimulatedAmp>>,
}

pub async fn fleet_with(config: FleetConfig, amps: Vec<Arc<SimulatedAmp>>) -> Fleet {
    let firmware = Arc::new(StaticFirmware::new(container().encode()));
    let fleet = FleetCoordinator::new(config, firmware.clone());
    for (i, amp) in amps.iter().enumerate() {
        let settings = DeviceSettings::new(0x38 + i as u8, i as u8);
        fleet.attach(settings, amp.clone()).await.unwrap();
    }
    Fleet {
        fleet,
        firmware,
        amps,
    }
}

/// `count` uncalibrated amplifiers
pub async fn fleet(count: usize) -> Fleet {
    let amps = (0..count).map(|_| Arc::new(SimulatedAmp::new())).collect();
    fleet_with(config(), amps).await
}
