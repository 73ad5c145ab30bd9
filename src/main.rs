use std::sync::Arc;

use anyhow::Context;
use ampsync::firmware::{Container, Profile};
use ampsync::hal::mock::{FixedTemperature, SimulatedAmp, StaticFirmware};
use ampsync::hal::StreamDirection;
use ampsync::{DeviceSettings, FleetConfig, FleetCoordinator};

fn demo_container() -> Container {
    Container::new("demo")
        .with_profile(Profile::new("music").with_rates(&[48000, 96000]).with_vsteps(4))
        .with_profile(Profile::new("music.44k").with_rates(&[44100]).with_vsteps(4))
        .with_profile(Profile::new("voice").with_rates(&[16000, 48000]).with_vsteps(2))
        .with_profile(Profile::new("calibration").calibration())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => FleetConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => FleetConfig::default(),
    };

    let firmware = Arc::new(StaticFirmware::new(demo_container().encode()));
    let fleet = FleetCoordinator::with_sensor(config, firmware, Arc::new(FixedTemperature(Some(28))));

    let left = Arc::new(SimulatedAmp::new());
    let right = Arc::new(SimulatedAmp::calibrated(6200));
    left.set_auto_calibration(Some(6100));
    right.set_auto_calibration(Some(6050));

    let a = fleet.attach(DeviceSettings::new(0x38, 0), left.clone()).await?;
    let b = fleet.attach(DeviceSettings::new(0x39, 1), right.clone()).await?;
    println!("profiles: {:?}", fleet.profile_names());

    fleet.on_rate_selected(48000).await?;
    fleet.on_stream_open(a, StreamDirection::Playback).await?;
    println!("after first open: left playing {}, right playing {}", left.is_playing(), right.is_playing());
    fleet.on_stream_open(b, StreamDirection::Playback).await?;
    println!("after second open: left playing {}, right playing {}", left.is_playing(), right.is_playing());

    fleet.set_profile(1).await?;
    fleet.set_volume_step(a, 0).await?;

    let report = fleet.calibrate().await?;
    for device in &report.devices {
        println!("amp{} calibration: {:?}", device.index, device.result);
    }

    right.crash_dsp();
    println!("monitor: {:?}", fleet.monitor_once(b).await?);

    for index in [a, b] {
        fleet.on_stream_close(index, StreamDirection::Playback).await?;
        println!("{:?}", fleet.status(index).await?);
    }

    println!("{}", fleet.blackbox_report());

    fleet.detach(b).await?;
    fleet.detach(a).await?;
    Ok(())
}
