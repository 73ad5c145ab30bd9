mod common;

use ampsync::engine::FwState;
use ampsync::firmware::FileFirmwareSource;
use ampsync::hal::mock::{SimulatedAmp, StaticFirmware};
use ampsync::hal::StreamDirection;
use ampsync::resilience::RetryPolicy;
use ampsync::{AmpError, DeviceSettings, FleetCoordinator};
use std::sync::Arc;
use tempfile::TempDir;

use common::{config, container, fleet};

#[tokio::test]
async fn test_container_fetched_once_for_the_fleet() {
    let rig = fleet(3).await;
    assert_eq!(rig.firmware.fetch_count(), 1);
    assert_eq!(rig.fleet.device_count(), 3);
    assert_eq!(rig.fleet.head_index(), Some(0));
    for i in 0..3 {
        assert_eq!(rig.fleet.status(i).await.unwrap().fw_state, FwState::Ok);
    }
}

#[tokio::test]
async fn test_concurrent_attach_shares_one_fetch() {
    let firmware = Arc::new(StaticFirmware::new(container().encode()));
    let fleet = FleetCoordinator::new(config(), firmware.clone());

    let (a, b) = tokio::join!(
        fleet.attach(DeviceSettings::new(0x38, 0), Arc::new(SimulatedAmp::new())),
        fleet.attach(DeviceSettings::new(0x39, 1), Arc::new(SimulatedAmp::new())),
    );
    let mut indices = vec![a.unwrap(), b.unwrap()];
    indices.sort();
    assert_eq!(indices, vec![0, 1]);
    assert_eq!(firmware.fetch_count(), 1);
}

#[tokio::test]
async fn test_default_profile_by_name() {
    let mut config = config();
    config.default_profile = Some("voice".to_string());
    let rig = common::fleet_with(config, vec![Arc::new(SimulatedAmp::new())]).await;

    assert_eq!(rig.fleet.profile(), 1);
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.amps[0].last_start(), Some((2, 0)));
}

#[tokio::test]
async fn test_unknown_default_profile_uses_first() {
    let mut config = config();
    config.default_profile = Some("cinema".to_string());
    let rig = common::fleet_with(config, vec![Arc::new(SimulatedAmp::new())]).await;

    assert_eq!(rig.fleet.profile(), 0);
    assert_eq!(rig.fleet.status(0).await.unwrap().profile, 0);
}

#[tokio::test]
async fn test_late_device_joins_current_profile() {
    let rig = fleet(1).await;
    rig.fleet.set_profile(1).await.unwrap();

    let index = rig
        .fleet
        .attach(DeviceSettings::new(0x39, 1), Arc::new(SimulatedAmp::new()))
        .await
        .unwrap();
    assert_eq!(rig.fleet.status(index).await.unwrap().profile, 2);
    assert_eq!(rig.fleet.profile(), 1);
}

#[tokio::test]
async fn test_registry_full_rejects_attach() {
    let rig = fleet(4).await;
    let result = rig
        .fleet
        .attach(DeviceSettings::new(0x3c, 4), Arc::new(SimulatedAmp::new()))
        .await;
    assert!(matches!(result, Err(AmpError::BadParameter(_))));
    assert_eq!(rig.fleet.device_count(), 4);
}

#[tokio::test]
async fn test_channel_lookup() {
    let firmware = Arc::new(StaticFirmware::new(container().encode()));
    let fleet = FleetCoordinator::new(config(), firmware);
    fleet
        .attach(DeviceSettings::new(0x38, 3), Arc::new(SimulatedAmp::new()))
        .await
        .unwrap();
    fleet
        .attach(DeviceSettings::new(0x39, 1), Arc::new(SimulatedAmp::new()))
        .await
        .unwrap();

    assert_eq!(fleet.index_for_channel(3), Some(0));
    assert_eq!(fleet.index_for_channel(1), Some(1));
    assert_eq!(fleet.index_for_channel(0), None);
}

#[tokio::test]
async fn test_load_from_firmware_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("amp.cnt"), container().encode()).unwrap();

    let mut config = config();
    config.firmware_retry = RetryPolicy::firmware_fetch();
    let fleet = FleetCoordinator::new(config, Arc::new(FileFirmwareSource::new(dir.path())));
    fleet
        .attach(DeviceSettings::new(0x38, 0), Arc::new(SimulatedAmp::new()))
        .await
        .unwrap();

    assert_eq!(fleet.status(0).await.unwrap().fw_state, FwState::Ok);
    assert_eq!(fleet.profile_names(), vec!["music".to_string(), "voice".to_string()]);
}

#[tokio::test]
async fn test_missing_firmware_file_fails_device() {
    let dir = TempDir::new().unwrap();
    let mut config = config();
    config.firmware_retry = RetryPolicy::schedule(2, &[std::time::Duration::from_millis(20)]);
    let fleet = FleetCoordinator::new(config, Arc::new(FileFirmwareSource::new(dir.path())));

    let index = fleet
        .attach(DeviceSettings::new(0x38, 0), Arc::new(SimulatedAmp::new()))
        .await
        .unwrap();
    assert_eq!(fleet.status(index).await.unwrap().fw_state, FwState::Fail);
    assert!(fleet.container().is_none());
    assert!(fleet.profile_names().is_empty());
}
