mod common;

use ampsync::engine::{Configured, DspState, FwState};
use ampsync::hal::mock::{SimulatedAmp, StartBehavior, StaticFirmware};
use ampsync::hal::registers::{self, status1};
use ampsync::hal::StreamDirection;
use ampsync::{AmpError, DeviceSettings, FleetCoordinator};
use std::sync::Arc;
use tokio_test::assert_ok;

use common::{config, container, fleet};

#[tokio::test]
async fn test_playback_open_starts_and_unmutes() {
    let rig = fleet(1).await;
    let amp = &rig.amps[0];

    assert_ok!(rig.fleet.on_stream_open(0, StreamDirection::Playback).await);

    assert!(amp.is_playing());
    let status = rig.fleet.status(0).await.unwrap();
    assert_eq!(status.fw_state, FwState::Ok);
    assert_eq!(status.dsp_state, DspState::Done);
    assert_eq!(status.configured, Configured::Configured);
    assert!(status.streams.playback);
}

#[tokio::test]
async fn test_pending_calibration_written_on_first_start() {
    let rig = fleet(1).await;
    let amp = &rig.amps[0];

    let before = rig.fleet.status(0).await.unwrap();
    assert!(!before.calibration.valid);
    assert_eq!(before.calibration.pending, Some(6000));
    assert_eq!(amp.calibration(), (false, 0));

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();

    assert_eq!(amp.calibration(), (true, 6000));
    let after = rig.fleet.status(0).await.unwrap();
    assert!(after.calibration.valid);
    assert_eq!(after.calibration.pending, None);
}

#[tokio::test]
async fn test_calibrated_device_gets_no_forced_value() {
    let amp = Arc::new(SimulatedAmp::calibrated(6400));
    let rig = common::fleet_with(config(), vec![amp.clone()]).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert_eq!(amp.calibration(), (true, 6400));
    assert_eq!(amp.write_count(registers::MTP_RE25), 0);
}

#[tokio::test]
async fn test_device_stops_only_when_both_directions_closed() {
    let rig = fleet(1).await;
    let amp = &rig.amps[0];

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(0, StreamDirection::Capture).await.unwrap();

    rig.fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();
    assert!(amp.is_running());
    assert_eq!(rig.fleet.status(0).await.unwrap().dsp_state, DspState::Done);

    rig.fleet.on_stream_close(0, StreamDirection::Capture).await.unwrap();
    assert!(!amp.is_running());
    let status = rig.fleet.status(0).await.unwrap();
    assert_eq!(status.dsp_state, DspState::Stopped);
    assert_eq!(status.configured, Configured::NotConfigured);
}

#[tokio::test]
async fn test_capture_alone_does_not_start() {
    let rig = fleet(1).await;
    rig.fleet.on_stream_open(0, StreamDirection::Capture).await.unwrap();

    assert_eq!(rig.amps[0].start_count(), 0);
    assert_eq!(rig.fleet.status(0).await.unwrap().dsp_state, DspState::Stopped);
}

#[tokio::test]
async fn test_duplicate_close_is_ignored() {
    let rig = fleet(1).await;
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();
    let stops = rig.amps[0].write_count(registers::SYS_CONTROL0);

    assert_ok!(rig.fleet.on_stream_close(0, StreamDirection::Playback).await);
    assert_eq!(rig.amps[0].write_count(registers::SYS_CONTROL0), stops);
}

#[tokio::test]
async fn test_not_supported_fails_attempt_not_device() {
    let rig = fleet(1).await;
    let amp = &rig.amps[0];
    amp.set_start_behavior(StartBehavior::NotSupported);
    amp.set_register(registers::INTERRUPT_ENABLE, 0);
    amp.raise_sticky(status1::OVER_TEMPERATURE);

    let result = rig.fleet.on_stream_open(0, StreamDirection::Playback).await;
    assert!(matches!(result, Err(AmpError::NotSupported(_))));

    let status = rig.fleet.status(0).await.unwrap();
    assert_eq!(status.fw_state, FwState::Ok);
    assert_eq!(status.dsp_state, DspState::Fail);
    assert_eq!(status.configured, Configured::Failed);
    // Sticky bits cleared, interrupts left alone, forced value still pending
    assert_eq!(amp.register(registers::STATUS_FLAGS1), 0);
    assert_eq!(amp.register(registers::INTERRUPT_ENABLE), 0);
    assert_eq!(status.calibration.pending, Some(6000));

    amp.set_start_behavior(StartBehavior::Run);
    rig.fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();

    assert!(amp.is_playing());
    assert_ne!(amp.register(registers::INTERRUPT_ENABLE), 0);
    assert_eq!(rig.fleet.status(0).await.unwrap().dsp_state, DspState::Done);
}

#[tokio::test]
async fn test_open_without_firmware_is_rejected() {
    let firmware = Arc::new(StaticFirmware::new(container().encode()).failing_first(8));
    let fleet = FleetCoordinator::new(config(), firmware.clone());
    let amp = Arc::new(SimulatedAmp::new());

    let index = fleet.attach(DeviceSettings::new(0x38, 0), amp.clone()).await.unwrap();
    assert_eq!(fleet.status(index).await.unwrap().fw_state, FwState::Fail);
    assert_eq!(firmware.fetch_count(), 5);

    let result = fleet.on_stream_open(index, StreamDirection::Playback).await;
    assert_eq!(result, Err(AmpError::FirmwareNotReady(index)));
    assert_eq!(amp.start_count(), 0);

    // Three failures left, so the next load succeeds on its fourth try
    fleet.reload(true).await.unwrap();
    assert_eq!(fleet.status(index).await.unwrap().fw_state, FwState::Ok);
    assert_eq!(firmware.fetch_count(), 9);
    assert_ok!(fleet.on_stream_open(index, StreamDirection::Playback).await);
}

#[tokio::test]
async fn test_explicit_stop_and_start() {
    let rig = fleet(1).await;
    let amp = &rig.amps[0];
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();

    rig.fleet.stop_device(0).await.unwrap();
    assert!(!amp.is_running());
    let stopped = rig.fleet.status(0).await.unwrap();
    assert_eq!(stopped.dsp_state, DspState::Stopped);
    assert_eq!(stopped.configured, Configured::NotConfigured);

    rig.fleet.start_device(0).await.unwrap();
    assert!(amp.is_playing());
    let started = rig.fleet.status(0).await.unwrap();
    assert_eq!(started.dsp_state, DspState::Done);
    assert_eq!(started.configured, Configured::Configured);
    assert_eq!(amp.start_count(), 2);
}

#[tokio::test]
async fn test_external_dsp_keeps_configuration_while_streaming() {
    let firmware = Arc::new(StaticFirmware::new(container().encode()));
    let fleet = FleetCoordinator::new(config(), firmware);
    let mut settings = DeviceSettings::new(0x38, 0);
    settings.external_dsp = true;
    fleet.attach(settings, Arc::new(SimulatedAmp::new())).await.unwrap();

    fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    fleet.stop_device(0).await.unwrap();

    let status = fleet.status(0).await.unwrap();
    assert_eq!(status.dsp_state, DspState::Stopped);
    assert_eq!(status.configured, Configured::Configured);

    fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();
    assert_eq!(fleet.status(0).await.unwrap().configured, Configured::NotConfigured);
}

#[tokio::test]
async fn test_history_records_lifecycle() {
    let rig = fleet(1).await;
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();

    use ampsync::engine::Transition::{Dsp, Fw};
    let history = rig.fleet.history(0).await.unwrap();
    assert_eq!(
        history,
        vec![
            Fw(FwState::Pending),
            Fw(FwState::Ok),
            Dsp(DspState::Pending),
            Dsp(DspState::Done),
            Dsp(DspState::Stopped),
        ]
    );
}
