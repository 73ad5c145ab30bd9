mod common;

use ampsync::engine::DspState;
use ampsync::hal::mock::StartBehavior;
use ampsync::hal::registers::status1;
use ampsync::hal::StreamDirection;
use ampsync::AmpError;

use common::fleet;

#[tokio::test]
async fn test_unmute_waits_for_every_active_device() {
    let rig = fleet(3).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();

    // Two of three started: running but held muted
    assert_eq!(rig.fleet.sync_count(), 2);
    for amp in &rig.amps[..2] {
        assert!(amp.is_running());
        assert!(amp.is_muted());
    }

    rig.fleet.on_stream_open(2, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 0);
    assert!(rig.amps.iter().all(|amp| amp.is_playing()));
}

#[tokio::test]
async fn test_failed_start_does_not_block_release() {
    let rig = fleet(2).await;
    rig.amps[1].set_start_behavior(StartBehavior::Fail);

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_muted());

    let result = rig.fleet.on_stream_open(1, StreamDirection::Playback).await;
    assert!(matches!(result, Err(AmpError::DeviceFault { index: 1, .. })));

    assert!(rig.amps[0].is_playing());
    assert!(!rig.amps[1].is_playing());
    assert_eq!(rig.fleet.status(1).await.unwrap().dsp_state, DspState::Fail);
    assert!(!rig.fleet.status(1).await.unwrap().speaker_damaged);
}

#[tokio::test]
async fn test_damaged_speaker_flagged_and_kept_muted() {
    let rig = fleet(2).await;
    rig.amps[1].set_start_behavior(StartBehavior::Fail);
    rig.amps[1].raise_sticky(status1::DAMAGED_SPEAKER);

    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap_err();
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();

    let damaged = rig.fleet.status(1).await.unwrap();
    assert!(damaged.speaker_damaged);
    assert!(rig.amps[1].is_muted());
    assert!(rig.amps[0].is_playing());
}

#[tokio::test]
async fn test_full_stop_rearms_barrier() {
    let rig = fleet(2).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 1);

    rig.fleet.on_stream_close(0, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 0);

    // A fresh episode forms once both are open again
    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[1].is_muted());
    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps.iter().all(|amp| amp.is_playing()));
}

#[tokio::test]
async fn test_inactive_device_not_waited_for() {
    let rig = fleet(2).await;
    rig.fleet.set_active(1, false).await.unwrap();
    assert_eq!(rig.fleet.active_devices(), vec![0]);

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_playing());

    // Inactive device records the stream but stays off
    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.amps[1].start_count(), 0);
}

#[tokio::test]
async fn test_mute_request_held_through_release() {
    let rig = fleet(1).await;
    rig.fleet.set_mute(0, true).await.unwrap();

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_running());
    assert!(rig.amps[0].is_muted());

    rig.fleet.set_mute(0, false).await.unwrap();
    assert!(rig.amps[0].is_playing());
    assert!(!rig.fleet.muted(0).await.unwrap());
}

#[tokio::test]
async fn test_capture_only_peer_closing_keeps_episode() {
    let rig = fleet(2).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(1, StreamDirection::Capture).await.unwrap();
    rig.fleet.on_stream_close(1, StreamDirection::Capture).await.unwrap();

    // Device 0 is still counted and waiting for its peer
    assert_eq!(rig.fleet.sync_count(), 1);
    assert!(rig.amps[0].is_muted());

    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 0);
    assert!(rig.amps.iter().all(|amp| amp.is_playing()));
}

#[tokio::test]
async fn test_stopping_started_peer_keeps_others_waiting() {
    let rig = fleet(3).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_close(1, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 1);

    rig.fleet.on_stream_open(2, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_muted());
    assert!(rig.amps[2].is_muted());

    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps.iter().all(|amp| amp.is_playing()));
}

#[tokio::test]
async fn test_deactivating_waiting_peer_releases_others() {
    let rig = fleet(2).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_muted());

    rig.fleet.set_active(1, false).await.unwrap();
    assert_eq!(rig.fleet.active_devices(), vec![0]);
    assert_eq!(rig.fleet.sync_count(), 0);
    assert!(rig.amps[0].is_playing());
    assert_eq!(rig.amps[1].start_count(), 0);
}

#[tokio::test]
async fn test_pausing_waiting_peer_releases_others() {
    let rig = fleet(3).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.on_stream_open(2, StreamDirection::Playback).await.unwrap();
    assert_eq!(rig.fleet.sync_count(), 2);

    rig.fleet.set_pause(1, true).await.unwrap();
    assert!(rig.amps[0].is_playing());
    assert!(rig.amps[2].is_playing());

    // Resuming later starts the device on its own
    rig.fleet.set_pause(1, false).await.unwrap();
    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[1].is_playing());
}

#[tokio::test]
async fn test_detaching_waiting_peer_releases_others() {
    let rig = fleet(2).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps[0].is_muted());

    rig.fleet.detach(1).await.unwrap();
    assert_eq!(rig.fleet.device_count(), 1);
    assert_eq!(rig.fleet.sync_count(), 0);
    assert!(rig.amps[0].is_playing());
}

#[tokio::test]
async fn test_stopping_unstarted_peer_keeps_episode_open() {
    let rig = fleet(2).await;

    rig.fleet.on_stream_open(0, StreamDirection::Playback).await.unwrap();
    rig.fleet.stop_device(1).await.unwrap();

    // Device 1 is still active, so device 0 keeps waiting for it
    assert_eq!(rig.fleet.sync_count(), 1);
    assert!(rig.amps[0].is_muted());

    rig.fleet.on_stream_open(1, StreamDirection::Playback).await.unwrap();
    assert!(rig.amps.iter().all(|amp| amp.is_playing()));
}
