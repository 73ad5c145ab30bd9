use crate::fleet::AmpDevice;
use crate::hal::{registers::interrupts, RampSpeed};

use super::coordinator::{FleetCoordinator, FleetShared};
use super::state::{DspState, FwState};
use crate::fleet::DeviceState;

/// How a device's start attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Started,
    Failed,
}

/// Devices released together when a barrier episode completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Devices taking part in the episode
    pub mask: u8,
    /// Participants whose start failed
    pub failed: u8,
}

impl Release {
    pub fn includes(&self, index: usize) -> bool {
        self.mask & bit(index) != 0
    }

    pub fn failed(&self, index: usize) -> bool {
        self.failed & bit(index) != 0
    }
}

pub(crate) fn bit(index: usize) -> u8 {
    if index < 8 {
        1 << index
    } else {
        0
    }
}

/// Synchronization counter of one start episode.
///
/// The expected set is taken at the first arrival and every participant is
/// counted once, whether its start worked or not. It only shrinks afterwards,
/// when a participant withdraws or drops out of the active set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBarrier {
    expected: Option<u8>,
    started: u8,
    failed: u8,
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Devices that completed a start in the current episode
    pub fn count(&self) -> usize {
        (self.started | self.failed).count_ones() as usize
    }

    pub fn expected(&self) -> Option<u8> {
        self.expected
    }

    /// Devices that started in this episode and are still held muted
    pub fn started(&self) -> u8 {
        self.started
    }

    /// Record an arrival. `expected` is used only when this opens an episode.
    pub fn arrive(&mut self, index: usize, arrival: Arrival, expected: u8) -> Option<Release> {
        let mask = match self.expected {
            Some(mask) => mask,
            None if expected == 0 => return None,
            None => {
                self.expected = Some(expected);
                expected
            }
        };

        let bit = bit(index);
        if mask & bit == 0 {
            return None;
        }
        match arrival {
            Arrival::Started => {
                self.started |= bit;
                self.failed &= !bit;
            }
            Arrival::Failed => {
                self.failed |= bit;
                self.started &= !bit;
            }
        }

        if (self.started | self.failed) & mask != mask {
            return None;
        }
        self.complete(mask)
    }

    /// Forget `index`'s arrival and narrow the expected set to `active`.
    ///
    /// An episode with no arrivals left closes; one whose remaining
    /// participants have all arrived is released.
    pub fn withdraw(&mut self, index: usize, active: u8) -> Option<Release> {
        let mask = self.expected? & active;
        let bit = bit(index);
        self.started &= !bit;
        self.failed &= !bit;

        let arrived = (self.started | self.failed) & mask;
        if arrived == 0 {
            self.reset();
            return None;
        }
        self.expected = Some(mask);
        if arrived != mask {
            return None;
        }
        self.complete(mask)
    }

    fn complete(&mut self, mask: u8) -> Option<Release> {
        let release = Release {
            mask,
            failed: self.failed & mask,
        };
        self.reset();
        Some(release)
    }
}

impl FleetCoordinator {
    /// Devices that should be live under the current profile
    pub(crate) fn active_mask(shared: &FleetShared) -> u8 {
        let profile_mask = shared
            .container
            .as_ref()
            .and_then(|c| c.profile(shared.profile))
            .map(|p| if p.device_mask == 0 { u8::MAX } else { p.device_mask })
            .unwrap_or(u8::MAX);
        shared.registry.attached_mask() & profile_mask & !shared.inactive
    }

    /// Active devices not already running: the ones a new episode waits for
    fn episode_mask(shared: &FleetShared) -> u8 {
        Self::active_mask(shared) & !shared.running
    }

    /// Count a finished start and release the episode if it is complete
    pub(crate) async fn join_barrier(&self, index: usize, arrival: Arrival) {
        let release = {
            let mut shared = self.shared();
            let expected = Self::episode_mask(&shared);
            let release = shared.barrier.arrive(index, arrival, expected);
            match arrival {
                Arrival::Started => shared.running |= bit(index),
                Arrival::Failed => shared.running &= !bit(index),
            }
            log::debug!(
                "[amp{}] barrier {}/{}",
                index,
                shared.barrier.count(),
                shared.barrier.expected().map(|m| m.count_ones()).unwrap_or(0)
            );
            release
        };

        if let Some(release) = release {
            self.release(release).await;
        }
    }

    /// Take a stopping or departing device out of the open episode.
    ///
    /// Peers still waiting are released when the device was the last one
    /// they were waiting for.
    pub(crate) async fn leave_barrier(&self, index: usize) {
        let release = {
            let mut shared = self.shared();
            let active = Self::active_mask(&shared);
            let release = shared.barrier.withdraw(index, active);
            shared.running &= !bit(index);
            release
        };

        if let Some(release) = release {
            log::debug!("[amp{}] left barrier, releasing peers", index);
            self.release(release).await;
        }
    }

    /// Close the open episode outright. Devices it held muted are no longer
    /// counted as running, so the next episode waits for them again.
    pub(crate) fn reset_barrier(&self) {
        let mut shared = self.shared();
        let stranded = shared.barrier.started();
        shared.running &= !stranded;
        shared.barrier.reset();
    }

    async fn release(&self, release: Release) {
        log::info!(
            "barrier released: {} devices, {} failed",
            release.mask.count_ones(),
            release.failed.count_ones()
        );

        for device in self.devices() {
            let index = device.index();
            if !release.includes(index) {
                continue;
            }

            let mut st = device.state.lock().await;
            if release.failed(index) {
                self.handle_damaged_speaker(&device, &mut st).await;
                continue;
            }
            if st.fw_state != FwState::Ok || st.dsp_state != DspState::Done {
                continue;
            }
            st.set_dsp_state(DspState::Done);
            self.make_audible(&device, &st).await;
            drop(st);

            self.schedule_monitor(&device);
        }
    }

    /// Apply gain and unmute, unless the mixer asked for mute
    pub(crate) async fn make_audible(&self, device: &AmpDevice, st: &DeviceState) {
        let index = device.index();
        if let Err(e) = device.dsp.set_gain(st.speaker_gain).await {
            log::warn!("[amp{}] gain not applied: {}", index, e);
        }
        if st.requests.mute {
            log::info!("[amp{}] held muted by request", index);
            return;
        }
        if let Err(e) = device.dsp.unmute().await {
            log::error!("[amp{}] unmute failed: {}", index, e);
            return;
        }
        if self.blackbox_enabled() && !device.settings.skip_interrupts {
            if let Err(e) = device.dsp.enable_interrupts(interrupts::NO_CLOCK).await {
                log::warn!("[amp{}] clock interrupt not armed: {}", index, e);
            }
        }
    }

    async fn handle_damaged_speaker(&self, device: &AmpDevice, st: &mut DeviceState) {
        let index = device.index();
        if let Err(e) = device.dsp.mute(RampSpeed::Normal).await {
            log::warn!("[amp{}] mute after failed start: {}", index, e);
        }
        if st.speaker_damaged {
            log::error!("[amp{}] damaged speaker detected, kept muted", index);
        } else {
            log::warn!("[amp{}] start failed, kept muted", index);
        }
    }
}
