use std::sync::Arc;

use crate::error::{AmpError, Result};
use crate::firmware::Container;
use crate::fleet::Lookup;
use crate::hal::RampSpeed;
use crate::observability::{BlackboxId, BlackboxSnapshot};

use super::barrier::bit;
use super::coordinator::FleetCoordinator;
use super::state::{DspState, FwState};

/// Which participation request a mixer control changes
#[derive(Debug, Clone, Copy)]
enum Participation {
    Active(bool),
    Pause(bool),
}

impl FleetCoordinator {
    /// Current mixer profile index
    pub fn profile(&self) -> usize {
        self.shared().mixer_profile
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.shared()
            .profiles
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Select a mixer profile. Returns false when it was already selected.
    pub async fn set_profile(&self, mixer: usize) -> Result<bool> {
        let _gate = self.gate.read().await;
        self.apply_profile(mixer).await
    }

    pub(crate) async fn apply_profile(&self, mixer: usize) -> Result<bool> {
        let profile = {
            let mut shared = self.shared();
            let container = shared
                .container
                .clone()
                .ok_or_else(|| AmpError::BadParameter("no container loaded".to_string()))?;
            if mixer >= shared.profiles.len() {
                return Err(AmpError::BadParameter(format!(
                    "profile {} out of range ({} available)",
                    mixer,
                    shared.profiles.len()
                )));
            }
            let profile = shared
                .profiles
                .resolve(&container, mixer, shared.rate)
                .ok_or_else(|| {
                    AmpError::BadParameter(format!("profile {} has no variant at {} Hz", mixer, shared.rate))
                })?;
            if mixer == shared.mixer_profile && profile == shared.profile {
                return Ok(false);
            }
            shared.mixer_profile = mixer;
            shared.profile = profile;
            profile
        };

        log::info!("profile {} selected (container profile {})", mixer, profile);
        self.switch_profile(profile).await;
        Ok(true)
    }

    /// UI volume step; 0 is the loudest step of the current profile
    pub async fn volume_step(&self, index: usize) -> Result<usize> {
        let device = self.device(Lookup::Index(index))?;
        let st = device.state.lock().await;
        let max = Self::max_vsteps(&st.container, st.profile);
        Ok(max.saturating_sub(st.vstep + 1))
    }

    pub async fn set_volume_step(&self, index: usize, ui: usize) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        let mut st = device.state.lock().await;
        if st.fw_state != FwState::Ok {
            return Err(AmpError::FirmwareNotReady(index));
        }
        let max = Self::max_vsteps(&st.container, st.profile);
        if ui >= max {
            return Err(AmpError::BadParameter(format!(
                "volume step {} out of range ({} available)",
                ui, max
            )));
        }

        let vstep = max - ui - 1;
        let profile = st.profile;
        if let Some(slot) = st.prof_vsteps.get_mut(profile) {
            *slot = vstep;
        }
        st.vstep = vstep;

        if !(st.configured.is_configured() && st.streams.playback && st.dsp_state.is_running()) {
            return Ok(());
        }

        match self.start_locked(&device, &mut st, profile, vstep).await {
            Ok(()) => {
                st.set_dsp_state(DspState::Invalidated);
                self.make_audible(&device, &st).await;
                Ok(())
            }
            Err(e) => {
                st.set_dsp_state(DspState::Fail);
                drop(st);
                self.note_running(index, false);
                Err(e)
            }
        }
    }

    fn max_vsteps(container: &Option<Arc<Container>>, profile: usize) -> usize {
        container
            .as_ref()
            .map(|c| c.max_vsteps(profile))
            .unwrap_or(0)
    }

    pub async fn active(&self, index: usize) -> Result<bool> {
        let device = self.device(Lookup::Index(index))?;
        let active = device.state.lock().await.requests.active;
        Ok(active)
    }

    pub async fn set_active(&self, index: usize, active: bool) -> Result<()> {
        self.participate(index, Participation::Active(active)).await
    }

    pub async fn paused(&self, index: usize) -> Result<bool> {
        let device = self.device(Lookup::Index(index))?;
        let paused = device.state.lock().await.requests.pause;
        Ok(paused)
    }

    pub async fn set_pause(&self, index: usize, pause: bool) -> Result<()> {
        self.participate(index, Participation::Pause(pause)).await
    }

    /// Stop a device that should no longer run, start one that now should
    async fn participate(&self, index: usize, request: Participation) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        let (was_running, should_run, playback) = {
            let mut st = device.state.lock().await;
            let before = st.requests.active && !st.requests.pause;
            match request {
                Participation::Active(active) => st.requests.active = active,
                Participation::Pause(pause) => st.requests.pause = pause,
            }
            let after = st.requests.active && !st.requests.pause;

            let mut shared = self.shared();
            if after {
                shared.inactive &= !bit(index);
            } else {
                shared.inactive |= bit(index);
            }
            drop(shared);

            let running = before && st.dsp_state.is_running();
            (running, after, st.streams.playback)
        };

        if was_running && !should_run {
            log::info!("[amp{}] leaving playback ({:?})", index, request);
            device.monitor.cancel_and_wait().await;
            self.leave_barrier(index).await;
            self.power_off(&device).await;
        } else if !should_run {
            // Peers may be waiting on a device that is no longer active
            self.leave_barrier(index).await;
        } else if playback {
            log::info!("[amp{}] joining playback ({:?})", index, request);
            self.power_on(&device).await?;
        }
        Ok(())
    }

    pub async fn muted(&self, index: usize) -> Result<bool> {
        let device = self.device(Lookup::Index(index))?;
        let muted = device.state.lock().await.requests.mute;
        Ok(muted)
    }

    /// Record a mute request, applied now only if the device is playing
    pub async fn set_mute(&self, index: usize, mute: bool) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        let mut st = device.state.lock().await;
        st.requests.mute = mute;
        if !(st.configured.is_configured() && st.streams.playback) {
            return Ok(());
        }
        if mute {
            device.dsp.mute(RampSpeed::Normal).await
        } else {
            device.dsp.unmute().await
        }
    }

    /// Drop the shared container and fetch it again.
    ///
    /// Devices that were `Ok` go through `Reloading` and keep running; the
    /// others get a cold load. `force == false` does nothing.
    pub async fn reload(&self, force: bool) -> Result<()> {
        if !force {
            return Ok(());
        }
        let _gate = self.gate.read().await;

        let devices = {
            let mut shared = self.shared();
            shared.container = None;
            shared.profiles = Default::default();
            shared.registry.iter().map(|(_, d)| d.clone()).collect::<Vec<_>>()
        };

        for device in &devices {
            let mut st = device.state.lock().await;
            st.container = None;
            if st.fw_state == FwState::Ok {
                st.set_fw_state(FwState::Reloading);
            } else {
                st.set_fw_state(FwState::Pending);
            }
        }
        log::info!("reloading {} for {} devices", self.loader.name(), devices.len());

        let mut first_error = None;
        for device in &devices {
            if let Err(e) = self.load_firmware(device).await {
                log::error!("[amp{}] reload failed: {}", device.index(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Persisted resistance of one device. Fails unless the valid flag is set.
    pub async fn calibration_value(&self, lookup: Lookup) -> Result<u16> {
        let _gate = self.gate.read().await;
        let device = self.device(lookup)?;
        let mut st = device.state.lock().await;

        match device.dsp.read_calibration().await? {
            Some(value) => {
                st.calibration.value = value;
                st.calibration.valid = true;
                Ok(value)
            }
            None => {
                st.calibration.valid = false;
                Err(AmpError::BadParameter(format!(
                    "device {} has no valid calibration",
                    device.index()
                )))
            }
        }
    }

    pub async fn calibration_value_by_channel(&self, channel: u8) -> Result<u16> {
        self.calibration_value(Lookup::Channel(channel)).await
    }

    /// Write a resistance to calibration memory.
    ///
    /// A device that is not running, or whose write fails, keeps the value
    /// pending for its next start.
    pub async fn set_calibration_value(&self, lookup: Lookup, value: u16) -> Result<()> {
        if value == 0 {
            return Err(AmpError::BadParameter("calibration value must be non-zero".to_string()));
        }
        let _gate = self.gate.read().await;
        let device = self.device(lookup)?;
        let index = device.index();
        let mut st = device.state.lock().await;

        if st.fw_state != FwState::Ok || !st.dsp_state.is_running() {
            st.calibration.pending = Some(value);
            log::info!("[amp{}] calibration {} pending until next start", index, value);
            return Ok(());
        }

        match device.dsp.write_calibration(value).await {
            Ok(()) => {
                st.calibration.value = value;
                st.calibration.valid = true;
                st.calibration.pending = None;
                Ok(())
            }
            Err(e) => {
                st.calibration.pending = Some(value);
                log::warn!("[amp{}] calibration write failed, kept pending: {}", index, e);
                Err(e)
            }
        }
    }

    pub async fn set_calibration_value_by_channel(&self, channel: u8, value: u16) -> Result<()> {
        self.set_calibration_value(Lookup::Channel(channel), value).await
    }

    /// Opaque connection id pair held for the host DSP
    pub fn ipc_id(&self) -> Result<(u32, u32)> {
        let shared = self.shared();
        shared
            .registry
            .head()
            .map(|_| shared.ipc_id)
            .ok_or_else(|| AmpError::NoDevice("no head device".to_string()))
    }

    pub fn set_ipc_id(&self, first: u32, second: u32) -> Result<()> {
        let mut shared = self.shared();
        if shared.registry.head().is_none() {
            return Err(AmpError::NoDevice("no head device".to_string()));
        }
        shared.ipc_id = (first, second);
        Ok(())
    }

    pub async fn speaker_gain(&self, index: usize) -> Result<u8> {
        let device = self.device(Lookup::Index(index))?;
        let gain = device.state.lock().await.speaker_gain;
        Ok(gain)
    }

    /// Store the gain; written now only if the device is playing
    pub async fn set_speaker_gain(&self, index: usize, gain: u8) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;
        let mut st = device.state.lock().await;
        st.speaker_gain = gain;
        if st.configured.is_configured() && st.streams.playback {
            device.dsp.set_gain(gain).await?;
        }
        Ok(())
    }

    /// Enable or disable the DSP's automatic calibration on every device
    pub async fn set_auto_calibration(&self, enabled: bool) -> Result<()> {
        let _gate = self.gate.read().await;
        let mut first_error = None;
        for device in self.devices() {
            let _st = device.state.lock().await;
            if let Err(e) = device.dsp.set_auto_calibration_disabled(!enabled).await {
                log::warn!("[amp{}] auto-calibration not changed: {}", device.index(), e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// All blackbox counters of one device; non-keep counters reset
    pub fn blackbox(&self, lookup: Lookup) -> Result<BlackboxSnapshot> {
        let device = self.device(lookup)?;
        Ok(device.counters.drain())
    }

    pub fn blackbox_value(&self, lookup: Lookup, id: BlackboxId, reset: bool) -> Result<u64> {
        let device = self.device(lookup)?;
        Ok(device.counters.take(id, reset))
    }
}
