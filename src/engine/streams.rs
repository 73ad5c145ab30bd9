use std::sync::Arc;

use crate::error::{AmpError, Result};
use crate::fleet::{AmpDevice, Lookup};
use crate::hal::StreamDirection;

use super::coordinator::FleetCoordinator;
use super::state::{DspState, FwState};

impl FleetCoordinator {
    /// A stream direction opened on one device.
    ///
    /// Opening playback starts the device unless it is paused or inactive;
    /// the unmute waits for the barrier. Capture is only recorded.
    pub async fn on_stream_open(&self, index: usize, direction: StreamDirection) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        let should_start = {
            let mut st = device.state.lock().await;
            if st.fw_state != FwState::Ok {
                return Err(AmpError::FirmwareNotReady(index));
            }
            st.streams.set(direction, true);
            st.reconcile_configured();
            log::debug!("[amp{}] {:?} open", index, direction);

            direction == StreamDirection::Playback && st.requests.active && !st.requests.pause
        };

        if should_start {
            self.power_on(&device).await
        } else {
            Ok(())
        }
    }

    /// A stream direction closed on one device. The device keeps running
    /// until both directions are closed.
    pub async fn on_stream_close(&self, index: usize, direction: StreamDirection) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;

        {
            let mut st = device.state.lock().await;
            if !st.streams.get(direction) {
                return Ok(());
            }
            st.streams.set(direction, false);
            log::debug!("[amp{}] {:?} closed", index, direction);
            if st.streams.any() {
                st.reconcile_configured();
                return Ok(());
            }
        }

        self.full_stop(&device).await;
        Ok(())
    }

    /// Stop a device whose streams are all gone and take it out of the barrier
    async fn full_stop(&self, device: &Arc<AmpDevice>) {
        device.monitor.cancel_and_wait().await;
        self.leave_barrier(device.index()).await;

        // Without an interrupt line the last faults are only seen here
        if device.settings.irq_line.is_none() {
            let mut st = device.state.lock().await;
            if st.fw_state == FwState::Ok && st.dsp_state.is_running() {
                self.account_status(device, &mut st).await;
            }
        }

        self.power_off(device).await;
    }

    /// Map the current mixer profile onto the container profile for `rate`
    pub async fn on_rate_selected(&self, rate: u32) -> Result<()> {
        let _gate = self.gate.read().await;

        let profile = {
            let mut shared = self.shared();
            let container = shared
                .container
                .clone()
                .ok_or_else(|| AmpError::BadParameter("no container loaded".to_string()))?;
            let profile = shared
                .profiles
                .resolve(&container, shared.mixer_profile, rate)
                .ok_or_else(|| AmpError::BadParameter(format!("rate {} not supported", rate)))?;
            shared.rate = rate;
            let changed = shared.profile != profile;
            shared.profile = profile;
            changed.then_some(profile)
        };

        for device in self.devices() {
            device.state.lock().await.rate = rate;
        }
        log::info!("rate {} selected", rate);

        if let Some(profile) = profile {
            self.switch_profile(profile).await;
        }
        Ok(())
    }

    /// Mixer profile chosen by the stream-control side
    pub async fn on_profile_selected(&self, profile_id: usize) -> Result<()> {
        let _gate = self.gate.read().await;
        self.apply_profile(profile_id).await.map(|_| ())
    }

    /// Select `profile` on every device, restarting the ones that play.
    /// Restarted devices end `Invalidated` and are made audible together.
    pub(crate) async fn switch_profile(&self, profile: usize) {
        let mut restarted = Vec::new();

        for device in self.devices() {
            let index = device.index();
            let mut st = device.state.lock().await;
            st.select_profile(profile);
            if !(st.configured.is_configured() && st.streams.playback && st.dsp_state.is_running()) {
                continue;
            }

            let vstep = st.vstep;
            match self.start_locked(&device, &mut st, profile, vstep).await {
                Ok(()) => {
                    st.set_dsp_state(DspState::Invalidated);
                    drop(st);
                    restarted.push(device);
                }
                Err(e) => {
                    log::error!("[amp{}] restart on profile {} failed: {}", index, profile, e);
                    st.set_dsp_state(DspState::Fail);
                    drop(st);
                    self.note_running(index, false);
                }
            }
        }

        for device in restarted {
            let st = device.state.lock().await;
            self.make_audible(&device, &st).await;
        }
    }
}
