use std::sync::Arc;
use std::time::Duration;

use crate::error::{AmpError, Result};
use crate::fleet::{AmpDevice, DeviceState, Lookup};

use super::barrier::Arrival;
use super::coordinator::FleetCoordinator;
use super::state::{DspState, FwState};

impl FleetCoordinator {
    /// Issue a DSP start and its side effects. Caller holds the device lock.
    ///
    /// On success the pending calibration value is written and interrupts are
    /// re-armed. Sticky faults are cleared whatever the outcome, after a
    /// failed start has had its damaged-speaker flag noted.
    pub(crate) async fn start_locked(
        &self,
        device: &AmpDevice,
        st: &mut DeviceState,
        profile: usize,
        vstep: usize,
    ) -> Result<()> {
        let index = device.index();
        let result = device.dsp.start(profile, vstep).await;

        if result.is_ok() {
            if let Some(value) = st.calibration.pending {
                match device.dsp.write_calibration(value).await {
                    Ok(()) => {
                        st.calibration.pending = None;
                        st.calibration.value = value;
                        st.calibration.valid = value > 0;
                        log::info!("[amp{}] forced calibration {} written", index, value);
                    }
                    Err(e) => log::warn!("[amp{}] pending calibration kept: {}", index, e),
                }
            }
            if device.settings.overlay.is_some() {
                self.schedule_overlay(device, Duration::ZERO);
            }
        }

        // The flags are about to be cleared; keep what a failed start reported
        if result.is_err() {
            if let Ok(status) = device.dsp.status().await {
                if status.speaker_damaged() {
                    st.speaker_damaged = true;
                }
            }
        }

        if let Err(e) = device.dsp.clear_sticky().await {
            log::warn!("[amp{}] sticky flags not cleared: {}", index, e);
        }

        if result.is_ok() && !device.settings.skip_interrupts {
            if let Err(e) = device.dsp.enable_interrupts(self.interrupt_mask()).await {
                log::warn!("[amp{}] interrupts not re-armed: {}", index, e);
            }
        }

        result
    }

    /// Start one device and count it into the barrier
    pub(crate) async fn power_on(&self, device: &Arc<AmpDevice>) -> Result<()> {
        let index = device.index();
        let result = {
            let mut st = device.state.lock().await;
            if st.fw_state != FwState::Ok {
                return Err(AmpError::FirmwareNotReady(index));
            }
            if st.dsp_state == DspState::Done {
                return Ok(());
            }

            self.note_running(index, false);
            st.set_dsp_state(DspState::Pending);

            let (profile, vstep) = (st.profile, st.vstep);
            let result = self.start_locked(device, &mut st, profile, vstep).await;
            match &result {
                Ok(()) => {
                    st.set_dsp_state(DspState::Done);
                    log::info!("[amp{}] started: profile {}, vstep {}", index, profile, vstep);
                }
                Err(e) => {
                    st.set_dsp_state(DspState::Fail);
                    log::error!("[amp{}] start failed: {}", index, e);
                }
            }
            result
        };

        let arrival = if result.is_ok() {
            Arrival::Started
        } else {
            Arrival::Failed
        };
        self.join_barrier(index, arrival).await;
        result
    }

    /// Stop one device. The overlay task is joined before the DSP stops.
    pub(crate) async fn power_off(&self, device: &AmpDevice) {
        device.overlay.cancel_and_wait().await;

        let index = device.index();
        let mut st = device.state.lock().await;
        if st.fw_state != FwState::Ok {
            return;
        }
        if let Err(e) = device.dsp.stop().await {
            log::warn!("[amp{}] stop failed: {}", index, e);
        }
        st.set_dsp_state(DspState::Stopped);
        self.note_running(index, false);
        log::info!("[amp{}] stopped", index);
    }

    /// Explicit start outside of stream events
    pub async fn start_device(&self, index: usize) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;
        self.power_on(&device).await
    }

    /// Explicit stop: joins the monitor and leaves the barrier
    pub async fn stop_device(&self, index: usize) -> Result<()> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;
        device.monitor.cancel_and_wait().await;
        self.leave_barrier(index).await;
        self.power_off(&device).await;
        Ok(())
    }
}
