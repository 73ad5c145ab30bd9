use std::sync::Arc;

use crate::error::{AmpError, Result};
use crate::fleet::{AmpDevice, CalibrationState, DeviceState, Lookup};
use crate::hal::RampSpeed;

use super::barrier::bit;
use super::coordinator::FleetCoordinator;
use super::state::{DspState, FwState};

/// Outcome of one device in a calibration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCalibration {
    pub index: usize,
    /// Measured resistance, or why the device did not calibrate
    pub result: std::result::Result<u16, AmpError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationReport {
    pub reference_temp: i16,
    pub devices: Vec<DeviceCalibration>,
}

impl CalibrationReport {
    pub fn succeeded(&self) -> bool {
        self.devices.iter().all(|d| d.result.is_ok())
    }

    pub fn failed_devices(&self) -> Vec<usize> {
        self.devices
            .iter()
            .filter(|d| d.result.is_err())
            .map(|d| d.index)
            .collect()
    }

    pub fn value(&self, index: usize) -> Option<u16> {
        self.devices
            .iter()
            .find(|d| d.index == index)
            .and_then(|d| d.result.as_ref().ok().copied())
    }
}

/// A device left running a profile other than its own must restart on the
/// next start
fn settle_state(st: &mut DeviceState, running_profile: usize) {
    st.set_dsp_state(DspState::Done);
    if running_profile != st.profile {
        st.set_dsp_state(DspState::Invalidated);
    }
}

/// Per-device values restored once the run is over
struct Saved {
    device: Arc<AmpDevice>,
    auto_cal_disabled: Option<bool>,
}

impl FleetCoordinator {
    /// Run a fleet-wide forced calibration and report per-device results.
    ///
    /// Holds the lifecycle gate exclusively, so no stream event, mixer
    /// control or monitor pass runs in between. A device that fails does
    /// not stop the others from being calibrated and left unmuted.
    pub async fn calibrate(&self) -> Result<CalibrationReport> {
        let _gate = self.gate.write().await;

        let head = self.device(Lookup::Head)?;
        {
            let st = head.state.lock().await;
            if st.fw_state != FwState::Ok {
                return Err(AmpError::FirmwareNotReady(head.index()));
            }
            if !st.streams.playback {
                return Err(AmpError::BadParameter(
                    "calibration needs an open playback stream".to_string(),
                ));
            }
        }

        let reference_temp = self.reference_temperature().await;
        log::info!("calibration start, reference {} C", reference_temp);

        let bypass_set = self.enter_bypass(&head).await;
        let devices = self.devices();

        let mut saved = Vec::with_capacity(devices.len());
        for device in &devices {
            let auto_cal_disabled = self.prepare(device, reference_temp).await;
            saved.push(Saved {
                device: device.clone(),
                auto_cal_disabled,
            });
        }

        tokio::time::sleep(std::time::Duration::from_millis(self.config.calibration.settle_ms)).await;

        for device in &devices {
            device.monitor.cancel_and_wait().await;
            self.power_off(device).await;
        }
        self.reset_barrier();

        let cal_profile = self.container().and_then(|c| c.calibration_profile());
        let mut results = Vec::with_capacity(devices.len());
        for device in &devices {
            let started = self.restart_for_calibration(device, cal_profile).await;
            results.push((device.clone(), started));
        }

        for entry in &saved {
            if let Some(disabled) = entry.auto_cal_disabled {
                let _st = entry.device.state.lock().await;
                if let Err(e) = entry.device.dsp.set_auto_calibration_disabled(disabled).await {
                    log::warn!("[amp{}] auto-calibration flag not restored: {}", entry.device.index(), e);
                }
            }
        }

        let mut report = CalibrationReport {
            reference_temp,
            devices: Vec::with_capacity(results.len()),
        };
        for (device, started) in results {
            let result = match started {
                Ok(()) => self.verify(&device).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                log::error!("[amp{}] calibration failed: {}", device.index(), e);
            }
            report.devices.push(DeviceCalibration {
                index: device.index(),
                result,
            });
        }

        if bypass_set {
            let _st = head.state.lock().await;
            if let Err(e) = head.dsp.set_bypass(false).await {
                log::warn!("[amp{}] bypass not released: {}", head.index(), e);
            }
        }

        log::info!(
            "calibration done: {}/{} devices",
            report.devices.len() - report.failed_devices().len(),
            report.devices.len()
        );
        Ok(report)
    }

    /// Calibrate and fold per-device failures into one error
    pub async fn trigger_calibration(&self) -> Result<()> {
        let report = self.calibrate().await?;
        if report.succeeded() {
            Ok(())
        } else {
            Err(AmpError::CalibrationFailed {
                devices: report.failed_devices(),
            })
        }
    }

    async fn reference_temperature(&self) -> i16 {
        let fallback = self.config.calibration.default_reference_temp;
        match &self.temperature {
            Some(sensor) => sensor.reference_temperature().await.unwrap_or_else(|| {
                log::warn!("temperature sensor silent, using {} C", fallback);
                fallback
            }),
            None => fallback,
        }
    }

    /// Returns true when bypass was requested by this run
    async fn enter_bypass(&self, head: &AmpDevice) -> bool {
        let st = head.state.lock().await;
        if !st.configured.is_configured() {
            return false;
        }
        match head.dsp.bypassed().await {
            Ok(true) => false,
            Ok(false) => match head.dsp.set_bypass(true).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[amp{}] bypass not set: {}", head.index(), e);
                    false
                }
            },
            Err(e) => {
                log::warn!("[amp{}] bypass state unreadable: {}", head.index(), e);
                false
            }
        }
    }

    /// Reset calibration memory and force auto-calibration on.
    /// Returns the prior auto-calibration disable flag, if it could be read.
    async fn prepare(&self, device: &AmpDevice, reference_temp: i16) -> Option<bool> {
        let index = device.index();
        let mut st = device.state.lock().await;

        if let Err(e) = device.dsp.clear_calibration_flag().await {
            log::warn!("[amp{}] calibration flag not cleared: {}", index, e);
        }
        if let Err(e) = device.dsp.clear_calibration_value().await {
            log::warn!("[amp{}] calibration value not cleared: {}", index, e);
        }
        st.calibration = CalibrationState::default();

        if let Err(e) = device.dsp.write_reference_temperature(reference_temp).await {
            log::warn!("[amp{}] reference temperature not written: {}", index, e);
        }

        let prior = match device.dsp.auto_calibration_disabled().await {
            Ok(disabled) => Some(disabled),
            Err(e) => {
                log::warn!("[amp{}] auto-calibration flag unreadable: {}", index, e);
                None
            }
        };
        if let Err(e) = device.dsp.set_auto_calibration_disabled(false).await {
            log::warn!("[amp{}] auto-calibration not forced on: {}", index, e);
        }

        // Every device takes part, and stays in after the run
        st.requests.active = true;
        st.requests.pause = false;
        self.shared().inactive &= !bit(index);

        if let Err(e) = device.dsp.mute(RampSpeed::Fast).await {
            log::warn!("[amp{}] flush mute failed: {}", index, e);
        }
        prior
    }

    /// Start outside the barrier and unmute straight away
    async fn restart_for_calibration(&self, device: &AmpDevice, cal_profile: Option<usize>) -> Result<()> {
        let index = device.index();
        let mut st = device.state.lock().await;
        if st.fw_state != FwState::Ok {
            return Err(AmpError::FirmwareNotReady(index));
        }

        let profile = cal_profile.unwrap_or(st.profile);
        let vstep = if cal_profile.is_some() { 0 } else { st.vstep };
        st.set_dsp_state(DspState::Pending);

        if let Err(e) = self.start_locked(device, &mut st, profile, vstep).await {
            st.set_dsp_state(DspState::Fail);
            return Err(e);
        }
        if let Err(e) = device.dsp.unmute().await {
            log::warn!("[amp{}] unmute after calibration start failed: {}", index, e);
        }
        settle_state(&mut st, profile);
        drop(st);
        self.note_running(index, true);
        self.schedule_monitor(device);
        Ok(())
    }

    async fn verify(&self, device: &AmpDevice) -> Result<u16> {
        let index = device.index();
        let policy = self.config.calibration.verify_policy();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let read = {
                let mut st = device.state.lock().await;
                let read = device.dsp.read_calibration().await;
                if let Ok(Some(value)) = read {
                    st.calibration.value = value;
                    st.calibration.valid = true;
                }
                read
            };

            match read {
                Ok(Some(value)) => {
                    log::info!("[amp{}] calibrated: {}", index, value);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => log::warn!("[amp{}] calibration readback failed: {}", index, e),
            }

            match policy.delay_after(attempt) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(AmpError::Timeout(format!(
                        "device {} calibration not confirmed after {} reads",
                        index, attempt
                    )))
                }
            }
        }
    }
}
