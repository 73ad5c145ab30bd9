use std::sync::Arc;
use std::time::Duration;

use crate::buffers::ScratchPool;
use crate::error::Result;
use crate::fleet::{AmpDevice, DeviceId, DeviceState, Lookup};
use crate::hal::registers::TRACE_SET;
use crate::observability::BlackboxId;

use super::barrier::bit;
use super::coordinator::FleetCoordinator;
use super::state::{DspState, FwState};
use super::tasks::TaskFuture;

/// What a single health check found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Not one of the fleet's live devices, or not running
    Inactive,
    Healthy,
    Recovered,
    RecoveryFailed,
    /// Status could not be read; nothing was changed
    ReadFailed,
}

impl FleetCoordinator {
    pub(crate) fn schedule_monitor(&self, device: &AmpDevice) {
        let fleet = self.this.clone();
        let id = device.id;
        let work: TaskFuture = Box::pin(async move {
            if let Some(fleet) = fleet.upgrade() {
                fleet.monitor_job(id).await;
            }
        });
        device.monitor.schedule(self.config.monitor_delay(), work);
    }

    pub(crate) fn schedule_overlay(&self, device: &AmpDevice, delay: Duration) {
        let fleet = self.this.clone();
        let id = device.id;
        let work: TaskFuture = Box::pin(async move {
            if let Some(fleet) = fleet.upgrade() {
                fleet.overlay_job(id).await;
            }
        });
        device.overlay.schedule(delay, work);
    }

    fn live_device(&self, id: DeviceId) -> Option<Arc<AmpDevice>> {
        self.shared().registry.get(id).cloned()
    }

    async fn monitor_job(&self, id: DeviceId) {
        // Calibration owns the fleet; its restarts schedule a fresh pass
        let Ok(_gate) = self.gate.try_read() else {
            log::debug!("[amp{}] monitor pass skipped", id.index);
            return;
        };
        if let Some(device) = self.live_device(id) {
            let outcome = self.monitor_pass(&device).await;
            log::trace!("[amp{}] monitor: {:?}", id.index, outcome);
        }
    }

    /// Run one health check now instead of waiting for the scheduled pass
    pub async fn monitor_once(&self, index: usize) -> Result<MonitorOutcome> {
        let _gate = self.gate.read().await;
        let device = self.device(Lookup::Index(index))?;
        Ok(self.monitor_pass(&device).await)
    }

    async fn monitor_pass(&self, device: &Arc<AmpDevice>) -> MonitorOutcome {
        let index = device.index();
        let (active, scratch) = {
            let shared = self.shared();
            (Self::active_mask(&shared) & bit(index) != 0, shared.scratch.clone())
        };
        if !active {
            return MonitorOutcome::Inactive;
        }

        {
            let mut st = device.state.lock().await;
            if st.fw_state != FwState::Ok || !st.dsp_state.is_running() {
                return MonitorOutcome::Inactive;
            }

            let status = match device.dsp.status().await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("[amp{}] monitor read failed: {}", index, e);
                    return MonitorOutcome::ReadFailed;
                }
            };
            if let Some(pool) = &scratch {
                self.trace_registers(device, pool).await;
            }

            if status.dsp_running() || st.dsp_state != DspState::Done {
                return MonitorOutcome::Healthy;
            }
            log::warn!("[amp{}] DSP not running, recovering", index);
            st.set_dsp_state(DspState::Recover);
        }

        match self.power_on(device).await {
            Ok(()) => {
                log::info!("[amp{}] recovered", index);
                MonitorOutcome::Recovered
            }
            Err(e) => {
                log::error!("[amp{}] recovery failed: {}", index, e);
                MonitorOutcome::RecoveryFailed
            }
        }
    }

    async fn trace_registers(&self, device: &AmpDevice, pool: &ScratchPool) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let mut dump = pool.take();
        for (register, _) in TRACE_SET.iter() {
            match device.dsp.read_register(*register).await {
                Ok(value) => dump.push(value),
                Err(_) => return,
            }
        }
        let line: Vec<String> = TRACE_SET
            .iter()
            .zip(dump.iter())
            .map(|((_, name), value)| format!("{}=0x{:04x}", name, value))
            .collect();
        log::debug!("[amp{}] {}", device.index(), line.join(" "));
    }

    /// Interrupt raised for one device. Every device on the same line is
    /// serviced, since the line does not say which one asserted it.
    pub fn on_interrupt(&self, index: usize) -> Result<()> {
        let device = self.device(Lookup::Index(index))?;
        let line = device.settings.irq_line;

        let peers: Vec<Arc<AmpDevice>> = match line {
            Some(line) => self
                .devices()
                .into_iter()
                .filter(|d| d.settings.irq_line == Some(line))
                .collect(),
            None => vec![device],
        };

        for peer in peers {
            let fleet = self.this.clone();
            let id = peer.id;
            let work: TaskFuture = Box::pin(async move {
                if let Some(fleet) = fleet.upgrade() {
                    fleet.interrupt_job(id).await;
                }
            });
            peer.interrupt.schedule(Duration::ZERO, work);
        }
        Ok(())
    }

    async fn interrupt_job(&self, id: DeviceId) {
        let Some(device) = self.live_device(id) else {
            return;
        };
        let mut st = device.state.lock().await;
        if st.fw_state != FwState::Ok {
            return;
        }
        self.account_status(&device, &mut st).await;
        if let Err(e) = device.dsp.unmask_interrupts().await {
            log::warn!("[amp{}] interrupts not unmasked: {}", id.index, e);
        }
    }

    /// Fold the sticky fault flags into the blackbox and clear them.
    /// Caller holds the device lock.
    pub(crate) async fn account_status(&self, device: &AmpDevice, st: &mut DeviceState) {
        let index = device.index();
        let status = match device.dsp.status().await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("[amp{}] fault status unreadable: {}", index, e);
                return;
            }
        };

        if self.blackbox_enabled() {
            let counters = &device.counters;
            if status.clock_lost() {
                counters.record(BlackboxId::ClockLossCount);
                log::warn!("[amp{}] clock lost", index);
            }
            if status.over_excursion() || status.over_temperature() {
                match device.dsp.peaks().await {
                    Ok((excursion, temperature)) => {
                        if status.over_excursion() {
                            counters.record(BlackboxId::OverExcursionCount);
                            counters.record_peak_excursion(excursion as u64);
                        }
                        if status.over_temperature() {
                            counters.record(BlackboxId::OverTemperatureCount);
                            counters.record_peak_temperature(temperature as u64);
                        }
                    }
                    Err(e) => log::warn!("[amp{}] peaks unreadable: {}", index, e),
                }
            }
        }

        if status.speaker_damaged() {
            st.speaker_damaged = true;
            log::error!("[amp{}] damaged speaker reported", index);
        }

        if let Err(e) = device.dsp.clear_sticky().await {
            log::warn!("[amp{}] sticky flags not cleared: {}", index, e);
        }
    }

    /// Keep the overlay register at its value while the device runs
    async fn overlay_job(&self, id: DeviceId) {
        let Some(device) = self.live_device(id) else {
            return;
        };
        let Some(overlay) = device.settings.overlay else {
            return;
        };
        let index = id.index;

        {
            let st = device.state.lock().await;
            if !st.dsp_state.is_running() {
                return;
            }
            match device.dsp.status().await {
                Ok(status) if status.powered_down() => return,
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[amp{}] overlay status unreadable: {}", index, e);
                    return;
                }
            }
            match device.dsp.read_register(overlay.register).await {
                Ok(value) if value == overlay.value => {
                    log::debug!("[amp{}] overlay 0x{:02x} settled", index, overlay.register);
                    return;
                }
                Ok(_) => {
                    if let Err(e) = device.dsp.write_register(overlay.register, overlay.value).await {
                        log::warn!("[amp{}] overlay write failed: {}", index, e);
                    }
                }
                Err(e) => log::warn!("[amp{}] overlay read failed: {}", index, e),
            }
        }

        self.schedule_overlay(&device, self.config.overlay_interval());
    }
}
