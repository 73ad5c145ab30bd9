use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::hal::registers::{self, control0, control1, mtp, status0};
use crate::hal::{BusDirection, RawBusError, RegisterBus};

/// Outcome the simulated DSP reports for the next start commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Run,
    NotSupported,
    Fail,
    /// Never reports running
    Stall,
}

struct BusFailure {
    direction: Option<BusDirection>,
    remaining: u32,
}

struct SimState {
    regs: HashMap<u8, u16>,
    live: u16,
    sticky: u16,
    start_behavior: StartBehavior,
    bus_failure: Option<BusFailure>,
    auto_calibration: Option<u16>,
    starts: Vec<(u16, u16)>,
    writes: Vec<(u8, u16)>,
    dropped_writes: HashMap<u8, u32>,
}

/// Register-level amplifier model for tests and demos
pub struct SimulatedAmp {
    state: Mutex<SimState>,
}

impl SimulatedAmp {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                regs: HashMap::new(),
                live: status0::POWERED_DOWN,
                sticky: 0,
                start_behavior: StartBehavior::Run,
                bus_failure: None,
                auto_calibration: None,
                starts: Vec::new(),
                writes: Vec::new(),
                dropped_writes: HashMap::new(),
            }),
        }
    }

    /// Device that already holds a valid calibration
    pub fn calibrated(re25: u16) -> Self {
        let amp = Self::new();
        amp.set_register(registers::MTP_EX, mtp::EX);
        amp.set_register(registers::MTP_RE25, re25);
        amp
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_start_behavior(&self, behavior: StartBehavior) {
        self.lock().start_behavior = behavior;
    }

    /// Fail the next `count` transfers, optionally only in one direction
    pub fn fail_bus(&self, direction: Option<BusDirection>, count: u32) {
        self.lock().bus_failure = Some(BusFailure { direction, remaining: count });
    }

    pub fn fail_bus_forever(&self) {
        self.fail_bus(None, u32::MAX);
    }

    pub fn heal_bus(&self) {
        self.lock().bus_failure = None;
    }

    /// Resistance measured whenever the DSP starts uncalibrated with auto-cal on
    pub fn set_auto_calibration(&self, re25: Option<u16>) {
        self.lock().auto_calibration = re25;
    }

    /// DSP stops running without being told to
    pub fn crash_dsp(&self) {
        self.lock().live &= !status0::DSP_RUNNING;
    }

    pub fn raise_sticky(&self, bits: u16) {
        self.lock().sticky |= bits;
    }

    pub fn set_peaks(&self, excursion: u16, temperature: u16) {
        let mut state = self.lock();
        state.regs.insert(registers::PEAK_EXCURSION, excursion);
        state.regs.insert(registers::PEAK_TEMPERATURE, temperature);
    }

    /// Silently discard the next `count` writes to a register
    pub fn drop_writes(&self, register: u8, count: u32) {
        self.lock().dropped_writes.insert(register, count);
    }

    pub fn set_register(&self, register: u8, value: u16) {
        self.lock().regs.insert(register, value);
    }

    pub fn register(&self, register: u8) -> u16 {
        let state = self.lock();
        match register {
            registers::STATUS_FLAGS0 => state.live,
            registers::STATUS_FLAGS1 => state.sticky,
            _ => state.regs.get(&register).copied().unwrap_or(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().live & status0::DSP_RUNNING != 0
    }

    pub fn is_muted(&self) -> bool {
        self.register(registers::SYS_CONTROL0) & control0::MUTE != 0
    }

    /// Running and audible
    pub fn is_playing(&self) -> bool {
        self.is_running() && !self.is_muted()
    }

    pub fn start_count(&self) -> usize {
        self.lock().starts.len()
    }

    /// (profile, vstep) of the most recent start command
    pub fn last_start(&self) -> Option<(u16, u16)> {
        self.lock().starts.last().copied()
    }

    pub fn write_count(&self, register: u8) -> usize {
        self.lock().writes.iter().filter(|(reg, _)| *reg == register).count()
    }

    pub fn calibration(&self) -> (bool, u16) {
        let state = self.lock();
        let ex = state.regs.get(&registers::MTP_EX).copied().unwrap_or(0) & mtp::EX != 0;
        (ex, state.regs.get(&registers::MTP_RE25).copied().unwrap_or(0))
    }

    fn inject_failure(state: &mut SimState, direction: BusDirection) -> Option<RawBusError> {
        let failure = state.bus_failure.as_mut()?;
        if failure.direction.is_some_and(|d| d != direction) {
            return None;
        }
        if failure.remaining == 0 {
            state.bus_failure = None;
            return None;
        }
        if failure.remaining != u32::MAX {
            failure.remaining -= 1;
        }
        Some(RawBusError(-121))
    }

    fn run_start(state: &mut SimState) {
        let profile = state.regs.get(&registers::PROFILE).copied().unwrap_or(0);
        let vstep = state.regs.get(&registers::VSTEP).copied().unwrap_or(0);
        state.starts.push((profile, vstep));

        state.live = match state.start_behavior {
            StartBehavior::Run => status0::DSP_RUNNING,
            StartBehavior::NotSupported => status0::NOT_SUPPORTED,
            StartBehavior::Fail => status0::START_FAILED,
            StartBehavior::Stall => 0,
        };
        if state.start_behavior != StartBehavior::Run {
            return;
        }

        let ctrl1 = state.regs.get(&registers::SYS_CONTROL1).copied().unwrap_or(0);
        let ex = state.regs.get(&registers::MTP_EX).copied().unwrap_or(0);
        if let Some(re25) = state.auto_calibration {
            if ctrl1 & control1::AUTO_CAL_DISABLE == 0 && ex & mtp::EX == 0 {
                state.regs.insert(registers::MTP_RE25, re25);
                state.regs.insert(registers::MTP_EX, ex | mtp::EX);
            }
        }
    }
}

impl Default for SimulatedAmp {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RegisterBus for SimulatedAmp {
    async fn raw_read(&self, register: u8) -> Result<u16, RawBusError> {
        let mut state = self.lock();
        if let Some(error) = Self::inject_failure(&mut state, BusDirection::Read) {
            return Err(error);
        }
        Ok(match register {
            registers::STATUS_FLAGS0 => state.live,
            registers::STATUS_FLAGS1 => state.sticky,
            _ => state.regs.get(&register).copied().unwrap_or(0),
        })
    }

    async fn raw_write(&self, register: u8, value: u16) -> Result<(), RawBusError> {
        let mut state = self.lock();
        if let Some(error) = Self::inject_failure(&mut state, BusDirection::Write) {
            return Err(error);
        }
        state.writes.push((register, value));

        if let Some(remaining) = state.dropped_writes.get_mut(&register) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(());
            }
        }

        match register {
            registers::STATUS_FLAGS1 => state.sticky &= !value,
            registers::SYS_CONTROL0 => {
                state.regs.insert(register, value & !control0::START);
                if value & control0::POWER_DOWN != 0 {
                    state.live = status0::POWERED_DOWN;
                } else if value & control0::START != 0 {
                    Self::run_start(&mut state);
                }
            }
            _ => {
                state.regs.insert(register, value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_sets_running_and_muted() {
        let amp = SimulatedAmp::new();
        amp.raw_write(registers::PROFILE, 2).await.unwrap();
        amp.raw_write(
            registers::SYS_CONTROL0,
            control0::AMP_ENABLE | control0::MUTE | control0::START,
        )
        .await
        .unwrap();

        assert!(amp.is_running());
        assert!(amp.is_muted());
        assert_eq!(amp.last_start(), Some((2, 0)));
    }

    #[tokio::test]
    async fn test_directional_failure() {
        let amp = SimulatedAmp::new();
        amp.fail_bus(Some(BusDirection::Write), 1);

        assert!(amp.raw_read(registers::REVISION).await.is_ok());
        assert!(amp.raw_write(registers::REVISION, 1).await.is_err());
        assert!(amp.raw_write(registers::REVISION, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_sticky_write_one_to_clear() {
        let amp = SimulatedAmp::new();
        amp.raise_sticky(0b0110);
        amp.raw_write(registers::STATUS_FLAGS1, 0b0010).await.unwrap();
        assert_eq!(amp.register(registers::STATUS_FLAGS1), 0b0100);
    }
}
