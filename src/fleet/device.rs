use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::DeviceSettings;
use crate::engine::state::{derive_configured, Configured, DspState, FwState, Transition, TransitionLog};
use crate::engine::tasks::DeferredTask;
use crate::firmware::Container;
use crate::hal::{DspCore, StreamDirection};
use crate::observability::DeviceCounters;

use super::registry::DeviceId;

/// Open flags per stream direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    pub playback: bool,
    pub capture: bool,
}

impl StreamFlags {
    pub fn get(&self, direction: StreamDirection) -> bool {
        match direction {
            StreamDirection::Playback => self.playback,
            StreamDirection::Capture => self.capture,
        }
    }

    pub fn set(&mut self, direction: StreamDirection, open: bool) {
        match direction {
            StreamDirection::Playback => self.playback = open,
            StreamDirection::Capture => self.capture = open,
        }
    }

    pub fn any(&self) -> bool {
        self.playback || self.capture
    }
}

/// Requests made through the mixer, kept even while they cannot be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequests {
    pub mute: bool,
    pub pause: bool,
    pub active: bool,
}

impl Default for ControlRequests {
    fn default() -> Self {
        Self {
            mute: false,
            pause: false,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationState {
    /// Resistance read back from calibration memory
    pub value: u16,
    pub valid: bool,
    /// Forced value written on the next successful start
    pub pending: Option<u16>,
}

/// Everything guarded by the per-device lock
pub struct DeviceState {
    pub fw_state: FwState,
    pub dsp_state: DspState,
    pub configured: Configured,
    pub profile: usize,
    pub vstep: usize,
    /// Remembered vstep for each container profile
    pub prof_vsteps: Vec<usize>,
    pub rate: u32,
    pub streams: StreamFlags,
    pub requests: ControlRequests,
    pub calibration: CalibrationState,
    pub speaker_gain: u8,
    pub speaker_damaged: bool,
    pub container: Option<Arc<Container>>,
    external_dsp: bool,
    history: TransitionLog,
}

impl DeviceState {
    pub fn new(settings: &DeviceSettings) -> Self {
        Self {
            fw_state: FwState::None,
            dsp_state: DspState::Stopped,
            configured: Configured::NotConfigured,
            profile: 0,
            vstep: 0,
            prof_vsteps: Vec::new(),
            rate: 48000,
            streams: StreamFlags::default(),
            requests: ControlRequests::default(),
            calibration: CalibrationState::default(),
            speaker_gain: settings.speaker_gain,
            speaker_damaged: false,
            container: None,
            external_dsp: settings.external_dsp,
            history: TransitionLog::default(),
        }
    }

    pub fn set_fw_state(&mut self, state: FwState) {
        if self.fw_state != state {
            self.fw_state = state;
            self.history.record(Transition::Fw(state));
        }
    }

    /// Move the DSP state and re-derive `configured`
    pub fn set_dsp_state(&mut self, state: DspState) {
        if self.dsp_state != state {
            if !self.dsp_state.can_transition_to(state) {
                log::debug!(
                    "unusual dsp transition {} -> {}",
                    self.dsp_state.name(),
                    state.name()
                );
            }
            self.dsp_state = state;
            self.history.record(Transition::Dsp(state));
        }
        self.reconcile_configured();
    }

    pub fn reconcile_configured(&mut self) {
        self.configured = derive_configured(
            self.dsp_state,
            self.configured,
            self.streams.playback,
            self.external_dsp,
        );
    }

    pub fn external_dsp(&self) -> bool {
        self.external_dsp
    }

    pub fn history(&self) -> &TransitionLog {
        &self.history
    }

    /// Switch profile, restoring the vstep remembered for it
    pub fn select_profile(&mut self, profile: usize) {
        self.profile = profile;
        self.vstep = self.prof_vsteps.get(profile).copied().unwrap_or(0);
    }
}

/// One attached amplifier. Owned by the registry; tasks refer to it by id.
pub struct AmpDevice {
    pub id: DeviceId,
    pub settings: DeviceSettings,
    pub dsp: DspCore,
    pub counters: Arc<DeviceCounters>,
    pub state: Mutex<DeviceState>,
    pub monitor: DeferredTask,
    pub overlay: DeferredTask,
    pub interrupt: DeferredTask,
}

impl AmpDevice {
    pub fn new(id: DeviceId, settings: DeviceSettings, dsp: DspCore, counters: Arc<DeviceCounters>) -> Self {
        let state = DeviceState::new(&settings);
        Self {
            id,
            settings,
            dsp,
            counters,
            state: Mutex::new(state),
            monitor: DeferredTask::new("monitor"),
            overlay: DeferredTask::new("overlay"),
            interrupt: DeferredTask::new("interrupt"),
        }
    }

    pub fn index(&self) -> usize {
        self.id.index
    }

    pub fn channel(&self) -> u8 {
        self.settings.channel
    }

    pub async fn cancel_tasks(&self) {
        self.monitor.cancel_and_wait().await;
        self.overlay.cancel_and_wait().await;
        self.interrupt.cancel_and_wait().await;
    }
}
