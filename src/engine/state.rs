use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Readiness of the firmware container for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FwState {
    None,
    Pending,
    Fail,
    Ok,
    /// Refresh of a container the device already had
    Reloading,
}

impl FwState {
    pub fn name(&self) -> &str {
        match self {
            Self::None => "None",
            Self::Pending => "Pending",
            Self::Fail => "Fail",
            Self::Ok => "Ok",
            Self::Reloading => "Reloading",
        }
    }
}

impl Default for FwState {
    fn default() -> Self {
        Self::None
    }
}

/// Last known outcome of a DSP start attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DspState {
    Stopped,
    Pending,
    Done,
    Fail,
    Recover,
    Invalidated,
}

impl DspState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: DspState) -> bool {
        use DspState::*;

        matches!(
            (self, target),
            (_, Stopped) |
            (Stopped | Recover | Invalidated | Fail, Pending) |
            (Pending, Done | Fail) |
            (Done, Invalidated) |
            (Invalidated, Invalidated) |
            (Done | Recover, Recover) |
            // Barrier release re-asserts Done on running devices
            (Done, Done)
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Done | Self::Recover | Self::Invalidated)
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Stopped => "Stopped",
            Self::Pending => "Pending",
            Self::Done => "Done",
            Self::Fail => "Fail",
            Self::Recover => "Recover",
            Self::Invalidated => "Invalidated",
        }
    }
}

impl Default for DspState {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Whether control operations may be sent straight to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Configured {
    Configured,
    NotConfigured,
    /// Kept apart from NotConfigured so errors stay visible
    Failed,
}

impl Configured {
    pub fn is_configured(&self) -> bool {
        matches!(self, Self::Configured)
    }
}

impl Default for Configured {
    fn default() -> Self {
        Self::NotConfigured
    }
}

/// Recompute `configured` after a `dsp_state` change
pub fn derive_configured(
    dsp: DspState,
    prior: Configured,
    playback_open: bool,
    external_dsp: bool,
) -> Configured {
    match dsp {
        DspState::Done | DspState::Recover => Configured::Configured,
        DspState::Invalidated if playback_open => prior,
        DspState::Invalidated => Configured::NotConfigured,
        // A bus-controlled DSP keeps its setup while the stream is up
        DspState::Stopped if external_dsp && playback_open => prior,
        DspState::Stopped => Configured::NotConfigured,
        DspState::Fail => Configured::Failed,
        DspState::Pending => Configured::NotConfigured,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    Fw(FwState),
    Dsp(DspState),
}

const HISTORY_LEN: usize = 32;

/// Most recent state transitions of one device
#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    entries: VecDeque<Transition>,
}

impl TransitionLog {
    pub fn record(&mut self, transition: Transition) {
        if self.entries.len() == HISTORY_LEN {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub fn entries(&self) -> Vec<Transition> {
        self.entries.iter().copied().collect()
    }

    pub fn dsp_states(&self) -> Vec<DspState> {
        self.entries
            .iter()
            .filter_map(|t| match t {
                Transition::Dsp(state) => Some(*state),
                Transition::Fw(_) => None,
            })
            .collect()
    }

    pub fn fw_states(&self) -> Vec<FwState> {
        self.entries
            .iter()
            .filter_map(|t| match t {
                Transition::Fw(state) => Some(*state),
                Transition::Dsp(_) => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(DspState::Stopped.can_transition_to(DspState::Pending));
        assert!(DspState::Pending.can_transition_to(DspState::Done));
        assert!(DspState::Pending.can_transition_to(DspState::Fail));
        assert!(DspState::Done.can_transition_to(DspState::Invalidated));
        assert!(DspState::Done.can_transition_to(DspState::Recover));
        assert!(DspState::Recover.can_transition_to(DspState::Pending));
        assert!(DspState::Fail.can_transition_to(DspState::Stopped));

        assert!(!DspState::Stopped.can_transition_to(DspState::Done));
        assert!(!DspState::Pending.can_transition_to(DspState::Recover));
        assert!(!DspState::Stopped.can_transition_to(DspState::Recover));
    }

    #[test]
    fn test_configured_rules() {
        use self::Configured::*;

        assert_eq!(derive_configured(DspState::Done, NotConfigured, false, false), Configured);
        assert_eq!(derive_configured(DspState::Recover, Failed, true, false), Configured);
        assert_eq!(derive_configured(DspState::Fail, Configured, true, false), Failed);
        assert_eq!(derive_configured(DspState::Pending, Configured, true, true), NotConfigured);

        assert_eq!(derive_configured(DspState::Invalidated, Configured, true, false), Configured);
        assert_eq!(derive_configured(DspState::Invalidated, Configured, false, false), NotConfigured);
    }

    #[test]
    fn test_stopped_embedded_vs_external() {
        use self::Configured::*;

        assert_eq!(derive_configured(DspState::Stopped, Configured, true, false), NotConfigured);
        assert_eq!(derive_configured(DspState::Stopped, Configured, true, true), Configured);
        assert_eq!(derive_configured(DspState::Stopped, Configured, false, true), NotConfigured);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut log = TransitionLog::default();
        for _ in 0..40 {
            log.record(Transition::Dsp(DspState::Pending));
        }
        log.record(Transition::Fw(FwState::Ok));
        assert_eq!(log.entries().len(), HISTORY_LEN);
        assert_eq!(log.fw_states(), vec![FwState::Ok]);
    }
}
