use serde::{Deserialize, Serialize};
use std::fmt;

use super::registers::{status0, status1};

/// Direction of a single register transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusDirection {
    Read,
    Write,
}

impl fmt::Display for BusDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Audio stream direction reported by the stream-control side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamDirection {
    Playback,
    Capture,
}

/// Speed of the mute ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampSpeed {
    Normal,
    /// Short ramp used to flush DSP buffers
    Fast,
}

/// Decoded status registers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub live: u16,
    pub sticky: u16,
}

impl StatusFlags {
    pub fn new(live: u16, sticky: u16) -> Self {
        Self { live, sticky }
    }

    pub fn dsp_running(&self) -> bool {
        self.live & status0::DSP_RUNNING != 0
    }

    pub fn powered_down(&self) -> bool {
        self.live & status0::POWERED_DOWN != 0
    }

    pub fn clock_lost(&self) -> bool {
        self.sticky & status1::NO_CLOCK != 0
    }

    pub fn over_excursion(&self) -> bool {
        self.sticky & status1::OVER_EXCURSION != 0
    }

    pub fn over_temperature(&self) -> bool {
        self.sticky & status1::OVER_TEMPERATURE != 0
    }

    pub fn speaker_damaged(&self) -> bool {
        self.sticky & status1::DAMAGED_SPEAKER != 0
    }
}
