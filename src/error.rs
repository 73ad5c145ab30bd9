use crate::hal::BusDirection;

/// Errors raised by the amplifier fleet core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmpError {
    /// Bus transfer still failing after the retry policy ran out
    #[error("bus {direction} at 0x{address:02x} failed after {attempts} attempts")]
    Transport {
        address: u8,
        direction: BusDirection,
        attempts: u32,
    },

    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// DSP refused the operation in its current mode
    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("device {index} fault: {reason}")]
    DeviceFault { index: usize, reason: String },

    #[error("no such device: {0}")]
    NoDevice(String),

    #[error("firmware container not loaded for device {0}")]
    FirmwareNotReady(usize),

    #[error("calibration failed on devices {devices:?}")]
    CalibrationFailed { devices: Vec<usize> },

    #[error("invalid container: {0}")]
    Container(String),
}

impl AmpError {
    /// Whether the failure came from the bus rather than the DSP itself
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

pub type Result<T> = std::result::Result<T, AmpError>;
