//! Register map of the amplifier control interface.
//!
//! Every register is 16 bits wide and addressed by a single byte.

pub const SYS_CONTROL0: u8 = 0x00;
pub const SYS_CONTROL1: u8 = 0x01;
pub const SYS_CONTROL2: u8 = 0x02;
pub const CLOCK_CONTROL: u8 = 0x03;
pub const PROFILE: u8 = 0x04;
pub const VSTEP: u8 = 0x05;

pub const STATUS_FLAGS0: u8 = 0x10;
pub const STATUS_FLAGS1: u8 = 0x11;
pub const STATUS_FLAGS2: u8 = 0x12;
pub const STATUS_FLAGS3: u8 = 0x13;
/// Peak values latched by the protection model since the last read
pub const PEAK_EXCURSION: u8 = 0x14;
pub const PEAK_TEMPERATURE: u8 = 0x15;

pub const INTERRUPT_ENABLE: u8 = 0x20;
pub const INTERRUPT_MASK: u8 = 0x21;

pub const TDM_CONFIG0: u8 = 0x30;
pub const SPEAKER_GAIN: u8 = 0x31;
pub const TDM_SPEAKERS: u8 = 0x32;

pub const MTP_EX: u8 = 0x40;
pub const MTP_RE25: u8 = 0x41;
pub const EXT_TEMP: u8 = 0x42;

pub const REVISION: u8 = 0x7f;

/// Registers dumped by the health monitor trace
pub const TRACE_SET: [(u8, &str); 9] = [
    (SYS_CONTROL0, "SYS_CONTROL0"),
    (SYS_CONTROL1, "SYS_CONTROL1"),
    (SYS_CONTROL2, "SYS_CONTROL2"),
    (CLOCK_CONTROL, "CLOCK_CONTROL"),
    (STATUS_FLAGS0, "STATUS_FLAGS0"),
    (STATUS_FLAGS1, "STATUS_FLAGS1"),
    (STATUS_FLAGS2, "STATUS_FLAGS2"),
    (STATUS_FLAGS3, "STATUS_FLAGS3"),
    (TDM_CONFIG0, "TDM_CONFIG0"),
];

pub mod control0 {
    pub const POWER_DOWN: u16 = 1 << 0;
    /// Self-clearing: run the DSP with the programmed profile and vstep
    pub const START: u16 = 1 << 1;
    pub const AMP_ENABLE: u16 = 1 << 3;
    pub const MUTE: u16 = 1 << 5;
}

pub mod control1 {
    pub const BYPASS: u16 = 1 << 0;
    pub const AUTO_CAL_DISABLE: u16 = 1 << 1;
}

pub mod control2 {
    /// Low nibble holds the mute ramp length
    pub const RAMP_MASK: u16 = 0x000f;
    pub const RAMP_NORMAL: u16 = 0x0008;
    pub const RAMP_FAST: u16 = 0x0001;
}

pub mod status0 {
    pub const DSP_RUNNING: u16 = 1 << 0;
    pub const NOT_SUPPORTED: u16 = 1 << 1;
    pub const START_FAILED: u16 = 1 << 2;
    pub const POWERED_DOWN: u16 = 1 << 3;
}

/// Sticky flags, write one to clear
pub mod status1 {
    pub const NO_CLOCK: u16 = 1 << 0;
    pub const OVER_TEMPERATURE: u16 = 1 << 1;
    pub const OVER_EXCURSION: u16 = 1 << 2;
    pub const DAMAGED_SPEAKER: u16 = 1 << 3;
    pub const ALL: u16 = 0x000f;
}

pub mod interrupts {
    use super::status1;

    pub const DEFAULT: u16 = status1::OVER_TEMPERATURE | status1::OVER_EXCURSION | status1::DAMAGED_SPEAKER;
    pub const NO_CLOCK: u16 = status1::NO_CLOCK;
}

pub mod mtp {
    /// Calibration value in MTP_RE25 is valid
    pub const EX: u16 = 1 << 0;
}
