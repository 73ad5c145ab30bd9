use std::time::Duration;

use crate::error::{AmpError, Result};
use crate::transport::Transport;

use super::registers::{self, control0, control1, control2, mtp, status0, status1};
use super::types::{RampSpeed, StatusFlags};

const START_POLLS: u32 = 5;
const START_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Command set of one amplifier's DSP core, issued over its transport
pub struct DspCore {
    index: usize,
    transport: Transport,
}

impl DspCore {
    pub fn new(index: usize, transport: Transport) -> Self {
        Self { index, transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Program profile and vstep, then start the DSP muted.
    ///
    /// Returns `NotSupported` when the DSP rejects the profile in its
    /// current mode and `DeviceFault` when it reports a failed start.
    pub async fn start(&self, profile: usize, vstep: usize) -> Result<()> {
        self.transport.write(registers::PROFILE, profile as u16).await?;
        self.transport.write(registers::VSTEP, vstep as u16).await?;
        self.transport
            .write(
                registers::SYS_CONTROL0,
                control0::AMP_ENABLE | control0::MUTE | control0::START,
            )
            .await?;

        for poll in 0..START_POLLS {
            let live = self.transport.read(registers::STATUS_FLAGS0).await?;
            if live & status0::NOT_SUPPORTED != 0 {
                return Err(AmpError::NotSupported(format!(
                    "profile {} vstep {} rejected",
                    profile, vstep
                )));
            }
            if live & status0::START_FAILED != 0 {
                return Err(AmpError::DeviceFault {
                    index: self.index,
                    reason: "DSP start failed".to_string(),
                });
            }
            if live & status0::DSP_RUNNING != 0 {
                return Ok(());
            }
            if poll + 1 < START_POLLS {
                tokio::time::sleep(START_POLL_INTERVAL).await;
            }
        }

        Err(AmpError::Timeout(format!("device {} DSP did not come up", self.index)))
    }

    pub async fn stop(&self) -> Result<()> {
        self.transport
            .write(registers::SYS_CONTROL0, control0::POWER_DOWN | control0::MUTE)
            .await
    }

    pub async fn mute(&self, ramp: RampSpeed) -> Result<()> {
        let steps = match ramp {
            RampSpeed::Normal => control2::RAMP_NORMAL,
            RampSpeed::Fast => control2::RAMP_FAST,
        };
        self.transport
            .update_bits(registers::SYS_CONTROL2, control2::RAMP_MASK, steps)
            .await?;
        self.transport
            .update_bits(registers::SYS_CONTROL0, control0::MUTE, control0::MUTE)
            .await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.transport
            .update_bits(registers::SYS_CONTROL2, control2::RAMP_MASK, control2::RAMP_NORMAL)
            .await?;
        self.transport
            .update_bits(registers::SYS_CONTROL0, control0::MUTE, 0)
            .await
    }

    pub async fn status(&self) -> Result<StatusFlags> {
        let live = self.transport.read(registers::STATUS_FLAGS0).await?;
        let sticky = self.transport.read(registers::STATUS_FLAGS1).await?;
        Ok(StatusFlags::new(live, sticky))
    }

    pub async fn clear_sticky(&self) -> Result<()> {
        self.transport.write(registers::STATUS_FLAGS1, status1::ALL).await
    }

    /// Idempotent: only sets bits
    pub async fn enable_interrupts(&self, mask: u16) -> Result<()> {
        self.transport
            .update_bits(registers::INTERRUPT_ENABLE, mask, mask)
            .await
    }

    pub async fn unmask_interrupts(&self) -> Result<()> {
        self.transport.write(registers::INTERRUPT_MASK, 0).await
    }

    pub async fn set_gain(&self, gain: u8) -> Result<()> {
        self.transport.write(registers::SPEAKER_GAIN, gain as u16).await
    }

    pub async fn calibration_valid(&self) -> Result<bool> {
        Ok(self.transport.read(registers::MTP_EX).await? & mtp::EX != 0)
    }

    /// Persisted resistance, if the valid flag is set
    pub async fn read_calibration(&self) -> Result<Option<u16>> {
        if !self.calibration_valid().await? {
            return Ok(None);
        }
        let value = self.transport.read(registers::MTP_RE25).await?;
        Ok((value > 0).then_some(value))
    }

    /// Clear valid, store the value, then mark it valid again
    pub async fn write_calibration(&self, value: u16) -> Result<()> {
        self.transport.update_bits(registers::MTP_EX, mtp::EX, 0).await?;
        self.transport.write(registers::MTP_RE25, value).await?;
        if value > 0 {
            self.transport
                .update_bits(registers::MTP_EX, mtp::EX, mtp::EX)
                .await?;
        }
        Ok(())
    }

    pub async fn clear_calibration_flag(&self) -> Result<()> {
        self.transport.update_bits(registers::MTP_EX, mtp::EX, 0).await
    }

    pub async fn clear_calibration_value(&self) -> Result<()> {
        self.transport.write(registers::MTP_RE25, 0).await
    }

    pub async fn write_reference_temperature(&self, celsius: i16) -> Result<()> {
        self.transport.write(registers::EXT_TEMP, celsius as u16).await
    }

    pub async fn bypassed(&self) -> Result<bool> {
        Ok(self.transport.read(registers::SYS_CONTROL1).await? & control1::BYPASS != 0)
    }

    pub async fn set_bypass(&self, bypass: bool) -> Result<()> {
        let value = if bypass { control1::BYPASS } else { 0 };
        self.transport
            .update_bits(registers::SYS_CONTROL1, control1::BYPASS, value)
            .await
    }

    pub async fn auto_calibration_disabled(&self) -> Result<bool> {
        Ok(self.transport.read(registers::SYS_CONTROL1).await? & control1::AUTO_CAL_DISABLE != 0)
    }

    pub async fn set_auto_calibration_disabled(&self, disabled: bool) -> Result<()> {
        let value = if disabled { control1::AUTO_CAL_DISABLE } else { 0 };
        self.transport
            .update_bits(registers::SYS_CONTROL1, control1::AUTO_CAL_DISABLE, value)
            .await
    }

    /// Latched excursion and temperature peaks
    pub async fn peaks(&self) -> Result<(u16, u16)> {
        let excursion = self.transport.read(registers::PEAK_EXCURSION).await?;
        let temperature = self.transport.read(registers::PEAK_TEMPERATURE).await?;
        Ok((excursion, temperature))
    }

    pub async fn read_register(&self, register: u8) -> Result<u16> {
        self.transport.read(register).await
    }

    pub async fn write_register(&self, register: u8, value: u16) -> Result<()> {
        self.transport.write(register, value).await
    }
}
