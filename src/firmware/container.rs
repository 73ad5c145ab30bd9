//! Firmware container image.
//!
//! Layout (little endian):
//!
//! ```text
//! "AMPC" | version u16 | profile count u16 | customer [u8; 8]
//! per profile: name len u8 | name | flags u8 | max vsteps u8 |
//!              device mask u8 | rate count u8 | rates u32 * n
//! checksum u32 (wrapping byte sum of everything before it)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AmpError, Result};

pub const MAGIC: &[u8; 4] = b"AMPC";
pub const VERSION: u16 = 1;
const CUSTOMER_LEN: usize = 8;
const FLAG_CALIBRATION: u8 = 1 << 0;

/// Operating configuration stored in the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub rates: Vec<u32>,
    pub max_vsteps: usize,
    pub calibration: bool,
    /// Devices this profile runs on, 0 meaning all of them
    pub device_mask: u8,
}

impl Profile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: vec![48000],
            max_vsteps: 1,
            calibration: false,
            device_mask: 0,
        }
    }

    pub fn with_rates(mut self, rates: &[u32]) -> Self {
        self.rates = rates.to_vec();
        self
    }

    pub fn with_vsteps(mut self, max_vsteps: usize) -> Self {
        self.max_vsteps = max_vsteps;
        self
    }

    pub fn for_devices(mut self, mask: u8) -> Self {
        self.device_mask = mask;
        self
    }

    pub fn calibration(mut self) -> Self {
        self.calibration = true;
        self
    }

    /// Name up to the first '.', shared by the per-rate variants
    pub fn base_name(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    pub fn supports_rate(&self, rate: u32) -> bool {
        self.rates.contains(&rate)
    }

    pub fn applies_to(&self, index: usize) -> bool {
        self.device_mask == 0 || (index < 8 && self.device_mask & (1 << index) != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub version: u16,
    pub customer: String,
    pub profiles: Vec<Profile>,
}

impl Container {
    pub fn new(customer: impl Into<String>) -> Self {
        Self {
            version: VERSION,
            customer: customer.into(),
            profiles: Vec::new(),
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn profile(&self, index: usize) -> Option<&Profile> {
        self.profiles.get(index)
    }

    pub fn find_profile(&self, name: &str) -> Option<usize> {
        self.profiles.iter().position(|p| p.name == name)
    }

    /// First profile flagged for calibration
    pub fn calibration_profile(&self) -> Option<usize> {
        self.profiles.iter().position(|p| p.calibration)
    }

    pub fn max_vsteps(&self, profile: usize) -> usize {
        self.profile(profile).map(|p| p.max_vsteps).unwrap_or(0)
    }

    pub fn parse(image: &[u8]) -> Result<Self> {
        if image.len() < 4 {
            return Err(invalid("image too short"));
        }
        let (body, tail) = image.split_at(image.len() - 4);
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let actual = checksum(body);
        if expected != actual {
            return Err(invalid(format!(
                "checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
                expected, actual
            )));
        }

        let mut reader = Reader::new(body);
        if reader.take(4)? != MAGIC {
            return Err(invalid("bad magic"));
        }
        let version = reader.u16()?;
        if version != VERSION {
            return Err(invalid(format!("unsupported version {}", version)));
        }
        let count = reader.u16()? as usize;
        if count == 0 {
            return Err(invalid("no profiles"));
        }
        let customer = reader.take(CUSTOMER_LEN)?;
        let customer = String::from_utf8_lossy(customer)
            .trim_end_matches('\0')
            .to_string();

        let mut profiles = Vec::with_capacity(count);
        for index in 0..count {
            let name_len = reader.u8()? as usize;
            let name = std::str::from_utf8(reader.take(name_len)?)
                .map_err(|_| invalid(format!("profile {} name is not utf-8", index)))?
                .to_string();
            if name.is_empty() {
                return Err(invalid(format!("profile {} has no name", index)));
            }
            let flags = reader.u8()?;
            let max_vsteps = reader.u8()? as usize;
            let device_mask = reader.u8()?;
            let rate_count = reader.u8()? as usize;
            if rate_count == 0 {
                return Err(invalid(format!("profile {} lists no sample rates", name)));
            }
            let mut rates = Vec::with_capacity(rate_count);
            for _ in 0..rate_count {
                rates.push(reader.u32()?);
            }
            profiles.push(Profile {
                name,
                rates,
                max_vsteps,
                calibration: flags & FLAG_CALIBRATION != 0,
                device_mask,
            });
        }

        if !reader.is_empty() {
            return Err(invalid("trailing bytes after profile table"));
        }

        Ok(Self {
            version,
            customer,
            profiles,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.profiles.len() as u16).to_le_bytes());

        let mut customer = [0u8; CUSTOMER_LEN];
        for (slot, byte) in customer.iter_mut().zip(self.customer.bytes()) {
            *slot = byte;
        }
        out.extend_from_slice(&customer);

        for profile in &self.profiles {
            let name = profile.name.as_bytes();
            out.push(name.len().min(u8::MAX as usize) as u8);
            out.extend_from_slice(&name[..name.len().min(u8::MAX as usize)]);
            out.push(if profile.calibration { FLAG_CALIBRATION } else { 0 });
            out.push(profile.max_vsteps.min(u8::MAX as usize) as u8);
            out.push(profile.device_mask);
            out.push(profile.rates.len().min(u8::MAX as usize) as u8);
            for rate in profile.rates.iter().take(u8::MAX as usize) {
                out.extend_from_slice(&rate.to_le_bytes());
            }
        }

        let sum = checksum(&out);
        out.extend_from_slice(&sum.to_le_bytes());
        out
    }
}

fn checksum(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| acc.wrapping_add(*b as u32))
}

fn invalid(reason: impl Into<String>) -> AmpError {
    AmpError::Container(reason.into())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.bytes.len() {
            return Err(invalid(format!("truncated at offset {}", self.pos)));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Container {
        Container::new("acme")
            .with_profile(Profile::new("music.48").with_rates(&[48000]).with_vsteps(3))
            .with_profile(Profile::new("music.44").with_rates(&[44100]).with_vsteps(3))
            .with_profile(Profile::new("cal").calibration())
    }

    #[test]
    fn test_parse_encoded_image() {
        let container = Container::parse(&sample().encode()).unwrap();
        assert_eq!(container.customer, "acme");
        assert_eq!(container.profile_count(), 3);
        assert_eq!(container.calibration_profile(), Some(2));
        assert_eq!(container.find_profile("music.44"), Some(1));
        assert_eq!(container.max_vsteps(0), 3);
    }

    #[test]
    fn test_corrupted_image_rejected() {
        let mut image = sample().encode();
        image[10] ^= 0xff;
        assert!(matches!(Container::parse(&image), Err(AmpError::Container(_))));
    }

    #[test]
    fn test_truncated_image_rejected() {
        let image = sample().encode();
        let mut cut = image[..image.len() - 9].to_vec();
        let sum = checksum(&cut);
        cut.extend_from_slice(&sum.to_le_bytes());
        let err = Container::parse(&cut).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_empty_profile_table_rejected() {
        let image = Container::new("acme").encode();
        assert!(Container::parse(&image).is_err());
    }

    #[test]
    fn test_base_name_and_mask() {
        let profile = Profile::new("voice.16k").for_devices(0b10);
        assert_eq!(profile.base_name(), "voice");
        assert!(!profile.applies_to(0));
        assert!(profile.applies_to(1));
    }
}
