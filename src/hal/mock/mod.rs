pub mod amp;
pub mod firmware;

pub use amp::{SimulatedAmp, StartBehavior};
pub use firmware::{FixedTemperature, StaticFirmware};
