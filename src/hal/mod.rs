pub mod dsp;
pub mod mock;
pub mod registers;
pub mod traits;
pub mod types;

pub use dsp::DspCore;
pub use traits::{FirmwareSource, RawBusError, RegisterBus, TemperatureSource};
pub use types::{BusDirection, RampSpeed, StatusFlags, StreamDirection};
