pub mod device;
pub mod registry;

pub use device::{AmpDevice, CalibrationState, ControlRequests, DeviceState, StreamFlags};
pub use registry::{DeviceId, DeviceRegistry, Lookup, LookupCache, MAX_DEVICES};
