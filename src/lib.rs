pub mod buffers;
pub mod config;
pub mod engine;
pub mod error;
pub mod firmware;
pub mod fleet;
pub mod hal;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::{DeviceSettings, FleetConfig};
pub use engine::FleetCoordinator;
pub use error::{AmpError, Result};
