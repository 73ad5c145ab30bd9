pub mod barrier;
pub mod calibration;
pub mod controls;
pub mod coordinator;
pub mod lifecycle;
pub mod monitor;
pub mod state;
pub mod streams;
pub mod tasks;

pub use barrier::{Arrival, Release, SyncBarrier};
pub use calibration::{CalibrationReport, DeviceCalibration};
pub use coordinator::{DeviceStatus, FleetCoordinator};
pub use monitor::MonitorOutcome;
pub use state::{derive_configured, Configured, DspState, FwState, Transition, TransitionLog};
pub use tasks::{DeferredTask, TaskFuture};
