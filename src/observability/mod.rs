pub mod metrics;
pub mod collector;
pub mod report;

pub use metrics::{BlackboxId, BlackboxSnapshot, DeviceCounters, BLACKBOX_SLOTS};
pub use collector::{BlackboxCollector, DeviceSnapshot};
pub use report::FleetReport;
