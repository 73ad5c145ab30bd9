use super::{BlackboxCollector, BlackboxId};

/// Text summary of the fleet's blackbox counters
pub struct FleetReport {
    collector: BlackboxCollector,
}

impl FleetReport {
    pub fn new(collector: BlackboxCollector) -> Self {
        Self { collector }
    }

    pub fn generate(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No devices attached".to_string();
        }

        let mut report = String::from("=== Amplifier Blackbox ===\n");

        for device in snapshot.iter() {
            report.push_str(&format!("\n[amp{} ch{}]", device.index, device.channel));
            if device.blackbox.is_clean() {
                report.push_str(" clean\n");
                continue;
            }
            report.push('\n');
            for id in BlackboxId::ALL {
                let value = device.blackbox.get(id);
                if value > 0 {
                    report.push_str(&format!("  {}: {}\n", id.name(), value));
                }
            }
        }

        report
    }

    pub fn collector(&self) -> &BlackboxCollector {
        &self.collector
    }
}
