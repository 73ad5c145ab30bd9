use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Delay pattern applied between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same sleep after every failed attempt
    Fixed { delay_ms: u64 },

    /// Each attempt is polled at these offsets before it is abandoned
    Schedule { delays_ms: Vec<u64> },
}

/// Bounded retry policy passed in as configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(deserialize_with = "at_least_one")]
    pub max_attempts: u32,
    pub backoff: Backoff,
}

fn at_least_one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    Ok(u32::deserialize(deserializer)?.max(1))
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed {
                delay_ms: delay.as_millis() as u64,
            },
        }
    }

    pub fn schedule(max_attempts: u32, delays: &[Duration]) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Schedule {
                delays_ms: delays.iter().map(|d| d.as_millis() as u64).collect(),
            },
        }
    }

    /// 50 attempts, 5 ms apart
    pub fn transport() -> Self {
        Self::fixed(50, Duration::from_millis(5))
    }

    /// 5 tries, each polled after 20 ms and again after a further 80 ms
    pub fn firmware_fetch() -> Self {
        Self::schedule(5, &[Duration::from_millis(20), Duration::from_millis(80)])
    }

    /// No waiting at all, for tests and simulated buses
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Attempts to make; a policy built by hand with zero still tries once
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Sleep after the given failed attempt (1-based). None after the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts() {
            return None;
        }
        Some(Duration::from_millis(self.window_ms()))
    }

    /// Poll points within a single attempt
    pub fn poll_windows(&self) -> Vec<Duration> {
        match &self.backoff {
            Backoff::Fixed { delay_ms } => vec![Duration::from_millis(*delay_ms)],
            Backoff::Schedule { delays_ms } if delays_ms.is_empty() => vec![Duration::ZERO],
            Backoff::Schedule { delays_ms } => {
                delays_ms.iter().map(|ms| Duration::from_millis(*ms)).collect()
            }
        }
    }

    fn window_ms(&self) -> u64 {
        match &self.backoff {
            Backoff::Fixed { delay_ms } => *delay_ms,
            Backoff::Schedule { delays_ms } => delays_ms.iter().sum(),
        }
    }

    /// Worst-case time spent before giving up
    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.window_ms() * self.attempts() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::transport()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_preset() {
        let policy = RetryPolicy::transport();
        assert_eq!(policy.max_attempts, 50);
        assert_eq!(policy.delay_after(1), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_after(49), Some(Duration::from_millis(5)));
        assert_eq!(policy.delay_after(50), None);
    }

    #[test]
    fn test_firmware_schedule() {
        let policy = RetryPolicy::firmware_fetch();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(
            policy.poll_windows(),
            vec![Duration::from_millis(20), Duration::from_millis(80)]
        );
        assert_eq!(policy.total_budget(), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        let policy = RetryPolicy::immediate(0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(1), None);
    }

    #[test]
    fn test_zero_attempts_from_json() {
        let json = r#"{ "max_attempts": 0, "backoff": { "kind": "fixed", "delay_ms": 5 } }"#;
        let policy: RetryPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.max_attempts, 1);

        let literal = RetryPolicy {
            max_attempts: 0,
            backoff: Backoff::Fixed { delay_ms: 0 },
        };
        assert_eq!(literal.attempts(), 1);
        assert_eq!(literal.delay_after(1), None);
    }

    #[test]
    fn test_policy_serialization() {
        let policy = RetryPolicy::firmware_fetch();
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"kind\":\"schedule\""));
        let back: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, policy);
    }
}
