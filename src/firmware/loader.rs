use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AmpError, Result};
use crate::hal::FirmwareSource;
use crate::resilience::RetryPolicy;

use super::container::Container;

/// Fetches and validates the shared container, one load at a time
pub struct ContainerLoader {
    source: Arc<dyn FirmwareSource>,
    name: String,
    policy: RetryPolicy,
    in_flight: Mutex<()>,
}

impl ContainerLoader {
    pub fn new(source: Arc<dyn FirmwareSource>, name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            source,
            name: name.into(),
            policy,
            in_flight: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Held for the whole of a load so concurrent requests queue behind it
    pub async fn begin(&self) -> MutexGuard<'_, ()> {
        self.in_flight.lock().await
    }

    /// Fetch with the retry policy, then parse.
    ///
    /// Each try is polled at the policy's windows; a try still pending after
    /// the last window is abandoned. Parse failures are not retried.
    pub async fn fetch(&self) -> Result<Container> {
        let windows = self.policy.poll_windows();

        for attempt in 1..=self.policy.attempts() {
            let mut pending = self.source.fetch(&self.name);
            let mut outcome = None;
            let mut polled = 0;

            for window in &windows {
                polled += 1;
                if let Ok(result) = tokio::time::timeout(*window, &mut pending).await {
                    outcome = Some(result);
                    break;
                }
            }

            match outcome {
                Some(Ok(image)) => {
                    let container = Container::parse(&image)?;
                    log::info!(
                        "loaded container {} ({} profiles, customer '{}') on try {}",
                        self.name,
                        container.profile_count(),
                        container.customer,
                        attempt
                    );
                    return Ok(container);
                }
                Some(Err(e)) => {
                    log::warn!("fetch of {} failed on try {}: {}", self.name, attempt, e);
                    if attempt < self.policy.attempts() {
                        let rest: Duration = windows.iter().skip(polled).sum();
                        if !rest.is_zero() {
                            tokio::time::sleep(rest).await;
                        }
                    }
                }
                None => {
                    log::warn!("fetch of {} still pending after try {}", self.name, attempt);
                }
            }
        }

        Err(AmpError::Timeout(format!(
            "container {} not available after {} tries",
            self.name, self.policy.attempts()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::container::Profile;
    use crate::hal::mock::StaticFirmware;

    fn image() -> Vec<u8> {
        Container::new("acme").with_profile(Profile::new("music")).encode()
    }

    #[tokio::test]
    async fn test_fetch_retries_until_available() {
        let source = Arc::new(StaticFirmware::new(image()).failing_first(3));
        let loader = ContainerLoader::new(source.clone(), "amp.cnt", RetryPolicy::schedule(5, &[Duration::ZERO]));

        let container = loader.fetch().await.unwrap();
        assert_eq!(container.profile_count(), 1);
        assert_eq!(source.fetch_count(), 4);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_policy() {
        let source = Arc::new(StaticFirmware::new(image()).failing_first(10));
        let loader = ContainerLoader::new(source.clone(), "amp.cnt", RetryPolicy::schedule(5, &[Duration::ZERO]));

        let err = loader.fetch().await.unwrap_err();
        assert!(matches!(err, AmpError::Timeout(_)));
        assert_eq!(source.fetch_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_abandoned() {
        let source = Arc::new(StaticFirmware::new(image()).with_latency(Duration::from_secs(1)));
        let loader = ContainerLoader::new(source.clone(), "amp.cnt", RetryPolicy::firmware_fetch());

        let err = loader.fetch().await.unwrap_err();
        assert!(matches!(err, AmpError::Timeout(_)));
        assert_eq!(source.fetch_count(), 5);
    }

    #[tokio::test]
    async fn test_corrupt_image_not_retried() {
        let mut bad = image();
        bad[0] = b'X';
        let source = Arc::new(StaticFirmware::new(bad));
        let loader = ContainerLoader::new(source.clone(), "amp.cnt", RetryPolicy::schedule(5, &[Duration::ZERO]));

        assert!(matches!(loader.fetch().await, Err(AmpError::Container(_))));
        assert_eq!(source.fetch_count(), 1);
    }
}
