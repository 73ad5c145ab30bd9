use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Delayed background work for one device with cancel-and-join.
///
/// Scheduling again drops any run still waiting out its delay. A run whose
/// delay has elapsed is never interrupted; `cancel_and_wait` waits for it.
pub struct DeferredTask {
    name: &'static str,
    cancel_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl DeferredTask {
    pub fn new(name: &'static str) -> Self {
        let (cancel_tx, _) = broadcast::channel(4);
        Self {
            name,
            cancel_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn schedule(&self, delay: Duration, work: TaskFuture) {
        self.cancel();

        let mut cancel_rx = self.cancel_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel_rx.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            work.await;
        });

        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Drop waiting runs without waiting for a running one
    pub fn cancel(&self) {
        // No receivers just means nothing is waiting
        let _ = self.cancel_tx.send(());
    }

    /// Drop waiting runs and wait until none is executing.
    /// Must not be called from inside the task itself.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let handles = std::mem::take(&mut *self.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    log::error!("{} task panicked", self.name);
                }
            }
        }
    }

    /// Any run scheduled or executing
    pub fn is_pending(&self) -> bool {
        self.lock().iter().any(|h| !h.is_finished())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for DeferredTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> TaskFuture {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_runs_after_delay() {
        let task = DeferredTask::new("test");
        let runs = Arc::new(AtomicUsize::new(0));
        task.schedule(Duration::from_millis(5), counting(&runs));
        assert!(task.is_pending());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test]
    async fn test_cancel_before_delay_elapses() {
        let task = DeferredTask::new("test");
        let runs = Arc::new(AtomicUsize::new(0));
        task.schedule(Duration::from_secs(10), counting(&runs));

        task.cancel_and_wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(!task.is_pending());
    }

    #[tokio::test]
    async fn test_reschedule_replaces_waiting_run() {
        let task = DeferredTask::new("test");
        let runs = Arc::new(AtomicUsize::new(0));
        task.schedule(Duration::from_secs(10), counting(&runs));
        task.schedule(Duration::ZERO, counting(&runs));

        tokio::time::sleep(Duration::from_millis(20)).await;
        task.cancel_and_wait().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_running_body() {
        let task = DeferredTask::new("test");
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        task.schedule(
            Duration::ZERO,
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                flag.store(1, Ordering::SeqCst);
            }),
        );

        tokio::time::sleep(Duration::from_millis(5)).await;
        task.cancel_and_wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
