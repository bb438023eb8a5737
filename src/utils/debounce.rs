//! Request coalescing.
//!
//! Calls that share a key within the debounce window are merged into a single
//! execution: each new caller pushes the fire time back by `delay_ms`, but
//! never past `max_wait_ms` after the first caller arrived. Callers that show
//! up while the execution is already in flight join it instead of starting a
//! second one. Every caller for a key receives the same settled value or the
//! same rejection.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::DebounceConfig;
use crate::utils::MetricsCollector;

/// Why a coalesced call did not produce a value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DebounceError<E> {
    #[error("Pending request was cancelled")]
    Cancelled,

    #[error("Coalesced request panicked")]
    Panicked,

    #[error("{0}")]
    Failed(E),
}

type Task<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;
type Settled<T, E> = Option<Result<T, DebounceError<E>>>;

struct Pending<T, E> {
    id: u64,
    first_at: Instant,
    deadline: Instant,
    task: Option<Task<T, E>>,
    tx: watch::Sender<Settled<T, E>>,
    handle: Option<JoinHandle<()>>,
}

type PendingMap<T, E> = Arc<Mutex<HashMap<String, Pending<T, E>>>>;

fn lock<T, E>(map: &PendingMap<T, E>) -> MutexGuard<'_, HashMap<String, Pending<T, E>>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

/// Coalesces concurrent identical requests into one in-flight call
pub struct DebounceManager<T, E> {
    pending: PendingMap<T, E>,
    config: DebounceConfig,
    next_id: AtomicU64,
    metrics: Option<Arc<MetricsCollector>>,
}

impl<T, E> std::fmt::Debug for DebounceManager<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceManager")
            .field("config", &self.config)
            .field("pending", &lock(&self.pending).len())
            .finish()
    }
}

impl<T, E> DebounceManager<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            config,
            next_id: AtomicU64::new(1),
            metrics: None,
        }
    }

    /// Count coalesced callers in the given collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Number of keys with a pending or in-flight execution
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Run `f` for `key`, sharing the execution with concurrent callers.
    ///
    /// With `force_immediate` (or debouncing disabled) `f` runs right away
    /// and is not shared.
    pub async fn debounced_request<F, Fut>(
        &self,
        key: &str,
        f: F,
        force_immediate: bool,
    ) -> Result<T, DebounceError<E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if force_immediate || !self.config.enabled {
            return f().await.map_err(DebounceError::Failed);
        }

        let delay = Duration::from_millis(self.config.delay_ms);
        let max_wait = Duration::from_millis(self.config.max_wait_ms);
        let now = Instant::now();

        let mut rx = {
            let mut map = lock(&self.pending);

            if let Some(pending) = map.get_mut(key) {
                if pending.task.is_some() {
                    pending.deadline = (now + delay).min(pending.first_at + max_wait);
                }
                tracing::debug!("Coalescing request into pending call for {}", key);
                if let Some(metrics) = &self.metrics {
                    metrics.increment_debounced_requests();
                }
                pending.tx.subscribe()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = watch::channel(None);
                let task: Task<T, E> = Box::new(move || f().boxed());

                map.insert(
                    key.to_string(),
                    Pending {
                        id,
                        first_at: now,
                        deadline: now + delay.min(max_wait),
                        task: Some(task),
                        tx,
                        handle: None,
                    },
                );

                let handle = tokio::spawn(Self::fire(self.pending.clone(), key.to_string(), id));
                if let Some(pending) = map.get_mut(key) {
                    pending.handle = Some(handle);
                }
                rx
            }
        };

        let settled = rx.wait_for(|value| value.is_some()).await;
        match settled {
            Ok(value) => match &*value {
                Some(result) => result.clone(),
                None => Err(DebounceError::Cancelled),
            },
            Err(_) => Err(DebounceError::Cancelled),
        }
    }

    /// Timer task: waits out the (possibly extended) window, then executes once
    async fn fire(pending: PendingMap<T, E>, key: String, id: u64) {
        let task = loop {
            let deadline = match lock(&pending).get(&key) {
                Some(entry) if entry.id == id => entry.deadline,
                _ => return,
            };

            tokio::time::sleep_until(deadline).await;

            let mut map = lock(&pending);
            match map.get_mut(&key) {
                Some(entry) if entry.id == id => {
                    if Instant::now() < entry.deadline {
                        continue;
                    }
                    match entry.task.take() {
                        Some(task) => break task,
                        None => return,
                    }
                }
                _ => return,
            }
        };

        let result = match AssertUnwindSafe(task()).catch_unwind().await {
            Ok(result) => result.map_err(DebounceError::Failed),
            Err(_) => {
                tracing::warn!("Coalesced request for {} panicked", key);
                Err(DebounceError::Panicked)
            }
        };

        let mut map = lock(&pending);
        if map.get(&key).is_some_and(|entry| entry.id == id) {
            if let Some(entry) = map.remove(&key) {
                entry.tx.send_replace(Some(result));
            }
        }
    }

    /// Reject every pending and in-flight coalesced call
    pub fn cancel_pending_requests(&self) {
        let drained: Vec<Pending<T, E>> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            tracing::debug!("Cancelling {} pending coalesced requests", drained.len());
        }
        for entry in drained {
            entry.tx.send_replace(Some(Err(DebounceError::Cancelled)));
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }
}

impl<T, E> Drop for DebounceManager<T, E> {
    fn drop(&mut self) {
        for (_, entry) in lock(&self.pending).drain() {
            if let Some(handle) = entry.handle {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;

    fn manager(delay_ms: u64, max_wait_ms: u64) -> Arc<DebounceManager<u32, String>> {
        Arc::new(DebounceManager::new(DebounceConfig {
            enabled: true,
            delay_ms,
            max_wait_ms,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_execution() {
        let manager = manager(300, 2000);
        let calls = Arc::new(AtomicUsize::new(0));

        let futures = (0..5).map(|_| {
            let calls = calls.clone();
            let manager = manager.clone();
            async move {
                manager
                    .debounced_request(
                        "same",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<u32, String>(42)
                        },
                        false,
                    )
                    .await
            }
        });

        let results = join_all(futures).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(42)));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_rejection() {
        let manager = manager(100, 1000);

        let futures = (0..3).map(|_| {
            let manager = manager.clone();
            async move {
                manager
                    .debounced_request("k", || async { Err::<u32, String>("boom".to_string()) }, false)
                    .await
            }
        });

        for result in join_all(futures).await {
            assert_eq!(result, Err(DebounceError::Failed("boom".to_string())));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_immediate_bypasses_coalescing() {
        let manager = manager(300, 2000);
        let calls = Arc::new(AtomicUsize::new(0));

        let futures = (0..3).map(|_| {
            let calls = calls.clone();
            let manager = manager.clone();
            async move {
                manager
                    .debounced_request(
                        "k",
                        move || async move {
                            Ok::<u32, String>(calls.fetch_add(1, Ordering::SeqCst) as u32)
                        },
                        true,
                    )
                    .await
            }
        });

        join_all(futures).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_separately() {
        let manager = manager(50, 500);
        let (a, b) = tokio::join!(
            manager.debounced_request("a", || async { Ok::<u32, String>(1) }, false),
            manager.debounced_request("b", || async { Ok::<u32, String>(2) }, false),
        );
        assert_eq!(a, Ok(1));
        assert_eq!(b, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_wait_caps_the_window() {
        let manager = manager(300, 1000);
        let fired_at = Arc::new(Mutex::new(None));
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            let fired_at = fired_at.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .debounced_request(
                        "k",
                        move || async move {
                            *fired_at.lock().unwrap() = Some(Instant::now());
                            Ok::<u32, String>(7)
                        },
                        false,
                    )
                    .await
            }));
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }

        let fired = fired_at.lock().unwrap().expect("request executed");
        let waited = fired.duration_since(start);
        assert!(waited >= Duration::from_millis(1000), "fired after {:?}", waited);
        assert!(waited <= Duration::from_millis(1050), "fired after {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_rejects_waiters() {
        let manager = manager(300, 2000);
        let calls = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let manager = manager.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                manager
                    .debounced_request(
                        "k",
                        move || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok::<u32, String>(1)
                        },
                        false,
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.pending_count(), 1);
        manager.cancel_pending_requests();

        assert_eq!(waiter.await.unwrap(), Err(DebounceError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_runs_every_call() {
        let manager: DebounceManager<u32, String> = DebounceManager::new(DebounceConfig {
            enabled: false,
            ..DebounceConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = calls.clone();
            let _ = manager
                .debounced_request(
                    "k",
                    move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<u32, String>(0)
                    },
                    false,
                )
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
