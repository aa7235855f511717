//! Exclusive access to the document engine.
//!
//! The engine is created on first use and reused by every later request. At
//! most one [`EngineLease`] exists at any time; `acquire` is the only place
//! conversions are serialized. Waiters are served in arrival order (tokio's
//! mutex is fair).
//!
//! ```text
//!   acquire() ──► [wait for slot] ──► [launch engine if absent] ──► EngineLease
//!                                                                     │
//!   release()/drop ◄──────────── open → export → close ◄──────────────┘
//!
//!   shutdown() ──► [refuse new acquires] ──► [quit retired handles]
//!                                                  ──► [wait for slot] ──► quit()
//! ```
//!
//! Handles taken out of service with [`EngineLease::discard`] are handed back
//! through [`ResourceManager::retire`], which quits them once their last call
//! returns, or at shutdown at the latest.

use crate::engine::{Engine, EngineFactory};
use crate::error::ConvertError;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Slot {
    engine: Option<Arc<dyn Engine>>,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    active: AtomicUsize,
    completed: AtomicU64,
    discarded: AtomicU64,
    running: AtomicBool,
}

/// Point-in-time view of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    /// Engine handles constructed so far.
    pub created: u64,
    /// Leases currently held (0 or 1).
    pub active: usize,
    /// Leases returned so far.
    pub completed: u64,
    /// Handles dropped after a wedged session.
    pub discarded: u64,
    /// Whether a handle currently exists.
    pub running: bool,
}

pub struct ResourceManager {
    slot: Arc<Mutex<Slot>>,
    factory: EngineFactory,
    acquire_timeout: Option<Duration>,
    closed: CancellationToken,
    counters: Arc<Counters>,
    retiring: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ResourceManager {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot { engine: None })),
            factory,
            acquire_timeout: None,
            closed: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            retiring: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Bounds how long `acquire` waits for the previous lease.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Waits for exclusive use of the engine, launching it if needed.
    ///
    /// # Errors
    ///
    /// `ResourceUnavailable` when the manager is shut down, the wait exceeds
    /// the acquire timeout, or the engine cannot be launched.
    pub async fn acquire(&self) -> Result<EngineLease, ConvertError> {
        if self.closed.is_cancelled() {
            return Err(shutting_down());
        }

        let lock = self.slot.clone().lock_owned();
        let mut guard = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, lock).await.map_err(|_| {
                ConvertError::ResourceUnavailable(format!(
                    "timed out after {:?} waiting for the document engine",
                    limit
                ))
            })?,
            None => lock.await,
        };

        if self.closed.is_cancelled() {
            return Err(shutting_down());
        }

        let engine = match guard.engine.as_ref() {
            Some(engine) => engine.clone(),
            None => {
                let factory = self.factory.clone();
                let engine = tokio::task::spawn_blocking(move || factory())
                    .await
                    .map_err(|e| {
                        ConvertError::ResourceUnavailable(format!("engine launch aborted: {}", e))
                    })?
                    .map_err(|e| ConvertError::ResourceUnavailable(e.to_string()))?;

                let generation = self.counters.created.fetch_add(1, Ordering::SeqCst) + 1;
                self.counters.running.store(true, Ordering::SeqCst);
                info!(generation, "Document engine handle created");

                guard.engine = Some(engine.clone());
                engine
            }
        };

        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        debug_assert_eq!(active, 1, "more than one engine lease outstanding");
        debug!("Engine lease acquired");

        Ok(EngineLease {
            guard: Some(guard),
            engine,
            counters: self.counters.clone(),
        })
    }

    /// Quits the engine and refuses further acquires.
    ///
    /// Waits for an in-flight lease to be returned first. Returns `true` if a
    /// handle existed and was quit; later calls are no-ops returning `false`.
    /// A failing quit is logged, not returned.
    pub async fn shutdown(&self) -> bool {
        self.closed.cancel();

        let retiring = std::mem::take(&mut *self.retiring.lock());
        for task in retiring {
            if let Err(e) = task.await {
                error!(error = %e, "Retired engine task aborted");
            }
        }

        let engine = self.slot.lock().await.engine.take();
        let Some(engine) = engine else {
            debug!("No document engine to shut down");
            return false;
        };
        self.counters.running.store(false, Ordering::SeqCst);

        match tokio::task::spawn_blocking(move || engine.quit()).await {
            Ok(Ok(())) => info!("Document engine shut down"),
            Ok(Err(e)) => error!(error = %e, "Document engine quit failed"),
            Err(e) => error!(error = %e, "Document engine quit task aborted"),
        }
        true
    }

    /// Quits a discarded handle once `pending` completes, or as soon as
    /// shutdown begins if it never does. `shutdown` waits for every retired
    /// handle to be quit.
    pub fn retire<F>(&self, engine: Arc<dyn Engine>, pending: F)
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let closed = self.closed.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = pending => debug!("Retired engine is idle"),
                _ = closed.cancelled() => {
                    warn!("Shutting down while a retired engine call is still running")
                }
            }

            match tokio::task::spawn_blocking(move || engine.quit()).await {
                Ok(Ok(())) => info!("Retired engine quit"),
                Ok(Err(e)) => warn!(error = %e, "Retired engine failed to quit"),
                Err(e) => warn!(error = %e, "Retired engine quit task aborted"),
            }
        });

        let mut retiring = self.retiring.lock();
        retiring.retain(|task| !task.is_finished());
        retiring.push(task);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn stats(&self) -> ResourceStats {
        ResourceStats {
            created: self.counters.created.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
        }
    }
}

fn shutting_down() -> ConvertError {
    ConvertError::ResourceUnavailable("service is shutting down".to_string())
}

/// Exclusive use of the engine. Returned to the manager on drop.
pub struct EngineLease {
    guard: Option<OwnedMutexGuard<Slot>>,
    engine: Arc<dyn Engine>,
    counters: Arc<Counters>,
}

impl EngineLease {
    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn release(self) {}

    /// Detaches the handle from the manager so the next `acquire` launches a
    /// fresh one, then releases the lease. The returned handle should go to
    /// [`ResourceManager::retire`].
    pub fn discard(mut self) -> Arc<dyn Engine> {
        if let Some(guard) = self.guard.as_mut() {
            guard.engine = None;
        }
        self.counters.running.store(false, Ordering::SeqCst);
        self.counters.discarded.fetch_add(1, Ordering::SeqCst);
        warn!("Document engine handle discarded");
        self.engine.clone()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let guard = self.guard.take();
        if guard.is_some() {
            // Decrement before the slot unlocks so the next holder sees zero.
            self.counters.active.fetch_sub(1, Ordering::SeqCst);
            self.counters.completed.fetch_add(1, Ordering::SeqCst);
            debug!("Engine lease released");
        }
        drop(guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineError, MockEngine};
    use pretty_assertions::assert_eq;

    fn factory<F>(calls: Arc<AtomicUsize>, make: F) -> EngineFactory
    where
        F: Fn() -> MockEngine + Send + Sync + 'static,
    {
        Arc::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(make()) as Arc<dyn Engine>)
        })
    }

    fn quitting_engine() -> MockEngine {
        let mut engine = MockEngine::new();
        engine.expect_quit().times(1).returning(|| Ok(()));
        engine
    }

    #[tokio::test]
    async fn test_engine_created_lazily_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls.clone(), quitting_engine));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!manager.stats().running);

        manager.acquire().await.unwrap().release();
        manager.acquire().await.unwrap().release();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = manager.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.active, 0);
        assert!(stats.running);

        assert!(manager.shutdown().await);
    }

    #[tokio::test]
    async fn test_shutdown_without_engine_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls.clone(), MockEngine::new));

        assert!(!manager.shutdown().await);
        assert!(!manager.shutdown().await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_quits_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls, quitting_engine));

        manager.acquire().await.unwrap().release();

        assert!(manager.shutdown().await);
        assert!(!manager.shutdown().await);
        assert!(!manager.stats().running);
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_acquire_after_shutdown_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls.clone(), MockEngine::new));

        manager.shutdown().await;

        assert!(matches!(
            manager.acquire().await,
            Err(ConvertError::ResourceUnavailable(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_resource_unavailable() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let manager = ResourceManager::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Launch("no such program".to_string()))
        }));

        assert!(matches!(
            manager.acquire().await,
            Err(ConvertError::ResourceUnavailable(_))
        ));
        assert!(manager.acquire().await.is_err());

        // A failed launch leaves no handle behind; each acquire retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().active, 0);
        assert!(!manager.shutdown().await);
    }

    #[tokio::test]
    async fn test_second_acquire_waits_for_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls, quitting_engine));

        let lease = manager.acquire().await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), manager.acquire()).await;
        assert!(blocked.is_err());
        assert_eq!(manager.stats().active, 1);

        lease.release();
        let lease = manager.acquire().await.unwrap();
        assert_eq!(manager.stats().active, 1);
        drop(lease);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls, quitting_engine))
            .with_acquire_timeout(Some(Duration::from_millis(20)));

        let lease = manager.acquire().await.unwrap();
        assert!(matches!(
            manager.acquire().await,
            Err(ConvertError::ResourceUnavailable(_))
        ));

        drop(lease);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_discard_forces_new_handle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ResourceManager::new(factory(calls.clone(), quitting_engine));

        let lease = manager.acquire().await.unwrap();
        let old = lease.discard();
        old.quit().unwrap();
        drop(old);

        let stats = manager.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.discarded, 1);
        assert!(!stats.running);

        manager.acquire().await.unwrap().release();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert!(manager.shutdown().await);
    }

    fn counting_engine(quits: Arc<AtomicUsize>) -> MockEngine {
        let mut engine = MockEngine::new();
        engine.expect_quit().returning(move || {
            quits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        engine
    }

    #[tokio::test]
    async fn test_retired_engine_quit_when_idle() {
        let quits = Arc::new(AtomicUsize::new(0));
        let counter = quits.clone();
        let manager = ResourceManager::new(factory(Arc::new(AtomicUsize::new(0)), move || {
            counting_engine(counter.clone())
        }));

        let old = manager.acquire().await.unwrap().discard();
        manager.retire(old, std::future::ready(()));

        for _ in 0..100 {
            if quits.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(quits.load(Ordering::SeqCst), 1);

        assert!(!manager.shutdown().await);
        assert_eq!(quits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_quits_wedged_retired_engine() {
        let quits = Arc::new(AtomicUsize::new(0));
        let counter = quits.clone();
        let manager = ResourceManager::new(factory(Arc::new(AtomicUsize::new(0)), move || {
            counting_engine(counter.clone())
        }));

        let old = manager.acquire().await.unwrap().discard();
        manager.retire(old, std::future::pending::<()>());
        manager.acquire().await.unwrap().release();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(quits.load(Ordering::SeqCst), 0);

        assert!(manager.shutdown().await);
        assert_eq!(quits.load(Ordering::SeqCst), 2);
        assert_eq!(manager.stats().discarded, 1);
    }
}
