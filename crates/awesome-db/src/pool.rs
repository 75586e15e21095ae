//! Async bounded pool for connection-like objects.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep};

use crate::error::{DbError, DriverError};

pub type FactoryFuture<T> = Pin<Box<dyn Future<Output = Result<T, DriverError>> + Send>>;

struct PoolState<T> {
    idle: Vec<T>,
    /// Connections alive, idle or leased.
    open: usize,
    closed: bool,
}

/// An async bounded pool. Bookkeeping sits behind a mutex that is never held
/// across an await point.
pub struct AsyncPool<T> {
    max: usize,
    factory: Box<dyn Fn() -> FactoryFuture<T> + Send + Sync>,
    state: Mutex<PoolState<T>>,
    available: Notify,
}

#[derive(Debug)]
pub enum AcquireError {
    Timeout,
    Cancelled,
    Closed,
    Create(DriverError),
}

impl From<AcquireError> for DbError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Timeout => Self::PoolTimeout,
            AcquireError::Cancelled => Self::Cancelled,
            AcquireError::Closed => Self::PoolClosed,
            AcquireError::Create(source) => Self::Connect(source),
        }
    }
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A leased value. Returned to the pool on drop unless marked non-reusable,
/// in which case it is discarded and its slot freed.
pub struct Lease<T> {
    pool: Arc<AsyncPool<T>>,
    value: Option<T>,
    reusable: bool,
}

struct Reservation<'a, T> {
    pool: &'a AsyncPool<T>,
}

impl<T> Drop for Reservation<'_, T> {
    fn drop(&mut self) {
        self.pool.forget_one();
    }
}

enum Slot<T> {
    Idle(T),
    Create,
    Wait,
}

impl<T> AsyncPool<T> {
    pub fn new<F, Fut>(max: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, DriverError>> + Send + 'static,
    {
        let factory = Box::new(move || Box::pin(factory()) as FactoryFuture<T>);
        Arc::new(Self {
            max: max.max(1),
            factory,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
                closed: false,
            }),
            available: Notify::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<T>> {
        // A panic while holding the lock leaves only plain counters behind.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_slot(&self) -> Result<Slot<T>, AcquireError> {
        let mut state = self.lock();
        if state.closed {
            return Err(AcquireError::Closed);
        }
        if let Some(item) = state.idle.pop() {
            return Ok(Slot::Idle(item));
        }
        if state.open < self.max {
            state.open += 1;
            return Ok(Slot::Create);
        }
        Ok(Slot::Wait)
    }

    pub async fn acquire(
        self: &Arc<Self>,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<Lease<T>, AcquireError> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(AcquireError::Cancelled);
                }
            }
            // Enabled before inspecting state: a release between the check
            // and the await wakes this waiter instead of storing a permit.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.take_slot()? {
                Slot::Idle(item) => return Ok(self.lease(item)),
                Slot::Create => {
                    // Frees the reserved slot if creation fails or this
                    // future is dropped mid-connect.
                    let reservation = Reservation { pool: &**self };
                    let item = (self.factory)().await.map_err(AcquireError::Create)?;
                    std::mem::forget(reservation);
                    return Ok(self.lease(item));
                }
                Slot::Wait => {}
            }

            let wait = match deadline {
                None => None,
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        return Err(AcquireError::Timeout);
                    }
                    Some(limit - now)
                }
            };

            match (cancel, wait) {
                (Some(token), Some(duration)) => {
                    tokio::select! {
                        _ = notified.as_mut() => {},
                        _ = token.cancelled() => return Err(AcquireError::Cancelled),
                        _ = sleep(duration) => return Err(AcquireError::Timeout),
                    }
                }
                (Some(token), None) => {
                    tokio::select! {
                        _ = notified.as_mut() => {},
                        _ = token.cancelled() => return Err(AcquireError::Cancelled),
                    }
                }
                (None, Some(duration)) => {
                    tokio::select! {
                        _ = notified.as_mut() => {},
                        _ = sleep(duration) => return Err(AcquireError::Timeout),
                    }
                }
                (None, None) => notified.as_mut().await,
            }
        }
    }

    fn lease(self: &Arc<Self>, item: T) -> Lease<T> {
        Lease {
            pool: Arc::clone(self),
            value: Some(item),
            reusable: true,
        }
    }

    /// Drops every idle connection and refuses further leases. Leases still
    /// out are discarded when they come back.
    pub fn close(&self) {
        let idle = {
            let mut state = self.lock();
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.open -= idle.len();
            idle
        };
        drop(idle);
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Connections currently open, idle or leased.
    pub fn size(&self) -> usize {
        self.lock().open
    }

    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    pub fn max_size(&self) -> usize {
        self.max
    }

    fn release(&self, item: T) {
        let mut state = self.lock();
        if state.closed {
            state.open -= 1;
            drop(state);
            drop(item);
            return;
        }
        state.idle.push(item);
        drop(state);
        self.available.notify_one();
    }

    fn forget_one(&self) {
        self.lock().open -= 1;
        self.available.notify_one();
    }
}

impl<T> Lease<T> {
    /// Whether the value goes back to the idle list on drop.
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn discard(mut self) {
        if let Some(item) = self.value.take() {
            drop(item);
            self.pool.forget_one();
        }
    }
}

impl<T> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
            .as_ref()
            .expect("Lease value missing (already released)")
    }
}

impl<T> DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.value
            .as_mut()
            .expect("Lease value missing (already released)")
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        let Some(item) = self.value.take() else {
            return;
        };
        if self.reusable {
            self.pool.release(item);
        } else {
            drop(item);
            self.pool.forget_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter_pool(max: usize) -> Arc<AsyncPool<usize>> {
        AsyncPool::new(max, || async { Ok::<_, DriverError>(7usize) })
    }

    #[tokio::test]
    async fn pool_reuses_connections() {
        let pool = counter_pool(2);
        let first = pool.acquire(None, None).await.expect("first");
        let second = pool.acquire(None, None).await.expect("second");
        assert_eq!(pool.size(), 2);
        drop(first);
        assert_eq!(pool.idle_count(), 1);
        drop(second);
        assert_eq!(pool.idle_count(), 2);
        let _third = pool.acquire(None, None).await.expect("third");
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn pool_timeout() {
        let pool = counter_pool(1);
        let _guard = pool.acquire(None, None).await.expect("guard");
        let result = pool.acquire(Some(Duration::from_millis(5)), None).await;
        assert!(matches!(result, Err(AcquireError::Timeout)));
    }

    #[tokio::test]
    async fn pool_cancelled() {
        let pool = counter_pool(1);
        let _guard = pool.acquire(None, None).await.expect("guard");
        let token = CancelToken::new();
        token.cancel();
        let result = pool.acquire(None, Some(&token)).await;
        assert!(matches!(result, Err(AcquireError::Cancelled)));
    }

    #[tokio::test]
    async fn pool_discard_allows_recreate() {
        let pool = counter_pool(1);
        let guard = pool.acquire(None, None).await.expect("guard");
        guard.discard();
        assert_eq!(pool.size(), 0);
        let next = pool.acquire(Some(Duration::from_millis(10)), None).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn non_reusable_lease_is_discarded_on_drop() {
        let pool = counter_pool(1);
        let mut guard = pool.acquire(None, None).await.expect("guard");
        guard.set_reusable(false);
        drop(guard);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn waiter_receives_released_connection() {
        let pool = counter_pool(1);
        let guard = pool.acquire(None, None).await.expect("guard");
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(None, None).await.map(|lease| *lease) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        let value = waiter.await.expect("join").expect("acquire");
        assert_eq!(value, 7);
        assert_eq!(pool.size(), 1);
    }

    #[tokio::test]
    async fn back_to_back_releases_wake_distinct_waiters() {
        let pool = counter_pool(2);
        let first = pool.acquire(None, None).await.expect("first");
        let second = pool.acquire(None, None).await.expect("second");
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    pool.acquire(Some(Duration::from_millis(500)), None)
                        .await
                        .map(|lease| *lease)
                })
            })
            .collect();
        tokio::task::yield_now().await;
        drop(first);
        drop(second);
        for waiter in waiters {
            assert_eq!(waiter.await.expect("join").expect("acquire"), 7);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_waiter_is_served_under_contention() {
        let pool = counter_pool(2);
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let lease = pool.acquire(Some(Duration::from_secs(5)), None).await?;
                        tokio::task::yield_now().await;
                        drop(lease);
                    }
                    Ok::<_, AcquireError>(())
                })
            })
            .collect();
        for task in tasks {
            task.await.expect("join").expect("served");
        }
        assert!(pool.size() <= 2);
        assert_eq!(pool.idle_count(), pool.size());
    }

    #[tokio::test]
    async fn failed_create_frees_the_slot() {
        let pool: Arc<AsyncPool<usize>> =
            AsyncPool::new(1, || async { Err::<usize, DriverError>("refused".into()) });
        let result = pool.acquire(None, None).await;
        assert!(matches!(result, Err(AcquireError::Create(_))));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn closed_pool_rejects_and_drains() {
        let pool = counter_pool(2);
        let leased = pool.acquire(None, None).await.expect("leased");
        drop(pool.acquire(None, None).await.expect("idle"));
        assert_eq!(pool.idle_count(), 1);
        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(
            pool.acquire(None, None).await,
            Err(AcquireError::Closed)
        ));
        drop(leased);
        assert_eq!(pool.size(), 0);
    }
}
