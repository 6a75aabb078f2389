use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

const SLOW_ACQUIRE: Duration = Duration::from_secs(5);

/// Async mutex that names itself in the logs and reports slow acquisitions.
///
/// Used as the single-flight gate of the context cache: the holder refreshes
/// while later callers queue and then observe the refreshed value.
#[derive(Debug)]
pub struct TimedMutex<T> {
    name: String,
    lock: Mutex<T>,
    locked: AtomicBool,
    waiting_count: AtomicUsize,
}

impl<T> TimedMutex<T> {
    pub fn new(name: &str, data: T) -> Self {
        Self {
            name: name.to_string(),
            lock: Mutex::new(data),
            locked: AtomicBool::new(false),
            waiting_count: AtomicUsize::new(0),
        }
    }

    pub async fn lock(&self) -> TimedGuard<'_, T> {
        let start = Instant::now();
        let waiting = if self.locked.load(Ordering::SeqCst) {
            debug!("Lock '{}' is busy, waiting for the holder", self.name);
            Some(WaitingTicket::new(&self.waiting_count))
        } else {
            trace!("Acquiring lock '{}'", self.name);
            None
        };
        let guard = self.lock.lock().await;
        // Released on every exit, including a cancelled wait
        drop(waiting);
        self.locked.store(true, Ordering::SeqCst);

        let duration = start.elapsed();
        if duration > SLOW_ACQUIRE {
            error!(
                "Lock '{}' took too long to acquire: {:?}",
                self.name, duration
            );
        }
        TimedGuard {
            guard,
            locked: &self.locked,
        }
    }

    /// Number of callers currently queued behind the holder.
    pub fn waiting(&self) -> usize {
        self.waiting_count.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

struct WaitingTicket<'a> {
    count: &'a AtomicUsize,
}

impl<'a> WaitingTicket<'a> {
    fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self { count }
    }
}

impl Drop for WaitingTicket<'_> {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TimedGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    locked: &'a AtomicBool,
}

impl<T> std::ops::Deref for TimedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for TimedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for TimedGuard<'_, T> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_lock_mutates_value() {
        let lock = TimedMutex::new("counter", 0u32);
        {
            let mut guard = lock.lock().await;
            *guard += 1;
        }
        assert_eq!(*lock.lock().await, 1);
        assert_eq!(lock.name(), "counter");
    }

    #[tokio::test]
    async fn test_waiters_are_counted() {
        let lock = Arc::new(TimedMutex::new("busy", ()));
        let guard = lock.lock().await;

        let lock_clone = lock.clone();
        let waiter = tokio::spawn(async move {
            let _g = lock_clone.lock().await;
        });

        // Give the waiter time to queue
        for _ in 0..50 {
            if lock.waiting() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lock.waiting(), 1, "Waiter should be queued");

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(lock.waiting(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_uncounted() {
        let lock = Arc::new(TimedMutex::new("busy", ()));
        let guard = lock.lock().await;

        let lock_clone = lock.clone();
        let waiter = tokio::spawn(async move {
            let _g = lock_clone.lock().await;
        });
        for _ in 0..50 {
            if lock.waiting() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lock.waiting(), 1);

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(lock.waiting(), 0);

        let timed_out = tokio::time::timeout(Duration::from_millis(20), lock.lock()).await;
        assert!(timed_out.is_err());
        assert_eq!(lock.waiting(), 0);
        drop(guard);
    }
}
