//! Association of in-flight native command buffers with the work that has to
//! happen once they complete.
//!
//! Submission and the native completion callback run on different threads,
//! so the pooled staging buffers and the in-flight map share one mutex.

use std::{
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

use fxhash::FxHashMap;
use parking_lot::{Condvar, Mutex};

use crate::{format::align_to, BufferAddress, Fence, COPY_BUFFER_ALIGNMENT};

/// A scratch buffer handed out by the staging pool.
#[derive(Debug)]
pub(crate) struct StagingBuffer<B> {
    pub raw: B,
    pub size: BufferAddress,
}

#[derive(Debug)]
struct Pending<B> {
    fences: Vec<Arc<Fence>>,
    staging: Vec<StagingBuffer<B>>,
    submitted: bool,
}

impl<B> Default for Pending<B> {
    fn default() -> Self {
        Self {
            fences: Vec::new(),
            staging: Vec::new(),
            submitted: false,
        }
    }
}

#[derive(Debug)]
struct Inner<K, B> {
    free: Vec<StagingBuffer<B>>,
    pending: FxHashMap<K, Pending<B>>,
    largest: BufferAddress,
}

#[derive(Debug)]
pub(crate) struct SubmissionTracker<K, B> {
    inner: Mutex<Inner<K, B>>,
    idle: Condvar,
    capacity: usize,
}

impl<K: Copy + Eq + Hash, B> SubmissionTracker<K, B> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                free: Vec::new(),
                pending: FxHashMap::default(),
                largest: 0,
            }),
            idle: Condvar::new(),
            capacity,
        }
    }

    /// Hands out an idle staging buffer of at least `size` bytes, or creates
    /// one sized to the largest request seen so far.
    pub(crate) fn acquire<E>(
        &self,
        size: BufferAddress,
        create: impl FnOnce(BufferAddress) -> Result<B, E>,
    ) -> Result<StagingBuffer<B>, E> {
        let new_size = {
            let mut inner = self.inner.lock();
            if let Some(index) = inner.free.iter().position(|staging| staging.size >= size) {
                return Ok(inner.free.swap_remove(index));
            }
            let new_size = align_to(size.max(1), COPY_BUFFER_ALIGNMENT).max(inner.largest);
            inner.largest = new_size;
            new_size
        };
        log::info!("Growing the staging pool with a {} byte buffer", new_size);
        Ok(StagingBuffer {
            raw: create(new_size)?,
            size: new_size,
        })
    }

    /// Ties `staging` to the command buffer `key`. It comes back to the pool
    /// only once that command buffer completes or is abandoned unsubmitted.
    pub(crate) fn attach_staging(&self, key: K, staging: StagingBuffer<B>) {
        self.inner
            .lock()
            .pending
            .entry(key)
            .or_default()
            .staging
            .push(staging);
    }

    /// Registers `fences` against `key` and marks it in flight.
    pub(crate) fn submit(&self, key: K, fences: impl IntoIterator<Item = Arc<Fence>>) {
        let mut inner = self.inner.lock();
        let pending = inner.pending.entry(key).or_default();
        pending.fences.extend(fences);
        pending.submitted = true;
    }

    /// Called from the completion handler of `key`.
    pub(crate) fn complete(&self, key: K) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.pending.remove(&key) {
            for fence in pending.fences {
                fence.set();
            }
            Self::recycle(&mut inner, self.capacity, pending.staging);
        }
        if inner.pending.values().all(|pending| !pending.submitted) {
            self.idle.notify_all();
        }
    }

    /// Releases the staging buffers of a command buffer that was never submitted.
    pub(crate) fn abandon(&self, key: K) {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner.pending.remove(&key) {
            debug_assert!(!pending.submitted);
            Self::recycle(&mut inner, self.capacity, pending.staging);
        }
    }

    fn recycle(inner: &mut Inner<K, B>, capacity: usize, staging: Vec<StagingBuffer<B>>) {
        for buffer in staging {
            if inner.free.len() < capacity {
                inner.free.push(buffer);
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.inner
            .lock()
            .pending
            .values()
            .filter(|pending| pending.submitted)
            .count()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.inner.lock().free.len()
    }

    /// Blocks until nothing is in flight. Returns false on timeout.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.pending.values().all(|pending| !pending.submitted) {
                return true;
            }
            if self.idle.wait_until(&mut inner, deadline).timed_out() {
                return inner.pending.values().all(|pending| !pending.submitted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn create(size: BufferAddress) -> Result<BufferAddress, Infallible> {
        Ok(size)
    }

    #[test]
    fn pool_grows_to_the_largest_request() {
        let tracker = SubmissionTracker::<u32, BufferAddress>::new(4);
        let a = tracker.acquire(10, create).unwrap();
        assert_eq!(a.size, 12);
        let b = tracker.acquire(5, create).unwrap();
        assert_eq!(b.size, 12);
        let c = tracker.acquire(100, create).unwrap();
        assert_eq!(c.size, 100);
    }

    #[test]
    fn staging_is_recycled_only_on_completion() {
        let tracker = SubmissionTracker::<u32, BufferAddress>::new(4);
        let staging = tracker.acquire(64, create).unwrap();
        tracker.attach_staging(1, staging);
        let fence = Arc::new(Fence::new(false));
        tracker.submit(1, Some(Arc::clone(&fence)));
        assert_eq!(tracker.free_count(), 0);
        assert_eq!(tracker.in_flight(), 1);

        tracker.complete(1);
        assert!(fence.signaled());
        assert_eq!(tracker.free_count(), 1);
        assert_eq!(tracker.in_flight(), 0);
        assert!(tracker.wait_idle(Duration::from_millis(0)));
    }

    #[test]
    fn abandoned_buffers_return_without_signaling() {
        let tracker = SubmissionTracker::<u32, BufferAddress>::new(4);
        let staging = tracker.acquire(16, create).unwrap();
        tracker.attach_staging(7, staging);
        tracker.abandon(7);
        assert_eq!(tracker.free_count(), 1);
    }

    #[test]
    fn pool_capacity_is_respected() {
        let tracker = SubmissionTracker::<u32, BufferAddress>::new(1);
        let a = tracker.acquire(16, create).unwrap();
        let b = tracker.acquire(16, create).unwrap();
        tracker.attach_staging(1, a);
        tracker.attach_staging(1, b);
        tracker.submit(1, None);
        tracker.complete(1);
        assert_eq!(tracker.free_count(), 1);
    }
}
