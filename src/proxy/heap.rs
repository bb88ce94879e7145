//! Host heap accounting for proxy objects
//!
//! Every live proxy holds a `HeapCell`. Reserving a cell past the configured
//! budget is the host's allocation failure; the cell is returned when the
//! proxy is destroyed.

use crate::config::HeapConfig;
use crate::errors::ProxyError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct HostHeap {
    live: AtomicUsize,
    total_allocated: AtomicU64,
    limit: Option<usize>,
}

impl HostHeap {
    pub fn new(config: &HeapConfig) -> Self {
        Self {
            live: AtomicUsize::new(0),
            total_allocated: AtomicU64::new(0),
            limit: config.max_live_proxies,
        }
    }

    /// Reserve room for one proxy object
    pub fn reserve(self: &Arc<Self>) -> Result<HeapCell, ProxyError> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < limit).then_some(live + 1)
            })
            .map_err(|_| ProxyError::OutOfMemory { resource: "proxy object" })?;

        self.total_allocated.fetch_add(1, Ordering::Relaxed);
        Ok(HeapCell { heap: Arc::clone(self) })
    }

    /// Proxy objects currently alive
    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Proxy objects ever allocated
    #[inline]
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// One reserved proxy allocation, returned on drop
#[derive(Debug)]
pub struct HeapCell {
    heap: Arc<HostHeap>,
}

impl Drop for HeapCell {
    fn drop(&mut self) {
        self.heap.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_and_return() {
        let heap = Arc::new(HostHeap::new(&HeapConfig::default()));
        let a = heap.reserve().unwrap();
        let b = heap.reserve().unwrap();
        assert_eq!(heap.live(), 2);

        drop(a);
        drop(b);
        assert_eq!(heap.live(), 0);
        assert_eq!(heap.total_allocated(), 2);
    }

    #[test]
    fn test_budget_exhaustion() {
        let heap = Arc::new(HostHeap::new(&HeapConfig { max_live_proxies: Some(1) }));
        let cell = heap.reserve().unwrap();

        let err = heap.reserve().unwrap_err();
        assert_eq!(err, ProxyError::OutOfMemory { resource: "proxy object" });
        assert_eq!(heap.live(), 1);

        drop(cell);
        assert!(heap.reserve().is_ok());
    }
}
