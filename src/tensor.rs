//! Move-only tensor handles and the ledger that counts them.
//!
//! Every tensor produced while the pipeline runs is wrapped in a [`Tensor`]
//! by [`TensorLedger::track`]. A `Tensor` is not `Clone`, so exactly one owner
//! exists at any time and releasing it twice cannot be expressed: `release`
//! takes the handle by value and dropping a handle anywhere (normal return,
//! early `?`, panic unwinding) counts as its release.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::{arr0, Array, ArrayD, ArrayViewD, Dimension};

#[derive(Debug, Default)]
struct Counters {
    allocated: AtomicU64,
    released: AtomicU64,
}

/// Shared allocation counters for every tensor tracked by one pipeline.
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    counters: Arc<Counters>,
}

/// Point-in-time copy of the ledger counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub allocated: u64,
    pub released: u64,
}

/// Allocations and releases observed between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTally {
    pub allocated: u64,
    pub released: u64,
}

impl CycleTally {
    /// True when the interval neither grew nor shrank the outstanding count.
    pub fn is_balanced(&self) -> bool {
        self.allocated == self.released
    }
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of freshly produced data and register it as allocated.
    pub fn track<D: Dimension>(&self, data: Array<f32, D>) -> Tensor {
        self.counters.allocated.fetch_add(1, Ordering::Relaxed);
        Tensor {
            data: data.into_dyn(),
            ledger: self.clone(),
        }
    }

    /// Rank-0 tensor holding `value`.
    pub fn scalar(&self, value: f32) -> Tensor {
        self.track(arr0(value))
    }

    /// Release a single tensor. Consumes the handle.
    pub fn release(&self, tensor: Tensor) {
        tracing::trace!(shape = ?tensor.shape(), "releasing tensor");
        drop(tensor);
    }

    /// Release every tensor in `tensors`, returning how many were released.
    pub fn release_all<I>(&self, tensors: I) -> usize
    where
        I: IntoIterator<Item = Tensor>,
    {
        let mut count = 0;
        for tensor in tensors {
            self.release(tensor);
            count += 1;
        }
        count
    }

    pub fn allocated(&self) -> u64 {
        self.counters.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Relaxed)
    }

    /// Number of live tensors tracked by this ledger.
    pub fn outstanding(&self) -> u64 {
        self.allocated() - self.released()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            allocated: self.allocated(),
            released: self.released(),
        }
    }

    /// Activity since `earlier` was taken.
    pub fn since(&self, earlier: LedgerSnapshot) -> CycleTally {
        let now = self.snapshot();
        CycleTally {
            allocated: now.allocated - earlier.allocated,
            released: now.released - earlier.released,
        }
    }
}

/// Single-owner handle to a tracked f32 tensor.
pub struct Tensor {
    data: ArrayD<f32>,
    ledger: TensorLedger,
}

impl Tensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn view(&self) -> ArrayViewD<'_, f32> {
        self.data.view()
    }

    pub fn array(&self) -> &ArrayD<f32> {
        &self.data
    }

    /// Rank-0 tensors stand in for "no prior state".
    pub fn is_placeholder(&self) -> bool {
        self.data.ndim() == 0
    }
}

impl Drop for Tensor {
    fn drop(&mut self) {
        self.ledger.counters.released.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor").field("shape", &self.shape()).finish()
    }
}
