//! Collective communication over a group of processes.
//!
//! Every function in this crate that inspects global structure (index set equality, field
//! decomposition, global norms, diagnostics) goes through a [`Communicator`]. All such calls
//! are *collective*: every process in the group must make the same sequence of calls, and
//! control flow may only branch on values that every process agrees on.
//!
//! Two implementations are provided. [`SerialCommunicator`] is the trivial group of one
//! process. [`ThreadCommunicator`] runs a group of "processes" as threads of the current
//! program, which makes it possible to exercise SPMD code paths without an MPI runtime.
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Barrier};
use std::thread;

/// A group of processes that can take part in collective operations.
///
/// Implementors only need to provide the variable-count all-gather primitives. The
/// reductions are provided in terms of these, but may be overridden by implementations
/// with native support (e.g. an MPI communicator).
pub trait Communicator: fmt::Debug + Send + Sync {
    /// The rank of the calling process, in `0 .. size()`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Concatenates the local slices of all processes in rank order.
    fn all_gather_varcount_usize(&self, local: &[usize]) -> Vec<usize>;

    /// Concatenates the local slices of all processes in rank order.
    fn all_gather_varcount_f64(&self, local: &[f64]) -> Vec<f64>;

    /// Gathers one value from every process, in rank order.
    fn all_gather(&self, local: usize) -> Vec<usize> {
        self.all_gather_varcount_usize(&[local])
    }

    /// Logical AND over all processes.
    fn all_reduce_and(&self, local: bool) -> bool {
        self.all_gather(local as usize)
            .into_iter()
            .all(|flag| flag != 0)
    }

    fn all_reduce_sum(&self, local: usize) -> usize {
        self.all_gather(local).into_iter().sum()
    }

    fn all_reduce_max(&self, local: usize) -> usize {
        self.all_gather(local).into_iter().max().unwrap_or(0)
    }

    fn all_reduce_sum_f64(&self, local: f64) -> f64 {
        self.all_gather_varcount_f64(&[local]).into_iter().sum()
    }
}

/// Shared handle to a communicator.
pub type Comm = Arc<dyn Communicator>;

/// The communicator of a single process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialCommunicator;

impl SerialCommunicator {
    pub fn comm() -> Comm {
        Arc::new(SerialCommunicator)
    }
}

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather_varcount_usize(&self, local: &[usize]) -> Vec<usize> {
        local.to_vec()
    }

    fn all_gather_varcount_f64(&self, local: &[f64]) -> Vec<f64> {
        local.to_vec()
    }
}

struct SharedState {
    barrier: Barrier,
    slots: Mutex<Vec<Option<Box<dyn Any + Send>>>>,
}

/// A communicator whose processes are threads of the current program.
///
/// A group is created with [`ThreadCommunicator::group`], and each member is moved to its own
/// thread. Collectives exchange values through a shared slot table: every rank deposits its
/// contribution, waits for the others, reads all contributions and waits again before the
/// table may be reused.
///
/// If ranks disagree on which collective they are calling, the exchanged payload types
/// differ and the exchange panics. A rank that never reaches a collective makes the others
/// wait forever, exactly like a real distributed program would.
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    shared: Arc<SharedState>,
}

impl fmt::Debug for ThreadCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl ThreadCommunicator {
    /// Creates the members of a group of `size` processes.
    pub fn group(size: usize) -> Vec<ThreadCommunicator> {
        assert!(size > 0, "A communicator group must contain at least one process");
        let shared = Arc::new(SharedState {
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| None).collect()),
        });
        (0..size)
            .map(|rank| ThreadCommunicator {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Runs `f` on `size` threads, each with its own member of a fresh group.
    ///
    /// Returns the results in rank order. Panics if any of the threads panicked.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(Comm) -> R + Sync,
        R: Send,
    {
        let f = &f;
        thread::scope(|scope| {
            let handles: Vec<_> = ThreadCommunicator::group(size)
                .into_iter()
                .map(|comm| scope.spawn(move || f(Arc::new(comm))))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    fn exchange<T>(&self, value: T) -> Vec<T>
    where
        T: Clone + Send + 'static,
    {
        self.shared.slots.lock()[self.rank] = Some(Box::new(value));
        self.shared.barrier.wait();
        let gathered = {
            let slots = self.shared.slots.lock();
            slots
                .iter()
                .map(|slot| {
                    slot.as_ref()
                        .and_then(|payload| payload.downcast_ref::<T>())
                        .cloned()
                        .expect("Collective mismatch: ranks called different collectives")
                })
                .collect()
        };
        // Nobody may deposit the next contribution before everyone has read this one
        self.shared.barrier.wait();
        gathered
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_gather_varcount_usize(&self, local: &[usize]) -> Vec<usize> {
        self.exchange(local.to_vec()).concat()
    }

    fn all_gather_varcount_f64(&self, local: &[f64]) -> Vec<f64> {
        self.exchange(local.to_vec()).concat()
    }
}
