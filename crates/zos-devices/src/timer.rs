//! Wake queue for sleeping processes
//!
//! Requests are ordered by wake timestamp; requests with equal timestamps
//! keep their arrival order. Each request is identified by an opaque
//! [`SleepHandle`] handed out on insertion.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use zos_hal::ProcessId;

/// Opaque identity of a queued sleep request
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SleepHandle(u64);

impl SleepHandle {
    /// Arrival sequence number
    pub fn seq(&self) -> u64 {
        self.0
    }
}

/// A process waiting for the clock to reach `wake_at`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SleepRequest {
    /// Queue-assigned identity (also the arrival sequence number)
    pub handle: SleepHandle,
    /// Sleeping process
    pub pid: ProcessId,
    /// Absolute wake time in microseconds
    pub wake_at: u64,
}

impl Ord for SleepRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.wake_at
            .cmp(&other.wake_at)
            .then(self.handle.cmp(&other.handle))
    }
}

impl PartialOrd for SleepRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Wake queue errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// No room left to record another sleep request.
    #[error("sleep queue exhausted")]
    ResourceExhausted,
}

/// Pending sleep requests, earliest wake time first.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<SleepRequest>>,
    next_seq: u64,
    limit: Option<usize>,
}

impl TimerQueue {
    /// Create an empty queue bounded only by memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue holding at most `limit` requests
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Queue `pid` to wake at `wake_at`.
    pub fn insert(&mut self, pid: ProcessId, wake_at: u64) -> Result<SleepHandle, TimerError> {
        if let Some(limit) = self.limit {
            if self.heap.len() >= limit {
                return Err(TimerError::ResourceExhausted);
            }
        }
        self.heap
            .try_reserve(1)
            .map_err(|_| TimerError::ResourceExhausted)?;

        debug_assert!(!self.contains_pid(pid), "process {} is already asleep", pid);

        let handle = SleepHandle(self.next_seq);
        self.next_seq += 1;
        self.heap.push(Reverse(SleepRequest {
            handle,
            pid,
            wake_at,
        }));
        Ok(handle)
    }

    /// Remove every request due at `now`, in wake order.
    ///
    /// Stops at the first request still in the future.
    pub fn pop_due(&mut self, now: u64) -> Vec<SleepRequest> {
        let mut due = Vec::new();
        while let Some(Reverse(head)) = self.heap.peek() {
            if head.wake_at > now {
                break;
            }
            if let Some(Reverse(req)) = self.heap.pop() {
                due.push(req);
            }
        }
        due
    }

    /// Remove every request regardless of wake time, in wake order.
    pub fn drain_all(&mut self) -> Vec<SleepRequest> {
        let mut all = Vec::with_capacity(self.heap.len());
        while let Some(Reverse(req)) = self.heap.pop() {
            all.push(req);
        }
        all
    }

    /// Wake time of the earliest request
    pub fn next_wake(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse(r)| r.wake_at)
    }

    /// Snapshot of the queue in wake order
    pub fn entries(&self) -> Vec<SleepRequest> {
        let mut entries: Vec<SleepRequest> = self.heap.iter().map(|Reverse(r)| r.clone()).collect();
        entries.sort();
        entries
    }

    /// Check whether `pid` has a pending request
    pub fn contains_pid(&self, pid: ProcessId) -> bool {
        self.heap.iter().any(|Reverse(r)| r.pid == pid)
    }

    /// Sequence number the next request will receive
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
