//! Bounded, thread-safe queue between the delivery thread and the consumer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::image_pipeline::{AcquisitionError, ProcessedFrame, Result};

/// What to do when a frame arrives at a full sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the frame; the acquisition must stop
    #[default]
    HaltOnOverflow,
    /// Discard the queued backlog and keep the newest frame
    DropAndContinue,
}

/// Result of a successful insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Queued,
    /// The sink was full; this many queued frames were discarded first
    DroppedBacklog(usize),
}

struct SinkInner {
    queue: VecDeque<Arc<ProcessedFrame>>,
    policy: OverflowPolicy,
}

pub struct FrameSink {
    capacity: usize,
    inner: Mutex<SinkInner>,
    available: Condvar,
    overflow_events: AtomicU64,
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("policy", &self.policy())
            .finish()
    }
}

impl FrameSink {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(AcquisitionError::InvalidConfig(
                "sink capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(SinkInner {
                queue: VecDeque::with_capacity(capacity),
                policy,
            }),
            available: Condvar::new(),
            overflow_events: AtomicU64::new(0),
        })
    }

    pub fn insert(&self, frame: ProcessedFrame) -> Result<InsertOutcome> {
        self.insert_shared(Arc::new(frame))
    }

    pub fn insert_shared(&self, frame: Arc<ProcessedFrame>) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock();

        if inner.queue.len() < self.capacity {
            inner.queue.push_back(frame);
            self.available.notify_one();
            return Ok(InsertOutcome::Queued);
        }

        self.overflow_events.fetch_add(1, Ordering::Relaxed);
        match inner.policy {
            OverflowPolicy::HaltOnOverflow => Err(AcquisitionError::BufferOverflow(self.capacity)),
            OverflowPolicy::DropAndContinue => {
                let dropped = inner.queue.len();
                inner.queue.clear();
                inner.queue.push_back(frame);
                self.available.notify_one();
                warn!(
                    dropped,
                    capacity = self.capacity,
                    "Frame sink overflow, discarded backlog to keep the newest frame"
                );
                Ok(InsertOutcome::DroppedBacklog(dropped))
            }
        }
    }

    pub fn pop(&self) -> Option<Arc<ProcessedFrame>> {
        self.inner.lock().queue.pop_front()
    }

    /// Waits up to `timeout` for a frame.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Arc<ProcessedFrame>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.queue.pop_front() {
                return Some(frame);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return inner.queue.pop_front();
            }
        }
    }

    pub fn drain(&self) -> Vec<Arc<ProcessedFrame>> {
        self.inner.lock().queue.drain(..).collect()
    }

    pub fn clear(&self) {
        self.inner.lock().queue.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.inner.lock().policy
    }

    pub fn set_policy(&self, policy: OverflowPolicy) {
        self.inner.lock().policy = policy;
    }

    /// Inserts that found the sink full, under either policy.
    pub fn overflow_count(&self) -> u64 {
        self.overflow_events.load(Ordering::Relaxed)
    }
}
