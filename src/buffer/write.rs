//! Bounded MPSC write buffer backed by a lock-free `ArrayQueue`.
//!
//! Write tasks are enqueued here so the hot write path never blocks on the
//! policy mutex.  A maintenance pass drains the queue and applies all
//! pending tasks under a single lock acquisition, **in FIFO order** —
//! policy-list membership depends on the preceding task (an `Update`
//! assumes its `Add` was applied first).
//!
//! If the queue is full when a push is attempted, the task is returned to
//! the caller as `Err(task)` so it can be applied synchronously — write
//! tasks must never be lost because they drive capacity accounting.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::store::entry::EntryRecord;

/// Bounded capacity of the write queue.  128 is Caffeine's default.
const WRITE_BUFFER_CAPACITY: usize = 128;

/// Tasks deferred for policy maintenance, each referencing the record the
/// mutation produced or removed.
pub(crate) enum WriteTask<K, V> {
    /// A new mapping was installed.
    Add { entry: Arc<EntryRecord<K, V>> },
    /// An existing mapping was replaced by a new record generation; the
    /// policy re-points the key's node and refreshes its list positions.
    Update { entry: Arc<EntryRecord<K, V>> },
    /// The mapping was removed explicitly (invalidate or replace-removal).
    Remove { entry: Arc<EntryRecord<K, V>> },
    /// The mapping was removed because a fast-path check found it expired.
    Expire { entry: Arc<EntryRecord<K, V>> },
}

impl<K, V> WriteTask<K, V> {
    pub(crate) fn entry(&self) -> &Arc<EntryRecord<K, V>> {
        match self {
            WriteTask::Add { entry }
            | WriteTask::Update { entry }
            | WriteTask::Remove { entry }
            | WriteTask::Expire { entry } => entry,
        }
    }
}

/// Bounded MPSC write buffer.
///
/// Multiple producer threads may call [`push`] concurrently.  A single
/// consumer (the maintenance pass) drains the queue via [`drain`].
///
/// [`push`]: WriteBuffer::push
/// [`drain`]: WriteBuffer::drain
pub(crate) struct WriteBuffer<K, V> {
    queue: ArrayQueue<WriteTask<K, V>>,
}

impl<K, V> WriteBuffer<K, V> {
    /// Creates a new write buffer with the default capacity.
    pub(crate) fn new() -> Self {
        WriteBuffer {
            queue: ArrayQueue::new(WRITE_BUFFER_CAPACITY),
        }
    }

    /// Enqueues `task`.
    ///
    /// Returns `Ok(())` if the task was accepted, or `Err(task)` if the
    /// queue is full.  The caller **must not drop** a returned `Err`.
    #[inline]
    pub(crate) fn push(&self, task: WriteTask<K, V>) -> Result<(), WriteTask<K, V>> {
        self.queue.push(task)
    }

    /// Drains all pending tasks into `out`, preserving enqueue order.
    ///
    /// Called only under the maintenance lock.
    pub(crate) fn drain(&self, out: &mut Vec<WriteTask<K, V>>) {
        while let Some(task) = self.queue.pop() {
            out.push(task);
        }
    }
}
