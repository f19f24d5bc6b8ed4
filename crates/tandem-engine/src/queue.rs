//! The batch queue shared by the producer and the consumer.
//!
//! One open batch receives packets; sealed batches wait in FIFO order for
//! the consumer. Every operation takes the single queue lock for its own
//! duration only and never blocks.

use std::collections::VecDeque;
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tandem_core::{Batch, BatchSeq, BoxedPacket, EnqueueError, TickId};

/// Result of sealing the open batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SealReceipt {
    /// Sequence number assigned to the sealed batch.
    pub seq: BatchSeq,
    /// Packets the batch holds.
    pub packets: usize,
    /// Sealed batches waiting in the queue, including this one.
    pub pending: usize,
}

/// What a discard dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Discarded {
    /// Whole batches dropped.
    pub batches: usize,
    /// Packets dropped across those batches (and the open batch).
    pub packets: usize,
}

struct QueueState<S> {
    open: Batch<S>,
    sealed: VecDeque<Batch<S>>,
    last_seq: BatchSeq,
    closed: bool,
}

/// FIFO of sealed batches plus the currently open batch.
pub struct BatchQueue<S> {
    state: Mutex<QueueState<S>>,
}

// Compile-time assertion: the queue is shareable whatever the consumer
// state type is, since packets are `Send` trait objects.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BatchQueue<std::rc::Rc<()>>>();
};

impl<S> BatchQueue<S> {
    /// Create an empty queue with a fresh open batch.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                open: Batch::open(),
                sealed: VecDeque::new(),
                last_seq: BatchSeq::ZERO,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a packet to the open batch.
    pub fn enqueue(&self, packet: BoxedPacket<S>) -> Result<(), EnqueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(EnqueueError::ShutDown);
        }
        // The open batch is replaced on every seal, so it is always open.
        let pushed = state.open.push(packet);
        debug_assert!(pushed.is_ok());
        Ok(())
    }

    /// Seal the open batch, push it to the FIFO, and expose a fresh one.
    ///
    /// Indivisible with respect to [`enqueue`](Self::enqueue): a packet
    /// lands either in the sealed batch or in its successor.
    pub fn seal_batch(&self, tick: TickId) -> Result<SealReceipt, EnqueueError> {
        let mut state = self.lock();
        if state.closed {
            return Err(EnqueueError::ShutDown);
        }
        let seq = state.last_seq.next();
        let mut batch = mem::take(&mut state.open);
        let sealed = batch.seal(seq, tick);
        debug_assert!(sealed.is_ok());
        let packets = batch.len();
        state.last_seq = seq;
        state.sealed.push_back(batch);
        Ok(SealReceipt {
            seq,
            packets,
            pending: state.sealed.len(),
        })
    }

    /// Pop the oldest sealed batch. Never blocks; `None` when empty or
    /// after [`close`](Self::close).
    pub fn drain_next(&self) -> Option<Batch<S>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        state.sealed.pop_front()
    }

    /// Pop the oldest sealed batch only if its sequence number is at most
    /// `limit`. Lets a frame drain what was sealed when it started without
    /// chasing a producer that keeps sealing.
    pub fn drain_through(&self, limit: BatchSeq) -> Option<Batch<S>> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        match state.sealed.front() {
            Some(front) if front.seq() <= limit => state.sealed.pop_front(),
            _ => None,
        }
    }

    /// Drop the open batch's packets (a failed tick's partial output).
    pub fn discard_open(&self) -> usize {
        let mut state = self.lock();
        mem::take(&mut state.open).discard()
    }

    /// Shut the queue: reject further ingress and drop everything held.
    ///
    /// Idempotent; a second call discards nothing.
    pub fn close(&self) -> Discarded {
        let mut state = self.lock();
        state.closed = true;
        let mut discarded = Discarded {
            batches: state.sealed.len(),
            packets: 0,
        };
        for mut batch in state.sealed.drain(..) {
            discarded.packets += batch.discard();
        }
        discarded.packets += mem::take(&mut state.open).discard();
        discarded
    }

    /// Number of sealed batches waiting for the consumer.
    pub fn pending(&self) -> usize {
        self.lock().sealed.len()
    }

    /// Packets currently in the open batch.
    pub fn open_len(&self) -> usize {
        self.lock().open.len()
    }

    /// Sequence number of the most recently sealed batch.
    pub fn last_sealed(&self) -> BatchSeq {
        self.lock().last_seq
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl<S> Default for BatchQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}
