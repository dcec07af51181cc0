//! The pending-request queue and the single-flight flag that goes with it.
//!
//! Producers may enqueue from interrupt context, so every operation takes the queue's spin lock
//! with local interrupts masked and does nothing inside but pointer manipulation. The FIFO, the
//! "enumeration in progress" flag and the "enumeration finished" event all change together
//! under that lock; that is what makes claiming a worker run atomic with the enqueue.
use alloc::collections::VecDeque;
use log::error;
use utils::{irq::IrqControl, spin::SpinLock};

use crate::{event::Event, request::Request};

/// What the submitter has to do after an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller flipped the in-progress flag and must run or schedule the worker.
    Started,
    /// A worker run is already under way and will pick the request up.
    Joined,
}

#[derive(Debug)]
struct QueueState {
    requests: VecDeque<Request>,
    in_progress: bool,
}

#[derive(Debug)]
pub struct RequestQueue {
    inner: SpinLock<QueueState>,
    finished: Event,
}

impl RequestQueue {
    /// `capacity` should match the record quota so that enqueueing never reallocates.
    pub fn with_capacity(capacity: usize) -> RequestQueue {
        RequestQueue {
            inner: SpinLock::new(QueueState {
                requests: VecDeque::with_capacity(capacity),
                in_progress: false,
            }),
            finished: Event::new(true),
        }
    }

    /// Append to the tail.
    pub fn enqueue<I: IrqControl + ?Sized>(&self, irq: &I, request: Request) {
        self.inner.lock_irqsave(irq).requests.push_back(request);
    }

    /// Append to the tail and, unless a run is already in progress, claim the next one.
    ///
    /// Bulk boot submissions expect to be alone; if a run is somehow in progress the request
    /// joins it instead of starting a second worker.
    pub fn enqueue_and_claim<I: IrqControl + ?Sized>(
        &self,
        irq: &I,
        request: Request,
        bulk_boot: bool,
    ) -> Claim {
        let mut state = self.inner.lock_irqsave(irq);
        state.requests.push_back(request);
        if state.in_progress {
            if bulk_boot {
                error!("Bulk boot enumeration requested while a run is in progress");
                debug_assert!(false, "bulk boot enumeration overlaps a worker run");
            }
            return Claim::Joined;
        }
        state.in_progress = true;
        self.finished.clear();
        Claim::Started
    }

    /// Pop the head, if any.
    pub fn pop_front<I: IrqControl + ?Sized>(&self, irq: &I) -> Option<Request> {
        self.inner.lock_irqsave(irq).requests.pop_front()
    }

    /// Pop the head; if the queue is empty, end the run instead: clear the in-progress flag and
    /// raise the finished event, atomically with the emptiness check.
    pub fn pop_or_finish<I: IrqControl + ?Sized>(&self, irq: &I) -> Option<Request> {
        let mut state = self.inner.lock_irqsave(irq);
        let head = state.requests.pop_front();
        if head.is_none() {
            state.in_progress = false;
            self.finished.set();
        }
        head
    }

    pub fn len<I: IrqControl + ?Sized>(&self, irq: &I) -> usize {
        self.inner.lock_irqsave(irq).requests.len()
    }

    pub fn is_empty<I: IrqControl + ?Sized>(&self, irq: &I) -> bool {
        self.inner.lock_irqsave(irq).requests.is_empty()
    }

    pub fn in_progress<I: IrqControl + ?Sized>(&self, irq: &I) -> bool {
        self.inner.lock_irqsave(irq).in_progress
    }

    /// Raised whenever no worker run is in progress.
    pub fn finished(&self) -> &Event {
        &self.finished
    }
}
