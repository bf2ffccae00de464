#![forbid(unsafe_code)]

//! Batched asynchronous change notification.
//!
//! # Design
//!
//! Mutations record their [`ChangeRecord`] batches synchronously via
//! [`ChangeHub::notify`]; delivery happens at the next scheduler tick, not
//! inside the mutating call. Many synchronous mutations in one turn
//! therefore cost one flush, and a consumer patching external state (e.g. a
//! grid renderer) sees them as separate, ordered invocations.
//!
//! The flush boundary is an explicit [`Scheduler`] rather than an ambient
//! runtime hook, so "next tick" is deterministic under test: drive a
//! [`TickScheduler`] with `run_pending()`.
//!
//! # Invariants
//!
//! 1. Each `notify` batch is delivered as one invocation per observer, in
//!    the order the batches were produced.
//! 2. At most one flush task is scheduled per pending window.
//! 3. Observers dropped before the flush fires receive nothing.
//! 4. A panicking observer does not prevent delivery to the others; the
//!    panic is caught and logged.
//!
//! # Failure Modes
//!
//! - **Observer panic**: caught per invocation (`catch_unwind`), logged at
//!   `warn`, delivery continues.
//! - **Hub dropped before tick**: the scheduled task holds a `Weak` and
//!   becomes a no-op.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::change::ChangeRecord;

/// A batch of records produced by a single `notify` call.
pub type ChangeBatch<T> = SmallVec<[ChangeRecord<T>; 2]>;

/// Flush-boundary abstraction: something that runs a task "next tick".
pub trait Scheduler {
    fn schedule(&self, task: Box<dyn FnOnce()>);
}

/// Deterministic FIFO scheduler.
///
/// Tasks queue up until the host drives [`run_pending`](Self::run_pending),
/// which drains everything queued so far (tasks scheduled *while* running
/// wait for the next call). One `TickScheduler` is typically shared by all
/// collections owned by a host so a single tick flushes every target.
#[derive(Default)]
pub struct TickScheduler {
    tasks: RefCell<VecDeque<Box<dyn FnOnce()>>>,
}

impl TickScheduler {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Run every task queued before this call. Returns the number run.
    pub fn run_pending(&self) -> usize {
        let batch: Vec<_> = self.tasks.borrow_mut().drain(..).collect();
        let count = batch.len();
        for task in batch {
            task();
        }
        count
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.tasks.borrow().is_empty()
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, task: Box<dyn FnOnce()>) {
        self.tasks.borrow_mut().push_back(task);
    }
}

type ObserverFn<T> = Rc<dyn Fn(&[ChangeRecord<T>])>;

struct HubInner<T> {
    observers: Vec<(u64, ObserverFn<T>)>,
    next_id: u64,
    pending: VecDeque<ChangeBatch<T>>,
    flush_scheduled: bool,
}

/// Per-collection notification channel.
pub struct ChangeHub<T> {
    inner: Rc<RefCell<HubInner<T>>>,
    scheduler: Rc<dyn Scheduler>,
}

impl<T: 'static> ChangeHub<T> {
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(HubInner {
                observers: Vec::new(),
                next_id: 0,
                pending: VecDeque::new(),
                flush_scheduled: false,
            })),
            scheduler,
        }
    }

    /// Register an observer. The returned [`Subscription`] deregisters it
    /// on drop; an observer dropped before a pending flush fires receives
    /// none of the queued batches.
    pub fn observe(&self, callback: impl Fn(&[ChangeRecord<T>]) + 'static) -> Subscription<T> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push((id, Rc::new(callback)));
        Subscription {
            hub: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Drop every registered observer. Queued batches are delivered to no
    /// one when the flush fires.
    pub fn unobserve_all(&self) {
        self.inner.borrow_mut().observers.clear();
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Queue a batch for delivery at the next tick. Empty batches are
    /// discarded. At most one flush task is scheduled per window.
    pub fn notify(&self, batch: ChangeBatch<T>) {
        if batch.is_empty() {
            return;
        }
        trace!(records = batch.len(), "queueing change batch");
        let mut inner = self.inner.borrow_mut();
        inner.pending.push_back(batch);
        if !inner.flush_scheduled {
            inner.flush_scheduled = true;
            let weak = Rc::downgrade(&self.inner);
            drop(inner);
            self.scheduler.schedule(Box::new(move || {
                if let Some(strong) = weak.upgrade() {
                    Self::flush(&strong);
                }
            }));
        }
    }

    /// Force delivery of everything queued, without waiting for the tick.
    pub fn flush_now(&self) {
        Self::flush(&self.inner);
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.inner.borrow().pending.is_empty()
    }

    fn flush(inner: &Rc<RefCell<HubInner<T>>>) {
        loop {
            // Pop one batch and snapshot the observer list without holding
            // the borrow across callbacks: a callback may mutate the
            // collection and re-enter `notify`, or drop its Subscription.
            let (batch, observers) = {
                let mut hub = inner.borrow_mut();
                match hub.pending.pop_front() {
                    Some(batch) => {
                        let observers: Vec<_> = hub
                            .observers
                            .iter()
                            .map(|(id, f)| (*id, Rc::clone(f)))
                            .collect();
                        (batch, observers)
                    }
                    None => {
                        hub.flush_scheduled = false;
                        return;
                    }
                }
            };
            for (id, callback) in observers {
                let outcome = catch_unwind(AssertUnwindSafe(|| callback(&batch)));
                if outcome.is_err() {
                    warn!(observer = id, "observer panicked during change delivery");
                }
            }
        }
    }
}

/// RAII observer registration. Dropping it removes the observer before the
/// next delivery.
pub struct Subscription<T> {
    hub: Weak<RefCell<HubInner<T>>>,
    id: u64,
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.borrow_mut().observers.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use std::cell::RefCell;

    fn hub_with_scheduler() -> (ChangeHub<u32>, Rc<TickScheduler>) {
        let scheduler = TickScheduler::new();
        let hub = ChangeHub::new(scheduler.clone() as Rc<dyn Scheduler>);
        (hub, scheduler)
    }

    #[test]
    fn delivery_waits_for_tick() {
        let (hub, scheduler) = hub_with_scheduler();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = hub.observe(move |batch| {
            seen_clone.borrow_mut().push(batch.len());
        });

        hub.notify(smallvec![ChangeRecord::insert(0, vec![1, 2])]);
        assert!(seen.borrow().is_empty(), "delivery must not be synchronous");

        scheduler.run_pending();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn batches_are_separate_ordered_invocations() {
        let (hub, scheduler) = hub_with_scheduler();
        let seen: Rc<RefCell<Vec<Vec<ChangeRecord<u32>>>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = hub.observe(move |batch| {
            seen_clone.borrow_mut().push(batch.to_vec());
        });

        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        hub.notify(smallvec![ChangeRecord::Update { index: 0 }]);
        scheduler.run_pending();

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2, "two notify calls, two invocations");
        assert_eq!(seen[0], vec![ChangeRecord::insert(0, vec![1])]);
        assert_eq!(seen[1], vec![ChangeRecord::Update { index: 0 }]);
    }

    #[test]
    fn single_flush_task_per_window() {
        let (hub, scheduler) = hub_with_scheduler();
        let _sub = hub.observe(|_| {});
        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        hub.notify(smallvec![ChangeRecord::insert(1, vec![2])]);
        hub.notify(smallvec![ChangeRecord::insert(2, vec![3])]);
        assert_eq!(scheduler.run_pending(), 1);
    }

    #[test]
    fn dropped_subscription_receives_nothing() {
        let (hub, scheduler) = hub_with_scheduler();
        let seen = Rc::new(RefCell::new(0u32));
        let seen_clone = Rc::clone(&seen);
        let sub = hub.observe(move |_| {
            *seen_clone.borrow_mut() += 1;
        });

        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        drop(sub);
        scheduler.run_pending();
        assert_eq!(*seen.borrow(), 0, "unobserved before flush");
    }

    #[test]
    fn unobserve_all_clears() {
        let (hub, scheduler) = hub_with_scheduler();
        let _a = hub.observe(|_| {});
        let _b = hub.observe(|_| {});
        assert_eq!(hub.observer_count(), 2);
        hub.unobserve_all();
        assert_eq!(hub.observer_count(), 0);
        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        scheduler.run_pending();
        assert!(!hub.has_pending());
    }

    #[test]
    fn panicking_observer_is_isolated() {
        let (hub, scheduler) = hub_with_scheduler();
        let seen = Rc::new(RefCell::new(0u32));
        let seen_clone = Rc::clone(&seen);

        let _bad = hub.observe(|_| panic!("observer bug"));
        let _good = hub.observe(move |_| {
            *seen_clone.borrow_mut() += 1;
        });

        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        scheduler.run_pending();
        assert_eq!(*seen.borrow(), 1, "second observer still delivered");
    }

    #[test]
    fn flush_now_forces_delivery() {
        let (hub, _scheduler) = hub_with_scheduler();
        let seen = Rc::new(RefCell::new(0u32));
        let seen_clone = Rc::clone(&seen);
        let _sub = hub.observe(move |_| {
            *seen_clone.borrow_mut() += 1;
        });

        hub.notify(smallvec![ChangeRecord::insert(0, vec![1])]);
        hub.flush_now();
        assert_eq!(*seen.borrow(), 1);
        assert!(!hub.has_pending());
    }

    #[test]
    fn notify_during_flush_is_delivered_in_order() {
        let (hub, scheduler) = hub_with_scheduler();
        let hub = Rc::new(hub);
        let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));

        let hub_clone = Rc::clone(&hub);
        let seen_clone = Rc::clone(&seen);
        let fired = Rc::new(RefCell::new(false));
        let fired_clone = Rc::clone(&fired);
        let _sub = hub.observe(move |batch| {
            seen_clone.borrow_mut().push(batch[0].index());
            if !*fired_clone.borrow() {
                *fired_clone.borrow_mut() = true;
                hub_clone.notify(smallvec![ChangeRecord::Update { index: 99 }]);
            }
        });

        hub.notify(smallvec![ChangeRecord::Update { index: 1 }]);
        scheduler.run_pending();
        assert_eq!(*seen.borrow(), vec![1, 99]);
    }

    #[test]
    fn empty_batch_is_dropped() {
        let (hub, scheduler) = hub_with_scheduler();
        let _sub = hub.observe(|_| panic!("must not be called"));
        hub.notify(smallvec![]);
        assert!(!hub.has_pending());
        assert_eq!(scheduler.run_pending(), 0);
    }
}
