//! Bounded-concurrency task queue with a high and a low priority bucket.
//!
//! Tasks with priority above zero go to the high bucket, everything else to
//! the low bucket. On every launch or settle event both buckets are stably
//! re-sorted by descending priority and tasks are launched greedily: high
//! tasks while fewer than `concurrency` tasks run, then low tasks while that
//! still holds and fewer than `low_concurrency` low tasks run. Low work may
//! starve; that is accepted.
//!
//! The scheduler is owned by a single thread. Started work may complete from
//! any thread through its [`Completer`]; completions are applied on the next
//! [`Scheduler::pump`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use rustc_hash::FxHashMap;
use tessera_config::SchedulerConfig;

/// Identifier of a scheduled task, unique per scheduler.
pub type TaskId = u64;

/// Shared cancellation flag checked cooperatively by running work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Final outcome observed through a [`TaskHandle`].
#[derive(Debug, PartialEq)]
pub enum Settled<T> {
    /// The work completed with a value.
    Done(T),
    /// The task was aborted before producing a value.
    Unset,
}

impl<T> Settled<T> {
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Unset => None,
        }
    }
}

/// Sends a task's value back to its scheduler. Usable from any thread.
#[derive(Debug)]
pub struct Completer<T> {
    id: TaskId,
    tx: Sender<(TaskId, T)>,
}

impl<T> Completer<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Delivers the value. A scheduler that already settled the task, or no
    /// longer exists, ignores it.
    pub fn complete(self, value: T) {
        let _ = self.tx.send((self.id, value));
    }
}

/// What a task's start function receives.
#[derive(Debug)]
pub struct TaskContext<T> {
    id: TaskId,
    cancel: CancelToken,
    completer: Completer<T>,
}

impl<T> TaskContext<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn complete(self, value: T) {
        self.completer.complete(value);
    }

    pub fn into_parts(self) -> (CancelToken, Completer<T>) {
        (self.cancel, self.completer)
    }
}

/// Receiving end of a scheduled task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: Receiver<Settled<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the outcome once the task has settled.
    pub fn try_settled(&self) -> Option<Settled<T>> {
        match self.rx.try_recv() {
            Ok(settled) => Some(settled),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Start function of a task. Runs on the scheduler's thread when launched.
pub type StartFn<T> = Box<dyn FnOnce(TaskContext<T>)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bucket {
    High,
    Low,
}

impl Bucket {
    fn for_priority(priority: i32) -> Self {
        if priority > 0 { Self::High } else { Self::Low }
    }
}

struct Task<T> {
    start: Option<StartFn<T>>,
    priority: i32,
    bucket: Bucket,
    started: bool,
    cancel: CancelToken,
    tag: String,
    settle: Sender<Settled<T>>,
}

/// Two-bucket priority scheduler.
pub struct Scheduler<T> {
    tasks: FxHashMap<TaskId, Task<T>>,
    high: Vec<TaskId>,
    low: Vec<TaskId>,
    running_high: usize,
    running_low: usize,
    concurrency: usize,
    low_concurrency: usize,
    next_id: TaskId,
    results_tx: Sender<(TaskId, T)>,
    results_rx: Receiver<(TaskId, T)>,
}

impl<T: Send + 'static> Scheduler<T> {
    pub fn new(config: &SchedulerConfig) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            tasks: FxHashMap::default(),
            high: Vec::new(),
            low: Vec::new(),
            running_high: 0,
            running_low: 0,
            concurrency: config.concurrency.max(1),
            low_concurrency: config.low_concurrency,
            next_id: 0,
            results_tx,
            results_rx,
        }
    }

    /// Enqueues a unit of work and launches whatever the ceilings allow.
    pub fn schedule(
        &mut self,
        start: StartFn<T>,
        priority: i32,
        tag: impl Into<String>,
    ) -> TaskHandle<T> {
        self.next_id += 1;
        let id = self.next_id;
        let (settle, rx) = bounded(1);
        let bucket = Bucket::for_priority(priority);
        self.tasks.insert(
            id,
            Task {
                start: Some(start),
                priority,
                bucket,
                started: false,
                cancel: CancelToken::new(),
                tag: tag.into(),
                settle,
            },
        );
        self.queue(bucket).push(id);
        self.launch();
        TaskHandle { id, rx }
    }

    /// Changes a task's priority, moving it between buckets when the sign
    /// changes. A running low task promoted to high is counted as high.
    pub fn tune(&mut self, id: TaskId, priority: i32) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.priority = priority;
        let bucket = Bucket::for_priority(priority);
        if task.bucket == bucket {
            self.launch();
            return;
        }
        let from = task.bucket;
        task.bucket = bucket;
        if task.started {
            // Demotions keep their slot until they settle.
            if from == Bucket::Low && bucket == Bucket::High {
                self.running_low -= 1;
                self.running_high += 1;
            } else {
                task.bucket = from;
            }
        } else {
            self.queue(from).retain(|&queued| queued != id);
            self.queue(bucket).push(id);
        }
        self.launch();
    }

    /// Cancels a task. Unstarted tasks leave the queue; started tasks get
    /// their cancellation flag raised. Either way the handle settles with
    /// [`Settled::Unset`] right away and the task's slot is freed.
    pub fn abort(&mut self, id: TaskId) {
        let Some(task) = self.tasks.remove(&id) else {
            return;
        };
        if task.started {
            task.cancel.cancel();
            self.release(task.bucket);
        } else {
            self.queue(task.bucket).retain(|&queued| queued != id);
        }
        tracing::debug!(id, tag = %task.tag, started = task.started, "task aborted");
        let _ = task.settle.send(Settled::Unset);
        self.pump();
    }

    /// Applies completions that arrived since the last call and launches
    /// queued work. Returns the number of tasks settled.
    pub fn pump(&mut self) -> usize {
        let mut settled = 0;
        loop {
            let mut progressed = false;
            while let Ok((id, value)) = self.results_rx.try_recv() {
                // Aborted tasks are gone from the map; their late results drop here.
                let Some(task) = self.tasks.remove(&id) else {
                    continue;
                };
                if task.started {
                    self.release(task.bucket);
                }
                tracing::debug!(id, tag = %task.tag, "task settled");
                let _ = task.settle.send(Settled::Done(value));
                settled += 1;
                progressed = true;
            }
            self.launch();
            if !progressed && self.results_rx.is_empty() {
                return settled;
            }
        }
    }

    fn launch(&mut self) {
        sort_bucket(&mut self.high, &self.tasks);
        sort_bucket(&mut self.low, &self.tasks);

        while self.running() < self.concurrency && !self.high.is_empty() {
            let id = self.high.remove(0);
            self.running_high += 1;
            self.start(id);
        }
        while self.running() < self.concurrency
            && self.running_low < self.low_concurrency
            && !self.low.is_empty()
        {
            let id = self.low.remove(0);
            self.running_low += 1;
            self.start(id);
        }
    }

    fn start(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.started = true;
        let Some(start) = task.start.take() else {
            return;
        };
        tracing::debug!(id, tag = %task.tag, priority = task.priority, "task launched");
        let ctx = TaskContext {
            id,
            cancel: task.cancel.clone(),
            completer: Completer {
                id,
                tx: self.results_tx.clone(),
            },
        };
        start(ctx);
    }

    fn release(&mut self, bucket: Bucket) {
        match bucket {
            Bucket::High => self.running_high = self.running_high.saturating_sub(1),
            Bucket::Low => self.running_low = self.running_low.saturating_sub(1),
        }
    }

    fn queue(&mut self, bucket: Bucket) -> &mut Vec<TaskId> {
        match bucket {
            Bucket::High => &mut self.high,
            Bucket::Low => &mut self.low,
        }
    }

    /// Tasks currently running, across both buckets.
    pub fn running(&self) -> usize {
        self.running_high + self.running_low
    }

    pub fn running_high(&self) -> usize {
        self.running_high
    }

    pub fn running_low(&self) -> usize {
        self.running_low
    }

    /// Tasks waiting to launch.
    pub fn queued(&self) -> usize {
        self.high.len() + self.low.len()
    }

    /// Returns `true` while the task has neither settled nor been aborted.
    pub fn is_pending(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn is_started(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_some_and(|task| task.started)
    }

    pub fn priority(&self, id: TaskId) -> Option<i32> {
        self.tasks.get(&id).map(|task| task.priority)
    }

    /// Total tasks ever scheduled.
    pub fn scheduled_total(&self) -> u64 {
        self.next_id
    }
}

fn sort_bucket<T>(queue: &mut [TaskId], tasks: &FxHashMap<TaskId, Task<T>>) {
    let priority = |id: &TaskId| tasks.get(id).map_or(i32::MIN, |task| task.priority);
    queue.sort_by(|a, b| priority(b).cmp(&priority(a)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Held = Rc<RefCell<Vec<TaskContext<u32>>>>;

    fn scheduler(concurrency: usize, low_concurrency: usize) -> Scheduler<u32> {
        Scheduler::new(&SchedulerConfig {
            concurrency,
            low_concurrency,
        })
    }

    /// A start function that parks its context so the test can finish it later.
    fn hold(held: &Held) -> StartFn<u32> {
        let held = Rc::clone(held);
        Box::new(move |ctx| held.borrow_mut().push(ctx))
    }

    fn take(held: &Held, id: TaskId) -> TaskContext<u32> {
        let mut held = held.borrow_mut();
        let pos = held.iter().position(|ctx| ctx.id() == id).unwrap();
        held.remove(pos)
    }

    #[test]
    fn test_ceilings_with_mixed_buckets() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        for _ in 0..10 {
            s.schedule(hold(&held), 0, "low");
        }
        s.schedule(hold(&held), 2, "high");
        s.schedule(hold(&held), 1, "high");

        assert_eq!(s.running_high(), 2);
        assert_eq!(s.running_low(), 1);
        assert_eq!(s.queued(), 9);
    }

    #[test]
    fn test_high_bucket_launches_by_priority() {
        let mut s = scheduler(1, 1);
        let held = Held::default();
        let first = s.schedule(hold(&held), 1, "a");
        let low = s.schedule(hold(&held), 1, "b");
        let urgent = s.schedule(hold(&held), 5, "c");

        take(&held, first.id()).complete(1);
        s.pump();
        assert!(s.is_started(urgent.id()));
        assert!(!s.is_started(low.id()));
    }

    #[test]
    fn test_equal_priorities_launch_in_order() {
        let mut s = scheduler(1, 1);
        let held = Held::default();
        let a = s.schedule(hold(&held), 1, "a");
        let b = s.schedule(hold(&held), 1, "b");
        let c = s.schedule(hold(&held), 1, "c");

        take(&held, a.id()).complete(0);
        s.pump();
        assert!(s.is_started(b.id()));
        assert!(!s.is_started(c.id()));
    }

    #[test]
    fn test_completion_delivers_value() {
        let mut s = scheduler(4, 1);
        let handle = s.schedule(Box::new(|ctx| ctx.complete(7)), 3, "now");
        assert!(handle.try_settled().is_none());
        assert_eq!(s.pump(), 1);
        assert_eq!(handle.try_settled(), Some(Settled::Done(7)));
        assert_eq!(s.running(), 0);
    }

    #[test]
    fn test_completion_from_another_thread() {
        let mut s = scheduler(4, 1);
        let handle = s.schedule(
            Box::new(|ctx| {
                std::thread::spawn(move || ctx.complete(11));
            }),
            1,
            "thread",
        );
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while s.pump() == 0 && std::time::Instant::now() < deadline {
            std::thread::yield_now();
        }
        assert_eq!(handle.try_settled(), Some(Settled::Done(11)));
    }

    #[test]
    fn test_abort_unstarted_resolves_unset() {
        let mut s = scheduler(1, 1);
        let held = Held::default();
        s.schedule(hold(&held), 1, "busy");
        let queued = s.schedule(hold(&held), 1, "queued");

        s.abort(queued.id());
        assert_eq!(queued.try_settled(), Some(Settled::Unset));
        assert_eq!(s.queued(), 0);
        assert!(!s.is_pending(queued.id()));
    }

    #[test]
    fn test_abort_started_restores_counters() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        let handle = s.schedule(hold(&held), 0, "running");
        assert_eq!(s.running_low(), 1);

        let token = held.borrow()[0].cancel_token().clone();
        s.abort(handle.id());

        assert!(token.is_cancelled());
        assert_eq!(handle.try_settled(), Some(Settled::Unset));
        assert_eq!(s.running_low(), 0);
        assert_eq!(s.running(), 0);
    }

    #[test]
    fn test_abort_frees_slot_for_next_task() {
        let mut s = scheduler(1, 1);
        let held = Held::default();
        let running = s.schedule(hold(&held), 1, "a");
        let waiting = s.schedule(hold(&held), 1, "b");
        s.abort(running.id());
        assert!(s.is_started(waiting.id()));
    }

    #[test]
    fn test_late_result_after_abort_is_ignored() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        let handle = s.schedule(hold(&held), 1, "a");
        s.abort(handle.id());
        take(&held, handle.id()).complete(5);

        assert_eq!(s.pump(), 0);
        assert_eq!(handle.try_settled(), Some(Settled::Unset));
        assert!(handle.try_settled().is_none());
        assert_eq!(s.running(), 0);
    }

    #[test]
    fn test_double_abort_and_double_complete_are_noops() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        let handle = s.schedule(hold(&held), 1, "a");
        let ctx = take(&held, handle.id());
        let (_cancel, completer) = ctx.into_parts();
        completer.complete(1);
        s.pump();

        s.abort(handle.id());
        s.abort(handle.id());
        assert_eq!(handle.try_settled(), Some(Settled::Done(1)));
        assert!(handle.try_settled().is_none());
        assert_eq!(s.running(), 0);
    }

    #[test]
    fn test_tune_moves_queued_task_to_high_bucket() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        s.schedule(hold(&held), 0, "low-running");
        let queued = s.schedule(hold(&held), 0, "low-queued");
        assert!(!s.is_started(queued.id()));

        s.tune(queued.id(), 2);
        assert!(s.is_started(queued.id()));
        assert_eq!(s.running_high(), 1);
        assert_eq!(s.priority(queued.id()), Some(2));
    }

    #[test]
    fn test_tune_promotes_running_low_task() {
        let mut s = scheduler(4, 1);
        let held = Held::default();
        let first = s.schedule(hold(&held), 0, "a");
        let second = s.schedule(hold(&held), 0, "b");

        s.tune(first.id(), 3);
        assert_eq!(s.running_high(), 1);
        assert!(s.is_started(second.id()));
        assert_eq!(s.running_low(), 1);
    }

    #[test]
    fn test_low_bucket_starves_behind_high() {
        let mut s = scheduler(2, 1);
        let held = Held::default();
        s.schedule(hold(&held), 1, "h1");
        s.schedule(hold(&held), 1, "h2");
        let low = s.schedule(hold(&held), 0, "low");
        assert!(!s.is_started(low.id()));
    }
}
