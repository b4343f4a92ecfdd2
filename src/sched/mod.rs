//! Cooperative deadline scheduler.
//!
//! Every future action in the engine (arming a recorder, stopping a
//! capture window, starting the next playback segment) is a task with an
//! absolute deadline on this queue. The schedule is explicit and
//! inspectable: tests pump it with [`Scheduler::run_due`] under a virtual
//! clock, production drives it with a timer thread via
//! [`Scheduler::spawn_driver`].
//!
//! Tasks receive the clock time at which the pump ran, which may be
//! slightly past their deadline; all callers compensate with an explicit
//! scheduling lead.

use crate::clock::AudioClock;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle for cancelling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

type Task = Box<dyn FnOnce(f64) + Send + 'static>;

struct Entry {
    at: f64,
    seq: u64,
    id: TaskId,
    task: Task,
}

/// Deadline-ordered task queue.
pub struct Scheduler {
    queue: Mutex<Vec<Entry>>,
    wakeup: Condvar,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            wakeup: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Schedule `task` to run once the clock reaches `at` seconds.
    ///
    /// Deadlines already in the past run on the next pump.
    pub fn schedule_at<F>(&self, at: f64, task: F) -> TaskId
    where
        F: FnOnce(f64) + Send + 'static,
    {
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = TaskId(seq);
        {
            let mut queue = self.queue.lock();
            queue.push(Entry {
                at,
                seq,
                id,
                task: Box::new(task),
            });
        }
        self.wakeup.notify_one();
        id
    }

    /// Cancel a pending task. Returns true if it had not yet fired.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|entry| entry.id != id);
        queue.len() != before
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<f64> {
        let queue = self.queue.lock();
        queue
            .iter()
            .map(|entry| entry.at)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Number of pending tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run every task whose deadline is at or before `now`.
    ///
    /// Tasks run outside the queue lock, so they are free to schedule
    /// follow-up tasks (the self-rescheduling chains both the recorder and
    /// the playback engine are built from). Returns the number of tasks run.
    pub fn run_due(&self, now: f64) -> usize {
        let mut ran = 0;
        loop {
            let entry = {
                let mut queue = self.queue.lock();
                let due = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.at <= now)
                    .min_by(|(_, a), (_, b)| a.at.total_cmp(&b.at).then(a.seq.cmp(&b.seq)))
                    .map(|(i, _)| i);
                match due {
                    Some(i) => queue.swap_remove(i),
                    None => break,
                }
            };
            (entry.task)(now);
            ran += 1;
        }
        ran
    }

    /// Spawn a thread that pumps the queue against `clock` until the
    /// returned driver is shut down or dropped.
    pub fn spawn_driver(self: Arc<Self>, clock: Arc<dyn AudioClock>) -> SchedulerDriver {
        let scheduler = Arc::clone(&self);
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("ostinato-sched".into())
            .spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    scheduler.run_due(clock.now());

                    let mut queue = scheduler.queue.lock();
                    let wait = queue
                        .iter()
                        .map(|e| e.at)
                        .min_by(f64::total_cmp)
                        .map(|at| (at - clock.now()).clamp(0.0005, 0.05))
                        .unwrap_or(0.05);
                    scheduler
                        .wakeup
                        .wait_for(&mut queue, Duration::from_secs_f64(wait));
                }
            })
            .expect("failed to spawn scheduler driver thread");

        SchedulerDriver {
            scheduler: self,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the timer thread driving a [`Scheduler`].
pub struct SchedulerDriver {
    scheduler: Arc<Scheduler>,
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SchedulerDriver {
    /// Stop the driver thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.wakeup.notify_one();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_runs_in_deadline_order() {
        let sched = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (label, at) in [("c", 3.0), ("a", 1.0), ("b", 2.0)] {
            let order = Arc::clone(&order);
            sched.schedule_at(at, move |_| order.lock().push(label));
        }

        assert_eq!(sched.run_due(0.5), 0);
        assert_eq!(sched.run_due(3.0), 3);
        assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tasks_can_reschedule() {
        let sched = Arc::new(Scheduler::new());
        let count = Arc::new(AtomicUsize::new(0));

        fn chain(sched: &Arc<Scheduler>, count: &Arc<AtomicUsize>, at: f64, left: usize) {
            if left == 0 {
                return;
            }
            let sched2 = Arc::clone(sched);
            let count2 = Arc::clone(count);
            sched.schedule_at(at, move |_| {
                count2.fetch_add(1, Ordering::Relaxed);
                chain(&sched2, &count2, at + 1.0, left - 1);
            });
        }

        chain(&sched, &count, 1.0, 3);

        // Each pump fires exactly the due links, including ones scheduled
        // by a task that ran earlier in the same pump.
        assert_eq!(sched.run_due(1.0), 1);
        assert_eq!(sched.run_due(3.5), 2);
        assert_eq!(count.load(Ordering::Relaxed), 3);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_cancel() {
        let sched = Scheduler::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);

        let id = sched.schedule_at(1.0, move |_| fired2.store(true, Ordering::Relaxed));
        assert!(sched.cancel(id));
        assert!(!sched.cancel(id));
        assert_eq!(sched.run_due(2.0), 0);
        assert!(!fired.load(Ordering::Relaxed));
    }

    #[test]
    fn test_next_deadline() {
        let sched = Scheduler::new();
        assert_eq!(sched.next_deadline(), None);
        sched.schedule_at(5.0, |_| {});
        sched.schedule_at(2.0, |_| {});
        assert_eq!(sched.next_deadline(), Some(2.0));
    }

    #[test]
    fn test_driver_fires_tasks() {
        use crate::clock::SystemClock;

        let sched = Arc::new(Scheduler::new());
        let clock: Arc<dyn AudioClock> = Arc::new(SystemClock::new());
        let driver = Arc::clone(&sched).spawn_driver(Arc::clone(&clock));

        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        sched.schedule_at(clock.now() + 0.01, move |_| {
            fired2.store(true, Ordering::Release)
        });

        std::thread::sleep(Duration::from_millis(100));
        driver.shutdown();
        assert!(fired.load(Ordering::Acquire));
    }
}
