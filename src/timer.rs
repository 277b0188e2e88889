//! Background deadline timer backing [`Promise::delay`](crate::Promise::delay)
//! and [`Promise::timeout`](crate::Promise::timeout).
//!
//! One thread sleeps until the earliest registered deadline instead of
//! polling; new registrations wake it so it can re-check which one comes
//! first.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    fmt::{self, Debug, Formatter},
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace};

use crate::context::Work;

struct Scheduled {
    deadline: Instant,
    seq: u64,
    work: Work,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Equal deadlines fire in registration order.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.seq).cmp(&(other.deadline, other.seq))
    }
}

#[derive(Default)]
struct TimerState {
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

/// Handle to a timer thread.
///
/// Dropping the handle lets the thread exit once everything already
/// scheduled has fired.
pub struct Timer {
    name: String,
    shared: Arc<Shared>,
}

impl Debug for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

static GLOBAL: OnceLock<Timer> = OnceLock::new();

impl Timer {
    pub fn spawn(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let shared = Arc::new(Shared::default());
        let worker = Arc::clone(&shared);
        let thread_name = name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&thread_name, &worker))?;
        Ok(Self { name, shared })
    }

    /// The process-wide timer, started on first use.
    ///
    /// # Panics
    ///
    /// Iff the timer thread can't be spawned, like [`std::thread::spawn`].
    pub fn global() -> &'static Timer {
        GLOBAL.get_or_init(|| {
            Timer::spawn("promise-kit-timer")
                .unwrap_or_else(|error| panic!("failed to spawn the timer thread: {error}"))
        })
    }

    /// Runs `work` on the timer thread once `delay` has elapsed.
    ///
    /// Work should be short; it holds up every later deadline. A `delay` too
    /// large to represent as an [`Instant`] never fires, and `work` is
    /// dropped right away.
    pub fn schedule(&self, delay: Duration, work: impl FnOnce() + Send + 'static) {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            trace!(timer = %self.name, ?delay, "deadline out of range, never firing");
            return;
        };
        let mut state = self.shared.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Reverse(Scheduled {
            deadline,
            seq,
            work: Box::new(work),
        }));
        drop(state);
        trace!(timer = %self.name, ?delay, "scheduled");
        self.shared.wakeup.notify_one();
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_one();
    }
}

fn run(name: &str, shared: &Shared) {
    debug!(timer = %name, "timer thread started");
    let mut state = shared.state.lock();
    loop {
        let next = state.queue.peek().map(|Reverse(scheduled)| scheduled.deadline);
        match next {
            Some(deadline) if deadline <= Instant::now() => {
                if let Some(Reverse(due)) = state.queue.pop() {
                    let work = AssertUnwindSafe(due.work);
                    let outcome = MutexGuard::unlocked(&mut state, || panic::catch_unwind(work));
                    if outcome.is_err() {
                        error!(timer = %name, "timer work panicked");
                    }
                }
            }
            Some(deadline) => {
                shared.wakeup.wait_until(&mut state, deadline);
            }
            None if state.shutdown => break,
            None => shared.wakeup.wait(&mut state),
        }
    }
    debug!(timer = %name, "timer thread stopped");
}
