//! Bounded-parallelism task scheduler with a serialized result callback.
//!
//! Every submitted task runs on its own thread, so the number of threads
//! grows with the number of submissions, not with the limiter's capacity;
//! the limiter only bounds how many of them run their body at once. Results
//! are handed, one at a time, to a single processor closure together with
//! the index the task was given at submission. The processor owns some state `S`; callers read or
//! mutate that state only through [`Executor::wait_done_and_lock`].
//!
//! ```text
//! go(task) ──► index = next_index++ ──► thread:
//!     permit = limiter.acquire()
//!     if stopped { skip }
//!     result = catch_unwind(task)
//!     drop(permit)
//!     lock shared ──► processor(&mut state, result, index) ──► Proceed | Stop
//! ```

use std::any::Any;
use std::ops::{Deref, DerefMut};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::limiter::Limiter;

/// What the processor wants the executor to do after handling a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Proceed,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Running = 0,
    /// A stop was requested; tasks may still be in flight.
    Stopping = 1,
    /// A stop was requested and observed by [`Executor::wait_done_and_lock`].
    Stopped = 2,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::Running,
            1 => Status::Stopping,
            _ => Status::Stopped,
        }
    }
}

type Processor<T, S> = Box<dyn FnMut(&mut S, T, usize) -> Command + Send>;

struct Shared<T, S> {
    state: S,
    processor: Processor<T, S>,
}

struct Inner<T, S> {
    name: String,
    limiter: Option<Arc<Limiter>>,
    next_index: AtomicUsize,
    status: AtomicU8,
    in_flight: Mutex<usize>,
    drained: Condvar,
    shared: Mutex<Shared<T, S>>,
}

impl<T, S> Inner<T, S> {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_stopped(&self) -> bool {
        self.status() != Status::Running
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    fn task_finished(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Decrements the in-flight counter however the task exits.
struct InFlight<T, S>(Arc<Inner<T, S>>);

impl<T, S> Drop for InFlight<T, S> {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

pub struct Executor<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Executor<T, S>
where
    T: Send + 'static,
    S: Send + 'static,
{
    /// Create an executor whose processor owns `state`.
    ///
    /// `name` prefixes worker thread names and log events.
    pub fn new<F>(name: impl Into<String>, limiter: Option<Arc<Limiter>>, state: S, processor: F) -> Self
    where
        F: FnMut(&mut S, T, usize) -> Command + Send + 'static,
    {
        Executor {
            inner: Arc::new(Inner {
                name: name.into(),
                limiter,
                next_index: AtomicUsize::new(0),
                status: AtomicU8::new(Status::Running as u8),
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                shared: Mutex::new(Shared {
                    state,
                    processor: Box::new(processor),
                }),
            }),
        }
    }

    /// Schedule one task and return its submission index.
    pub fn go<F>(&self, task: F) -> usize
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let index = self.inner.next_index.fetch_add(1, Ordering::SeqCst);
        *self.inner.in_flight.lock() += 1;

        let inner = Arc::clone(&self.inner);
        let thread_name = format!("{}-{}", self.inner.name, index);
        tracing::trace!(executor = %self.inner.name, index, "executor.go");
        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_task(inner, task, index));

        if let Err(error) = spawned {
            // The closure never ran, so nothing else will release its slot.
            tracing::error!(executor = %self.inner.name, index, %error, "failed to spawn task thread");
            self.inner.task_finished();
        }
        index
    }

    /// Schedule each task in order; indices are consecutive.
    pub fn map<I, F>(&self, tasks: I) -> Vec<usize>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> T + Send + 'static,
    {
        tasks.into_iter().map(|task| self.go(task)).collect()
    }

    /// Schedule `f` once per item of a shared slice, passing the item by reference.
    pub fn map_ref<I, F>(&self, items: Arc<[I]>, f: F) -> Vec<usize>
    where
        I: Send + Sync + 'static,
        F: Fn(&I) -> T + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        (0..items.len())
            .map(|i| {
                let items = Arc::clone(&items);
                let f = Arc::clone(&f);
                self.go(move || f(&items[i]))
            })
            .collect()
    }

    /// Block until no task is in flight, then take the processor lock.
    ///
    /// While the returned guard lives no processor call can run, so the
    /// state may be read or changed freely.
    pub fn wait_done_and_lock(&self) -> ExecutorGuard<'_, T, S> {
        {
            let mut in_flight = self.inner.in_flight.lock();
            while *in_flight > 0 {
                self.inner.drained.wait(&mut in_flight);
            }
        }
        let shared = self.inner.shared.lock();
        if self.inner.status() == Status::Stopping {
            self.inner.set_status(Status::Stopped);
        }
        ExecutorGuard {
            inner: &self.inner,
            shared,
        }
    }

    pub fn status(&self) -> Status {
        self.inner.status()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }
}

fn run_task<T, S, F>(inner: Arc<Inner<T, S>>, task: F, index: usize)
where
    F: FnOnce() -> T,
{
    let _in_flight = InFlight(Arc::clone(&inner));
    let permit = inner.limiter.as_deref().map(Limiter::acquire);

    if inner.is_stopped() {
        tracing::trace!(executor = %inner.name, index, "executor.skip");
        return;
    }

    let result = match catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => {
            tracing::error!(
                executor = %inner.name,
                index,
                panic = %panic_message(payload.as_ref()),
                "task panicked"
            );
            return;
        }
    };
    drop(permit);

    let mut shared = inner.shared.lock();
    // A stop may have landed while this task was running.
    if inner.is_stopped() {
        tracing::trace!(executor = %inner.name, index, "executor.discard");
        return;
    }
    let Shared { state, processor } = &mut *shared;
    match catch_unwind(AssertUnwindSafe(|| processor(state, result, index))) {
        Ok(Command::Proceed) => {}
        Ok(Command::Stop) => {
            tracing::debug!(executor = %inner.name, index, "executor.stop");
            inner.set_status(Status::Stopping);
        }
        Err(payload) => {
            tracing::error!(
                executor = %inner.name,
                index,
                panic = %panic_message(payload.as_ref()),
                "processor panicked; stopping"
            );
            inner.set_status(Status::Stopping);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<unknown panic>".to_string()
    }
}

/// Exclusive access to the processor state, returned by
/// [`Executor::wait_done_and_lock`]. Dropping it is [`ExecutorGuard::unlock`].
pub struct ExecutorGuard<'a, T, S> {
    inner: &'a Arc<Inner<T, S>>,
    shared: MutexGuard<'a, Shared<T, S>>,
}

impl<T, S> ExecutorGuard<'_, T, S> {
    /// Whether a stop was requested before the lock was taken.
    pub fn stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Release the lock; the executor stays stopped if it was.
    pub fn unlock(self) {}

    /// Release the lock and clear the stopped state so new tasks run again.
    pub fn unlock_resume(self) {
        self.inner.set_status(Status::Running);
    }
}

impl<T, S> Deref for ExecutorGuard<'_, T, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.shared.state
    }
}

impl<T, S> DerefMut for ExecutorGuard<'_, T, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.shared.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_static_str_payload() {
        let payload = catch_unwind(|| panic!("boom-str")).expect_err("should panic");
        assert_eq!(panic_message(payload.as_ref()), "boom-str");
    }

    #[test]
    fn extracts_string_payload() {
        let payload = catch_unwind(|| panic!("{}", String::from("boom-string"))).expect_err("should panic");
        assert_eq!(panic_message(payload.as_ref()), "boom-string");
    }

    #[test]
    fn stop_moves_through_stopping_to_stopped() {
        let executor = Executor::new("status", None, (), |_: &mut (), _: (), _| Command::Stop);
        executor.go(|| ());
        let guard = executor.wait_done_and_lock();
        assert!(guard.stopped());
        guard.unlock();
        assert_eq!(executor.status(), Status::Stopped);
        executor.wait_done_and_lock().unlock_resume();
        assert_eq!(executor.status(), Status::Running);
    }
}
