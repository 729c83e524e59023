// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - MANAGED BACKGROUND TASKS
//
// Background work (connection listener, transaction pattern executor,
// transaction sender worker) runs on named OS threads. Each task owns a
// CancellationToken; cancelling it also disconnects a channel so blocking
// waits can select on it. Completion is a channel that disconnects when the
// thread exits, so owners can wait without consuming the task.
// Panics and errors are caught at the thread boundary and logged.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::NodeError;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Recover from poisoned mutex instead of panicking
pub(crate) fn safe_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cancellation shared between a task and its owner.
///
/// Nothing is ever sent on the `cancelled` channel; it disconnects when
/// the signal is cancelled.
#[derive(Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    cancelled: Receiver<()>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (trigger, cancelled) = channel::bounded(0);
        Self {
            token: CancellationToken::new(),
            trigger: Arc::new(Mutex::new(Some(trigger))),
            cancelled,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
        safe_lock(&self.trigger).take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ready (disconnected) once cancelled; for use in `select!`.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.cancelled
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns `false` if the signal was cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        !self.is_cancelled()
            && matches!(
                self.cancelled.recv_timeout(duration),
                Err(RecvTimeoutError::Timeout)
            )
    }
}

/// Handle for waiting on a task's completion without owning it.
#[derive(Clone)]
pub struct TaskWaiter {
    done: Receiver<()>,
}

impl TaskWaiter {
    /// Returns whether the task finished within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    pub fn wait(&self) {
        let _ = self.done.recv();
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Ready (disconnected) once the task has exited; for use in `select!`.
    pub fn finished(&self) -> &Receiver<()> {
        &self.done
    }
}

/// A named background thread with cooperative cancellation.
pub struct ManagedTask {
    name: String,
    signal: CancelSignal,
    waiter: TaskWaiter,
    handle: Option<JoinHandle<()>>,
}

impl ManagedTask {
    /// Spawn `work` on its own thread. An `Err` result or a panic inside
    /// `work` is logged here and never reaches the owner.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> Result<Self, NodeError>
    where
        F: FnOnce(CancelSignal) -> Result<(), NodeError> + Send + 'static,
    {
        let name = name.into();
        let signal = CancelSignal::new();
        let (finished, done) = channel::bounded::<()>(0);

        let thread_signal = signal.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                match panic::catch_unwind(AssertUnwindSafe(|| work(thread_signal))) {
                    Ok(Ok(())) => debug!("Task {} finished", thread_name),
                    Ok(Err(e)) => error!("💥 Task {} failed: {}", thread_name, e),
                    Err(payload) => error!(
                        "💥 Uncaught panic in task {}: {}",
                        thread_name,
                        panic_message(payload.as_ref())
                    ),
                }
                drop(finished);
            })
            .map_err(|e| NodeError::Io("spawn task thread", e))?;

        Ok(Self {
            name,
            signal,
            waiter: TaskWaiter { done },
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.waiter.is_finished()
    }

    /// Signal cancellation; does not wait for the thread.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    pub fn waiter(&self) -> TaskWaiter {
        self.waiter.clone()
    }

    /// Block until the thread has exited.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            // Panics were already caught and logged inside the thread.
            let _ = handle.join();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_sleep_completes_without_cancel() {
        let signal = CancelSignal::new();
        assert!(signal.sleep(Duration::from_millis(5)));
        assert!(signal.sleep(Duration::ZERO));
    }

    #[test]
    fn test_sleep_wakes_on_cancel() {
        let signal = CancelSignal::new();
        let remote = signal.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });
        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(signal.token().is_cancelled());
        canceller.join().unwrap();
    }

    #[test]
    fn test_cancelled_channel_disconnects() {
        let signal = CancelSignal::new();
        assert!(matches!(
            signal.cancelled().try_recv(),
            Err(TryRecvError::Empty)
        ));
        signal.cancel();
        signal.cancel();
        assert!(matches!(
            signal.cancelled().try_recv(),
            Err(TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_task_alive_until_work_returns() {
        let gate = CancelSignal::new();
        let release = gate.clone();
        let task = ManagedTask::spawn("test-gate", move |_| {
            let _ = gate.cancelled().recv();
            Ok(())
        })
        .unwrap();

        assert!(task.is_alive());
        release.cancel();
        assert!(task.waiter().wait_timeout(Duration::from_secs(5)));
        assert!(!task.is_alive());
        task.join();
    }

    #[test]
    fn test_cancel_stops_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&iterations);
        let task = ManagedTask::spawn("test-loop", move |signal| {
            while signal.sleep(Duration::from_millis(1)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        })
        .unwrap();

        task.cancel();
        assert!(task.is_cancelled());
        assert!(task.waiter().wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_panic_is_contained() {
        let task = ManagedTask::spawn("test-panic", |_| {
            panic!("pattern blew up");
        })
        .unwrap();
        assert!(task.waiter().wait_timeout(Duration::from_secs(5)));
        assert!(!task.is_alive());
        task.join();
    }

    #[test]
    fn test_error_is_contained() {
        let task = ManagedTask::spawn("test-error", |_| {
            Err(NodeError::Transport("peer gone".to_string()))
        })
        .unwrap();
        task.waiter().wait();
        assert!(!task.is_alive());
        assert!(task.waiter().is_finished());
    }
}
