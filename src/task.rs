//! Background tasks with progress reporting and cancellation.
//!
//! Long computations (grid evaluation, surface generation) run on a worker
//! thread through [`spawn`]. The caller keeps a [`TaskHandle`] that receives
//! progress over a channel and can send a cancel message back. Work
//! functions poll [`TaskContext::is_cancelled`] at coarse intervals, such as
//! once per grid slice, and return [`Error::Cancelled`] to stop early.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crate::error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn completed_task_reports_progress() {
        let handle = spawn(10, |ctx| {
            for _ in 0..10 {
                ctx.advance(1);
            }
            Ok(42)
        });
        let mut seen = Vec::new();
        let outcome = handle.wait_with(|p| seen.push(p.done)).unwrap();
        assert_eq!(outcome, Outcome::Completed(42));
        assert_eq!(seen.last(), Some(&10));
    }

    #[test]
    fn cancel_message_stops_work() {
        let handle = spawn(usize::MAX, |ctx| -> Result<usize> {
            while !ctx.is_cancelled() {
                ctx.advance(1);
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(Error::Cancelled)
        });
        std::thread::sleep(Duration::from_millis(20));
        handle.cancel();
        assert_eq!(handle.wait().unwrap(), Outcome::Cancelled);
    }

    #[test]
    fn errors_are_propagated() {
        let handle = spawn(1, |_| -> Result<()> { Err(Error::Decimation("boom".into())) });
        assert!(matches!(handle.wait(), Err(Error::Decimation(_))));
    }

    #[test]
    fn detached_context_is_never_cancelled() {
        let ctx = TaskContext::detached(5);
        ctx.advance(3);
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.done(), 3);
    }
}

/// Snapshot of a task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Messages sent from the handle to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Cancel,
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }
}

/// Worker-side view of a task, shared by reference across worker threads.
#[derive(Debug)]
pub struct TaskContext {
    total: AtomicUsize,
    done: AtomicUsize,
    progress: Option<Sender<Progress>>,
    control: Mutex<Option<Receiver<Control>>>,
    cancelled: AtomicBool,
}

impl TaskContext {
    /// Context with nobody listening, for running work synchronously.
    pub fn detached(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            done: AtomicUsize::new(0),
            progress: None,
            control: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    fn attached(total: usize, progress: Sender<Progress>, control: Receiver<Control>) -> Self {
        Self {
            total: AtomicUsize::new(total),
            done: AtomicUsize::new(0),
            progress: Some(progress),
            control: Mutex::new(Some(control)),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Replaces the expected amount of work, e.g. once the worker knows it.
    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.send();
    }

    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    /// Records `n` more units of finished work.
    pub fn advance(&self, n: usize) {
        self.done.fetch_add(n, Ordering::Relaxed);
        self.send();
    }

    fn send(&self) {
        if let Some(sender) = &self.progress {
            // the handle may already be gone
            let _ = sender.send(Progress {
                done: self.done(),
                total: self.total(),
            });
        }
    }

    /// Checks for a cancel message. Once seen, cancellation is permanent.
    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        // another worker holding the lock is already draining the channel
        let Ok(guard) = self.control.try_lock() else {
            return false;
        };
        if let Some(control) = guard.as_ref() {
            loop {
                match control.try_recv() {
                    Ok(Control::Cancel) => {
                        self.cancelled.store(true, Ordering::Relaxed);
                        break;
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
        }
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Cancels from the worker side.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// Returns `Err(Error::Cancelled)` if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Caller-side handle of a running task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    thread: JoinHandle<Result<T>>,
    progress: Receiver<Progress>,
    control: Sender<Control>,
    latest: Progress,
}

impl<T> TaskHandle<T> {
    /// Asks the worker to stop at its next cancellation check.
    pub fn cancel(&self) {
        let _ = self.control.send(Control::Cancel);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Latest progress, without blocking.
    pub fn progress(&mut self) -> Progress {
        if let Some(p) = self.progress.try_iter().last() {
            self.latest = p;
        }
        self.latest
    }

    /// Blocks until the worker finishes.
    pub fn wait(self) -> Result<Outcome<T>> {
        self.wait_with(|_| {})
    }

    /// Blocks until the worker finishes, passing each progress update to `f`.
    pub fn wait_with<F: FnMut(Progress)>(self, mut f: F) -> Result<Outcome<T>> {
        // the channel closes when the worker drops its context
        for p in self.progress.iter() {
            f(p);
        }
        let result = self
            .thread
            .join()
            .map_err(|_| Error::Task("worker thread panicked".to_string()))?;
        match result {
            Ok(value) => Ok(Outcome::Completed(value)),
            Err(Error::Cancelled) => Ok(Outcome::Cancelled),
            Err(e) => Err(e),
        }
    }
}

/// Runs `work` on a new thread.
pub fn spawn<T, F>(total: usize, work: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce(&TaskContext) -> Result<T> + Send + 'static,
{
    let (progress_tx, progress_rx) = mpsc::channel();
    let (control_tx, control_rx) = mpsc::channel();
    let thread = thread::spawn(move || {
        let ctx = TaskContext::attached(total, progress_tx, control_rx);
        work(&ctx)
    });
    TaskHandle {
        thread,
        progress: progress_rx,
        control: control_tx,
        latest: Progress { done: 0, total },
    }
}
