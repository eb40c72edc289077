//! Owned background thread with cooperative cancellation and bounded join

use crate::error::Result;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Signals completion when dropped, including during a panic unwind
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

/// A named thread that runs while its `running` flag is set.
///
/// The body must poll the flag at every loop iteration and sleep boundary.
pub struct Worker {
    name: String,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    done_rx: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = bounded(1);

        let flag = Arc::clone(&running);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = DoneGuard(done_tx);
                log::debug!("{} worker started", thread_name);
                body(flag);
                log::debug!("{} worker exited", thread_name);
            })?;

        Ok(Self {
            name: name.to_string(),
            running,
            handle: Some(handle),
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flag shared with the thread body
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// True until stop is requested
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once the thread body has returned or panicked
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request stop and wait up to `timeout` for the thread to exit.
    ///
    /// Returns false if the thread did not exit in time; it is then detached.
    /// Calling this more than once is harmless.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.running.store(false, Ordering::Release);

        let Some(handle) = self.handle.take() else {
            return true;
        };

        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("{} worker panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "{} worker did not exit within {:?}, detaching",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop(DEFAULT_JOIN_TIMEOUT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let mut worker = Worker::spawn("ticker", move |running| {
            while running.load(Ordering::Acquire) {
                counter.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(worker.is_running());
        assert!(worker.stop(Duration::from_secs(1)));
        assert!(worker.is_finished());
        assert!(ticks.load(Ordering::Relaxed) > 0);

        assert!(worker.stop(Duration::from_millis(1)));
    }

    #[test]
    fn test_join_timeout_detaches() {
        let mut worker = Worker::spawn("stuck", |_running| {
            thread::sleep(Duration::from_millis(300));
        })
        .unwrap();

        let start = Instant::now();
        assert!(!worker.stop(Duration::from_millis(20)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_panicking_body_is_reported_not_propagated() {
        let mut worker = Worker::spawn("panics", |_running| panic!("boom")).unwrap();
        assert!(worker.stop(Duration::from_secs(1)));
    }
}
