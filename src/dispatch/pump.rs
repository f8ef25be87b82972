use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

/// Dedicated thread driving a readiness multiplexer.
///
/// The thread runs a current-thread runtime whose I/O driver is the
/// multiplexer: sockets registered through [`handle`](Pump::handle) are
/// polled here, and the watcher tasks spawned on it only read and enqueue.
/// The loop wakes at least every `wait` to observe shutdown.
pub struct Pump {
    name: String,
    handle: Handle,
    running: Arc<AtomicBool>,
    wake: Arc<Notify>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Pump {
    pub fn start(name: &str, wait: Duration) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let running = Arc::new(AtomicBool::new(true));
        let wake = Arc::new(Notify::new());

        let thread = thread::Builder::new()
            .name(format!("{name}-pump"))
            .spawn({
                let running = running.clone();
                let wake = wake.clone();
                let name = name.to_string();
                move || {
                    tracing::debug!(pump = %name, "pump started");
                    runtime.block_on(async {
                        while running.load(Ordering::Acquire) {
                            let _ = tokio::time::timeout(wait, wake.notified()).await;
                        }
                    });
                    drop(runtime);
                    tracing::debug!(pump = %name, "pump stopped");
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            handle,
            running,
            wake,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stops the loop and joins the thread, unless called from the pump
    /// thread itself.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake.notify_one();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::error!(pump = %self.name, "pump thread panicked");
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Registered interest in a socket. Dropping it cancels the watcher task.
#[derive(Debug)]
pub struct Watch(AbortHandle);

impl Watch {
    pub(crate) fn new(handle: AbortHandle) -> Self {
        Self(handle)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Multi-threaded runtime that services every connection's work queues.
pub struct Workers {
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Workers {
    pub fn start(name: &str, threads: usize) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name(format!("{name}-worker"))
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        // may run on one of this runtime's own threads
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn pump_runs_spawned_tasks_and_stops() {
        let pump = Pump::start("test", Duration::from_millis(20)).unwrap();
        let (tx, rx) = mpsc::channel();
        pump.handle().spawn(async move {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        });
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("test-pump"));

        pump.stop();
        assert!(!pump.is_running());
    }

    #[test]
    fn dropping_watch_aborts_task() {
        let pump = Pump::start("watch", Duration::from_millis(20)).unwrap();
        let watch = Watch::new(
            pump.handle()
                .spawn(std::future::pending::<()>())
                .abort_handle(),
        );
        assert!(!watch.is_finished());
        drop(watch);
    }
}
