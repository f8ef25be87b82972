use std::future::Future;
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Target of a [`WorkQueue`].
///
/// Implemented by connections once per queue item type.
pub trait Worker<T: Send + 'static>: Send + Sync + 'static {
    /// Current serial number. Work stamped with an older one is purged.
    fn serial(&self) -> u64;

    fn work(self: Arc<Self>, item: T) -> impl Future<Output = ()> + Send;

    /// Disposes of an item that will not run.
    fn purge(&self, item: T);

    /// A work item panicked.
    fn panicked(&self, queue: &'static str);
}

struct Work<T> {
    serial: u64,
    item: T,
}

/// Strictly ordered, single-consumer queue on the worker pool.
///
/// Items run one at a time in FIFO order; each runs as its own task so a
/// panic is contained and reported to [`Worker::panicked`] instead of ending
/// the queue. The queue holds only a weak reference to its worker, upgraded
/// per item.
pub struct WorkQueue<T> {
    name: &'static str,
    tx: mpsc::UnboundedSender<Work<T>>,
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn start<W: Worker<T>>(handle: &Handle, name: &'static str, target: Weak<W>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Work<T>>();
        let runner = handle.clone();

        handle.spawn(async move {
            while let Some(Work { serial, item }) = rx.recv().await {
                let Some(target) = target.upgrade() else {
                    break;
                };
                if serial != target.serial() {
                    tracing::trace!(queue = name, serial, "purging stale work");
                    target.purge(item);
                    continue;
                }
                let job = runner.spawn(Arc::clone(&target).work(item));
                if let Err(e) = job.await {
                    if e.is_panic() {
                        tracing::error!(queue = name, "work item panicked");
                        target.panicked(name);
                    }
                }
            }
            tracing::trace!(queue = name, "queue drained");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends an item stamped with `serial`.
    pub fn enqueue(&self, serial: u64, item: T) -> Result<()> {
        self.tx
            .send(Work { serial, item })
            .map_err(|_| Error::NotReady)
    }
}
