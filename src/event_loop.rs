//! The single-threaded I/O loop every socket registers with.
//!
//! Modeled after the teacher's dedicated-thread-plus-executor pattern: one OS
//! thread drives an [`async_executor::LocalExecutor`] via
//! `futures_lite::future::block_on`, and cross-thread callers post boxed
//! futures onto it through an `async_channel`. Everything that touches a
//! stream resource — connect, handshake, read, write, close — runs as a task
//! spawned on that executor, so it is always the loop thread doing the I/O
//! even though `Connect`/`Disconnect`/`Send` may be called from anywhere.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use async_channel::Sender;

use crate::group::GroupTable;

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

enum Job {
    Spawn(BoxedTask),
    Shutdown,
}

struct Shared {
    tx: Sender<Job>,
    groups: GroupTable,
}

/// A handle to a running loop thread. Cheap to clone; clones share the same
/// underlying thread and work queue.
#[derive(Clone)]
pub struct EventLoop {
    shared: Arc<Shared>,
    thread: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded::<Job>();

        let handle = std::thread::Builder::new()
            .name("ferrolink-loop".into())
            .spawn(move || {
                let executor = async_executor::LocalExecutor::new();
                let pump = async {
                    while let Ok(job) = rx.recv().await {
                        match job {
                            Job::Spawn(task) => executor.spawn(task).detach(),
                            Job::Shutdown => break,
                        }
                    }
                };
                futures_lite::future::block_on(executor.run(pump));
            })
            .expect("failed to spawn event loop thread");

        EventLoop {
            shared: Arc::new(Shared {
                tx,
                groups: GroupTable::new(),
            }),
            thread: Arc::new(std::sync::Mutex::new(Some(handle))),
        }
    }

    /// Post work onto the loop. Safe to call from the loop thread itself
    /// (re-entrant: the task is queued and runs on the next pump iteration)
    /// or from any foreign thread.
    pub fn post<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let job = Job::Spawn(Box::pin(fut));
        if self.shared.tx.send_blocking(job).is_err() {
            tracing::warn!("posted work to a loop that has already shut down");
        }
    }

    pub fn groups(&self) -> &GroupTable {
        &self.shared.groups
    }

    /// The process-wide default loop, created lazily on first use.
    pub fn default_loop() -> EventLoop {
        static DEFAULT: OnceLock<EventLoop> = OnceLock::new();
        DEFAULT.get_or_init(EventLoop::new).clone()
    }

    /// Stop accepting new work and join the background thread. Any task
    /// already spawned on the executor runs to completion first, since the
    /// pump loop only exits after draining the `Shutdown` job from the queue.
    pub fn shutdown(&self) {
        let _ = self.shared.tx.send_blocking(Job::Shutdown);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn post_runs_on_loop_thread() {
        let loop_ = EventLoop::new();
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        loop_.post(async move {
            done2.store(true, Ordering::SeqCst);
        });
        // give the loop thread a moment to pump the job
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(done.load(Ordering::SeqCst));
        loop_.shutdown();
    }
}
