//! Scheduler: runs and cancels independently cadenced periodic jobs.
//!
//! Every registration gets its own tokio task. A job is invoked right
//! away and then once per cadence tick until the scheduler is shut down.
//! Cancellation is cooperative: it is observed between invocations, never
//! in the middle of one. Each invocation runs in a task of its own, so a
//! panicking job is logged and polled again on its next tick instead of
//! taking the loop (or its siblings) down.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;

/// How long a job waits between invocations.
#[derive(Debug, Clone)]
pub enum Cadence {
    Fixed(Duration),
    /// Ask the shared backoff controller before every wait.
    Adaptive(Arc<Backoff>),
}

impl Cadence {
    pub fn next_wait(&self) -> Duration {
        match self {
            Self::Fixed(d) => *d,
            Self::Adaptive(backoff) => backoff.sleep(),
        }
    }
}

impl From<Duration> for Cadence {
    fn from(d: Duration) -> Self {
        Self::Fixed(d)
    }
}

impl From<Arc<Backoff>> for Cadence {
    fn from(backoff: Arc<Backoff>) -> Self {
        Self::Adaptive(backoff)
    }
}

/// Returned by keyed jobs to say whether they want to run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Retire the key; the job is not invoked again.
    Finished,
}

/// Where finished frames end up. Only the dedup consumer writes to it.
pub trait DashboardSink: Send + 'static {
    fn show(&mut self, frame: &[u8]) -> std::io::Result<()>;
}

/// Render channel between producers and the dedup consumer.
///
/// Capacity 1: a producer waits until the consumer has taken the previous
/// frame.
pub fn render_channel() -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(1)
}

struct KeyedSlot {
    generation: u64,
    token: CancellationToken,
}

type KeyedSlots = Arc<Mutex<HashMap<String, KeyedSlot>>>;

/// Runs periodic jobs until [`Scheduler::shutdown`].
pub struct Scheduler {
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Active keyed jobs: key → slot.
    keyed: KeyedSlots,
    generation: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            keyed: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Invoke `job` now and then once per `cadence` until shutdown.
    pub fn register<F, Fut>(&self, name: &str, cadence: impl Into<Cadence>, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.to_string();
        let cadence = cadence.into();
        let cancel = self.cancel.clone();

        debug!(job = %name, "registering job");
        self.track(tokio::spawn(async move {
            run_periodic(&name, cadence, cancel, || {
                let fut = job();
                async move {
                    fut.await;
                    Flow::Continue
                }
            })
            .await;
        }));
    }

    /// Like [`register`](Self::register), bound to a fixed key.
    ///
    /// At most one job runs per key: returns `false` (and does nothing) if
    /// the key is already active. The key is retired when the job returns
    /// [`Flow::Finished`], on [`cancel_keyed`](Self::cancel_keyed), or on
    /// shutdown.
    pub fn register_keyed<K, F, Fut>(&self, cadence: impl Into<Cadence>, key: K, job: F) -> bool
    where
        K: Clone + Display + Send + Sync + 'static,
        F: Fn(K) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Flow> + Send + 'static,
    {
        let slot_key = key.to_string();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.cancel.child_token();
        {
            let mut keyed = self.keyed.lock().expect("keyed lock");
            if keyed.contains_key(&slot_key) {
                return false;
            }
            keyed.insert(
                slot_key.clone(),
                KeyedSlot {
                    generation,
                    token: token.clone(),
                },
            );
        }

        let cadence = cadence.into();
        let keyed = Arc::clone(&self.keyed);
        self.track(tokio::spawn(async move {
            run_periodic(&slot_key, cadence, token, || job(key.clone())).await;

            let mut keyed = keyed.lock().expect("keyed lock");
            if keyed.get(&slot_key).is_some_and(|s| s.generation == generation) {
                keyed.remove(&slot_key);
            }
        }));
        true
    }

    /// Stop the job registered under `key`. Returns whether one was active.
    pub fn cancel_keyed(&self, key: &str) -> bool {
        match self.keyed.lock().expect("keyed lock").remove(key) {
            Some(slot) => {
                slot.token.cancel();
                debug!(%key, "keyed job cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_keyed_active(&self, key: &str) -> bool {
        self.keyed.lock().expect("keyed lock").contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<String> {
        self.keyed.lock().expect("keyed lock").keys().cloned().collect()
    }

    /// Number of keyed jobs still running.
    pub fn active_count(&self) -> usize {
        self.keyed.lock().expect("keyed lock").len()
    }

    /// Forward frames from `frames` to `sink`, skipping any frame identical
    /// to the last one the sink accepted. The first frame always goes through,
    /// and a frame the sink rejected is offered again when it next arrives.
    pub fn register_dedup_consumer<S>(&self, mut frames: mpsc::Receiver<Vec<u8>>, mut sink: S)
    where
        S: DashboardSink,
    {
        let cancel = self.cancel.clone();
        self.track(tokio::spawn(async move {
            let mut last: Option<Vec<u8>> = None;
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = frames.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                if last.as_deref() == Some(frame.as_slice()) {
                    continue;
                }
                match sink.show(&frame) {
                    Ok(()) => last = Some(frame),
                    Err(e) => warn!(error = %e, "dashboard update failed"),
                }
            }
            debug!("dedup consumer stopped");
        }));
    }

    /// Wait for `signal`, then shut down and run `cleanup` once.
    ///
    /// If the scheduler is shut down first, the watcher exits without
    /// running `cleanup`.
    pub fn on_signal<Sig, C>(&self, signal: Sig, cleanup: C)
    where
        Sig: Future + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.track(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = signal => {
                    info!("received quit signal");
                    cancel.cancel();
                    cleanup();
                }
            }
        }));
    }

    /// Signal every job to stop. Does not wait; safe to call repeatedly.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("scheduler shutting down");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Wait for every task registered so far to finish.
    pub async fn wait(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("tasks lock"));
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_periodic<F, Fut>(name: &str, cadence: Cadence, cancel: CancellationToken, invoke: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = Flow> + Send + 'static,
{
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let flow = match tokio::spawn(invoke()).await {
            Ok(flow) => flow,
            Err(e) if e.is_panic() => {
                error!(job = %name, "job panicked; continuing on next tick");
                Flow::Continue
            }
            Err(_) => break,
        };
        if flow == Flow::Finished {
            debug!(job = %name, "job finished");
            break;
        }

        let wait = cadence.next_wait();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!(job = %name, "job stopped");
}
