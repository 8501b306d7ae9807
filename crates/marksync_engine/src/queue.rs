//! The sync queue: debounced, deduplicated, bounded-concurrency retry
//! processing of change notifications.
//!
//! Per-item state machine: `pending → processing → {completed |
//! pending(retry, delayed) | failed}`. All map mutations happen under
//! short-lived locks that are never held across await points; the
//! concurrency bound comes from a semaphore, not from threads.

use crate::config::QueueConfig;
use crate::dispatcher::{SyncAction, SyncDispatcher, SyncItemResult};
use crate::events::{QueueEvent, QueueObserver};
use crate::remote::RemoteClient;
use chrono::{DateTime, Utc};
use marksync_core::DocumentStore;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

/// A raw change notification for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The changed document's path.
    pub path: String,
    /// What kind of change was observed.
    pub kind: ChangeKind,
}

/// The kind of a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The document appeared.
    Created,
    /// The document's content changed.
    Modified,
    /// The document disappeared.
    Removed,
}

/// One queued unit of work, keyed by document path.
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// Document path; the dedup key.
    pub id: String,
    /// The last-seen change event for this path.
    pub change: ChangeEvent,
    /// Retries already spent.
    pub retries: u32,
    /// The most recent failure, if any.
    pub last_error: Option<String>,
    /// When the item entered the queue.
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    fn new(change: ChangeEvent) -> Self {
        Self {
            id: change.path.clone(),
            change,
            retries: 0,
            last_error: None,
            added_at: Utc::now(),
        }
    }
}

/// Point-in-time queue counters, recomputed on demand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueStats {
    /// Items waiting for the next drain cycle.
    pub pending: usize,
    /// Items currently in flight.
    pub processing: usize,
    /// Items that reached a terminal non-failed state.
    pub completed: usize,
    /// Items parked after exhausting retries or failing fatally.
    pub failed: usize,
    /// All items that reached any terminal state.
    pub total_processed: usize,
    /// Mean dispatch duration over the recent sample window.
    pub average_processing_time: Duration,
}

/// An explicit, cancelable scheduled task: the debounce timer.
///
/// Re-arming cancels the previous schedule, so a burst of enqueues keeps
/// pushing one timer instead of stacking many.
#[derive(Debug, Default)]
struct DebounceTimer {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebounceTimer {
    fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
        if let Some(old) = self.handle.lock().replace(handle) {
            old.abort();
        }
    }

    fn cancel(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}

struct QueueInner {
    pending: Mutex<HashMap<String, QueueItem>>,
    processing: Mutex<HashSet<String>>,
    failed: Mutex<HashMap<String, QueueItem>>,
    completed: AtomicUsize,
    failed_total: AtomicUsize,
    // Backoff timers currently waiting to re-enqueue an item.
    retry_timers: AtomicUsize,
    samples: Mutex<VecDeque<Duration>>,
    paused: AtomicBool,
    draining: AtomicBool,
    debounce: DebounceTimer,
    observers: RwLock<Vec<Arc<dyn QueueObserver>>>,
}

impl QueueInner {
    fn emit(&self, event: QueueEvent) {
        let observers = self.observers.read();
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }

    fn record_sample(&self, duration: Duration, window: usize) {
        let mut samples = self.samples.lock();
        samples.push_back(duration);
        while samples.len() > window {
            samples.pop_front();
        }
    }
}

/// The sync queue.
///
/// Accumulates change notifications, deduplicates them by path (last
/// change wins), coalesces bursts behind a debounce window, and drains
/// batches through the dispatcher with bounded concurrency and per-item
/// exponential-backoff retry. Everything it learns flows out through
/// [`QueueEvent`]s and [`SyncQueue::get_stats`].
///
/// Methods must be called from within a tokio runtime.
pub struct SyncQueue<C, D> {
    dispatcher: Arc<SyncDispatcher<C, D>>,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
    inner: Arc<QueueInner>,
}

impl<C, D> Clone for SyncQueue<C, D> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            config: self.config.clone(),
            semaphore: Arc::clone(&self.semaphore),
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Settled {
    Completed,
    Retrying,
    Failed,
}

impl<C, D> SyncQueue<C, D>
where
    C: RemoteClient + 'static,
    D: DocumentStore + 'static,
{
    /// Creates a queue draining into the given dispatcher.
    pub fn new(dispatcher: SyncDispatcher<C, D>, config: QueueConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            dispatcher: Arc::new(dispatcher),
            config,
            semaphore,
            inner: Arc::new(QueueInner {
                pending: Mutex::new(HashMap::new()),
                processing: Mutex::new(HashSet::new()),
                failed: Mutex::new(HashMap::new()),
                completed: AtomicUsize::new(0),
                failed_total: AtomicUsize::new(0),
                retry_timers: AtomicUsize::new(0),
                samples: Mutex::new(VecDeque::new()),
                paused: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                debounce: DebounceTimer::default(),
                observers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers an observer for queue events.
    pub fn subscribe(&self, observer: Arc<dyn QueueObserver>) {
        self.inner.observers.write().push(observer);
    }

    /// Enqueues change notifications.
    ///
    /// Deduplicates by path, last change wins. A path currently in flight
    /// or parked as failed is refused: in-flight items must not be mutated
    /// underneath their dispatch, and failed items need an explicit
    /// [`SyncQueue::retry_failed`] or [`SyncQueue::clear_failed`].
    pub fn enqueue(&self, changes: Vec<ChangeEvent>) {
        let mut added = 0usize;
        let pending_len;
        {
            let mut pending = self.inner.pending.lock();
            let processing = self.inner.processing.lock();
            let failed = self.inner.failed.lock();
            for change in changes {
                if processing.contains(&change.path) {
                    tracing::debug!(path = %change.path, "change deferred: item is in flight");
                    continue;
                }
                if failed.contains_key(&change.path) {
                    tracing::debug!(path = %change.path, "change refused: item is parked as failed");
                    continue;
                }
                pending.insert(change.path.clone(), QueueItem::new(change));
                added += 1;
            }
            pending_len = pending.len();
        }

        if added > 0 {
            self.inner.emit(QueueEvent::QueueUpdated {
                pending: pending_len,
            });
            self.arm_debounce();
        }
    }

    /// Pauses the drain loop. In-flight work runs to completion; delayed
    /// retries still fire but only re-enter the pending map.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.debounce.cancel();
        self.inner.emit(QueueEvent::Paused);
    }

    /// Resumes draining; pending items start a fresh debounce window.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.emit(QueueEvent::Resumed);
        if !self.inner.pending.lock().is_empty() {
            self.arm_debounce();
        }
    }

    /// Returns false while the queue is paused.
    pub fn is_active(&self) -> bool {
        !self.inner.paused.load(Ordering::SeqCst)
    }

    /// Items parked after exhausting retries or failing fatally.
    pub fn get_failed_items(&self) -> Vec<QueueItem> {
        self.inner.failed.lock().values().cloned().collect()
    }

    /// Re-enqueues every failed item with a reset retry counter.
    pub fn retry_failed(&self) {
        let items: Vec<QueueItem> = {
            let mut failed = self.inner.failed.lock();
            failed.drain().map(|(_, item)| item).collect()
        };
        let count = items.len();
        if count == 0 {
            return;
        }
        {
            let mut pending = self.inner.pending.lock();
            for mut item in items {
                item.retries = 0;
                item.last_error = None;
                pending.insert(item.id.clone(), item);
            }
        }
        self.inner.emit(QueueEvent::RetryFailed { count });
        self.arm_debounce();
    }

    /// Drops every failed item.
    pub fn clear_failed(&self) {
        let count = {
            let mut failed = self.inner.failed.lock();
            let count = failed.len();
            failed.clear();
            count
        };
        if count > 0 {
            self.inner.emit(QueueEvent::FailedCleared { count });
        }
    }

    /// Computes current queue statistics.
    pub fn get_stats(&self) -> QueueStats {
        let completed = self.inner.completed.load(Ordering::SeqCst);
        let failed_total = self.inner.failed_total.load(Ordering::SeqCst);
        let average = {
            let samples = self.inner.samples.lock();
            if samples.is_empty() {
                Duration::ZERO
            } else {
                samples.iter().sum::<Duration>() / samples.len() as u32
            }
        };
        QueueStats {
            pending: self.inner.pending.lock().len(),
            processing: self.inner.processing.lock().len(),
            completed,
            failed: self.inner.failed.lock().len(),
            total_processed: completed + failed_total,
            average_processing_time: average,
        }
    }

    /// Arms (or re-arms) the debounce timer. No-op while paused.
    fn arm_debounce(&self) {
        if self.inner.paused.load(Ordering::SeqCst) {
            return;
        }
        let queue = self.clone();
        self.inner
            .debounce
            .schedule(self.config.debounce, async move {
                queue.drain().await;
            });
    }

    /// Drains the pending map in cycles until it stays empty.
    ///
    /// Only one drain runs at a time; a timer firing into an active drain
    /// just returns, and the active loop picks up whatever refilled.
    async fn drain(&self) {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return;
        }

        loop {
            if self.inner.paused.load(Ordering::SeqCst) {
                break;
            }

            let batch: Vec<QueueItem> = {
                let mut pending = self.inner.pending.lock();
                let mut processing = self.inner.processing.lock();
                let items: Vec<QueueItem> = pending.drain().map(|(_, item)| item).collect();
                for item in &items {
                    processing.insert(item.id.clone());
                }
                items
            };
            if batch.is_empty() {
                break;
            }

            let cycle_start = Instant::now();
            self.inner.emit(QueueEvent::ProcessingStarted {
                batch_size: batch.len(),
            });

            let mut join_set = JoinSet::new();
            for item in batch {
                let semaphore = Arc::clone(&self.semaphore);
                let dispatcher = Arc::clone(&self.dispatcher);
                let inner = Arc::clone(&self.inner);
                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let result = SyncItemResult::failed_message(
                                &item.id,
                                "queue concurrency limiter closed",
                            );
                            return (item, result);
                        }
                    };
                    inner.emit(QueueEvent::ItemProcessing {
                        id: item.id.clone(),
                    });
                    let result = dispatcher.sync_document(&item.id).await;
                    (item, result)
                });
            }

            let mut completed = 0usize;
            let mut failed = 0usize;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((item, result)) => match self.settle(item, result) {
                        Settled::Completed => completed += 1,
                        Settled::Failed => failed += 1,
                        Settled::Retrying => {}
                    },
                    Err(e) => {
                        tracing::error!(error = %e, "dispatch task panicked");
                        failed += 1;
                    }
                }
            }

            self.inner.emit(QueueEvent::ProcessingCompleted {
                completed,
                failed,
                duration: cycle_start.elapsed(),
            });
        }

        self.inner.draining.store(false, Ordering::SeqCst);

        // An enqueue may have slipped in between the empty check and the
        // flag reset; a fresh debounce window covers it.
        if !self.inner.paused.load(Ordering::SeqCst) && !self.inner.pending.lock().is_empty() {
            self.arm_debounce();
        }
    }

    /// Applies one dispatch result to the queue state.
    fn settle(&self, mut item: QueueItem, result: SyncItemResult) -> Settled {
        self.inner.processing.lock().remove(&item.id);

        match result.action {
            SyncAction::Failed => {
                let error = result
                    .error
                    .unwrap_or_else(|| "unknown dispatch failure".into());
                if result.retryable && item.retries < self.config.max_retries {
                    let delay = self.config.retry_delay(item.retries);
                    item.retries += 1;
                    item.last_error = Some(error.clone());
                    self.inner.emit(QueueEvent::ItemRetry {
                        id: item.id.clone(),
                        retries: item.retries,
                        delay,
                        error,
                    });
                    self.schedule_retry(item, delay);
                    Settled::Retrying
                } else {
                    item.last_error = Some(error.clone());
                    self.inner.failed_total.fetch_add(1, Ordering::SeqCst);
                    self.inner.record_sample(result.duration, self.config.sample_window);
                    self.inner.emit(QueueEvent::ItemFailed {
                        id: item.id.clone(),
                        error,
                        retries: item.retries,
                    });
                    self.inner.failed.lock().insert(item.id.clone(), item);
                    Settled::Failed
                }
            }
            action => {
                // Conflicts are terminal but expected: reported, never
                // retried, never parked as failed.
                self.inner.completed.fetch_add(1, Ordering::SeqCst);
                self.inner.record_sample(result.duration, self.config.sample_window);
                self.inner.emit(QueueEvent::ItemCompleted {
                    id: item.id,
                    action,
                    duration: result.duration,
                });
                Settled::Completed
            }
        }
    }

    /// Schedules a failed item's re-entry after its backoff delay.
    ///
    /// Re-entry is an ordinary debounce-eligible enqueue, so a retrying
    /// item batches with concurrently-arriving fresh changes. While
    /// paused the item re-enters the pending map and waits for resume.
    fn schedule_retry(&self, item: QueueItem, delay: Duration) {
        let queue = self.clone();
        self.inner.retry_timers.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let inserted = {
                let mut pending = queue.inner.pending.lock();
                let processing = queue.inner.processing.lock();
                if processing.contains(&item.id) || pending.contains_key(&item.id) {
                    // A fresh change for this path arrived in the
                    // meantime; the newer work wins.
                    false
                } else {
                    pending.insert(item.id.clone(), item);
                    true
                }
            };
            if inserted {
                let pending_len = queue.inner.pending.lock().len();
                queue.inner.emit(QueueEvent::QueueUpdated {
                    pending: pending_len,
                });
                queue.arm_debounce();
            }
            queue.inner.retry_timers.fetch_sub(1, Ordering::SeqCst);
        });
    }
}
