//! Deferred delivery of DATA sub-events
//!
//! With the deferred policy the dispatcher copies RX and TX-done sub-events
//! into a per-kind queue and returns immediately. A worker hands queued
//! entries to the data plane in arrival order, either on demand
//! ([`DeferredQueue::drain`]) or from a spawned tokio task
//! ([`DeferredQueue::spawn`]).

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::device::FmacDevice;
use crate::transport::DataPlane;
use crate::{FmacError, Result};

/// Sub-event kinds with a deferred queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeferredKind {
    Rx,
    TxDone,
}

/// Queued copy of one sub-event
#[derive(Debug, Clone)]
pub struct DeferredEntry {
    pub kind: DeferredKind,
    /// Sub-event bytes, head included
    pub event: Bytes,
    pub queued_at: Instant,
}

/// Hand a sub-event to the data plane
pub(crate) fn hand_off(plane: &dyn DataPlane, kind: DeferredKind, event: &[u8]) -> Result<()> {
    match kind {
        DeferredKind::Rx => plane.rx_event(event),
        DeferredKind::TxDone => plane.tx_done_event(event),
    }
}

/// Single-producer, single-consumer queue for one sub-event kind
pub struct DeferredQueue {
    kind: DeferredKind,
    sender: mpsc::UnboundedSender<DeferredEntry>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<DeferredEntry>>>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for DeferredQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredQueue")
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}

impl DeferredQueue {
    /// Create new empty queue
    pub fn new(kind: DeferredKind) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            kind,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn kind(&self) -> DeferredKind {
        self.kind
    }

    /// Entries queued and not yet handed off
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a copy of `event`
    pub fn enqueue(&self, event: &[u8]) -> Result<()> {
        let entry = DeferredEntry {
            kind: self.kind,
            event: Bytes::copy_from_slice(event),
            queued_at: Instant::now(),
        };

        self.pending.fetch_add(1, Ordering::SeqCst);
        self.sender.send(entry).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            FmacError::Deferred(format!("Failed to enqueue {:?} event: {}", self.kind, e))
        })
    }

    /// Hand every queued entry to `plane` on the calling context
    ///
    /// Fails if a spawned worker currently owns the queue.
    pub fn drain(&self, plane: &dyn DataPlane) -> Result<usize> {
        let mut receiver = self.receiver.try_lock().map_err(|_| {
            FmacError::Deferred(format!("{:?} queue is owned by a running worker", self.kind))
        })?;

        let mut processed = 0;
        while let Ok(entry) = receiver.try_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Self::process_entry(plane, &entry);
            processed += 1;
        }
        Ok(processed)
    }

    /// Spawn a worker task handing entries to `plane` as they arrive
    pub fn spawn(&self, plane: Arc<dyn DataPlane>) -> DeferredWorker {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let receiver = Arc::clone(&self.receiver);
        let pending = Arc::clone(&self.pending);
        let kind = self.kind;

        let handle = tokio::spawn(async move {
            Self::run_worker(kind, receiver, pending, plane, shutdown_receiver).await
        });

        DeferredWorker {
            kind,
            handle,
            shutdown_sender: Some(shutdown_sender),
        }
    }

    async fn run_worker(
        kind: DeferredKind,
        receiver: Arc<Mutex<mpsc::UnboundedReceiver<DeferredEntry>>>,
        pending: Arc<AtomicUsize>,
        plane: Arc<dyn DataPlane>,
        mut shutdown_receiver: oneshot::Receiver<()>,
    ) -> usize {
        let mut receiver_guard = receiver.lock().await;
        let mut processed = 0;
        log::debug!("{:?} worker started", kind);

        loop {
            tokio::select! {
                // Queued entries are handed off before shutdown is honored
                biased;

                Some(entry) = receiver_guard.recv() => {
                    pending.fetch_sub(1, Ordering::SeqCst);
                    Self::process_entry(plane.as_ref(), &entry);
                    processed += 1;
                }

                _ = &mut shutdown_receiver => {
                    log::debug!("{:?} worker received shutdown signal", kind);
                    break;
                }
            }
        }

        processed
    }

    fn process_entry(plane: &dyn DataPlane, entry: &DeferredEntry) {
        log::trace!(
            "Processing {:?} event queued {:?} ago",
            entry.kind,
            entry.queued_at.elapsed()
        );
        if let Err(e) = hand_off(plane, entry.kind, &entry.event) {
            log::error!("Deferred {:?} event processing failed: {}", entry.kind, e);
        }
    }
}

/// Handle to a spawned deferred worker
#[derive(Debug)]
pub struct DeferredWorker {
    kind: DeferredKind,
    handle: JoinHandle<usize>,
    shutdown_sender: Option<oneshot::Sender<()>>,
}

impl DeferredWorker {
    pub fn kind(&self) -> DeferredKind {
        self.kind
    }

    /// Stop the worker once the queue is empty
    ///
    /// Returns the number of entries the worker handed off.
    pub async fn stop(mut self) -> Result<usize> {
        if let Some(sender) = self.shutdown_sender.take() {
            let _ = sender.send(());
        }
        self.handle
            .await
            .map_err(|e| FmacError::Deferred(format!("{:?} worker failed: {}", self.kind, e)))
    }
}

/// The device's deferred queues
#[derive(Debug)]
pub struct DeferredQueues {
    rx: DeferredQueue,
    tx_done: DeferredQueue,
}

impl DeferredQueues {
    /// Create new empty queues
    pub fn new() -> Self {
        Self {
            rx: DeferredQueue::new(DeferredKind::Rx),
            tx_done: DeferredQueue::new(DeferredKind::TxDone),
        }
    }

    pub fn get(&self, kind: DeferredKind) -> &DeferredQueue {
        match kind {
            DeferredKind::Rx => &self.rx,
            DeferredKind::TxDone => &self.tx_done,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.pending() + self.tx_done.pending()
    }
}

impl Default for DeferredQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl FmacDevice {
    fn require_data_plane(&self) -> Result<Arc<dyn DataPlane>> {
        self.data_plane
            .clone()
            .ok_or_else(|| FmacError::Deferred("no data plane attached".to_string()))
    }

    /// Sub-events waiting in the deferred queues
    pub fn pending_deferred(&self) -> usize {
        self.deferred.pending()
    }

    /// Hand every deferred sub-event to the data plane now
    pub fn drain_deferred(&self) -> Result<usize> {
        let plane = self.require_data_plane()?;
        let rx = self.deferred.get(DeferredKind::Rx).drain(plane.as_ref())?;
        let tx_done = self.deferred.get(DeferredKind::TxDone).drain(plane.as_ref())?;
        Ok(rx + tx_done)
    }

    /// Spawn one worker per deferred queue
    pub fn spawn_deferred_workers(&self) -> Result<Vec<DeferredWorker>> {
        let plane = self.require_data_plane()?;
        Ok([DeferredKind::Rx, DeferredKind::TxDone]
            .into_iter()
            .map(|kind| self.deferred.get(kind).spawn(Arc::clone(&plane)))
            .collect())
    }
}
