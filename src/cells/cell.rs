//! The actor cell: one worker running one behavior's event loop.
//!
//! ## Architecture
//! ```text
//! senders ──► [event mailbox]  ──┐  (bounded, timeout-bounded delivery)
//! registry ─► [control slot]   ──┤  (bounded, subscriber snapshots)
//! owner ────► shall-stop token ──┤
//!                                ▼
//!                     select! in the cell's worker
//!                        │
//!                        ├─ stop      → behavior.terminate(), clean exit
//!                        ├─ snapshot  → replace subscriber list
//!                        └─ event     → guarded behavior.process_event()
//!                                        ├─ Ok            → next event
//!                                        ├─ Error/Fault   → circuit breaker
//!                                        │    tripped     → fatal, no recover
//!                                        └─ recover() Err → fatal
//! ```
//!
//! ## Rules
//! - Events are processed strictly in mailbox-arrival order.
//! - The subscriber snapshot is owned by the loop alone; the registry talks
//!   to it only through the control slot, so the hot path takes no locks.
//! - Delivery to a full mailbox retries once per second and fails with a
//!   timeout once the cell's emit timeout has accumulated; delivery to a
//!   stopping cell fails immediately.
//! - Fatal exits skip `terminate()`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cells::behavior::{Behavior, Context};
use crate::cells::event::{Event, Payload};
use crate::config::{BehaviorOptions, CONTROL_SLOT_CAPACITY, MAILBOX_RETRY_INTERVAL, SNAPSHOT_PUSH_TIMEOUT};
use crate::error::{CellError, WorkerError};
use crate::worker::{exceeds_frequency, trim, Outcome, Recovering, run_guarded, Work, Worker, WorkerStatus};

/// Cheap cloneable handle for delivering events into one cell's mailbox.
///
/// Handles appear in subscriber snapshots and are safe to keep after the
/// cell stopped; delivery then fails with an inactive error.
#[derive(Clone)]
pub struct CellHandle {
    id: Arc<str>,
    mailbox: mpsc::Sender<Event>,
    emit_timeout: Duration,
    status: watch::Receiver<WorkerStatus>,
}

impl CellHandle {
    /// Id of the cell this handle delivers to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Delivers an event into the cell's mailbox.
    ///
    /// Non-blocking first attempt; a full mailbox is retried once per
    /// second until the cell's emit timeout has accumulated, then fails
    /// with [`CellError::MailboxTimeout`]. A cell whose worker is not
    /// running fails immediately with [`CellError::Inactive`]. Never
    /// blocks indefinitely, never drops silently.
    pub async fn emit(&self, event: Event) -> Result<(), CellError> {
        if !self.is_active() {
            return Err(self.inactive());
        }
        let mut event = match self.mailbox.try_send(event) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.inactive()),
            Err(mpsc::error::TrySendError::Full(event)) => event,
        };

        let mut elapsed = Duration::ZERO;
        loop {
            time::sleep(MAILBOX_RETRY_INTERVAL).await;
            elapsed += MAILBOX_RETRY_INTERVAL;
            if !self.is_active() {
                return Err(self.inactive());
            }
            event = match self.mailbox.try_send(event) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(self.inactive()),
                Err(mpsc::error::TrySendError::Full(event)) => {
                    if elapsed >= self.emit_timeout {
                        return Err(CellError::MailboxTimeout {
                            id: self.id.to_string(),
                            timeout: self.emit_timeout,
                        });
                    }
                    event
                }
            };
        }
    }

    /// Builds an event from topic and payload, then delivers it.
    pub async fn emit_new(
        &self,
        topic: impl Into<String>,
        payload: Payload,
    ) -> Result<(), CellError> {
        let event = Event::new(topic, payload)?;
        self.emit(event).await
    }

    fn is_active(&self) -> bool {
        matches!(*self.status.borrow(), WorkerStatus::Running)
    }

    fn inactive(&self) -> CellError {
        CellError::Inactive {
            id: self.id.to_string(),
        }
    }
}

/// One running cell: worker, mailbox, control slot.
pub(crate) struct Cell {
    id: Arc<str>,
    worker: Worker,
    handle: CellHandle,
    ctrl_tx: mpsc::Sender<Vec<CellHandle>>,
}

impl Cell {
    /// Starts the cell's worker; blocks until the behavior's `init` ran.
    pub(crate) async fn start(
        environment_id: Arc<str>,
        id: Arc<str>,
        behavior: Box<dyn Behavior>,
    ) -> Cell {
        let options = behavior.options().clamped();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(options.mailbox_capacity);
        let (ctrl_tx, ctrl_rx) = mpsc::channel(CONTROL_SLOT_CAPACITY);

        let work = Arc::new(CellWork {
            id: Arc::clone(&id),
            environment_id,
            behavior: Mutex::new(behavior),
            mailbox_rx: Mutex::new(mailbox_rx),
            ctrl_rx: Mutex::new(ctrl_rx),
            options,
        });
        let worker = Worker::start(format!("cell:{id}"), work).await;
        let handle = CellHandle {
            id: Arc::clone(&id),
            mailbox: mailbox_tx,
            emit_timeout: options.emit_timeout,
            status: worker.subscribe_status(),
        };
        Cell {
            id,
            worker,
            handle,
            ctrl_tx,
        }
    }

    pub(crate) fn handle(&self) -> CellHandle {
        self.handle.clone()
    }

    #[cfg(test)]
    pub(crate) fn worker(&self) -> &Worker {
        &self.worker
    }

    /// Pushes a fresh subscriber snapshot through the control slot.
    ///
    /// Bounded and time-limited so graph changes cannot be blocked by a
    /// busy behavior or a full event mailbox.
    pub(crate) async fn push_subscribers(
        &self,
        snapshot: Vec<CellHandle>,
    ) -> Result<(), CellError> {
        match time::timeout(SNAPSHOT_PUSH_TIMEOUT, self.ctrl_tx.send(snapshot)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_closed)) => Err(CellError::Inactive {
                id: self.id.to_string(),
            }),
            Err(_elapsed) => Err(CellError::MailboxTimeout {
                id: self.id.to_string(),
                timeout: SNAPSHOT_PUSH_TIMEOUT,
            }),
        }
    }

    /// Stops the cell's worker, running the behavior's `terminate`.
    pub(crate) async fn stop(&self) -> Result<(), CellError> {
        self.worker.stop().await.map_err(CellError::Worker)
    }
}

/// The dequeue-process loop run by the cell's worker.
struct CellWork {
    id: Arc<str>,
    environment_id: Arc<str>,
    behavior: Mutex<Box<dyn Behavior>>,
    mailbox_rx: Mutex<mpsc::Receiver<Event>>,
    ctrl_rx: Mutex<mpsc::Receiver<Vec<CellHandle>>>,
    options: BehaviorOptions,
}

#[async_trait]
impl Work for CellWork {
    async fn run(&self, shall_stop: CancellationToken) -> Result<(), WorkerError> {
        let mut behavior = self.behavior.lock().await;
        let mut mailbox = self.mailbox_rx.lock().await;
        let mut ctrl = self.ctrl_rx.lock().await;
        let mut subscribers: Vec<CellHandle> = Vec::new();
        let mut recoverings: Vec<Recovering> = Vec::new();

        {
            let ctx = Context::new(&self.id, &self.environment_id, &subscribers);
            behavior.init(&ctx).await.map_err(WorkerError::from)?;
        }
        debug!(cell = %self.id, "cell ready");

        loop {
            tokio::select! {
                biased;
                _ = shall_stop.cancelled() => {
                    debug!(cell = %self.id, "cell terminating");
                    return behavior.terminate().await.map_err(WorkerError::from);
                }
                Some(snapshot) = ctrl.recv() => {
                    subscribers = snapshot;
                }
                Some(event) = mailbox.recv() => {
                    let ctx = Context::new(&self.id, &self.environment_id, &subscribers);
                    let outcome = run_guarded(behavior.process_event(event, &ctx)).await;
                    let reason = match outcome {
                        Outcome::Ok => None,
                        Outcome::Error(err) => Some(err),
                        Outcome::Fault(fault) => Some(CellError::Faulted { reason: fault }),
                    };
                    if let Some(reason) = reason {
                        self.recover(&mut *behavior, &mut recoverings, reason).await?;
                    }
                }
            }
        }
    }
}

impl CellWork {
    /// Routes one abnormal outcome through the circuit breaker and the
    /// behavior's `recover`.
    async fn recover(
        &self,
        behavior: &mut Box<dyn Behavior>,
        recoverings: &mut Vec<Recovering>,
        reason: CellError,
    ) -> Result<(), WorkerError> {
        warn!(cell = %self.id, error = %reason, "behavior error, recovering");
        recoverings.push(Recovering::now(reason.to_string()));
        if exceeds_frequency(
            recoverings,
            self.options.recovery_limit,
            self.options.recovery_window,
        ) {
            // Tripped: the behavior gets no recover call and no terminate.
            return Err(WorkerError::RecoveryFrequencyExceeded {
                count: self.options.recovery_limit,
                window: self.options.recovery_window,
            });
        }
        *recoverings = trim(
            std::mem::take(recoverings),
            self.options.recovery_limit,
            self.options.recovery_window,
        );
        behavior.recover(&reason).await.map_err(WorkerError::from)
    }
}
