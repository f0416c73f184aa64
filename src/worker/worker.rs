//! The supervised worker primitive.
//!
//! A [`Worker`] runs one [`Work`] as an independently scheduled task and
//! gives its owner lifecycle control:
//!
//! ```text
//! start ──► Running ──┬── work returns Ok ─────────────► Stopping ─► Stopped
//!                     ├── stop()/kill(err) ── cancel ──► Stopping ─► Stopped
//!                     ├── work errs/panics, no policy ─► Stopping ─► Stopped
//!                     └── work errs/panics, policy ──► Ok(trimmed) → rerun
//!                                                   └► Err(fatal)  → Stopped
//! Stopped ── restart() ──► Restarting ──► Running            (fresh token)
//! ```
//!
//! ## Rules
//! - `start` and `restart` block until the work loop is ready.
//! - `stop`/`kill`/`wait` block until the work has **fully** exited.
//! - At most one terminal error is retained; the first error wins and every
//!   later `wait()`/`stop()` caller observes the same value.
//! - Cancellation is cooperative: the work must observe the shall-stop
//!   token at every suspension point.
//! - On final termination a supervised worker reports itself to its parent
//!   sentinel's fault-or-completion channel.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::worker::outcome::{run_guarded, Outcome};
use crate::worker::recovery::{Recovering, RecoveryPolicy};
use crate::worker::sentinel::FaultNote;
use crate::worker::task::WorkRef;

/// Lifecycle status of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The work loop is executing.
    Running,
    /// A restart was requested and the loop is relaunching.
    Restarting,
    /// Termination was requested; the work has not fully exited yet.
    Stopping,
    /// The work has fully exited.
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Running => "running",
            WorkerStatus::Restarting => "restarting",
            WorkerStatus::Stopping => "stopping",
            WorkerStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Cheap cloneable handle to one supervised background task.
///
/// All clones control the same underlying worker.
#[derive(Clone)]
pub struct Worker {
    core: Arc<Core>,
}

struct Core {
    description: Arc<str>,
    work: WorkRef,
    policy: Option<Arc<dyn RecoveryPolicy>>,
    status_tx: watch::Sender<WorkerStatus>,
    error: Mutex<Option<WorkerError>>,
    token: Mutex<CancellationToken>,
    parent: Mutex<Option<mpsc::Sender<FaultNote>>>,
    restart_gate: Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Worker {
    /// Starts a worker without a recovery policy: any abnormal termination
    /// of the work is immediately fatal.
    ///
    /// Blocks until the work loop has signaled readiness.
    pub async fn start(description: impl Into<Arc<str>>, work: WorkRef) -> Worker {
        Self::spawn(description.into(), work, None).await
    }

    /// Starts a worker with a recovery policy consulted on every abnormal
    /// termination of the work.
    pub async fn start_with_policy(
        description: impl Into<Arc<str>>,
        work: WorkRef,
        policy: Arc<dyn RecoveryPolicy>,
    ) -> Worker {
        Self::spawn(description.into(), work, Some(policy)).await
    }

    async fn spawn(
        description: Arc<str>,
        work: WorkRef,
        policy: Option<Arc<dyn RecoveryPolicy>>,
    ) -> Worker {
        let (status_tx, _) = watch::channel(WorkerStatus::Restarting);
        let worker = Worker {
            core: Arc::new(Core {
                description,
                work,
                policy,
                status_tx,
                error: Mutex::new(None),
                token: Mutex::new(CancellationToken::new()),
                parent: Mutex::new(None),
                restart_gate: Mutex::new(()),
            }),
        };
        worker.launch().await;
        worker
    }

    async fn launch(&self) {
        let (ready_tx, ready_rx) = oneshot::channel();
        let core = Arc::clone(&self.core);
        let token = self.core.current_token();
        eprintln!("DBG launch spawn {}", self.core.description);
        tokio::spawn(run_loop(core, token, ready_tx));
        eprintln!("DBG launch await ready {}", self.core.description);
        let _ = ready_rx.await;
        eprintln!("DBG launch got ready {}", self.core.description);
    }

    /// Returns the worker's description.
    pub fn description(&self) -> &str {
        &self.core.description
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> WorkerStatus {
        *self.core.status_tx.borrow()
    }

    /// Returns the stored terminal error, if any, without blocking.
    pub fn error(&self) -> Option<WorkerError> {
        lock(&self.core.error).clone()
    }

    /// Returns a clone of the current shall-stop token.
    ///
    /// The token is replaced on restart; the clone observes only the
    /// current run generation.
    pub fn shall_stop(&self) -> CancellationToken {
        self.core.current_token()
    }

    /// Requests termination and blocks until the work has fully exited.
    ///
    /// Returns the stored terminal error. Idempotent: calling it on an
    /// already-stopped worker returns the same error again without
    /// re-running anything.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        if self.status() != WorkerStatus::Stopped {
            self.begin_stop();
        }
        self.wait().await
    }

    /// Like [`Worker::stop`], forcing `err` as the terminal error.
    ///
    /// An earlier stored error still wins.
    pub async fn kill(&self, err: WorkerError) -> Result<(), WorkerError> {
        if self.status() != WorkerStatus::Stopped {
            self.core.store_error(err);
            self.begin_stop();
        }
        self.wait().await
    }

    fn begin_stop(&self) {
        self.core.status_tx.send_modify(|s| {
            if *s != WorkerStatus::Stopped {
                *s = WorkerStatus::Stopping;
            }
        });
        self.core.current_token().cancel();
    }

    /// Blocks until the worker has terminated; returns the stored error.
    pub async fn wait(&self) -> Result<(), WorkerError> {
        let mut rx = self.core.status_tx.subscribe();
        let _ = rx.wait_for(|s| *s == WorkerStatus::Stopped).await;
        match self.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Re-launches the same work after a stop.
    ///
    /// Fails with [`WorkerError::InvalidState`] unless the worker is
    /// [`WorkerStatus::Stopped`]. Clears the stored error, installs a fresh
    /// shall-stop token, and blocks until the relaunched loop is ready.
    pub async fn restart(&self) -> Result<(), WorkerError> {
        {
            let _gate = lock(&self.core.restart_gate);
            let actual = self.status();
            if actual != WorkerStatus::Stopped {
                return Err(WorkerError::InvalidState {
                    required: WorkerStatus::Stopped,
                    actual,
                });
            }
            *lock(&self.core.error) = None;
            *lock(&self.core.token) = CancellationToken::new();
            self.core.status_tx.send_replace(WorkerStatus::Restarting);
        }
        debug!(worker = %self.core.description, "restarting");
        eprintln!("DBG restart before launch {}", self.core.description);
        self.launch().await;
        eprintln!("DBG restart after launch {}", self.core.description);
        Ok(())
    }

    /// Returns a receiver tracking the worker's status transitions.
    pub(crate) fn subscribe_status(&self) -> watch::Receiver<WorkerStatus> {
        self.core.status_tx.subscribe()
    }

    /// Installs or clears the parent sentinel's note channel.
    pub(crate) fn set_parent(&self, tx: Option<mpsc::Sender<FaultNote>>) {
        *lock(&self.core.parent) = tx;
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("description", &self.core.description)
            .field("status", &self.status())
            .field("error", &self.error())
            .finish()
    }
}

impl Core {
    fn current_token(&self) -> CancellationToken {
        lock(&self.token).clone()
    }

    fn store_error(&self, err: WorkerError) {
        let mut slot = lock(&self.error);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Returns `true` when the loop should resume after an abnormal
    /// termination.
    fn consult_policy(&self, history: &mut Vec<Recovering>, err: WorkerError) -> bool {
        match &self.policy {
            None => {
                self.store_error(err);
                false
            }
            Some(policy) => {
                debug!(worker = %self.description, error = %err, "recovering");
                history.push(Recovering::now(err.to_string()));
                match policy.recover(std::mem::take(history)) {
                    Ok(trimmed) => {
                        *history = trimmed;
                        true
                    }
                    Err(fatal) => {
                        self.store_error(fatal);
                        false
                    }
                }
            }
        }
    }

    fn notify_parent(&self) {
        let parent = lock(&self.parent).clone();
        if let Some(tx) = parent {
            let note = FaultNote {
                description: self.description.to_string(),
                error: lock(&self.error).clone(),
            };
            if tx.try_send(note).is_err() {
                debug!(worker = %self.description, "fault note dropped, sentinel gone");
            }
        }
    }
}

async fn run_loop(core: Arc<Core>, token: CancellationToken, ready: oneshot::Sender<()>) {
    core.status_tx.send_replace(WorkerStatus::Running);
    let _ = ready.send(());
    debug!(worker = %core.description, "worker started");

    let mut history: Vec<Recovering> = Vec::new();
    loop {
        let outcome = run_guarded(core.work.run(token.clone())).await;
        if token.is_cancelled() {
            // Termination was requested; a kill error, if any, already
            // occupies the slot and wins over the work's own error.
            if let Outcome::Error(err) = outcome {
                core.store_error(err);
            }
            break;
        }
        match outcome {
            Outcome::Ok => break,
            Outcome::Error(err) => {
                if !core.consult_policy(&mut history, err) {
                    break;
                }
            }
            Outcome::Fault(reason) => {
                warn!(worker = %core.description, %reason, "work panicked");
                let err = WorkerError::Faulted { reason };
                if !core.consult_policy(&mut history, err) {
                    break;
                }
            }
        }
    }

    core.status_tx.send_modify(|s| {
        if *s != WorkerStatus::Stopping {
            *s = WorkerStatus::Stopping;
        }
    });
    core.status_tx.send_replace(WorkerStatus::Stopped);
    debug!(worker = %core.description, error = ?lock(&core.error), "worker stopped");
    core.notify_parent();
}
