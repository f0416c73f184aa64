//! Supervision tree nodes.
//!
//! A [`Sentinel`] is a worker that supervises a set of other workers or
//! sentinels (its *observables*). Internally it is one [`Worker`] whose
//! work loops over three event sources:
//!
//! ```text
//! select! {
//!     shall-stop       → stop all members, exit clean
//!     membership ctrl  → observe / forget / iterate, ack the caller
//!     member fault note→ no handler: fatal to the whole sentinel
//!                        handler:    Ok  → continue (handler restarted
//!                                          the member if it wanted to)
//!                                    Err → sentinel terminates, cascades
//! }
//! ```
//!
//! Because a sentinel is itself an [`Observable`], trees nest: a sentinel's
//! fatal error travels up its own parent's note channel, stopping siblings
//! along the way (fail-fast default). A [`FaultHandler`] contains the blast
//! radius per fault instead.
//!
//! ## Rules
//! - Membership changes block until the sentinel has registered them.
//! - `forget` removes members without stopping them.
//! - A member that terminates **without** an error is silently dropped from
//!   the supervised set.
//! - Members are exclusively managed: re-observing a description replaces
//!   the previous member under that key.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{FAULT_NOTE_CAPACITY, SENTINEL_CTRL_CAPACITY};
use crate::error::WorkerError;
use crate::worker::worker::{Worker, WorkerStatus};
use crate::worker::task::Work;

/// Shared handle to anything a sentinel can supervise.
pub type ObservableRef = Arc<dyn Observable>;

/// What a worker reports to its parent sentinel on final termination.
///
/// `error: None` means the member completed normally and simply leaves the
/// supervised set; `Some(err)` is a fault the sentinel reacts to.
#[derive(Debug, Clone)]
pub struct FaultNote {
    /// Description of the terminated member.
    pub description: String,
    /// The member's stored terminal error, if any.
    pub error: Option<WorkerError>,
}

/// The contract a sentinel supervises through.
///
/// Implemented by [`Worker`] and [`Sentinel`]; `attach`/`detach` wire the
/// member's termination report to the supervising sentinel's note channel.
#[async_trait]
pub trait Observable: Send + Sync + 'static {
    /// Stable description identifying this member within its sentinel.
    fn description(&self) -> &str;

    /// Current lifecycle status.
    fn status(&self) -> WorkerStatus;

    /// Requests termination and blocks until fully exited.
    async fn stop(&self) -> Result<(), WorkerError>;

    /// Like `stop`, forcing `err` as the terminal error.
    async fn kill(&self, err: WorkerError) -> Result<(), WorkerError>;

    /// Re-launches after a stop; only legal when stopped.
    async fn restart(&self) -> Result<(), WorkerError>;

    /// Blocks until terminated; returns the stored error.
    async fn wait(&self) -> Result<(), WorkerError>;

    /// Installs the supervising sentinel's note channel.
    fn attach(&self, notes: mpsc::Sender<FaultNote>);

    /// Removes the supervision link without stopping the member.
    fn detach(&self);
}

#[async_trait]
impl Observable for Worker {
    fn description(&self) -> &str {
        Worker::description(self)
    }

    fn status(&self) -> WorkerStatus {
        Worker::status(self)
    }

    async fn stop(&self) -> Result<(), WorkerError> {
        Worker::stop(self).await
    }

    async fn kill(&self, err: WorkerError) -> Result<(), WorkerError> {
        Worker::kill(self, err).await
    }

    async fn restart(&self) -> Result<(), WorkerError> {
        Worker::restart(self).await
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        Worker::wait(self).await
    }

    fn attach(&self, notes: mpsc::Sender<FaultNote>) {
        self.set_parent(Some(notes));
    }

    fn detach(&self) {
        self.set_parent(None);
    }
}

/// View of a sentinel handed to a [`FaultHandler`] while it decides.
///
/// Borrowed from the supervision loop; the member set cannot change while
/// the handler runs.
pub struct FaultScope<'a> {
    description: &'a str,
    members: &'a BTreeMap<String, ObservableRef>,
    notes: &'a mpsc::Sender<FaultNote>,
}

impl FaultScope<'_> {
    /// Description of the sentinel whose member faulted.
    pub fn description(&self) -> &str {
        self.description
    }

    /// Iterates the currently supervised members in description order.
    pub fn members(&self) -> impl Iterator<Item = &ObservableRef> {
        self.members.values()
    }

    /// Stops and restarts every supervised member.
    ///
    /// Members are detached while cycling so their stop notes do not feed
    /// back into the sentinel, then reattached.
    pub async fn restart_all(&self) -> Result<(), WorkerError> {
        for member in self.members.values() {
            member.detach();
            let _ = member.stop().await;
            member.restart().await?;
            member.attach(self.notes.clone());
        }
        Ok(())
    }
}

/// Decides the blast radius of one member fault.
///
/// Returning `Ok(())` keeps the sentinel going; the handler is expected to
/// have restarted the member itself if it wanted it back. Returning an
/// error terminates the sentinel with it, cascading up its own supervision
/// chain.
#[async_trait]
pub trait FaultHandler: Send + Sync + 'static {
    /// Reacts to one member fault.
    async fn on_fault(
        &self,
        scope: &FaultScope<'_>,
        member: &ObservableRef,
        error: &WorkerError,
    ) -> Result<(), WorkerError>;
}

/// Membership control messages; every request is acked so callers block
/// until the sentinel has registered the change.
enum Ctrl {
    Observe(Vec<ObservableRef>, oneshot::Sender<()>),
    Forget(Vec<String>, oneshot::Sender<()>),
    Do(DoFn, oneshot::Sender<Result<(), WorkerError>>),
}

type DoFn = Box<dyn FnMut(&ObservableRef) -> Result<(), WorkerError> + Send>;

/// Cheap cloneable handle to one supervision tree node.
#[derive(Clone)]
pub struct Sentinel {
    core: Arc<SentinelCore>,
}

struct SentinelCore {
    worker: Worker,
    ctrl_tx: mpsc::Sender<Ctrl>,
}

impl Sentinel {
    /// Starts a sentinel without a fault handler: any member fault is fatal
    /// to the sentinel and cascades (fail-fast default).
    pub async fn start(description: impl Into<Arc<str>>) -> Sentinel {
        Self::spawn(description.into(), None).await
    }

    /// Starts a sentinel whose [`FaultHandler`] decides per fault.
    pub async fn with_handler(
        description: impl Into<Arc<str>>,
        handler: Arc<dyn FaultHandler>,
    ) -> Sentinel {
        Self::spawn(description.into(), Some(handler)).await
    }

    async fn spawn(description: Arc<str>, handler: Option<Arc<dyn FaultHandler>>) -> Sentinel {
        let (ctrl_tx, ctrl_rx) = mpsc::channel(SENTINEL_CTRL_CAPACITY);
        let (note_tx, note_rx) = mpsc::channel(FAULT_NOTE_CAPACITY);
        let work = Arc::new(SentinelWork {
            description: Arc::clone(&description),
            handler,
            note_tx,
            note_rx: Mutex::new(note_rx),
            ctrl_rx: Mutex::new(ctrl_rx),
            members: Mutex::new(BTreeMap::new()),
        });
        let worker = Worker::start(description, work).await;
        Sentinel {
            core: Arc::new(SentinelCore { worker, ctrl_tx }),
        }
    }

    /// Adds members to supervision; blocks until registered.
    ///
    /// Idempotent: observing an already-observed description replaces it.
    pub async fn observe(&self, members: Vec<ObservableRef>) -> Result<(), WorkerError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.ctrl_round_trip(Ctrl::Observe(members, ack_tx), ack_rx)
            .await
    }

    /// Removes members from supervision without stopping them.
    pub async fn forget(&self, descriptions: &[&str]) -> Result<(), WorkerError> {
        let descriptions = descriptions.iter().map(|d| d.to_string()).collect();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.ctrl_round_trip(Ctrl::Forget(descriptions, ack_tx), ack_rx)
            .await
    }

    /// Calls `f` for every supervised member, in description order.
    ///
    /// The first error short-circuits the iteration and is returned.
    pub async fn observables_do<F>(&self, f: F) -> Result<(), WorkerError>
    where
        F: FnMut(&ObservableRef) -> Result<(), WorkerError> + Send + 'static,
    {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.ctrl_round_trip(Ctrl::Do(Box::new(f), ack_tx), ack_rx)
            .await?
    }

    /// Sends one control message and awaits its ack, bailing out if the
    /// sentinel terminates before answering.
    async fn ctrl_round_trip<T>(
        &self,
        ctrl: Ctrl,
        ack_rx: oneshot::Receiver<T>,
    ) -> Result<T, WorkerError> {
        if self.status() != WorkerStatus::Running {
            return Err(self.not_running());
        }
        self.core
            .ctrl_tx
            .send(ctrl)
            .await
            .map_err(|_| self.not_running())?;
        tokio::select! {
            biased;
            res = ack_rx => res.map_err(|_| self.not_running()),
            _ = self.core.worker.wait() => Err(self.not_running()),
        }
    }

    /// Returns the sentinel's description.
    pub fn description(&self) -> &str {
        self.core.worker.description()
    }

    /// Returns the sentinel worker's current status.
    pub fn status(&self) -> WorkerStatus {
        self.core.worker.status()
    }

    /// Returns the stored terminal error without blocking.
    pub fn error(&self) -> Option<WorkerError> {
        self.core.worker.error()
    }

    /// Stops the sentinel: all members are stopped first, then the
    /// sentinel's own worker exits.
    pub async fn stop(&self) -> Result<(), WorkerError> {
        self.core.worker.stop().await
    }

    /// Like [`Sentinel::stop`], forcing `err` as the terminal error.
    pub async fn kill(&self, err: WorkerError) -> Result<(), WorkerError> {
        self.core.worker.kill(err).await
    }

    /// Blocks until the sentinel has terminated.
    pub async fn wait(&self) -> Result<(), WorkerError> {
        self.core.worker.wait().await
    }

    /// Re-launches the supervision loop after a stop; the member set is
    /// retained across the restart.
    pub async fn restart(&self) -> Result<(), WorkerError> {
        self.core.worker.restart().await
    }

    fn not_running(&self) -> WorkerError {
        WorkerError::InvalidState {
            required: WorkerStatus::Running,
            actual: self.status(),
        }
    }
}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sentinel")
            .field("description", &self.description())
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl Observable for Sentinel {
    fn description(&self) -> &str {
        Sentinel::description(self)
    }

    fn status(&self) -> WorkerStatus {
        Sentinel::status(self)
    }

    async fn stop(&self) -> Result<(), WorkerError> {
        Sentinel::stop(self).await
    }

    async fn kill(&self, err: WorkerError) -> Result<(), WorkerError> {
        Sentinel::kill(self, err).await
    }

    async fn restart(&self) -> Result<(), WorkerError> {
        Sentinel::restart(self).await
    }

    async fn wait(&self) -> Result<(), WorkerError> {
        Sentinel::wait(self).await
    }

    fn attach(&self, notes: mpsc::Sender<FaultNote>) {
        self.core.worker.set_parent(Some(notes));
    }

    fn detach(&self) {
        self.core.worker.set_parent(None);
    }
}

/// The supervision loop run by the sentinel's own worker.
struct SentinelWork {
    description: Arc<str>,
    handler: Option<Arc<dyn FaultHandler>>,
    note_tx: mpsc::Sender<FaultNote>,
    note_rx: Mutex<mpsc::Receiver<FaultNote>>,
    ctrl_rx: Mutex<mpsc::Receiver<Ctrl>>,
    // Lives in the work struct, not the loop, so membership survives a
    // sentinel restart.
    members: Mutex<BTreeMap<String, ObservableRef>>,
}

#[async_trait]
impl Work for SentinelWork {
    async fn run(&self, shall_stop: CancellationToken) -> Result<(), WorkerError> {
        let mut ctrl_rx = self.ctrl_rx.lock().await;
        let mut note_rx = self.note_rx.lock().await;
        let mut members = self.members.lock().await;

        loop {
            tokio::select! {
                biased;
                _ = shall_stop.cancelled() => {
                    self.stop_members(&mut members).await;
                    return Ok(());
                }
                Some(ctrl) = ctrl_rx.recv() => {
                    self.handle_ctrl(ctrl, &mut members);
                }
                Some(note) = note_rx.recv() => {
                    eprintln!("DBG sentinel got note {} err={:?}", note.description, note.error.is_some());
                    if let Err(fatal) = self.handle_note(note, &mut members).await {
                        self.stop_members(&mut members).await;
                        return Err(fatal);
                    }
                }
            }
        }
    }
}

impl SentinelWork {
    fn handle_ctrl(&self, ctrl: Ctrl, members: &mut BTreeMap<String, ObservableRef>) {
        match ctrl {
            Ctrl::Observe(new_members, ack) => {
                for member in new_members {
                    member.attach(self.note_tx.clone());
                    debug!(
                        sentinel = %self.description,
                        member = %member.description(),
                        "observing"
                    );
                    members.insert(member.description().to_string(), member);
                }
                let _ = ack.send(());
            }
            Ctrl::Forget(descriptions, ack) => {
                for description in descriptions {
                    if let Some(member) = members.remove(&description) {
                        member.detach();
                        debug!(sentinel = %self.description, member = %description, "forgotten");
                    }
                }
                let _ = ack.send(());
            }
            Ctrl::Do(mut f, ack) => {
                let mut result = Ok(());
                for member in members.values() {
                    if let Err(err) = f(member) {
                        result = Err(err);
                        break;
                    }
                }
                let _ = ack.send(result);
            }
        }
    }

    async fn handle_note(
        &self,
        note: FaultNote,
        members: &mut BTreeMap<String, ObservableRef>,
    ) -> Result<(), WorkerError> {
        let err = match note.error {
            None => {
                // Normal completion: the member simply leaves the set.
                if let Some(member) = members.remove(&note.description) {
                    member.detach();
                }
                return Ok(());
            }
            Some(err) => err,
        };

        let member = match members.get(&note.description) {
            Some(member) => Arc::clone(member),
            // Forgotten in the meantime; nothing to supervise.
            None => return Ok(()),
        };

        eprintln!("DBG handle_note resolved member {}", note.description);
        match &self.handler {
            None => {
                warn!(
                    sentinel = %self.description,
                    member = %note.description,
                    error = %err,
                    "member fault without handler, cascading"
                );
                Err(err)
            }
            Some(handler) => {
                let scope = FaultScope {
                    description: &self.description,
                    members,
                    notes: &self.note_tx,
                };
                eprintln!("DBG calling on_fault for {}", note.description);
                let r = handler.on_fault(&scope, &member, &err).await;
                eprintln!("DBG on_fault returned for {} ok={}", note.description, r.is_ok());
                r
            }
        }
    }

    async fn stop_members(&self, members: &mut BTreeMap<String, ObservableRef>) {
        for (_, member) in std::mem::take(&mut *members) {
            member.detach();
            if let Err(err) = member.stop().await {
                debug!(
                    sentinel = %self.description,
                    member = %member.description(),
                    error = %err,
                    "member stopped with error"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::task::{WorkFn, WorkRef};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn ticker(runs: Arc<AtomicUsize>) -> WorkRef {
        WorkFn::arc("ticker", move |ctx: CancellationToken| {
            let runs = Arc::clone(&runs);
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                ctx.cancelled().await;
                Ok(())
            }
        })
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    /// Restarts the faulting member and records its description.
    struct RestartHandler {
        restarted: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl FaultHandler for RestartHandler {
        async fn on_fault(
            &self,
            _scope: &FaultScope<'_>,
            member: &ObservableRef,
            _error: &WorkerError,
        ) -> Result<(), WorkerError> {
            member.restart().await?;
            self.restarted
                .lock()
                .expect("test lock")
                .push(member.description().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_restart_handler_contains_fault() {
        let runs_a = Arc::new(AtomicUsize::new(0));
        let runs_b = Arc::new(AtomicUsize::new(0));
        let runs_c = Arc::new(AtomicUsize::new(0));
        let a = Worker::start("a", ticker(Arc::clone(&runs_a))).await;
        let b = Worker::start("b", ticker(Arc::clone(&runs_b))).await;
        let c = Worker::start("c", ticker(Arc::clone(&runs_c))).await;

        let handler = Arc::new(RestartHandler {
            restarted: StdMutex::new(Vec::new()),
        });
        let sentinel =
            Sentinel::with_handler("trio", Arc::clone(&handler) as Arc<dyn FaultHandler>).await;
        sentinel
            .observe(vec![
                Arc::new(a.clone()) as ObservableRef,
                Arc::new(b.clone()),
                Arc::new(c.clone()),
            ])
            .await
            .expect("observe");

        let _ = b
            .kill(WorkerError::Killed {
                reason: "test fault".into(),
            })
            .await;

        // Exactly the killed worker restarts; its siblings never flinch.
        let watch_b = Arc::clone(&runs_b);
        let b2 = b.clone();
        wait_until(move || {
            watch_b.load(Ordering::SeqCst) == 2 && b2.status() == WorkerStatus::Running
        })
        .await;
        assert_eq!(runs_a.load(Ordering::SeqCst), 1);
        assert_eq!(runs_c.load(Ordering::SeqCst), 1);
        assert_eq!(a.status(), WorkerStatus::Running);
        assert_eq!(c.status(), WorkerStatus::Running);
        assert_eq!(
            *handler.restarted.lock().expect("test lock"),
            vec!["b".to_string()]
        );

        // Stop drains all three members cleanly.
        sentinel.stop().await.expect("sentinel stop");
        assert_eq!(a.status(), WorkerStatus::Stopped);
        assert_eq!(b.status(), WorkerStatus::Stopped);
        assert_eq!(c.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_fault_without_handler_cascades() {
        let runs_a = Arc::new(AtomicUsize::new(0));
        let runs_b = Arc::new(AtomicUsize::new(0));
        let a = Worker::start("a", ticker(runs_a)).await;
        let b = Worker::start("b", ticker(runs_b)).await;

        let sentinel = Sentinel::start("failfast").await;
        sentinel
            .observe(vec![Arc::new(a.clone()) as ObservableRef, Arc::new(b.clone())])
            .await
            .expect("observe");

        let killed = WorkerError::Killed {
            reason: "fatal".into(),
        };
        let _ = a.kill(killed.clone()).await;

        // The sentinel terminates with the member's error and stops the
        // remaining member on its way out.
        let err = sentinel.wait().await.expect_err("fault is fatal");
        assert_eq!(err, killed);
        assert_eq!(b.status(), WorkerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_completion_removes_member() {
        // The work completes only after the test releases it, so the
        // sentinel is guaranteed to be attached when the note fires.
        let release = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::clone(&release);
        let work: WorkRef = WorkFn::arc("one-shot", move |_ctx: CancellationToken| {
            let gate = Arc::clone(&gate);
            async move {
                gate.notified().await;
                Ok(())
            }
        });
        let worker = Worker::start("one-shot", work).await;
        let sentinel = Sentinel::start("watcher").await;
        sentinel
            .observe(vec![Arc::new(worker.clone()) as ObservableRef])
            .await
            .expect("observe");

        release.notify_one();
        worker.wait().await.expect("clean completion");

        let mut removed = false;
        for _ in 0..200 {
            let count = Arc::new(AtomicUsize::new(0));
            let counting = Arc::clone(&count);
            sentinel
                .observables_do(move |_| {
                    counting.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
                .expect("observables_do");
            if count.load(Ordering::SeqCst) == 0 {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(removed, "completed member still observed");

        sentinel.stop().await.expect("sentinel stop");
    }

    #[tokio::test]
    async fn test_forget_leaves_member_running() {
        let runs = Arc::new(AtomicUsize::new(0));
        let worker = Worker::start("independent", ticker(runs)).await;
        let sentinel = Sentinel::start("watcher").await;
        sentinel
            .observe(vec![Arc::new(worker.clone()) as ObservableRef])
            .await
            .expect("observe");
        sentinel.forget(&["independent"]).await.expect("forget");

        sentinel.stop().await.expect("sentinel stop");
        // The forgotten member is untouched by the sentinel's shutdown.
        assert_eq!(worker.status(), WorkerStatus::Running);
        worker.stop().await.expect("manual stop");
    }

    #[tokio::test]
    async fn test_observables_do_short_circuits() {
        let runs_a = Arc::new(AtomicUsize::new(0));
        let runs_b = Arc::new(AtomicUsize::new(0));
        let a = Worker::start("a", ticker(runs_a)).await;
        let b = Worker::start("b", ticker(runs_b)).await;
        let sentinel = Sentinel::start("pair").await;
        sentinel
            .observe(vec![Arc::new(a.clone()) as ObservableRef, Arc::new(b.clone())])
            .await
            .expect("observe");

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let recording = Arc::clone(&seen);
        let err = sentinel
            .observables_do(move |member| {
                recording
                    .lock()
                    .expect("test lock")
                    .push(member.description().to_string());
                Err(WorkerError::failed("stop here"))
            })
            .await
            .expect_err("closure error surfaces");
        assert_eq!(err.as_label(), "worker_failed");
        // Iteration is in description order and aborted on the first error.
        assert_eq!(*seen.lock().expect("test lock"), vec!["a".to_string()]);

        sentinel.stop().await.expect("sentinel stop");
    }
}
